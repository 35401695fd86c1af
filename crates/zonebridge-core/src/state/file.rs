// # File Store
//
// File-based implementation of Store with crash recovery.
//
// ## Purpose
//
// Keeps the zone/record mirror across restarts, so provider record ids and
// zone ids survive and later modify/delete calls can still target the
// right remote record.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good state
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "zones": [
//     {
//       "domain_name": "example.com",
//       "client_id": null,
//       "provider": "hetzner",
//       "config": { "provider": "hetzner", "api_key": "...", "api_url": null },
//       "provider_zone_id": "zGTcm7tVL4d2j9",
//       "created_at": "2025-01-09T12:00:00Z",
//       "updated_at": "2025-01-09T12:00:00Z"
//     }
//   ],
//   "records": [
//     {
//       "local_id": "3f0c5f0e-8a3e-4a53-9a53-0e3b8f3c7d11",
//       "domain": "example.com",
//       "provider_record_id": "7f2a...",
//       "type": "A",
//       "host": "www",
//       "value": "203.0.113.10",
//       "ttl": 3600,
//       "priority": null,
//       "created_at": "2025-01-09T12:00:00Z",
//       "updated_at": "2025-01-09T12:00:00Z"
//     }
//   ]
// }
// ```
//
// The file holds provider credentials (the config blob of each zone) and
// should be readable only by the service account.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use super::Tables;
use crate::error::{Error, Result};
use crate::record::RecordType;
use crate::traits::store::{LocalId, RecordRow, Store, ZoneRow};

/// Store file format version
const STORE_FILE_VERSION: &str = "1.0";

/// File-based store with crash recovery
///
/// Every mutation rewrites the whole file before returning, so a zone
/// deletion and its cascading record deletion land in one atomic write.
///
/// # Example
///
/// ```rust,no_run
/// use zonebridge_core::state::FileStore;
/// use zonebridge_core::traits::Store;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStore::new("/var/lib/zonebridge/store.json").await?;
///     for zone in store.list_zones().await? {
///         println!("{} ({})", zone.domain_name, zone.provider);
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

#[derive(Debug)]
struct FileState {
    tables: Tables,
}

/// Serializable store file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoreFileFormat {
    version: String,
    #[serde(flatten)]
    tables: Tables,
}

impl FileStore {
    /// Create or load a file store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Try to load the existing store file
    /// 3. If it is corrupted, load the backup instead
    /// 4. If both fail, start empty
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let tables = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState { tables })),
        })
    }

    /// Load tables from file with automatic recovery
    async fn load_with_recovery(path: &Path) -> Result<Tables> {
        match Self::load(path).await {
            Ok(tables) => {
                tracing::debug!(
                    "Loaded store from file: {} zones, {} records",
                    tables.zones.len(),
                    tables.records.len()
                );
                Ok(tables)
            }
            Err(LoadError::Corrupted(e)) => {
                tracing::warn!(
                    "Store file appears corrupted: {}. Attempting recovery from backup.",
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty store.");
                    return Ok(Tables::default());
                }

                match Self::load(&backup_path).await {
                    Ok(tables) => {
                        tracing::info!(
                            "Recovered store from backup: {} zones, {} records",
                            tables.zones.len(),
                            tables.records.len()
                        );
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore store file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(tables)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also unusable: {}. Starting with empty store.",
                            backup_err
                        );
                        Ok(Tables::default())
                    }
                }
            }
            Err(LoadError::Io(e)) => Err(e),
        }
    }

    async fn load(path: &Path) -> std::result::Result<Tables, LoadError> {
        if !path.exists() {
            tracing::debug!("Store file does not exist: {}", path.display());
            return Ok(Tables::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            LoadError::Io(Error::persistence(format!(
                "Failed to read store file {}: {}",
                path.display(),
                e
            )))
        })?;

        let file: StoreFileFormat = serde_json::from_str(&content).map_err(|e| {
            LoadError::Corrupted(Error::persistence(format!(
                "Failed to parse store file {}: {}",
                path.display(),
                e
            )))
        })?;

        if file.version != STORE_FILE_VERSION {
            tracing::warn!(
                "Store file version mismatch: expected {}, got {}. Attempting to load anyway.",
                STORE_FILE_VERSION,
                file.version
            );
        }

        Ok(file.tables)
    }

    /// Write the in-memory tables to file
    async fn write(&self) -> Result<()> {
        let guard = self.state.write().await;
        self.write_tables(&guard.tables).await
    }

    /// Write tables to file atomically
    ///
    /// Callers hold the state write lock so writes never interleave.
    async fn write_tables(&self, tables: &Tables) -> Result<()> {
        let file = StoreFileFormat {
            version: STORE_FILE_VERSION.to_string(),
            tables: tables.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::persistence(format!("Failed to serialize store: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut f = fs::File::create(&temp_path).await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            f.write_all(json.as_bytes()).await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            f.flush().await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::persistence(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Store written to file: {}", self.path.display());
        Ok(())
    }

    /// Apply a mutation to a copy of the tables, write it out, then
    /// install it
    ///
    /// A failed write leaves the in-memory tables untouched.
    async fn mutate<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T> {
        let mut guard = self.state.write().await;
        let mut next = guard.tables.clone();
        let out = f(&mut next);
        self.write_tables(&next).await?;
        guard.tables = next;
        Ok(out)
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }

    /// Force immediate write to disk
    pub async fn sync(&self) -> Result<()> {
        self.write().await
    }
}

enum LoadError {
    /// The file exists but is not a valid store file
    Corrupted(Error),
    Io(Error),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Corrupted(e) | LoadError::Io(e) => e.fmt(f),
        }
    }
}

#[async_trait]
impl Store for FileStore {
    async fn upsert_zone(&self, zone: ZoneRow) -> Result<ZoneRow> {
        self.mutate(|t| t.upsert_zone(zone)).await
    }

    async fn get_zone(&self, domain: &str) -> Result<Option<ZoneRow>> {
        Ok(self.state.read().await.tables.zone(domain).cloned())
    }

    async fn list_zones(&self) -> Result<Vec<ZoneRow>> {
        Ok(self.state.read().await.tables.zones.clone())
    }

    async fn set_provider_zone_id(&self, domain: &str, zone_id: &str) -> Result<()> {
        self.mutate(|t| t.set_provider_zone_id(domain, zone_id))
            .await
            .map(|_| ())
    }

    async fn touch_zone(&self, domain: &str) -> Result<()> {
        self.mutate(|t| t.touch_zone(domain)).await.map(|_| ())
    }

    async fn delete_zone(&self, domain: &str) -> Result<usize> {
        self.mutate(|t| t.delete_zone(domain)).await
    }

    async fn list_records(
        &self,
        domain: &str,
        host: Option<&str>,
        rtype: Option<&RecordType>,
    ) -> Result<Vec<RecordRow>> {
        Ok(self
            .state
            .read()
            .await
            .tables
            .list_records(domain, host, rtype))
    }

    async fn get_record(&self, domain: &str, local_id: &LocalId) -> Result<Option<RecordRow>> {
        Ok(self
            .state
            .read()
            .await
            .tables
            .record(domain, local_id)
            .cloned())
    }

    async fn upsert_record(&self, row: RecordRow) -> Result<RecordRow> {
        self.mutate(|t| t.upsert_record(row)).await
    }

    async fn update_record(&self, row: RecordRow) -> Result<()> {
        self.mutate(|t| t.update_record(row)).await?
    }

    async fn delete_record(&self, domain: &str, local_id: &LocalId) -> Result<()> {
        self.mutate(|t| t.delete_record(domain, local_id)).await
    }

    async fn flush(&self) -> Result<()> {
        // Every mutation is already on disk
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use tempfile::tempdir;

    fn hetzner_zone(domain: &str) -> ZoneRow {
        ZoneRow::new(
            domain,
            None,
            ProviderConfig::Hetzner {
                api_key: "secret".into(),
                api_url: None,
            },
        )
    }

    #[tokio::test]
    async fn test_file_store_basic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileStore::new(&path).await.unwrap();
        assert!(store.list_zones().await.unwrap().is_empty());

        store
            .upsert_zone(hetzner_zone("example.com").with_zone_id(Some("z1".into())))
            .await
            .unwrap();
        let row = store
            .upsert_record(
                RecordRow::new("example.com", "www", RecordType::A, "203.0.113.10", 3600, None)
                    .with_provider_id(Some("r1".into())),
            )
            .await
            .unwrap();

        assert!(path.exists());

        // Load new instance and verify persistence
        let store2 = FileStore::new(&path).await.unwrap();
        let zone = store2.get_zone("example.com").await.unwrap().unwrap();
        assert_eq!(zone.provider_zone_id.as_deref(), Some("z1"));
        let fetched = store2.get_record("example.com", &row.local_id).await.unwrap();
        assert_eq!(fetched.unwrap().provider_record_id.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_file_store_corruption_recovery() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileStore::new(&path).await.unwrap();
        store.upsert_zone(hetzner_zone("first.com")).await.unwrap();
        // Second write creates the backup holding only the first zone
        store.upsert_zone(hetzner_zone("second.com")).await.unwrap();

        let backup_path = FileStore::backup_path(&path);
        assert!(backup_path.exists(), "Backup file should exist after write");

        fs::write(&path, b"corrupted json data").await.unwrap();

        let store2 = FileStore::new(&path).await.unwrap();
        let zones = store2.list_zones().await.unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].domain_name, "first.com");
    }

    #[tokio::test]
    async fn test_file_store_cascade_delete_is_durable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = FileStore::new(&path).await.unwrap();
        store.upsert_zone(hetzner_zone("example.com")).await.unwrap();
        for v in ["192.0.2.1", "192.0.2.2"] {
            store
                .upsert_record(RecordRow::new("example.com", "www", RecordType::A, v, 300, None))
                .await
                .unwrap();
        }
        assert_eq!(store.delete_zone("example.com").await.unwrap(), 2);

        let store2 = FileStore::new(&path).await.unwrap();
        assert!(store2.get_zone("example.com").await.unwrap().is_none());
        assert!(
            store2
                .list_records("example.com", None, None)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileStore::new(&path).await.unwrap();
        store.upsert_zone(hetzner_zone("example.com")).await.unwrap();

        // A directory in place of the temp file makes the next write fail
        let blocker = dir.path().join("store.tmp");
        fs::create_dir(&blocker).await.unwrap();

        let result = store
            .upsert_record(RecordRow::new("example.com", "www", RecordType::A, "203.0.113.10", 3600, None))
            .await;
        assert!(matches!(result, Err(Error::Persistence(_))));
        assert!(store.list_records("example.com", None, None).await.unwrap().is_empty());

        fs::remove_dir(&blocker).await.unwrap();
        store.touch_zone("example.com").await.unwrap();

        let reloaded = FileStore::new(&path).await.unwrap();
        assert!(reloaded.list_records("example.com", None, None).await.unwrap().is_empty());
        assert!(reloaded.get_zone("example.com").await.unwrap().is_some());
    }
}
