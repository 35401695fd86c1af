// # Memory Store
//
// In-memory implementation of Store.
//
// ## Purpose
//
// Provides a simple, fast store that doesn't persist across restarts.
// Useful for testing and for providers whose API can reconstruct every
// RRset on demand.
//
// ## Crash Behavior
//
// - All zones and records are lost on restart/crash
// - Per-record providers lose their provider record ids; records created
//   before the restart can then only be located by content

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::Tables;
use crate::error::Result;
use crate::record::RecordType;
use crate::traits::store::{LocalId, RecordRow, Store, ZoneRow};

/// In-memory store implementation
///
/// # Example
///
/// ```rust,no_run
/// use zonebridge_core::state::MemoryStore;
/// use zonebridge_core::traits::{RecordRow, Store};
/// use zonebridge_core::RecordType;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStore::new();
///
///     store
///         .upsert_record(RecordRow::new("example.com", "www", RecordType::A, "203.0.113.10", 3600, None))
///         .await?;
///
///     let rows = store.list_records("example.com", Some("www"), None).await?;
///     assert_eq!(rows.len(), 1);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of record rows across all zones
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    /// Check if the store holds no zones and no records
    pub async fn is_empty(&self) -> bool {
        let tables = self.inner.read().await;
        tables.zones.is_empty() && tables.records.is_empty()
    }

    /// Remove every zone and record
    pub async fn clear(&self) {
        *self.inner.write().await = Tables::default();
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_zone(&self, zone: ZoneRow) -> Result<ZoneRow> {
        Ok(self.inner.write().await.upsert_zone(zone))
    }

    async fn get_zone(&self, domain: &str) -> Result<Option<ZoneRow>> {
        Ok(self.inner.read().await.zone(domain).cloned())
    }

    async fn list_zones(&self) -> Result<Vec<ZoneRow>> {
        Ok(self.inner.read().await.zones.clone())
    }

    async fn set_provider_zone_id(&self, domain: &str, zone_id: &str) -> Result<()> {
        self.inner.write().await.set_provider_zone_id(domain, zone_id);
        Ok(())
    }

    async fn touch_zone(&self, domain: &str) -> Result<()> {
        self.inner.write().await.touch_zone(domain);
        Ok(())
    }

    async fn delete_zone(&self, domain: &str) -> Result<usize> {
        Ok(self.inner.write().await.delete_zone(domain))
    }

    async fn list_records(
        &self,
        domain: &str,
        host: Option<&str>,
        rtype: Option<&RecordType>,
    ) -> Result<Vec<RecordRow>> {
        Ok(self.inner.read().await.list_records(domain, host, rtype))
    }

    async fn get_record(&self, domain: &str, local_id: &LocalId) -> Result<Option<RecordRow>> {
        Ok(self.inner.read().await.record(domain, local_id).cloned())
    }

    async fn upsert_record(&self, row: RecordRow) -> Result<RecordRow> {
        Ok(self.inner.write().await.upsert_record(row))
    }

    async fn update_record(&self, row: RecordRow) -> Result<()> {
        self.inner.write().await.update_record(row)
    }

    async fn delete_record(&self, domain: &str, local_id: &LocalId) -> Result<()> {
        self.inner.write().await.delete_record(domain, local_id);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        // No-op for memory store
        Ok(())
    }
}
