//! Identity index
//!
//! A view over the store's record rows mapping (zone, host, type) to the
//! ordered list of published values and their provider record ids. Adapters
//! whose providers key records by opaque id use it to find the id of a value
//! they are asked to modify or delete, and zone-id based providers use it to
//! cache the provider zone id.
//!
//! The index never owns data of its own: every entry is a [`RecordRow`], and
//! writes are last-writer-wins per (zone, host, type, content).

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::merge;
use crate::record::RecordType;
use crate::traits::store::{RecordRow, Store};

/// One value of an RRset as known to the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityEntry {
    pub content: String,
    pub provider_id: Option<String>,
    pub priority: Option<u16>,
    pub ttl: u32,
}

impl IdentityEntry {
    pub fn new(content: impl Into<String>, provider_id: Option<String>, ttl: u32) -> Self {
        Self {
            content: content.into(),
            provider_id,
            priority: None,
            ttl,
        }
    }

    pub fn with_priority(mut self, priority: Option<u16>) -> Self {
        self.priority = priority;
        self
    }
}

impl From<RecordRow> for IdentityEntry {
    fn from(row: RecordRow) -> Self {
        Self {
            content: row.value,
            provider_id: row.provider_record_id,
            priority: row.priority,
            ttl: row.ttl,
        }
    }
}

/// Map a persistence error raised after the provider accepted a mutation
///
/// The remote change exists but could not be recorded locally, which must
/// not be confused with a provider-side failure.
pub fn after_provider_success(operation: &str) -> impl FnOnce(Error) -> Error + '_ {
    move |e| match e {
        Error::PartialFailure { .. } => e,
        other => Error::partial_failure(operation, other.to_string()),
    }
}

/// Durable (zone, host, type) → entries mapping backed by a [`Store`]
#[derive(Clone)]
pub struct IdentityIndex {
    store: Arc<dyn Store>,
}

impl fmt::Debug for IdentityIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityIndex").finish_non_exhaustive()
    }
}

impl IdentityIndex {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Record a published value
    ///
    /// An existing entry with the same content is updated in place.
    pub async fn put(
        &self,
        zone: &str,
        host: &str,
        rtype: &RecordType,
        entry: IdentityEntry,
    ) -> Result<()> {
        let row = RecordRow::new(zone, host, rtype.clone(), entry.content, entry.ttl, entry.priority)
            .with_provider_id(entry.provider_id);
        self.store.upsert_record(row).await?;
        Ok(())
    }

    /// All entries of an RRset in insertion order
    pub async fn get(&self, zone: &str, host: &str, rtype: &RecordType) -> Result<Vec<IdentityEntry>> {
        Ok(self
            .store
            .list_records(zone, Some(host), Some(rtype))
            .await?
            .into_iter()
            .map(IdentityEntry::from)
            .collect())
    }

    /// Find one entry by provider id or by content
    ///
    /// Content is compared in the same normalized form the merge engine
    /// uses (MX by host, TXT/SPF without outer quotes).
    pub async fn get_one(
        &self,
        zone: &str,
        host: &str,
        rtype: &RecordType,
        key: &str,
    ) -> Result<Option<IdentityEntry>> {
        let target = merge::comparable(rtype, key);
        Ok(self
            .get(zone, host, rtype)
            .await?
            .into_iter()
            .find(|e| {
                e.provider_id.as_deref() == Some(key.trim())
                    || merge::comparable(rtype, &e.content) == target
            }))
    }

    /// Replace the entry holding `old_content` with `entry`, keeping its
    /// local identity; inserts when nothing matches
    pub async fn replace(
        &self,
        zone: &str,
        host: &str,
        rtype: &RecordType,
        old_content: &str,
        entry: IdentityEntry,
    ) -> Result<()> {
        let target = merge::comparable(rtype, old_content);
        let existing = self
            .store
            .list_records(zone, Some(host), Some(rtype))
            .await?
            .into_iter()
            .find(|r| merge::comparable(rtype, &r.value) == target);

        match existing {
            Some(mut row) => {
                row.value = entry.content.trim().to_string();
                row.ttl = entry.ttl;
                row.priority = entry.priority;
                if entry.provider_id.is_some() {
                    row.provider_record_id = entry.provider_id;
                }
                self.store.update_record(row).await
            }
            None => self.put(zone, host, rtype, entry).await,
        }
    }

    /// Forget the entry with the given provider id (or content, for
    /// providers without ids); absent is not an error
    pub async fn delete(&self, zone: &str, host: &str, rtype: &RecordType, id: &str) -> Result<()> {
        let target = merge::comparable(rtype, id);
        let rows = self.store.list_records(zone, Some(host), Some(rtype)).await?;
        let matched = rows
            .iter()
            .find(|r| r.provider_record_id.as_deref() == Some(id.trim()))
            .or_else(|| rows.iter().find(|r| merge::comparable(rtype, &r.value) == target));
        if let Some(row) = matched {
            self.store.delete_record(zone, &row.local_id).await?;
        }
        Ok(())
    }

    /// Cached provider zone id
    pub async fn zone_id(&self, zone: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .get_zone(zone)
            .await?
            .and_then(|z| z.provider_zone_id))
    }

    /// Cache the provider zone id (no-op for unknown zones)
    pub async fn set_zone_id(&self, zone: &str, zone_id: &str) -> Result<()> {
        self.store.set_provider_zone_id(zone, zone_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::state::MemoryStore;
    use crate::traits::store::ZoneRow;

    fn index() -> IdentityIndex {
        IdentityIndex::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_put_get_preserves_order() {
        let idx = index();
        let t = RecordType::A;
        idx.put("example.com", "www", &t, IdentityEntry::new("192.0.2.1", Some("r1".into()), 300))
            .await
            .unwrap();
        idx.put("example.com", "www.example.com", &t, IdentityEntry::new("192.0.2.2", Some("r2".into()), 300))
            .await
            .unwrap();

        let entries = idx.get("example.com", "www", &t).await.unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.provider_id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
    }

    #[tokio::test]
    async fn test_put_is_last_writer_wins_per_content() {
        let idx = index();
        let t = RecordType::A;
        idx.put("example.com", "@", &t, IdentityEntry::new("192.0.2.1", Some("old".into()), 300))
            .await
            .unwrap();
        idx.put("example.com", "", &t, IdentityEntry::new("192.0.2.1", Some("new".into()), 600))
            .await
            .unwrap();

        let entries = idx.get("example.com", "@", &t).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].provider_id.as_deref(), Some("new"));
        assert_eq!(entries[0].ttl, 600);
    }

    #[tokio::test]
    async fn test_get_one_by_id_or_normalized_content() {
        let idx = index();
        idx.put(
            "example.com",
            "@",
            &RecordType::Mx,
            IdentityEntry::new("10 mail.example.com", Some("mx-1".into()), 300).with_priority(Some(10)),
        )
        .await
        .unwrap();

        let by_id = idx.get_one("example.com", "@", &RecordType::Mx, "mx-1").await.unwrap();
        assert!(by_id.is_some());
        let by_host = idx
            .get_one("example.com", "@", &RecordType::Mx, "mail.example.com.")
            .await
            .unwrap();
        assert_eq!(by_host.unwrap().provider_id.as_deref(), Some("mx-1"));
        assert!(
            idx.get_one("example.com", "@", &RecordType::Mx, "other.example.com")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_replace_and_delete() {
        let idx = index();
        let t = RecordType::Txt;
        idx.put("example.com", "_acme", &t, IdentityEntry::new("\"token-1\"", Some("t1".into()), 60))
            .await
            .unwrap();
        idx.replace("example.com", "_acme", &t, "token-1", IdentityEntry::new("\"token-2\"", None, 60))
            .await
            .unwrap();

        let entries = idx.get("example.com", "_acme", &t).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "\"token-2\"");
        assert_eq!(entries[0].provider_id.as_deref(), Some("t1"));

        idx.delete("example.com", "_acme", &t, "t1").await.unwrap();
        idx.delete("example.com", "_acme", &t, "t1").await.unwrap();
        assert!(idx.get("example.com", "_acme", &t).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zone_id_cache() {
        let store = Arc::new(MemoryStore::new());
        let idx = IdentityIndex::new(store.clone());
        assert_eq!(idx.zone_id("example.com").await.unwrap(), None);

        store
            .upsert_zone(ZoneRow::new(
                "example.com",
                None,
                ProviderConfig::Hetzner {
                    api_key: "k".into(),
                    api_url: None,
                },
            ))
            .await
            .unwrap();
        idx.set_zone_id("example.com", "zone-42").await.unwrap();
        assert_eq!(idx.zone_id("example.com.").await.unwrap().as_deref(), Some("zone-42"));
    }

    #[test]
    fn test_after_provider_success_tags_partial_failure() {
        let err = after_provider_success("create_rrset")(Error::persistence("disk full"));
        assert!(matches!(err, Error::PartialFailure { ref operation, .. } if operation == "create_rrset"));
    }
}
