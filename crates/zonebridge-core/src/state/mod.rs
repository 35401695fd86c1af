// # Store Implementations
//
// This module provides implementations of the Store trait for different
// persistence strategies. Both keep the same in-memory tables; the file
// store additionally writes them out after every mutation.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::names;
use crate::record::RecordType;
use crate::traits::store::{LocalId, RecordRow, ZoneRow};

/// Zone and record tables shared by the store implementations
///
/// Records are kept in insertion order so that RRsets reconstruct in the
/// order their values were added.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Tables {
    #[serde(default)]
    pub zones: Vec<ZoneRow>,
    #[serde(default)]
    pub records: Vec<RecordRow>,
}

impl Tables {
    pub fn upsert_zone(&mut self, mut zone: ZoneRow) -> ZoneRow {
        zone.domain_name = names::zone_root(&zone.domain_name);
        match self
            .zones
            .iter_mut()
            .find(|z| z.domain_name == zone.domain_name)
        {
            Some(existing) => {
                existing.client_id = zone.client_id.or(existing.client_id.take());
                existing.provider = zone.provider;
                existing.config = zone.config;
                if zone.provider_zone_id.is_some() {
                    existing.provider_zone_id = zone.provider_zone_id;
                }
                existing.updated_at = Utc::now();
                existing.clone()
            }
            None => {
                self.zones.push(zone.clone());
                zone
            }
        }
    }

    pub fn zone(&self, domain: &str) -> Option<&ZoneRow> {
        let root = names::zone_root(domain);
        self.zones.iter().find(|z| z.domain_name == root)
    }

    fn zone_mut(&mut self, domain: &str) -> Option<&mut ZoneRow> {
        let root = names::zone_root(domain);
        self.zones.iter_mut().find(|z| z.domain_name == root)
    }

    pub fn set_provider_zone_id(&mut self, domain: &str, zone_id: &str) -> bool {
        match self.zone_mut(domain) {
            Some(zone) => {
                zone.provider_zone_id = Some(zone_id.to_string());
                zone.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn touch_zone(&mut self, domain: &str) -> bool {
        match self.zone_mut(domain) {
            Some(zone) => {
                zone.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Remove the zone and its records; returns the number of records removed
    pub fn delete_zone(&mut self, domain: &str) -> usize {
        let root = names::zone_root(domain);
        self.zones.retain(|z| z.domain_name != root);
        let before = self.records.len();
        self.records.retain(|r| r.domain != root);
        before - self.records.len()
    }

    pub fn list_records(
        &self,
        domain: &str,
        host: Option<&str>,
        rtype: Option<&RecordType>,
    ) -> Vec<RecordRow> {
        let root = names::zone_root(domain);
        let host = host.map(|h| names::relative_or_at(h, &root));
        self.records
            .iter()
            .filter(|r| r.domain == root)
            .filter(|r| host.as_ref().is_none_or(|h| &r.host == h))
            .filter(|r| rtype.is_none_or(|t| &r.rtype == t))
            .cloned()
            .collect()
    }

    pub fn record(&self, domain: &str, local_id: &LocalId) -> Option<&RecordRow> {
        let root = names::zone_root(domain);
        self.records
            .iter()
            .find(|r| r.domain == root && &r.local_id == local_id)
    }

    pub fn upsert_record(&mut self, mut row: RecordRow) -> RecordRow {
        row.host = names::relative_or_at(&row.host, &row.domain);
        row.domain = names::zone_root(&row.domain);
        match self.records.iter_mut().find(|r| {
            r.domain == row.domain && r.host == row.host && r.rtype == row.rtype && r.value == row.value
        }) {
            Some(existing) => {
                existing.ttl = row.ttl;
                existing.priority = row.priority;
                if row.provider_record_id.is_some() {
                    existing.provider_record_id = row.provider_record_id;
                }
                existing.updated_at = Utc::now();
                existing.clone()
            }
            None => {
                self.records.push(row.clone());
                row
            }
        }
    }

    pub fn update_record(&mut self, mut row: RecordRow) -> Result<()> {
        row.host = names::relative_or_at(&row.host, &row.domain);
        row.domain = names::zone_root(&row.domain);
        let existing = self
            .records
            .iter_mut()
            .find(|r| r.domain == row.domain && r.local_id == row.local_id)
            .ok_or_else(|| {
                Error::persistence(format!(
                    "record {} of {} does not exist",
                    row.local_id, row.domain
                ))
            })?;
        row.created_at = existing.created_at;
        row.updated_at = Utc::now();
        *existing = row;
        Ok(())
    }

    pub fn delete_record(&mut self, domain: &str, local_id: &LocalId) {
        let root = names::zone_root(domain);
        self.records
            .retain(|r| !(r.domain == root && &r.local_id == local_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    fn zone(domain: &str) -> ZoneRow {
        ZoneRow::new(
            domain,
            Some("client-1".into()),
            ProviderConfig::Hetzner {
                api_key: "k".into(),
                api_url: None,
            },
        )
    }

    #[test]
    fn test_upsert_zone_keeps_zone_id_and_created_at() {
        let mut t = Tables::default();
        let first = t.upsert_zone(zone("Example.com.").with_zone_id(Some("z1".into())));
        assert_eq!(first.domain_name, "example.com");

        let second = t.upsert_zone(zone("example.com"));
        assert_eq!(t.zones.len(), 1);
        assert_eq!(second.provider_zone_id.as_deref(), Some("z1"));
        assert_eq!(second.created_at, first.created_at);
    }

    #[test]
    fn test_upsert_record_keyed_by_value() {
        let mut t = Tables::default();
        let a = t.upsert_record(RecordRow::new("example.com", "www", RecordType::A, "192.0.2.1", 300, None));
        let again = t.upsert_record(
            RecordRow::new("example.com", "www.example.com.", RecordType::A, "192.0.2.1", 600, None)
                .with_provider_id(Some("rec-1".into())),
        );
        assert_eq!(t.records.len(), 1);
        assert_eq!(again.local_id, a.local_id);
        assert_eq!(again.ttl, 600);
        assert_eq!(again.provider_record_id.as_deref(), Some("rec-1"));

        // A later upsert without provider id keeps the known one
        let kept = t.upsert_record(RecordRow::new("example.com", "www", RecordType::A, "192.0.2.1", 600, None));
        assert_eq!(kept.provider_record_id.as_deref(), Some("rec-1"));
    }

    #[test]
    fn test_list_filters_and_apex_forms() {
        let mut t = Tables::default();
        t.upsert_record(RecordRow::new("example.com", "", RecordType::A, "192.0.2.1", 300, None));
        t.upsert_record(RecordRow::new("example.com", "@", RecordType::A, "192.0.2.2", 300, None));
        t.upsert_record(RecordRow::new("example.com", "example.com", RecordType::Txt, "x", 300, None));
        t.upsert_record(RecordRow::new("other.org", "@", RecordType::A, "192.0.2.3", 300, None));

        let apex_a = t.list_records("example.com", Some(""), Some(&RecordType::A));
        assert_eq!(apex_a.len(), 2);
        assert_eq!(apex_a[0].value, "192.0.2.1");
        assert_eq!(apex_a[1].value, "192.0.2.2");
        assert_eq!(t.list_records("example.com", Some("@"), None).len(), 3);
        assert_eq!(t.list_records("example.com", None, None).len(), 3);
    }

    #[test]
    fn test_delete_zone_cascades() {
        let mut t = Tables::default();
        t.upsert_zone(zone("example.com"));
        t.upsert_record(RecordRow::new("example.com", "www", RecordType::A, "192.0.2.1", 300, None));
        t.upsert_record(RecordRow::new("example.com", "mail", RecordType::A, "192.0.2.2", 300, None));
        t.upsert_record(RecordRow::new("other.org", "www", RecordType::A, "192.0.2.3", 300, None));

        assert_eq!(t.delete_zone("example.com"), 2);
        assert!(t.zone("example.com").is_none());
        assert_eq!(t.records.len(), 1);
        assert_eq!(t.delete_zone("example.com"), 0);
    }

    #[test]
    fn test_update_missing_record_fails() {
        let mut t = Tables::default();
        let row = RecordRow::new("example.com", "www", RecordType::A, "192.0.2.1", 300, None);
        assert!(matches!(t.update_record(row), Err(Error::Persistence(_))));
    }
}
