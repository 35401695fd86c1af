// # Store Trait
//
// Defines the interface for the local mirror of zones and records.
//
// ## Purpose
//
// Some providers do not expose enough query surface to reconstruct state on
// demand (no native RRsets, opaque record ids, zone ids needed on every
// call). The store keeps:
// - One `ZoneRow` per domain, with the provider config blob and the
//   provider-assigned zone id when there is one
// - One `RecordRow` per record value, keyed by a locally generated id and
//   carrying the provider record id when there is one
//
// ## Implementations
//
// - `MemoryStore`: in-process, lost on restart
// - `FileStore`: JSON file with atomic writes and backup recovery
//
// ## Usage
//
// ```rust,ignore
// use zonebridge_core::{Store, ZoneRow, RecordRow, RecordType};
//
// let store = MemoryStore::new();
// store.upsert_zone(ZoneRow::new("example.com", None, config)).await?;
// store.upsert_record(RecordRow::new("example.com", "www", RecordType::A, "203.0.113.10", 3600, None)).await?;
// let rows = store.list_records("example.com", Some("www"), Some(&RecordType::A)).await?;
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::Result;
use crate::names;
use crate::record::RecordType;

/// Locally generated record identity
///
/// Distinct from the provider record id, which may be absent for providers
/// that key records by content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(String);

impl LocalId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocalId {
    fn from(s: &str) -> Self {
        Self(s.trim().to_string())
    }
}

impl From<String> for LocalId {
    fn from(s: String) -> Self {
        Self(s.trim().to_string())
    }
}

/// A zone registered with exactly one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneRow {
    /// Domain name, lowercased, without trailing dot (unique)
    pub domain_name: String,
    /// Owning client/tenant
    pub client_id: Option<String>,
    pub provider: ProviderKind,
    /// Credentials and options used for this zone
    pub config: ProviderConfig,
    /// Provider-assigned zone id, for providers that expose one
    pub provider_zone_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ZoneRow {
    pub fn new(domain: &str, client_id: Option<String>, config: ProviderConfig) -> Self {
        let now = Utc::now();
        Self {
            domain_name: names::zone_root(domain),
            client_id,
            provider: config.kind(),
            config,
            provider_zone_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_zone_id(mut self, zone_id: Option<String>) -> Self {
        self.provider_zone_id = zone_id;
        self
    }
}

/// One record value belonging to a zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRow {
    pub local_id: LocalId,
    /// Owning zone (domain name)
    pub domain: String,
    /// Provider-assigned id, when the provider has one
    pub provider_record_id: Option<String>,
    #[serde(rename = "type")]
    pub rtype: RecordType,
    /// Relative host, "@" for the apex
    pub host: String,
    pub value: String,
    pub ttl: u32,
    pub priority: Option<u16>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecordRow {
    /// Create a row with a fresh local id
    ///
    /// The host is normalized relative to `domain` ("@" for the apex).
    pub fn new(
        domain: &str,
        host: &str,
        rtype: RecordType,
        value: impl Into<String>,
        ttl: u32,
        priority: Option<u16>,
    ) -> Self {
        let now = Utc::now();
        Self {
            local_id: LocalId::generate(),
            domain: names::zone_root(domain),
            provider_record_id: None,
            host: names::relative_or_at(host, domain),
            rtype,
            value: value.into().trim().to_string(),
            ttl,
            priority,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_provider_id(mut self, id: Option<String>) -> Self {
        self.provider_record_id = id;
        self
    }

    /// Whether this row belongs to the RRset (domain, host, type)
    pub fn in_rrset(&self, domain: &str, host: &str, rtype: &RecordType) -> bool {
        self.domain == names::zone_root(domain)
            && self.host == names::relative_or_at(host, domain)
            && &self.rtype == rtype
    }
}

/// Trait for the local zone/record mirror
///
/// Implementations must be safe to call concurrently. Every mutation is
/// durable when the call returns; `flush` only matters for implementations
/// that buffer.
///
/// Domain and host arguments are normalized by the implementation, so
/// "Example.com." and "example.com" address the same zone, and "", "@" and
/// the bare zone name address the apex.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a zone, or update its config and client on conflict
    ///
    /// An existing `created_at` is kept. An existing provider zone id is kept
    /// unless the new row carries one.
    async fn upsert_zone(&self, zone: ZoneRow) -> Result<ZoneRow>;

    /// Get a zone by domain name
    async fn get_zone(&self, domain: &str) -> Result<Option<ZoneRow>>;

    /// List all zones
    async fn list_zones(&self) -> Result<Vec<ZoneRow>>;

    /// Record the provider-assigned zone id (no-op if the zone is unknown)
    async fn set_provider_zone_id(&self, domain: &str, zone_id: &str) -> Result<()>;

    /// Bump the zone's updated timestamp
    async fn touch_zone(&self, domain: &str) -> Result<()>;

    /// Delete a zone and all of its records in one write
    ///
    /// Returns the number of record rows removed. Deleting an unknown zone
    /// is not an error.
    async fn delete_zone(&self, domain: &str) -> Result<usize>;

    /// List records of a zone in insertion order, optionally filtered by
    /// host and type
    async fn list_records(
        &self,
        domain: &str,
        host: Option<&str>,
        rtype: Option<&RecordType>,
    ) -> Result<Vec<RecordRow>>;

    /// Get one record by local id
    async fn get_record(&self, domain: &str, local_id: &LocalId) -> Result<Option<RecordRow>>;

    /// Insert a record, or update the existing row with the same
    /// (domain, host, type, value)
    ///
    /// On update the local id and `created_at` are kept, TTL and priority
    /// are overwritten, and the provider id is filled in when supplied.
    /// Returns the stored row.
    async fn upsert_record(&self, row: RecordRow) -> Result<RecordRow>;

    /// Overwrite the row with the same local id
    ///
    /// Fails with a persistence error if no such row exists.
    async fn update_record(&self, row: RecordRow) -> Result<()>;

    /// Delete a record by local id (absent is not an error)
    async fn delete_record(&self, domain: &str, local_id: &LocalId) -> Result<()>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<()>;
}
