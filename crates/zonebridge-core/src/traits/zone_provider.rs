// # Zone Provider Trait
//
// Defines the uniform capability set every DNS back end adapter exposes.
//
// ## Implementations
//
// - deSEC: `zonebridge-provider-desec`
// - PowerDNS: `zonebridge-provider-powerdns`
// - Cloudflare: `zonebridge-provider-cloudflare`
// - Hetzner DNS: `zonebridge-provider-hetzner`
// - Vultr: `zonebridge-provider-vultr`
// - DNSimple: `zonebridge-provider-dnsimple`
// - ClouDNS: `zonebridge-provider-cloudns`
//
// ## Usage
//
// ```rust,ignore
// use zonebridge_core::{RecordType, RrsetPayload, ZoneProvider};
//
// let provider = registry.create_provider(&config, index)?;
// provider.create_domain("example.com").await?;
// provider
//     .create_rrset(
//         "example.com",
//         &RrsetPayload::new("www", RecordType::A, 3600, vec!["203.0.113.10".into()]),
//     )
//     .await?;
// ```

use async_trait::async_trait;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{Error, Result};
use crate::identity::IdentityIndex;
use crate::record::{DnssecStatus, DomainCreated, DomainInfo, DsRecord, RecordType, Rrset, RrsetPayload};

/// Trait for DNS provider adapters
///
/// Each adapter translates the calls below into its provider's API through a
/// [`Transport`](crate::transport::Transport). Operations a provider cannot
/// perform return [`Error::Unsupported`]; that is the default for every
/// optional method.
///
/// # Trust Level: Untrusted
///
/// Adapters perform API calls to their own endpoint and nothing else:
/// - No retries or backoff; a failed call is returned as an error
/// - No caching beyond a single operation
/// - Identity bookkeeping only through the [`IdentityIndex`] they were
///   built with, and only for providers that need it
///
/// # Deletion
///
/// `delete_domain` reports a missing zone as [`Error::NotFound`]. Tolerating
/// that outcome is the orchestration service's decision, not the adapter's.
/// `delete_rrset` on the other hand treats a missing record as already
/// deleted and returns `Ok(())`.
#[async_trait]
pub trait ZoneProvider: Send + Sync {
    /// Provider discriminator (for logging and error context)
    fn kind(&self) -> ProviderKind;

    /// Whether writes of `rtype` replace the whole RRset
    ///
    /// When `true`, callers adding or removing one value must submit the
    /// full recomputed value list. When `false`, each value is an
    /// independent record at the provider.
    fn replaces_whole_rrset(&self, rtype: &RecordType) -> bool;

    /// Create a zone
    ///
    /// Fails with `EmptyInput` for a blank name and `Conflict` if the zone
    /// already exists at the provider.
    async fn create_domain(&self, name: &str) -> Result<DomainCreated>;

    /// List zones visible to the configured account
    async fn list_domains(&self) -> Result<Vec<DomainInfo>> {
        Err(Error::unsupported(self.kind().as_str(), "list_domains"))
    }

    /// Get a single zone
    async fn get_domain(&self, name: &str) -> Result<DomainInfo> {
        let _ = name;
        Err(Error::unsupported(self.kind().as_str(), "get_domain"))
    }

    /// Delete a zone
    async fn delete_domain(&self, name: &str) -> Result<()>;

    /// Export the zone in RFC 1035 presentation format
    async fn export_zonefile(&self, name: &str) -> Result<String> {
        let _ = name;
        Err(Error::unsupported(self.kind().as_str(), "export_zonefile"))
    }

    /// Create an RRset, or add values to an existing one
    ///
    /// Adding a value that is already published is a no-op.
    async fn create_rrset(&self, zone: &str, payload: &RrsetPayload) -> Result<()>;

    /// Create several RRsets
    ///
    /// The default submits them one at a time and stops at the first error.
    async fn create_bulk_rrsets(&self, zone: &str, payloads: &[RrsetPayload]) -> Result<()> {
        for payload in payloads {
            self.create_rrset(zone, payload).await?;
        }
        Ok(())
    }

    /// Retrieve one RRset
    async fn retrieve_rrset(&self, zone: &str, subname: &str, rtype: &RecordType) -> Result<Rrset> {
        let _ = (zone, subname, rtype);
        Err(Error::unsupported(self.kind().as_str(), "retrieve_rrset"))
    }

    /// Retrieve every RRset of a zone
    async fn retrieve_all_rrsets(&self, zone: &str) -> Result<Vec<Rrset>> {
        let _ = zone;
        Err(Error::unsupported(self.kind().as_str(), "retrieve_all_rrsets"))
    }

    /// Modify an RRset
    ///
    /// For whole-RRset providers `payload.records` becomes the complete new
    /// value list. Per-record providers locate the record to change by
    /// `payload.old_value` and fail with `MissingOldValue` without it, or
    /// with `NotFound` when nothing matches.
    async fn modify_rrset(
        &self,
        zone: &str,
        subname: &str,
        rtype: &RecordType,
        payload: &RrsetPayload,
    ) -> Result<()>;

    /// Modify several RRsets, addressed by each payload's subname and type
    async fn modify_bulk_rrsets(&self, zone: &str, payloads: &[RrsetPayload]) -> Result<()> {
        for payload in payloads {
            let rrset = payload.validate()?;
            self.modify_rrset(zone, &rrset.subname, &rrset.rtype, payload)
                .await?;
        }
        Ok(())
    }

    /// Delete one value of an RRset, or the whole RRset when `value` is
    /// `None`
    ///
    /// Whole-RRset providers resubmit the remaining values when others are
    /// left. A value that is not published is treated as already deleted.
    async fn delete_rrset(
        &self,
        zone: &str,
        subname: &str,
        rtype: &RecordType,
        value: Option<&str>,
    ) -> Result<()>;

    /// Delete several RRsets
    ///
    /// Each payload names a subname and type; its records, when present,
    /// are deleted value by value, otherwise the whole RRset goes.
    async fn delete_bulk_rrsets(&self, zone: &str, payloads: &[RrsetPayload]) -> Result<()> {
        for payload in payloads {
            let subname = payload
                .subname
                .as_deref()
                .ok_or_else(|| Error::missing_field("subname"))?;
            let rtype = payload
                .rtype
                .as_ref()
                .ok_or_else(|| Error::missing_field("type"))?;
            if payload.records.is_empty() {
                self.delete_rrset(zone, subname, rtype, None).await?;
            } else {
                for value in &payload.records {
                    self.delete_rrset(zone, subname, rtype, Some(value)).await?;
                }
            }
        }
        Ok(())
    }

    /// Turn on DNSSEC signing and return the DS records to publish at the
    /// parent
    async fn enable_dnssec(&self, zone: &str) -> Result<Vec<DsRecord>> {
        let _ = zone;
        Err(Error::unsupported(self.kind().as_str(), "enable_dnssec"))
    }

    /// Turn off DNSSEC signing
    async fn disable_dnssec(&self, zone: &str) -> Result<()> {
        let _ = zone;
        Err(Error::unsupported(self.kind().as_str(), "disable_dnssec"))
    }

    /// Current DNSSEC state
    async fn dnssec_status(&self, zone: &str) -> Result<DnssecStatus> {
        let _ = zone;
        Err(Error::unsupported(self.kind().as_str(), "dnssec_status"))
    }

    /// DS records for the zone (deduplicated)
    async fn ds_records(&self, zone: &str) -> Result<Vec<DsRecord>> {
        Ok(self.dnssec_status(zone).await?.ds)
    }
}

/// Helper trait for constructing adapters from configuration
pub trait ProviderFactory: Send + Sync {
    /// Create an adapter
    ///
    /// `config` has already been validated by the registry. `index` is the
    /// identity index the adapter may use for id bookkeeping.
    fn create(&self, config: &ProviderConfig, index: IdentityIndex) -> Result<Box<dyn ZoneProvider>>;
}

/// Reject a blank zone or record name
pub fn require_name(name: &str, what: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::empty_input(format!("{what} must not be empty")));
    }
    Ok(())
}
