//! Orchestration service
//!
//! The ZoneService is responsible for:
//! - Selecting an adapter for each operation from the zone's configuration
//! - Deciding whether a record change needs an RRset merge
//! - Keeping the local zone/record mirror in step with the provider
//!
//! ## Operation Flow
//!
//! ```text
//!   caller ──► ZoneService ──► ProviderRegistry ──► ZoneProvider ──► provider API
//!                   │
//!                   └──────► Store (zones, records)
//! ```
//!
//! Each operation is linear: the provider call happens first, the local
//! write second. A provider success followed by a failed local write is
//! reported as [`Error::PartialFailure`] and is never rolled back. Nothing is
//! retried here.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::identity::{IdentityIndex, after_provider_success};
use crate::merge::{self, MergeOp};
use crate::names;
use crate::record::{DnssecStatus, DsRecord, RecordType, RrsetPayload};
use crate::registry::ProviderRegistry;
use crate::traits::{LocalId, RecordRow, Store, ZoneProvider, ZoneRow, require_name};

/// Input of [`ZoneService::add_record`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub domain: String,
    /// Relative host; "" or "@" for the apex
    pub host: String,
    pub rtype: RecordType,
    pub value: String,
    pub ttl: u32,
    /// MX/SRV priority; for MX it may instead lead the value
    pub priority: Option<u16>,
}

/// Changes applied by [`ZoneService::update_record`]; `None` keeps the
/// current value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordChanges {
    pub value: Option<String>,
    pub ttl: Option<u32>,
    pub priority: Option<u16>,
}

/// Provider-agnostic zone and record operations
pub struct ZoneService {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn Store>,
}

impl ZoneService {
    pub fn new(registry: Arc<ProviderRegistry>, store: Arc<dyn Store>) -> Self {
        Self { registry, store }
    }

    /// The local mirror
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn adapter(&self, config: &ProviderConfig) -> Result<Box<dyn ZoneProvider>> {
        self.registry
            .create_provider(config, IdentityIndex::new(self.store.clone()))
    }

    async fn zone(&self, domain: &str) -> Result<ZoneRow> {
        require_name(domain, "domain name")?;
        self.store
            .get_zone(domain)
            .await?
            .ok_or_else(|| Error::not_found(format!("domain {} is not registered", names::zone_root(domain))))
    }

    /// Explicit configuration, or the one stored with the zone
    async fn config_for(&self, domain: &str, config: Option<&ProviderConfig>) -> Result<ProviderConfig> {
        match config {
            Some(config) => Ok(config.clone()),
            None => Ok(self.zone(domain).await?.config),
        }
    }

    /// Create a zone at the provider and register it locally
    ///
    /// An already registered domain gets its config (and client) updated.
    pub async fn create_domain(
        &self,
        domain: &str,
        client_id: Option<String>,
        config: ProviderConfig,
    ) -> Result<ZoneRow> {
        require_name(domain, "domain name")?;
        let domain = names::zone_root(domain);
        let provider = self.adapter(&config)?;

        let created = provider
            .create_domain(&domain)
            .await
            .map_err(|e| e.context(format!("create_domain {domain}")))?;
        info!(provider = %provider.kind(), "Created zone {}", domain);

        let row = ZoneRow::new(&domain, client_id, config).with_zone_id(created.zone_id);
        self.store
            .upsert_zone(row)
            .await
            .map_err(after_provider_success("create_domain"))
    }

    /// Delete a zone at the provider and locally, with all of its records
    ///
    /// A zone the provider does not know counts as already deleted. Without
    /// an explicit `config` the one stored with the zone is used. Returns the
    /// number of local record rows removed.
    pub async fn delete_domain(&self, domain: &str, config: Option<&ProviderConfig>) -> Result<usize> {
        require_name(domain, "domain name")?;
        let domain = names::zone_root(domain);
        let config = self.config_for(&domain, config).await?;
        let provider = self.adapter(&config)?;

        match provider.delete_domain(&domain).await {
            Ok(()) => info!(provider = %provider.kind(), "Deleted zone {}", domain),
            Err(e) if e.is_not_found() => {
                info!(provider = %provider.kind(), "Zone {} not present at provider, treating as deleted", domain)
            }
            Err(e) => return Err(e.context(format!("delete_domain {domain}"))),
        }

        let removed = self
            .store
            .delete_zone(&domain)
            .await
            .map_err(after_provider_success("delete_domain"))?;
        debug!("Removed {} local records of {}", removed, domain);
        Ok(removed)
    }

    /// Add one value to an RRset
    ///
    /// For providers that replace whole RRsets the sibling values are read
    /// from the local mirror, merged with the new one and submitted together.
    /// Adding a value that is already recorded is a no-op at the provider.
    pub async fn add_record(&self, record: NewRecord) -> Result<RecordRow> {
        let zone = self.zone(&record.domain).await?;
        let domain = zone.domain_name.clone();
        if record.value.trim().is_empty() {
            return Err(Error::missing_field("value"));
        }
        if record.ttl == 0 {
            return Err(Error::missing_field("ttl"));
        }

        let (value, priority) = canonical_value(&record.rtype, &record.value, record.priority)?;
        let subname = names::relative(&record.host, &domain);
        let ctx = format!("add_record {} {} in {}", names::relative_or_at(&subname, &domain), record.rtype, domain);
        let provider = self.adapter(&zone.config)?;

        let siblings = self
            .store
            .list_records(&domain, Some(&subname), Some(&record.rtype))
            .await?;
        let already_recorded = siblings
            .iter()
            .any(|r| merge::canonical(&record.rtype, &r.value) == merge::canonical(&record.rtype, &value));

        if already_recorded {
            debug!("{}: value already recorded, skipping provider call", ctx);
        } else if provider.replaces_whole_rrset(&record.rtype) {
            let existing: Vec<String> = siblings.iter().map(|r| r.value.clone()).collect();
            let merged = merge::merge(&record.rtype, &existing, MergeOp::Add(&value));
            let payload = RrsetPayload::new(subname.clone(), record.rtype.clone(), record.ttl, merged)
                .with_priority(priority);
            let result = if existing.is_empty() {
                provider.create_rrset(&domain, &payload).await
            } else {
                provider
                    .modify_rrset(&domain, &subname, &record.rtype, &payload)
                    .await
            };
            result.map_err(|e| e.context(&ctx))?;
        } else {
            let payload = RrsetPayload::new(subname.clone(), record.rtype.clone(), record.ttl, vec![value.clone()])
                .with_priority(priority);
            provider
                .create_rrset(&domain, &payload)
                .await
                .map_err(|e| e.context(&ctx))?;
        }
        info!(provider = %provider.kind(), "{}: {}", ctx, value);

        let row = RecordRow::new(&domain, &subname, record.rtype, value, record.ttl, priority);
        let row = self
            .store
            .upsert_record(row)
            .await
            .map_err(after_provider_success("add_record"))?;
        self.store
            .touch_zone(&domain)
            .await
            .map_err(after_provider_success("add_record"))?;
        Ok(row)
    }

    /// Change the value, TTL or priority of one recorded value
    pub async fn update_record(
        &self,
        domain: &str,
        local_id: &LocalId,
        changes: RecordChanges,
    ) -> Result<RecordRow> {
        let zone = self.zone(domain).await?;
        let domain = zone.domain_name.clone();
        let current = self
            .store
            .get_record(&domain, local_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("record {local_id} in {domain}")))?;

        let rtype = current.rtype.clone();
        let requested_value = changes.value.as_deref().unwrap_or(&current.value);
        if requested_value.trim().is_empty() {
            return Err(Error::missing_field("value"));
        }
        let priority_hint = changes
            .priority
            .or_else(|| changes.value.as_deref().and_then(merge::leading_priority))
            .or(current.priority);
        let (value, priority) = canonical_value(&rtype, requested_value, priority_hint)?;
        let ttl = changes.ttl.filter(|t| *t > 0).unwrap_or(current.ttl);
        let subname = names::relative(&current.host, &domain);
        let ctx = format!("update_record {} {} in {}", current.host, rtype, domain);
        let provider = self.adapter(&zone.config)?;
        let whole_rrset = provider.replaces_whole_rrset(&rtype);

        let siblings = self
            .store
            .list_records(&domain, Some(&subname), Some(&rtype))
            .await?;
        // Another row already holding the new value absorbs this one
        let key = merge::canonical(&rtype, &value);
        let duplicate = siblings
            .iter()
            .find(|r| r.local_id != current.local_id && merge::canonical(&rtype, &r.value) == key)
            .cloned();

        if whole_rrset {
            let existing: Vec<String> = siblings.iter().map(|r| r.value.clone()).collect();
            let next = merge::merge(
                &rtype,
                &existing,
                MergeOp::Replace {
                    old: &current.value,
                    new: &value,
                },
            );
            let payload = RrsetPayload::new(subname.clone(), rtype.clone(), ttl, next).with_priority(priority);
            provider
                .modify_rrset(&domain, &subname, &rtype, &payload)
                .await
                .map_err(|e| e.context(&ctx))?;
        } else if duplicate.is_some() {
            match provider
                .delete_rrset(&domain, &subname, &rtype, Some(&current.value))
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    warn!("{}: {} already absent at provider", ctx, current.value)
                }
                Err(e) => return Err(e.context(&ctx)),
            }
        } else {
            let payload = RrsetPayload::new(subname.clone(), rtype.clone(), ttl, vec![value.clone()])
                .with_priority(priority)
                .with_old_value(current.value.clone());
            provider
                .modify_rrset(&domain, &subname, &rtype, &payload)
                .await
                .map_err(|e| e.context(&ctx))?;
        }
        info!(provider = %provider.kind(), "{}: {} -> {}", ctx, current.value, value);

        // The RRset shares one TTL at whole-RRset providers
        if whole_rrset {
            for sibling in siblings.iter().filter(|r| r.local_id != current.local_id && r.ttl != ttl) {
                let mut sibling = sibling.clone();
                sibling.ttl = ttl;
                self.store
                    .update_record(sibling)
                    .await
                    .map_err(after_provider_success("update_record"))?;
            }
        }

        let updated = match duplicate {
            Some(mut kept) => {
                debug!("{}: {} merged into record {}", ctx, value, kept.local_id);
                self.store
                    .delete_record(&domain, &current.local_id)
                    .await
                    .map_err(after_provider_success("update_record"))?;
                if whole_rrset {
                    kept.ttl = ttl;
                }
                kept
            }
            None => {
                let mut updated = current;
                updated.value = value;
                updated.ttl = ttl;
                updated.priority = priority;
                self.store
                    .update_record(updated.clone())
                    .await
                    .map_err(after_provider_success("update_record"))?;
                updated
            }
        };
        self.store
            .touch_zone(&domain)
            .await
            .map_err(after_provider_success("update_record"))?;
        Ok(updated)
    }

    /// Remove one recorded value
    ///
    /// Whole-RRset providers get the remaining siblings resubmitted, or the
    /// RRset deleted when none remain. A record unknown locally or already
    /// gone at the provider counts as deleted.
    pub async fn delete_record(&self, domain: &str, local_id: &LocalId) -> Result<()> {
        let zone = self.zone(domain).await?;
        let domain = zone.domain_name.clone();
        let Some(current) = self.store.get_record(&domain, local_id).await? else {
            debug!("Record {} of {} is not recorded, nothing to delete", local_id, domain);
            return Ok(());
        };

        let rtype = current.rtype.clone();
        let subname = names::relative(&current.host, &domain);
        let ctx = format!("delete_record {} {} in {}", current.host, rtype, domain);
        let provider = self.adapter(&zone.config)?;

        let result = if provider.replaces_whole_rrset(&rtype) {
            let siblings = self
                .store
                .list_records(&domain, Some(&subname), Some(&rtype))
                .await?;
            let existing: Vec<String> = siblings.iter().map(|r| r.value.clone()).collect();
            let remaining = merge::merge(&rtype, &existing, MergeOp::Remove(&current.value));
            if remaining.is_empty() {
                provider.delete_rrset(&domain, &subname, &rtype, None).await
            } else {
                let kept = siblings.iter().find(|r| r.local_id != current.local_id);
                let ttl = kept.map_or(current.ttl, |r| r.ttl);
                let priority = kept.and_then(|r| r.priority).or(current.priority);
                let payload = RrsetPayload::new(subname.clone(), rtype.clone(), ttl, remaining)
                    .with_priority(priority);
                provider
                    .modify_rrset(&domain, &subname, &rtype, &payload)
                    .await
            }
        } else {
            provider
                .delete_rrset(&domain, &subname, &rtype, Some(&current.value))
                .await
        };

        match result {
            Ok(()) => info!(provider = %provider.kind(), "{}: {}", ctx, current.value),
            Err(e) if e.is_not_found() => {
                warn!("{}: {} already absent at provider", ctx, current.value)
            }
            Err(e) => return Err(e.context(&ctx)),
        }

        self.store
            .delete_record(&domain, local_id)
            .await
            .map_err(after_provider_success("delete_record"))?;
        self.store
            .touch_zone(&domain)
            .await
            .map_err(after_provider_success("delete_record"))?;
        Ok(())
    }

    /// Records of a zone in insertion order
    pub async fn list_records(&self, domain: &str) -> Result<Vec<RecordRow>> {
        let zone = self.zone(domain).await?;
        self.store.list_records(&zone.domain_name, None, None).await
    }

    /// The registered zone, if any
    pub async fn get_zone(&self, domain: &str) -> Result<Option<ZoneRow>> {
        require_name(domain, "domain name")?;
        self.store.get_zone(domain).await
    }

    /// Zone file as exported by the provider
    pub async fn export_zonefile(&self, domain: &str, config: Option<&ProviderConfig>) -> Result<String> {
        require_name(domain, "domain name")?;
        let config = self.config_for(domain, config).await?;
        self.adapter(&config)?
            .export_zonefile(&names::zone_root(domain))
            .await
            .map_err(|e| e.context(format!("export_zonefile {}", names::zone_root(domain))))
    }

    /// Turn on DNSSEC and return the DS records to publish
    pub async fn enable_dnssec(&self, domain: &str, config: Option<&ProviderConfig>) -> Result<Vec<DsRecord>> {
        require_name(domain, "domain name")?;
        let config = self.config_for(domain, config).await?;
        let provider = self.adapter(&config)?;
        let ds = provider
            .enable_dnssec(&names::zone_root(domain))
            .await
            .map_err(|e| e.context(format!("enable_dnssec {}", names::zone_root(domain))))?;
        info!(provider = %provider.kind(), "Enabled DNSSEC for {} ({} DS records)", names::zone_root(domain), ds.len());
        Ok(ds)
    }

    /// Turn off DNSSEC
    pub async fn disable_dnssec(&self, domain: &str, config: Option<&ProviderConfig>) -> Result<()> {
        require_name(domain, "domain name")?;
        let config = self.config_for(domain, config).await?;
        let provider = self.adapter(&config)?;
        provider
            .disable_dnssec(&names::zone_root(domain))
            .await
            .map_err(|e| e.context(format!("disable_dnssec {}", names::zone_root(domain))))?;
        info!(provider = %provider.kind(), "Disabled DNSSEC for {}", names::zone_root(domain));
        Ok(())
    }

    /// Current DNSSEC state
    pub async fn dnssec_status(&self, domain: &str, config: Option<&ProviderConfig>) -> Result<DnssecStatus> {
        require_name(domain, "domain name")?;
        let config = self.config_for(domain, config).await?;
        self.adapter(&config)?
            .dnssec_status(&names::zone_root(domain))
            .await
            .map_err(|e| e.context(format!("dnssec_status {}", names::zone_root(domain))))
    }

    /// DS records of the zone
    pub async fn ds_records(&self, domain: &str, config: Option<&ProviderConfig>) -> Result<Vec<DsRecord>> {
        require_name(domain, "domain name")?;
        let config = self.config_for(domain, config).await?;
        self.adapter(&config)?
            .ds_records(&names::zone_root(domain))
            .await
            .map_err(|e| e.context(format!("ds_records {}", names::zone_root(domain))))
    }
}

/// Canonical stored value and resolved priority of a record
///
/// MX values are stored as "<priority> <host>"; the priority is taken from
/// the explicit argument or the value's leading token and is required.
/// SRV priority falls back to the value's leading token when not given.
fn canonical_value(rtype: &RecordType, value: &str, priority: Option<u16>) -> Result<(String, Option<u16>)> {
    match rtype {
        RecordType::Mx => {
            let priority = priority
                .or_else(|| merge::leading_priority(value))
                .ok_or_else(|| Error::missing_field("priority for MX record"))?;
            Ok((merge::mx_compose(priority, value), Some(priority)))
        }
        RecordType::Srv => Ok((
            value.trim().to_string(),
            priority.or_else(|| merge::leading_priority(value)),
        )),
        _ => Ok((value.trim().to_string(), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_mx_value() {
        let (v, p) = canonical_value(&RecordType::Mx, "mail.example.com.", Some(20)).unwrap();
        assert_eq!(v, "20 mail.example.com");
        assert_eq!(p, Some(20));

        let (v, p) = canonical_value(&RecordType::Mx, "10 mx.example.net", None).unwrap();
        assert_eq!(v, "10 mx.example.net");
        assert_eq!(p, Some(10));

        assert!(matches!(
            canonical_value(&RecordType::Mx, "mx.example.net", None),
            Err(Error::MissingField(_))
        ));
    }

    #[test]
    fn test_canonical_plain_value_drops_priority() {
        let (v, p) = canonical_value(&RecordType::A, " 192.0.2.1 ", Some(5)).unwrap();
        assert_eq!(v, "192.0.2.1");
        assert_eq!(p, None);
    }
}
