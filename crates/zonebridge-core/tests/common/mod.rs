//! Test doubles and common utilities for contract tests
//!
//! - [`MockProvider`]: in-memory provider that keeps RRsets and logs calls
//! - [`FailingStore`]: memory store whose writes can be switched to fail
//! - config helpers and a ready-made [`ZoneService`]

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use zonebridge_core::merge::{self, MergeOp};
use zonebridge_core::names;
use zonebridge_core::{
    DomainCreated, Error, IdentityIndex, LocalId, MemoryStore, ProviderConfig, ProviderFactory,
    ProviderKind, ProviderRegistry, RecordRow, RecordType, Result, RrsetPayload, Store,
    ZoneProvider, ZoneRow, ZoneService,
};

pub const ZONE: &str = "example.com";

type RrsetKey = (String, String, RecordType);

/// Provider-side state shared between the test and the adapters it builds
#[derive(Debug, Default)]
pub struct ProviderState {
    zones: Mutex<Vec<String>>,
    rrsets: Mutex<BTreeMap<(String, String, String), (RecordType, Vec<String>)>>,
    calls: Mutex<Vec<String>>,
    ttls: Mutex<BTreeMap<(String, String, String), u32>>,
    created: AtomicUsize,
}

impl ProviderState {
    /// Values currently published for (zone, subname, type)
    pub fn rrset(&self, zone: &str, subname: &str, rtype: &RecordType) -> Vec<String> {
        let key = key(zone, subname, rtype);
        self.rrsets
            .lock()
            .unwrap()
            .get(&(key.0, key.1, key.2.to_string()))
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    /// TTL last submitted for (zone, subname, type)
    pub fn ttl(&self, zone: &str, subname: &str, rtype: &RecordType) -> Option<u32> {
        let key = key(zone, subname, rtype);
        self.ttls
            .lock()
            .unwrap()
            .get(&(key.0, key.1, key.2.to_string()))
            .copied()
    }

    fn set_ttl(&self, k: &RrsetKey, ttl: u32) {
        self.ttls
            .lock()
            .unwrap()
            .insert((k.0.clone(), k.1.clone(), k.2.to_string()), ttl);
    }

    /// Names of the provider operations invoked so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of adapters built by the factory
    pub fn adapters_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn add_zone(&self, zone: &str) {
        self.zones.lock().unwrap().push(names::zone_root(zone));
    }

    pub fn has_zone(&self, zone: &str) -> bool {
        self.zones.lock().unwrap().contains(&names::zone_root(zone))
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn set(&self, k: RrsetKey, values: Vec<String>) {
        let mut rrsets = self.rrsets.lock().unwrap();
        let map_key = (k.0, k.1, k.2.to_string());
        if values.is_empty() {
            rrsets.remove(&map_key);
        } else {
            rrsets.insert(map_key, (k.2, values));
        }
    }

    fn get(&self, k: &RrsetKey) -> Vec<String> {
        self.rrset(&k.0, &k.1, &k.2)
    }
}

fn key(zone: &str, subname: &str, rtype: &RecordType) -> RrsetKey {
    (
        names::zone_root(zone),
        names::relative(subname, zone),
        rtype.clone(),
    )
}

/// In-memory provider
///
/// With `whole_rrset` it behaves like an RRset-native API (each write
/// replaces the value list); otherwise each value is an independent record
/// and modify/delete locate records by content.
pub struct MockProvider {
    kind: ProviderKind,
    whole_rrset: bool,
    state: Arc<ProviderState>,
}

#[async_trait]
impl ZoneProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn replaces_whole_rrset(&self, _rtype: &RecordType) -> bool {
        self.whole_rrset
    }

    async fn create_domain(&self, name: &str) -> Result<DomainCreated> {
        zonebridge_core::traits::require_name(name, "domain name")?;
        self.state.log(format!("create_domain {name}"));
        if self.state.has_zone(name) {
            return Err(Error::conflict(format!("zone {name} already exists")));
        }
        self.state.add_zone(name);
        Ok(DomainCreated {
            zone_id: Some(format!("zone-{}", names::zone_root(name))),
        })
    }

    async fn delete_domain(&self, name: &str) -> Result<()> {
        self.state.log(format!("delete_domain {name}"));
        let root = names::zone_root(name);
        let mut zones = self.state.zones.lock().unwrap();
        let before = zones.len();
        zones.retain(|z| *z != root);
        if zones.len() == before {
            return Err(Error::not_found(format!("zone {root}")));
        }
        self.state
            .rrsets
            .lock()
            .unwrap()
            .retain(|(z, _, _), _| *z != root);
        Ok(())
    }

    async fn create_rrset(&self, zone: &str, payload: &RrsetPayload) -> Result<()> {
        let rrset = payload.validate()?;
        self.state.log(format!(
            "create_rrset {} {} {:?}",
            names::relative_or_at(&rrset.subname, zone),
            rrset.rtype,
            rrset.records
        ));
        let k = key(zone, &rrset.subname, &rrset.rtype);
        self.state.set_ttl(&k, rrset.ttl);
        let mut values = self.state.get(&k);
        for v in &rrset.records {
            if self.whole_rrset {
                values = merge::merge(&rrset.rtype, &values, MergeOp::Add(v));
            } else {
                values.push(v.clone());
            }
        }
        self.state.set(k, values);
        Ok(())
    }

    async fn modify_rrset(
        &self,
        zone: &str,
        subname: &str,
        rtype: &RecordType,
        payload: &RrsetPayload,
    ) -> Result<()> {
        let rrset = payload.validate()?;
        self.state.log(format!(
            "modify_rrset {} {} {:?}",
            names::relative_or_at(subname, zone),
            rtype,
            rrset.records
        ));
        let k = key(zone, subname, rtype);
        self.state.set_ttl(&k, rrset.ttl);
        if self.whole_rrset {
            self.state.set(k, rrset.records);
            return Ok(());
        }

        let old = rrset
            .old_value
            .ok_or_else(|| Error::missing_old_value(format!("modify {subname} {rtype}")))?;
        let mut values = self.state.get(&k);
        let target = merge::comparable(rtype, &old);
        let pos = values
            .iter()
            .position(|v| merge::comparable(rtype, v) == target)
            .ok_or_else(|| Error::not_found(format!("{subname} {rtype} {old}")))?;
        values[pos] = rrset.records[0].clone();
        self.state.set(k, values);
        Ok(())
    }

    async fn delete_rrset(
        &self,
        zone: &str,
        subname: &str,
        rtype: &RecordType,
        value: Option<&str>,
    ) -> Result<()> {
        self.state.log(format!(
            "delete_rrset {} {} {:?}",
            names::relative_or_at(subname, zone),
            rtype,
            value
        ));
        let k = key(zone, subname, rtype);
        match value {
            None => self.state.set(k, Vec::new()),
            Some(v) => {
                let values = self.state.get(&k);
                let next = merge::merge(rtype, &values, MergeOp::Remove(v));
                self.state.set(k, next);
            }
        }
        Ok(())
    }
}

/// Factory building [`MockProvider`]s over one shared [`ProviderState`]
pub struct MockFactory {
    kind: ProviderKind,
    whole_rrset: bool,
    state: Arc<ProviderState>,
}

impl ProviderFactory for MockFactory {
    fn create(&self, _config: &ProviderConfig, _index: IdentityIndex) -> Result<Box<dyn ZoneProvider>> {
        self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockProvider {
            kind: self.kind,
            whole_rrset: self.whole_rrset,
            state: self.state.clone(),
        }))
    }
}

/// Memory store whose writes fail while `fail_writes` is set
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::persistence("simulated write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FailingStore {
    async fn upsert_zone(&self, zone: ZoneRow) -> Result<ZoneRow> {
        self.check()?;
        self.inner.upsert_zone(zone).await
    }

    async fn get_zone(&self, domain: &str) -> Result<Option<ZoneRow>> {
        self.inner.get_zone(domain).await
    }

    async fn list_zones(&self) -> Result<Vec<ZoneRow>> {
        self.inner.list_zones().await
    }

    async fn set_provider_zone_id(&self, domain: &str, zone_id: &str) -> Result<()> {
        self.check()?;
        self.inner.set_provider_zone_id(domain, zone_id).await
    }

    async fn touch_zone(&self, domain: &str) -> Result<()> {
        self.check()?;
        self.inner.touch_zone(domain).await
    }

    async fn delete_zone(&self, domain: &str) -> Result<usize> {
        self.check()?;
        self.inner.delete_zone(domain).await
    }

    async fn list_records(
        &self,
        domain: &str,
        host: Option<&str>,
        rtype: Option<&RecordType>,
    ) -> Result<Vec<RecordRow>> {
        self.inner.list_records(domain, host, rtype).await
    }

    async fn get_record(&self, domain: &str, local_id: &LocalId) -> Result<Option<RecordRow>> {
        self.inner.get_record(domain, local_id).await
    }

    async fn upsert_record(&self, row: RecordRow) -> Result<RecordRow> {
        self.check()?;
        self.inner.upsert_record(row).await
    }

    async fn update_record(&self, row: RecordRow) -> Result<()> {
        self.check()?;
        self.inner.update_record(row).await
    }

    async fn delete_record(&self, domain: &str, local_id: &LocalId) -> Result<()> {
        self.check()?;
        self.inner.delete_record(domain, local_id).await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}

/// deSEC-shaped config (the mock registered for it replaces whole RRsets)
pub fn whole_rrset_config() -> ProviderConfig {
    ProviderConfig::Desec {
        api_key: "test-token".into(),
        api_url: None,
    }
}

/// Vultr-shaped config (the mock registered for it keeps per-record values)
pub fn per_record_config() -> ProviderConfig {
    ProviderConfig::Vultr {
        api_key: "test-key".into(),
        api_url: None,
    }
}

/// Everything a contract test needs
pub struct Harness {
    pub service: ZoneService,
    pub store: Arc<FailingStore>,
    pub provider: Arc<ProviderState>,
}

/// A service with a whole-RRset mock under `desec` and a per-record mock
/// under `vultr`, both sharing one provider state
pub fn harness() -> Harness {
    let provider = Arc::new(ProviderState::default());
    let registry = ProviderRegistry::new();
    registry.register_provider(
        ProviderKind::Desec,
        Box::new(MockFactory {
            kind: ProviderKind::Desec,
            whole_rrset: true,
            state: provider.clone(),
        }),
    );
    registry.register_provider(
        ProviderKind::Vultr,
        Box::new(MockFactory {
            kind: ProviderKind::Vultr,
            whole_rrset: false,
            state: provider.clone(),
        }),
    );

    let store = Arc::new(FailingStore::new());
    let service = ZoneService::new(Arc::new(registry), store.clone());
    Harness {
        service,
        store,
        provider,
    }
}

/// An A record input
pub fn a_record(host: &str, value: &str) -> zonebridge_core::NewRecord {
    zonebridge_core::NewRecord {
        domain: ZONE.to_string(),
        host: host.to_string(),
        rtype: RecordType::A,
        value: value.to_string(),
        ttl: 3600,
        priority: None,
    }
}
