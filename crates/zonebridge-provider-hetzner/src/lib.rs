// # Hetzner DNS Provider
//
// Hetzner addresses both zones and records by opaque ids. The zone id is
// returned on creation and kept with the zone row; record ids are kept in
// the identity index as records are created. Lookups by name go through
// the API only when the index has nothing.
//
// ## Wire Format
//
// - Record names are relative, "@" for the apex
// - Values are presentation form: MX is "<priority> <host>." in the value
//   field, hostname targets carry a trailing dot
//
// ## API Reference
//
// - https://dns.hetzner.com/api-docs
// - Zones: `/zones`, `/zones/:id`, `/zones/:id/export`
// - Records: `/records?zone_id=`, `/records/:id`, `/records/bulk`

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

use zonebridge_core::identity::{IdentityEntry, after_provider_success};
use zonebridge_core::merge;
use zonebridge_core::names;
use zonebridge_core::traits::require_name;
use zonebridge_core::transport::{self, ApiRequest, ApiResponse, HttpTransport, Transport};
use zonebridge_core::{
    DomainCreated, DomainInfo, Error, IdentityIndex, ProviderConfig, ProviderFactory,
    ProviderKind, RecordType, Result, Rrset, RrsetPayload, ZoneProvider,
};

/// Hetzner DNS API base URL
const HETZNER_API_BASE: &str = "https://dns.hetzner.com/api/v1";

/// Default TTL for new zones
const ZONE_TTL: u32 = 86400;

const KIND: ProviderKind = ProviderKind::Hetzner;

#[derive(Debug, Deserialize)]
struct HZone {
    id: String,
    name: String,
    #[serde(default)]
    ns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ZoneEnvelope {
    zone: HZone,
}

#[derive(Debug, Deserialize)]
struct ZonesEnvelope {
    #[serde(default)]
    zones: Vec<HZone>,
}

#[derive(Debug, Clone, Deserialize)]
struct HRecord {
    id: String,
    #[serde(rename = "type")]
    rtype: String,
    name: String,
    value: String,
    #[serde(default)]
    ttl: Option<u32>,
}

impl HRecord {
    /// Value in the form the rest of the system stores it
    fn stored(&self, rtype: &RecordType) -> String {
        match rtype {
            RecordType::Mx => merge::canonical(rtype, &self.value),
            _ => self.value.trim().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecordEnvelope {
    record: HRecord,
}

#[derive(Debug, Deserialize)]
struct RecordsEnvelope {
    #[serde(default)]
    records: Vec<HRecord>,
}

/// Hetzner DNS adapter
pub struct HetznerProvider {
    transport: Arc<dyn Transport>,
    index: IdentityIndex,
}

impl std::fmt::Debug for HetznerProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HetznerProvider")
            .field("transport", &self.transport)
            .finish()
    }
}

impl HetznerProvider {
    /// Create a provider talking to the Hetzner DNS API
    pub fn new(api_key: &str, api_url: Option<String>, index: IdentityIndex) -> Result<Self> {
        let base = api_url.unwrap_or_else(|| HETZNER_API_BASE.to_string());
        let transport = HttpTransport::new(KIND, base)?.with_header("Auth-API-Token", api_key);
        Ok(Self::with_transport(Arc::new(transport), index))
    }

    /// Create a provider over an existing transport
    pub fn with_transport(transport: Arc<dyn Transport>, index: IdentityIndex) -> Self {
        Self { transport, index }
    }

    async fn call(&self, op: &str, request: ApiRequest) -> Result<ApiResponse> {
        transport::call(self.transport.as_ref(), KIND, op, request).await
    }

    /// Resolve the zone id, from the index or by name lookup
    async fn zone_id(&self, zone: &str) -> Result<String> {
        if let Some(id) = self.index.zone_id(zone).await? {
            return Ok(id);
        }

        let zone = names::zone_root(zone);
        tracing::debug!("Looking up Hetzner zone ID for {}", zone);
        let response = self
            .call(
                &format!("lookup zone {zone}"),
                ApiRequest::get("/zones").with_query("name", &zone),
            )
            .await?;
        let zones: ZonesEnvelope = response.json(KIND)?;
        let found = zones
            .zones
            .into_iter()
            .find(|z| names::zone_root(&z.name) == zone)
            .ok_or_else(|| Error::not_found(format!("zone {zone} at hetzner")))?;

        if let Err(e) = self.index.set_zone_id(&zone, &found.id).await {
            tracing::warn!("Failed to cache Hetzner zone ID for {}: {}", zone, e);
        }
        Ok(found.id)
    }

    async fn records(&self, zone_id: &str) -> Result<Vec<HRecord>> {
        let response = self
            .call(
                "list records",
                ApiRequest::get("/records").with_query("zone_id", zone_id),
            )
            .await?;
        let records: RecordsEnvelope = response.json(KIND)?;
        Ok(records.records)
    }

    /// Records published under `subname` with type `rtype`
    async fn scan(&self, zone_id: &str, zone: &str, subname: &str, rtype: &RecordType) -> Result<Vec<HRecord>> {
        let records = self.records(zone_id).await?;
        for candidate in names::candidates(subname, zone) {
            let matched: Vec<HRecord> = records
                .iter()
                .filter(|r| {
                    r.rtype.eq_ignore_ascii_case(rtype.as_str())
                        && r.name.trim().eq_ignore_ascii_case(&candidate)
                })
                .cloned()
                .collect();
            if !matched.is_empty() {
                return Ok(matched);
            }
        }
        Ok(Vec::new())
    }

    async fn locate(
        &self,
        zone_id: &str,
        zone: &str,
        subname: &str,
        rtype: &RecordType,
        value: &str,
    ) -> Result<Option<String>> {
        if let Some(entry) = self.index.get_one(zone, subname, rtype, value).await?
            && let Some(id) = entry.provider_id
        {
            return Ok(Some(id));
        }

        let target = merge::comparable(rtype, value);
        Ok(self
            .scan(zone_id, zone, subname, rtype)
            .await?
            .into_iter()
            .find(|r| merge::comparable(rtype, &r.stored(rtype)) == target)
            .map(|r| r.id))
    }

    fn record_body(zone_id: &str, zone: &str, rrset: &Rrset, value: &str) -> Result<(Value, String)> {
        let wire = rrset.presentation(value)?;
        let body = json!({
            "zone_id": zone_id,
            "type": rrset.rtype.as_str(),
            "name": names::relative_or_at(&rrset.subname, zone),
            "value": wire,
            "ttl": rrset.ttl,
        });
        let stored = match rrset.rtype {
            RecordType::Mx => merge::canonical(&rrset.rtype, &wire),
            _ => value.trim().to_string(),
        };
        Ok((body, stored))
    }
}

#[async_trait]
impl ZoneProvider for HetznerProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn replaces_whole_rrset(&self, _rtype: &RecordType) -> bool {
        false
    }

    async fn create_domain(&self, name: &str) -> Result<DomainCreated> {
        require_name(name, "domain name")?;
        let zone = names::zone_root(name);
        let response = self
            .call(
                &format!("create zone {zone}"),
                ApiRequest::post("/zones", json!({ "name": zone, "ttl": ZONE_TTL })),
            )
            .await?;
        let created: ZoneEnvelope = response.json(KIND)?;
        tracing::info!("Created Hetzner zone {} ({})", zone, created.zone.id);
        Ok(DomainCreated {
            zone_id: Some(created.zone.id),
        })
    }

    async fn list_domains(&self) -> Result<Vec<DomainInfo>> {
        let response = self.call("list zones", ApiRequest::get("/zones")).await?;
        let zones: ZonesEnvelope = response.json(KIND)?;
        Ok(zones
            .zones
            .into_iter()
            .map(|z| DomainInfo {
                name: z.name,
                zone_id: Some(z.id),
                nameservers: z.ns,
                dnssec: None,
            })
            .collect())
    }

    async fn get_domain(&self, name: &str) -> Result<DomainInfo> {
        require_name(name, "domain name")?;
        let zone_id = self.zone_id(name).await?;
        let response = self
            .call(
                &format!("get zone {name}"),
                ApiRequest::get(format!("/zones/{zone_id}")),
            )
            .await?;
        let zone: ZoneEnvelope = response.json(KIND)?;
        Ok(DomainInfo {
            name: zone.zone.name,
            zone_id: Some(zone.zone.id),
            nameservers: zone.zone.ns,
            dnssec: None,
        })
    }

    async fn delete_domain(&self, name: &str) -> Result<()> {
        require_name(name, "domain name")?;
        let zone_id = self.zone_id(name).await?;
        self.call(
            &format!("delete zone {name}"),
            ApiRequest::delete(format!("/zones/{zone_id}")),
        )
        .await?;
        tracing::info!("Deleted Hetzner zone {}", name);
        Ok(())
    }

    async fn export_zonefile(&self, name: &str) -> Result<String> {
        require_name(name, "domain name")?;
        let zone_id = self.zone_id(name).await?;
        let response = self
            .call(
                &format!("export zone {name}"),
                ApiRequest::get(format!("/zones/{zone_id}/export")),
            )
            .await?;
        Ok(response.body)
    }

    async fn create_rrset(&self, zone: &str, payload: &RrsetPayload) -> Result<()> {
        let rrset = payload.validate()?;
        let zone_id = self.zone_id(zone).await?;

        for value in &rrset.records {
            let (body, stored) = Self::record_body(&zone_id, zone, &rrset, value)?;
            let op = format!(
                "create {} {} in {}",
                rrset.rtype,
                names::relative_or_at(&rrset.subname, zone),
                zone
            );

            let id = match self
                .locate(&zone_id, zone, &rrset.subname, &rrset.rtype, &stored)
                .await?
            {
                Some(id) => {
                    tracing::debug!("{}: {} already exists ({})", op, stored, id);
                    id
                }
                None => {
                    let response = self.call(&op, ApiRequest::post("/records", body)).await?;
                    let created: RecordEnvelope = response.json(KIND)?;
                    tracing::info!("{}: {} ({})", op, stored, created.record.id);
                    created.record.id
                }
            };

            self.index
                .put(
                    zone,
                    &rrset.subname,
                    &rrset.rtype,
                    IdentityEntry::new(stored, Some(id), rrset.ttl).with_priority(
                        rrset.split_value(value, None).ok().and_then(|(_, p)| p),
                    ),
                )
                .await
                .map_err(after_provider_success("create_rrset"))?;
        }
        Ok(())
    }

    async fn create_bulk_rrsets(&self, zone: &str, payloads: &[RrsetPayload]) -> Result<()> {
        let zone_id = self.zone_id(zone).await?;
        let mut bodies = Vec::new();
        let mut stored = Vec::new();
        for payload in payloads {
            let rrset = payload.validate()?;
            for value in &rrset.records {
                let (body, s) = Self::record_body(&zone_id, zone, &rrset, value)?;
                bodies.push(body);
                stored.push((rrset.clone(), s));
            }
        }

        let op = format!("bulk create {} records in {}", bodies.len(), zone);
        let response = self
            .call(&op, ApiRequest::post("/records/bulk", json!({ "records": bodies })))
            .await?;
        let created: RecordsEnvelope = response.json(KIND)?;
        tracing::info!("{}", op);

        for (rrset, value) in stored {
            let id = created
                .records
                .iter()
                .find(|r| {
                    r.rtype.eq_ignore_ascii_case(rrset.rtype.as_str())
                        && names::matches(&r.name, &rrset.subname, zone)
                        && merge::comparable(&rrset.rtype, &r.stored(&rrset.rtype))
                            == merge::comparable(&rrset.rtype, &value)
                })
                .map(|r| r.id.clone());
            self.index
                .put(zone, &rrset.subname, &rrset.rtype, IdentityEntry::new(value, id, rrset.ttl))
                .await
                .map_err(after_provider_success("create_bulk_rrsets"))?;
        }
        Ok(())
    }

    async fn retrieve_rrset(&self, zone: &str, subname: &str, rtype: &RecordType) -> Result<Rrset> {
        let zone_id = self.zone_id(zone).await?;
        let records = self.scan(&zone_id, zone, subname, rtype).await?;
        let first = records.first().ok_or_else(|| {
            Error::not_found(format!("{} {} in {}", rtype, names::relative_or_at(subname, zone), zone))
        })?;
        Ok(Rrset {
            subname: names::relative(subname, zone),
            rtype: rtype.clone(),
            ttl: first.ttl.unwrap_or(ZONE_TTL),
            priority: None,
            records: records.iter().map(|r| r.stored(rtype)).collect(),
            old_value: None,
        })
    }

    async fn retrieve_all_rrsets(&self, zone: &str) -> Result<Vec<Rrset>> {
        let zone_id = self.zone_id(zone).await?;
        let mut grouped: BTreeMap<(String, String), Rrset> = BTreeMap::new();
        for r in self.records(&zone_id).await? {
            let rtype: RecordType = r.rtype.parse()?;
            let subname = names::relative(&r.name, zone);
            let value = r.stored(&rtype);
            grouped
                .entry((subname.clone(), rtype.to_string()))
                .or_insert_with(|| Rrset {
                    subname,
                    rtype,
                    ttl: r.ttl.unwrap_or(ZONE_TTL),
                    priority: None,
                    records: Vec::new(),
                    old_value: None,
                })
                .records
                .push(value);
        }
        Ok(grouped.into_values().collect())
    }

    async fn modify_rrset(
        &self,
        zone: &str,
        subname: &str,
        rtype: &RecordType,
        payload: &RrsetPayload,
    ) -> Result<()> {
        let mut rrset = payload.validate()?;
        rrset.subname = names::relative(subname, zone);
        rrset.rtype = rtype.clone();
        let old = rrset.old_value.clone().ok_or_else(|| {
            Error::missing_old_value(format!(
                "hetzner needs the current value of {} {}",
                names::relative_or_at(subname, zone),
                rtype
            ))
        })?;
        let zone_id = self.zone_id(zone).await?;

        let id = self
            .locate(&zone_id, zone, subname, rtype, &old)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!(
                    "{} {} with value {} in {}",
                    rtype,
                    names::relative_or_at(subname, zone),
                    old,
                    zone
                ))
            })?;

        let (body, stored) = Self::record_body(&zone_id, zone, &rrset, &rrset.records[0])?;
        let op = format!("update {} {} in {}", rtype, names::relative_or_at(subname, zone), zone);
        self.call(&op, ApiRequest::put(format!("/records/{id}"), body))
            .await?;
        tracing::info!("{}: {} -> {}", op, old, stored);

        self.index
            .replace(zone, subname, rtype, &old, IdentityEntry::new(stored, Some(id), rrset.ttl))
            .await
            .map_err(after_provider_success("modify_rrset"))
    }

    async fn delete_rrset(
        &self,
        zone: &str,
        subname: &str,
        rtype: &RecordType,
        value: Option<&str>,
    ) -> Result<()> {
        let zone_id = self.zone_id(zone).await?;
        let ids: Vec<String> = match value {
            Some(v) => self
                .locate(&zone_id, zone, subname, rtype, v)
                .await?
                .into_iter()
                .collect(),
            None => self
                .scan(&zone_id, zone, subname, rtype)
                .await?
                .into_iter()
                .map(|r| r.id)
                .collect(),
        };

        let op = format!("delete {} {} in {}", rtype, names::relative_or_at(subname, zone), zone);
        if ids.is_empty() {
            tracing::debug!("{}: nothing published", op);
            return Ok(());
        }
        for id in ids {
            match self.call(&op, ApiRequest::delete(format!("/records/{id}"))).await {
                Ok(_) => tracing::info!("{} ({})", op, id),
                Err(e) if e.is_not_found() => tracing::debug!("{}: {} already gone", op, id),
                Err(e) => return Err(e),
            }
            self.index
                .delete(zone, subname, rtype, &id)
                .await
                .map_err(after_provider_success("delete_rrset"))?;
        }
        Ok(())
    }
}

/// Factory for creating Hetzner providers
pub struct HetznerFactory;

impl ProviderFactory for HetznerFactory {
    fn create(&self, config: &ProviderConfig, index: IdentityIndex) -> Result<Box<dyn ZoneProvider>> {
        match config {
            ProviderConfig::Hetzner { api_key, api_url } => {
                Ok(Box::new(HetznerProvider::new(api_key, api_url.clone(), index)?))
            }
            _ => Err(Error::config("Invalid config for Hetzner provider")),
        }
    }
}

/// Register the Hetzner provider with a registry
pub fn register(registry: &zonebridge_core::ProviderRegistry) {
    registry.register_provider(KIND, Box::new(HetznerFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonebridge_core::transport::Method;
    use zonebridge_core::transport::testing::MockTransport;
    use zonebridge_core::{MemoryStore, Store, ZoneRow};

    async fn provider() -> (HetznerProvider, MockTransport, Arc<MemoryStore>) {
        let mock = MockTransport::new();
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_zone(
                ZoneRow::new(
                    "example.com",
                    None,
                    ProviderConfig::Hetzner {
                        api_key: "k".into(),
                        api_url: None,
                    },
                )
                .with_zone_id(Some("zone-1".into())),
            )
            .await
            .unwrap();
        let provider = HetznerProvider::with_transport(Arc::new(mock.clone()), IdentityIndex::new(store.clone()));
        (provider, mock, store)
    }

    #[tokio::test]
    async fn test_create_domain_returns_zone_id() {
        let (provider, mock, _) = provider().await;
        mock.on_json(
            Method::Post,
            "/zones",
            200,
            json!({ "zone": { "id": "zone-2", "name": "example.org", "ns": ["hydrogen.ns.hetzner.com."] } }),
        );
        let created = provider.create_domain("example.org").await.unwrap();
        assert_eq!(created.zone_id.as_deref(), Some("zone-2"));
    }

    #[tokio::test]
    async fn test_create_uses_stored_zone_id_and_indexes_record() {
        let (provider, mock, store) = provider().await;
        mock.on_json(Method::Get, "/records", 200, json!({ "records": [] }));
        mock.on_json(
            Method::Post,
            "/records",
            200,
            json!({ "record": { "id": "rec-1", "type": "MX", "name": "@", "value": "10 mail.example.com.", "zone_id": "zone-1" } }),
        );

        let payload = RrsetPayload::new("", RecordType::Mx, 3600, vec!["10 mail.example.com".into()]);
        provider.create_rrset("example.com", &payload).await.unwrap();

        assert!(mock.requests_to(Method::Get, "/zones").is_empty());
        let post = mock.requests_to(Method::Post, "/records")[0].clone();
        let body = post.body.as_ref().unwrap();
        assert_eq!(body["zone_id"], "zone-1");
        assert_eq!(body["name"], "@");
        assert_eq!(body["value"], "10 mail.example.com.");

        let rows = store.list_records("example.com", Some("@"), Some(&RecordType::Mx)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, "10 mail.example.com");
        assert_eq!(rows[0].provider_record_id.as_deref(), Some("rec-1"));
        assert_eq!(rows[0].priority, Some(10));
    }

    #[tokio::test]
    async fn test_create_existing_record_is_not_duplicated() {
        let (provider, mock, store) = provider().await;
        mock.on_json(
            Method::Get,
            "/records",
            200,
            json!({ "records": [{ "id": "rec-7", "type": "A", "name": "www", "value": "203.0.113.10", "ttl": 300 }] }),
        );

        let payload = RrsetPayload::new("www", RecordType::A, 300, vec!["203.0.113.10".into()]);
        provider.create_rrset("example.com", &payload).await.unwrap();

        assert_eq!(mock.count(Method::Post), 0);
        let rows = store.list_records("example.com", Some("www"), None).await.unwrap();
        assert_eq!(rows[0].provider_record_id.as_deref(), Some("rec-7"));
    }

    #[tokio::test]
    async fn test_modify_by_indexed_id() {
        let (provider, mock, store) = provider().await;
        provider
            .index
            .put("example.com", "www", &RecordType::A, IdentityEntry::new("203.0.113.10", Some("rec-1".into()), 300))
            .await
            .unwrap();
        mock.on_json(Method::Put, "/records/rec-1", 200, json!({ "record": {} }));

        let payload = RrsetPayload::new("www", RecordType::A, 600, vec!["203.0.113.20".into()])
            .with_old_value("203.0.113.10");
        provider
            .modify_rrset("example.com", "www", &RecordType::A, &payload)
            .await
            .unwrap();

        assert_eq!(mock.count(Method::Get), 0);
        let rows = store.list_records("example.com", Some("www"), None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, "203.0.113.20");
        assert_eq!(rows[0].ttl, 600);
        assert_eq!(rows[0].provider_record_id.as_deref(), Some("rec-1"));
    }

    #[tokio::test]
    async fn test_delete_all_values_of_rrset() {
        let (provider, mock, _) = provider().await;
        mock.on_json(
            Method::Get,
            "/records",
            200,
            json!({ "records": [
                { "id": "r1", "type": "A", "name": "www", "value": "203.0.113.10" },
                { "id": "r2", "type": "A", "name": "www", "value": "203.0.113.11" },
                { "id": "r3", "type": "AAAA", "name": "www", "value": "2001:db8::1" }
            ] }),
        );
        mock.on(Method::Delete, "/records/r1", 200, "");
        mock.on(Method::Delete, "/records/r2", 404, "");

        provider
            .delete_rrset("example.com", "www", &RecordType::A, None)
            .await
            .unwrap();
        assert_eq!(mock.count(Method::Delete), 2);
    }

    #[tokio::test]
    async fn test_bulk_create_indexes_each_record() {
        let (provider, mock, store) = provider().await;
        mock.on_json(
            Method::Post,
            "/records/bulk",
            200,
            json!({ "records": [
                { "id": "b1", "type": "A", "name": "www", "value": "203.0.113.10" },
                { "id": "b2", "type": "TXT", "name": "@", "value": "\"hello\"" }
            ] }),
        );

        provider
            .create_bulk_rrsets(
                "example.com",
                &[
                    RrsetPayload::new("www", RecordType::A, 300, vec!["203.0.113.10".into()]),
                    RrsetPayload::new("@", RecordType::Txt, 300, vec!["hello".into()]),
                ],
            )
            .await
            .unwrap();

        let rows = store.list_records("example.com", None, None).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].provider_record_id.as_deref(), Some("b1"));
        assert_eq!(rows[1].provider_record_id.as_deref(), Some("b2"));
    }

    #[tokio::test]
    async fn test_dnssec_is_unsupported() {
        let (provider, _, _) = provider().await;
        assert!(provider.enable_dnssec("example.com").await.unwrap_err().is_unsupported());
        assert!(provider.disable_dnssec("example.com").await.unwrap_err().is_unsupported());
    }
}
