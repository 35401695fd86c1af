// # ClouDNS Provider
//
// ClouDNS authenticates with query parameters (`auth-id` or `sub-auth-id`
// plus `auth-password`) on every call and answers most failures with HTTP
// 200 and a `{"status":"Failed"}` body, which the adapter maps onto the
// shared error taxonomy itself.
//
// ## Record Model
//
// Records are independent objects with numeric ids, kept in the identity
// index once created. Hosts are relative with "" for the apex. TTLs are
// restricted to a fixed list; other values are rounded up to the next
// allowed one.
//
// ## API Reference
//
// - https://www.cloudns.net/wiki/article/41/
// - Zones: `/dns/register.json`, `/dns/delete.json`, `/dns/list-zones.json`,
//   `/dns/get-zone-info.json`, `/dns/records-export.json`
// - Records: `/dns/records.json`, `/dns/add-record.json`,
//   `/dns/mod-record.json`, `/dns/delete-record.json`
// - DNSSEC: `/dns/activate-dnssec.json`, `/dns/deactivate-dnssec.json`,
//   `/dns/get-dnssec-ds-records.json`

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use zonebridge_core::identity::{IdentityEntry, after_provider_success};
use zonebridge_core::merge;
use zonebridge_core::names;
use zonebridge_core::traits::require_name;
use zonebridge_core::transport::{self, ApiRequest, HttpTransport, Transport};
use zonebridge_core::{
    DnssecKey, DnssecStatus, DomainCreated, DomainInfo, DsRecord, Error, IdentityIndex,
    ProviderConfig, ProviderFactory, ProviderKind, RecordType, Result, Rrset, RrsetPayload,
    ZoneProvider,
};

/// ClouDNS API base URL
const CLOUDNS_API_BASE: &str = "https://api.cloudns.net";

/// TTL values ClouDNS accepts
const ALLOWED_TTLS: [u32; 13] = [
    60, 300, 900, 1800, 3600, 21600, 43200, 86400, 172800, 259200, 604800, 1209600, 2592000,
];

const KIND: ProviderKind = ProviderKind::Cloudns;

/// Smallest allowed TTL not below `ttl`
pub fn allowed_ttl(ttl: u32) -> u32 {
    ALLOWED_TTLS
        .iter()
        .copied()
        .find(|t| *t >= ttl)
        .unwrap_or(ALLOWED_TTLS[ALLOWED_TTLS.len() - 1])
}

/// String form of a JSON string or number
fn text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CRecord {
    id: Value,
    #[serde(rename = "type")]
    rtype: String,
    #[serde(default)]
    host: String,
    record: String,
    #[serde(default)]
    ttl: Option<Value>,
    #[serde(default)]
    priority: Option<Value>,
}

impl CRecord {
    fn id(&self) -> String {
        text(&self.id).unwrap_or_default()
    }

    fn ttl(&self) -> u32 {
        self.ttl
            .as_ref()
            .and_then(text)
            .and_then(|t| t.parse().ok())
            .unwrap_or(3600)
    }

    fn priority(&self) -> Option<u16> {
        self.priority.as_ref().and_then(text).and_then(|p| p.parse().ok())
    }

    fn stored(&self, rtype: &RecordType) -> String {
        match (rtype, self.priority()) {
            (RecordType::Mx, Some(p)) => merge::mx_compose(p, &self.record),
            _ => self.record.trim().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CZone {
    name: String,
    #[serde(default)]
    r#type: Option<String>,
}

/// Map a ClouDNS `{"status":"Failed"}` body onto the error taxonomy
fn check(op: &str, body: &Value) -> Result<()> {
    if body.get("status").and_then(Value::as_str) != Some("Failed") {
        return Ok(());
    }
    let description = body
        .get("statusDescription")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let lower = description.to_ascii_lowercase();
    let p = KIND.as_str();

    Err(if lower.contains("already") {
        Error::conflict(format!("{op}: {description}"))
    } else if lower.contains("not found")
        || lower.contains("doesn't exist")
        || lower.contains("does not exist")
        || lower.contains("invalid record-id")
    {
        Error::not_found(format!("{op}: {description}"))
    } else if lower.contains("authentication") || lower.contains("auth-id") {
        Error::provider(
            p,
            format!("{op}: authentication failed: invalid credentials or insufficient permissions"),
        )
    } else {
        Error::provider(p, format!("{op}: {description}"))
    })
}

/// ClouDNS adapter
pub struct CloudnsProvider {
    transport: Arc<dyn Transport>,
    index: IdentityIndex,
}

impl std::fmt::Debug for CloudnsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudnsProvider")
            .field("transport", &self.transport)
            .finish()
    }
}

impl CloudnsProvider {
    /// Create a provider talking to the ClouDNS API
    ///
    /// With `sub_auth` the id is sent as `sub-auth-id` instead of `auth-id`.
    pub fn new(
        auth_id: &str,
        auth_password: &str,
        sub_auth: bool,
        api_url: Option<String>,
        index: IdentityIndex,
    ) -> Result<Self> {
        let base = api_url.unwrap_or_else(|| CLOUDNS_API_BASE.to_string());
        let id_param = if sub_auth { "sub-auth-id" } else { "auth-id" };
        let transport = HttpTransport::new(KIND, base)?
            .with_auth_query(id_param, auth_id)
            .with_auth_query("auth-password", auth_password);
        Ok(Self::with_transport(Arc::new(transport), index))
    }

    /// Create a provider over an existing transport
    pub fn with_transport(transport: Arc<dyn Transport>, index: IdentityIndex) -> Self {
        Self { transport, index }
    }

    /// Perform a call and decode its JSON body, failing on a `Failed` status
    async fn call(&self, op: &str, request: ApiRequest) -> Result<Value> {
        let response = transport::call(self.transport.as_ref(), KIND, op, request).await?;
        let body: Value = response.json(KIND)?;
        check(op, &body)?;
        Ok(body)
    }

    fn zone_request(path: &str, zone: &str) -> ApiRequest {
        ApiRequest::get(path).with_query("domain-name", names::zone_root(zone))
    }

    /// Records of the zone, optionally narrowed to one host and type
    async fn records(&self, zone: &str, filter: Option<(&str, &RecordType)>) -> Result<Vec<CRecord>> {
        let mut request = Self::zone_request("/dns/records.json", zone);
        if let Some((host, rtype)) = filter {
            request = request
                .with_query("host", names::relative(host, zone))
                .with_query("type", rtype.as_str());
        }
        let body = self.call(&format!("list records of {zone}"), request).await?;

        // An empty zone is `[]`, otherwise an object keyed by record id
        let rows: Vec<Value> = match body {
            Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
            Value::Array(items) => items,
            _ => Vec::new(),
        };
        rows.into_iter()
            .map(|v| {
                serde_json::from_value(v).map_err(|e| {
                    Error::provider(KIND.as_str(), format!("Failed to parse record: {e}"))
                })
            })
            .collect()
    }

    async fn scan(&self, zone: &str, subname: &str, rtype: &RecordType) -> Result<Vec<CRecord>> {
        let wanted = names::relative(subname, zone);
        Ok(self
            .records(zone, Some((subname, rtype)))
            .await?
            .into_iter()
            .filter(|r| r.rtype.eq_ignore_ascii_case(rtype.as_str()) && names::relative(&r.host, zone) == wanted)
            .collect())
    }

    async fn locate(&self, zone: &str, subname: &str, rtype: &RecordType, value: &str) -> Result<Option<String>> {
        if let Some(entry) = self.index.get_one(zone, subname, rtype, value).await?
            && let Some(id) = entry.provider_id
        {
            return Ok(Some(id));
        }

        let target = merge::comparable(rtype, value);
        Ok(self
            .scan(zone, subname, rtype)
            .await?
            .into_iter()
            .find(|r| merge::comparable(rtype, &r.stored(rtype)) == target)
            .map(|r| r.id()))
    }

    /// Query parameters describing one record value
    fn record_request(
        path: &str,
        zone: &str,
        rrset: &Rrset,
        value: &str,
    ) -> Result<(ApiRequest, String, Option<u16>)> {
        let (record, priority) = rrset.split_value(value, None)?;
        let mut request = Self::zone_request(path, zone)
            .with_query("host", names::relative(&rrset.subname, zone))
            .with_query("record", record.as_str())
            .with_query("ttl", allowed_ttl(rrset.ttl).to_string());
        if let Some(p) = priority {
            request = request.with_query("priority", p.to_string());
        }
        let stored = match (&rrset.rtype, priority) {
            (RecordType::Mx, Some(p)) => merge::mx_compose(p, &record),
            _ => value.trim().to_string(),
        };
        Ok((request, stored, priority))
    }

    async fn ds_strings(&self, zone: &str) -> Result<(bool, Vec<String>)> {
        let body = self
            .call(
                &format!("get dnssec ds records of {zone}"),
                Self::zone_request("/dns/get-dnssec-ds-records.json", zone),
            )
            .await?;
        let active = body
            .get("status")
            .and_then(Value::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case("active") || s.eq_ignore_ascii_case("success"));
        let ds = body
            .get("ds")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(text).collect())
            .unwrap_or_default();
        Ok((active, ds))
    }
}

#[async_trait]
impl ZoneProvider for CloudnsProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn replaces_whole_rrset(&self, _rtype: &RecordType) -> bool {
        false
    }

    async fn create_domain(&self, name: &str) -> Result<DomainCreated> {
        require_name(name, "domain name")?;
        let zone = names::zone_root(name);
        self.call(
            &format!("create zone {zone}"),
            Self::zone_request("/dns/register.json", &zone).with_query("zone-type", "master"),
        )
        .await?;
        tracing::info!("Created ClouDNS zone {}", zone);
        Ok(DomainCreated::default())
    }

    async fn list_domains(&self) -> Result<Vec<DomainInfo>> {
        let body = self
            .call(
                "list zones",
                ApiRequest::get("/dns/list-zones.json")
                    .with_query("page", "1")
                    .with_query("rows-per-page", "100"),
            )
            .await?;
        let zones: Vec<CZone> = serde_json::from_value(body)?;
        Ok(zones
            .into_iter()
            .map(|z| DomainInfo {
                name: z.name,
                zone_id: None,
                nameservers: Vec::new(),
                dnssec: None,
            })
            .collect())
    }

    async fn get_domain(&self, name: &str) -> Result<DomainInfo> {
        require_name(name, "domain name")?;
        let body = self
            .call(
                &format!("get zone {name}"),
                Self::zone_request("/dns/get-zone-info.json", name),
            )
            .await?;
        let zone: CZone = serde_json::from_value(body)?;
        tracing::debug!("ClouDNS zone {} is {:?}", zone.name, zone.r#type);
        Ok(DomainInfo {
            name: zone.name,
            zone_id: None,
            nameservers: Vec::new(),
            dnssec: None,
        })
    }

    async fn delete_domain(&self, name: &str) -> Result<()> {
        require_name(name, "domain name")?;
        self.call(
            &format!("delete zone {name}"),
            Self::zone_request("/dns/delete.json", name),
        )
        .await?;
        tracing::info!("Deleted ClouDNS zone {}", name);
        Ok(())
    }

    async fn export_zonefile(&self, name: &str) -> Result<String> {
        require_name(name, "domain name")?;
        let body = self
            .call(
                &format!("export zone {name}"),
                Self::zone_request("/dns/records-export.json", name),
            )
            .await?;
        body.get("zone")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::provider(KIND.as_str(), format!("export zone {name}: no zone in response")))
    }

    async fn create_rrset(&self, zone: &str, payload: &RrsetPayload) -> Result<()> {
        let rrset = payload.validate()?;
        for value in &rrset.records {
            let (request, stored, priority) = Self::record_request("/dns/add-record.json", zone, &rrset, value)?;
            let request = request.with_query("record-type", rrset.rtype.as_str());
            let op = format!(
                "create {} {} in {}",
                rrset.rtype,
                names::relative_or_at(&rrset.subname, zone),
                zone
            );

            let id = match self.locate(zone, &rrset.subname, &rrset.rtype, &stored).await? {
                Some(id) => {
                    tracing::debug!("{}: {} already exists ({})", op, stored, id);
                    Some(id)
                }
                None => {
                    let body = self.call(&op, request).await?;
                    let id = body.get("data").and_then(|d| d.get("id")).and_then(text);
                    tracing::info!("{}: {} ({:?})", op, stored, id);
                    id
                }
            };

            self.index
                .put(
                    zone,
                    &rrset.subname,
                    &rrset.rtype,
                    IdentityEntry::new(stored, id, rrset.ttl).with_priority(priority),
                )
                .await
                .map_err(after_provider_success("create_rrset"))?;
        }
        Ok(())
    }

    async fn retrieve_rrset(&self, zone: &str, subname: &str, rtype: &RecordType) -> Result<Rrset> {
        let records = self.scan(zone, subname, rtype).await?;
        let first = records.first().ok_or_else(|| {
            Error::not_found(format!("{} {} in {}", rtype, names::relative_or_at(subname, zone), zone))
        })?;
        Ok(Rrset {
            subname: names::relative(subname, zone),
            rtype: rtype.clone(),
            ttl: first.ttl(),
            priority: first.priority(),
            records: records.iter().map(|r| r.stored(rtype)).collect(),
            old_value: None,
        })
    }

    async fn retrieve_all_rrsets(&self, zone: &str) -> Result<Vec<Rrset>> {
        let mut grouped: BTreeMap<(String, String), Rrset> = BTreeMap::new();
        for r in self.records(zone, None).await? {
            let rtype: RecordType = r.rtype.parse()?;
            let subname = names::relative(&r.host, zone);
            let value = r.stored(&rtype);
            grouped
                .entry((subname.clone(), rtype.to_string()))
                .or_insert_with(|| Rrset {
                    subname,
                    rtype,
                    ttl: r.ttl(),
                    priority: r.priority(),
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
                "cloudns needs the current value of {} {}",
                names::relative_or_at(subname, zone),
                rtype
            ))
        })?;

        let id = self
            .locate(zone, subname, rtype, &old)
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

        let (request, stored, priority) =
            Self::record_request("/dns/mod-record.json", zone, &rrset, &rrset.records[0])?;
        let op = format!("update {} {} in {}", rtype, names::relative_or_at(subname, zone), zone);
        self.call(&op, request.with_query("record-id", id.as_str()))
            .await?;
        tracing::info!("{}: {} -> {}", op, old, stored);

        self.index
            .replace(
                zone,
                subname,
                rtype,
                &old,
                IdentityEntry::new(stored, Some(id), rrset.ttl).with_priority(priority),
            )
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
        let ids: Vec<String> = match value {
            Some(v) => self.locate(zone, subname, rtype, v).await?.into_iter().collect(),
            None => self
                .scan(zone, subname, rtype)
                .await?
                .iter()
                .map(CRecord::id)
                .collect(),
        };

        let op = format!("delete {} {} in {}", rtype, names::relative_or_at(subname, zone), zone);
        if ids.is_empty() {
            tracing::debug!("{}: nothing published", op);
            return Ok(());
        }
        for id in ids {
            match self
                .call(
                    &op,
                    Self::zone_request("/dns/delete-record.json", zone).with_query("record-id", id.as_str()),
                )
                .await
            {
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

    async fn enable_dnssec(&self, zone: &str) -> Result<Vec<DsRecord>> {
        let op = format!("activate dnssec for {zone}");
        self.call(&op, Self::zone_request("/dns/activate-dnssec.json", zone))
            .await?;
        tracing::info!("{}", op);
        self.ds_records(zone).await
    }

    async fn disable_dnssec(&self, zone: &str) -> Result<()> {
        let op = format!("deactivate dnssec for {zone}");
        self.call(&op, Self::zone_request("/dns/deactivate-dnssec.json", zone))
            .await?;
        tracing::info!("{}", op);
        Ok(())
    }

    async fn dnssec_status(&self, zone: &str) -> Result<DnssecStatus> {
        let (active, ds) = self.ds_strings(zone).await?;
        let key = DnssecKey {
            key_tag: ds.first().and_then(|d| DsRecord::parse(d)).map(|d| d.key_tag),
            active,
            ..DnssecKey::default()
        };
        let mut status = DnssecStatus::from_keys(vec![(key, ds)]);
        status.enabled = status.enabled && active;
        Ok(status)
    }
}

/// Factory for creating ClouDNS providers
pub struct CloudnsFactory;

impl ProviderFactory for CloudnsFactory {
    fn create(&self, config: &ProviderConfig, index: IdentityIndex) -> Result<Box<dyn ZoneProvider>> {
        match config {
            ProviderConfig::Cloudns {
                auth_id,
                auth_password,
                sub_auth,
                api_url,
            } => Ok(Box::new(CloudnsProvider::new(
                auth_id,
                auth_password,
                *sub_auth,
                api_url.clone(),
                index,
            )?)),
            _ => Err(Error::config("Invalid config for ClouDNS provider")),
        }
    }
}

/// Register the ClouDNS provider with a registry
pub fn register(registry: &zonebridge_core::ProviderRegistry) {
    registry.register_provider(KIND, Box::new(CloudnsFactory));
}
