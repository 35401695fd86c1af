// # Cloudflare Provider
//
// This crate provides the Cloudflare adapter for zonebridge.
//
// ## Record Model
//
// Cloudflare has no RRset primitive: every value is an independent DNS
// record with an opaque id. The adapter:
// - creates one record per value and keeps its id in the identity index
// - locates records for modify/delete by id when the index knows it, and
//   otherwise by scanning the zone for a matching name and content
// - echoes names fully qualified without trailing dot, so the scan tries
//   every candidate name form
//
// ## Security Requirements
//
// - API token NEVER appears in logs or `Debug` output
// - Provider fails fast (at selection) if the token is empty
//
// ## API Reference
//
// - Cloudflare API v4: https://developers.cloudflare.com/api/
// - Zones: `/zones`, `/zones/:zone_id`
// - Records: `/zones/:zone_id/dns_records[/:record_id]`
// - Zone file: GET `/zones/:zone_id/dns_records/export`
// - DNSSEC: GET/PATCH `/zones/:zone_id/dnssec`

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
    DnssecKey, DnssecStatus, DomainCreated, DomainInfo, DsRecord, Error, IdentityIndex,
    ProviderConfig, ProviderFactory, ProviderKind, RecordType, Result, Rrset, RrsetPayload,
    ZoneProvider, record::dedup_ds,
};

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Largest page Cloudflare accepts for record listings
const PAGE_SIZE: &str = "5000";

const KIND: ProviderKind = ProviderKind::Cloudflare;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct CfZone {
    id: String,
    name: String,
    #[serde(default)]
    name_servers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CfRecord {
    id: String,
    name: String,
    #[serde(rename = "type")]
    rtype: String,
    content: String,
    #[serde(default)]
    ttl: Option<u32>,
    #[serde(default)]
    priority: Option<u16>,
}

impl CfRecord {
    /// Value in the form the rest of the system stores it
    fn value(&self, rtype: &RecordType) -> String {
        match (rtype, self.priority) {
            (RecordType::Mx, Some(p)) => merge::mx_compose(p, &self.content),
            _ => self.content.trim().to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CfDnssec {
    #[serde(default)]
    status: String,
    #[serde(default)]
    ds: Option<String>,
    #[serde(default)]
    algorithm: Option<String>,
    #[serde(default)]
    key_tag: Option<u16>,
    #[serde(default)]
    flags: Option<u16>,
    #[serde(default)]
    public_key: Option<String>,
}

/// Cloudflare adapter
pub struct CloudflareProvider {
    transport: Arc<dyn Transport>,
    /// Account new zones are created in
    account_id: Option<String>,
    index: IdentityIndex,
}

// The token lives inside the transport, whose Debug output redacts it
impl std::fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field("transport", &self.transport)
            .field("account_id", &self.account_id)
            .finish()
    }
}

impl CloudflareProvider {
    /// Create a provider talking to the Cloudflare API
    ///
    /// `api_url` overrides the API base (for testing against a local
    /// endpoint).
    pub fn new(
        api_token: &str,
        account_id: Option<String>,
        api_url: Option<String>,
        index: IdentityIndex,
    ) -> Result<Self> {
        let base = api_url.unwrap_or_else(|| CLOUDFLARE_API_BASE.to_string());
        let transport = HttpTransport::new(KIND, base)?.with_bearer(api_token);
        Ok(Self::with_transport(Arc::new(transport), account_id, index))
    }

    /// Create a provider over an existing transport
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        account_id: Option<String>,
        index: IdentityIndex,
    ) -> Self {
        Self {
            transport,
            account_id,
            index,
        }
    }

    async fn call(&self, op: &str, request: ApiRequest) -> Result<ApiResponse> {
        transport::call(self.transport.as_ref(), KIND, op, request).await
    }

    /// Resolve the zone id, from the index or by name lookup
    ///
    /// ```http
    /// GET /zones?name=example.com
    /// ```
    async fn zone_id(&self, zone: &str) -> Result<String> {
        if let Some(id) = self.index.zone_id(zone).await? {
            return Ok(id);
        }

        let zone = names::zone_root(zone);
        tracing::debug!("Looking up Cloudflare zone ID for {}", zone);
        let response = self
            .call(
                &format!("lookup zone {zone}"),
                ApiRequest::get("/zones").with_query("name", &zone),
            )
            .await?;
        let zones: Envelope<Vec<CfZone>> = response.json(KIND)?;
        let found = zones
            .result
            .into_iter()
            .find(|z| names::zone_root(&z.name) == zone)
            .ok_or_else(|| Error::not_found(format!("zone {zone} at cloudflare")))?;

        if let Err(e) = self.index.set_zone_id(&zone, &found.id).await {
            tracing::warn!("Failed to cache Cloudflare zone ID for {}: {}", zone, e);
        }
        Ok(found.id)
    }

    /// Records of one type in the zone
    async fn list_of_type(&self, zone_id: &str, rtype: &RecordType) -> Result<Vec<CfRecord>> {
        let response = self
            .call(
                &format!("list {rtype} records"),
                ApiRequest::get(format!("/zones/{zone_id}/dns_records"))
                    .with_query("type", rtype.as_str())
                    .with_query("per_page", PAGE_SIZE),
            )
            .await?;
        let records: Envelope<Vec<CfRecord>> = response.json(KIND)?;
        Ok(records.result)
    }

    /// Records published under `subname`, trying each candidate name form
    /// in order and stopping at the first that matches anything
    async fn scan(
        &self,
        zone_id: &str,
        zone: &str,
        subname: &str,
        rtype: &RecordType,
    ) -> Result<Vec<CfRecord>> {
        let records = self.list_of_type(zone_id, rtype).await?;
        for candidate in names::candidates(subname, zone) {
            let matched: Vec<CfRecord> = records
                .iter()
                .filter(|r| r.name.trim().eq_ignore_ascii_case(&candidate))
                .cloned()
                .collect();
            if !matched.is_empty() {
                return Ok(matched);
            }
        }
        Ok(Vec::new())
    }

    /// Record id of one value: identity index first, then a content scan
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
            .find(|r| merge::comparable(rtype, &r.value(rtype)) == target)
            .map(|r| r.id))
    }

    fn record_body(zone: &str, rrset: &Rrset, value: &str) -> Result<(Value, String, Option<u16>)> {
        let (content, priority) = rrset.split_value(value, None)?;
        let mut body = json!({
            "type": rrset.rtype.as_str(),
            "name": names::absolute(&rrset.subname, zone),
            "content": content,
            "ttl": rrset.ttl,
        });
        if let Some(p) = priority {
            body["priority"] = json!(p);
        }
        let stored = match (&rrset.rtype, priority) {
            (RecordType::Mx, Some(p)) => merge::mx_compose(p, &content),
            _ => content,
        };
        Ok((body, stored, priority))
    }

    async fn dnssec(&self, zone: &str) -> Result<CfDnssec> {
        let zone_id = self.zone_id(zone).await?;
        let response = self
            .call(
                &format!("get dnssec of {zone}"),
                ApiRequest::get(format!("/zones/{zone_id}/dnssec")),
            )
            .await?;
        let dnssec: Envelope<CfDnssec> = response.json(KIND)?;
        Ok(dnssec.result)
    }
}

fn ds_of(dnssec: &CfDnssec) -> Vec<DsRecord> {
    dedup_ds(dnssec.ds.as_deref().and_then(DsRecord::parse))
}

#[async_trait]
impl ZoneProvider for CloudflareProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn replaces_whole_rrset(&self, _rtype: &RecordType) -> bool {
        false
    }

    async fn create_domain(&self, name: &str) -> Result<DomainCreated> {
        require_name(name, "domain name")?;
        let zone = names::zone_root(name);

        let mut body = json!({ "name": zone, "jump_start": false });
        if let Some(account) = &self.account_id {
            body["account"] = json!({ "id": account });
        }
        let response = self
            .call(&format!("create zone {zone}"), ApiRequest::post("/zones", body))
            .await?;
        let created: Envelope<CfZone> = response.json(KIND)?;
        tracing::info!("Created Cloudflare zone {} ({})", zone, created.result.id);

        Ok(DomainCreated {
            zone_id: Some(created.result.id),
        })
    }

    async fn list_domains(&self) -> Result<Vec<DomainInfo>> {
        let response = self
            .call(
                "list zones",
                ApiRequest::get("/zones").with_query("per_page", "50"),
            )
            .await?;
        let zones: Envelope<Vec<CfZone>> = response.json(KIND)?;
        Ok(zones
            .result
            .into_iter()
            .map(|z| DomainInfo {
                name: z.name,
                zone_id: Some(z.id),
                nameservers: z.name_servers,
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
        let zone: Envelope<CfZone> = response.json(KIND)?;
        Ok(DomainInfo {
            name: zone.result.name,
            zone_id: Some(zone.result.id),
            nameservers: zone.result.name_servers,
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
        tracing::info!("Deleted Cloudflare zone {}", name);
        Ok(())
    }

    async fn export_zonefile(&self, name: &str) -> Result<String> {
        require_name(name, "domain name")?;
        let zone_id = self.zone_id(name).await?;
        let response = self
            .call(
                &format!("export zone {name}"),
                ApiRequest::get(format!("/zones/{zone_id}/dns_records/export")),
            )
            .await?;
        Ok(response.body)
    }

    async fn create_rrset(&self, zone: &str, payload: &RrsetPayload) -> Result<()> {
        let rrset = payload.validate()?;
        let zone_id = self.zone_id(zone).await?;

        for value in &rrset.records {
            let (body, stored, priority) = Self::record_body(zone, &rrset, value)?;
            let op = format!(
                "create {} {} in {}",
                rrset.rtype,
                names::relative_or_at(&rrset.subname, zone),
                zone
            );

            let id = match self
                .call(
                    &op,
                    ApiRequest::post(format!("/zones/{zone_id}/dns_records"), body),
                )
                .await
            {
                Ok(response) => {
                    let created: Envelope<CfRecord> = response.json(KIND)?;
                    tracing::info!("{}: {} ({})", op, stored, created.result.id);
                    created.result.id
                }
                // Already published: adopt the existing record
                Err(Error::Conflict(msg)) => {
                    match self
                        .locate(&zone_id, zone, &rrset.subname, &rrset.rtype, &stored)
                        .await?
                    {
                        Some(id) => {
                            tracing::debug!("{}: {} already exists ({})", op, stored, id);
                            id
                        }
                        None => return Err(Error::Conflict(msg)),
                    }
                }
                Err(e) => return Err(e),
            };

            self.index
                .put(
                    zone,
                    &rrset.subname,
                    &rrset.rtype,
                    IdentityEntry::new(stored, Some(id), rrset.ttl).with_priority(priority),
                )
                .await
                .map_err(after_provider_success("create_rrset"))?;
        }
        Ok(())
    }

    async fn retrieve_rrset(&self, zone: &str, subname: &str, rtype: &RecordType) -> Result<Rrset> {
        let zone_id = self.zone_id(zone).await?;
        let records = self.scan(&zone_id, zone, subname, rtype).await?;
        let first = records.first().ok_or_else(|| {
            Error::not_found(format!(
                "{} {} in {}",
                rtype,
                names::relative_or_at(subname, zone),
                zone
            ))
        })?;
        Ok(Rrset {
            subname: names::relative(subname, zone),
            rtype: rtype.clone(),
            ttl: first.ttl.unwrap_or(1),
            priority: first.priority,
            records: records.iter().map(|r| r.value(rtype)).collect(),
            old_value: None,
        })
    }

    async fn retrieve_all_rrsets(&self, zone: &str) -> Result<Vec<Rrset>> {
        let zone_id = self.zone_id(zone).await?;
        let response = self
            .call(
                &format!("list records of {zone}"),
                ApiRequest::get(format!("/zones/{zone_id}/dns_records")).with_query("per_page", PAGE_SIZE),
            )
            .await?;
        let records: Envelope<Vec<CfRecord>> = response.json(KIND)?;

        let mut grouped: BTreeMap<(String, String), Rrset> = BTreeMap::new();
        for r in records.result {
            let rtype: RecordType = r.rtype.parse()?;
            let subname = names::relative(&r.name, zone);
            let value = r.value(&rtype);
            grouped
                .entry((subname.clone(), rtype.to_string()))
                .or_insert_with(|| Rrset {
                    subname,
                    rtype,
                    ttl: r.ttl.unwrap_or(1),
                    priority: r.priority,
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
                "cloudflare locates {} {} records by content",
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

        let (body, stored, priority) = Self::record_body(zone, &rrset, &rrset.records[0])?;
        let op = format!("update {} {} in {}", rtype, names::relative_or_at(subname, zone), zone);
        self.call(
            &op,
            ApiRequest::put(format!("/zones/{zone_id}/dns_records/{id}"), body),
        )
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
        let zone_id = self.zone_id(zone).await?;

        let ids: Vec<(String, String)> = match value {
            Some(v) => match self.locate(&zone_id, zone, subname, rtype, v).await? {
                Some(id) => vec![(id, v.to_string())],
                None => Vec::new(),
            },
            None => self
                .scan(&zone_id, zone, subname, rtype)
                .await?
                .into_iter()
                .map(|r| {
                    let v = r.value(rtype);
                    (r.id, v)
                })
                .collect(),
        };
        if ids.is_empty() {
            tracing::debug!(
                "No {} {} record to delete in {}",
                rtype,
                names::relative_or_at(subname, zone),
                zone
            );
            return Ok(());
        }

        for (id, v) in ids {
            let op = format!("delete {} {} in {}", rtype, names::relative_or_at(subname, zone), zone);
            match self
                .call(&op, ApiRequest::delete(format!("/zones/{zone_id}/dns_records/{id}")))
                .await
            {
                Ok(_) => tracing::info!("{}: {}", op, v),
                Err(e) if e.is_not_found() => tracing::debug!("{}: {} already gone", op, v),
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
        let zone_id = self.zone_id(zone).await?;
        let response = self
            .call(
                &format!("enable dnssec for {zone}"),
                ApiRequest::patch(format!("/zones/{zone_id}/dnssec"), json!({ "status": "active" })),
            )
            .await?;
        let dnssec: Envelope<CfDnssec> = response.json(KIND)?;
        tracing::info!("Cloudflare DNSSEC for {} is {}", zone, dnssec.result.status);
        Ok(ds_of(&dnssec.result))
    }

    async fn disable_dnssec(&self, zone: &str) -> Result<()> {
        let zone_id = self.zone_id(zone).await?;
        self.call(
            &format!("disable dnssec for {zone}"),
            ApiRequest::patch(format!("/zones/{zone_id}/dnssec"), json!({ "status": "disabled" })),
        )
        .await?;
        tracing::info!("Disabled Cloudflare DNSSEC for {}", zone);
        Ok(())
    }

    async fn dnssec_status(&self, zone: &str) -> Result<DnssecStatus> {
        let dnssec = self.dnssec(zone).await?;
        let key = DnssecKey {
            key_tag: dnssec.key_tag,
            algorithm: dnssec.algorithm.clone(),
            flags: dnssec.flags,
            public_key: dnssec.public_key.clone(),
            active: dnssec.status == "active",
        };
        let ds: Vec<String> = dnssec.ds.clone().into_iter().collect();
        let mut status = DnssecStatus::from_keys(vec![(key, ds)]);
        status.enabled = status.enabled || dnssec.status == "active";
        Ok(status)
    }
}

/// Factory for creating Cloudflare providers
pub struct CloudflareFactory;

impl ProviderFactory for CloudflareFactory {
    fn create(&self, config: &ProviderConfig, index: IdentityIndex) -> Result<Box<dyn ZoneProvider>> {
        match config {
            ProviderConfig::Cloudflare {
                api_token,
                account_id,
                api_url,
            } => Ok(Box::new(CloudflareProvider::new(
                api_token,
                account_id.clone(),
                api_url.clone(),
                index,
            )?)),
            _ => Err(Error::config("Invalid config for Cloudflare provider")),
        }
    }
}

/// Register the Cloudflare provider with a registry
///
/// # Example
///
/// ```rust
/// use zonebridge_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// zonebridge_provider_cloudflare::register(&registry);
/// ```
pub fn register(registry: &zonebridge_core::ProviderRegistry) {
    registry.register_provider(KIND, Box::new(CloudflareFactory));
}
