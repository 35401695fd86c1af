// # Vultr Provider
//
// Vultr keeps one record per value under an opaque id. Record ids are kept
// in the identity index; a listing of the domain's records is the fallback
// when the index does not know an id.
//
// ## Wire Format
//
// - Record names are relative, "" for the apex
// - MX and SRV carry the priority in a separate field
//
// ## DNSSEC
//
// DNSSEC is a per-domain toggle (`dns_sec`); the signing records are read
// from `/domains/:domain/dnssec` as presentation-form strings.
//
// ## API Reference
//
// - https://www.vultr.com/api/#tag/dns
// - Domains: `/domains`, `/domains/:domain`
// - Records: `/domains/:domain/records[/:record_id]`

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
    ZoneProvider,
};

/// Vultr API base URL
const VULTR_API_BASE: &str = "https://api.vultr.com/v2";

const KIND: ProviderKind = ProviderKind::Vultr;

#[derive(Debug, Deserialize)]
struct VDomain {
    domain: String,
    #[serde(default)]
    dns_sec: Option<String>,
}

impl VDomain {
    fn info(self) -> DomainInfo {
        DomainInfo {
            dnssec: self.dns_sec.as_deref().map(|s| s == "enabled"),
            name: self.domain,
            zone_id: None,
            nameservers: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DomainEnvelope {
    domain: VDomain,
}

#[derive(Debug, Deserialize)]
struct DomainsEnvelope {
    #[serde(default)]
    domains: Vec<VDomain>,
}

#[derive(Debug, Clone, Deserialize)]
struct VRecord {
    id: String,
    #[serde(rename = "type")]
    rtype: String,
    #[serde(default)]
    name: String,
    data: String,
    #[serde(default)]
    priority: Option<i64>,
    #[serde(default)]
    ttl: Option<u32>,
}

impl VRecord {
    fn priority(&self) -> Option<u16> {
        self.priority.and_then(|p| u16::try_from(p).ok())
    }

    fn stored(&self, rtype: &RecordType) -> String {
        match (rtype, self.priority()) {
            (RecordType::Mx, Some(p)) => merge::mx_compose(p, &self.data),
            _ => self.data.trim().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecordEnvelope {
    record: VRecord,
}

#[derive(Debug, Deserialize)]
struct RecordsEnvelope {
    #[serde(default)]
    records: Vec<VRecord>,
}

#[derive(Debug, Deserialize)]
struct DnssecEnvelope {
    #[serde(default)]
    dns_sec: Vec<String>,
}

/// Vultr adapter
pub struct VultrProvider {
    transport: Arc<dyn Transport>,
    index: IdentityIndex,
}

impl std::fmt::Debug for VultrProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VultrProvider")
            .field("transport", &self.transport)
            .finish()
    }
}

impl VultrProvider {
    /// Create a provider talking to the Vultr API
    pub fn new(api_key: &str, api_url: Option<String>, index: IdentityIndex) -> Result<Self> {
        let base = api_url.unwrap_or_else(|| VULTR_API_BASE.to_string());
        let transport = HttpTransport::new(KIND, base)?.with_bearer(api_key);
        Ok(Self::with_transport(Arc::new(transport), index))
    }

    /// Create a provider over an existing transport
    pub fn with_transport(transport: Arc<dyn Transport>, index: IdentityIndex) -> Self {
        Self { transport, index }
    }

    async fn call(&self, op: &str, request: ApiRequest) -> Result<ApiResponse> {
        transport::call(self.transport.as_ref(), KIND, op, request).await
    }

    fn records_path(zone: &str) -> String {
        format!("/domains/{}/records", names::zone_root(zone))
    }

    async fn records(&self, zone: &str) -> Result<Vec<VRecord>> {
        let response = self
            .call(
                &format!("list records of {zone}"),
                ApiRequest::get(Self::records_path(zone)).with_query("per_page", "500"),
            )
            .await?;
        let records: RecordsEnvelope = response.json(KIND)?;
        Ok(records.records)
    }

    async fn scan(&self, zone: &str, subname: &str, rtype: &RecordType) -> Result<Vec<VRecord>> {
        let records: Vec<VRecord> = self
            .records(zone)
            .await?
            .into_iter()
            .filter(|r| r.rtype.eq_ignore_ascii_case(rtype.as_str()))
            .collect();
        if names::is_apex(subname, zone) {
            let apex: Vec<VRecord> = records
                .iter()
                .filter(|r| r.name.trim().is_empty())
                .cloned()
                .collect();
            if !apex.is_empty() {
                return Ok(apex);
            }
        }
        for candidate in names::candidates(subname, zone) {
            let matched: Vec<VRecord> = records
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
            .map(|r| r.id))
    }

    fn record_body(zone: &str, rrset: &Rrset, value: &str) -> Result<(Value, String, Option<u16>)> {
        let (data, priority) = rrset.split_value(value, None)?;
        let data = match rrset.rtype {
            RecordType::Txt | RecordType::Spf => merge::quote(&data),
            // "priority weight port target" loses the priority token
            RecordType::Srv if data.split_whitespace().count() == 4 => data
                .split_once(char::is_whitespace)
                .map(|(_, rest)| rest.trim().to_string())
                .unwrap_or(data),
            _ => data,
        };
        let mut body = json!({
            "name": names::relative(&rrset.subname, zone),
            "type": rrset.rtype.as_str(),
            "data": data,
            "ttl": rrset.ttl,
        });
        if let Some(p) = priority {
            body["priority"] = json!(p);
        }
        let stored = match (&rrset.rtype, priority) {
            (RecordType::Mx, Some(p)) => merge::mx_compose(p, &data),
            _ => value.trim().to_string(),
        };
        Ok((body, stored, priority))
    }

    async fn dnssec_strings(&self, zone: &str) -> Result<Vec<String>> {
        let root = names::zone_root(zone);
        let response = self
            .call(
                &format!("get dnssec of {root}"),
                ApiRequest::get(format!("/domains/{root}/dnssec")),
            )
            .await?;
        let dnssec: DnssecEnvelope = response.json(KIND)?;
        Ok(dnssec.dns_sec)
    }

    async fn set_dnssec(&self, zone: &str, enabled: bool) -> Result<()> {
        let root = names::zone_root(zone);
        let state = if enabled { "enabled" } else { "disabled" };
        let op = format!("set dnssec of {root} to {state}");
        self.call(
            &op,
            ApiRequest::put(format!("/domains/{root}"), json!({ "dns_sec": state })),
        )
        .await?;
        tracing::info!("{}", op);
        Ok(())
    }
}

/// Split Vultr's DNSSEC strings into DNSKEY metadata and DS records
fn parse_dnssec(lines: &[String]) -> DnssecStatus {
    let mut keys = Vec::new();
    let mut ds = Vec::new();
    for line in lines {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if let Some(pos) = tokens.iter().position(|t| t.eq_ignore_ascii_case("DNSKEY")) {
            let rest = &tokens[pos + 1..];
            keys.push(DnssecKey {
                key_tag: None,
                flags: rest.first().and_then(|f| f.parse().ok()),
                algorithm: rest.get(2).map(|a| a.to_string()),
                public_key: rest.get(3..).map(|k| k.concat()).filter(|k| !k.is_empty()),
                active: true,
            });
        } else if DsRecord::parse(line).is_some() {
            ds.push(line.clone());
        }
    }

    let mut status = DnssecStatus::from_keys(vec![(DnssecKey::default(), ds)]);
    status.keys = keys;
    status
}

#[async_trait]
impl ZoneProvider for VultrProvider {
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
            &format!("create domain {zone}"),
            ApiRequest::post("/domains", json!({ "domain": zone, "dns_sec": "disabled" })),
        )
        .await?;
        tracing::info!("Created Vultr domain {}", zone);
        Ok(DomainCreated::default())
    }

    async fn list_domains(&self) -> Result<Vec<DomainInfo>> {
        let response = self
            .call(
                "list domains",
                ApiRequest::get("/domains").with_query("per_page", "500"),
            )
            .await?;
        let domains: DomainsEnvelope = response.json(KIND)?;
        Ok(domains.domains.into_iter().map(VDomain::info).collect())
    }

    async fn get_domain(&self, name: &str) -> Result<DomainInfo> {
        require_name(name, "domain name")?;
        let zone = names::zone_root(name);
        let response = self
            .call(
                &format!("get domain {zone}"),
                ApiRequest::get(format!("/domains/{zone}")),
            )
            .await?;
        let domain: DomainEnvelope = response.json(KIND)?;
        Ok(domain.domain.info())
    }

    async fn delete_domain(&self, name: &str) -> Result<()> {
        require_name(name, "domain name")?;
        let zone = names::zone_root(name);
        self.call(
            &format!("delete domain {zone}"),
            ApiRequest::delete(format!("/domains/{zone}")),
        )
        .await?;
        tracing::info!("Deleted Vultr domain {}", zone);
        Ok(())
    }

    async fn create_rrset(&self, zone: &str, payload: &RrsetPayload) -> Result<()> {
        let rrset = payload.validate()?;
        for value in &rrset.records {
            let (body, stored, priority) = Self::record_body(zone, &rrset, value)?;
            let op = format!(
                "create {} {} in {}",
                rrset.rtype,
                names::relative_or_at(&rrset.subname, zone),
                zone
            );

            let id = match self.locate(zone, &rrset.subname, &rrset.rtype, &stored).await? {
                Some(id) => {
                    tracing::debug!("{}: {} already exists ({})", op, stored, id);
                    id
                }
                None => {
                    let response = self
                        .call(&op, ApiRequest::post(Self::records_path(zone), body))
                        .await?;
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
                    IdentityEntry::new(stored, Some(id), rrset.ttl).with_priority(priority),
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
            ttl: first.ttl.unwrap_or(300),
            priority: first.priority(),
            records: records.iter().map(|r| r.stored(rtype)).collect(),
            old_value: None,
        })
    }

    async fn retrieve_all_rrsets(&self, zone: &str) -> Result<Vec<Rrset>> {
        let mut grouped: BTreeMap<(String, String), Rrset> = BTreeMap::new();
        for r in self.records(zone).await? {
            let rtype: RecordType = r.rtype.parse()?;
            let subname = names::relative(&r.name, zone);
            let value = r.stored(&rtype);
            grouped
                .entry((subname.clone(), rtype.to_string()))
                .or_insert_with(|| Rrset {
                    subname,
                    rtype,
                    ttl: r.ttl.unwrap_or(300),
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
                "vultr needs the current value of {} {}",
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

        let (body, stored, priority) = Self::record_body(zone, &rrset, &rrset.records[0])?;
        let op = format!("update {} {} in {}", rtype, names::relative_or_at(subname, zone), zone);
        self.call(
            &op,
            ApiRequest::patch(format!("{}/{id}", Self::records_path(zone)), body),
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
        let ids: Vec<String> = match value {
            Some(v) => self.locate(zone, subname, rtype, v).await?.into_iter().collect(),
            None => self
                .scan(zone, subname, rtype)
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
            match self
                .call(&op, ApiRequest::delete(format!("{}/{id}", Self::records_path(zone))))
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
        self.set_dnssec(zone, true).await?;
        Ok(parse_dnssec(&self.dnssec_strings(zone).await?).ds)
    }

    async fn disable_dnssec(&self, zone: &str) -> Result<()> {
        self.set_dnssec(zone, false).await
    }

    async fn dnssec_status(&self, zone: &str) -> Result<DnssecStatus> {
        Ok(parse_dnssec(&self.dnssec_strings(zone).await?))
    }
}

/// Factory for creating Vultr providers
pub struct VultrFactory;

impl ProviderFactory for VultrFactory {
    fn create(&self, config: &ProviderConfig, index: IdentityIndex) -> Result<Box<dyn ZoneProvider>> {
        match config {
            ProviderConfig::Vultr { api_key, api_url } => {
                Ok(Box::new(VultrProvider::new(api_key, api_url.clone(), index)?))
            }
            _ => Err(Error::config("Invalid config for Vultr provider")),
        }
    }
}

/// Register the Vultr provider with a registry
pub fn register(registry: &zonebridge_core::ProviderRegistry) {
    registry.register_provider(KIND, Box::new(VultrFactory));
}
