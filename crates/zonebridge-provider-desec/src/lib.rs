// # deSEC Provider
//
// deSEC stores records as native RRsets: one (subname, type) pair carries
// the full value list, and every write replaces that list. The adapter
// therefore reads the current set before adding or removing a value and
// submits the recomputed set.
//
// ## Wire Format
//
// - Subnames are relative; the apex is "" in bodies and "@" in URLs
// - Hostname targets (CNAME, MX, NS, PTR, SRV) carry a trailing dot
// - TXT/SPF values are quoted character strings
// - MX values are "<priority> <host>."
//
// ## DNSSEC
//
// Every deSEC zone is signed from creation. Enabling returns the DS records
// of the existing keys; disabling is not possible and reports `Unsupported`.
//
// ## API Reference
//
// - https://desec.readthedocs.io/en/latest/
// - Domains: `/domains/`, `/domains/:name/`
// - RRsets: `/domains/:name/rrsets/[:subname/:type/]`
// - Zone file: GET `/domains/:name/zonefile/`

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use zonebridge_core::merge::{self, MergeOp};
use zonebridge_core::names;
use zonebridge_core::traits::require_name;
use zonebridge_core::transport::{self, ApiRequest, ApiResponse, HttpTransport, Transport};
use zonebridge_core::{
    DnssecKey, DnssecStatus, DomainCreated, DomainInfo, DsRecord, Error, IdentityIndex,
    ProviderConfig, ProviderFactory, ProviderKind, RecordType, Result, Rrset, RrsetPayload,
    ZoneProvider,
};

/// deSEC API base URL
const DESEC_API_BASE: &str = "https://desec.io/api/v1";

const KIND: ProviderKind = ProviderKind::Desec;

#[derive(Debug, Deserialize)]
struct DesecKey {
    #[serde(default)]
    dnskey: String,
    #[serde(default)]
    ds: Vec<String>,
    #[serde(default)]
    flags: Option<u16>,
    #[serde(default)]
    managed: Option<bool>,
}

impl DesecKey {
    /// Key metadata parsed from the DNSKEY presentation form
    /// ("<flags> <protocol> <algorithm> <public key>")
    fn metadata(&self) -> DnssecKey {
        let tokens: Vec<&str> = self.dnskey.split_whitespace().collect();
        DnssecKey {
            key_tag: None,
            algorithm: tokens.get(2).map(|s| s.to_string()),
            flags: self.flags.or_else(|| tokens.first().and_then(|f| f.parse().ok())),
            public_key: tokens.get(3..).map(|rest| rest.concat()).filter(|k| !k.is_empty()),
            active: self.managed.unwrap_or(true),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DesecDomain {
    name: String,
    #[serde(default)]
    keys: Vec<DesecKey>,
}

impl DesecDomain {
    fn dnssec(self) -> DnssecStatus {
        DnssecStatus::from_keys(
            self.keys
                .into_iter()
                .map(|k| {
                    let meta = k.metadata();
                    (meta, k.ds)
                })
                .collect(),
        )
    }
}

#[derive(Debug, Deserialize)]
struct DesecRrset {
    #[serde(default)]
    subname: String,
    #[serde(rename = "type")]
    rtype: String,
    ttl: u32,
    #[serde(default)]
    records: Vec<String>,
}

impl DesecRrset {
    fn into_rrset(self) -> Result<Rrset> {
        let rtype: RecordType = self.rtype.parse()?;
        let priority = match rtype {
            RecordType::Mx | RecordType::Srv => self
                .records
                .first()
                .and_then(|v| merge::leading_priority(v)),
            _ => None,
        };
        Ok(Rrset {
            subname: self.subname,
            rtype,
            ttl: self.ttl,
            records: self.records,
            priority,
            old_value: None,
        })
    }
}

/// deSEC adapter
pub struct DesecProvider {
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for DesecProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DesecProvider")
            .field("transport", &self.transport)
            .finish()
    }
}

impl DesecProvider {
    /// Create a provider talking to the deSEC API
    pub fn new(api_key: &str, api_url: Option<String>) -> Result<Self> {
        let base = api_url.unwrap_or_else(|| DESEC_API_BASE.to_string());
        let transport =
            HttpTransport::new(KIND, base)?.with_header("Authorization", format!("Token {api_key}"));
        Ok(Self::with_transport(Arc::new(transport)))
    }

    /// Create a provider over an existing transport
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn call(&self, op: &str, request: ApiRequest) -> Result<ApiResponse> {
        transport::call(self.transport.as_ref(), KIND, op, request).await
    }

    fn rrset_path(zone: &str, subname: &str, rtype: &RecordType) -> String {
        format!(
            "/domains/{}/rrsets/{}/{}/",
            names::zone_root(zone),
            names::relative_or_at(subname, zone),
            rtype
        )
    }

    /// Current RRset, `None` when it does not exist
    async fn current(&self, zone: &str, subname: &str, rtype: &RecordType) -> Result<Option<Rrset>> {
        match self.retrieve_rrset(zone, subname, rtype).await {
            Ok(rrset) => Ok(Some(rrset)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put_rrset(&self, zone: &str, subname: &str, rtype: &RecordType, ttl: u32, records: Vec<String>) -> Result<()> {
        let op = format!("replace {} {} in {}", rtype, names::relative_or_at(subname, zone), zone);
        self.call(
            &op,
            ApiRequest::put(
                Self::rrset_path(zone, subname, rtype),
                json!({
                    "subname": names::relative(subname, zone),
                    "type": rtype.as_str(),
                    "ttl": ttl,
                    "records": records,
                }),
            ),
        )
        .await?;
        tracing::info!("{}: {:?}", op, records);
        Ok(())
    }

    async fn domain(&self, name: &str) -> Result<DesecDomain> {
        let zone = names::zone_root(name);
        let response = self
            .call(
                &format!("get domain {zone}"),
                ApiRequest::get(format!("/domains/{zone}/")),
            )
            .await?;
        response.json(KIND)
    }
}

#[async_trait]
impl ZoneProvider for DesecProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn replaces_whole_rrset(&self, _rtype: &RecordType) -> bool {
        true
    }

    async fn create_domain(&self, name: &str) -> Result<DomainCreated> {
        require_name(name, "domain name")?;
        let zone = names::zone_root(name);
        let response = self
            .call(
                &format!("create domain {zone}"),
                ApiRequest::post("/domains/", json!({ "name": zone })),
            )
            .await?;
        let created: DesecDomain = response.json(KIND)?;
        tracing::info!("Created deSEC domain {}", created.name);
        Ok(DomainCreated::default())
    }

    async fn list_domains(&self) -> Result<Vec<DomainInfo>> {
        let response = self.call("list domains", ApiRequest::get("/domains/")).await?;
        let domains: Vec<DesecDomain> = response.json(KIND)?;
        Ok(domains
            .into_iter()
            .map(|d| DomainInfo {
                name: d.name,
                zone_id: None,
                nameservers: Vec::new(),
                dnssec: Some(true),
            })
            .collect())
    }

    async fn get_domain(&self, name: &str) -> Result<DomainInfo> {
        require_name(name, "domain name")?;
        let domain = self.domain(name).await?;
        Ok(DomainInfo {
            name: domain.name,
            zone_id: None,
            nameservers: Vec::new(),
            dnssec: Some(true),
        })
    }

    async fn delete_domain(&self, name: &str) -> Result<()> {
        require_name(name, "domain name")?;
        let zone = names::zone_root(name);
        self.call(
            &format!("delete domain {zone}"),
            ApiRequest::delete(format!("/domains/{zone}/")),
        )
        .await?;
        tracing::info!("Deleted deSEC domain {}", zone);
        Ok(())
    }

    async fn export_zonefile(&self, name: &str) -> Result<String> {
        require_name(name, "domain name")?;
        let zone = names::zone_root(name);
        let response = self
            .call(
                &format!("export zone {zone}"),
                ApiRequest::get(format!("/domains/{zone}/zonefile/")),
            )
            .await?;
        Ok(response.body)
    }

    async fn create_rrset(&self, zone: &str, payload: &RrsetPayload) -> Result<()> {
        let rrset = payload.validate()?;
        let wanted = rrset.presentation_values()?;
        let existing = self
            .current(zone, &rrset.subname, &rrset.rtype)
            .await?
            .map(|r| r.records)
            .unwrap_or_default();

        if existing.is_empty() {
            let op = format!(
                "create {} {} in {}",
                rrset.rtype,
                names::relative_or_at(&rrset.subname, zone),
                zone
            );
            self.call(
                &op,
                ApiRequest::post(
                    format!("/domains/{}/rrsets/", names::zone_root(zone)),
                    json!({
                        "subname": names::relative(&rrset.subname, zone),
                        "type": rrset.rtype.as_str(),
                        "ttl": rrset.ttl,
                        "records": wanted,
                    }),
                ),
            )
            .await?;
            tracing::info!("{}: {:?}", op, wanted);
            return Ok(());
        }

        let mut merged = existing.clone();
        for value in &wanted {
            merged = merge::merge(&rrset.rtype, &merged, MergeOp::Add(value));
        }
        if merged.len() == existing.len() {
            tracing::debug!(
                "{} {} in {} already holds {:?}",
                rrset.rtype,
                names::relative_or_at(&rrset.subname, zone),
                zone,
                wanted
            );
            return Ok(());
        }
        self.put_rrset(zone, &rrset.subname, &rrset.rtype, rrset.ttl, merged)
            .await
    }

    async fn retrieve_rrset(&self, zone: &str, subname: &str, rtype: &RecordType) -> Result<Rrset> {
        let response = self
            .call(
                &format!("get {} {} in {}", rtype, names::relative_or_at(subname, zone), zone),
                ApiRequest::get(Self::rrset_path(zone, subname, rtype)),
            )
            .await?;
        let rrset: DesecRrset = response.json(KIND)?;
        rrset.into_rrset()
    }

    async fn retrieve_all_rrsets(&self, zone: &str) -> Result<Vec<Rrset>> {
        let root = names::zone_root(zone);
        let response = self
            .call(
                &format!("list rrsets of {root}"),
                ApiRequest::get(format!("/domains/{root}/rrsets/")),
            )
            .await?;
        let rrsets: Vec<DesecRrset> = response.json(KIND)?;
        rrsets.into_iter().map(DesecRrset::into_rrset).collect()
    }

    async fn modify_rrset(
        &self,
        zone: &str,
        subname: &str,
        rtype: &RecordType,
        payload: &RrsetPayload,
    ) -> Result<()> {
        let mut rrset = payload.validate()?;
        rrset.rtype = rtype.clone();
        let records = rrset.presentation_values()?;
        self.put_rrset(zone, subname, rtype, rrset.ttl, records).await
    }

    async fn modify_bulk_rrsets(&self, zone: &str, payloads: &[RrsetPayload]) -> Result<()> {
        let root = names::zone_root(zone);
        let mut body = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let rrset = payload.validate()?;
            body.push(json!({
                "subname": names::relative(&rrset.subname, zone),
                "type": rrset.rtype.as_str(),
                "ttl": rrset.ttl,
                "records": rrset.presentation_values()?,
            }));
        }
        let op = format!("bulk update {} rrsets in {}", body.len(), root);
        self.call(
            &op,
            ApiRequest::patch(format!("/domains/{root}/rrsets/"), json!(body)),
        )
        .await?;
        tracing::info!("{}", op);
        Ok(())
    }

    async fn delete_rrset(
        &self,
        zone: &str,
        subname: &str,
        rtype: &RecordType,
        value: Option<&str>,
    ) -> Result<()> {
        let op = format!("delete {} {} in {}", rtype, names::relative_or_at(subname, zone), zone);

        if let Some(value) = value {
            let Some(existing) = self.current(zone, subname, rtype).await? else {
                tracing::debug!("{}: no such rrset", op);
                return Ok(());
            };
            let remaining = merge::merge(rtype, &existing.records, MergeOp::Remove(value));
            if remaining.len() == existing.records.len() {
                tracing::debug!("{}: {} is not published", op, value);
                return Ok(());
            }
            if !remaining.is_empty() {
                return self
                    .put_rrset(zone, subname, rtype, existing.ttl, remaining)
                    .await;
            }
        }

        match self
            .call(&op, ApiRequest::delete(Self::rrset_path(zone, subname, rtype)))
            .await
        {
            Ok(_) => {
                tracing::info!("{}", op);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!("{}: already gone", op);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn enable_dnssec(&self, zone: &str) -> Result<Vec<DsRecord>> {
        let status = self.domain(zone).await?.dnssec();
        tracing::info!("deSEC signs {} already, {} DS records", zone, status.ds.len());
        Ok(status.ds)
    }

    async fn disable_dnssec(&self, _zone: &str) -> Result<()> {
        Err(Error::unsupported(KIND.as_str(), "disable_dnssec"))
    }

    async fn dnssec_status(&self, zone: &str) -> Result<DnssecStatus> {
        Ok(self.domain(zone).await?.dnssec())
    }
}

/// Factory for creating deSEC providers
pub struct DesecFactory;

impl ProviderFactory for DesecFactory {
    fn create(&self, config: &ProviderConfig, _index: IdentityIndex) -> Result<Box<dyn ZoneProvider>> {
        match config {
            ProviderConfig::Desec { api_key, api_url } => {
                Ok(Box::new(DesecProvider::new(api_key, api_url.clone())?))
            }
            _ => Err(Error::config("Invalid config for deSEC provider")),
        }
    }
}

/// Register the deSEC provider with a registry
pub fn register(registry: &zonebridge_core::ProviderRegistry) {
    registry.register_provider(KIND, Box::new(DesecFactory));
}
