// # DNSimple Provider
//
// Every DNSimple path is scoped by the account id. Records are independent
// objects with numeric ids, kept in the identity index once created.
//
// ## Wire Format
//
// - Record names are relative, "" for the apex
// - MX and SRV carry the priority in a separate field
//
// ## API Reference
//
// - https://developer.dnsimple.com/v2/
// - Domains: `/:account/domains[/:domain]`
// - Records: `/:account/zones/:zone/records[/:record_id]`
// - Zone file: GET `/:account/zones/:zone/file`
// - DNSSEC: `/:account/domains/:domain/dnssec`, `/:account/domains/:domain/ds_records`

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

/// DNSimple API base URL
const DNSIMPLE_API_BASE: &str = "https://api.dnsimple.com/v2";

const KIND: ProviderKind = ProviderKind::Dnsimple;

#[derive(Debug, Deserialize)]
struct Data<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct DnsimpleDomain {
    id: u64,
    name: String,
}

impl DnsimpleDomain {
    fn info(self) -> DomainInfo {
        DomainInfo {
            name: self.name,
            zone_id: Some(self.id.to_string()),
            nameservers: Vec::new(),
            dnssec: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DnsimpleRecord {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    rtype: String,
    content: String,
    #[serde(default)]
    ttl: Option<u32>,
    #[serde(default)]
    priority: Option<u16>,
}

impl DnsimpleRecord {
    fn stored(&self, rtype: &RecordType) -> String {
        match (rtype, self.priority) {
            (RecordType::Mx, Some(p)) => merge::mx_compose(p, &self.content),
            _ => self.content.trim().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ZoneFile {
    zone: String,
}

#[derive(Debug, Deserialize)]
struct DnssecState {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct DelegationSigner {
    #[serde(default)]
    keytag: Option<String>,
    #[serde(default)]
    algorithm: Option<String>,
    #[serde(default)]
    digest_type: Option<String>,
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    public_key: Option<String>,
}

impl DelegationSigner {
    fn presentation(&self) -> Option<String> {
        Some(format!(
            "{} {} {} {}",
            self.keytag.as_deref()?,
            self.algorithm.as_deref()?,
            self.digest_type.as_deref()?,
            self.digest.as_deref()?
        ))
    }

    fn metadata(&self) -> DnssecKey {
        DnssecKey {
            key_tag: self.keytag.as_deref().and_then(|k| k.parse().ok()),
            algorithm: self.algorithm.clone(),
            flags: None,
            public_key: self.public_key.clone(),
            active: true,
        }
    }
}

/// DNSimple adapter
pub struct DnsimpleProvider {
    transport: Arc<dyn Transport>,
    account_id: String,
    index: IdentityIndex,
}

impl std::fmt::Debug for DnsimpleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsimpleProvider")
            .field("transport", &self.transport)
            .field("account_id", &self.account_id)
            .finish()
    }
}

impl DnsimpleProvider {
    /// Create a provider talking to the DNSimple API
    pub fn new(api_token: &str, account_id: &str, api_url: Option<String>, index: IdentityIndex) -> Result<Self> {
        let base = api_url.unwrap_or_else(|| DNSIMPLE_API_BASE.to_string());
        let transport = HttpTransport::new(KIND, base)?.with_bearer(api_token);
        Ok(Self::with_transport(Arc::new(transport), account_id, index))
    }

    /// Create a provider over an existing transport
    pub fn with_transport(transport: Arc<dyn Transport>, account_id: &str, index: IdentityIndex) -> Self {
        Self {
            transport,
            account_id: account_id.trim().to_string(),
            index,
        }
    }

    async fn call(&self, op: &str, request: ApiRequest) -> Result<ApiResponse> {
        transport::call(self.transport.as_ref(), KIND, op, request).await
    }

    fn domain_path(&self, zone: &str) -> String {
        format!("/{}/domains/{}", self.account_id, names::zone_root(zone))
    }

    fn records_path(&self, zone: &str) -> String {
        format!("/{}/zones/{}/records", self.account_id, names::zone_root(zone))
    }

    /// Records under `subname` with type `rtype`
    ///
    /// The API filters by exact relative name, so the apex is queried as "".
    async fn scan(&self, zone: &str, subname: &str, rtype: &RecordType) -> Result<Vec<DnsimpleRecord>> {
        let response = self
            .call(
                &format!("list {} {} in {}", rtype, names::relative_or_at(subname, zone), zone),
                ApiRequest::get(self.records_path(zone))
                    .with_query("name", names::relative(subname, zone))
                    .with_query("type", rtype.as_str()),
            )
            .await?;
        let records: Data<Vec<DnsimpleRecord>> = response.json(KIND)?;
        let wanted = names::relative(subname, zone);
        Ok(records
            .data
            .into_iter()
            .filter(|r| r.rtype.eq_ignore_ascii_case(rtype.as_str()) && names::relative(&r.name, zone) == wanted)
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
            .map(|r| r.id.to_string()))
    }

    /// Delegation signer records of the domain
    async fn signers(&self, zone: &str) -> Result<Vec<DelegationSigner>> {
        let response = self
            .call(
                &format!("list ds records of {zone}"),
                ApiRequest::get(format!("{}/ds_records", self.domain_path(zone))),
            )
            .await?;
        let signers: Data<Vec<DelegationSigner>> = response.json(KIND)?;
        Ok(signers.data)
    }

    fn record_body(zone: &str, rrset: &Rrset, value: &str) -> Result<(Value, String, Option<u16>)> {
        let (content, priority) = rrset.split_value(value, None)?;
        let mut body = json!({
            "name": names::relative(&rrset.subname, zone),
            "type": rrset.rtype.as_str(),
            "content": content,
            "ttl": rrset.ttl,
        });
        if let Some(p) = priority {
            body["priority"] = json!(p);
        }
        let stored = match (&rrset.rtype, priority) {
            (RecordType::Mx, Some(p)) => merge::mx_compose(p, &content),
            _ => value.trim().to_string(),
        };
        Ok((body, stored, priority))
    }
}

#[async_trait]
impl ZoneProvider for DnsimpleProvider {
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
                &format!("create domain {zone}"),
                ApiRequest::post(format!("/{}/domains", self.account_id), json!({ "name": zone })),
            )
            .await?;
        let created: Data<DnsimpleDomain> = response.json(KIND)?;
        tracing::info!("Created DNSimple domain {} ({})", zone, created.data.id);
        Ok(DomainCreated {
            zone_id: Some(created.data.id.to_string()),
        })
    }

    async fn list_domains(&self) -> Result<Vec<DomainInfo>> {
        let response = self
            .call(
                "list domains",
                ApiRequest::get(format!("/{}/domains", self.account_id)).with_query("per_page", "100"),
            )
            .await?;
        let domains: Data<Vec<DnsimpleDomain>> = response.json(KIND)?;
        Ok(domains.data.into_iter().map(DnsimpleDomain::info).collect())
    }

    async fn get_domain(&self, name: &str) -> Result<DomainInfo> {
        require_name(name, "domain name")?;
        let response = self
            .call(
                &format!("get domain {name}"),
                ApiRequest::get(self.domain_path(name)),
            )
            .await?;
        let domain: Data<DnsimpleDomain> = response.json(KIND)?;
        Ok(domain.data.info())
    }

    async fn delete_domain(&self, name: &str) -> Result<()> {
        require_name(name, "domain name")?;
        self.call(
            &format!("delete domain {name}"),
            ApiRequest::delete(self.domain_path(name)),
        )
        .await?;
        tracing::info!("Deleted DNSimple domain {}", name);
        Ok(())
    }

    async fn export_zonefile(&self, name: &str) -> Result<String> {
        require_name(name, "domain name")?;
        let response = self
            .call(
                &format!("export zone {name}"),
                ApiRequest::get(format!("/{}/zones/{}/file", self.account_id, names::zone_root(name))),
            )
            .await?;
        let file: Data<ZoneFile> = response.json(KIND)?;
        Ok(file.data.zone)
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
                        .call(&op, ApiRequest::post(self.records_path(zone), body))
                        .await?;
                    let created: Data<DnsimpleRecord> = response.json(KIND)?;
                    tracing::info!("{}: {} ({})", op, stored, created.data.id);
                    created.data.id.to_string()
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
            ttl: first.ttl.unwrap_or(3600),
            priority: first.priority,
            records: records.iter().map(|r| r.stored(rtype)).collect(),
            old_value: None,
        })
    }

    async fn retrieve_all_rrsets(&self, zone: &str) -> Result<Vec<Rrset>> {
        let response = self
            .call(
                &format!("list records of {zone}"),
                ApiRequest::get(self.records_path(zone)).with_query("per_page", "100"),
            )
            .await?;
        let records: Data<Vec<DnsimpleRecord>> = response.json(KIND)?;

        let mut grouped: BTreeMap<(String, String), Rrset> = BTreeMap::new();
        for r in records.data {
            let rtype: RecordType = r.rtype.parse()?;
            let subname = names::relative(&r.name, zone);
            let value = r.stored(&rtype);
            grouped
                .entry((subname.clone(), rtype.to_string()))
                .or_insert_with(|| Rrset {
                    subname,
                    rtype,
                    ttl: r.ttl.unwrap_or(3600),
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
                "dnsimple needs the current value of {} {}",
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

        let (mut body, stored, priority) = Self::record_body(zone, &rrset, &rrset.records[0])?;
        // The record type cannot change on update
        if let Some(obj) = body.as_object_mut() {
            obj.remove("type");
        }
        let op = format!("update {} {} in {}", rtype, names::relative_or_at(subname, zone), zone);
        self.call(
            &op,
            ApiRequest::patch(format!("{}/{id}", self.records_path(zone)), body),
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
                .map(|r| r.id.to_string())
                .collect(),
        };

        let op = format!("delete {} {} in {}", rtype, names::relative_or_at(subname, zone), zone);
        if ids.is_empty() {
            tracing::debug!("{}: nothing published", op);
            return Ok(());
        }
        for id in ids {
            match self
                .call(&op, ApiRequest::delete(format!("{}/{id}", self.records_path(zone))))
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
        let op = format!("enable dnssec for {zone}");
        self.call(
            &op,
            ApiRequest::post(format!("{}/dnssec", self.domain_path(zone)), json!({})),
        )
        .await?;
        tracing::info!("{}", op);
        self.ds_records(zone).await
    }

    async fn disable_dnssec(&self, zone: &str) -> Result<()> {
        let op = format!("disable dnssec for {zone}");
        match self
            .call(&op, ApiRequest::delete(format!("{}/dnssec", self.domain_path(zone))))
            .await
        {
            Ok(_) => tracing::info!("{}", op),
            // DNSimple answers 428 when DNSSEC is already off
            Err(Error::Provider { message, .. }) if message.contains("status 428") => {
                tracing::debug!("{}: already disabled", op)
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn dnssec_status(&self, zone: &str) -> Result<DnssecStatus> {
        let response = self
            .call(
                &format!("get dnssec of {zone}"),
                ApiRequest::get(format!("{}/dnssec", self.domain_path(zone))),
            )
            .await?;
        let state: Data<DnssecState> = response.json(KIND)?;
        let signers = self.signers(zone).await?;

        let mut status = DnssecStatus::from_keys(
            signers
                .iter()
                .map(|s| (s.metadata(), s.presentation().into_iter().collect()))
                .collect(),
        );
        status.enabled = state.data.enabled;
        Ok(status)
    }

    async fn ds_records(&self, zone: &str) -> Result<Vec<DsRecord>> {
        let signers = self.signers(zone).await?;
        Ok(dedup_ds(
            signers
                .iter()
                .filter_map(|s| s.presentation())
                .filter_map(|p| DsRecord::parse(&p)),
        ))
    }
}

/// Factory for creating DNSimple providers
pub struct DnsimpleFactory;

impl ProviderFactory for DnsimpleFactory {
    fn create(&self, config: &ProviderConfig, index: IdentityIndex) -> Result<Box<dyn ZoneProvider>> {
        match config {
            ProviderConfig::Dnsimple {
                api_token,
                account_id,
                api_url,
            } => Ok(Box::new(DnsimpleProvider::new(
                api_token,
                account_id,
                api_url.clone(),
                index,
            )?)),
            _ => Err(Error::config("Invalid config for DNSimple provider")),
        }
    }
}

/// Register the DNSimple provider with a registry
pub fn register(registry: &zonebridge_core::ProviderRegistry) {
    registry.register_provider(KIND, Box::new(DnsimpleFactory));
}
