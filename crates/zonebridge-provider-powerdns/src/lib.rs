// # PowerDNS Provider
//
// Adapter for the PowerDNS authoritative server HTTP API.
//
// ## Record Model
//
// PowerDNS stores native RRsets addressed by fully-qualified name (with
// trailing dot) and type. All writes go through `PATCH /zones/:id` with
// changetype `REPLACE` or `DELETE`, so adding or removing one value is a
// read-merge-write of the whole set.
//
// ## Secondaries
//
// Up to 12 secondary servers can be configured. Each one is another
// PowerDNS instance reached through its own API; zone creation adds a
// `Slave` zone there pointing at the primary, and zone deletion removes it.
//
// ## API Reference
//
// - https://doc.powerdns.com/authoritative/http-api/
// - Zones: `/servers/:server_id/zones[/:zone_id]`
// - Zone file: GET `/servers/:server_id/zones/:zone_id/export`
// - DNSSEC: `/servers/:server_id/zones/:zone_id/cryptokeys[/:id]`

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use zonebridge_core::merge::{self, MergeOp};
use zonebridge_core::names;
use zonebridge_core::traits::require_name;
use zonebridge_core::transport::{self, ApiRequest, ApiResponse, HttpTransport, Transport};
use zonebridge_core::{
    DnssecKey, DnssecStatus, DomainCreated, DomainInfo, DsRecord, Error, IdentityIndex,
    ProviderConfig, ProviderFactory, ProviderKind, RecordType, Result, Rrset, RrsetPayload,
    SecondaryServer, ZoneProvider,
};

const KIND: ProviderKind = ProviderKind::PowerDns;

/// Server id used when none is configured
const DEFAULT_SERVER_ID: &str = "localhost";

/// API path prefix appended to the configured base URL
const API_PREFIX: &str = "/api/v1";

#[derive(Debug, Deserialize)]
struct PdnsRecord {
    content: String,
    #[serde(default)]
    disabled: bool,
}

#[derive(Debug, Deserialize)]
struct PdnsRrset {
    name: String,
    #[serde(rename = "type")]
    rtype: String,
    #[serde(default)]
    ttl: u32,
    #[serde(default)]
    records: Vec<PdnsRecord>,
}

#[derive(Debug, Deserialize)]
struct PdnsZone {
    id: String,
    name: String,
    #[serde(default)]
    dnssec: Option<bool>,
    #[serde(default)]
    rrsets: Vec<PdnsRrset>,
}

#[derive(Debug, Deserialize)]
struct Cryptokey {
    id: u64,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    flags: Option<u16>,
    #[serde(default)]
    algorithm: Option<String>,
    #[serde(default)]
    dnskey: Option<String>,
    #[serde(default)]
    ds: Vec<String>,
}

impl Cryptokey {
    fn metadata(&self) -> DnssecKey {
        DnssecKey {
            key_tag: self.ds.first().and_then(|d| DsRecord::parse(d)).map(|d| d.key_tag),
            algorithm: self.algorithm.clone(),
            flags: self.flags,
            public_key: self
                .dnskey
                .as_deref()
                .and_then(|k| k.split_whitespace().nth(3).map(str::to_string)),
            active: self.active,
        }
    }
}

/// A secondary server and the address it transfers the zone from
#[derive(Debug)]
struct Secondary {
    transport: Arc<dyn Transport>,
    primary: String,
}

/// PowerDNS adapter
pub struct PowerDnsProvider {
    transport: Arc<dyn Transport>,
    server_id: String,
    /// Nameservers listed in new zones
    nameservers: Vec<String>,
    /// "Native" or "Master"
    zone_kind: String,
    secondaries: Vec<Secondary>,
}

impl std::fmt::Debug for PowerDnsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerDnsProvider")
            .field("transport", &self.transport)
            .field("server_id", &self.server_id)
            .field("nameservers", &self.nameservers)
            .field("zone_kind", &self.zone_kind)
            .field("secondaries", &self.secondaries.len())
            .finish()
    }
}

/// Base URL with the API prefix
fn api_base(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.ends_with(API_PREFIX) {
        url.to_string()
    } else {
        format!("{url}{API_PREFIX}")
    }
}

/// Host part of a URL such as "http://10.0.0.1:8081/api/v1"
fn url_host(url: &str) -> String {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split('/').next().unwrap_or(rest);
    match authority.strip_prefix('[') {
        Some(v6) => v6.split(']').next().unwrap_or(v6).to_string(),
        None => authority.split(':').next().unwrap_or(authority).to_string(),
    }
}

fn pdns_transport(api_url: &str, api_key: &str) -> Result<HttpTransport> {
    Ok(HttpTransport::new(KIND, api_base(api_url))?.with_header("X-API-Key", api_key))
}

impl PowerDnsProvider {
    /// Create a provider from its configuration fields
    pub fn new(
        api_key: &str,
        api_url: &str,
        server_id: Option<String>,
        nameservers: Vec<String>,
        zone_kind: Option<String>,
        secondaries: &[SecondaryServer],
    ) -> Result<Self> {
        let transport = Arc::new(pdns_transport(api_url, api_key)?);
        let mut provider = Self::with_transport(transport, server_id, nameservers, zone_kind);
        let primary = url_host(api_url);
        for s in secondaries {
            let transport: Arc<dyn Transport> = Arc::new(pdns_transport(&s.api_url, &s.api_key)?);
            let address = s.primary_address.clone().unwrap_or_else(|| primary.clone());
            provider = provider.with_secondary(transport, address);
        }
        Ok(provider)
    }

    /// Create a provider over an existing transport
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        server_id: Option<String>,
        nameservers: Vec<String>,
        zone_kind: Option<String>,
    ) -> Self {
        Self {
            transport,
            server_id: server_id
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SERVER_ID.to_string()),
            nameservers: nameservers.iter().map(|ns| names::with_trailing_dot(ns)).collect(),
            zone_kind: zone_kind
                .filter(|k| !k.trim().is_empty())
                .unwrap_or_else(|| "Native".to_string()),
            secondaries: Vec::new(),
        }
    }

    /// Add a secondary server transferring from `primary`
    pub fn with_secondary(mut self, transport: Arc<dyn Transport>, primary: impl Into<String>) -> Self {
        self.secondaries.push(Secondary {
            transport,
            primary: primary.into(),
        });
        self
    }

    async fn call(&self, op: &str, request: ApiRequest) -> Result<ApiResponse> {
        transport::call(self.transport.as_ref(), KIND, op, request).await
    }

    fn zones_path(&self) -> String {
        format!("/servers/{}/zones", self.server_id)
    }

    fn zone_path(&self, zone: &str) -> String {
        format!("{}/{}", self.zones_path(), names::zone_fqdn(zone))
    }

    async fn zone(&self, zone: &str) -> Result<PdnsZone> {
        let response = self
            .call(
                &format!("get zone {}", names::zone_root(zone)),
                ApiRequest::get(self.zone_path(zone)),
            )
            .await?;
        response.json(KIND)
    }

    /// Current RRset, `None` when it does not exist
    async fn current(&self, zone: &str, subname: &str, rtype: &RecordType) -> Result<Option<Rrset>> {
        match self.retrieve_rrset(zone, subname, rtype).await {
            Ok(rrset) => Ok(Some(rrset)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn replace_change(zone: &str, subname: &str, rtype: &RecordType, ttl: u32, records: &[String]) -> Value {
        json!({
            "name": names::absolute_fqdn(subname, zone),
            "type": rtype.as_str(),
            "ttl": ttl,
            "changetype": "REPLACE",
            "records": records
                .iter()
                .map(|c| json!({ "content": c, "disabled": false }))
                .collect::<Vec<_>>(),
        })
    }

    async fn patch(&self, zone: &str, op: &str, changes: Vec<Value>) -> Result<()> {
        self.call(
            op,
            ApiRequest::patch(self.zone_path(zone), json!({ "rrsets": changes })),
        )
        .await?;
        tracing::info!("{}", op);
        Ok(())
    }

    async fn replace(&self, zone: &str, subname: &str, rtype: &RecordType, ttl: u32, records: &[String]) -> Result<()> {
        let op = format!(
            "replace {} {} in {} with {:?}",
            rtype,
            names::relative_or_at(subname, zone),
            names::zone_root(zone),
            records
        );
        self.patch(zone, &op, vec![Self::replace_change(zone, subname, rtype, ttl, records)])
            .await
    }

    async fn create_secondaries(&self, zone: &str) -> Result<()> {
        let fqdn = names::zone_fqdn(zone);
        for (n, secondary) in self.secondaries.iter().enumerate() {
            let op = format!("create secondary zone {} on secondary {}", fqdn, n + 1);
            match transport::call(
                secondary.transport.as_ref(),
                KIND,
                &op,
                ApiRequest::post(
                    format!("/servers/{DEFAULT_SERVER_ID}/zones"),
                    json!({
                        "name": fqdn,
                        "kind": "Slave",
                        "masters": [secondary.primary],
                        "nameservers": [],
                    }),
                ),
            )
            .await
            {
                Ok(_) => tracing::info!("{}", op),
                Err(Error::Conflict(_)) => tracing::debug!("{}: already present", op),
                Err(e) => return Err(e.context(format!("primary zone {fqdn} was created"))),
            }
        }
        Ok(())
    }

    async fn delete_secondaries(&self, zone: &str) -> Result<()> {
        let fqdn = names::zone_fqdn(zone);
        for (n, secondary) in self.secondaries.iter().enumerate() {
            let op = format!("delete secondary zone {} on secondary {}", fqdn, n + 1);
            match transport::call(
                secondary.transport.as_ref(),
                KIND,
                &op,
                ApiRequest::delete(format!("/servers/{DEFAULT_SERVER_ID}/zones/{fqdn}")),
            )
            .await
            {
                Ok(_) => tracing::info!("{}", op),
                Err(e) if e.is_not_found() => tracing::debug!("{}: already gone", op),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn cryptokeys(&self, zone: &str) -> Result<Vec<Cryptokey>> {
        let response = self
            .call(
                &format!("list cryptokeys of {}", names::zone_root(zone)),
                ApiRequest::get(format!("{}/cryptokeys", self.zone_path(zone))),
            )
            .await?;
        response.json(KIND)
    }
}

fn into_rrset(zone: &str, rrset: PdnsRrset) -> Result<Rrset> {
    let rtype: RecordType = rrset.rtype.parse()?;
    let records: Vec<String> = rrset
        .records
        .into_iter()
        .filter(|r| !r.disabled)
        .map(|r| r.content)
        .collect();
    let priority = if rtype.takes_priority() {
        records.first().and_then(|v| merge::leading_priority(v))
    } else {
        None
    };
    Ok(Rrset {
        subname: names::relative(&rrset.name, zone),
        rtype,
        ttl: rrset.ttl,
        records,
        priority,
        old_value: None,
    })
}

#[async_trait]
impl ZoneProvider for PowerDnsProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn replaces_whole_rrset(&self, _rtype: &RecordType) -> bool {
        true
    }

    async fn create_domain(&self, name: &str) -> Result<DomainCreated> {
        require_name(name, "domain name")?;
        let fqdn = names::zone_fqdn(name);
        let response = self
            .call(
                &format!("create zone {fqdn}"),
                ApiRequest::post(
                    self.zones_path(),
                    json!({
                        "name": fqdn,
                        "kind": self.zone_kind,
                        "nameservers": self.nameservers,
                    }),
                ),
            )
            .await?;
        let created: PdnsZone = response.json(KIND)?;
        tracing::info!("Created PowerDNS zone {} ({})", created.name, self.zone_kind);

        self.create_secondaries(name).await?;
        Ok(DomainCreated {
            zone_id: Some(created.id),
        })
    }

    async fn list_domains(&self) -> Result<Vec<DomainInfo>> {
        let response = self
            .call("list zones", ApiRequest::get(self.zones_path()))
            .await?;
        let zones: Vec<PdnsZone> = response.json(KIND)?;
        Ok(zones
            .into_iter()
            .map(|z| DomainInfo {
                name: names::zone_root(&z.name),
                zone_id: Some(z.id),
                nameservers: Vec::new(),
                dnssec: z.dnssec,
            })
            .collect())
    }

    async fn get_domain(&self, name: &str) -> Result<DomainInfo> {
        require_name(name, "domain name")?;
        let zone = self.zone(name).await?;
        let nameservers = zone
            .rrsets
            .iter()
            .filter(|r| r.rtype == "NS" && names::is_apex(&r.name, name))
            .flat_map(|r| r.records.iter().map(|rec| names::without_trailing_dot(&rec.content)))
            .collect();
        Ok(DomainInfo {
            name: names::zone_root(&zone.name),
            zone_id: Some(zone.id),
            nameservers,
            dnssec: zone.dnssec,
        })
    }

    async fn delete_domain(&self, name: &str) -> Result<()> {
        require_name(name, "domain name")?;
        let fqdn = names::zone_fqdn(name);
        match self
            .call(&format!("delete zone {fqdn}"), ApiRequest::delete(self.zone_path(name)))
            .await
        {
            Ok(_) => {
                tracing::info!("Deleted PowerDNS zone {}", fqdn);
                self.delete_secondaries(name).await
            }
            // Secondaries may still carry the zone when the primary lost it
            Err(e) if e.is_not_found() => {
                self.delete_secondaries(name).await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn export_zonefile(&self, name: &str) -> Result<String> {
        require_name(name, "domain name")?;
        let response = self
            .call(
                &format!("export zone {}", names::zone_root(name)),
                ApiRequest::get(format!("{}/export", self.zone_path(name))),
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

        let mut merged = existing.clone();
        for value in &wanted {
            merged = merge::merge(&rrset.rtype, &merged, MergeOp::Add(value));
        }
        if !existing.is_empty() && merged.len() == existing.len() {
            tracing::debug!(
                "{} {} in {} already holds {:?}",
                rrset.rtype,
                names::relative_or_at(&rrset.subname, zone),
                zone,
                wanted
            );
            return Ok(());
        }
        self.replace(zone, &rrset.subname, &rrset.rtype, rrset.ttl, &merged)
            .await
    }

    async fn retrieve_rrset(&self, zone: &str, subname: &str, rtype: &RecordType) -> Result<Rrset> {
        let name = names::absolute_fqdn(subname, zone);
        let response = self
            .call(
                &format!("get {} {}", rtype, name),
                ApiRequest::get(self.zone_path(zone))
                    .with_query("rrset_name", &name)
                    .with_query("rrset_type", rtype.as_str()),
            )
            .await?;
        let found: PdnsZone = response.json(KIND)?;
        let rrset = found
            .rrsets
            .into_iter()
            .find(|r| r.name.eq_ignore_ascii_case(&name) && r.rtype.eq_ignore_ascii_case(rtype.as_str()))
            .ok_or_else(|| Error::not_found(format!("{rtype} {name}")))?;
        into_rrset(zone, rrset)
    }

    async fn retrieve_all_rrsets(&self, zone: &str) -> Result<Vec<Rrset>> {
        self.zone(zone)
            .await?
            .rrsets
            .into_iter()
            .map(|r| into_rrset(zone, r))
            .collect()
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
        self.replace(zone, subname, rtype, rrset.ttl, &records).await
    }

    async fn modify_bulk_rrsets(&self, zone: &str, payloads: &[RrsetPayload]) -> Result<()> {
        let mut changes = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let rrset = payload.validate()?;
            changes.push(Self::replace_change(
                zone,
                &rrset.subname,
                &rrset.rtype,
                rrset.ttl,
                &rrset.presentation_values()?,
            ));
        }
        let op = format!("bulk replace {} rrsets in {}", changes.len(), names::zone_root(zone));
        self.patch(zone, &op, changes).await
    }

    async fn delete_rrset(
        &self,
        zone: &str,
        subname: &str,
        rtype: &RecordType,
        value: Option<&str>,
    ) -> Result<()> {
        if let Some(value) = value {
            let Some(existing) = self.current(zone, subname, rtype).await? else {
                tracing::debug!("No {} {} in {} to delete", rtype, names::relative_or_at(subname, zone), zone);
                return Ok(());
            };
            let remaining = merge::merge(rtype, &existing.records, MergeOp::Remove(value));
            if remaining.len() == existing.records.len() {
                tracing::debug!("{} is not published in {} {}", value, rtype, names::relative_or_at(subname, zone));
                return Ok(());
            }
            if !remaining.is_empty() {
                return self
                    .replace(zone, subname, rtype, existing.ttl, &remaining)
                    .await;
            }
        }

        let op = format!("delete {} {} in {}", rtype, names::relative_or_at(subname, zone), names::zone_root(zone));
        self.patch(
            zone,
            &op,
            vec![json!({
                "name": names::absolute_fqdn(subname, zone),
                "type": rtype.as_str(),
                "changetype": "DELETE",
            })],
        )
        .await
    }

    async fn enable_dnssec(&self, zone: &str) -> Result<Vec<DsRecord>> {
        let existing = self.cryptokeys(zone).await?;
        if !existing.iter().any(|k| k.active) {
            let op = format!("create cryptokey for {}", names::zone_root(zone));
            self.call(
                &op,
                ApiRequest::post(
                    format!("{}/cryptokeys", self.zone_path(zone)),
                    json!({ "keytype": "csk", "active": true }),
                ),
            )
            .await?;
            tracing::info!("{}", op);

            let op = format!("rectify {}", names::zone_root(zone));
            self.call(&op, ApiRequest::put(format!("{}/rectify", self.zone_path(zone)), json!({})))
                .await?;
        }
        Ok(self.dnssec_status(zone).await?.ds)
    }

    async fn disable_dnssec(&self, zone: &str) -> Result<()> {
        for key in self.cryptokeys(zone).await? {
            let op = format!("delete cryptokey {} of {}", key.id, names::zone_root(zone));
            match self
                .call(
                    &op,
                    ApiRequest::delete(format!("{}/cryptokeys/{}", self.zone_path(zone), key.id)),
                )
                .await
            {
                Ok(_) => tracing::info!("{}", op),
                Err(e) if e.is_not_found() => tracing::debug!("{}: already gone", op),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn dnssec_status(&self, zone: &str) -> Result<DnssecStatus> {
        let keys = self
            .cryptokeys(zone)
            .await?
            .into_iter()
            .map(|k| {
                let meta = k.metadata();
                let ds = if k.active { k.ds } else { Vec::new() };
                (meta, ds)
            })
            .collect();
        Ok(DnssecStatus::from_keys(keys))
    }
}

/// Factory for creating PowerDNS providers
pub struct PowerDnsFactory;

impl ProviderFactory for PowerDnsFactory {
    fn create(&self, config: &ProviderConfig, _index: IdentityIndex) -> Result<Box<dyn ZoneProvider>> {
        match config {
            ProviderConfig::PowerDns {
                api_key,
                api_url,
                server_id,
                nameservers,
                zone_kind,
                secondaries,
            } => Ok(Box::new(PowerDnsProvider::new(
                api_key,
                api_url,
                server_id.clone(),
                nameservers.clone(),
                zone_kind.clone(),
                secondaries,
            )?)),
            _ => Err(Error::config("Invalid config for PowerDNS provider")),
        }
    }
}

/// Register the PowerDNS provider with a registry
pub fn register(registry: &zonebridge_core::ProviderRegistry) {
    registry.register_provider(KIND, Box::new(PowerDnsFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonebridge_core::transport::Method;
    use zonebridge_core::transport::testing::MockTransport;

    const ZONE_PATH: &str = "/servers/localhost/zones/example.com.";

    fn provider() -> (PowerDnsProvider, MockTransport) {
        let mock = MockTransport::new();
        let provider = PowerDnsProvider::with_transport(
            Arc::new(mock.clone()),
            None,
            vec!["ns1.example.net".into(), "ns2.example.net.".into()],
            None,
        );
        (provider, mock)
    }

    fn zone_with(rrsets: Value) -> Value {
        json!({ "id": "example.com.", "name": "example.com.", "rrsets": rrsets })
    }

    #[test]
    fn test_url_helpers() {
        assert_eq!(api_base("http://10.0.0.1:8081"), "http://10.0.0.1:8081/api/v1");
        assert_eq!(api_base("http://10.0.0.1:8081/api/v1/"), "http://10.0.0.1:8081/api/v1");
        assert_eq!(url_host("http://10.0.0.1:8081/api/v1"), "10.0.0.1");
        assert_eq!(url_host("https://[2001:db8::1]:8081"), "2001:db8::1");
        assert_eq!(url_host("ns1.example.net"), "ns1.example.net");
    }

    #[tokio::test]
    async fn test_create_domain_with_secondaries() {
        let (provider, mock) = provider();
        let secondary = MockTransport::new();
        let provider = provider.with_secondary(Arc::new(secondary.clone()), "192.0.2.53");

        mock.on_json(Method::Post, "/servers/localhost/zones", 201, zone_with(json!([])));
        secondary.on_json(Method::Post, "/servers/localhost/zones", 201, zone_with(json!([])));

        let created = provider.create_domain("Example.com").await.unwrap();
        assert_eq!(created.zone_id.as_deref(), Some("example.com."));

        let body = mock.requests()[0].body.clone().unwrap();
        assert_eq!(body["name"], "example.com.");
        assert_eq!(body["kind"], "Native");
        assert_eq!(body["nameservers"], json!(["ns1.example.net.", "ns2.example.net."]));

        let body = secondary.requests()[0].body.clone().unwrap();
        assert_eq!(body["kind"], "Slave");
        assert_eq!(body["masters"], json!(["192.0.2.53"]));
    }

    #[tokio::test]
    async fn test_create_domain_conflict() {
        let (provider, mock) = provider();
        mock.on(Method::Post, "/servers/localhost/zones", 409, r#"{"error":"Conflict"}"#);
        assert!(matches!(
            provider.create_domain("example.com").await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_create_domain_existing_secondary() {
        let (provider, mock) = provider();
        let secondary = MockTransport::new();
        let provider = provider.with_secondary(Arc::new(secondary.clone()), "192.0.2.53");

        mock.on_json(Method::Post, "/servers/localhost/zones", 201, zone_with(json!([])));
        secondary.on(Method::Post, "/servers/localhost/zones", 409, r#"{"error":"Conflict"}"#);

        let created = provider.create_domain("example.com").await.unwrap();
        assert_eq!(created.zone_id.as_deref(), Some("example.com."));
        assert_eq!(secondary.count(Method::Post), 1);
    }

    #[tokio::test]
    async fn test_create_domain_secondary_failure_names_primary() {
        let (provider, mock) = provider();
        let secondary = MockTransport::new();
        let provider = provider.with_secondary(Arc::new(secondary.clone()), "192.0.2.53");

        mock.on_json(Method::Post, "/servers/localhost/zones", 201, zone_with(json!([])));
        secondary.on(Method::Post, "/servers/localhost/zones", 422, r#"{"error":"bad master"}"#);

        let err = provider.create_domain("example.com").await.unwrap_err();
        assert!(err.to_string().contains("primary zone example.com. was created"));
    }

    #[tokio::test]
    async fn test_delete_domain_missing_primary_cleans_secondaries() {
        let (provider, mock) = provider();
        let secondary = MockTransport::new();
        let provider = provider.with_secondary(Arc::new(secondary.clone()), "192.0.2.53");

        mock.on(Method::Delete, ZONE_PATH, 404, r#"{"error":"Not Found"}"#);
        secondary.on(Method::Delete, ZONE_PATH, 204, "");

        let result = provider.delete_domain("example.com").await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(secondary.requests_to(Method::Delete, ZONE_PATH).len(), 1);
    }

    #[tokio::test]
    async fn test_create_rrset_merges_and_replaces() {
        let (provider, mock) = provider();
        mock.on_json(
            Method::Get,
            ZONE_PATH,
            200,
            zone_with(json!([{
                "name": "www.example.com.",
                "type": "A",
                "ttl": 3600,
                "records": [{ "content": "203.0.113.10", "disabled": false }]
            }])),
        );
        mock.on(Method::Patch, ZONE_PATH, 204, "");

        let payload = RrsetPayload::new("www", RecordType::A, 3600, vec!["203.0.113.11".into()]);
        provider.create_rrset("example.com", &payload).await.unwrap();

        let get = mock.requests_to(Method::Get, ZONE_PATH)[0].clone();
        assert_eq!(get.query_value("rrset_name"), Some("www.example.com."));

        let patch = mock.requests_to(Method::Patch, ZONE_PATH)[0].body.clone().unwrap();
        let change = &patch["rrsets"][0];
        assert_eq!(change["name"], "www.example.com.");
        assert_eq!(change["changetype"], "REPLACE");
        assert_eq!(change["records"][0]["content"], "203.0.113.10");
        assert_eq!(change["records"][1]["content"], "203.0.113.11");
    }

    #[tokio::test]
    async fn test_create_apex_mx() {
        let (provider, mock) = provider();
        mock.on_json(Method::Get, ZONE_PATH, 200, zone_with(json!([])));
        mock.on(Method::Patch, ZONE_PATH, 204, "");

        let payload = RrsetPayload::new("", RecordType::Mx, 3600, vec!["mail.example.com".into()])
            .with_priority(Some(10));
        provider.create_rrset("example.com", &payload).await.unwrap();

        let patch = mock.requests_to(Method::Patch, ZONE_PATH)[0].body.clone().unwrap();
        assert_eq!(patch["rrsets"][0]["name"], "example.com.");
        assert_eq!(patch["rrsets"][0]["records"][0]["content"], "10 mail.example.com.");
    }

    #[tokio::test]
    async fn test_delete_value_keeps_remainder() {
        let (provider, mock) = provider();
        mock.on_json(
            Method::Get,
            ZONE_PATH,
            200,
            zone_with(json!([{
                "name": "www.example.com.",
                "type": "A",
                "ttl": 300,
                "records": [
                    { "content": "203.0.113.10", "disabled": false },
                    { "content": "203.0.113.11", "disabled": false }
                ]
            }])),
        );
        mock.on(Method::Patch, ZONE_PATH, 204, "");

        provider
            .delete_rrset("example.com", "www", &RecordType::A, Some("203.0.113.10"))
            .await
            .unwrap();

        let patch = mock.requests_to(Method::Patch, ZONE_PATH)[0].body.clone().unwrap();
        let change = &patch["rrsets"][0];
        assert_eq!(change["changetype"], "REPLACE");
        assert_eq!(change["ttl"], 300);
        assert_eq!(change["records"].as_array().unwrap().len(), 1);
        assert_eq!(change["records"][0]["content"], "203.0.113.11");
    }

    #[tokio::test]
    async fn test_delete_absent_value_is_noop() {
        let (provider, mock) = provider();
        mock.on_json(Method::Get, ZONE_PATH, 200, zone_with(json!([])));

        provider
            .delete_rrset("example.com", "www", &RecordType::A, Some("203.0.113.10"))
            .await
            .unwrap();
        assert_eq!(mock.count(Method::Patch), 0);
    }

    #[tokio::test]
    async fn test_delete_whole_rrset() {
        let (provider, mock) = provider();
        mock.on(Method::Patch, ZONE_PATH, 204, "");

        provider
            .delete_rrset("example.com", "", &RecordType::Txt, None)
            .await
            .unwrap();
        let patch = mock.requests_to(Method::Patch, ZONE_PATH)[0].body.clone().unwrap();
        assert_eq!(patch["rrsets"][0]["changetype"], "DELETE");
        assert_eq!(patch["rrsets"][0]["name"], "example.com.");
    }

    #[tokio::test]
    async fn test_dnssec_lifecycle() {
        let (provider, mock) = provider();
        let keys_path = format!("{ZONE_PATH}/cryptokeys");
        mock.on(Method::Get, &keys_path, 200, "[]");
        mock.on_json(
            Method::Get,
            &keys_path,
            200,
            json!([{
                "id": 7,
                "keytype": "csk",
                "active": true,
                "flags": 257,
                "algorithm": "ECDSAP256SHA256",
                "dnskey": "257 3 13 mdsswUyr3DPW132mOi8V9xESWE8jTo0d",
                "ds": ["2371 13 2 1f98c2a0ffe1", "2371 13 4 a4ab7ef9"]
            }]),
        );
        mock.on(Method::Post, &keys_path, 201, "{}");
        mock.on(Method::Put, &format!("{ZONE_PATH}/rectify"), 200, r#"{"result":"Rectified"}"#);
        mock.on(Method::Delete, &format!("{keys_path}/7"), 204, "");

        let ds = provider.enable_dnssec("example.com").await.unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds[0].key_tag, 2371);
        assert_eq!(mock.count(Method::Post), 1);

        let status = provider.dnssec_status("example.com").await.unwrap();
        assert!(status.enabled);
        assert_eq!(status.keys[0].key_tag, Some(2371));

        provider.disable_dnssec("example.com").await.unwrap();
        assert_eq!(mock.count(Method::Delete), 1);
    }

    #[test]
    fn test_api_key_not_exposed_in_debug() {
        let provider = PowerDnsProvider::new(
            "pdns_secret",
            "http://127.0.0.1:8081",
            None,
            Vec::new(),
            None,
            &[SecondaryServer {
                api_url: "http://127.0.0.2:8081".into(),
                api_key: "secondary_secret".into(),
                primary_address: None,
            }],
        )
        .unwrap();
        let debug_str = format!("{:?}", provider);
        assert!(!debug_str.contains("pdns_secret"));
        assert!(!debug_str.contains("secondary_secret"));
        assert_eq!(provider.secondaries[0].primary, "127.0.0.1");
    }
}
