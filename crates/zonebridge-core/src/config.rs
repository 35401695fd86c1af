//! Provider configuration
//!
//! A configuration descriptor names a provider (the discriminator) and
//! carries that provider's credentials and options. It is validated before
//! any adapter is constructed, so a missing credential never costs a
//! network round trip.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Maximum number of secondary servers for replicated setups
pub const MAX_SECONDARIES: usize = 12;

/// Supported provider discriminators
///
/// `bind` and `anycastdns` have no adapter and parse as
/// [`Error::UnknownProvider`], like any other unrecognized name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Desec,
    PowerDns,
    Cloudflare,
    Hetzner,
    Vultr,
    Dnsimple,
    Cloudns,
}

impl ProviderKind {
    /// All supported discriminators
    pub const ALL: [ProviderKind; 7] = [
        ProviderKind::Desec,
        ProviderKind::PowerDns,
        ProviderKind::Cloudflare,
        ProviderKind::Hetzner,
        ProviderKind::Vultr,
        ProviderKind::Dnsimple,
        ProviderKind::Cloudns,
    ];

    /// Wire name (e.g. "powerdns")
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Desec => "desec",
            ProviderKind::PowerDns => "powerdns",
            ProviderKind::Cloudflare => "cloudflare",
            ProviderKind::Hetzner => "hetzner",
            ProviderKind::Vultr => "vultr",
            ProviderKind::Dnsimple => "dnsimple",
            ProviderKind::Cloudns => "cloudns",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|k| k.as_str() == lower)
            .ok_or_else(|| Error::unknown_provider(s.trim()))
    }
}

/// A secondary authoritative server receiving the zone from the primary
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryServer {
    /// API base URL of the secondary
    pub api_url: String,
    /// API key of the secondary
    pub api_key: String,
    /// Address the secondary transfers from (defaults to the primary host)
    #[serde(default)]
    pub primary_address: Option<String>,
}

impl fmt::Debug for SecondaryServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecondaryServer")
            .field("api_url", &self.api_url)
            .field("api_key", &"<REDACTED>")
            .field("primary_address", &self.primary_address)
            .finish()
    }
}

/// Provider configuration descriptor
///
/// Serialized form is a JSON object whose `provider` key selects the variant.
/// This is also the config blob persisted with each zone.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// deSEC
    Desec {
        #[serde(default)]
        api_key: String,
        #[serde(default)]
        api_url: Option<String>,
    },

    /// PowerDNS authoritative server (optionally with secondaries)
    #[serde(rename = "powerdns")]
    PowerDns {
        #[serde(default)]
        api_key: String,
        #[serde(default)]
        api_url: String,
        #[serde(default)]
        server_id: Option<String>,
        /// NS records to create at the apex on zone creation
        #[serde(default)]
        nameservers: Vec<String>,
        /// "Native" or "Master"
        #[serde(default)]
        zone_kind: Option<String>,
        #[serde(default)]
        secondaries: Vec<SecondaryServer>,
    },

    /// Cloudflare
    Cloudflare {
        #[serde(default)]
        api_token: String,
        #[serde(default)]
        account_id: Option<String>,
        #[serde(default)]
        api_url: Option<String>,
    },

    /// Hetzner DNS
    Hetzner {
        #[serde(default)]
        api_key: String,
        #[serde(default)]
        api_url: Option<String>,
    },

    /// Vultr
    Vultr {
        #[serde(default)]
        api_key: String,
        #[serde(default)]
        api_url: Option<String>,
    },

    /// DNSimple
    Dnsimple {
        #[serde(default)]
        api_token: String,
        #[serde(default)]
        account_id: String,
        #[serde(default)]
        api_url: Option<String>,
    },

    /// ClouDNS
    Cloudns {
        #[serde(default)]
        auth_id: String,
        #[serde(default)]
        auth_password: String,
        /// Authenticate as a sub-user (`sub-auth-id`)
        #[serde(default)]
        sub_auth: bool,
        #[serde(default)]
        api_url: Option<String>,
    },
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Credentials are never printed
        let mut d = f.debug_struct("ProviderConfig");
        d.field("provider", &self.kind());
        match self {
            ProviderConfig::PowerDns {
                api_url,
                server_id,
                nameservers,
                secondaries,
                ..
            } => {
                d.field("api_url", api_url)
                    .field("server_id", server_id)
                    .field("nameservers", nameservers)
                    .field("secondaries", secondaries);
            }
            ProviderConfig::Cloudflare { account_id, .. } => {
                d.field("account_id", account_id);
            }
            ProviderConfig::Dnsimple { account_id, .. } => {
                d.field("account_id", account_id);
            }
            _ => {}
        }
        d.field("credentials", &"<REDACTED>").finish()
    }
}

fn required(provider: ProviderKind, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::missing_credential(provider.as_str(), field));
    }
    Ok(())
}

impl ProviderConfig {
    /// Provider discriminator
    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderConfig::Desec { .. } => ProviderKind::Desec,
            ProviderConfig::PowerDns { .. } => ProviderKind::PowerDns,
            ProviderConfig::Cloudflare { .. } => ProviderKind::Cloudflare,
            ProviderConfig::Hetzner { .. } => ProviderKind::Hetzner,
            ProviderConfig::Vultr { .. } => ProviderKind::Vultr,
            ProviderConfig::Dnsimple { .. } => ProviderKind::Dnsimple,
            ProviderConfig::Cloudns { .. } => ProviderKind::Cloudns,
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Check that every required credential is present and non-empty
    pub fn validate(&self) -> Result<()> {
        let kind = self.kind();
        match self {
            ProviderConfig::Desec { api_key, .. }
            | ProviderConfig::Hetzner { api_key, .. }
            | ProviderConfig::Vultr { api_key, .. } => required(kind, "api_key", api_key),
            ProviderConfig::PowerDns {
                api_key,
                api_url,
                secondaries,
                zone_kind,
                ..
            } => {
                required(kind, "api_key", api_key)?;
                required(kind, "api_url", api_url)?;
                if secondaries.len() > MAX_SECONDARIES {
                    return Err(Error::config(format!(
                        "at most {} secondary servers are supported, got {}",
                        MAX_SECONDARIES,
                        secondaries.len()
                    )));
                }
                for (i, s) in secondaries.iter().enumerate() {
                    required(kind, &format!("secondary_url_{}", i + 1), &s.api_url)?;
                    required(kind, &format!("secondary_api_key_{}", i + 1), &s.api_key)?;
                }
                if let Some(zk) = zone_kind
                    && !matches!(zk.as_str(), "Native" | "Master")
                {
                    return Err(Error::config(format!(
                        "zone_kind must be Native or Master, got '{zk}'"
                    )));
                }
                Ok(())
            }
            ProviderConfig::Cloudflare { api_token, .. } => {
                required(kind, "api_token", api_token)
            }
            ProviderConfig::Dnsimple {
                api_token,
                account_id,
                ..
            } => {
                required(kind, "api_token", api_token)?;
                required(kind, "account_id", account_id)
            }
            ProviderConfig::Cloudns {
                auth_id,
                auth_password,
                ..
            } => {
                required(kind, "auth_id", auth_id)?;
                required(kind, "auth_password", auth_password)
            }
        }
    }

    /// Parse a JSON configuration object
    ///
    /// The `provider` discriminator is checked first so an unrecognized
    /// value is reported as [`Error::UnknownProvider`] rather than a
    /// generic deserialization failure.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let name = value
            .get("provider")
            .and_then(|p| p.as_str())
            .ok_or_else(|| Error::missing_field("provider"))?;
        let kind: ProviderKind = name.parse()?;

        let mut value = value;
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "provider".to_string(),
                serde_json::Value::String(kind.as_str().to_string()),
            );
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Parse a flat string map (environment/CLI form)
    ///
    /// Lists (`nameservers`) are comma-separated. Secondary servers are given
    /// as indexed pairs `secondary_url_N` / `secondary_api_key_N` (with
    /// optional `secondary_primary_address_N`) for N in 1..=12.
    pub fn from_flat(map: &HashMap<String, String>) -> Result<Self> {
        let mut obj = serde_json::Map::new();
        let mut secondaries: Vec<(usize, SecondaryServer)> = Vec::new();

        for (key, value) in map {
            let key = key.to_ascii_lowercase();
            if let Some((field, index)) = parse_indexed_secondary(&key)? {
                let pos = match secondaries.iter().position(|(i, _)| *i == index) {
                    Some(pos) => pos,
                    None => {
                        secondaries.push((
                            index,
                            SecondaryServer {
                                api_url: String::new(),
                                api_key: String::new(),
                                primary_address: None,
                            },
                        ));
                        secondaries.len() - 1
                    }
                };
                let entry = &mut secondaries[pos].1;
                match field {
                    SecondaryField::Url => entry.api_url = value.clone(),
                    SecondaryField::ApiKey => entry.api_key = value.clone(),
                    SecondaryField::PrimaryAddress => {
                        entry.primary_address = Some(value.clone())
                    }
                }
                continue;
            }

            let json_value = match key.as_str() {
                "nameservers" => serde_json::Value::Array(
                    value
                        .split(',')
                        .map(|s| s.trim())
                        .filter(|s| !s.is_empty())
                        .map(|s| serde_json::Value::String(s.to_string()))
                        .collect(),
                ),
                "sub_auth" => serde_json::Value::Bool(matches!(
                    value.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes"
                )),
                _ => serde_json::Value::String(value.clone()),
            };
            obj.insert(key, json_value);
        }

        if !secondaries.is_empty() {
            secondaries.sort_by_key(|(i, _)| *i);
            let list: Vec<SecondaryServer> = secondaries.into_iter().map(|(_, s)| s).collect();
            obj.insert("secondaries".to_string(), serde_json::to_value(list)?);
        }

        Self::from_value(serde_json::Value::Object(obj))
    }
}

enum SecondaryField {
    Url,
    ApiKey,
    PrimaryAddress,
}

fn parse_indexed_secondary(key: &str) -> Result<Option<(SecondaryField, usize)>> {
    let (field, rest) = if let Some(rest) = key.strip_prefix("secondary_url_") {
        (SecondaryField::Url, rest)
    } else if let Some(rest) = key.strip_prefix("secondary_api_key_") {
        (SecondaryField::ApiKey, rest)
    } else if let Some(rest) = key.strip_prefix("secondary_primary_address_") {
        (SecondaryField::PrimaryAddress, rest)
    } else {
        return Ok(None);
    };
    let index: usize = rest
        .parse()
        .map_err(|_| Error::config(format!("invalid secondary index in '{key}'")))?;
    if index == 0 || index > MAX_SECONDARIES {
        return Err(Error::config(format!(
            "secondary index must be between 1 and {MAX_SECONDARIES}, got {index}"
        )));
    }
    Ok(Some((field, index)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("PowerDNS".parse::<ProviderKind>().unwrap(), ProviderKind::PowerDns);
        assert!(matches!(
            "route53".parse::<ProviderKind>(),
            Err(Error::UnknownProvider(name)) if name == "route53"
        ));
    }

    #[test]
    fn test_unbuilt_kinds_are_unknown() {
        for name in ["bind", "anycastdns"] {
            assert!(matches!(
                name.parse::<ProviderKind>(),
                Err(Error::UnknownProvider(n)) if n == name
            ));
            let err = ProviderConfig::from_value(serde_json::json!({"provider": name})).unwrap_err();
            assert!(matches!(err, Error::UnknownProvider(_)));
        }
    }

    #[test]
    fn test_from_value_unknown_provider() {
        let err = ProviderConfig::from_value(serde_json::json!({"provider": "bogus"})).unwrap_err();
        assert!(matches!(err, Error::UnknownProvider(_)));

        let err = ProviderConfig::from_value(serde_json::json!({"api_key": "x"})).unwrap_err();
        assert!(matches!(err, Error::MissingField(_)));
    }

    #[test]
    fn test_missing_credential() {
        let cfg = ProviderConfig::from_value(serde_json::json!({"provider": "hetzner"})).unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(Error::MissingCredential { provider, field }) if provider == "hetzner" && field == "api_key"
        ));

        let cfg = ProviderConfig::from_value(
            serde_json::json!({"provider": "dnsimple", "api_token": "t"}),
        )
        .unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(Error::MissingCredential { field, .. }) if field == "account_id"
        ));
    }

    #[test]
    fn test_flat_secondaries() {
        let cfg = ProviderConfig::from_flat(&flat(&[
            ("provider", "powerdns"),
            ("api_key", "k"),
            ("api_url", "http://127.0.0.1:8081/api/v1"),
            ("nameservers", "ns1.example.net., ns2.example.net."),
            ("secondary_url_2", "http://10.0.0.3:8081/api/v1"),
            ("secondary_api_key_2", "k3"),
            ("secondary_url_1", "http://10.0.0.2:8081/api/v1"),
            ("secondary_api_key_1", "k2"),
        ]))
        .unwrap();
        cfg.validate().unwrap();
        match cfg {
            ProviderConfig::PowerDns {
                nameservers,
                secondaries,
                ..
            } => {
                assert_eq!(nameservers.len(), 2);
                assert_eq!(secondaries.len(), 2);
                assert_eq!(secondaries[0].api_key, "k2");
                assert_eq!(secondaries[1].api_key, "k3");
            }
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn test_flat_secondary_index_bounds() {
        let err = ProviderConfig::from_flat(&flat(&[
            ("provider", "powerdns"),
            ("secondary_url_13", "http://x"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_half_specified_secondary() {
        let cfg = ProviderConfig::from_flat(&flat(&[
            ("provider", "powerdns"),
            ("api_key", "k"),
            ("api_url", "http://127.0.0.1:8081/api/v1"),
            ("secondary_url_1", "http://10.0.0.2:8081/api/v1"),
        ]))
        .unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(Error::MissingCredential { field, .. }) if field == "secondary_api_key_1"
        ));
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let cfg = ProviderConfig::Cloudflare {
            api_token: "secret_token_12345".into(),
            account_id: Some("acc".into()),
            api_url: None,
        };
        let debug_str = format!("{cfg:?}");
        assert!(!debug_str.contains("secret_token_12345"));
        assert!(debug_str.contains("Cloudflare"));
    }

    #[test]
    fn test_config_blob_round_trip() {
        let cfg = ProviderConfig::Desec {
            api_key: "k".into(),
            api_url: None,
        };
        let blob = serde_json::to_value(&cfg).unwrap();
        assert_eq!(blob["provider"], "desec");
        assert_eq!(ProviderConfig::from_value(blob).unwrap(), cfg);
    }
}
