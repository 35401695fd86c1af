//! Record model shared by adapters and the orchestration service
//!
//! - [`RecordType`]: closed set of record types, converted to/from the wire
//!   string only at the boundary
//! - [`RrsetPayload`]: the loosely-filled request shape handed to adapters
//! - [`Rrset`]: a validated payload (every required field present)
//! - DNSSEC result types: [`DsRecord`], [`DnssecKey`], [`DnssecStatus`]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// DNS record type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecordType {
    A,
    Aaaa,
    Caa,
    Cname,
    Ds,
    Mx,
    Ns,
    Ptr,
    Soa,
    Spf,
    Srv,
    Tlsa,
    Txt,
    /// Provider-specific type passed through verbatim (uppercased)
    Other(String),
}

impl RecordType {
    /// Wire representation (e.g. "AAAA")
    pub fn as_str(&self) -> &str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Caa => "CAA",
            RecordType::Cname => "CNAME",
            RecordType::Ds => "DS",
            RecordType::Mx => "MX",
            RecordType::Ns => "NS",
            RecordType::Ptr => "PTR",
            RecordType::Soa => "SOA",
            RecordType::Spf => "SPF",
            RecordType::Srv => "SRV",
            RecordType::Tlsa => "TLSA",
            RecordType::Txt => "TXT",
            RecordType::Other(s) => s,
        }
    }

    /// MX and SRV carry a priority
    pub fn takes_priority(&self) -> bool {
        matches!(self, RecordType::Mx | RecordType::Srv)
    }

    /// TXT and SPF values are quoted character strings
    pub fn is_quoted_text(&self) -> bool {
        matches!(self, RecordType::Txt | RecordType::Spf)
    }

    /// Types whose value is a hostname (trailing dot is significant to some providers)
    pub fn is_hostname_target(&self) -> bool {
        matches!(
            self,
            RecordType::Cname | RecordType::Mx | RecordType::Ns | RecordType::Ptr | RecordType::Srv
        )
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        if upper.is_empty() {
            return Err(Error::missing_field("type"));
        }
        Ok(match upper.as_str() {
            "A" => RecordType::A,
            "AAAA" => RecordType::Aaaa,
            "CAA" => RecordType::Caa,
            "CNAME" => RecordType::Cname,
            "DS" => RecordType::Ds,
            "MX" => RecordType::Mx,
            "NS" => RecordType::Ns,
            "PTR" => RecordType::Ptr,
            "SOA" => RecordType::Soa,
            "SPF" => RecordType::Spf,
            "SRV" => RecordType::Srv,
            "TLSA" => RecordType::Tlsa,
            "TXT" => RecordType::Txt,
            _ => RecordType::Other(upper),
        })
    }
}

impl From<String> for RecordType {
    fn from(s: String) -> Self {
        s.parse()
            .unwrap_or_else(|_| RecordType::Other(s.to_ascii_uppercase()))
    }
}

impl From<RecordType> for String {
    fn from(t: RecordType) -> Self {
        t.as_str().to_string()
    }
}

/// Canonical RRset request passed into adapters
///
/// Fields are optional so that incomplete caller input can be reported as
/// [`Error::MissingField`] instead of being impossible to express.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RrsetPayload {
    /// Relative name; "" or "@" denotes the apex
    pub subname: Option<String>,
    /// Record type
    #[serde(rename = "type")]
    pub rtype: Option<RecordType>,
    /// TTL in seconds
    pub ttl: Option<u32>,
    /// Ordered values
    #[serde(default)]
    pub records: Vec<String>,
    /// Priority for MX/SRV
    #[serde(default)]
    pub priority: Option<u16>,
    /// Previous value, for providers that locate records by content
    #[serde(default)]
    pub old_value: Option<String>,
}

impl RrsetPayload {
    /// Create a payload with every required field set
    pub fn new(
        subname: impl Into<String>,
        rtype: RecordType,
        ttl: u32,
        records: Vec<String>,
    ) -> Self {
        Self {
            subname: Some(subname.into()),
            rtype: Some(rtype),
            ttl: Some(ttl),
            records,
            priority: None,
            old_value: None,
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: Option<u16>) -> Self {
        self.priority = priority;
        self
    }

    /// Set the previous value
    pub fn with_old_value(mut self, old_value: impl Into<String>) -> Self {
        self.old_value = Some(old_value.into());
        self
    }

    /// Check that subname, type, ttl and records are all present
    pub fn validate(&self) -> Result<Rrset> {
        let subname = self
            .subname
            .as_ref()
            .ok_or_else(|| Error::missing_field("subname"))?;
        let rtype = self
            .rtype
            .clone()
            .ok_or_else(|| Error::missing_field("type"))?;
        let ttl = match self.ttl {
            Some(ttl) if ttl > 0 => ttl,
            _ => return Err(Error::missing_field("ttl")),
        };
        let records: Vec<String> = self
            .records
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if records.is_empty() {
            return Err(Error::missing_field("records"));
        }

        Ok(Rrset {
            subname: subname.trim().to_string(),
            rtype,
            ttl,
            records,
            priority: self.priority,
            old_value: self
                .old_value
                .as_ref()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        })
    }
}

/// A validated RRset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rrset {
    pub subname: String,
    #[serde(rename = "type")]
    pub rtype: RecordType,
    pub ttl: u32,
    pub records: Vec<String>,
    pub priority: Option<u16>,
    pub old_value: Option<String>,
}

impl Rrset {
    /// Resolve the priority for MX/SRV
    ///
    /// Order: explicit priority, leading numeric token of the first value,
    /// then `default` when the provider allows one. Non-priority types
    /// resolve to `None`.
    pub fn resolve_priority(&self, default: Option<u16>) -> Result<Option<u16>> {
        if !self.rtype.takes_priority() {
            return Ok(None);
        }
        if let Some(p) = self.priority {
            return Ok(Some(p));
        }
        if let Some(p) = self
            .records
            .first()
            .and_then(|v| crate::merge::leading_priority(v))
        {
            return Ok(Some(p));
        }
        default
            .map(Some)
            .ok_or_else(|| Error::missing_field(format!("priority for {} record", self.rtype)))
    }

    /// Split one value into provider content and priority
    ///
    /// MX values lose their leading priority token and trailing dot; the
    /// priority comes from that token, then the explicit priority, then
    /// `default`. SRV keeps its value and resolves the priority the same way
    /// without requiring one. Other types pass through unchanged.
    pub fn split_value(&self, value: &str, default: Option<u16>) -> Result<(String, Option<u16>)> {
        let leading = crate::merge::leading_priority(value);
        match self.rtype {
            RecordType::Mx => {
                let priority = leading
                    .or(self.priority)
                    .or(default)
                    .ok_or_else(|| Error::missing_field("priority for MX record"))?;
                Ok((crate::merge::mx_content(value), Some(priority)))
            }
            RecordType::Srv => Ok((value.trim().to_string(), self.priority.or(leading).or(default))),
            _ => Ok((value.trim().to_string(), None)),
        }
    }

    /// One value in zone-file presentation form
    ///
    /// Hostname targets get a trailing dot, TXT/SPF are quoted, MX becomes
    /// "<priority> <host>." and SRV gains the explicit priority when the
    /// value only holds weight, port and target.
    pub fn presentation(&self, value: &str) -> Result<String> {
        let value = value.trim();
        Ok(match &self.rtype {
            RecordType::Mx => {
                let (host, priority) = self.split_value(value, None)?;
                format!(
                    "{} {}",
                    priority.unwrap_or_default(),
                    crate::names::with_trailing_dot(&host)
                )
            }
            RecordType::Srv => {
                let mut tokens: Vec<String> = value.split_whitespace().map(str::to_string).collect();
                if tokens.len() == 3
                    && let Some(p) = self.priority
                {
                    tokens.insert(0, p.to_string());
                }
                if let Some(target) = tokens.last_mut() {
                    *target = crate::names::with_trailing_dot(target);
                }
                tokens.join(" ")
            }
            RecordType::Cname | RecordType::Ns | RecordType::Ptr => {
                crate::names::with_trailing_dot(value)
            }
            t if t.is_quoted_text() => crate::merge::quote(value),
            _ => value.to_string(),
        })
    }

    /// Every value in presentation form, duplicates dropped
    pub fn presentation_values(&self) -> Result<Vec<String>> {
        let values = self
            .records
            .iter()
            .map(|v| self.presentation(v))
            .collect::<Result<Vec<_>>>()?;
        Ok(crate::merge::dedup(&self.rtype, &values))
    }
}

/// Identifying data returned by a successful zone creation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainCreated {
    /// Provider-assigned zone id, for providers that expose one
    pub zone_id: Option<String>,
}

/// Zone as reported by a provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub name: String,
    pub zone_id: Option<String>,
    #[serde(default)]
    pub nameservers: Vec<String>,
    pub dnssec: Option<bool>,
}

/// Delegation Signer record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DsRecord {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: String,
}

impl DsRecord {
    /// Parse presentation format, optionally prefixed by owner/class/type
    ///
    /// Accepts "2371 13 2 1F98..." as well as
    /// "example.com. 3600 IN DS 2371 13 2 1F98...".
    pub fn parse(input: &str) -> Option<Self> {
        let tokens: Vec<&str> = input.split_whitespace().collect();
        let start = tokens
            .iter()
            .position(|t| t.eq_ignore_ascii_case("DS"))
            .map(|i| i + 1)
            .unwrap_or(0);
        let rest = tokens.get(start..)?;
        if rest.len() < 4 {
            return None;
        }
        Some(Self {
            key_tag: rest[0].parse().ok()?,
            algorithm: rest[1].parse().ok()?,
            digest_type: rest[2].parse().ok()?,
            digest: rest[3..].concat().to_ascii_uppercase(),
        })
    }
}

impl fmt::Display for DsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.key_tag, self.algorithm, self.digest_type, self.digest
        )
    }
}

/// Drop duplicate DS records, keeping first occurrence order
pub fn dedup_ds(records: impl IntoIterator<Item = DsRecord>) -> Vec<DsRecord> {
    let mut out: Vec<DsRecord> = Vec::new();
    for ds in records {
        if !out.contains(&ds) {
            out.push(ds);
        }
    }
    out
}

/// Signing key metadata as reported by a provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnssecKey {
    pub key_tag: Option<u16>,
    pub algorithm: Option<String>,
    pub flags: Option<u16>,
    pub public_key: Option<String>,
    pub active: bool,
}

/// DNSSEC state of a zone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnssecStatus {
    pub enabled: bool,
    pub ds: Vec<DsRecord>,
    pub keys: Vec<DnssecKey>,
}

impl DnssecStatus {
    /// Build a status from key metadata paired with the DS strings each key carries
    ///
    /// DNSSEC counts as enabled when at least one key has a non-empty DS entry.
    pub fn from_keys(keys: Vec<(DnssecKey, Vec<String>)>) -> Self {
        let mut ds = Vec::new();
        let mut out_keys = Vec::with_capacity(keys.len());
        for (key, ds_strings) in keys {
            ds.extend(ds_strings.iter().filter_map(|s| DsRecord::parse(s)));
            out_keys.push(key);
        }
        let ds = dedup_ds(ds);
        Self {
            enabled: !ds.is_empty(),
            ds,
            keys: out_keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_parse() {
        assert_eq!("aaaa".parse::<RecordType>().unwrap(), RecordType::Aaaa);
        assert_eq!(" mx ".parse::<RecordType>().unwrap(), RecordType::Mx);
        assert_eq!(
            "svcb".parse::<RecordType>().unwrap(),
            RecordType::Other("SVCB".to_string())
        );
        assert!("".parse::<RecordType>().is_err());
        assert_eq!(RecordType::Txt.to_string(), "TXT");
    }

    #[test]
    fn test_record_type_serde() {
        let json = serde_json::to_string(&RecordType::Cname).unwrap();
        assert_eq!(json, "\"CNAME\"");
        let t: RecordType = serde_json::from_str("\"txt\"").unwrap();
        assert_eq!(t, RecordType::Txt);
    }

    #[test]
    fn test_payload_validation() {
        let ok = RrsetPayload::new("www", RecordType::A, 3600, vec!["192.0.2.1".into()]);
        assert!(ok.validate().is_ok());

        let mut missing_ttl = ok.clone();
        missing_ttl.ttl = None;
        assert!(matches!(missing_ttl.validate(), Err(Error::MissingField(f)) if f == "ttl"));

        let mut missing_sub = ok.clone();
        missing_sub.subname = None;
        assert!(matches!(missing_sub.validate(), Err(Error::MissingField(f)) if f == "subname"));

        let blank = RrsetPayload::new("www", RecordType::A, 3600, vec!["  ".into()]);
        assert!(matches!(blank.validate(), Err(Error::MissingField(f)) if f == "records"));

        // Empty subname is the apex, not a missing field
        let apex = RrsetPayload::new("", RecordType::A, 3600, vec!["192.0.2.1".into()]);
        assert_eq!(apex.validate().unwrap().subname, "");
    }

    #[test]
    fn test_resolve_priority() {
        let mx = RrsetPayload::new("@", RecordType::Mx, 3600, vec!["mail.example.com".into()])
            .validate()
            .unwrap();
        assert!(mx.resolve_priority(None).is_err());
        assert_eq!(mx.resolve_priority(Some(10)).unwrap(), Some(10));

        let mx = RrsetPayload::new("@", RecordType::Mx, 3600, vec!["20 mail.example.com".into()])
            .validate()
            .unwrap();
        assert_eq!(mx.resolve_priority(None).unwrap(), Some(20));

        let a = RrsetPayload::new("@", RecordType::A, 3600, vec!["192.0.2.1".into()])
            .with_priority(Some(5))
            .validate()
            .unwrap();
        assert_eq!(a.resolve_priority(None).unwrap(), None);
    }

    #[test]
    fn test_presentation_values() {
        let mx = RrsetPayload::new(
            "@",
            RecordType::Mx,
            3600,
            vec!["10 mail.example.com".into(), "mail.example.com.".into(), "backup.example.com".into()],
        )
        .with_priority(Some(20))
        .validate()
        .unwrap();
        assert_eq!(
            mx.presentation_values().unwrap(),
            vec!["10 mail.example.com.", "20 mail.example.com.", "20 backup.example.com."]
        );

        let srv = RrsetPayload::new("_sip._tcp", RecordType::Srv, 3600, vec!["5 5060 sip.example.com".into()])
            .with_priority(Some(10))
            .validate()
            .unwrap();
        assert_eq!(srv.presentation(&srv.records[0]).unwrap(), "10 5 5060 sip.example.com.");

        let txt = RrsetPayload::new("www", RecordType::Txt, 3600, vec!["hello".into(), "\"hello\"".into()])
            .validate()
            .unwrap();
        assert_eq!(txt.presentation_values().unwrap(), vec!["\"hello\""]);

        let cname = RrsetPayload::new("www", RecordType::Cname, 3600, vec!["example.com".into()])
            .validate()
            .unwrap();
        assert_eq!(cname.presentation("example.com").unwrap(), "example.com.");
    }

    #[test]
    fn test_split_value() {
        let mx = RrsetPayload::new(
            "@",
            RecordType::Mx,
            300,
            vec!["10 mail.example.com.".into(), "backup.example.com".into()],
        )
        .with_priority(Some(30))
        .validate()
        .unwrap();
        assert_eq!(
            mx.split_value(&mx.records[0], None).unwrap(),
            ("mail.example.com".to_string(), Some(10))
        );
        assert_eq!(
            mx.split_value(&mx.records[1], None).unwrap(),
            ("backup.example.com".to_string(), Some(30))
        );

        let txt = RrsetPayload::new("@", RecordType::Txt, 300, vec!["\"hi\"".into()])
            .validate()
            .unwrap();
        assert_eq!(txt.split_value("\"hi\"", Some(10)).unwrap(), ("\"hi\"".to_string(), None));
    }

    #[test]
    fn test_ds_parse_and_dedup() {
        let a = DsRecord::parse("2371 13 2 1f98c2a0").unwrap();
        let b = DsRecord::parse("example.com. 3600 IN DS 2371 13 2 1F98C2A0").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "2371 13 2 1F98C2A0");
        assert!(DsRecord::parse("not a ds").is_none());
        assert_eq!(dedup_ds(vec![a.clone(), b]).len(), 1);
    }

    #[test]
    fn test_status_from_keys() {
        let status = DnssecStatus::from_keys(vec![
            (DnssecKey::default(), vec![]),
            (
                DnssecKey {
                    active: true,
                    ..Default::default()
                },
                vec!["2371 13 2 AA".into(), "2371 13 2 AA".into()],
            ),
        ]);
        assert!(status.enabled);
        assert_eq!(status.ds.len(), 1);
        assert_eq!(status.keys.len(), 2);

        assert!(!DnssecStatus::from_keys(vec![(DnssecKey::default(), vec![])]).enabled);
    }
}
