//! Owner-name normalization
//!
//! Callers address records by a relative subname where "" or "@" means the
//! zone apex. Providers differ in what they accept and in what they echo
//! back: some use "@", some the bare zone name, some the fully-qualified name
//! with a trailing dot. The helpers here convert between these forms.

/// Zone name without a trailing dot, lowercased
pub fn zone_root(zone: &str) -> String {
    zone.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Zone name with a trailing dot
pub fn zone_fqdn(zone: &str) -> String {
    format!("{}.", zone_root(zone))
}

/// Whether a subname denotes the apex of `zone`
///
/// "", "@", the bare zone name and the zone name with trailing dot all do.
pub fn is_apex(subname: &str, zone: &str) -> bool {
    let sub = subname.trim().trim_end_matches('.').to_ascii_lowercase();
    sub.is_empty() || sub == "@" || sub == zone_root(zone)
}

/// Canonical relative subname: "" for the apex, otherwise the label(s)
/// relative to `zone`
///
/// Accepts relative names, names qualified with the zone (with or without
/// trailing dot) and apex markers.
pub fn relative(subname: &str, zone: &str) -> String {
    if is_apex(subname, zone) {
        return String::new();
    }
    let root = zone_root(zone);
    let sub = subname.trim().trim_end_matches('.').to_ascii_lowercase();
    match sub.strip_suffix(&format!(".{root}")) {
        Some(rel) => rel.to_string(),
        None => sub,
    }
}

/// Relative subname with "@" for the apex (Hetzner, ClouDNS style)
pub fn relative_or_at(subname: &str, zone: &str) -> String {
    let rel = relative(subname, zone);
    if rel.is_empty() { "@".to_string() } else { rel }
}

/// Fully-qualified owner name without trailing dot (Cloudflare, DNSimple style)
pub fn absolute(subname: &str, zone: &str) -> String {
    let rel = relative(subname, zone);
    let root = zone_root(zone);
    if rel.is_empty() {
        root
    } else {
        format!("{rel}.{root}")
    }
}

/// Fully-qualified owner name with trailing dot (PowerDNS style)
pub fn absolute_fqdn(subname: &str, zone: &str) -> String {
    format!("{}.", absolute(subname, zone))
}

/// Names a provider might echo back for `subname`, in matching order
///
/// The bare subname first, then subname + "." + zone without trailing dot,
/// then the fully-qualified form. For the apex the bare form is "@".
pub fn candidates(subname: &str, zone: &str) -> Vec<String> {
    let bare = relative_or_at(subname, zone);
    let abs = absolute(subname, zone);
    let fqdn = format!("{abs}.");
    let mut out = vec![bare];
    for name in [abs, fqdn] {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

/// Whether a provider-echoed name matches `subname` under any candidate form
pub fn matches(echoed: &str, subname: &str, zone: &str) -> bool {
    let echoed = echoed.trim().to_ascii_lowercase();
    if echoed.is_empty() {
        return is_apex(subname, zone);
    }
    candidates(subname, zone).iter().any(|c| *c == echoed)
}

/// Hostname with a trailing dot
pub fn with_trailing_dot(host: &str) -> String {
    let h = host.trim();
    if h.ends_with('.') {
        h.to_string()
    } else {
        format!("{h}.")
    }
}

/// Hostname without a trailing dot
pub fn without_trailing_dot(host: &str) -> String {
    host.trim().trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apex_forms_resolve_to_same_name() {
        for sub in ["", "@", "example.com", "example.com.", "EXAMPLE.com"] {
            assert!(is_apex(sub, "example.com"), "{sub:?} should be apex");
            assert_eq!(relative(sub, "example.com."), "");
            assert_eq!(absolute(sub, "example.com"), "example.com");
            assert_eq!(relative_or_at(sub, "example.com"), "@");
        }
    }

    #[test]
    fn test_relative_strips_zone_suffix() {
        assert_eq!(relative("www", "example.com"), "www");
        assert_eq!(relative("www.example.com", "example.com"), "www");
        assert_eq!(relative("a.b.example.com.", "example.com"), "a.b");
        assert_eq!(absolute_fqdn("www", "example.com"), "www.example.com.");
    }

    #[test]
    fn test_candidate_order() {
        assert_eq!(
            candidates("www", "example.com"),
            vec!["www", "www.example.com", "www.example.com."]
        );
        assert_eq!(
            candidates("@", "example.com"),
            vec!["@", "example.com", "example.com."]
        );
    }

    #[test]
    fn test_matches_echoed_forms() {
        assert!(matches("www.example.com.", "www", "example.com"));
        assert!(matches("WWW.example.com", "www", "example.com"));
        assert!(matches("www", "www", "example.com"));
        assert!(matches("", "@", "example.com"));
        assert!(matches("example.com", "", "example.com"));
        assert!(!matches("mail.example.com", "www", "example.com"));
    }

    #[test]
    fn test_trailing_dot_helpers() {
        assert_eq!(with_trailing_dot("mail.example.com"), "mail.example.com.");
        assert_eq!(with_trailing_dot("mail.example.com."), "mail.example.com.");
        assert_eq!(without_trailing_dot("mail.example.com."), "mail.example.com");
    }
}
