//! RRset merge engine
//!
//! Pure functions computing the next value list of an RRset from the current
//! one and a requested change. Used for providers whose write primitive
//! replaces the whole RRset, where the full set must be recomputed before
//! every mutation.
//!
//! Two notions of equality are used:
//!
//! - **canonical** (for [`MergeOp::Add`]): trimmed, TXT/SPF outer quotes
//!   stripped, MX rewritten to `"<priority> <host>"` without trailing dot.
//!   Adding a value already present under this form is a no-op.
//! - **comparable** (for [`MergeOp::Replace`] and [`MergeOp::Remove`]):
//!   like canonical, but MX compares only the host, ignoring the priority.

use crate::names::without_trailing_dot;
use crate::record::RecordType;

/// A requested change to an RRset's values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOp<'a> {
    /// Append a value unless already present
    Add(&'a str),
    /// Substitute `new` for entries matching `old`; append if nothing matched
    Replace { old: &'a str, new: &'a str },
    /// Drop one entry matching the value
    Remove(&'a str),
}

/// Leading priority token of a value such as "10 mail.example.com"
///
/// Only recognized when followed by at least one more token.
pub fn leading_priority(value: &str) -> Option<u16> {
    let mut tokens = value.split_whitespace();
    let first = tokens.next()?;
    tokens.next()?;
    first.parse().ok()
}

/// Host portion of an MX value, without priority and trailing dot
pub fn mx_content(value: &str) -> String {
    let trimmed = value.trim();
    let host = match leading_priority(trimmed) {
        Some(_) => trimmed
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest.trim())
            .unwrap_or(trimmed),
        None => trimmed,
    };
    without_trailing_dot(host)
}

/// Canonical stored MX form: `"<priority> <host-without-trailing-dot>"`
pub fn mx_compose(priority: u16, host: &str) -> String {
    format!("{} {}", priority, mx_content(host))
}

/// Strip one pair of surrounding double quotes
pub fn strip_quotes(value: &str) -> &str {
    let v = value.trim();
    if v.len() >= 2 && v.starts_with('"') && v.ends_with('"') {
        &v[1..v.len() - 1]
    } else {
        v
    }
}

/// Wrap a TXT/SPF value in double quotes if it is not already quoted
pub fn quote(value: &str) -> String {
    let v = value.trim();
    if v.len() >= 2 && v.starts_with('"') && v.ends_with('"') {
        v.to_string()
    } else {
        format!("\"{}\"", v.replace('"', "\\\""))
    }
}

/// Canonical form used for add-deduplication
pub fn canonical(rtype: &RecordType, value: &str) -> String {
    match rtype {
        RecordType::Mx => match leading_priority(value) {
            Some(p) => mx_compose(p, value),
            None => mx_content(value),
        },
        t if t.is_quoted_text() => strip_quotes(value).to_string(),
        _ => value.trim().to_string(),
    }
}

/// Form used to match an existing value against an old/target value
pub fn comparable(rtype: &RecordType, value: &str) -> String {
    match rtype {
        RecordType::Mx => mx_content(value),
        t if t.is_quoted_text() => strip_quotes(value).to_string(),
        _ => value.trim().to_string(),
    }
}

/// Drop canonical duplicates, keeping first occurrence order
pub fn dedup(rtype: &RecordType, values: &[String]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(values.len());
    let mut out = Vec::with_capacity(values.len());
    for v in values {
        let key = canonical(rtype, v);
        if !seen.contains(&key) {
            seen.push(key);
            out.push(v.trim().to_string());
        }
    }
    out
}

/// Compute the next value list of an RRset
///
/// An empty result from [`MergeOp::Remove`] means the caller must delete the
/// RRset at the provider instead of submitting an empty set.
pub fn merge(rtype: &RecordType, existing: &[String], op: MergeOp<'_>) -> Vec<String> {
    match op {
        MergeOp::Add(new) => {
            let mut out = dedup(rtype, existing);
            let key = canonical(rtype, new);
            if !out.iter().any(|v| canonical(rtype, v) == key) {
                out.push(new.trim().to_string());
            }
            out
        }
        MergeOp::Replace { old, new } => {
            let target = comparable(rtype, old);
            let mut matched = false;
            let replaced: Vec<String> = existing
                .iter()
                .map(|v| {
                    if comparable(rtype, v) == target {
                        matched = true;
                        new.trim().to_string()
                    } else {
                        v.trim().to_string()
                    }
                })
                .collect();
            let mut out = dedup(rtype, &replaced);
            if !matched {
                let key = canonical(rtype, new);
                if !out.iter().any(|v| canonical(rtype, v) == key) {
                    out.push(new.trim().to_string());
                }
            }
            out
        }
        MergeOp::Remove(target) => {
            let target = comparable(rtype, target);
            let mut out: Vec<String> = existing.iter().map(|v| v.trim().to_string()).collect();
            if let Some(pos) = out.iter().position(|v| comparable(rtype, v) == target) {
                out.remove(pos);
            }
            out
        }
    }
}
