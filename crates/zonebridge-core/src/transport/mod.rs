// # Transport Capability
//
// Adapters talk to their provider through the `Transport` trait instead of
// holding an HTTP client directly. The production implementation is
// `HttpTransport` (reqwest); tests script responses with
// `testing::MockTransport`.
//
// A transport performs exactly one request per call. It never retries and
// never caches: a failed request surfaces immediately as an error and the
// caller decides whether to repeat the whole operation.

pub mod http;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use http::HttpTransport;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt;

use crate::config::ProviderKind;
use crate::error::{Error, Result};

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        })
    }
}

/// A single provider API request, relative to the transport's base URL
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Patch, path).with_body(body)
    }

    /// Attach a JSON body
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Append a query parameter
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Value of a query parameter, if present
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Raw provider response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self, provider: ProviderKind) -> Result<T> {
        let body = if self.body.trim().is_empty() {
            "null"
        } else {
            self.body.as_str()
        };
        serde_json::from_str(body).map_err(|e| {
            Error::provider(
                provider.as_str(),
                format!("Failed to parse response: {e}"),
            )
        })
    }
}

/// Opaque provider client capability
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Perform one request; transport failures are returned as errors,
    /// HTTP error statuses are returned as responses
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// Map an unsuccessful response to the error taxonomy
///
/// `op` names what was attempted (e.g. "create zone example.com") and is
/// embedded in every message.
pub fn ensure_success(provider: ProviderKind, op: &str, response: ApiResponse) -> Result<ApiResponse> {
    if response.is_success() {
        return Ok(response);
    }

    let status = response.status;
    let body = response.body.trim();
    let lower = body.to_ascii_lowercase();
    let p = provider.as_str();

    Err(match status {
        401 | 403 => Error::provider(
            p,
            format!("{op}: authentication failed: invalid credentials or insufficient permissions (status {status})"),
        ),
        404 => Error::not_found(format!("{op}: {p} returned 404 {body}")),
        409 => Error::conflict(format!("{op}: {body}")),
        400 | 422
            if lower.contains("already exist")
                || lower.contains("already taken")
                || lower.contains("already been taken")
                || lower.contains("conflict") =>
        {
            Error::conflict(format!("{op}: {body}"))
        }
        429 => Error::provider_transient(p, format!("{op}: rate limit exceeded (status {status})")),
        500..=599 => Error::provider_transient(p, format!("{op}: server error {status}: {body}")),
        _ => Error::provider(p, format!("{op}: status {status}: {body}")),
    })
}

/// Send a request and map error statuses
pub async fn call(
    transport: &dyn Transport,
    provider: ProviderKind,
    op: &str,
    request: ApiRequest,
) -> Result<ApiResponse> {
    let response = transport.send(request).await?;
    ensure_success(provider, op, response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(status: u16, body: &str) -> Result<ApiResponse> {
        ensure_success(ProviderKind::Hetzner, "op", ApiResponse::new(status, body))
    }

    #[test]
    fn test_status_mapping() {
        assert!(check(200, "{}").is_ok());
        assert!(check(204, "").is_ok());
        assert!(matches!(check(404, ""), Err(Error::NotFound(_))));
        assert!(matches!(check(409, ""), Err(Error::Conflict(_))));
        assert!(matches!(
            check(422, r#"{"error":"zone already exists"}"#),
            Err(Error::Conflict(_))
        ));
        assert!(matches!(check(422, "invalid ttl"), Err(Error::Provider { transient: false, .. })));
        assert!(check(429, "").unwrap_err().is_retryable());
        assert!(check(503, "").unwrap_err().is_retryable());
        assert!(!check(401, "").unwrap_err().is_retryable());
    }

    #[test]
    fn test_empty_body_json() {
        let resp = ApiResponse::new(204, "");
        let v: Option<serde_json::Value> = resp.json(ProviderKind::Desec).unwrap();
        assert!(v.is_none());
    }
}
