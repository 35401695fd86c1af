// # HTTP Transport
//
// reqwest-backed implementation of `Transport`.
//
// - One HTTP request per `send` call, 30 second timeout
// - Authentication is fixed at construction (headers or query pairs)
// - Credentials NEVER appear in logs or Debug output

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use super::{ApiRequest, ApiResponse, Method, Transport};
use crate::config::ProviderKind;
use crate::error::{Error, Result};

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// reqwest-backed provider transport
pub struct HttpTransport {
    provider: ProviderKind,
    base_url: String,
    /// ⚠️ May contain secrets; NEVER log
    headers: Vec<(String, String)>,
    /// ⚠️ May contain secrets; NEVER log
    auth_query: Vec<(String, String)>,
    client: reqwest::Client,
}

// Custom Debug implementation that hides credentials
impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("headers", &"<REDACTED>")
            .field("auth_query", &"<REDACTED>")
            .finish()
    }
}

impl HttpTransport {
    /// Create a transport rooted at `base_url`
    pub fn new(provider: ProviderKind, base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            provider,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            headers: Vec::new(),
            auth_query: Vec::new(),
            client,
        })
    }

    /// Send a fixed header with every request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_bearer(self, token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {token}"))
    }

    /// Append a fixed query pair to every request
    pub fn with_auth_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth_query.push((key.into(), value.into()));
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let url = self.url(&request.path);
        tracing::debug!(provider = %self.provider, method = %request.method, path = %request.path, "provider request");

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &url)
            .header("Accept", "application/json");
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !self.auth_query.is_empty() {
            builder = builder.query(&self.auth_query);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            Error::provider_transient(
                self.provider.as_str(),
                format!("HTTP request failed: {}", e.without_url()),
            )
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());

        tracing::trace!(provider = %self.provider, status, "provider response");
        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_not_exposed_in_debug() {
        let transport = HttpTransport::new(ProviderKind::Vultr, "https://api.vultr.com/v2/")
            .unwrap()
            .with_bearer("secret_token_12345")
            .with_auth_query("auth-password", "hunter2");

        let debug_str = format!("{transport:?}");
        assert!(!debug_str.contains("secret_token_12345"));
        assert!(!debug_str.contains("hunter2"));
        assert!(debug_str.contains("HttpTransport"));
    }

    #[test]
    fn test_url_join() {
        let transport = HttpTransport::new(ProviderKind::Vultr, "https://api.vultr.com/v2/").unwrap();
        assert_eq!(
            transport.url("/domains/example.com"),
            "https://api.vultr.com/v2/domains/example.com"
        );
    }
}
