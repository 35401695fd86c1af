//! Error types for zonebridge
//!
//! Every failure surfaced by an adapter, the persistence layer or the
//! orchestration service is one of the variants below. Callers branch on the
//! variant (or on [`Error::class`]) to decide whether to fix input, retry
//! later, or treat the outcome as a provider capability limit.

use thiserror::Error;

/// Result type alias for zonebridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for zonebridge
#[derive(Error, Debug)]
pub enum Error {
    /// A required top-level input (domain name, record id) was blank
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// A payload field required by the operation is absent
    #[error("Missing field: {0}")]
    MissingField(String),

    /// Configuration is incomplete for the selected provider
    #[error("Missing credential for {provider}: {field}")]
    MissingCredential {
        /// Provider discriminator
        provider: String,
        /// Name of the missing configuration key
        field: String,
    },

    /// Unrecognized provider discriminator
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Resource already exists at the provider
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Resource absent at the provider (or locally)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Modify/delete needs the previous value to locate the record
    #[error("Missing old value: {0}")]
    MissingOldValue(String),

    /// Operation not implemented by this provider
    #[error("Operation '{operation}' is not supported by {provider}")]
    Unsupported {
        /// Provider discriminator
        provider: String,
        /// Operation name
        operation: String,
    },

    /// Wrapped transport or provider failure
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider discriminator
        provider: String,
        /// Error message
        message: String,
        /// Whether the failure looks transient (rate limit, 5xx, transport)
        transient: bool,
    },

    /// Local storage failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The provider accepted the mutation but local persistence failed
    #[error("Partial failure during {operation}: {message}")]
    PartialFailure {
        /// Operation that was in flight
        operation: String,
        /// Underlying persistence error
        message: String,
    },

    /// Malformed configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification used by automated callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller input or configuration is wrong; fix and retry immediately
    Configuration,
    /// Logical conflict or absence; not retryable without changing input
    Logical,
    /// Provider outage, rate limit or transport failure; retry later
    Transient,
    /// Provider cannot perform this operation at all
    Capability,
    /// Remote and local state diverged; needs reconciliation
    Inconsistent,
}

impl Error {
    /// Create an empty input error
    pub fn empty_input(msg: impl Into<String>) -> Self {
        Self::EmptyInput(msg.into())
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }

    /// Create a missing credential error
    pub fn missing_credential(provider: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingCredential {
            provider: provider.into(),
            field: field.into(),
        }
    }

    /// Create an unknown provider error
    pub fn unknown_provider(name: impl Into<String>) -> Self {
        Self::UnknownProvider(name.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a missing old value error
    pub fn missing_old_value(msg: impl Into<String>) -> Self {
        Self::MissingOldValue(msg.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(provider: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            provider: provider.into(),
            operation: operation.into(),
        }
    }

    /// Create a non-transient provider error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            transient: false,
        }
    }

    /// Create a transient provider error (rate limit, server error, transport)
    pub fn provider_transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            transient: true,
        }
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a partial failure error
    pub fn partial_failure(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PartialFailure {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classify this error for retry decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::EmptyInput(_)
            | Self::MissingField(_)
            | Self::MissingCredential { .. }
            | Self::UnknownProvider(_)
            | Self::MissingOldValue(_)
            | Self::Config(_)
            | Self::Json(_) => ErrorClass::Configuration,
            Self::Conflict(_) | Self::NotFound(_) => ErrorClass::Logical,
            Self::Unsupported { .. } => ErrorClass::Capability,
            Self::Provider { transient, .. } => {
                if *transient {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Logical
                }
            }
            Self::Persistence(_) => ErrorClass::Transient,
            Self::PartialFailure { .. } => ErrorClass::Inconsistent,
        }
    }

    /// Whether retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Whether this is a `NotFound` outcome
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether this is an `Unsupported` outcome
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Prefix the message with operation context, keeping the variant
    pub fn context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            Self::EmptyInput(m) => Self::EmptyInput(format!("{ctx}: {m}")),
            Self::MissingField(m) => Self::MissingField(format!("{ctx}: {m}")),
            Self::Conflict(m) => Self::Conflict(format!("{ctx}: {m}")),
            Self::NotFound(m) => Self::NotFound(format!("{ctx}: {m}")),
            Self::MissingOldValue(m) => Self::MissingOldValue(format!("{ctx}: {m}")),
            Self::Persistence(m) => Self::Persistence(format!("{ctx}: {m}")),
            Self::Config(m) => Self::Config(format!("{ctx}: {m}")),
            Self::Provider {
                provider,
                message,
                transient,
            } => Self::Provider {
                provider,
                message: format!("{ctx}: {message}"),
                transient,
            },
            Self::PartialFailure { operation, message } => Self::PartialFailure {
                operation,
                message: format!("{ctx}: {message}"),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            Error::missing_credential("hetzner", "api_key").class(),
            ErrorClass::Configuration
        );
        assert_eq!(Error::conflict("exists").class(), ErrorClass::Logical);
        assert_eq!(
            Error::unsupported("desec", "disable_dnssec").class(),
            ErrorClass::Capability
        );
        assert_eq!(
            Error::partial_failure("add_record", "disk full").class(),
            ErrorClass::Inconsistent
        );
        assert!(Error::provider_transient("vultr", "503").is_retryable());
        assert!(!Error::provider("vultr", "400").is_retryable());
    }

    #[test]
    fn test_context_keeps_variant() {
        let err = Error::not_found("zone example.com").context("delete_domain");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Not found: delete_domain: zone example.com");

        let err = Error::unsupported("desec", "disable_dnssec").context("ignored");
        assert!(err.is_unsupported());
    }
}
