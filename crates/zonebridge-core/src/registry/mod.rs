//! Plugin-based provider registry
//!
//! The registry maps provider discriminators to adapter factories, so the
//! orchestration service selects an adapter from configuration without
//! hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use zonebridge_core::registry::ProviderRegistry;
//! use zonebridge_core::config::ProviderConfig;
//!
//! let registry = ProviderRegistry::new();
//! zonebridge_provider_hetzner::register(&registry);
//!
//! let config = ProviderConfig::from_value(serde_json::json!({
//!     "provider": "hetzner",
//!     "api_key": "..."
//! }))?;
//! let provider = registry.create_provider(&config, index)?;
//! ```
//!
//! ## Registration
//!
//! Provider crates register themselves during initialization:
//!
//! ```rust,ignore
//! // In zonebridge-provider-hetzner
//! pub fn register(registry: &ProviderRegistry) {
//!     registry.register_provider(ProviderKind::Hetzner, Box::new(HetznerFactory));
//! }
//! ```

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{Error, Result};
use crate::identity::IdentityIndex;
use crate::traits::{ProviderFactory, ZoneProvider};
use std::collections::HashMap;
use std::sync::RwLock;

/// Provider registry for plugin-based adapter creation
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<ProviderKind, Box<dyn ProviderFactory>>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter factory, replacing any earlier one for `kind`
    pub fn register_provider(&self, kind: ProviderKind, factory: Box<dyn ProviderFactory>) {
        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        providers.insert(kind, factory);
    }

    /// Create an adapter from configuration
    ///
    /// The configuration is validated first, so a missing credential fails
    /// with `MissingCredential` before any adapter exists. An unregistered
    /// discriminator fails with `UnknownProvider`.
    pub fn create_provider(
        &self,
        config: &ProviderConfig,
        index: IdentityIndex,
    ) -> Result<Box<dyn ZoneProvider>> {
        config.validate()?;

        let providers = self
            .providers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let factory = providers
            .get(&config.kind())
            .ok_or_else(|| Error::unknown_provider(config.type_name()))?;

        tracing::debug!(provider = %config.kind(), "Creating provider adapter");
        factory.create(config, index)
    }

    /// List all registered provider discriminators
    pub fn list_providers(&self) -> Vec<ProviderKind> {
        let providers = self
            .providers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut kinds: Vec<ProviderKind> = providers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    /// Check if a provider is registered
    pub fn has_provider(&self, kind: ProviderKind) -> bool {
        let providers = self
            .providers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        providers.contains_key(&kind)
    }
}
