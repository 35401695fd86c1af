// # zonebridge-core
//
// Core library for managing DNS zones and records across heterogeneous
// provider back ends through one interface.
//
// ## Architecture Overview
//
// - **ZoneProvider**: Trait every provider adapter implements
// - **ProviderRegistry**: Selects and builds an adapter from configuration
// - **ZoneService**: Orchestrates provider calls and local persistence
// - **Store**: Trait for the local zone/record mirror (memory, file)
// - **IdentityIndex**: (zone, host, type) → provider ids, over the store
// - **merge**: Pure RRset merge engine
// - **Transport**: Opaque provider client capability (HTTP, scripted mock)
//
// ## Design Principles
//
// 1. **Provider-agnostic orchestration**: the service only sees `dyn ZoneProvider`
// 2. **Plugin-based**: adapters register factories, no hard-coded dispatch
// 3. **Explicit capability limits**: unsupported operations return `Error::Unsupported`
// 4. **Idempotent writes**: duplicate adds are absorbed, missing deletes succeed
// 5. **No hidden retries**: every failure surfaces to the caller

pub mod config;
pub mod error;
pub mod identity;
pub mod merge;
pub mod names;
pub mod record;
pub mod registry;
pub mod service;
pub mod state;
pub mod traits;
pub mod transport;

// Re-export core types for convenience
pub use config::{MAX_SECONDARIES, ProviderConfig, ProviderKind, SecondaryServer};
pub use error::{Error, ErrorClass, Result};
pub use identity::{IdentityEntry, IdentityIndex};
pub use record::{
    DnssecKey, DnssecStatus, DomainCreated, DomainInfo, DsRecord, RecordType, Rrset, RrsetPayload,
};
pub use registry::ProviderRegistry;
pub use service::{NewRecord, RecordChanges, ZoneService};
pub use state::{FileStore, MemoryStore};
pub use traits::{LocalId, ProviderFactory, RecordRow, Store, ZoneProvider, ZoneRow};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport};
