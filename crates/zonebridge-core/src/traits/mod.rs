//! Core traits for zonebridge
//!
//! - [`ZoneProvider`]: Uniform operations over a DNS provider's API
//! - [`Store`]: Local mirror of zones and records

pub mod store;
pub mod zone_provider;

pub use store::{LocalId, RecordRow, Store, ZoneRow};
pub use zone_provider::{ProviderFactory, ZoneProvider, require_name};
