//! Contract Test: Provider Selection
//!
//! Constraints verified:
//! - An unrecognized discriminator fails with `UnknownProvider`
//! - A missing credential fails with `MissingCredential` before any
//!   adapter is built or any provider call is made

mod common;

use common::*;
use zonebridge_core::{Error, ErrorClass, ProviderConfig, ProviderKind};

#[test]
fn unknown_discriminator() {
    let err = ProviderConfig::from_value(serde_json::json!({
        "provider": "route66",
        "api_key": "x"
    }))
    .unwrap_err();
    assert!(matches!(err, Error::UnknownProvider(ref p) if p == "route66"));
    assert_eq!(err.class(), ErrorClass::Configuration);
}

#[test]
fn discriminator_is_case_insensitive() {
    let config = ProviderConfig::from_value(serde_json::json!({
        "provider": "PowerDNS",
        "api_key": "secret",
        "api_url": "http://ns1.example.net:8081/api/v1"
    }))
    .unwrap();
    assert_eq!(config.kind(), ProviderKind::PowerDns);
    config.validate().unwrap();
}

#[tokio::test]
async fn missing_credential_fails_before_any_call() {
    let h = harness();
    let config = ProviderConfig::Desec {
        api_key: "  ".into(),
        api_url: None,
    };

    let err = h
        .service
        .create_domain(ZONE, None, config)
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::MissingCredential { ref provider, ref field } if provider == "desec" && field == "api_key")
    );
    assert_eq!(h.provider.adapters_created(), 0);
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn unregistered_provider_is_unknown() {
    let h = harness();
    let config = ProviderConfig::Hetzner {
        api_key: "key".into(),
        api_url: None,
    };
    let err = h
        .service
        .create_domain(ZONE, None, config)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownProvider(_)));
}
