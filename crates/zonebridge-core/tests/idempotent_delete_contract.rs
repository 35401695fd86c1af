//! Contract Test: Idempotent Delete
//!
//! Deleting something that does not exist succeeds exactly as if it had
//! existed and been removed.
//!
//! Constraints verified:
//! - delete_domain tolerates a provider "not found"
//! - delete_domain cascades to local records
//! - delete_record of an unknown or already deleted value succeeds

mod common;

use common::*;
use zonebridge_core::{LocalId, Store};

#[tokio::test]
async fn delete_unknown_domain_succeeds() {
    let h = harness();

    for config in [whole_rrset_config(), per_record_config()] {
        let removed = h
            .service
            .delete_domain("never-created.example", Some(&config))
            .await
            .expect("deleting an absent zone is not an error");
        assert_eq!(removed, 0);
    }
    assert!(
        h.provider
            .calls()
            .iter()
            .all(|c| c.starts_with("delete_domain"))
    );
}

#[tokio::test]
async fn delete_domain_twice_and_cascade() {
    let h = harness();
    h.service
        .create_domain(ZONE, None, whole_rrset_config())
        .await
        .unwrap();
    h.service.add_record(a_record("www", "192.0.2.1")).await.unwrap();
    h.service.add_record(a_record("mail", "192.0.2.2")).await.unwrap();

    let removed = h
        .service
        .delete_domain(ZONE, None)
        .await
        .expect("first delete succeeds");
    assert_eq!(removed, 2);
    assert!(h.store.get_zone(ZONE).await.unwrap().is_none());
    assert!(h.store.list_records(ZONE, None, None).await.unwrap().is_empty());
    assert!(!h.provider.has_zone(ZONE));

    // The zone is gone locally too, so the config has to be supplied
    h.service
        .delete_domain(ZONE, Some(&whole_rrset_config()))
        .await
        .expect("second delete succeeds");
}

#[tokio::test]
async fn delete_domain_without_config_needs_registered_zone() {
    let h = harness();
    let err = h.service.delete_domain(ZONE, None).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn delete_unknown_record_succeeds() {
    let h = harness();
    h.service
        .create_domain(ZONE, None, per_record_config())
        .await
        .unwrap();

    h.service
        .delete_record(ZONE, &LocalId::from("no-such-record"))
        .await
        .expect("unknown record is already deleted");
}

#[tokio::test]
async fn delete_record_already_gone_at_provider() {
    let h = harness();
    h.service
        .create_domain(ZONE, None, per_record_config())
        .await
        .unwrap();
    let row = h.service.add_record(a_record("www", "192.0.2.1")).await.unwrap();

    h.service
        .delete_record(ZONE, &row.local_id)
        .await
        .unwrap();
    h.service
        .delete_record(ZONE, &row.local_id)
        .await
        .expect("second delete is a no-op");

    assert!(h.store.list_records(ZONE, None, None).await.unwrap().is_empty());
    assert!(
        h.provider
            .rrset(ZONE, "www", &zonebridge_core::RecordType::A)
            .is_empty()
    );
}

#[tokio::test]
async fn empty_domain_name_rejected() {
    let h = harness();
    let err = h
        .service
        .delete_domain("  ", Some(&whole_rrset_config()))
        .await
        .unwrap_err();
    assert!(matches!(err, zonebridge_core::Error::EmptyInput(_)));
}
