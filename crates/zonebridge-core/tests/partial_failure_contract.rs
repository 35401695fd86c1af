//! Contract Test: Partial Failure Surfacing
//!
//! When the provider accepts a mutation but the local write fails, the
//! caller gets `PartialFailure`, never a plain provider or persistence
//! error.
//!
//! Constraints verified:
//! - add/update/delete/create_domain tag local write failures
//! - a naive retry after a partial add does not duplicate the value at an
//!   RRset-native provider
//! - provider failures are not tagged as partial

mod common;

use common::*;
use zonebridge_core::{Error, ErrorClass, RecordChanges, RecordType, Store};

#[tokio::test]
async fn add_record_persistence_failure_is_partial() {
    let h = harness();
    h.service
        .create_domain(ZONE, None, whole_rrset_config())
        .await
        .unwrap();

    h.store.fail_writes(true);
    let err = h
        .service
        .add_record(a_record("www", "203.0.113.10"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PartialFailure { ref operation, .. } if operation == "add_record"));
    assert_eq!(err.class(), ErrorClass::Inconsistent);
    assert!(!err.is_retryable());

    // The provider did publish the value
    assert_eq!(h.provider.rrset(ZONE, "www", &RecordType::A), vec!["203.0.113.10"]);

    // Naive retry once storage is back
    h.store.fail_writes(false);
    h.service
        .add_record(a_record("www", "203.0.113.10"))
        .await
        .expect("retry succeeds");
    assert_eq!(h.provider.rrset(ZONE, "www", &RecordType::A), vec!["203.0.113.10"]);
    assert_eq!(
        h.store
            .list_records(ZONE, Some("www"), Some(&RecordType::A))
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn create_domain_persistence_failure_is_partial() {
    let h = harness();
    h.store.fail_writes(true);

    let err = h
        .service
        .create_domain(ZONE, None, per_record_config())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PartialFailure { .. }));
    assert!(h.provider.has_zone(ZONE));
}

#[tokio::test]
async fn update_and_delete_persistence_failures_are_partial() {
    let h = harness();
    h.service
        .create_domain(ZONE, None, per_record_config())
        .await
        .unwrap();
    let row = h.service.add_record(a_record("www", "192.0.2.1")).await.unwrap();

    h.store.fail_writes(true);
    let err = h
        .service
        .update_record(
            ZONE,
            &row.local_id,
            RecordChanges {
                value: Some("192.0.2.2".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PartialFailure { ref operation, .. } if operation == "update_record"));

    let err = h.service.delete_record(ZONE, &row.local_id).await.unwrap_err();
    assert!(matches!(err, Error::PartialFailure { ref operation, .. } if operation == "delete_record"));
}

#[tokio::test]
async fn provider_failure_is_not_partial() {
    let h = harness();
    h.service
        .create_domain(ZONE, None, per_record_config())
        .await
        .unwrap();

    // The zone already exists at the provider
    let err = h
        .service
        .create_domain(ZONE, None, per_record_config())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert_eq!(err.class(), ErrorClass::Logical);
}
