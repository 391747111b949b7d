//! Admission Integration Tests
//!
//! Validation gating and write-once storage of raw events.

mod common;

use std::sync::Arc;

use dispatch_relay::storage::{BlobStore, FsBlobStore};
use dispatch_relay::{AdmissionGate, PipelineError};
use tempfile::TempDir;

const RAW_NAMESPACE: &str = "raw-json";

fn setup() -> (TempDir, Arc<FsBlobStore>, AdmissionGate) {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(FsBlobStore::new(temp.path()));
    let gate = AdmissionGate::new(store.clone(), RAW_NAMESPACE);
    (temp, store, gate)
}

#[tokio::test]
async fn test_admitted_event_is_stored_under_derived_key() {
    let (_temp, store, gate) = setup();
    let raw = common::complete_event(101, "SO123456");

    let key = gate.submit(&raw).await.unwrap();
    assert_eq!(key, "dispatch_101_SO123456.json");

    let stored = store.get(RAW_NAMESPACE, &key).await.unwrap().unwrap();
    assert_eq!(stored, raw.as_bytes());
}

#[tokio::test]
async fn test_conflict_leaves_first_event_unchanged() {
    let (_temp, store, gate) = setup();
    let first = common::complete_event(101, "SO123456");
    gate.submit(&first).await.unwrap();

    // Same identity, different content
    let second = first.replace("ITEM001", "ITEM999");
    let err = gate.submit(&second).await.unwrap_err();
    match err {
        PipelineError::Conflict { key } => assert_eq!(key, "dispatch_101_SO123456.json"),
        other => panic!("expected conflict, got {other}"),
    }

    let stored = store
        .get(RAW_NAMESPACE, "dispatch_101_SO123456.json")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, first.as_bytes());
}

#[tokio::test]
async fn test_missing_field_refuses_admission() {
    let (_temp, store, gate) = setup();
    let raw = common::complete_event(101, "SO123456").replace("\"loadId\"", "\"loadID\"");

    let err = gate.submit(&raw).await.unwrap_err();
    match err {
        PipelineError::Validation { missing_fields } => {
            assert_eq!(missing_fields, vec!["containers[].loadId"])
        }
        other => panic!("expected validation failure, got {other}"),
    }
    assert!(store.list(RAW_NAMESPACE).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_distinct_identities_coexist() {
    let (_temp, store, gate) = setup();

    gate.submit(&common::complete_event(1, "SO1")).await.unwrap();
    gate.submit(&common::complete_event(2, "SO1")).await.unwrap();
    gate.submit(&common::complete_event(1, "SO2")).await.unwrap();

    assert_eq!(
        store.list(RAW_NAMESPACE).await.unwrap(),
        vec!["dispatch_1_SO1.json", "dispatch_1_SO2.json", "dispatch_2_SO1.json"]
    );
}

#[tokio::test]
async fn test_concurrent_duplicate_submissions_admit_once() {
    let (_temp, _store, gate) = setup();
    let raw = common::complete_event(7, "SO7");

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let gate = gate.clone();
        let raw = raw.clone();
        tasks.push(tokio::spawn(async move { gate.submit(&raw).await }));
    }

    let mut admitted = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(PipelineError::Conflict { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(conflicts, 7);
}
