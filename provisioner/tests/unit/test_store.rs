//! State store reconciliation tests

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use provisioner::deploy::queue::OperationQueue;
use provisioner::errors::ProvisionError;
use provisioner::models::operation::DeploymentState;
use provisioner::state::memory::MemoryBacking;
use provisioner::state::store::StateStore;

use crate::support::{descriptors, FailingBacking, SESSION};

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap()
}

fn state_at(minute: u32) -> DeploymentState {
    let mut state = DeploymentState::new(descriptors(&["op1", "op2"])).unwrap();
    state.timestamp = at(minute);
    state
}

fn store(remote: &MemoryBacking, local: &MemoryBacking) -> StateStore {
    StateStore::new(Arc::new(remote.clone()), Arc::new(local.clone()), SESSION)
}

async fn put(backing: &MemoryBacking, state: &DeploymentState) {
    backing
        .put(SESSION, serde_json::to_value(state).unwrap())
        .await;
}

async fn stored(backing: &MemoryBacking) -> Option<DeploymentState> {
    backing
        .get(SESSION)
        .await
        .map(|doc| serde_json::from_value(doc).unwrap())
}

#[tokio::test]
async fn test_load_empty_returns_none() {
    let (remote, local) = (MemoryBacking::new(), MemoryBacking::new());
    assert!(store(&remote, &local).load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_newer_remote_overwrites_local() {
    let (remote, local) = (MemoryBacking::new(), MemoryBacking::new());
    put(&remote, &state_at(10)).await;
    put(&local, &state_at(5)).await;

    let loaded = store(&remote, &local).load().await.unwrap().unwrap();

    assert_eq!(loaded.timestamp, at(10));
    assert_eq!(stored(&local).await.unwrap().timestamp, at(10));
}

#[tokio::test]
async fn test_newer_local_overwrites_remote() {
    let (remote, local) = (MemoryBacking::new(), MemoryBacking::new());
    put(&remote, &state_at(5)).await;
    put(&local, &state_at(10)).await;

    let loaded = store(&remote, &local).load().await.unwrap().unwrap();

    assert_eq!(loaded.timestamp, at(10));
    assert_eq!(stored(&remote).await.unwrap().timestamp, at(10));
}

#[tokio::test]
async fn test_equal_timestamps_prefer_remote() {
    let (remote, local) = (MemoryBacking::new(), MemoryBacking::new());
    let mut remote_state = state_at(7);
    remote_state.current_index = 1;
    remote_state.operations[0].status = provisioner::models::operation::OperationStatus::Completed;
    remote_state.completed_ids.insert("op1".to_string());
    put(&remote, &remote_state).await;
    put(&local, &state_at(7)).await;

    let loaded = store(&remote, &local).load().await.unwrap().unwrap();

    assert_eq!(loaded, remote_state);
    assert_eq!(stored(&local).await.unwrap(), remote_state);
}

#[tokio::test]
async fn test_single_copy_heals_other_backing() {
    let (remote, local) = (MemoryBacking::new(), MemoryBacking::new());
    put(&local, &state_at(3)).await;

    let loaded = store(&remote, &local).load().await.unwrap().unwrap();

    assert_eq!(loaded.timestamp, at(3));
    assert_eq!(stored(&remote).await.unwrap(), loaded);
}

#[tokio::test]
async fn test_undecodable_copy_is_discarded() {
    let (remote, local) = (MemoryBacking::new(), MemoryBacking::new());
    put(&remote, &state_at(1)).await;
    local.put(SESSION, json!({"version": 1, "operations": "nope"})).await;

    let loaded = store(&remote, &local).load().await.unwrap().unwrap();

    assert_eq!(loaded.timestamp, at(1));
    // the discarded copy is replaced by the healthy one
    assert_eq!(stored(&local).await.unwrap(), loaded);
}

#[tokio::test]
async fn test_structurally_invalid_copy_is_discarded() {
    let (remote, local) = (MemoryBacking::new(), MemoryBacking::new());
    let mut broken = state_at(30);
    broken.current_index = 9;
    put(&remote, &broken).await;

    assert!(store(&remote, &local).load().await.unwrap().is_none());
    assert!(remote.get(SESSION).await.is_none());
}

#[tokio::test]
async fn test_unreachable_backing_counts_as_absent() {
    let local = MemoryBacking::new();
    put(&local, &state_at(4)).await;
    let store = StateStore::new(Arc::new(FailingBacking), Arc::new(local.clone()), SESSION);

    let loaded = store.load().await.unwrap().unwrap();

    assert_eq!(loaded.timestamp, at(4));
    assert!(local.get(SESSION).await.is_some());
}

#[tokio::test]
async fn test_save_survives_one_backing_failure() {
    let local = MemoryBacking::new();
    let store = StateStore::new(Arc::new(FailingBacking), Arc::new(local.clone()), SESSION);
    let state = state_at(2);

    assert_ok!(store.save(&state).await);

    assert_eq!(stored(&local).await.unwrap(), state);
}

#[tokio::test]
async fn test_save_fails_when_both_backings_fail() {
    let store = StateStore::new(Arc::new(FailingBacking), Arc::new(FailingBacking), SESSION);

    let err = assert_err!(store.save(&state_at(2)).await);

    assert!(matches!(err, ProvisionError::StorageUnavailable(_)));
}

#[tokio::test]
async fn test_clear_removes_both_copies() {
    let (remote, local) = (MemoryBacking::new(), MemoryBacking::new());
    let store = store(&remote, &local);
    store.save(&state_at(2)).await.unwrap();

    store.clear().await.unwrap();

    assert!(remote.get(SESSION).await.is_none());
    assert!(local.get(SESSION).await.is_none());
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_clear_fails_when_both_backings_fail() {
    let store = StateStore::new(Arc::new(FailingBacking), Arc::new(FailingBacking), SESSION);
    assert!(matches!(
        store.clear().await,
        Err(ProvisionError::StorageUnavailable(_))
    ));
}

#[tokio::test]
async fn test_saved_queue_progress_round_trips() {
    let (remote, local) = (MemoryBacking::new(), MemoryBacking::new());
    let store = store(&remote, &local);
    let mut queue = OperationQueue::from_descriptors(descriptors(&["op1", "op2"])).unwrap();
    queue.mark_completed("op1").unwrap();
    queue.mark_failed("op2", "ssh timeout").unwrap();

    store.save(queue.state()).await.unwrap();
    let loaded = store.load().await.unwrap().unwrap();

    assert_eq!(&loaded, queue.state());
}
