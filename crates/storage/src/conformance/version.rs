//! Optimistic concurrency conformance tests.

use std::future::Future;

use super::{key, seed, TestResult};
use crate::{StorageError, TransitionStorage};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "version",
            "update_returns_incremented_version",
            update_returns_incremented_version(factory).await,
        ),
        TestResult::from_result(
            "version",
            "stale_version_rejected",
            stale_version_rejected(factory).await,
        ),
        TestResult::from_result(
            "version",
            "chained_updates_in_one_snapshot",
            chained_updates_in_one_snapshot(factory).await,
        ),
        TestResult::from_result(
            "version",
            "conflict_error_carries_expected_version",
            conflict_error_carries_expected_version(factory).await,
        ),
    ]
}

async fn update_returns_incremented_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let k = key("1");
    seed(&storage, &k, "draft").await?;

    for (expected, to) in [(0, "review"), (1, "published"), (2, "archived")] {
        let mut snap = storage
            .begin_snapshot()
            .await
            .map_err(|e| format!("begin: {e}"))?;
        let v = storage
            .update_state(&mut snap, &k, expected, to, expected + 1)
            .await
            .map_err(|e| format!("update to {to}: {e}"))?;
        storage
            .commit_snapshot(snap)
            .await
            .map_err(|e| format!("commit: {e}"))?;
        if v != expected + 1 {
            return Err(format!("expected version {}, got {v}", expected + 1));
        }
    }
    Ok(())
}

async fn stale_version_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let k = key("1");
    seed(&storage, &k, "draft").await?;

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .update_state(&mut snap, &k, 0, "review", 1)
        .await
        .map_err(|e| format!("update: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let result = storage.update_state(&mut snap, &k, 0, "published", 2).await;
    let _ = storage.abort_snapshot(snap).await;
    match result {
        Err(StorageError::ConcurrentConflict { .. }) => Ok(()),
        other => Err(format!("expected ConcurrentConflict, got {other:?}")),
    }
}

async fn chained_updates_in_one_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let k = key("1");
    seed(&storage, &k, "draft").await?;

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let v1 = storage
        .update_state(&mut snap, &k, 0, "review", 1)
        .await
        .map_err(|e| format!("update 1: {e}"))?;
    let v2 = storage
        .update_state(&mut snap, &k, v1, "published", 2)
        .await
        .map_err(|e| format!("update 2: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let record = storage
        .get_state(&k)
        .await
        .map_err(|e| format!("get: {e}"))?
        .ok_or("state missing")?;
    if record.version != v2 || v2 != 2 || record.state != "published" {
        return Err(format!("unexpected final record: {record:?}"));
    }
    Ok(())
}

async fn conflict_error_carries_expected_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let k = key("1");
    seed(&storage, &k, "draft").await?;

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let result = storage.update_state(&mut snap, &k, 7, "review", 1).await;
    let _ = storage.abort_snapshot(snap).await;
    match result {
        Err(StorageError::ConcurrentConflict {
            expected_version: 7,
            ..
        }) => Ok(()),
        other => Err(format!("expected conflict on version 7, got {other:?}")),
    }
}
