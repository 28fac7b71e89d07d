use std::future::Future;

use super::{key, seed, TestResult};
use crate::{StorageError, TransitionStorage};

pub(super) async fn run_init_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "init",
            "initialize_creates_state_at_version_0",
            initialize_creates_state_at_version_0(factory).await,
        ),
        TestResult::from_result(
            "init",
            "initialize_duplicate_rejected",
            initialize_duplicate_rejected(factory).await,
        ),
        TestResult::from_result(
            "init",
            "initialize_duplicate_in_same_snapshot_rejected",
            initialize_duplicate_in_same_snapshot_rejected(factory).await,
        ),
        TestResult::from_result(
            "init",
            "fields_on_same_entity_are_independent",
            fields_on_same_entity_are_independent(factory).await,
        ),
    ]
}

async fn initialize_creates_state_at_version_0<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let k = key("1");
    seed(&storage, &k, "draft").await?;

    let record = storage
        .get_state(&k)
        .await
        .map_err(|e| format!("get: {e}"))?
        .ok_or("state missing after commit")?;
    if record.version != 0 {
        return Err(format!("expected version 0, got {}", record.version));
    }
    if record.state != "draft" || record.workflow_id != "editorial" {
        return Err(format!("unexpected record: {record:?}"));
    }
    Ok(())
}

async fn initialize_duplicate_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let result = storage
        .initialize_state(&mut snap, &k, "editorial", "review", 0)
        .await;
    let _ = storage.abort_snapshot(snap).await;
    match result {
        Err(StorageError::AlreadyInitialized { .. }) => Ok(()),
        other => Err(format!("expected AlreadyInitialized, got {other:?}")),
    }
}

async fn initialize_duplicate_in_same_snapshot_rejected<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let k = key("1");
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .initialize_state(&mut snap, &k, "editorial", "draft", 0)
        .await
        .map_err(|e| format!("first init: {e}"))?;
    let result = storage
        .initialize_state(&mut snap, &k, "editorial", "draft", 0)
        .await;
    let _ = storage.abort_snapshot(snap).await;
    match result {
        Err(StorageError::AlreadyInitialized { .. }) => Ok(()),
        other => Err(format!("expected AlreadyInitialized, got {other:?}")),
    }
}

async fn fields_on_same_entity_are_independent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let status = key("1");
    let mut legal = status.clone();
    legal.field_name = "field_legal".to_string();

    seed(&storage, &status, "draft").await?;
    seed(&storage, &legal, "pending").await?;

    let a = super::state_of(&storage, &status).await?;
    let b = super::state_of(&storage, &legal).await?;
    if a != "draft" || b != "pending" {
        return Err(format!("fields bled into each other: {a} / {b}"));
    }
    Ok(())
}
