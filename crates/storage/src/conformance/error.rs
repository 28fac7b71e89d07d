use std::future::Future;

use super::{key, TestResult};
use crate::{StorageError, TransitionStorage};

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "error",
            "get_state_nonexistent_is_none",
            get_state_nonexistent_is_none(factory).await,
        ),
        TestResult::from_result(
            "error",
            "update_state_nonexistent",
            update_state_nonexistent(factory).await,
        ),
        TestResult::from_result(
            "error",
            "get_history_nonexistent",
            get_history_nonexistent(factory).await,
        ),
        TestResult::from_result(
            "error",
            "queries_empty_for_unknown_key",
            queries_empty_for_unknown_key(factory).await,
        ),
    ]
}

async fn get_state_nonexistent_is_none<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    match storage.get_state(&key("missing")).await {
        Ok(None) => Ok(()),
        other => Err(format!("expected Ok(None), got {other:?}")),
    }
}

async fn update_state_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let result = storage
        .update_state(&mut snap, &key("missing"), 0, "review", 1)
        .await;
    let _ = storage.abort_snapshot(snap).await;
    match result {
        Err(StorageError::NotFound { key }) if key.contains("missing") => Ok(()),
        other => Err(format!("expected NotFound, got {other:?}")),
    }
}

async fn get_history_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    match storage.get_history(9_999).await {
        Err(StorageError::HistoryNotFound { id: 9_999 }) => Ok(()),
        other => Err(format!("expected HistoryNotFound, got {other:?}")),
    }
}

async fn queries_empty_for_unknown_key<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let k = key("missing");
    let history = storage
        .list_history(&k)
        .await
        .map_err(|e| format!("list_history: {e}"))?;
    let scheduled = storage
        .list_scheduled(&k)
        .await
        .map_err(|e| format!("list_scheduled: {e}"))?;
    let due = storage
        .list_due(i64::MAX)
        .await
        .map_err(|e| format!("list_due: {e}"))?;
    if !history.is_empty() || !scheduled.is_empty() || !due.is_empty() {
        return Err("expected empty results on an empty store".to_string());
    }
    Ok(())
}
