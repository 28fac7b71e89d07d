//! Snapshot isolation conformance tests.
//!
//! Verifies that uncommitted writes are invisible outside a snapshot,
//! visible inside it, and discarded on abort.

use std::future::Future;

use super::{key, make_history, make_scheduled, seed, state_of, TestResult};
use crate::TransitionStorage;

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "snapshot",
            "uncommitted_init_invisible",
            uncommitted_init_invisible(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "uncommitted_update_invisible",
            uncommitted_update_invisible(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "snapshot_reads_its_own_writes",
            snapshot_reads_its_own_writes(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "uncommitted_history_and_schedule_invisible",
            uncommitted_history_and_schedule_invisible(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "abort_discards_update",
            abort_discards_update(factory).await,
        ),
    ]
}

async fn uncommitted_init_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .map_err(|e| format!("init: {e}"))?;
    let seen = storage
        .get_state(&k)
        .await
        .map_err(|e| format!("get: {e}"))?;
    let _ = storage.abort_snapshot(snap).await;
    if seen.is_some() {
        return Err("uncommitted init visible outside snapshot".to_string());
    }
    Ok(())
}

async fn uncommitted_update_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .update_state(&mut snap, &k, 0, "review", 10)
        .await
        .map_err(|e| format!("update: {e}"))?;
    let outside = state_of(&storage, &k).await?;
    let _ = storage.abort_snapshot(snap).await;
    if outside != "draft" {
        return Err(format!("expected draft outside snapshot, got {outside}"));
    }
    Ok(())
}

async fn snapshot_reads_its_own_writes<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .update_state(&mut snap, &k, 0, "review", 10)
        .await
        .map_err(|e| format!("update: {e}"))?;
    let inside = storage
        .get_state_for_update(&mut snap, &k)
        .await
        .map_err(|e| format!("get_for_update: {e}"))?;
    let _ = storage.abort_snapshot(snap).await;
    match inside {
        Some(r) if r.state == "review" && r.version == 1 => Ok(()),
        other => Err(format!("expected review@1 inside snapshot, got {other:?}")),
    }
}

async fn uncommitted_history_and_schedule_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .append_history(&mut snap, make_history(&k, None, "draft", 1))
        .await
        .map_err(|e| format!("append: {e}"))?;
    storage
        .insert_scheduled(&mut snap, make_scheduled(&k, "published", 100))
        .await
        .map_err(|e| format!("schedule: {e}"))?;

    let history = storage
        .list_history(&k)
        .await
        .map_err(|e| format!("list_history: {e}"))?;
    let scheduled = storage
        .list_scheduled(&k)
        .await
        .map_err(|e| format!("list_scheduled: {e}"))?;
    let _ = storage.abort_snapshot(snap).await;
    if !history.is_empty() || !scheduled.is_empty() {
        return Err("uncommitted history or schedule visible".to_string());
    }
    Ok(())
}

async fn abort_discards_update<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .update_state(&mut snap, &k, 0, "review", 10)
        .await
        .map_err(|e| format!("update: {e}"))?;
    storage
        .abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    let record = storage
        .get_state(&k)
        .await
        .map_err(|e| format!("get: {e}"))?
        .ok_or("state vanished")?;
    if record.state != "draft" || record.version != 0 {
        return Err(format!("abort leaked: {record:?}"));
    }
    Ok(())
}
