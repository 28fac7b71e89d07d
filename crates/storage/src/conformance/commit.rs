use std::future::Future;

use super::{key, make_history, make_scheduled, seed, state_of, TestResult};
use crate::{HistoryKind, TransitionStorage};

pub(super) async fn run_commit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "commit",
            "state_history_and_cancel_all_visible_after_commit",
            state_history_and_cancel_all_visible_after_commit(factory).await,
        ),
        TestResult::from_result(
            "commit",
            "state_history_and_cancel_none_visible_after_abort",
            state_history_and_cancel_none_visible_after_abort(factory).await,
        ),
        TestResult::from_result(
            "commit",
            "history_ids_increase",
            history_ids_increase(factory).await,
        ),
        TestResult::from_result(
            "commit",
            "history_fields_preserved",
            history_fields_preserved(factory).await,
        ),
        TestResult::from_result(
            "commit",
            "conflicting_commit_publishes_nothing",
            conflicting_commit_publishes_nothing(factory).await,
        ),
    ]
}

async fn state_history_and_cancel_all_visible_after_commit<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let k = key("1");
    seed(&storage, &k, "draft").await?;
    {
        let mut snap = storage
            .begin_snapshot()
            .await
            .map_err(|e| format!("begin: {e}"))?;
        storage
            .insert_scheduled(&mut snap, make_scheduled(&k, "published", 500))
            .await
            .map_err(|e| format!("schedule: {e}"))?;
        storage
            .commit_snapshot(snap)
            .await
            .map_err(|e| format!("commit schedule: {e}"))?;
    }

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .update_state(&mut snap, &k, 0, "review", 10)
        .await
        .map_err(|e| format!("update: {e}"))?;
    storage
        .append_history(&mut snap, make_history(&k, Some("draft"), "review", 10))
        .await
        .map_err(|e| format!("append: {e}"))?;
    let removed = storage
        .delete_scheduled(&mut snap, &k)
        .await
        .map_err(|e| format!("delete: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    if removed != 1 {
        return Err(format!("expected 1 scheduled removed, got {removed}"));
    }
    if state_of(&storage, &k).await? != "review" {
        return Err("state not updated".to_string());
    }
    let history = storage
        .list_history(&k)
        .await
        .map_err(|e| format!("list_history: {e}"))?;
    let scheduled = storage
        .list_scheduled(&k)
        .await
        .map_err(|e| format!("list_scheduled: {e}"))?;
    if history.len() != 1 || !scheduled.is_empty() {
        return Err(format!(
            "expected 1 history / 0 scheduled, got {} / {}",
            history.len(),
            scheduled.len()
        ));
    }
    Ok(())
}

async fn state_history_and_cancel_none_visible_after_abort<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let k = key("1");
    seed(&storage, &k, "draft").await?;
    {
        let mut snap = storage
            .begin_snapshot()
            .await
            .map_err(|e| format!("begin: {e}"))?;
        storage
            .insert_scheduled(&mut snap, make_scheduled(&k, "published", 500))
            .await
            .map_err(|e| format!("schedule: {e}"))?;
        storage
            .commit_snapshot(snap)
            .await
            .map_err(|e| format!("commit schedule: {e}"))?;
    }

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .update_state(&mut snap, &k, 0, "review", 10)
        .await
        .map_err(|e| format!("update: {e}"))?;
    storage
        .append_history(&mut snap, make_history(&k, Some("draft"), "review", 10))
        .await
        .map_err(|e| format!("append: {e}"))?;
    storage
        .delete_scheduled(&mut snap, &k)
        .await
        .map_err(|e| format!("delete: {e}"))?;
    storage
        .abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    if state_of(&storage, &k).await? != "draft" {
        return Err("aborted update leaked".to_string());
    }
    let history = storage
        .list_history(&k)
        .await
        .map_err(|e| format!("list_history: {e}"))?;
    let scheduled = storage
        .list_scheduled(&k)
        .await
        .map_err(|e| format!("list_scheduled: {e}"))?;
    if !history.is_empty() || scheduled.len() != 1 {
        return Err("aborted history append or cancel leaked".to_string());
    }
    Ok(())
}

async fn history_ids_increase<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let first = storage
        .append_history(&mut snap, make_history(&k, None, "draft", 1))
        .await
        .map_err(|e| format!("append 1: {e}"))?;
    let second = storage
        .append_history(&mut snap, make_history(&k, Some("draft"), "review", 2))
        .await
        .map_err(|e| format!("append 2: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    if second <= first {
        return Err(format!("ids not increasing: {first} then {second}"));
    }
    let history = storage
        .list_history(&k)
        .await
        .map_err(|e| format!("list: {e}"))?;
    let ids: Vec<u64> = history.iter().map(|h| h.id).collect();
    if ids != vec![first, second] {
        return Err(format!("history out of order: {ids:?}"));
    }
    Ok(())
}

async fn history_fields_preserved<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let k = key("1");
    let mut record = make_history(&k, Some("draft"), "review", 42);
    record.comment = "ready for review".to_string();
    record.forced = true;
    record
        .attached
        .insert("field_reason".to_string(), serde_json::json!("typo fix"));

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let id = storage
        .append_history(&mut snap, record.clone())
        .await
        .map_err(|e| format!("append: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let stored = storage
        .get_history(id)
        .await
        .map_err(|e| format!("get_history: {e}"))?;
    record.id = id;
    if stored != record {
        return Err(format!("fields not preserved: {stored:?}"));
    }
    if stored.kind != HistoryKind::Transition {
        return Err("kind changed".to_string());
    }
    Ok(())
}

async fn conflicting_commit_publishes_nothing<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let k = key("1");
    seed(&storage, &k, "draft").await?;

    let mut slow = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin slow: {e}"))?;
    let mut fast = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin fast: {e}"))?;

    let slow_staged = storage.update_state(&mut slow, &k, 0, "published", 5).await;
    storage
        .append_history(&mut slow, make_history(&k, Some("draft"), "published", 5))
        .await
        .map_err(|e| format!("append slow: {e}"))?;

    storage
        .update_state(&mut fast, &k, 0, "review", 6)
        .await
        .map_err(|e| format!("update fast: {e}"))?;
    storage
        .commit_snapshot(fast)
        .await
        .map_err(|e| format!("commit fast: {e}"))?;

    // The slow writer conflicts either when staging or when committing.
    let slow_result = match slow_staged {
        Ok(_) => storage.commit_snapshot(slow).await,
        Err(e) => {
            let _ = storage.abort_snapshot(slow).await;
            Err(e)
        }
    };
    if slow_result.is_ok() {
        return Err("second writer on version 0 committed".to_string());
    }
    if state_of(&storage, &k).await? != "review" {
        return Err("conflicting writer overwrote state".to_string());
    }
    let history = storage
        .list_history(&k)
        .await
        .map_err(|e| format!("list: {e}"))?;
    if !history.is_empty() {
        return Err("history from conflicting commit leaked".to_string());
    }
    Ok(())
}
