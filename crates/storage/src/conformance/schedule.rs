//! Scheduled-transition queue conformance tests.

use std::future::Future;

use super::{key, make_scheduled, TestResult};
use crate::TransitionStorage;

pub(super) async fn run_schedule_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "schedule",
            "due_ordered_by_timestamp_then_insertion",
            due_ordered_by_timestamp_then_insertion(factory).await,
        ),
        TestResult::from_result(
            "schedule",
            "due_excludes_future_records",
            due_excludes_future_records(factory).await,
        ),
        TestResult::from_result(
            "schedule",
            "list_scheduled_tolerates_duplicates",
            list_scheduled_tolerates_duplicates(factory).await,
        ),
        TestResult::from_result(
            "schedule",
            "delete_counts_staged_inserts",
            delete_counts_staged_inserts(factory).await,
        ),
        TestResult::from_result(
            "schedule",
            "delete_only_touches_its_key",
            delete_only_touches_its_key(factory).await,
        ),
    ]
}

async fn due_ordered_by_timestamp_then_insertion<S, F, Fut>(factory: &F) -> Result<(), String>
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
    // Inserted out of timestamp order; "b" and "c" tie on timestamp.
    for (entity, ts) in [("a", 300), ("b", 100), ("c", 100)] {
        storage
            .insert_scheduled(&mut snap, make_scheduled(&key(entity), "published", ts))
            .await
            .map_err(|e| format!("insert {entity}: {e}"))?;
    }
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let due = storage
        .list_due(1_000)
        .await
        .map_err(|e| format!("list_due: {e}"))?;
    let order: Vec<&str> = due.iter().map(|r| r.key.entity_id.as_str()).collect();
    if order != ["b", "c", "a"] {
        return Err(format!("unexpected due order: {order:?}"));
    }
    Ok(())
}

async fn due_excludes_future_records<S, F, Fut>(factory: &F) -> Result<(), String>
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
    storage
        .insert_scheduled(&mut snap, make_scheduled(&key("1"), "published", 100))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    storage
        .insert_scheduled(&mut snap, make_scheduled(&key("2"), "published", 101))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let due = storage
        .list_due(100)
        .await
        .map_err(|e| format!("list_due: {e}"))?;
    if due.len() != 1 || due[0].key.entity_id != "1" {
        return Err(format!("expected only entity 1 due at 100, got {due:?}"));
    }
    Ok(())
}

async fn list_scheduled_tolerates_duplicates<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .insert_scheduled(&mut snap, make_scheduled(&k, "archived", 900))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    storage
        .insert_scheduled(&mut snap, make_scheduled(&k, "published", 200))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let records = storage
        .list_scheduled(&k)
        .await
        .map_err(|e| format!("list_scheduled: {e}"))?;
    match records.first() {
        Some(r) if records.len() == 2 && r.to_state == "published" => Ok(()),
        _ => Err(format!("expected soonest first of two, got {records:?}")),
    }
}

async fn delete_counts_staged_inserts<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .insert_scheduled(&mut snap, make_scheduled(&k, "published", 200))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    let removed = storage
        .delete_scheduled(&mut snap, &k)
        .await
        .map_err(|e| format!("delete: {e}"))?;
    storage
        .insert_scheduled(&mut snap, make_scheduled(&k, "archived", 300))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    if removed != 1 {
        return Err(format!("expected delete to remove 1 staged insert, got {removed}"));
    }
    let records = storage
        .list_scheduled(&k)
        .await
        .map_err(|e| format!("list_scheduled: {e}"))?;
    if records.len() != 1 || records[0].to_state != "archived" {
        return Err(format!("expected only the replacement, got {records:?}"));
    }
    Ok(())
}

async fn delete_only_touches_its_key<S, F, Fut>(factory: &F) -> Result<(), String>
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
    storage
        .insert_scheduled(&mut snap, make_scheduled(&key("1"), "published", 200))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    storage
        .insert_scheduled(&mut snap, make_scheduled(&key("2"), "published", 200))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .delete_scheduled(&mut snap, &key("1"))
        .await
        .map_err(|e| format!("delete: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let due = storage
        .list_due(1_000)
        .await
        .map_err(|e| format!("list_due: {e}"))?;
    if due.len() != 1 || due[0].key.entity_id != "2" {
        return Err(format!("delete removed the wrong records: {due:?}"));
    }
    Ok(())
}
