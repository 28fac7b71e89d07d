use std::future::Future;
use std::sync::Arc;

use super::{key, make_history, seed, state_of, TestResult};
use crate::{StorageError, TransitionStorage};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "concurrent_updates_exactly_one_wins",
            concurrent_updates_exactly_one_wins(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "concurrent_updates_different_keys_all_succeed",
            concurrent_updates_different_keys_all_succeed(factory).await,
        ),
    ]
}

// ── Concurrent update: exactly one wins ─────────────────────────────────────

/// N tasks each open a snapshot, move the same field from version 0 and
/// append a history row. Exactly one commit succeeds; the rest conflict, and
/// exactly one history row survives.
async fn concurrent_updates_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let k = key("1");
    seed(storage.as_ref(), &k, "draft").await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        let k = k.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let staged = s
                .update_state(&mut snap, &k, 0, &format!("state-{i}"), i as i64)
                .await;
            let result = match staged {
                Ok(_) => {
                    s.append_history(&mut snap, make_history(&k, Some("draft"), "x", i as i64))
                        .await?;
                    s.commit_snapshot(snap).await
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            };
            match result {
                Ok(()) => Ok(true),
                Err(StorageError::ConcurrentConflict { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    let history = storage
        .list_history(&k)
        .await
        .map_err(|e| format!("list: {e}"))?;
    if history.len() != 1 {
        return Err(format!("expected 1 history row, got {}", history.len()));
    }
    Ok(())
}

async fn concurrent_updates_different_keys_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    for i in 0..N {
        seed(storage.as_ref(), &key(&format!("e{i}")), "draft").await?;
    }

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let k = key(&format!("e{i}"));
            let mut snap = s.begin_snapshot().await?;
            s.update_state(&mut snap, &k, 0, "review", 1).await?;
            s.commit_snapshot(snap).await
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
    }

    for i in 0..N {
        let state = state_of(storage.as_ref(), &key(&format!("e{i}"))).await?;
        if state != "review" {
            return Err(format!("e{i} ended in {state}"));
        }
    }
    Ok(())
}
