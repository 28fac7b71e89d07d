//! Conformance test suite for `TransitionStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `TransitionStorage` implementation can run to verify correctness. The
//! suite covers:
//!
//! - **Initialization**: state pointer creation, duplicate detection
//! - **Snapshot isolation**: uncommitted writes invisible, committed writes visible
//! - **Atomic commit**: all-or-nothing semantics for state + history + schedule
//! - **Version validation / OCC**: optimistic concurrency conflict detection
//! - **Schedule ordering**: due scans ordered by timestamp then insertion
//! - **Concurrency**: racing tasks on one key, independent keys in parallel
//! - **Error handling**: correct error variants for invalid operations
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use workflow_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn sqlite_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_sqlite_storage().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod commit;
mod concurrent;
mod error;
mod init;
mod schedule;
mod snapshot;
mod version;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use crate::record::{FieldKey, HistoryKind, HistoryRecord, ScheduledRecord};
use crate::TransitionStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "init", "snapshot", "commit").
    pub category: String,
    /// Test name (e.g. "initialize_creates_state_at_version_0").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: TransitionStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(init::run_init_tests(&factory).await);
    results.extend(error::run_error_tests(&factory).await);
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(commit::run_commit_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(schedule::run_schedule_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

fn key(entity_id: &str) -> FieldKey {
    FieldKey::new("node", entity_id, "field_status")
}

fn make_history(key: &FieldKey, from: Option<&str>, to: &str, timestamp: i64) -> HistoryRecord {
    HistoryRecord {
        id: 0,
        key: key.clone(),
        workflow_id: "editorial".to_string(),
        from_state: from.map(str::to_string),
        to_state: to.to_string(),
        actor_id: "editor".to_string(),
        timestamp,
        comment: String::new(),
        forced: false,
        kind: HistoryKind::Transition,
        attached: BTreeMap::new(),
    }
}

fn make_scheduled(key: &FieldKey, to: &str, timestamp: i64) -> ScheduledRecord {
    ScheduledRecord {
        seq: 0,
        key: key.clone(),
        workflow_id: "editorial".to_string(),
        from_state: Some("draft".to_string()),
        to_state: to.to_string(),
        actor_id: "editor".to_string(),
        timestamp,
        comment: "later".to_string(),
        forced: false,
        attached: BTreeMap::new(),
    }
}

/// Initialize `key` at `state` in its own committed snapshot.
async fn seed<S: TransitionStorage>(storage: &S, key: &FieldKey, state: &str) -> Result<(), String> {
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .initialize_state(&mut snap, key, "editorial", state, 0)
        .await
        .map_err(|e| format!("init: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit seed: {e}"))
}

/// Read a committed state name, failing if absent.
async fn state_of<S: TransitionStorage>(storage: &S, key: &FieldKey) -> Result<String, String> {
    storage
        .get_state(key)
        .await
        .map_err(|e| format!("get_state: {e}"))?
        .map(|r| r.state)
        .ok_or_else(|| format!("no state for {key}"))
}
