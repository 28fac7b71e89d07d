//! Transition executor.
//!
//! Applies a validated transition record through a `TransitionStorage`
//! backend using snapshot semantics. The state pointer update, the removal of
//! superseded schedules, and the history append are staged in one snapshot:
//! either all are committed or the snapshot is aborted and nothing changes.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::info;
use workflow_storage::{FieldKey, TransitionStorage};

use crate::error::WorkflowError;
use crate::history::{EntryKind, HistoryEntry, HistoryStore};
use crate::locks::KeyLocks;
use crate::permission::Actor;
use crate::rules::RuleEngine;
use crate::scheduler::Scheduler;
use crate::transition::TransitionRecord;

pub struct Executor<S: TransitionStorage> {
    storage: Arc<S>,
    rules: RuleEngine,
    scheduler: Scheduler<S>,
    history: HistoryStore<S>,
    locks: Arc<KeyLocks>,
}

impl<S: TransitionStorage> Clone for Executor<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            rules: self.rules.clone(),
            scheduler: self.scheduler.clone(),
            history: self.history.clone(),
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<S: TransitionStorage> Executor<S> {
    pub fn new(
        storage: Arc<S>,
        rules: RuleEngine,
        scheduler: Scheduler<S>,
        history: HistoryStore<S>,
        locks: Arc<KeyLocks>,
    ) -> Self {
        Self {
            storage,
            rules,
            scheduler,
            history,
            locks,
        }
    }

    /// Execute `record` on behalf of `actor`.
    ///
    /// 1. Refuse records that already ran.
    /// 2. Re-validate state validity, and permission unless forced.
    /// 3. Under the field lock, check the field is still in `from_state`.
    /// 4. Move the state pointer, drop queued schedules, append history.
    /// 5. Commit, then mark the record executed.
    ///
    /// On error nothing was applied and the record is unchanged.
    pub async fn execute(
        &self,
        record: &mut TransitionRecord,
        actor: &Actor,
        now: OffsetDateTime,
    ) -> Result<HistoryEntry, WorkflowError> {
        if record.is_executed() {
            return Err(WorkflowError::AlreadyExecuted);
        }
        let key = record.key().ok_or(WorkflowError::NoTargetEntity)?;
        record.validate(&self.rules, actor)?;

        let _guard = self.locks.acquire(&key).await;
        let mut snapshot = self.storage.begin_snapshot().await?;

        let (entry, superseded) = match self.apply(&mut snapshot, record, &key, now).await {
            Ok(applied) => applied,
            Err(e) => {
                let _ = self.storage.abort_snapshot(snapshot).await;
                return Err(e);
            }
        };
        self.storage.commit_snapshot(snapshot).await?;

        record.mark_executed(entry.id, now);
        info!(
            key = %key,
            from = record.from_state(),
            to = %entry.to_state,
            actor = %entry.actor_id,
            forced = entry.forced,
            history_id = entry.id,
            "executed transition"
        );
        if superseded > 0 {
            info!(key = %key, superseded, "dropped superseded scheduled transitions");
        }
        Ok(entry)
    }

    async fn apply(
        &self,
        snapshot: &mut S::Snapshot,
        record: &TransitionRecord,
        key: &FieldKey,
        now: OffsetDateTime,
    ) -> Result<(HistoryEntry, usize), WorkflowError> {
        let to_state = record.to_state().ok_or(WorkflowError::NoTargetState)?;
        let workflow = self.rules.registry().workflow(record.workflow_id())?;
        let at = now.unix_timestamp();

        // A field without a state pointer is still in the creation state.
        let current = self.storage.get_state_for_update(snapshot, key).await?;
        let found = current
            .as_ref()
            .map(|c| c.state.as_str())
            .unwrap_or(workflow.creation_state().id.as_str());
        if found != record.from_state() {
            return Err(WorkflowError::StateMismatch {
                key: key.to_string(),
                expected: record.from_state().to_string(),
                found: found.to_string(),
            });
        }

        match &current {
            Some(state) => {
                self.storage
                    .update_state(snapshot, key, state.version, to_state, at)
                    .await?;
            }
            None => {
                self.storage
                    .initialize_state(snapshot, key, record.workflow_id(), to_state, at)
                    .await?;
            }
        }

        let superseded = self.scheduler.cancel_in(snapshot, key).await?;

        let mut entry = HistoryEntry {
            id: 0,
            entity: record
                .entity()
                .cloned()
                .ok_or(WorkflowError::NoTargetEntity)?,
            field_name: record.field_name().to_string(),
            workflow_id: record.workflow_id().to_string(),
            from_state: Some(record.from_state().to_string()),
            to_state: to_state.to_string(),
            actor_id: record.actor_id().to_string(),
            timestamp: now,
            comment: record.comment().to_string(),
            forced: record.is_forced(),
            kind: EntryKind::Transition,
            attached: record.attached().clone(),
        };
        entry.id = self.history.append(snapshot, &entry).await?;
        Ok((entry, superseded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{GrantedPermissions, PermissionKey};
    use crate::registry::StateRegistry;
    use crate::types::{EntityRef, State, TransitionRule, Workflow, WorkflowSettings};
    use time::macros::datetime;
    use time::Duration;
    use workflow_storage::InMemoryStorage;

    const NOW: OffsetDateTime = datetime!(2026-01-01 12:00 UTC);

    struct Fixture {
        storage: Arc<InMemoryStorage>,
        scheduler: Scheduler<InMemoryStorage>,
        history: HistoryStore<InMemoryStorage>,
        executor: Executor<InMemoryStorage>,
    }

    fn fixture() -> Fixture {
        let states = ["draft", "review", "published"]
            .iter()
            .enumerate()
            .map(|(i, id)| State {
                id: id.to_string(),
                label: id.to_string(),
                creation: i == 0,
                weight: i as i32,
            })
            .collect();
        let rules = [("draft", "review"), ("review", "published")]
            .iter()
            .map(|(from, to)| TransitionRule {
                from: from.to_string(),
                to: to.to_string(),
            })
            .collect();
        let mut registry = StateRegistry::new();
        registry
            .register(Workflow::new("w", "W", states, rules, WorkflowSettings::default()).unwrap())
            .unwrap();
        let registry = Arc::new(registry);

        let storage = Arc::new(InMemoryStorage::new());
        let locks = Arc::new(KeyLocks::new());
        let rules = RuleEngine::new(Arc::clone(&registry), Arc::new(GrantedPermissions));
        let scheduler = Scheduler::new(Arc::clone(&storage), registry, Arc::clone(&locks));
        let history = HistoryStore::new(Arc::clone(&storage));
        let executor = Executor::new(
            Arc::clone(&storage),
            rules,
            scheduler.clone(),
            history.clone(),
            locks,
        );
        Fixture {
            storage,
            scheduler,
            history,
            executor,
        }
    }

    fn node() -> EntityRef {
        EntityRef::new("node", "1")
    }

    fn record(from: &str, to: &str, actor: &str) -> TransitionRecord {
        let mut record = TransitionRecord::create("w", "field_status", Some(node()), from, NOW);
        record.set_values(to, actor, NOW, "").unwrap();
        record
    }

    fn editor() -> Actor {
        Actor::new("a")
            .grant(PermissionKey::transition("w", "draft", "review"))
            .grant(PermissionKey::transition("w", "review", "published"))
    }

    #[tokio::test]
    async fn first_execution_initializes_state() {
        let f = fixture();
        let mut rec = record("draft", "review", "a");
        let entry = f.executor.execute(&mut rec, &editor(), NOW).await.unwrap();

        assert!(rec.is_executed());
        assert_eq!(rec.history_id(), Some(entry.id));
        assert_eq!(entry.from_state.as_deref(), Some("draft"));
        assert_eq!(entry.timestamp, NOW);
        let state = f.storage.get_state(&node().field("field_status")).await.unwrap().unwrap();
        assert_eq!(state.state, "review");
        assert_eq!(state.version, 0);
    }

    #[tokio::test]
    async fn second_execution_rejected_without_new_history() {
        let f = fixture();
        let mut rec = record("draft", "review", "a");
        f.executor.execute(&mut rec, &editor(), NOW).await.unwrap();
        assert!(matches!(
            f.executor.execute(&mut rec, &editor(), NOW).await,
            Err(WorkflowError::AlreadyExecuted)
        ));
        assert_eq!(f.history.list_for(&node(), "field_status").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_from_state_is_rejected() {
        let f = fixture();
        f.executor
            .execute(&mut record("draft", "review", "a"), &editor(), NOW)
            .await
            .unwrap();

        let mut stale = record("draft", "review", "a");
        let err = f.executor.execute(&mut stale, &editor(), NOW).await.unwrap_err();
        assert!(matches!(err, WorkflowError::StateMismatch { .. }));
        assert!(!stale.is_executed());
        assert_eq!(f.history.list_for(&node(), "field_status").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn execution_drops_queued_schedule() {
        let f = fixture();
        f.executor
            .execute(&mut record("draft", "review", "a"), &editor(), NOW)
            .await
            .unwrap();

        let mut later = record("review", "published", "a");
        later
            .set_values("published", "a", NOW + Duration::hours(1), "")
            .unwrap();
        later.schedule(true, true, NOW).unwrap();
        f.scheduler.store(&later).await.unwrap();

        f.executor
            .execute(&mut record("review", "published", "a"), &editor(), NOW)
            .await
            .unwrap();
        assert!(f
            .scheduler
            .lookup_soonest(&node(), "field_status")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn forced_skips_permission_not_validity() {
        let f = fixture();
        let nobody = Actor::new("nobody");

        let mut denied = record("draft", "review", "nobody");
        assert!(matches!(
            f.executor.execute(&mut denied, &nobody, NOW).await,
            Err(WorkflowError::TransitionNotPermitted { .. })
        ));

        let mut bogus = record("draft", "archived", "nobody");
        bogus.force(true).unwrap();
        assert!(matches!(
            f.executor.execute(&mut bogus, &nobody, NOW).await,
            Err(WorkflowError::UnknownState { .. })
        ));

        let mut forced = record("draft", "published", "nobody");
        forced.force(true).unwrap();
        let entry = f.executor.execute(&mut forced, &nobody, NOW).await.unwrap();
        assert!(entry.forced);
        assert_eq!(entry.to_state, "published");
    }

    #[tokio::test]
    async fn missing_entity_is_rejected() {
        let f = fixture();
        let mut rec = TransitionRecord::create("w", "field_status", None, "draft", NOW);
        rec.set_values("review", "a", NOW, "").unwrap();
        assert!(matches!(
            f.executor.execute(&mut rec, &editor(), NOW).await,
            Err(WorkflowError::NoTargetEntity)
        ));
    }
}
