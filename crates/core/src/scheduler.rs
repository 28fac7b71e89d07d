//! Transition scheduler: transitions waiting for their timestamp.
//!
//! A field has at most one outstanding scheduled transition. Storing a new
//! one replaces whatever was queued for the same field. Reads still tolerate
//! duplicates left by other writers and use the soonest.

use std::collections::BTreeSet;
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::info;
use workflow_storage::{FieldKey, ScheduledRecord, TransitionStorage};

use crate::error::WorkflowError;
use crate::locks::KeyLocks;
use crate::registry::StateRegistry;
use crate::transition::TransitionRecord;
use crate::types::EntityRef;

pub struct Scheduler<S: TransitionStorage> {
    storage: Arc<S>,
    registry: Arc<StateRegistry>,
    locks: Arc<KeyLocks>,
}

impl<S: TransitionStorage> Clone for Scheduler<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            registry: Arc::clone(&self.registry),
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<S: TransitionStorage> Scheduler<S> {
    pub fn new(storage: Arc<S>, registry: Arc<StateRegistry>, locks: Arc<KeyLocks>) -> Self {
        Self {
            storage,
            registry,
            locks,
        }
    }

    /// Queue a scheduled, unexecuted record, replacing any earlier one for
    /// the same field. Returns the insertion sequence.
    pub async fn store(&self, record: &TransitionRecord) -> Result<u64, WorkflowError> {
        if record.is_executed() {
            return Err(WorkflowError::AlreadyExecuted);
        }
        if !record.is_scheduled() {
            return Err(WorkflowError::SchedulingNotAllowed {
                reason: "record is not marked as scheduled".to_string(),
            });
        }
        let row = record.to_scheduled_record()?;
        let key = row.key.clone();
        let _guard = self.locks.acquire(&key).await;

        let mut snap = self.storage.begin_snapshot().await?;
        let staged = async {
            let replaced = self.cancel_in(&mut snap, &key).await?;
            let seq = self.storage.insert_scheduled(&mut snap, row).await?;
            Ok::<_, WorkflowError>((replaced, seq))
        }
        .await;
        let (replaced, seq) = match staged {
            Ok(v) => v,
            Err(e) => {
                let _ = self.storage.abort_snapshot(snap).await;
                return Err(e);
            }
        };
        self.storage.commit_snapshot(snap).await?;

        info!(
            key = %key,
            to = record.to_state().unwrap_or_default(),
            at = record.timestamp().unix_timestamp(),
            replaced,
            "scheduled transition"
        );
        Ok(seq)
    }

    /// Records with `timestamp <= now`, soonest first, one per field.
    pub async fn due_as_of(&self, now: OffsetDateTime) -> Result<Vec<TransitionRecord>, WorkflowError> {
        let rows = self.storage.list_due(now.unix_timestamp()).await?;
        let mut seen = BTreeSet::new();
        let mut due = Vec::new();
        for row in rows {
            if seen.insert(row.key.clone()) {
                due.push(self.to_record(row)?);
            }
        }
        Ok(due)
    }

    /// Discard every outstanding record for a field. Returns how many.
    pub async fn cancel(&self, entity: &EntityRef, field_name: &str) -> Result<usize, WorkflowError> {
        let key = entity.field(field_name);
        let _guard = self.locks.acquire(&key).await;

        let mut snap = self.storage.begin_snapshot().await?;
        let removed = match self.cancel_in(&mut snap, &key).await {
            Ok(n) => n,
            Err(e) => {
                let _ = self.storage.abort_snapshot(snap).await;
                return Err(e);
            }
        };
        self.storage.commit_snapshot(snap).await?;
        if removed > 0 {
            info!(key = %key, removed, "cancelled scheduled transition");
        }
        Ok(removed)
    }

    /// Drop the queued row `record` was loaded from. A row stored for the
    /// same field since then is left alone. Returns whether anything was
    /// removed.
    pub async fn discard(&self, record: &TransitionRecord) -> Result<bool, WorkflowError> {
        let (Some(key), Some(seq)) = (record.key(), record.schedule_seq()) else {
            return Ok(false);
        };
        let _guard = self.locks.acquire(&key).await;

        // `store` clears the field before inserting, so `seq` is only still
        // queued if nothing replaced it.
        let rows = self.storage.list_scheduled(&key).await?;
        if !rows.iter().any(|row| row.seq == seq) {
            return Ok(false);
        }
        let mut snap = self.storage.begin_snapshot().await?;
        if let Err(e) = self.cancel_in(&mut snap, &key).await {
            let _ = self.storage.abort_snapshot(snap).await;
            return Err(e);
        }
        self.storage.commit_snapshot(snap).await?;
        info!(key = %key, seq, "discarded scheduled transition");
        Ok(true)
    }

    /// Stage removal inside an open snapshot. The caller holds the key lock.
    pub(crate) async fn cancel_in(
        &self,
        snapshot: &mut S::Snapshot,
        key: &FieldKey,
    ) -> Result<usize, WorkflowError> {
        Ok(self.storage.delete_scheduled(snapshot, key).await?)
    }

    /// The earliest outstanding record for a field.
    pub async fn lookup_soonest(
        &self,
        entity: &EntityRef,
        field_name: &str,
    ) -> Result<Option<TransitionRecord>, WorkflowError> {
        let rows = self.storage.list_scheduled(&entity.field(field_name)).await?;
        rows.into_iter().next().map(|row| self.to_record(row)).transpose()
    }

    fn to_record(&self, row: ScheduledRecord) -> Result<TransitionRecord, WorkflowError> {
        let creation = self.registry.creation_state_of(&row.workflow_id)?;
        TransitionRecord::from_scheduled_record(row, &creation.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{State, TransitionRule, Workflow, WorkflowSettings};
    use time::macros::datetime;
    use time::Duration;
    use workflow_storage::InMemoryStorage;

    const NOW: OffsetDateTime = datetime!(2026-01-01 12:00 UTC);

    fn registry() -> Arc<StateRegistry> {
        let states = ["draft", "published"]
            .iter()
            .enumerate()
            .map(|(i, id)| State {
                id: id.to_string(),
                label: id.to_string(),
                creation: i == 0,
                weight: i as i32,
            })
            .collect();
        let rules = vec![TransitionRule {
            from: "draft".to_string(),
            to: "published".to_string(),
        }];
        let mut registry = StateRegistry::new();
        registry
            .register(Workflow::new("w", "W", states, rules, WorkflowSettings::default()).unwrap())
            .unwrap();
        Arc::new(registry)
    }

    fn scheduler() -> Scheduler<InMemoryStorage> {
        Scheduler::new(
            Arc::new(InMemoryStorage::new()),
            registry(),
            Arc::new(KeyLocks::new()),
        )
    }

    fn scheduled(entity_id: &str, at: OffsetDateTime) -> TransitionRecord {
        let mut record = TransitionRecord::create(
            "w",
            "field_status",
            Some(EntityRef::new("node", entity_id)),
            "draft",
            NOW,
        );
        record.set_values("published", "a", at, "").unwrap();
        record.schedule(true, true, NOW).unwrap();
        record
    }

    #[tokio::test]
    async fn due_records_come_soonest_first() {
        let s = scheduler();
        s.store(&scheduled("1", NOW + Duration::hours(3))).await.unwrap();
        s.store(&scheduled("2", NOW + Duration::hours(1))).await.unwrap();
        s.store(&scheduled("3", NOW + Duration::days(2))).await.unwrap();

        let due = s.due_as_of(NOW + Duration::hours(3)).await.unwrap();
        let ids: Vec<&str> = due.iter().map(|r| r.entity().unwrap().entity_id.as_str()).collect();
        assert_eq!(ids, ["2", "1"]);
        assert!(due.iter().all(|r| r.is_scheduled() && !r.is_executed()));
    }

    #[tokio::test]
    async fn store_replaces_earlier_schedule() {
        let s = scheduler();
        s.store(&scheduled("1", NOW + Duration::hours(1))).await.unwrap();
        s.store(&scheduled("1", NOW + Duration::hours(5))).await.unwrap();

        let node = EntityRef::new("node", "1");
        let pending = s.lookup_soonest(&node, "field_status").await.unwrap().unwrap();
        assert_eq!(pending.timestamp(), NOW + Duration::hours(5));
        assert!(s.due_as_of(NOW + Duration::hours(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_rejects_unscheduled_and_executed() {
        let s = scheduler();
        let draft = TransitionRecord::create(
            "w",
            "field_status",
            Some(EntityRef::new("node", "1")),
            "draft",
            NOW,
        );
        assert!(matches!(
            s.store(&draft).await,
            Err(WorkflowError::SchedulingNotAllowed { .. })
        ));

        let mut done = scheduled("1", NOW + Duration::hours(1));
        done.mark_executed(1, NOW);
        assert!(matches!(s.store(&done).await, Err(WorkflowError::AlreadyExecuted)));
    }

    #[tokio::test]
    async fn cancel_clears_the_field() {
        let s = scheduler();
        s.store(&scheduled("1", NOW + Duration::hours(1))).await.unwrap();
        s.store(&scheduled("2", NOW + Duration::hours(1))).await.unwrap();

        let node = EntityRef::new("node", "1");
        assert_eq!(s.cancel(&node, "field_status").await.unwrap(), 1);
        assert_eq!(s.cancel(&node, "field_status").await.unwrap(), 0);
        assert!(s.lookup_soonest(&node, "field_status").await.unwrap().is_none());

        let due = s.due_as_of(NOW + Duration::hours(1)).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn discard_spares_a_replacement() {
        let s = scheduler();
        let node = EntityRef::new("node", "1");
        s.store(&scheduled("1", NOW + Duration::hours(1))).await.unwrap();
        let loaded = s.due_as_of(NOW + Duration::hours(1)).await.unwrap().remove(0);

        s.store(&scheduled("1", NOW + Duration::hours(4))).await.unwrap();
        assert!(!s.discard(&loaded).await.unwrap());
        let pending = s.lookup_soonest(&node, "field_status").await.unwrap().unwrap();
        assert_eq!(pending.timestamp(), NOW + Duration::hours(4));

        assert!(s.discard(&pending).await.unwrap());
        assert!(s.lookup_soonest(&node, "field_status").await.unwrap().is_none());
    }
}
