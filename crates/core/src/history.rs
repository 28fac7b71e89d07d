//! History store: the append-only ledger of executed transitions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use workflow_storage::{FieldKey, HistoryKind, HistoryRecord, TransitionStorage};

use crate::error::WorkflowError;
use crate::fields::AttachedFields;
use crate::transition::from_unix;
use crate::types::EntityRef;

/// What a history entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    Transition,
    /// Replaces the comment of entry `corrects` when displayed.
    CommentCorrection { corrects: u64 },
}

/// An immutable record of a completed transition.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: u64,
    pub entity: EntityRef,
    pub field_name: String,
    pub workflow_id: String,
    /// `None` when the field had no state before this transition.
    pub from_state: Option<String>,
    pub to_state: String,
    pub actor_id: String,
    pub timestamp: OffsetDateTime,
    pub comment: String,
    pub forced: bool,
    pub kind: EntryKind,
    pub attached: AttachedFields,
}

impl HistoryEntry {
    pub fn key(&self) -> FieldKey {
        self.entity.field(&self.field_name)
    }

    pub(crate) fn from_record(record: HistoryRecord) -> Result<Self, WorkflowError> {
        Ok(Self {
            id: record.id,
            entity: EntityRef::new(&record.key.entity_type, &record.key.entity_id),
            field_name: record.key.field_name,
            workflow_id: record.workflow_id,
            from_state: record.from_state,
            to_state: record.to_state,
            actor_id: record.actor_id,
            timestamp: from_unix(record.timestamp)?,
            comment: record.comment,
            forced: record.forced,
            kind: match record.kind {
                HistoryKind::Transition => EntryKind::Transition,
                HistoryKind::CommentCorrection { corrects } => {
                    EntryKind::CommentCorrection { corrects }
                }
            },
            attached: record.attached,
        })
    }

    pub(crate) fn to_record(&self) -> HistoryRecord {
        HistoryRecord {
            id: self.id,
            key: self.key(),
            workflow_id: self.workflow_id.clone(),
            from_state: self.from_state.clone(),
            to_state: self.to_state.clone(),
            actor_id: self.actor_id.clone(),
            timestamp: self.timestamp.unix_timestamp(),
            comment: self.comment.clone(),
            forced: self.forced,
            kind: match self.kind {
                EntryKind::Transition => HistoryKind::Transition,
                EntryKind::CommentCorrection { corrects } => {
                    HistoryKind::CommentCorrection { corrects }
                }
            },
            attached: self.attached.clone(),
        }
    }
}

/// Read and append access to history. There is no edit or delete.
pub struct HistoryStore<S: TransitionStorage> {
    storage: Arc<S>,
}

impl<S: TransitionStorage> Clone for HistoryStore<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: TransitionStorage> HistoryStore<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Stage `entry` in `snapshot`. Returns the id it will carry once committed.
    pub async fn append(
        &self,
        snapshot: &mut S::Snapshot,
        entry: &HistoryEntry,
    ) -> Result<u64, WorkflowError> {
        Ok(self.storage.append_history(snapshot, entry.to_record()).await?)
    }

    /// Entries for one field, oldest first.
    pub async fn list_for(
        &self,
        entity: &EntityRef,
        field_name: &str,
    ) -> Result<Vec<HistoryEntry>, WorkflowError> {
        self.storage
            .list_history(&entity.field(field_name))
            .await?
            .into_iter()
            .map(HistoryEntry::from_record)
            .collect()
    }

    pub async fn get(&self, id: u64) -> Result<HistoryEntry, WorkflowError> {
        HistoryEntry::from_record(self.storage.get_history(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use time::macros::datetime;
    use workflow_storage::InMemoryStorage;

    fn entry(to: &str, at: OffsetDateTime) -> HistoryEntry {
        HistoryEntry {
            id: 0,
            entity: EntityRef::new("node", "1"),
            field_name: "field_status".to_string(),
            workflow_id: "editorial".to_string(),
            from_state: None,
            to_state: to.to_string(),
            actor_id: "editor".to_string(),
            timestamp: at,
            comment: String::new(),
            forced: false,
            kind: EntryKind::Transition,
            attached: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn entries_listed_in_append_order() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = HistoryStore::new(Arc::clone(&storage));

        let mut snap = storage.begin_snapshot().await.unwrap();
        let first = store
            .append(&mut snap, &entry("draft", datetime!(2026-01-01 00:00 UTC)))
            .await
            .unwrap();
        let second = store
            .append(&mut snap, &entry("published", datetime!(2026-01-02 00:00 UTC)))
            .await
            .unwrap();
        storage.commit_snapshot(snap).await.unwrap();
        assert!(second > first);

        let entries = store.list_for(&EntityRef::new("node", "1"), "field_status").await.unwrap();
        let targets: Vec<&str> = entries.iter().map(|e| e.to_state.as_str()).collect();
        assert_eq!(targets, ["draft", "published"]);
        assert_eq!(store.get(second).await.unwrap().timestamp, datetime!(2026-01-02 00:00 UTC));
    }

    #[tokio::test]
    async fn aborted_append_leaves_no_trace() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = HistoryStore::new(Arc::clone(&storage));

        let mut snap = storage.begin_snapshot().await.unwrap();
        store
            .append(&mut snap, &entry("draft", datetime!(2026-01-01 00:00 UTC)))
            .await
            .unwrap();
        storage.abort_snapshot(snap).await.unwrap();

        assert!(store
            .list_for(&EntityRef::new("node", "1"), "field_status")
            .await
            .unwrap()
            .is_empty());
    }
}
