//! In-memory reference backend.
//!
//! Snapshots stage their writes locally and apply them under a single lock on
//! commit. Version checks run twice: when a write is staged (against what the
//! snapshot can see) and again at commit (against what other snapshots have
//! committed in the meantime).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{FieldKey, HistoryRecord, ScheduledRecord, StateRecord};
use crate::traits::TransitionStorage;

#[derive(Debug, Default, Clone)]
struct Tables {
    states: BTreeMap<FieldKey, StateRecord>,
    history: Vec<HistoryRecord>,
    scheduled: Vec<ScheduledRecord>,
}

#[derive(Debug, Clone)]
enum Staged {
    Init(StateRecord),
    Update {
        expected_version: i64,
        record: StateRecord,
    },
    History(HistoryRecord),
    InsertScheduled(ScheduledRecord),
    DeleteScheduled(FieldKey),
}

/// Uncommitted writes of one in-memory transaction.
#[derive(Debug, Default)]
pub struct MemorySnapshot {
    staged: Vec<Staged>,
    view: BTreeMap<FieldKey, StateRecord>,
}

/// A `TransitionStorage` kept entirely in process memory.
#[derive(Debug)]
pub struct InMemoryStorage {
    tables: Mutex<Tables>,
    next_history_id: AtomicU64,
    next_seq: AtomicU64,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            next_history_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(1),
        }
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        self.tables
            .lock()
            .map_err(|_| StorageError::Backend("in-memory tables poisoned".to_string()))
    }

    fn visible_state(
        &self,
        snapshot: &MemorySnapshot,
        key: &FieldKey,
    ) -> Result<Option<StateRecord>, StorageError> {
        if let Some(record) = snapshot.view.get(key) {
            return Ok(Some(record.clone()));
        }
        Ok(self.tables()?.states.get(key).cloned())
    }
}

fn sort_scheduled(records: &mut [ScheduledRecord]) {
    records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.seq.cmp(&b.seq)));
}

/// Apply staged writes to a copy of the tables, failing on the first
/// conflict so that nothing is published.
fn apply(mut tables: Tables, staged: Vec<Staged>) -> Result<Tables, StorageError> {
    for op in staged {
        match op {
            Staged::Init(record) => {
                if tables.states.contains_key(&record.key) {
                    return Err(StorageError::AlreadyInitialized {
                        key: record.key.to_string(),
                    });
                }
                tables.states.insert(record.key.clone(), record);
            }
            Staged::Update {
                expected_version,
                record,
            } => {
                let current = tables.states.get(&record.key).map(|r| r.version);
                if current != Some(expected_version) {
                    return Err(StorageError::ConcurrentConflict {
                        key: record.key.to_string(),
                        expected_version,
                    });
                }
                tables.states.insert(record.key.clone(), record);
            }
            Staged::History(record) => tables.history.push(record),
            Staged::InsertScheduled(record) => tables.scheduled.push(record),
            Staged::DeleteScheduled(key) => tables.scheduled.retain(|r| r.key != key),
        }
    }
    Ok(tables)
}

#[async_trait]
impl TransitionStorage for InMemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        Ok(MemorySnapshot::default())
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        let mut tables = self.tables()?;
        let updated = apply(tables.clone(), snapshot.staged)?;
        *tables = updated;
        Ok(())
    }

    async fn abort_snapshot(&self, _snapshot: MemorySnapshot) -> Result<(), StorageError> {
        Ok(())
    }

    async fn initialize_state(
        &self,
        snapshot: &mut MemorySnapshot,
        key: &FieldKey,
        workflow_id: &str,
        state: &str,
        at: i64,
    ) -> Result<(), StorageError> {
        if self.visible_state(snapshot, key)?.is_some() {
            return Err(StorageError::AlreadyInitialized {
                key: key.to_string(),
            });
        }
        let record = StateRecord {
            key: key.clone(),
            workflow_id: workflow_id.to_string(),
            state: state.to_string(),
            version: 0,
            updated_at: at,
        };
        snapshot.view.insert(key.clone(), record.clone());
        snapshot.staged.push(Staged::Init(record));
        Ok(())
    }

    async fn get_state_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        key: &FieldKey,
    ) -> Result<Option<StateRecord>, StorageError> {
        self.visible_state(snapshot, key)
    }

    async fn update_state(
        &self,
        snapshot: &mut MemorySnapshot,
        key: &FieldKey,
        expected_version: i64,
        new_state: &str,
        at: i64,
    ) -> Result<i64, StorageError> {
        let current = self
            .visible_state(snapshot, key)?
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })?;
        if current.version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                key: key.to_string(),
                expected_version,
            });
        }
        let record = StateRecord {
            state: new_state.to_string(),
            version: current.version + 1,
            updated_at: at,
            ..current
        };
        let version = record.version;
        snapshot.view.insert(key.clone(), record.clone());
        snapshot.staged.push(Staged::Update {
            expected_version,
            record,
        });
        Ok(version)
    }

    async fn append_history(
        &self,
        snapshot: &mut MemorySnapshot,
        mut record: HistoryRecord,
    ) -> Result<u64, StorageError> {
        record.id = self.next_history_id.fetch_add(1, Ordering::SeqCst);
        let id = record.id;
        snapshot.staged.push(Staged::History(record));
        Ok(id)
    }

    async fn insert_scheduled(
        &self,
        snapshot: &mut MemorySnapshot,
        mut record: ScheduledRecord,
    ) -> Result<u64, StorageError> {
        record.seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let seq = record.seq;
        snapshot.staged.push(Staged::InsertScheduled(record));
        Ok(seq)
    }

    async fn delete_scheduled(
        &self,
        snapshot: &mut MemorySnapshot,
        key: &FieldKey,
    ) -> Result<usize, StorageError> {
        let mut visible = self
            .tables()?
            .scheduled
            .iter()
            .filter(|r| &r.key == key)
            .count();
        for op in &snapshot.staged {
            match op {
                Staged::InsertScheduled(r) if &r.key == key => visible += 1,
                Staged::DeleteScheduled(k) if k == key => visible = 0,
                _ => {}
            }
        }
        snapshot.staged.push(Staged::DeleteScheduled(key.clone()));
        Ok(visible)
    }

    async fn get_state(&self, key: &FieldKey) -> Result<Option<StateRecord>, StorageError> {
        Ok(self.tables()?.states.get(key).cloned())
    }

    async fn list_history(&self, key: &FieldKey) -> Result<Vec<HistoryRecord>, StorageError> {
        Ok(self
            .tables()?
            .history
            .iter()
            .filter(|r| &r.key == key)
            .cloned()
            .collect())
    }

    async fn get_history(&self, id: u64) -> Result<HistoryRecord, StorageError> {
        self.tables()?
            .history
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StorageError::HistoryNotFound { id })
    }

    async fn list_scheduled(&self, key: &FieldKey) -> Result<Vec<ScheduledRecord>, StorageError> {
        let mut records: Vec<ScheduledRecord> = self
            .tables()?
            .scheduled
            .iter()
            .filter(|r| &r.key == key)
            .cloned()
            .collect();
        sort_scheduled(&mut records);
        Ok(records)
    }

    async fn list_due(&self, as_of: i64) -> Result<Vec<ScheduledRecord>, StorageError> {
        let mut records: Vec<ScheduledRecord> = self
            .tables()?
            .scheduled
            .iter()
            .filter(|r| r.timestamp <= as_of)
            .cloned()
            .collect();
        sort_scheduled(&mut records);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::run_conformance_suite;

    #[tokio::test]
    async fn in_memory_passes_conformance() {
        let report = run_conformance_suite(|| async { InMemoryStorage::new() }).await;
        assert!(report.failed == 0, "{report}");
        assert!(report.total > 20);
    }

    #[tokio::test]
    async fn dropped_snapshot_publishes_nothing() {
        let storage = InMemoryStorage::new();
        let key = FieldKey::new("node", "1", "field_status");
        {
            let mut snap = storage.begin_snapshot().await.unwrap();
            storage
                .initialize_state(&mut snap, &key, "editorial", "draft", 0)
                .await
                .unwrap();
        }
        assert!(storage.get_state(&key).await.unwrap().is_none());
    }
}
