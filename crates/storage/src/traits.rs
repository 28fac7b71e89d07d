use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{FieldKey, HistoryRecord, ScheduledRecord, StateRecord};

/// The storage trait for workflow transition backends.
///
/// A `TransitionStorage` implementation provides transactional storage for
/// the current-state pointer of each workflow field, the append-only
/// transition history, and the queue of scheduled transitions.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()`: start a transaction, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)`: commit and consume the transaction
///    OR `abort_snapshot(snapshot)`: roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, none of its writes become
/// visible.
///
/// ## OCC Conflict Detection
///
/// `update_state` performs an optimistic concurrency check against
/// `expected_version`. A mismatch, either when staged or when committed,
/// returns `Err(StorageError::ConcurrentConflict { .. })` and nothing from the
/// snapshot is applied.
///
/// ## Timestamps
///
/// All timestamps are Unix seconds.
#[async_trait]
pub trait TransitionStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all mutations durable.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all mutations.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── State pointer (within snapshot) ───────────────────────────────────────

    /// Create the state pointer for a field at version 0.
    ///
    /// Returns `Err(StorageError::AlreadyInitialized)` if it already exists.
    async fn initialize_state(
        &self,
        snapshot: &mut Self::Snapshot,
        key: &FieldKey,
        workflow_id: &str,
        state: &str,
        at: i64,
    ) -> Result<(), StorageError>;

    /// Read a field's state pointer as seen by the snapshot, including its
    /// own uncommitted writes. `None` if the field has no state yet.
    async fn get_state_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        key: &FieldKey,
    ) -> Result<Option<StateRecord>, StorageError>;

    /// Move a state pointer, conditional on `expected_version`.
    ///
    /// Returns the new version number on success.
    async fn update_state(
        &self,
        snapshot: &mut Self::Snapshot,
        key: &FieldKey,
        expected_version: i64,
        new_state: &str,
        at: i64,
    ) -> Result<i64, StorageError>;

    // ── History and schedule (within snapshot) ────────────────────────────────

    /// Append a history row. Returns the id the backend assigned to it.
    async fn append_history(
        &self,
        snapshot: &mut Self::Snapshot,
        record: HistoryRecord,
    ) -> Result<u64, StorageError>;

    /// Queue a scheduled transition. Returns its insertion sequence.
    async fn insert_scheduled(
        &self,
        snapshot: &mut Self::Snapshot,
        record: ScheduledRecord,
    ) -> Result<u64, StorageError>;

    /// Remove every scheduled transition for `key`. Returns how many were removed.
    async fn delete_scheduled(
        &self,
        snapshot: &mut Self::Snapshot,
        key: &FieldKey,
    ) -> Result<usize, StorageError>;

    // ── Queries (outside snapshot, committed data only) ───────────────────────

    /// Read a field's committed state pointer.
    async fn get_state(&self, key: &FieldKey) -> Result<Option<StateRecord>, StorageError>;

    /// History rows for a field, oldest first.
    async fn list_history(&self, key: &FieldKey) -> Result<Vec<HistoryRecord>, StorageError>;

    /// Read one history row.
    ///
    /// Returns `Err(StorageError::HistoryNotFound)` if no row has this id.
    async fn get_history(&self, id: u64) -> Result<HistoryRecord, StorageError>;

    /// Scheduled transitions for a field, ordered by timestamp then sequence.
    async fn list_scheduled(&self, key: &FieldKey) -> Result<Vec<ScheduledRecord>, StorageError>;

    /// Every scheduled transition with `timestamp <= as_of`, ordered by
    /// timestamp then sequence.
    async fn list_due(&self, as_of: i64) -> Result<Vec<ScheduledRecord>, StorageError>;
}
