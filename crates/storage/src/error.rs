/// All errors that can be returned by a TransitionStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency control conflict: another transaction moved
    /// the state pointer concurrently. The expected version was not found.
    #[error("concurrent conflict on {key}: expected version {expected_version}")]
    ConcurrentConflict { key: String, expected_version: i64 },

    /// No state pointer exists for the given key.
    #[error("state not found: {key}")]
    NotFound { key: String },

    /// A state pointer already exists for this key.
    #[error("state already initialized: {key}")]
    AlreadyInitialized { key: String },

    /// History entry not found.
    #[error("history entry not found: {id}")]
    HistoryNotFound { id: u64 },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
