use workflow_storage::StorageError;

/// Errors raised by the workflow engine.
///
/// Validation failures are reported to the caller and never retried here.
/// `Persistence` wraps whatever the storage collaborator reported; when it is
/// returned from execution, nothing was applied.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("unknown workflow: {workflow}")]
    UnknownWorkflow { workflow: String },

    #[error("unknown state '{state}' in workflow '{workflow}'")]
    UnknownState { workflow: String, state: String },

    /// A workflow definition violates a structural invariant.
    #[error("invalid workflow '{workflow}': {reason}")]
    InvalidWorkflow { workflow: String, reason: String },

    /// The actor lacks permission for this transition and it was not forced.
    #[error("actor '{actor}' may not move '{workflow}' from '{from}' to '{to}'")]
    TransitionNotPermitted {
        workflow: String,
        from: String,
        to: String,
        actor: String,
    },

    #[error("actor '{actor}' may not force transitions in '{workflow}'")]
    ForceNotAllowed { workflow: String, actor: String },

    /// Mutation attempted on a committed transition.
    #[error("transition already executed")]
    AlreadyExecuted,

    #[error("scheduling not allowed: {reason}")]
    SchedulingNotAllowed { reason: String },

    /// Recoverable: callers fall back to executing immediately.
    #[error("invalid schedule time: {reason}")]
    InvalidScheduleTime { reason: String },

    #[error("a comment is required for workflow '{workflow}'")]
    CommentRequired { workflow: String },

    #[error("transition has no target entity")]
    NoTargetEntity,

    #[error("transition has no target state")]
    NoTargetState,

    /// The field moved since the transition was drafted.
    #[error("{key} is in state '{found}', expected '{expected}'")]
    StateMismatch {
        key: String,
        expected: String,
        found: String,
    },

    #[error("invalid permission name: '{name}'")]
    InvalidPermission { name: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),
}
