//! workflow-core: workflow state machine.
//!
//! Moves a workflow field on a content item between named states, either
//! immediately or at a scheduled time, and keeps an append-only history of
//! every executed transition.
//!
//! # Public API
//!
//! Key types are re-exported at the crate root for convenience:
//!
//! - [`StateRegistry`] -- per-workflow states, loaded from TOML via [`StateRegistry::load`]
//! - [`RuleEngine`] -- legal next states and schedule/force capabilities
//! - [`TransitionRecord`] -- one requested state change
//! - [`Scheduler`], [`Executor`], [`HistoryStore`] -- the components behind
//!   [`WorkflowService`]
//! - [`WorkflowService`] -- the facade UI and API collaborators call
//! - [`WorkflowError`] -- error type

pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod fields;
pub mod history;
pub mod locks;
pub mod permission;
pub mod registry;
pub mod rules;
pub mod scheduler;
pub mod service;
pub mod transition;
pub mod types;

// ── Convenience re-exports ───────────────────────────────────────────

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{parse_workflow_file, read_workflow_file, WorkflowFile};
pub use error::WorkflowError;
pub use executor::Executor;
pub use fields::{AttachedFields, CopyFieldHandler, FieldHandler, FieldHandlers, FieldInput};
pub use history::{EntryKind, HistoryEntry, HistoryStore};
pub use locks::KeyLocks;
pub use permission::{Actor, GrantedPermissions, PermissionKey, PermissionOracle};
pub use registry::{StateRegistry, WorkflowConfig};
pub use rules::{RuleEngine, StateOption, TransitionOptions};
pub use scheduler::Scheduler;
pub use service::{
    spawn_sweeper, Applied, Submission, SweepFailure, SweepReport, SweepSummary, TransitionInput,
    TransitionPrompt, WorkflowService,
};
pub use transition::{ScheduleInput, TransitionRecord, TransitionStatus};
pub use types::{
    CommentRequirement, EntityRef, OptionsStyle, State, TransitionRule, Workflow, WorkflowSettings,
};
