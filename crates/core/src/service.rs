//! `WorkflowService`: the entry point for UI and API collaborators.
//!
//! Wires the registry, rule engine, scheduler, executor, and history store
//! over one storage backend. Actor and time are explicit parameters on every
//! operation.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use workflow_storage::{StorageError, TransitionStorage};

use crate::clock::Clock;
use crate::error::WorkflowError;
use crate::executor::Executor;
use crate::fields::{FieldHandlers, FieldInput};
use crate::history::{EntryKind, HistoryEntry, HistoryStore};
use crate::locks::KeyLocks;
use crate::permission::{Actor, PermissionOracle};
use crate::registry::StateRegistry;
use crate::rules::{RuleEngine, StateOption, TransitionOptions};
use crate::scheduler::Scheduler;
use crate::transition::{ScheduleInput, TransitionRecord};
use crate::types::{CommentRequirement, EntityRef, OptionsStyle};

/// What a transition form should offer. Rendering is left to the caller.
#[derive(Debug, Clone)]
pub struct TransitionPrompt {
    /// A fresh draft, or the pending scheduled record for editing.
    pub record: TransitionRecord,
    pub options: TransitionOptions,
    pub default_state: Option<String>,
    /// False when there is nothing to choose.
    pub show_widget: bool,
    pub can_schedule: bool,
    pub can_force: bool,
    pub comment: CommentRequirement,
    pub options_style: OptionsStyle,
    pub title: String,
}

/// Submitted form values.
#[derive(Debug, Clone, Default)]
pub struct TransitionInput {
    pub to_state: String,
    pub comment: String,
    /// `Some` to schedule instead of executing immediately.
    pub schedule: Option<ScheduleInput>,
    pub force: bool,
    pub fields: FieldInput,
}

/// Outcome of [`WorkflowService::apply_input`].
#[derive(Debug, Default)]
pub struct Applied {
    /// Recoverable problems, e.g. a schedule time that fell back to now.
    pub warnings: Vec<WorkflowError>,
    /// Attached fields copied onto the record.
    pub fields: Vec<String>,
}

#[derive(Debug)]
pub enum Submission {
    Executed(HistoryEntry),
    Scheduled { seq: u64, at: OffsetDateTime },
}

/// One failed record of a sweep.
#[derive(Debug)]
pub struct SweepFailure {
    pub record: TransitionRecord,
    pub error: WorkflowError,
}

/// Result of [`WorkflowService::run_due`].
#[derive(Debug, Default)]
pub struct SweepReport {
    pub executed: Vec<HistoryEntry>,
    pub failed: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.executed.is_empty() && self.failed.is_empty()
    }
}

/// Summary of a sweep, for logs and JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub executed: usize,
    pub failed: usize,
}

impl From<&SweepReport> for SweepSummary {
    fn from(report: &SweepReport) -> Self {
        Self {
            executed: report.executed.len(),
            failed: report.failed.len(),
        }
    }
}

pub struct WorkflowService<S: TransitionStorage> {
    registry: Arc<StateRegistry>,
    rules: RuleEngine,
    storage: Arc<S>,
    scheduler: Scheduler<S>,
    executor: Executor<S>,
    history: HistoryStore<S>,
    locks: Arc<KeyLocks>,
    fields: FieldHandlers,
}

impl<S: TransitionStorage> WorkflowService<S> {
    pub fn new(
        registry: Arc<StateRegistry>,
        oracle: Arc<dyn PermissionOracle>,
        storage: Arc<S>,
    ) -> Self {
        let locks = Arc::new(KeyLocks::new());
        let rules = RuleEngine::new(Arc::clone(&registry), oracle);
        let scheduler = Scheduler::new(Arc::clone(&storage), Arc::clone(&registry), Arc::clone(&locks));
        let history = HistoryStore::new(Arc::clone(&storage));
        let executor = Executor::new(
            Arc::clone(&storage),
            rules.clone(),
            scheduler.clone(),
            history.clone(),
            Arc::clone(&locks),
        );
        Self {
            registry,
            rules,
            storage,
            scheduler,
            executor,
            history,
            locks,
            fields: FieldHandlers::new(),
        }
    }

    /// Replace the attached field handlers.
    pub fn with_field_handlers(mut self, fields: FieldHandlers) -> Self {
        self.fields = fields;
        self
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn scheduler(&self) -> &Scheduler<S> {
        &self.scheduler
    }

    pub fn executor(&self) -> &Executor<S> {
        &self.executor
    }

    /// The field's current state. Fields never transitioned are in the
    /// creation state.
    pub async fn current_state(
        &self,
        workflow_id: &str,
        entity: &EntityRef,
        field_name: &str,
    ) -> Result<String, WorkflowError> {
        let creation = self.registry.creation_state_of(workflow_id)?;
        Ok(self
            .storage
            .get_state(&entity.field(field_name))
            .await?
            .map(|s| s.state)
            .unwrap_or_else(|| creation.id.clone()))
    }

    /// A draft starting from the field's current state. Without an entity
    /// the draft starts from the creation state.
    pub async fn draft_transition(
        &self,
        workflow_id: &str,
        field_name: &str,
        entity: Option<&EntityRef>,
        now: OffsetDateTime,
    ) -> Result<TransitionRecord, WorkflowError> {
        let from = match entity {
            Some(entity) => self.current_state(workflow_id, entity, field_name).await?,
            None => self.registry.creation_state_of(workflow_id)?.id.clone(),
        };
        Ok(TransitionRecord::create(
            workflow_id,
            field_name,
            entity.cloned(),
            &from,
            now,
        ))
    }

    /// Build the form model for a field. A pending scheduled transition is
    /// offered for editing instead of a fresh draft.
    pub async fn prompt(
        &self,
        workflow_id: &str,
        field_name: &str,
        entity: Option<&EntityRef>,
        actor: &Actor,
        now: OffsetDateTime,
    ) -> Result<TransitionPrompt, WorkflowError> {
        let pending = match entity {
            Some(entity) => self.scheduler.lookup_soonest(entity, field_name).await?,
            None => None,
        };
        let record = match pending {
            Some(record) => record,
            None => self.draft_transition(workflow_id, field_name, entity, now).await?,
        };
        self.prompt_for(record, actor).await
    }

    /// Form model for an existing record, including executed ones.
    pub async fn prompt_for(
        &self,
        record: TransitionRecord,
        actor: &Actor,
    ) -> Result<TransitionPrompt, WorkflowError> {
        let workflow = self.registry.workflow(record.workflow_id())?;
        let settings = workflow.settings();
        let options = self.available_options(&record, actor)?;

        let default_state = if record.is_executed() || record.is_scheduled() {
            record.to_state().map(str::to_string)
        } else if workflow.is_creation(record.from_state()) && record.entity().is_some() {
            options.iter().next().map(|o| o.state_id.clone())
        } else {
            Some(record.from_state().to_string())
        };

        let show_widget = record.is_executed()
            || record.entity().is_none()
            || options.iter().any(|o| o.state_id != record.from_state());

        let exists = !record.is_executed() && self.target_exists(&record).await?;
        let can_schedule = self.rules.can_schedule(record.workflow_id(), actor, exists)?;

        let title = if settings.name_as_title || record.is_executed() {
            "Change state".to_string()
        } else {
            format!("Change {} state", workflow.label())
        };

        Ok(TransitionPrompt {
            can_force: !record.is_executed() && self.rules.can_force(record.workflow_id(), actor),
            comment: settings.comment,
            options_style: settings.options,
            options,
            default_state,
            show_widget,
            can_schedule,
            title,
            record,
        })
    }

    /// Legal target states for `record`. An executed record only offers the
    /// state it moved to.
    pub fn available_options(
        &self,
        record: &TransitionRecord,
        actor: &Actor,
    ) -> Result<TransitionOptions, WorkflowError> {
        if record.is_executed() {
            let to = record.to_state().ok_or(WorkflowError::NoTargetState)?;
            let state = self.registry.require_state(record.workflow_id(), to)?;
            return Ok(TransitionOptions::Flat(vec![StateOption::from(state)]));
        }
        self.rules.options_for(
            record.workflow_id(),
            record.from_state(),
            actor,
            record.entity(),
        )
    }

    /// Copy submitted values onto `record`.
    ///
    /// An unusable schedule time is not fatal: it is reported in
    /// [`Applied::warnings`] and the transition is left unscheduled with
    /// `now` as its timestamp. Executed records only take the comment.
    pub async fn apply_input(
        &self,
        record: &mut TransitionRecord,
        input: TransitionInput,
        actor: &Actor,
        now: OffsetDateTime,
    ) -> Result<Applied, WorkflowError> {
        let settings = self.registry.workflow(record.workflow_id())?.settings().clone();
        let comment = match settings.comment {
            CommentRequirement::Hidden => String::new(),
            _ => input.comment,
        };
        if record.is_executed() {
            record.set_comment(&comment);
            return Ok(Applied::default());
        }

        let mut applied = Applied::default();
        let (timestamp, scheduled) = match input.schedule.as_ref().map(ScheduleInput::resolve) {
            None => (now, false),
            Some(Ok(at)) if at > now => (at, true),
            Some(Ok(at)) => {
                let problem = WorkflowError::InvalidScheduleTime {
                    reason: format!("{at} is not after {now}"),
                };
                warn!(error = %problem, "executing transition immediately");
                applied.warnings.push(problem);
                (now, false)
            }
            Some(Err(problem)) => {
                warn!(error = %problem, "executing transition immediately");
                applied.warnings.push(problem);
                (now, false)
            }
        };

        if input.force && !self.rules.can_force(record.workflow_id(), actor) {
            return Err(WorkflowError::ForceNotAllowed {
                workflow: record.workflow_id().to_string(),
                actor: actor.id.clone(),
            });
        }
        // Refuse before touching the record so a rejected form leaves it as it was.
        let can_schedule = if scheduled {
            let exists = self.target_exists(record).await?;
            self.rules.can_schedule(record.workflow_id(), actor, exists)?
        } else {
            false
        };
        if scheduled && !can_schedule {
            return Err(WorkflowError::SchedulingNotAllowed {
                reason: format!(
                    "actor '{}' may not schedule in workflow '{}' for this target",
                    actor.id,
                    record.workflow_id()
                ),
            });
        }

        record.set_values(&input.to_state, &actor.id, timestamp, &comment)?;
        record.force(input.force)?;
        record.schedule(scheduled, can_schedule, now)?;
        applied.fields = self.fields.apply(&input.fields, record)?;
        Ok(applied)
    }

    /// Execute `record` now, or queue it when it is scheduled.
    ///
    /// `actor` must be the actor the record was filled in for. Due scheduled
    /// records are run by [`WorkflowService::run_due`] instead.
    pub async fn submit(
        &self,
        record: &mut TransitionRecord,
        actor: &Actor,
        now: OffsetDateTime,
    ) -> Result<Submission, WorkflowError> {
        if record.is_executed() {
            return Err(WorkflowError::AlreadyExecuted);
        }
        if record.actor_id() != actor.id {
            return Err(WorkflowError::TransitionNotPermitted {
                workflow: record.workflow_id().to_string(),
                from: record.from_state().to_string(),
                to: record.to_state().unwrap_or_default().to_string(),
                actor: actor.id.clone(),
            });
        }
        let settings = self.registry.workflow(record.workflow_id())?.settings();
        match settings.comment {
            CommentRequirement::Hidden => record.set_comment(""),
            CommentRequirement::Required if record.comment().trim().is_empty() => {
                return Err(WorkflowError::CommentRequired {
                    workflow: record.workflow_id().to_string(),
                });
            }
            _ => {}
        }

        if record.is_scheduled() {
            record.validate(&self.rules, actor)?;
            let seq = self.scheduler.store(record).await?;
            return Ok(Submission::Scheduled {
                seq,
                at: record.timestamp(),
            });
        }
        let entry = self.executor.execute(record, actor, now).await?;
        Ok(Submission::Executed(entry))
    }

    /// Executed and correction entries for a field, oldest first.
    pub async fn history_of(
        &self,
        entity: &EntityRef,
        field_name: &str,
    ) -> Result<Vec<HistoryEntry>, WorkflowError> {
        self.history.list_for(entity, field_name).await
    }

    pub async fn pending_schedule(
        &self,
        entity: &EntityRef,
        field_name: &str,
    ) -> Result<Option<TransitionRecord>, WorkflowError> {
        self.scheduler.lookup_soonest(entity, field_name).await
    }

    pub async fn cancel_schedule(
        &self,
        entity: &EntityRef,
        field_name: &str,
    ) -> Result<usize, WorkflowError> {
        self.scheduler.cancel(entity, field_name).await
    }

    /// Execute every scheduled transition due at `now` on behalf of `runner`.
    ///
    /// Failures are logged and reported but not retried; the failed row is
    /// removed from the schedule unless it was replaced in the meantime.
    pub async fn run_due(&self, runner: &Actor, now: OffsetDateTime) -> Result<SweepReport, WorkflowError> {
        let mut report = SweepReport::default();
        for mut record in self.scheduler.due_as_of(now).await? {
            match self.executor.execute(&mut record, runner, now).await {
                Ok(entry) => report.executed.push(entry),
                Err(error) => {
                    warn!(
                        workflow = record.workflow_id(),
                        to = record.to_state().unwrap_or_default(),
                        %error,
                        "scheduled transition failed"
                    );
                    self.scheduler.discard(&record).await?;
                    report.failed.push(SweepFailure { record, error });
                }
            }
        }
        if !report.is_empty() {
            info!(
                executed = report.executed.len(),
                failed = report.failed.len(),
                "scheduled transitions swept"
            );
        }
        Ok(report)
    }

    /// Correct the comment of an executed transition.
    ///
    /// History is never edited: a correction entry referencing `entry_id`
    /// is appended instead.
    pub async fn amend_comment(
        &self,
        entity: &EntityRef,
        field_name: &str,
        entry_id: u64,
        comment: &str,
        actor: &Actor,
        now: OffsetDateTime,
    ) -> Result<HistoryEntry, WorkflowError> {
        let key = entity.field(field_name);
        let original = self.history.get(entry_id).await?;
        if original.key() != key || original.kind != EntryKind::Transition {
            return Err(StorageError::HistoryNotFound { id: entry_id }.into());
        }

        let mut correction = HistoryEntry {
            id: 0,
            actor_id: actor.id.clone(),
            timestamp: now,
            comment: comment.to_string(),
            forced: false,
            kind: EntryKind::CommentCorrection { corrects: entry_id },
            attached: Default::default(),
            ..original
        };

        let _guard = self.locks.acquire(&key).await;
        let mut snapshot = self.storage.begin_snapshot().await?;
        correction.id = match self.history.append(&mut snapshot, &correction).await {
            Ok(id) => id,
            Err(e) => {
                let _ = self.storage.abort_snapshot(snapshot).await;
                return Err(e);
            }
        };
        self.storage.commit_snapshot(snapshot).await?;

        info!(key = %key, corrects = entry_id, "amended transition comment");
        Ok(correction)
    }

    async fn target_exists(&self, record: &TransitionRecord) -> Result<bool, WorkflowError> {
        match record.key() {
            Some(key) => Ok(self.storage.get_state(&key).await?.is_some()),
            None => Ok(false),
        }
    }
}

/// Run [`WorkflowService::run_due`] every `period` until the handle is aborted.
pub fn spawn_sweeper<S: TransitionStorage>(
    service: Arc<WorkflowService<S>>,
    clock: Arc<dyn Clock>,
    runner: Actor,
    period: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match service.run_due(&runner, clock.now()).await {
                Ok(report) => {
                    tracing::trace!(summary = ?SweepSummary::from(&report), "sweep finished")
                }
                Err(e) => warn!(error = %e, "sweep failed"),
            }
        }
    })
}
