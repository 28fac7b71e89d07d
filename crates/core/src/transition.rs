//! Transition records: one requested move of a workflow field.
//!
//! A record is created as a draft, may be scheduled, and is executed at most
//! once. After execution only its comment may still change in memory; the
//! persisted history row is never edited.

use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};
use workflow_storage::{FieldKey, ScheduledRecord, StorageError};

use crate::error::WorkflowError;
use crate::fields::AttachedFields;
use crate::permission::Actor;
use crate::rules::RuleEngine;
use crate::types::EntityRef;

/// Lifecycle position of a transition record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionStatus {
    Draft,
    Scheduled,
    Executed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRecord {
    workflow_id: String,
    field_name: String,
    entity: Option<EntityRef>,
    from_state: String,
    to_state: Option<String>,
    actor_id: String,
    timestamp: OffsetDateTime,
    comment: String,
    scheduled: bool,
    forced: bool,
    executed: bool,
    attached: AttachedFields,
    history_id: Option<u64>,
    schedule_seq: Option<u64>,
}

impl TransitionRecord {
    /// A fresh draft. New content starts from the workflow's creation state.
    pub fn create(
        workflow_id: &str,
        field_name: &str,
        entity: Option<EntityRef>,
        from_state: &str,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            field_name: field_name.to_string(),
            entity,
            from_state: from_state.to_string(),
            to_state: None,
            actor_id: String::new(),
            timestamp: now,
            comment: String::new(),
            scheduled: false,
            forced: false,
            executed: false,
            attached: AttachedFields::new(),
            history_id: None,
            schedule_seq: None,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn entity(&self) -> Option<&EntityRef> {
        self.entity.as_ref()
    }

    pub fn from_state(&self) -> &str {
        &self.from_state
    }

    pub fn to_state(&self) -> Option<&str> {
        self.to_state.as_deref()
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    pub fn is_forced(&self) -> bool {
        self.forced
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    pub fn attached(&self) -> &AttachedFields {
        &self.attached
    }

    /// Id of the history row written on execution.
    pub fn history_id(&self) -> Option<u64> {
        self.history_id
    }

    /// Queue sequence of the row this record was loaded from.
    pub fn schedule_seq(&self) -> Option<u64> {
        self.schedule_seq
    }

    pub fn status(&self) -> TransitionStatus {
        if self.executed {
            TransitionStatus::Executed
        } else if self.scheduled {
            TransitionStatus::Scheduled
        } else {
            TransitionStatus::Draft
        }
    }

    /// Storage key, if the record targets an entity.
    pub fn key(&self) -> Option<FieldKey> {
        self.entity.as_ref().map(|e| e.field(&self.field_name))
    }

    pub fn set_values(
        &mut self,
        to_state: &str,
        actor_id: &str,
        timestamp: OffsetDateTime,
        comment: &str,
    ) -> Result<(), WorkflowError> {
        self.ensure_mutable()?;
        self.to_state = Some(to_state.to_string());
        self.actor_id = actor_id.to_string();
        self.timestamp = timestamp;
        self.comment = comment.to_string();
        Ok(())
    }

    /// Comments stay editable after execution.
    pub fn set_comment(&mut self, comment: &str) {
        self.comment = comment.to_string();
    }

    /// Mark the record as scheduled (or not).
    ///
    /// Scheduling needs `can_schedule` and a timestamp strictly after `now`.
    pub fn schedule(
        &mut self,
        scheduled: bool,
        can_schedule: bool,
        now: OffsetDateTime,
    ) -> Result<(), WorkflowError> {
        self.ensure_mutable()?;
        if scheduled {
            if !can_schedule {
                return Err(WorkflowError::SchedulingNotAllowed {
                    reason: format!(
                        "actor '{}' may not schedule in workflow '{}' for this target",
                        self.actor_id, self.workflow_id
                    ),
                });
            }
            if self.timestamp <= now {
                return Err(WorkflowError::InvalidScheduleTime {
                    reason: format!("{} is not after {}", self.timestamp, now),
                });
            }
        }
        self.scheduled = scheduled;
        Ok(())
    }

    /// Set the forced flag. Callers check `RuleEngine::can_force` first.
    pub fn force(&mut self, forced: bool) -> Result<(), WorkflowError> {
        self.ensure_mutable()?;
        self.forced = forced;
        Ok(())
    }

    pub fn set_attached(&mut self, name: &str, value: serde_json::Value) -> Result<(), WorkflowError> {
        self.ensure_mutable()?;
        self.attached.insert(name.to_string(), value);
        Ok(())
    }

    /// Check the record can be applied by `actor`: both states must exist,
    /// and unless forced, the target must be among the actor's options.
    pub fn validate(&self, rules: &RuleEngine, actor: &Actor) -> Result<(), WorkflowError> {
        let to = self.to_state.as_deref().ok_or(WorkflowError::NoTargetState)?;
        let registry = rules.registry();
        registry.require_state(&self.workflow_id, &self.from_state)?;
        registry.require_state(&self.workflow_id, to)?;
        if self.forced {
            return Ok(());
        }
        let options = rules.options_for(
            &self.workflow_id,
            &self.from_state,
            actor,
            self.entity.as_ref(),
        )?;
        if !options.contains(to) {
            return Err(WorkflowError::TransitionNotPermitted {
                workflow: self.workflow_id.clone(),
                from: self.from_state.clone(),
                to: to.to_string(),
                actor: actor.id.clone(),
            });
        }
        Ok(())
    }

    fn ensure_mutable(&self) -> Result<(), WorkflowError> {
        if self.executed {
            return Err(WorkflowError::AlreadyExecuted);
        }
        Ok(())
    }

    pub(crate) fn mark_executed(&mut self, history_id: u64, at: OffsetDateTime) {
        self.executed = true;
        self.scheduled = false;
        self.history_id = Some(history_id);
        self.timestamp = at;
    }

    pub(crate) fn to_scheduled_record(&self) -> Result<ScheduledRecord, WorkflowError> {
        let key = self.key().ok_or(WorkflowError::NoTargetEntity)?;
        let to_state = self.to_state.clone().ok_or(WorkflowError::NoTargetState)?;
        Ok(ScheduledRecord {
            seq: 0,
            key,
            workflow_id: self.workflow_id.clone(),
            from_state: Some(self.from_state.clone()),
            to_state,
            actor_id: self.actor_id.clone(),
            timestamp: self.timestamp.unix_timestamp(),
            comment: self.comment.clone(),
            forced: self.forced,
            attached: self.attached.clone(),
        })
    }

    pub(crate) fn from_scheduled_record(
        record: ScheduledRecord,
        creation_state: &str,
    ) -> Result<Self, WorkflowError> {
        Ok(Self {
            workflow_id: record.workflow_id,
            entity: Some(EntityRef::new(&record.key.entity_type, &record.key.entity_id)),
            field_name: record.key.field_name,
            from_state: record
                .from_state
                .unwrap_or_else(|| creation_state.to_string()),
            to_state: Some(record.to_state),
            actor_id: record.actor_id,
            timestamp: from_unix(record.timestamp)?,
            comment: record.comment,
            scheduled: true,
            forced: record.forced,
            executed: false,
            attached: record.attached,
            history_id: None,
            schedule_seq: Some(record.seq),
        })
    }
}

pub(crate) fn from_unix(ts: i64) -> Result<OffsetDateTime, WorkflowError> {
    OffsetDateTime::from_unix_timestamp(ts).map_err(|e| {
        WorkflowError::Persistence(StorageError::Backend(format!("bad timestamp {ts}: {e}")))
    })
}

/// Schedule date and time as entered by a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScheduleInput {
    /// `YYYY-MM-DD`.
    pub date: String,
    /// `HH:MM`. Empty means midnight.
    #[serde(default)]
    pub time: String,
    /// `+HH:MM`, `-HH:MM`, or `Z`. Empty means UTC.
    #[serde(default)]
    pub utc_offset: String,
}

impl ScheduleInput {
    pub fn new(date: &str, time: &str, utc_offset: &str) -> Self {
        Self {
            date: date.to_string(),
            time: time.to_string(),
            utc_offset: utc_offset.to_string(),
        }
    }

    /// Resolve to an instant. Fails with `InvalidScheduleTime`.
    pub fn resolve(&self) -> Result<OffsetDateTime, WorkflowError> {
        let invalid = |what: &str, value: &str| WorkflowError::InvalidScheduleTime {
            reason: format!("unparseable {what} '{value}'"),
        };

        let date = Date::parse(self.date.trim(), format_description!("[year]-[month]-[day]"))
            .map_err(|_| invalid("date", &self.date))?;

        let time_str = self.time.trim();
        let time = if time_str.is_empty() {
            Time::MIDNIGHT
        } else {
            Time::parse(time_str, format_description!("[hour]:[minute]"))
                .or_else(|_| {
                    Time::parse(time_str, format_description!("[hour padding:none]:[minute]"))
                })
                .map_err(|_| invalid("time", &self.time))?
        };

        let offset_str = self.utc_offset.trim();
        let offset = match offset_str {
            "" | "Z" | "UTC" => UtcOffset::UTC,
            other => UtcOffset::parse(
                other,
                format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
            )
            .map_err(|_| invalid("UTC offset", &self.utc_offset))?,
        };

        Ok(PrimitiveDateTime::new(date, time).assume_offset(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn draft() -> TransitionRecord {
        TransitionRecord::create(
            "editorial",
            "field_status",
            Some(EntityRef::new("node", "1")),
            "draft",
            datetime!(2026-01-01 10:00 UTC),
        )
    }

    #[test]
    fn new_record_is_draft() {
        let record = draft();
        assert_eq!(record.status(), TransitionStatus::Draft);
        assert_eq!(record.to_state(), None);
        assert_eq!(record.key().unwrap().to_string(), "node/1#field_status");
    }

    #[test]
    fn schedule_requires_permission_and_future_time() {
        let now = datetime!(2026-01-01 10:00 UTC);
        let mut record = draft();
        record
            .set_values("published", "editor", datetime!(2026-01-02 10:00 UTC), "")
            .unwrap();

        assert!(matches!(
            record.schedule(true, false, now),
            Err(WorkflowError::SchedulingNotAllowed { .. })
        ));
        record.schedule(true, true, now).unwrap();
        assert_eq!(record.status(), TransitionStatus::Scheduled);

        record.set_values("published", "editor", now, "").unwrap();
        assert!(matches!(
            record.schedule(true, true, now),
            Err(WorkflowError::InvalidScheduleTime { .. })
        ));
    }

    #[test]
    fn executed_record_only_accepts_comment() {
        let now = datetime!(2026-01-01 10:00 UTC);
        let mut record = draft();
        record.set_values("review", "editor", now, "first").unwrap();
        record.mark_executed(7, now);

        assert!(matches!(
            record.set_values("published", "editor", now, ""),
            Err(WorkflowError::AlreadyExecuted)
        ));
        assert!(matches!(record.force(true), Err(WorkflowError::AlreadyExecuted)));
        assert!(matches!(
            record.schedule(false, true, now),
            Err(WorkflowError::AlreadyExecuted)
        ));
        record.set_comment("fixed typo");
        assert_eq!(record.comment(), "fixed typo");
        assert_eq!(record.to_state(), Some("review"));
        assert_eq!(record.history_id(), Some(7));
    }

    #[test]
    fn scheduled_record_conversion_keeps_payload() {
        let mut record = draft();
        record
            .set_values("published", "editor", datetime!(2026-03-01 09:30 UTC), "go live")
            .unwrap();
        record
            .set_attached("field_reason", serde_json::json!("launch"))
            .unwrap();
        record
            .schedule(true, true, datetime!(2026-01-01 10:00 UTC))
            .unwrap();

        let mut stored = record.to_scheduled_record().unwrap();
        stored.seq = 4;
        let mut back = TransitionRecord::from_scheduled_record(stored, "creation").unwrap();
        assert_eq!(back.schedule_seq(), Some(4));
        back.schedule_seq = None;
        assert_eq!(back, record);
    }

    #[test]
    fn schedule_input_resolves_with_offset() {
        let input = ScheduleInput::new("2026-05-04", "14:30", "+02:00");
        assert_eq!(input.resolve().unwrap(), datetime!(2026-05-04 12:30 UTC));

        let midnight = ScheduleInput::new("2026-05-04", "", "");
        assert_eq!(midnight.resolve().unwrap(), datetime!(2026-05-04 00:00 UTC));

        let loose = ScheduleInput::new("2026-05-04", "9:05", "Z");
        assert_eq!(loose.resolve().unwrap(), datetime!(2026-05-04 09:05 UTC));
    }

    #[test]
    fn schedule_input_rejects_garbage() {
        for input in [
            ScheduleInput::new("next tuesday", "", ""),
            ScheduleInput::new("2026-05-04", "25:99", ""),
            ScheduleInput::new("2026-05-04", "10:00", "Europe/Paris"),
        ] {
            assert!(matches!(
                input.resolve(),
                Err(WorkflowError::InvalidScheduleTime { .. })
            ));
        }
    }
}
