//! Attached fields: extra values carried on a transition record.
//!
//! Handlers are registered in an explicit order and run in that order when
//! form input is applied to a record.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::WorkflowError;
use crate::transition::TransitionRecord;

/// Attached field values keyed by field name.
pub type AttachedFields = BTreeMap<String, Value>;

/// Values submitted alongside a transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldInput {
    /// Values already extracted into a structured item.
    pub item: BTreeMap<String, Value>,
    /// Raw user input, consulted when the item lacks a value.
    pub user_input: BTreeMap<String, Value>,
}

impl FieldInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(mut self, name: &str, value: Value) -> Self {
        self.item.insert(name.to_string(), value);
        self
    }

    pub fn with_user_input(mut self, name: &str, value: Value) -> Self {
        self.user_input.insert(name.to_string(), value);
        self
    }
}

/// Copies one attached field from input onto a record.
pub trait FieldHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Returns whether a value was copied.
    fn copy(&self, input: &FieldInput, record: &mut TransitionRecord) -> Result<bool, WorkflowError>;
}

/// Copies a field verbatim, preferring the structured item over raw input.
#[derive(Debug, Clone)]
pub struct CopyFieldHandler {
    name: String,
}

impl CopyFieldHandler {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl FieldHandler for CopyFieldHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn copy(&self, input: &FieldInput, record: &mut TransitionRecord) -> Result<bool, WorkflowError> {
        let value = input
            .item
            .get(&self.name)
            .or_else(|| input.user_input.get(&self.name));
        match value {
            Some(value) => {
                record.set_attached(&self.name, value.clone())?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Ordered list of field handlers.
#[derive(Default)]
pub struct FieldHandlers {
    handlers: Vec<Box<dyn FieldHandler>>,
}

impl FieldHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. A later handler for the same name overwrites what
    /// an earlier one copied.
    pub fn register(&mut self, handler: Box<dyn FieldHandler>) {
        self.handlers.push(handler);
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run every handler in registration order. Returns the names copied.
    pub fn apply(
        &self,
        input: &FieldInput,
        record: &mut TransitionRecord,
    ) -> Result<Vec<String>, WorkflowError> {
        let mut copied = Vec::new();
        for handler in &self.handlers {
            if handler.copy(input, record)? {
                copied.push(handler.name().to_string());
            }
        }
        Ok(copied)
    }
}

impl std::fmt::Debug for FieldHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityRef;
    use serde_json::json;
    use time::macros::datetime;

    fn record() -> TransitionRecord {
        TransitionRecord::create(
            "editorial",
            "field_status",
            Some(EntityRef::new("node", "1")),
            "draft",
            datetime!(2026-01-01 00:00 UTC),
        )
    }

    struct Upper(&'static str);

    impl FieldHandler for Upper {
        fn name(&self) -> &str {
            self.0
        }

        fn copy(&self, input: &FieldInput, record: &mut TransitionRecord) -> Result<bool, WorkflowError> {
            let Some(Value::String(s)) = input.user_input.get(self.0) else {
                return Ok(false);
            };
            record.set_attached(self.0, json!(s.to_uppercase()))?;
            Ok(true)
        }
    }

    #[test]
    fn copy_prefers_item_over_user_input() {
        let input = FieldInput::new()
            .with_item("reason", json!("from item"))
            .with_user_input("reason", json!("typed"))
            .with_user_input("ticket", json!(42));
        let mut handlers = FieldHandlers::new();
        handlers.register(Box::new(CopyFieldHandler::new("reason")));
        handlers.register(Box::new(CopyFieldHandler::new("ticket")));
        handlers.register(Box::new(CopyFieldHandler::new("missing")));

        let mut rec = record();
        let copied = handlers.apply(&input, &mut rec).unwrap();
        assert_eq!(copied, ["reason", "ticket"]);
        assert_eq!(rec.attached()["reason"], json!("from item"));
        assert_eq!(rec.attached()["ticket"], json!(42));
        assert!(!rec.attached().contains_key("missing"));
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let input = FieldInput::new().with_user_input("reason", json!("launch"));
        let mut handlers = FieldHandlers::new();
        handlers.register(Box::new(CopyFieldHandler::new("reason")));
        handlers.register(Box::new(Upper("reason")));

        let mut rec = record();
        handlers.apply(&input, &mut rec).unwrap();
        assert_eq!(rec.attached()["reason"], json!("LAUNCH"));
    }

    #[test]
    fn executed_record_rejects_fields() {
        let mut rec = record();
        rec.mark_executed(1, datetime!(2026-01-01 00:00 UTC));
        let mut handlers = FieldHandlers::new();
        handlers.register(Box::new(CopyFieldHandler::new("reason")));
        let input = FieldInput::new().with_item("reason", json!("late"));
        assert!(matches!(
            handlers.apply(&input, &mut rec),
            Err(WorkflowError::AlreadyExecuted)
        ));
    }
}
