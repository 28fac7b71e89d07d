use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lookup key for a workflow field on a target entity.
///
/// The entity type and id are opaque to the storage layer; a single entity
/// may carry several workflow fields, each with its own state pointer,
/// history, and schedule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldKey {
    pub entity_type: String,
    pub entity_id: String,
    pub field_name: String,
}

impl FieldKey {
    pub fn new(entity_type: &str, entity_id: &str, field_name: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            field_name: field_name.to_string(),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.entity_type, self.entity_id, self.field_name)
    }
}

/// The current-state pointer of a workflow field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub key: FieldKey,
    pub workflow_id: String,
    pub state: String,
    pub version: i64,
    /// Unix timestamp (seconds) of the last change.
    pub updated_at: i64,
}

/// What a history row records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryKind {
    /// An executed state transition.
    Transition,
    /// A comment correction for an earlier transition entry.
    CommentCorrection { corrects: u64 },
}

/// An append-only history row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Assigned by the backend on append; ignored on input.
    pub id: u64,
    pub key: FieldKey,
    pub workflow_id: String,
    /// `None` when the field had no state yet.
    pub from_state: Option<String>,
    pub to_state: String,
    pub actor_id: String,
    /// Unix timestamp (seconds).
    pub timestamp: i64,
    pub comment: String,
    pub forced: bool,
    pub kind: HistoryKind,
    #[serde(default)]
    pub attached: BTreeMap<String, serde_json::Value>,
}

/// A transition waiting for its timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledRecord {
    /// Insertion sequence, assigned by the backend; ignored on input.
    pub seq: u64,
    pub key: FieldKey,
    pub workflow_id: String,
    pub from_state: Option<String>,
    pub to_state: String,
    pub actor_id: String,
    /// Unix timestamp (seconds) at which the transition becomes due.
    pub timestamp: i64,
    pub comment: String,
    pub forced: bool,
    #[serde(default)]
    pub attached: BTreeMap<String, serde_json::Value>,
}
