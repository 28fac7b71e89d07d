//! Workflow definitions: states, transition rules, and per-workflow settings.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use workflow_storage::FieldKey;

use crate::error::WorkflowError;

/// Opaque reference to the content item a workflow field lives on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: &str, entity_id: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
        }
    }

    /// Storage key for one of this entity's workflow fields.
    pub fn field(&self, field_name: &str) -> FieldKey {
        FieldKey::new(&self.entity_type, &self.entity_id, field_name)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// A node an entity can occupy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub id: String,
    pub label: String,
    /// The initial pseudo-state of new content. Exactly one per workflow.
    #[serde(default)]
    pub creation: bool,
    #[serde(default)]
    pub weight: i32,
}

/// A directed edge between two states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub from: String,
    pub to: String,
}

/// How strongly a comment is asked for on a transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentRequirement {
    Hidden,
    #[default]
    Optional,
    Required,
}

/// How a UI collaborator should present the options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionsStyle {
    #[default]
    Select,
    Radios,
    Buttons,
    Dropbutton,
}

fn default_true() -> bool {
    true
}

/// Per-workflow behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    #[serde(default = "default_true")]
    pub schedule_enable: bool,
    #[serde(default)]
    pub comment: CommentRequirement,
    #[serde(default)]
    pub options: OptionsStyle,
    #[serde(default)]
    pub name_as_title: bool,
    /// States offered from the creation state. Empty means "whatever the
    /// transition rules allow".
    #[serde(default)]
    pub first_assignable: Vec<String>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            schedule_enable: true,
            comment: CommentRequirement::Optional,
            options: OptionsStyle::Select,
            name_as_title: false,
            first_assignable: Vec::new(),
        }
    }
}

/// A validated workflow.
///
/// States are kept sorted by `(weight, declaration order)`; there is always
/// exactly one creation state.
#[derive(Debug, Clone)]
pub struct Workflow {
    id: String,
    label: String,
    states: Vec<State>,
    transitions: Vec<TransitionRule>,
    settings: WorkflowSettings,
    creation_index: usize,
}

impl Workflow {
    pub fn new(
        id: &str,
        label: &str,
        states: Vec<State>,
        transitions: Vec<TransitionRule>,
        settings: WorkflowSettings,
    ) -> Result<Self, WorkflowError> {
        let invalid = |reason: String| WorkflowError::InvalidWorkflow {
            workflow: id.to_string(),
            reason,
        };

        if states.is_empty() {
            return Err(invalid("a workflow needs at least one state".to_string()));
        }

        let mut seen = HashSet::new();
        for state in &states {
            if !seen.insert(state.id.as_str()) {
                return Err(invalid(format!("state '{}' is declared twice", state.id)));
            }
        }

        let creation: Vec<&str> = states
            .iter()
            .filter(|s| s.creation)
            .map(|s| s.id.as_str())
            .collect();
        if creation.len() != 1 {
            return Err(invalid(format!(
                "expected exactly one creation state, found {} [{}]",
                creation.len(),
                creation.join(", ")
            )));
        }

        let known = |state: &str| seen.contains(state);
        let states_list = || {
            states
                .iter()
                .map(|s| s.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        for rule in &transitions {
            for endpoint in [&rule.from, &rule.to] {
                if !known(endpoint) {
                    return Err(invalid(format!(
                        "transition endpoint '{}' is not declared in states: [{}]",
                        endpoint,
                        states_list()
                    )));
                }
            }
        }
        for state in &settings.first_assignable {
            if !known(state) {
                return Err(invalid(format!(
                    "first assignable state '{}' is not declared in states: [{}]",
                    state,
                    states_list()
                )));
            }
        }

        let mut states: Vec<(usize, State)> = states.into_iter().enumerate().collect();
        states.sort_by(|(ia, a), (ib, b)| a.weight.cmp(&b.weight).then(ia.cmp(ib)));
        let states: Vec<State> = states.into_iter().map(|(_, s)| s).collect();
        let creation_index = states.iter().position(|s| s.creation).unwrap_or_default();

        Ok(Self {
            id: id.to_string(),
            label: label.to_string(),
            states,
            transitions,
            settings,
            creation_index,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// States in display order.
    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn transitions(&self) -> &[TransitionRule] {
        &self.transitions
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub fn creation_state(&self) -> &State {
        &self.states[self.creation_index]
    }

    pub fn state(&self, id: &str) -> Option<&State> {
        self.states.iter().find(|s| s.id == id)
    }

    pub fn is_creation(&self, id: &str) -> bool {
        self.creation_state().id == id
    }

    /// Whether a rule leads from `from` to `to`.
    pub fn has_transition(&self, from: &str, to: &str) -> bool {
        self.transitions.iter().any(|t| t.from == from && t.to == to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: &str, creation: bool, weight: i32) -> State {
        State {
            id: id.to_string(),
            label: id.to_uppercase(),
            creation,
            weight,
        }
    }

    fn rule(from: &str, to: &str) -> TransitionRule {
        TransitionRule {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    #[test]
    fn states_sorted_by_weight_then_declaration() {
        let wf = Workflow::new(
            "w",
            "W",
            vec![
                state("b", false, 5),
                state("creation", true, -10),
                state("a", false, 5),
                state("c", false, 0),
            ],
            vec![],
            WorkflowSettings::default(),
        )
        .unwrap();
        let ids: Vec<&str> = wf.states().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["creation", "c", "b", "a"]);
        assert_eq!(wf.creation_state().id, "creation");
    }

    #[test]
    fn rejects_missing_or_duplicate_creation_state() {
        let none = Workflow::new(
            "w",
            "W",
            vec![state("a", false, 0)],
            vec![],
            WorkflowSettings::default(),
        );
        assert!(matches!(none, Err(WorkflowError::InvalidWorkflow { .. })));

        let two = Workflow::new(
            "w",
            "W",
            vec![state("a", true, 0), state("b", true, 0)],
            vec![],
            WorkflowSettings::default(),
        );
        assert!(matches!(two, Err(WorkflowError::InvalidWorkflow { .. })));
    }

    #[test]
    fn rejects_empty_and_duplicate_states() {
        let empty = Workflow::new("w", "W", vec![], vec![], WorkflowSettings::default());
        assert!(matches!(empty, Err(WorkflowError::InvalidWorkflow { .. })));

        let dup = Workflow::new(
            "w",
            "W",
            vec![state("a", true, 0), state("a", false, 1)],
            vec![],
            WorkflowSettings::default(),
        );
        assert!(matches!(dup, Err(WorkflowError::InvalidWorkflow { .. })));
    }

    #[test]
    fn rejects_undeclared_transition_endpoint() {
        let err = Workflow::new(
            "w",
            "W",
            vec![state("creation", true, 0), state("draft", false, 1)],
            vec![rule("draft", "published")],
            WorkflowSettings::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("'published' is not declared"));
    }

    #[test]
    fn rejects_undeclared_first_assignable() {
        let settings = WorkflowSettings {
            first_assignable: vec!["ghost".to_string()],
            ..WorkflowSettings::default()
        };
        let err = Workflow::new(
            "w",
            "W",
            vec![state("creation", true, 0)],
            vec![],
            settings,
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidWorkflow { .. }));
    }
}
