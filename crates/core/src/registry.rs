//! State registry: per-workflow states and the creation state.

use std::collections::BTreeMap;

use crate::error::WorkflowError;
use crate::types::{State, Workflow, WorkflowSettings};

/// Supplies the settings of a workflow.
pub trait WorkflowConfig: Send + Sync {
    fn settings_of(&self, workflow_id: &str) -> Result<WorkflowSettings, WorkflowError>;
}

/// Lookup of every known workflow. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct StateRegistry {
    workflows: BTreeMap<String, Workflow>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a workflow. Ids must be unique.
    pub fn register(&mut self, workflow: Workflow) -> Result<(), WorkflowError> {
        if self.workflows.contains_key(workflow.id()) {
            return Err(WorkflowError::InvalidWorkflow {
                workflow: workflow.id().to_string(),
                reason: "workflow is declared twice".to_string(),
            });
        }
        self.workflows.insert(workflow.id().to_string(), workflow);
        Ok(())
    }

    pub fn workflow(&self, workflow_id: &str) -> Result<&Workflow, WorkflowError> {
        self.workflows
            .get(workflow_id)
            .ok_or_else(|| WorkflowError::UnknownWorkflow {
                workflow: workflow_id.to_string(),
            })
    }

    pub fn workflows(&self) -> impl Iterator<Item = &Workflow> {
        self.workflows.values()
    }

    pub fn states_of(&self, workflow_id: &str) -> Result<&[State], WorkflowError> {
        Ok(self.workflow(workflow_id)?.states())
    }

    pub fn creation_state_of(&self, workflow_id: &str) -> Result<&State, WorkflowError> {
        Ok(self.workflow(workflow_id)?.creation_state())
    }

    pub fn is_valid(&self, workflow_id: &str, state_id: &str) -> Result<bool, WorkflowError> {
        Ok(self.workflow(workflow_id)?.state(state_id).is_some())
    }

    /// Like [`is_valid`](Self::is_valid) but fails with `UnknownState`.
    pub fn require_state(&self, workflow_id: &str, state_id: &str) -> Result<&State, WorkflowError> {
        self.workflow(workflow_id)?
            .state(state_id)
            .ok_or_else(|| WorkflowError::UnknownState {
                workflow: workflow_id.to_string(),
                state: state_id.to_string(),
            })
    }
}

impl WorkflowConfig for StateRegistry {
    fn settings_of(&self, workflow_id: &str) -> Result<WorkflowSettings, WorkflowError> {
        Ok(self.workflow(workflow_id)?.settings().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransitionRule;

    fn editorial() -> Workflow {
        let states = ["creation", "draft", "published"]
            .iter()
            .enumerate()
            .map(|(i, id)| State {
                id: id.to_string(),
                label: id.to_string(),
                creation: i == 0,
                weight: i as i32,
            })
            .collect();
        Workflow::new(
            "editorial",
            "Editorial",
            states,
            vec![TransitionRule {
                from: "draft".to_string(),
                to: "published".to_string(),
            }],
            WorkflowSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn lookups() {
        let mut registry = StateRegistry::new();
        registry.register(editorial()).unwrap();

        assert_eq!(registry.states_of("editorial").unwrap().len(), 3);
        assert_eq!(registry.creation_state_of("editorial").unwrap().id, "creation");
        assert!(registry.is_valid("editorial", "draft").unwrap());
        assert!(!registry.is_valid("editorial", "archived").unwrap());
        assert!(registry.settings_of("editorial").unwrap().schedule_enable);
    }

    #[test]
    fn unknown_workflow_and_state() {
        let mut registry = StateRegistry::new();
        registry.register(editorial()).unwrap();

        assert!(matches!(
            registry.states_of("legal"),
            Err(WorkflowError::UnknownWorkflow { .. })
        ));
        assert!(matches!(
            registry.is_valid("legal", "draft"),
            Err(WorkflowError::UnknownWorkflow { .. })
        ));
        assert!(matches!(
            registry.require_state("editorial", "archived"),
            Err(WorkflowError::UnknownState { .. })
        ));
    }

    #[test]
    fn duplicate_workflow_rejected() {
        let mut registry = StateRegistry::new();
        registry.register(editorial()).unwrap();
        assert!(registry.register(editorial()).is_err());
    }
}
