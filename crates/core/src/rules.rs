//! Transition rule engine: computes which states an actor may move to.
//!
//! Pure functions over the registry and a permission oracle. No IO, no
//! mutation.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::WorkflowError;
use crate::permission::{Actor, PermissionKey, PermissionOracle};
use crate::registry::StateRegistry;
use crate::types::{EntityRef, State};

/// One selectable target state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateOption {
    pub state_id: String,
    pub label: String,
}

impl From<&State> for StateOption {
    fn from(state: &State) -> Self {
        Self {
            state_id: state.id.clone(),
            label: state.label.clone(),
        }
    }
}

/// The legal next states, in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "options", rename_all = "snake_case")]
pub enum TransitionOptions {
    /// Options for a known entity.
    Flat(Vec<StateOption>),
    /// Every state, grouped by workflow id, for contexts without an entity.
    Grouped(BTreeMap<String, Vec<StateOption>>),
}

impl TransitionOptions {
    pub fn contains(&self, state_id: &str) -> bool {
        self.iter().any(|o| o.state_id == state_id)
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn state_ids(&self) -> Vec<&str> {
        self.iter().map(|o| o.state_id.as_str()).collect()
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = &StateOption> + '_> {
        match self {
            TransitionOptions::Flat(options) => Box::new(options.iter()),
            TransitionOptions::Grouped(groups) => Box::new(groups.values().flatten()),
        }
    }
}

/// Evaluates reachability and permissions for transitions.
#[derive(Clone)]
pub struct RuleEngine {
    registry: Arc<StateRegistry>,
    oracle: Arc<dyn PermissionOracle>,
}

impl RuleEngine {
    pub fn new(registry: Arc<StateRegistry>, oracle: Arc<dyn PermissionOracle>) -> Self {
        Self { registry, oracle }
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    /// The legal next states from `from_state` for `actor`.
    ///
    /// - Without an entity, every assignable state of the workflow is offered,
    ///   grouped by workflow.
    /// - From the creation state, the configured first assignable states (or
    ///   the rule targets when none are configured) are offered.
    /// - Otherwise, `from_state` itself plus its rule targets. Staying put
    ///   records a comment without moving.
    ///
    /// In the last two cases each move also needs the actor's transition
    /// permission. Staying in `from_state` needs none.
    pub fn options_for(
        &self,
        workflow_id: &str,
        from_state: &str,
        actor: &Actor,
        entity: Option<&EntityRef>,
    ) -> Result<TransitionOptions, WorkflowError> {
        let workflow = self.registry.workflow(workflow_id)?;
        if entity.is_none() {
            return self.grouped_options(&[workflow_id]);
        }
        self.registry.require_state(workflow_id, from_state)?;

        let first_assignable = &workflow.settings().first_assignable;
        let creation = workflow.is_creation(from_state);
        let stays = |s: &State| !creation && s.id == from_state;
        let candidates: Vec<&State> = if creation && !first_assignable.is_empty() {
            workflow
                .states()
                .iter()
                .filter(|s| first_assignable.contains(&s.id))
                .collect()
        } else {
            workflow
                .states()
                .iter()
                .filter(|s| stays(*s) || workflow.has_transition(from_state, &s.id))
                .collect()
        };

        let options: Vec<StateOption> = candidates
            .into_iter()
            .filter(|to| stays(*to) || self.permits(workflow_id, from_state, &to.id, actor))
            .map(StateOption::from)
            .collect();

        debug!(
            workflow = workflow_id,
            from = from_state,
            actor = %actor.id,
            options = options.len(),
            "computed transition options"
        );
        Ok(TransitionOptions::Flat(options))
    }

    /// Every non-creation state of each listed workflow, grouped by workflow.
    /// Used by pickers that configure bulk actions across workflows.
    pub fn grouped_options(&self, workflow_ids: &[&str]) -> Result<TransitionOptions, WorkflowError> {
        let mut groups = BTreeMap::new();
        for id in workflow_ids {
            let workflow = self.registry.workflow(id)?;
            let options = workflow
                .states()
                .iter()
                .filter(|s| !s.creation)
                .map(StateOption::from)
                .collect();
            groups.insert(id.to_string(), options);
        }
        Ok(TransitionOptions::Grouped(groups))
    }

    /// Whether `actor` holds the permission for `from -> to`.
    pub fn permits(&self, workflow_id: &str, from: &str, to: &str, actor: &Actor) -> bool {
        self.oracle
            .has_permission(actor, &PermissionKey::transition(workflow_id, from, to))
    }

    /// Scheduling needs the permission, the workflow switch, and an existing
    /// target: content that was never saved has nothing to update later.
    pub fn can_schedule(
        &self,
        workflow_id: &str,
        actor: &Actor,
        target_exists: bool,
    ) -> Result<bool, WorkflowError> {
        let workflow = self.registry.workflow(workflow_id)?;
        Ok(target_exists
            && workflow.settings().schedule_enable
            && self
                .oracle
                .has_permission(actor, &PermissionKey::schedule(workflow_id)))
    }

    pub fn can_force(&self, workflow_id: &str, actor: &Actor) -> bool {
        self.oracle
            .has_permission(actor, &PermissionKey::force(workflow_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::GrantedPermissions;
    use crate::types::{TransitionRule, Workflow, WorkflowSettings};

    fn registry(settings: WorkflowSettings) -> Arc<StateRegistry> {
        let states = ["creation", "draft", "review", "published"]
            .iter()
            .enumerate()
            .map(|(i, id)| State {
                id: id.to_string(),
                label: id.to_uppercase(),
                creation: i == 0,
                weight: i as i32,
            })
            .collect();
        let transitions = [
            ("creation", "draft"),
            ("creation", "review"),
            ("draft", "review"),
            ("draft", "published"),
            ("review", "published"),
        ]
        .iter()
        .map(|(from, to)| TransitionRule {
            from: from.to_string(),
            to: to.to_string(),
        })
        .collect();
        let mut registry = StateRegistry::new();
        registry
            .register(Workflow::new("w", "W", states, transitions, settings).unwrap())
            .unwrap();
        Arc::new(registry)
    }

    fn engine(settings: WorkflowSettings) -> RuleEngine {
        RuleEngine::new(registry(settings), Arc::new(GrantedPermissions))
    }

    fn node() -> EntityRef {
        EntityRef::new("node", "1")
    }

    #[test]
    fn only_permitted_targets_offered() {
        let engine = engine(WorkflowSettings::default());
        let actor = Actor::new("a").grant(PermissionKey::transition("w", "draft", "review"));
        let options = engine.options_for("w", "draft", &actor, Some(&node())).unwrap();
        assert_eq!(options.state_ids(), ["draft", "review"]);
    }

    #[test]
    fn current_state_offered_without_permission() {
        let engine = engine(WorkflowSettings::default());
        let options = engine
            .options_for("w", "published", &Actor::new("nobody"), Some(&node()))
            .unwrap();
        assert_eq!(options.state_ids(), ["published"]);
    }

    #[test]
    fn unreachable_targets_never_offered_even_to_bypass() {
        let engine = engine(WorkflowSettings::default());
        let options = engine
            .options_for("w", "review", &Actor::system(), Some(&node()))
            .unwrap();
        assert_eq!(options.state_ids(), ["review", "published"]);
    }

    #[test]
    fn creation_state_uses_first_assignable() {
        let settings = WorkflowSettings {
            first_assignable: vec!["draft".to_string()],
            ..WorkflowSettings::default()
        };
        let configured = engine(settings);
        let options = configured
            .options_for("w", "creation", &Actor::system(), Some(&node()))
            .unwrap();
        assert_eq!(options.state_ids(), ["draft"]);

        let open = engine(WorkflowSettings::default());
        let options = open
            .options_for("w", "creation", &Actor::system(), Some(&node()))
            .unwrap();
        assert_eq!(options.state_ids(), ["draft", "review"]);
    }

    #[test]
    fn no_entity_offers_all_states_grouped() {
        let engine = engine(WorkflowSettings::default());
        let options = engine
            .options_for("w", "draft", &Actor::new("nobody"), None)
            .unwrap();
        match &options {
            TransitionOptions::Grouped(groups) => {
                assert_eq!(groups.len(), 1);
                assert_eq!(options.state_ids(), ["draft", "review", "published"]);
            }
            other => panic!("expected grouped options, got {other:?}"),
        }
    }

    #[test]
    fn unknown_inputs_fail() {
        let engine = engine(WorkflowSettings::default());
        let actor = Actor::system();
        assert!(matches!(
            engine.options_for("nope", "draft", &actor, Some(&node())),
            Err(WorkflowError::UnknownWorkflow { .. })
        ));
        assert!(matches!(
            engine.options_for("w", "limbo", &actor, Some(&node())),
            Err(WorkflowError::UnknownState { .. })
        ));
    }

    #[test]
    fn scheduling_requires_permission_setting_and_target() {
        let actor = Actor::new("a").grant(PermissionKey::schedule("w"));
        let enabled = engine(WorkflowSettings::default());
        assert!(enabled.can_schedule("w", &actor, true).unwrap());
        assert!(!enabled.can_schedule("w", &actor, false).unwrap());
        assert!(!enabled.can_schedule("w", &Actor::new("b"), true).unwrap());

        let disabled = engine(WorkflowSettings {
            schedule_enable: false,
            ..WorkflowSettings::default()
        });
        assert!(!disabled.can_schedule("w", &actor, true).unwrap());
    }

    #[test]
    fn force_requires_permission() {
        let engine = engine(WorkflowSettings::default());
        assert!(engine.can_force("w", &Actor::new("a").grant(PermissionKey::force("w"))));
        assert!(!engine.can_force("w", &Actor::new("a")));
    }
}
