//! Scenario file format for `workflow simulate`.
//!
//! A scenario declares actors with their permissions and a list of steps
//! replayed in order against a fresh in-memory store.
//!
//! # Example
//!
//! ```toml
//! start = "2026-03-01T09:00:00Z"
//!
//! [[actors]]
//! id = "editor"
//! permissions = [
//!     "transition editorial from draft to review",
//!     "schedule editorial workflow_transition",
//! ]
//!
//! [[actors]]
//! id = "admin"
//! bypass = true
//!
//! [[steps]]
//! action = "submit"
//! actor = "editor"
//! workflow = "editorial"
//! entity = "node/1"
//! to = "review"
//! comment = "ready for review"
//!
//! [[steps]]
//! action = "schedule"
//! actor = "admin"
//! workflow = "editorial"
//! entity = "node/1"
//! to = "published"
//! date = "2026-03-01"
//! time = "12:00"
//!
//! [[steps]]
//! action = "advance"
//! minutes = 180
//!
//! [[steps]]
//! action = "sweep"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use workflow_core::{Actor, EntityRef, PermissionKey, ScheduleInput, StateRegistry};

fn default_field() -> String {
    "field_status".to_string()
}

// ── Types ─────────────────────────────────────────────────────────────────────

/// Top-level scenario file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// RFC 3339 start time of the simulated clock.
    pub start: String,
    #[serde(default)]
    pub actors: Vec<ActorDef>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// `[[actors]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorDef {
    pub id: String,
    /// Grants every permission.
    #[serde(default)]
    pub bypass: bool,
    /// Permission names, e.g. `transition editorial from draft to review`.
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// `[[steps]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Execute a transition immediately.
    Submit(TransitionStep),
    /// Queue a transition for `date`/`time`.
    Schedule(TransitionStep),
    /// Execute a transition bypassing transition permissions.
    Force(TransitionStep),
    /// Move the simulated clock forward.
    Advance { minutes: i64 },
    /// Run every scheduled transition that is due.
    Sweep,
}

/// A transition requested by a scenario step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionStep {
    pub actor: String,
    pub workflow: String,
    /// `<entity type>/<entity id>`.
    pub entity: String,
    #[serde(default = "default_field")]
    pub field: String,
    pub to: String,
    #[serde(default)]
    pub comment: String,
    pub date: Option<String>,
    pub time: Option<String>,
    pub utc_offset: Option<String>,
}

impl TransitionStep {
    pub fn entity_ref(&self) -> Result<EntityRef, String> {
        match self.entity.split_once('/') {
            Some((entity_type, entity_id)) if !entity_type.is_empty() && !entity_id.is_empty() => {
                Ok(EntityRef::new(entity_type, entity_id))
            }
            _ => Err(format!(
                "entity '{}' must look like '<type>/<id>'",
                self.entity
            )),
        }
    }

    /// Schedule input, if a date was given.
    pub fn schedule_input(&self) -> Option<ScheduleInput> {
        self.date.as_ref().map(|date| ScheduleInput {
            date: date.clone(),
            time: self.time.clone().unwrap_or_default(),
            utc_offset: self.utc_offset.clone().unwrap_or_default(),
        })
    }
}

impl Step {
    pub fn action(&self) -> &'static str {
        match self {
            Step::Submit(_) => "submit",
            Step::Schedule(_) => "schedule",
            Step::Force(_) => "force",
            Step::Advance { .. } => "advance",
            Step::Sweep => "sweep",
        }
    }

    pub fn transition(&self) -> Option<&TransitionStep> {
        match self {
            Step::Submit(t) | Step::Schedule(t) | Step::Force(t) => Some(t),
            Step::Advance { .. } | Step::Sweep => None,
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Read and parse a scenario file from disk.
pub fn read_scenario(path: &Path) -> Result<Scenario, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
    toml::from_str(&content).map_err(|e| format!("could not parse '{}': {}", path.display(), e))
}

/// Parsed scenario start time.
pub fn start_time(scenario: &Scenario) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(&scenario.start, &Rfc3339)
        .map_err(|e| format!("invalid start '{}': {}", scenario.start, e))
}

/// Build the declared actors, keyed by id.
pub fn build_actors(scenario: &Scenario) -> Result<BTreeMap<String, Actor>, Vec<String>> {
    let mut errors = Vec::new();
    let mut actors = BTreeMap::new();
    for def in &scenario.actors {
        let mut actor = Actor::new(&def.id);
        if def.bypass {
            actor = actor.with_bypass();
        }
        for name in &def.permissions {
            match name.parse::<PermissionKey>() {
                Ok(key) => actor = actor.grant(key),
                Err(e) => errors.push(format!("actor '{}': {}", def.id, e)),
            }
        }
        if actors.insert(def.id.clone(), actor).is_some() {
            errors.push(format!("actor '{}' is declared twice", def.id));
        }
    }
    if errors.is_empty() {
        Ok(actors)
    } else {
        Err(errors)
    }
}

/// Check every step refers to a declared actor, a known workflow, and a
/// well-formed entity.
///
/// Returns `Ok(())` if valid, or `Err(Vec<String>)` listing every problem.
pub fn validate_scenario(
    scenario: &Scenario,
    actors: &BTreeMap<String, Actor>,
    registry: &StateRegistry,
) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    for (i, step) in scenario.steps.iter().enumerate() {
        let n = i + 1;
        if let Step::Advance { minutes } = step {
            if *minutes < 0 {
                errors.push(format!("step {}: cannot advance by {} minutes", n, minutes));
            }
        }
        let Some(t) = step.transition() else {
            continue;
        };
        if !actors.contains_key(&t.actor) {
            errors.push(format!("step {}: unknown actor '{}'", n, t.actor));
        }
        if registry.workflow(&t.workflow).is_err() {
            errors.push(format!("step {}: unknown workflow '{}'", n, t.workflow));
        }
        if let Err(e) = t.entity_ref() {
            errors.push(format!("step {}: {}", n, e));
        }
        if matches!(step, Step::Schedule(_)) && t.date.is_none() {
            errors.push(format!("step {}: schedule needs a date", n));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_core::parse_workflow_file;

    const SCENARIO: &str = r#"
start = "2026-03-01T09:00:00Z"

[[actors]]
id = "editor"
permissions = ["transition editorial from draft to review"]

[[steps]]
action = "submit"
actor = "editor"
workflow = "editorial"
entity = "node/1"
to = "review"

[[steps]]
action = "schedule"
actor = "editor"
workflow = "editorial"
entity = "node/1"
to = "published"
date = "2026-03-02"

[[steps]]
action = "advance"
minutes = 60

[[steps]]
action = "sweep"
"#;

    fn registry() -> StateRegistry {
        let file = parse_workflow_file(
            r#"
[[workflows]]
id = "editorial"
[[workflows.states]]
id = "draft"
creation = true
[[workflows.states]]
id = "review"
[[workflows.transitions]]
from = "draft"
to = "review"
"#,
        )
        .unwrap();
        StateRegistry::from_config(file).unwrap()
    }

    #[test]
    fn parses_steps() {
        let scenario: Scenario = toml::from_str(SCENARIO).unwrap();
        let actions: Vec<&str> = scenario.steps.iter().map(Step::action).collect();
        assert_eq!(actions, ["submit", "schedule", "advance", "sweep"]);

        let schedule = scenario.steps[1].transition().unwrap();
        assert_eq!(schedule.field, "field_status");
        let input = schedule.schedule_input().unwrap();
        assert_eq!(input.date, "2026-03-02");
        assert_eq!(input.time, "");

        assert_eq!(
            start_time(&scenario).unwrap(),
            time::macros::datetime!(2026-03-01 09:00 UTC)
        );
    }

    #[test]
    fn valid_scenario_passes() {
        let scenario: Scenario = toml::from_str(SCENARIO).unwrap();
        let actors = build_actors(&scenario).unwrap();
        assert!(validate_scenario(&scenario, &actors, &registry()).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let mut scenario: Scenario = toml::from_str(SCENARIO).unwrap();
        if let Step::Submit(t) = &mut scenario.steps[0] {
            t.actor = "ghost".to_string();
            t.workflow = "legal".to_string();
            t.entity = "node".to_string();
        }
        if let Step::Schedule(t) = &mut scenario.steps[1] {
            t.date = None;
        }
        let actors = build_actors(&scenario).unwrap();
        let errors = validate_scenario(&scenario, &actors, &registry()).unwrap_err();
        assert_eq!(errors.len(), 4, "{errors:?}");
        assert!(errors[0].contains("unknown actor 'ghost'"));
    }

    #[test]
    fn bad_permission_name_rejected() {
        let scenario: Scenario = toml::from_str(
            r#"
start = "2026-03-01T09:00:00Z"
[[actors]]
id = "editor"
permissions = ["publish everything"]
"#,
        )
        .unwrap();
        let errors = build_actors(&scenario).unwrap_err();
        assert!(errors[0].contains("publish everything"));
    }
}
