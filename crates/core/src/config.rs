//! Workflow definition files.
//!
//! Workflows are declared in TOML and turned into a validated
//! [`StateRegistry`].
//!
//! # Example
//!
//! ```toml
//! [[workflows]]
//! id = "editorial"
//! label = "Editorial"
//!
//! [workflows.settings]
//! schedule_enable = true
//! comment = "optional"
//! options = "radios"
//! first_assignable = ["draft"]
//!
//! [[workflows.states]]
//! id = "creation"
//! label = "(creation)"
//! creation = true
//! weight = -50
//!
//! [[workflows.states]]
//! id = "draft"
//! label = "Draft"
//!
//! [[workflows.transitions]]
//! from = "creation"
//! to = "draft"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::registry::StateRegistry;
use crate::types::{State, TransitionRule, Workflow, WorkflowSettings};

/// Top-level workflow file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowFile {
    #[serde(default)]
    pub workflows: Vec<WorkflowDef>,
}

/// `[[workflows]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDef {
    pub id: String,
    /// Defaults to the id.
    pub label: Option<String>,
    #[serde(default)]
    pub settings: WorkflowSettings,
    #[serde(default)]
    pub states: Vec<StateDef>,
    #[serde(default)]
    pub transitions: Vec<TransitionRule>,
}

/// `[[workflows.states]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDef {
    pub id: String,
    /// Defaults to the id.
    pub label: Option<String>,
    #[serde(default)]
    pub creation: bool,
    #[serde(default)]
    pub weight: i32,
}

impl WorkflowDef {
    pub fn build(self) -> Result<Workflow, WorkflowError> {
        let states = self
            .states
            .into_iter()
            .map(|s| State {
                label: s.label.unwrap_or_else(|| s.id.clone()),
                id: s.id,
                creation: s.creation,
                weight: s.weight,
            })
            .collect();
        let label = self.label.unwrap_or_else(|| self.id.clone());
        Workflow::new(&self.id, &label, states, self.transitions, self.settings)
    }
}

/// Parse a workflow file from TOML text.
pub fn parse_workflow_file(content: &str) -> Result<WorkflowFile, WorkflowError> {
    toml::from_str(content).map_err(|e| WorkflowError::Config(e.to_string()))
}

/// Read and parse a workflow file from `path`.
pub fn read_workflow_file(path: &Path) -> Result<WorkflowFile, WorkflowError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| WorkflowError::Config(format!("could not read '{}': {}", path.display(), e)))?;
    parse_workflow_file(&content).map_err(|e| match e {
        WorkflowError::Config(msg) => {
            WorkflowError::Config(format!("could not parse '{}': {}", path.display(), msg))
        }
        other => other,
    })
}

impl StateRegistry {
    /// Build and validate every workflow in `file`.
    pub fn from_config(file: WorkflowFile) -> Result<Self, WorkflowError> {
        let mut registry = StateRegistry::new();
        for def in file.workflows {
            registry.register(def.build()?)?;
        }
        Ok(registry)
    }

    /// Read, parse, and validate a workflow file.
    pub fn load(path: &Path) -> Result<Self, WorkflowError> {
        Self::from_config(read_workflow_file(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommentRequirement, OptionsStyle};

    const EDITORIAL: &str = r#"
[[workflows]]
id = "editorial"
label = "Editorial"

[workflows.settings]
comment = "required"
options = "buttons"
first_assignable = ["draft"]

[[workflows.states]]
id = "creation"
label = "(creation)"
creation = true
weight = -50

[[workflows.states]]
id = "published"
weight = 10

[[workflows.states]]
id = "draft"
label = "Draft"

[[workflows.transitions]]
from = "creation"
to = "draft"

[[workflows.transitions]]
from = "draft"
to = "published"
"#;

    #[test]
    fn parses_and_validates() {
        let registry = StateRegistry::from_config(parse_workflow_file(EDITORIAL).unwrap()).unwrap();
        let wf = registry.workflow("editorial").unwrap();

        assert_eq!(wf.label(), "Editorial");
        let ids: Vec<&str> = wf.states().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["creation", "draft", "published"]);
        assert_eq!(wf.state("published").unwrap().label, "published");
        assert_eq!(wf.settings().comment, CommentRequirement::Required);
        assert_eq!(wf.settings().options, OptionsStyle::Buttons);
        assert!(wf.settings().schedule_enable);
        assert!(wf.has_transition("draft", "published"));
    }

    #[test]
    fn settings_default_when_absent() {
        let file = parse_workflow_file(
            r#"
[[workflows]]
id = "simple"
[[workflows.states]]
id = "new"
creation = true
"#,
        )
        .unwrap();
        let registry = StateRegistry::from_config(file).unwrap();
        assert_eq!(
            registry.workflow("simple").unwrap().settings(),
            &WorkflowSettings::default()
        );
    }

    #[test]
    fn invalid_definition_reported() {
        let file = parse_workflow_file(
            r#"
[[workflows]]
id = "broken"
[[workflows.states]]
id = "a"
"#,
        )
        .unwrap();
        assert!(matches!(
            StateRegistry::from_config(file),
            Err(WorkflowError::InvalidWorkflow { .. })
        ));
    }

    #[test]
    fn malformed_toml_is_config_error() {
        assert!(matches!(
            parse_workflow_file("[[workflows]\nid ="),
            Err(WorkflowError::Config(_))
        ));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflows.toml");
        std::fs::write(&path, EDITORIAL).unwrap();
        let registry = StateRegistry::load(&path).unwrap();
        assert!(registry.workflow("editorial").is_ok());

        let missing = StateRegistry::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(missing.to_string().contains("could not read"));
    }
}
