//! Structured permission keys and the oracle that answers them.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

/// A permission the engine may ask about, resolved once instead of being
/// composed as a string at each call site.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PermissionKey {
    Transition {
        workflow: String,
        from: String,
        to: String,
    },
    Schedule {
        workflow: String,
    },
    Force {
        workflow: String,
    },
}

impl PermissionKey {
    pub fn transition(workflow: &str, from: &str, to: &str) -> Self {
        PermissionKey::Transition {
            workflow: workflow.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn schedule(workflow: &str) -> Self {
        PermissionKey::Schedule {
            workflow: workflow.to_string(),
        }
    }

    pub fn force(workflow: &str) -> Self {
        PermissionKey::Force {
            workflow: workflow.to_string(),
        }
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionKey::Transition { workflow, from, to } => {
                write!(f, "transition {} from {} to {}", workflow, from, to)
            }
            PermissionKey::Schedule { workflow } => {
                write!(f, "schedule {} workflow_transition", workflow)
            }
            PermissionKey::Force { workflow } => write!(f, "force {} workflow_transition", workflow),
        }
    }
}

impl FromStr for PermissionKey {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = s.split_whitespace().collect();
        match words.as_slice() {
            ["transition", workflow, "from", from, "to", to] => {
                Ok(PermissionKey::transition(workflow, from, to))
            }
            ["schedule", workflow, "workflow_transition"] => Ok(PermissionKey::schedule(workflow)),
            ["force", workflow, "workflow_transition"] => Ok(PermissionKey::force(workflow)),
            _ => Err(WorkflowError::InvalidPermission {
                name: s.to_string(),
            }),
        }
    }
}

/// An identity the engine checks permissions for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    granted: BTreeSet<PermissionKey>,
    bypass: bool,
}

impl Actor {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            granted: BTreeSet::new(),
            bypass: false,
        }
    }

    /// An actor holding every permission, used for unattended runs such as
    /// the scheduler sweep.
    pub fn system() -> Self {
        Self::new("system").with_bypass()
    }

    pub fn grant(mut self, key: PermissionKey) -> Self {
        self.granted.insert(key);
        self
    }

    pub fn with_bypass(mut self) -> Self {
        self.bypass = true;
        self
    }

    pub fn granted(&self) -> &BTreeSet<PermissionKey> {
        &self.granted
    }

    pub fn bypasses(&self) -> bool {
        self.bypass
    }
}

/// Answers whether an actor holds a permission.
pub trait PermissionOracle: Send + Sync {
    fn has_permission(&self, actor: &Actor, key: &PermissionKey) -> bool;
}

/// Oracle that trusts the grants carried on the `Actor` itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantedPermissions;

impl PermissionOracle for GrantedPermissions {
    fn has_permission(&self, actor: &Actor, key: &PermissionKey) -> bool {
        actor.bypass || actor.granted.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_conventional_names() {
        assert_eq!(
            PermissionKey::transition("editorial", "draft", "review").to_string(),
            "transition editorial from draft to review"
        );
        assert_eq!(
            PermissionKey::schedule("editorial").to_string(),
            "schedule editorial workflow_transition"
        );
        assert_eq!(
            PermissionKey::force("editorial").to_string(),
            "force editorial workflow_transition"
        );
    }

    #[test]
    fn parses_names_back() {
        for name in [
            "transition editorial from draft to review",
            "schedule editorial workflow_transition",
            "force editorial workflow_transition",
        ] {
            let key: PermissionKey = name.parse().unwrap();
            assert_eq!(key.to_string(), name);
        }
    }

    #[test]
    fn rejects_unknown_names() {
        let err = "administer workflow".parse::<PermissionKey>().unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidPermission { .. }));
    }

    #[test]
    fn granted_oracle_checks_actor_grants() {
        let oracle = GrantedPermissions;
        let key = PermissionKey::transition("w", "a", "b");
        let editor = Actor::new("editor").grant(key.clone());
        let visitor = Actor::new("visitor");
        assert!(oracle.has_permission(&editor, &key));
        assert!(!oracle.has_permission(&visitor, &key));
        assert!(oracle.has_permission(&Actor::system(), &key));
    }
}
