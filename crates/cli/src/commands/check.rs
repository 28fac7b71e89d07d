use std::collections::{BTreeSet, VecDeque};
use std::path::Path;

use serde::Serialize;
use workflow_core::Workflow;

use super::load_registry;
use crate::OutputFormat;

#[derive(Debug, Serialize)]
struct WorkflowSummary {
    id: String,
    label: String,
    states: usize,
    transitions: usize,
    creation_state: String,
    /// States no transition path from the creation state reaches.
    unreachable: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    valid: bool,
    workflows: Vec<WorkflowSummary>,
}

pub(crate) fn cmd_check(config: &Path, output: OutputFormat, quiet: bool) {
    let registry = load_registry(config, output, quiet);
    let report = CheckReport {
        valid: true,
        workflows: registry.workflows().map(summarize).collect(),
    };

    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&report)
                .unwrap_or_else(|e| format!("{{\"error\": \"serialization: {}\"}}", e));
            println!("{}", json);
        }
        OutputFormat::Text => {
            println!("Workflow check: {}", config.display());
            for wf in &report.workflows {
                println!(
                    "  {} ({}): {} states, {} transitions, creation state '{}'",
                    wf.id, wf.label, wf.states, wf.transitions, wf.creation_state
                );
                if !wf.unreachable.is_empty() {
                    println!("    WARNING: unreachable states: {}", wf.unreachable.join(", "));
                }
            }
            println!("OK: {} workflow(s)", report.workflows.len());
        }
    }
}

fn summarize(workflow: &Workflow) -> WorkflowSummary {
    WorkflowSummary {
        id: workflow.id().to_string(),
        label: workflow.label().to_string(),
        states: workflow.states().len(),
        transitions: workflow.transitions().len(),
        creation_state: workflow.creation_state().id.clone(),
        unreachable: unreachable_states(workflow),
    }
}

/// Breadth-first walk of the transition rules from the creation state.
fn unreachable_states(workflow: &Workflow) -> Vec<String> {
    let start = workflow.creation_state().id.as_str();
    let mut seen: BTreeSet<&str> = BTreeSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(from) = queue.pop_front() {
        for rule in workflow.transitions().iter().filter(|r| r.from == from) {
            if seen.insert(rule.to.as_str()) {
                queue.push_back(rule.to.as_str());
            }
        }
    }
    workflow
        .states()
        .iter()
        .filter(|s| !seen.contains(s.id.as_str()))
        .map(|s| s.id.clone())
        .collect()
}
