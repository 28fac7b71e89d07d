use std::path::Path;
use std::process;

use serde::Serialize;
use workflow_core::{State, TransitionRule, WorkflowSettings};

use super::load_registry;
use crate::{report_error, OutputFormat};

#[derive(Debug, Serialize)]
struct StatesView<'a> {
    id: &'a str,
    label: &'a str,
    states: &'a [State],
    transitions: &'a [TransitionRule],
    settings: &'a WorkflowSettings,
}

pub(crate) fn cmd_states(config: &Path, workflow_id: &str, output: OutputFormat, quiet: bool) {
    let registry = load_registry(config, output, quiet);
    let workflow = match registry.workflow(workflow_id) {
        Ok(wf) => wf,
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    };

    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => {
            let view = StatesView {
                id: workflow.id(),
                label: workflow.label(),
                states: workflow.states(),
                transitions: workflow.transitions(),
                settings: workflow.settings(),
            };
            let json = serde_json::to_string_pretty(&view)
                .unwrap_or_else(|e| format!("{{\"error\": \"serialization: {}\"}}", e));
            println!("{}", json);
        }
        OutputFormat::Text => {
            println!("Workflow {} ({})", workflow.id(), workflow.label());
            println!("  States:");
            for state in workflow.states() {
                let marker = if state.creation { "  [creation]" } else { "" };
                println!(
                    "    {:<16} {:<20} weight {}{}",
                    state.id, state.label, state.weight, marker
                );
            }
            println!("  Transitions:");
            for rule in workflow.transitions() {
                println!("    {} -> {}", rule.from, rule.to);
            }
            let settings = workflow.settings();
            println!(
                "  Settings: schedule_enable={} comment={:?} options={:?} name_as_title={}",
                settings.schedule_enable, settings.comment, settings.options, settings.name_as_title
            );
            if !settings.first_assignable.is_empty() {
                println!("  First assignable: {}", settings.first_assignable.join(", "));
            }
        }
    }
}
