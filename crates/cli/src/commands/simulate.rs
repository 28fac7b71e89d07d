use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::process;
use std::sync::Arc;

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tracing::debug;
use workflow_core::{
    Actor, Clock, EntityRef, EntryKind, GrantedPermissions, HistoryEntry, ManualClock, StateRegistry,
    Submission, TransitionInput, WorkflowError, WorkflowService,
};
use workflow_storage::InMemoryStorage;

use super::load_registry;
use crate::scenario::{self, Scenario, Step, TransitionStep};
use crate::{report_error, OutputFormat};

#[derive(Debug, Serialize)]
struct StepOutcome {
    step: usize,
    action: &'static str,
    /// `executed`, `scheduled`, `advanced`, `swept`, or `failed`.
    result: &'static str,
    at: String,
    detail: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
struct HistoryView {
    id: u64,
    from: Option<String>,
    to: String,
    actor: String,
    at: String,
    comment: String,
    forced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    corrects: Option<u64>,
}

#[derive(Debug, Serialize)]
struct PendingView {
    to: String,
    actor: String,
    at: String,
}

#[derive(Debug, Serialize)]
struct FieldView {
    entity: String,
    field: String,
    workflow: String,
    state: String,
    history: Vec<HistoryView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pending: Option<PendingView>,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    steps: Vec<StepOutcome>,
    fields: Vec<FieldView>,
}

pub(crate) async fn cmd_simulate(
    config: &Path,
    scenario_path: &Path,
    output: OutputFormat,
    quiet: bool,
) {
    let registry = load_registry(config, output, quiet);
    let scenario = match scenario::read_scenario(scenario_path) {
        Ok(s) => s,
        Err(msg) => {
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };
    let start = match scenario::start_time(&scenario) {
        Ok(t) => t,
        Err(msg) => {
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };
    let actors = scenario::build_actors(&scenario)
        .and_then(|actors| {
            scenario::validate_scenario(&scenario, &actors, &registry).map(|()| actors)
        })
        .unwrap_or_else(|errors| {
            report_error(
                &format!("invalid scenario:\n  {}", errors.join("\n  ")),
                output,
                quiet,
            );
            process::exit(1)
        });

    let report = match run(registry, &scenario, &actors, start).await {
        Ok(report) => report,
        Err(e) => {
            report_error(&format!("simulation failed: {}", e), output, quiet);
            process::exit(1);
        }
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
        OutputFormat::Text => print_text(&report),
    }
}

/// Replay every step. Step failures are part of the report; only storage
/// failures while collecting the final picture abort the run.
async fn run(
    registry: StateRegistry,
    scenario: &Scenario,
    actors: &BTreeMap<String, Actor>,
    start: OffsetDateTime,
) -> Result<SimulationReport, WorkflowError> {
    let clock = ManualClock::new(start);
    let service = WorkflowService::new(
        Arc::new(registry),
        Arc::new(GrantedPermissions),
        Arc::new(InMemoryStorage::new()),
    );
    let runner = Actor::system();

    let mut steps = Vec::new();
    let mut touched = BTreeSet::new();
    for (i, step) in scenario.steps.iter().enumerate() {
        let now = clock.now();
        let mut outcome = StepOutcome {
            step: i + 1,
            action: step.action(),
            result: "failed",
            at: format_time(now),
            detail: String::new(),
            warnings: Vec::new(),
        };
        debug!(step = i + 1, action = step.action(), "replaying step");

        match step {
            Step::Advance { minutes } => {
                clock.advance(Duration::minutes(*minutes));
                outcome.result = "advanced";
                outcome.detail = format!("clock now {}", format_time(clock.now()));
            }
            Step::Sweep => match service.run_due(&runner, now).await {
                Ok(sweep) => {
                    outcome.result = "swept";
                    outcome.detail = format!(
                        "{} executed, {} failed",
                        sweep.executed.len(),
                        sweep.failed.len()
                    );
                    outcome.warnings = sweep
                        .failed
                        .iter()
                        .map(|f| f.error.to_string())
                        .collect();
                }
                Err(e) => outcome.detail = e.to_string(),
            },
            Step::Submit(t) | Step::Schedule(t) | Step::Force(t) => {
                // Checked by validate_scenario.
                let (Some(actor), Ok(entity)) = (actors.get(&t.actor), t.entity_ref()) else {
                    continue;
                };
                touched.insert((t.workflow.clone(), entity.clone(), t.field.clone()));
                let input = TransitionInput {
                    to_state: t.to.clone(),
                    comment: t.comment.clone(),
                    schedule: match step {
                        Step::Schedule(_) => t.schedule_input(),
                        _ => None,
                    },
                    force: matches!(step, Step::Force(_)),
                    ..TransitionInput::default()
                };
                match transition(&service, t, &entity, actor, input, now).await {
                    Ok((submission, warnings)) => {
                        outcome.warnings = warnings;
                        match submission {
                            Submission::Executed(entry) => {
                                outcome.result = "executed";
                                outcome.detail = format!(
                                    "{} {} -> {}",
                                    entity,
                                    entry.from_state.as_deref().unwrap_or("(none)"),
                                    entry.to_state
                                );
                            }
                            Submission::Scheduled { at, .. } => {
                                outcome.result = "scheduled";
                                outcome.detail =
                                    format!("{} -> {} at {}", entity, t.to, format_time(at));
                            }
                        }
                    }
                    Err(e) => outcome.detail = e.to_string(),
                }
            }
        }
        steps.push(outcome);
    }

    let mut fields = Vec::new();
    for (workflow, entity, field) in touched {
        fields.push(field_view(&service, &workflow, &entity, &field).await?);
    }
    Ok(SimulationReport { steps, fields })
}

async fn transition(
    service: &WorkflowService<InMemoryStorage>,
    step: &TransitionStep,
    entity: &EntityRef,
    actor: &Actor,
    input: TransitionInput,
    now: OffsetDateTime,
) -> Result<(Submission, Vec<String>), WorkflowError> {
    let mut record = service
        .draft_transition(&step.workflow, &step.field, Some(entity), now)
        .await?;
    let applied = service.apply_input(&mut record, input, actor, now).await?;
    let submission = service.submit(&mut record, actor, now).await?;
    let warnings = applied.warnings.iter().map(ToString::to_string).collect();
    Ok((submission, warnings))
}

async fn field_view(
    service: &WorkflowService<InMemoryStorage>,
    workflow: &str,
    entity: &EntityRef,
    field: &str,
) -> Result<FieldView, WorkflowError> {
    let history = service.history_of(entity, field).await?;
    let pending = service.pending_schedule(entity, field).await?;
    Ok(FieldView {
        entity: entity.to_string(),
        field: field.to_string(),
        workflow: workflow.to_string(),
        state: service.current_state(workflow, entity, field).await?,
        history: history.into_iter().map(history_view).collect(),
        pending: pending.map(|p| PendingView {
            to: p.to_state().unwrap_or_default().to_string(),
            actor: p.actor_id().to_string(),
            at: format_time(p.timestamp()),
        }),
    })
}

fn history_view(entry: HistoryEntry) -> HistoryView {
    HistoryView {
        id: entry.id,
        from: entry.from_state,
        to: entry.to_state,
        actor: entry.actor_id,
        at: format_time(entry.timestamp),
        comment: entry.comment,
        forced: entry.forced,
        corrects: match entry.kind {
            EntryKind::Transition => None,
            EntryKind::CommentCorrection { corrects } => Some(corrects),
        },
    }
}

fn format_time(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.unix_timestamp().to_string())
}

fn print_text(report: &SimulationReport) {
    println!("Steps:");
    for s in &report.steps {
        println!(
            "  {:>3}. {:<8} {:<9} {}  {}",
            s.step, s.action, s.result, s.at, s.detail
        );
        for w in &s.warnings {
            println!("       warning: {}", w);
        }
    }
    for f in &report.fields {
        println!();
        println!("{}#{} [{}]: {}", f.entity, f.field, f.workflow, f.state);
        for h in &f.history {
            let from = h.from.as_deref().unwrap_or("(none)");
            match h.corrects {
                Some(id) => println!(
                    "  #{} {} {} corrects #{}: {}",
                    h.id, h.at, h.actor, id, h.comment
                ),
                None => println!(
                    "  #{} {} {} {} -> {}{}{}",
                    h.id,
                    h.at,
                    h.actor,
                    from,
                    h.to,
                    if h.forced { " (forced)" } else { "" },
                    if h.comment.is_empty() {
                        String::new()
                    } else {
                        format!(": {}", h.comment)
                    }
                ),
            }
        }
        if let Some(p) = &f.pending {
            println!("  pending: -> {} at {} by {}", p.to, p.at, p.actor);
        }
    }
}
