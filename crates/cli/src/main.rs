mod commands;
mod logging;
mod scenario;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Workflow definition checker and scenario runner.
#[derive(Parser)]
#[command(name = "workflow", version, about = "Workflow definition checker and scenario runner")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Log engine activity at debug level
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow file and summarize its workflows
    Check {
        /// Path to the workflow TOML file
        config: PathBuf,
    },

    /// List the states, transitions, and settings of one workflow
    States {
        /// Path to the workflow TOML file
        config: PathBuf,
        /// Workflow id
        workflow: String,
    },

    /// Replay a scenario against an in-memory store
    Simulate {
        /// Path to the workflow TOML file
        config: PathBuf,
        /// Path to the scenario TOML file
        scenario: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Check { config } => {
            commands::check::cmd_check(&config, cli.output, cli.quiet);
        }
        Commands::States { config, workflow } => {
            commands::states::cmd_states(&config, &workflow, cli.output, cli.quiet);
        }
        Commands::Simulate { config, scenario } => {
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    report_error(&format!("failed to start runtime: {}", e), cli.output, cli.quiet);
                    process::exit(1);
                }
            };
            rt.block_on(commands::simulate::cmd_simulate(
                &config,
                &scenario,
                cli.output,
                cli.quiet,
            ));
        }
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
