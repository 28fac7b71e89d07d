//! Tracing setup for the `workflow` binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "workflow_core=info,workflow_cli=info";

/// Install a stderr subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `--verbose` lowers the level to debug
/// and `--quiet` raises it to warnings only.
pub(crate) fn init_logging(verbose: bool, quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("workflow_core=debug,workflow_cli=debug")
        } else if quiet {
            EnvFilter::new("warn")
        } else {
            EnvFilter::new(DEFAULT_LOG_FILTER)
        }
    });

    // Ignore a second install; only the first subscriber takes effect.
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(filter),
        )
        .try_init();
}
