pub(crate) mod check;
pub(crate) mod simulate;
pub(crate) mod states;

use std::path::Path;
use std::process;

use workflow_core::StateRegistry;

use crate::{report_error, OutputFormat};

/// Load and validate a workflow file, or report the error and exit 1.
pub(crate) fn load_registry(config: &Path, output: OutputFormat, quiet: bool) -> StateRegistry {
    match StateRegistry::load(config) {
        Ok(registry) => registry,
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    }
}
