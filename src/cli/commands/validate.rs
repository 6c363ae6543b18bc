//! `phaseflow validate`: load scenario files and report issues.

use crate::cli::args::ValidateArgs;
use crate::config::load_scenario;
use crate::error::Error;

/// Validates every file, stopping at the first invalid one.
///
/// # Errors
///
/// Returns the first file's load or validation error.
pub fn validate(args: &ValidateArgs, quiet: bool) -> Result<(), Error> {
    for path in &args.files {
        tracing::info!(file = %path.display(), "validating scenario");
        let loaded = load_scenario(path)?;

        for warning in &loaded.warnings {
            tracing::warn!(location = %warning.path, "{}", warning.message);
        }
        if !quiet {
            println!(
                "{}: ok ({} module(s), {} warning(s))",
                path.display(),
                loaded.scenario.modules.len(),
                loaded.warnings.len()
            );
        }
    }
    Ok(())
}
