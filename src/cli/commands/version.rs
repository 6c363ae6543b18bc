//! `phaseflow version`.

use serde_json::json;

use crate::cli::args::{OutputFormat, VersionArgs};
use crate::engine::Phase;

/// Prints the version and the phase order this build runs.
pub fn run(args: &VersionArgs) {
    let name = env!("CARGO_PKG_NAME");
    let version = env!("CARGO_PKG_VERSION");
    let phases: Vec<&str> = Phase::ALL.iter().map(|p| p.as_str()).collect();

    match args.format {
        OutputFormat::Human => {
            println!("{name} {version}");
            println!("phases: {}", phases.join(" -> "));
        }
        OutputFormat::Json => {
            println!(
                "{}",
                json!({ "name": name, "version": version, "phases": phases })
            );
        }
    }
}
