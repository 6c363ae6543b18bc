//! `phaseflow` - phase-driven lifecycle orchestration engine

use clap::Parser;
use tokio_util::sync::CancellationToken;

use phaseflow::cli::args::Cli;
use phaseflow::cli::commands;
use phaseflow::error::ExitCode;
use phaseflow::observability::LogSettings;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LogSettings::from_cli(&cli).init();

    // First Ctrl+C stops the engine at the next phase boundary; the second
    // exits immediately.
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            eprintln!("\nStopping at the next phase boundary... (press Ctrl+C again to force)");
            cancel.cancel();

            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(ExitCode::INTERRUPTED);
            }
        }
    });

    let result = commands::dispatch(cli, cancel.clone()).await;

    match result {
        Ok(()) if cancel.is_cancelled() => std::process::exit(ExitCode::INTERRUPTED),
        Ok(()) => std::process::exit(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
