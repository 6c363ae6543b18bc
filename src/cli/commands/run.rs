//! `phaseflow run`: load a scenario, register its modules and drive the
//! engine through the phase sequence.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::args::RunArgs;
use crate::config::load_scenario;
use crate::engine::{LifecycleEngine, Module, RunSummary};
use crate::error::{EngineError, Error};
use crate::modules::ScriptedModule;
use crate::observability::{JsonlSink, init_metrics};

/// Runs a scenario `args.runs` times, then tears the modules down.
///
/// Cancelling `cancel` stops the engine at the next phase boundary.
///
/// # Errors
///
/// Returns config errors from loading, I/O errors from the events file or
/// metrics listener, and the engine error of a failed run.
pub async fn run(args: &RunArgs, quiet: bool, cancel: CancellationToken) -> Result<(), Error> {
    let loaded = load_scenario(&args.config)?;
    for warning in &loaded.warnings {
        warn!(location = %warning.path, "{}", warning.message);
    }

    if args.metrics_port.is_some() {
        init_metrics(args.metrics_port)?;
    }

    let mut engine = LifecycleEngine::new(loaded.scenario.engine.clone())?;
    if let Some(path) = &args.events_file {
        let sink = if path == Path::new("-") {
            JsonlSink::stdout()
        } else {
            JsonlSink::from_file(path)?
        };
        engine.add_event_listener(Arc::new(sink));
    }

    for config in &loaded.scenario.modules {
        let module =
            ScriptedModule::from_config(config).map_err(|e| EngineError::InvalidModule {
                module: config.name.clone(),
                reason: e.to_string(),
            })?;
        engine.register_module(module.phase(), module).await?;
    }
    info!(
        config = %args.config.display(),
        modules = loaded.scenario.modules.len(),
        "scenario loaded"
    );

    let handle = engine.handle();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            cancel.cancelled().await;
            handle.stop().await;
        }
    });

    let outcome = run_sequence(&mut engine, args.runs, &cancel).await;
    watcher.abort();

    if let Err(err) = engine.shutdown().await {
        warn!(error = %err, "module teardown failed");
    }

    let summaries = outcome?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else if !quiet {
        for summary in &summaries {
            println!("{summary}");
        }
        for status in engine.module_statuses() {
            let result = match &status.last_result {
                Some(outcome) => serde_json::to_string(outcome)?,
                None => "not run".to_string(),
            };
            println!("  {:<24} {:<14} {result}", status.name, status.phase);
        }
    }
    Ok(())
}

/// Starts up to `runs` runs. No run starts once `cancel` has fired.
async fn run_sequence(
    engine: &mut LifecycleEngine,
    runs: u32,
    cancel: &CancellationToken,
) -> Result<Vec<RunSummary>, EngineError> {
    let mut summaries = Vec::new();
    for run in 1..=runs {
        if cancel.is_cancelled() {
            info!(run, "interrupted before run");
            break;
        }
        let summary = engine.start().await?;
        info!(run, %summary, "run finished");
        let stopped = summary.stopped_early;
        summaries.push(summary);
        if stopped {
            break;
        }
    }
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[tokio::test]
    async fn test_cancel_before_first_run_starts_nothing() {
        let mut engine = LifecycleEngine::new(EngineConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        engine.stop().await;

        let summaries = run_sequence(&mut engine, 3, &cancel).await.unwrap();
        assert!(summaries.is_empty());
        assert_eq!(engine.stats().global.total_executions, 0);
    }

    #[tokio::test]
    async fn test_runs_until_count() {
        let mut engine = LifecycleEngine::new(EngineConfig::default()).unwrap();
        let summaries = run_sequence(&mut engine, 2, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(engine.stats().global.successful_executions, 2);
    }
}
