//! Prometheus metrics for engine runs.
//!
//! Every label value comes from a closed set (phase names, outcomes, event
//! levels). Module names are user-supplied and never become labels; they
//! are reported through module status instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::engine::{EngineState, Phase};
use crate::error::Error;
use crate::observability::events::EventLevel;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Installs the global Prometheus recorder.
///
/// With `Some(port)` an HTTP scrape endpoint is served on
/// `127.0.0.1:<port>`; with `None` the recorder is installed without one.
/// Calling this again is a no-op.
///
/// # Errors
///
/// Returns [`Error::Io`] if the recorder or listener cannot be installed
/// (e.g. the port is taken).
pub fn init_metrics(port: Option<u16>) -> Result<(), Error> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!("phaseflow_runs_total", "Engine runs by outcome");
    describe_histogram!("phaseflow_run_duration_ms", "Engine run duration in milliseconds");
    describe_counter!(
        "phaseflow_phase_executions_total",
        "Phase executions by phase and outcome"
    );
    describe_histogram!(
        "phaseflow_phase_duration_ms",
        "Phase duration in milliseconds"
    );
    describe_counter!(
        "phaseflow_module_attempts_total",
        "Module run attempts by phase and outcome"
    );
    describe_counter!("phaseflow_module_retries_total", "Module retries by phase");
    describe_counter!("phaseflow_events_total", "Events emitted by level");
    describe_gauge!(
        "phaseflow_engine_state",
        "Engine state code (0 uninitialized .. 5 error)"
    );
}

/// Records a finished `start()` run.
pub fn record_run(success: bool, duration: Duration) {
    let outcome = if success { "success" } else { "failure" };
    counter!("phaseflow_runs_total", "outcome" => outcome).increment(1);
    histogram!("phaseflow_run_duration_ms").record(duration.as_secs_f64() * 1000.0);
}

/// Records one phase execution.
pub fn record_phase_execution(phase: Phase, success: bool, duration: Duration) {
    let outcome = if success { "success" } else { "failure" };
    counter!(
        "phaseflow_phase_executions_total",
        "phase" => phase.as_str(),
        "outcome" => outcome,
    )
    .increment(1);
    histogram!("phaseflow_phase_duration_ms", "phase" => phase.as_str())
        .record(duration.as_secs_f64() * 1000.0);
}

/// Records one module attempt. `outcome` is `success`, `failure` or
/// `timeout`.
pub fn record_module_attempt(phase: Phase, outcome: &'static str) {
    counter!(
        "phaseflow_module_attempts_total",
        "phase" => phase.as_str(),
        "outcome" => outcome,
    )
    .increment(1);
}

/// Records a scheduled retry.
pub fn record_module_retry(phase: Phase) {
    counter!("phaseflow_module_retries_total", "phase" => phase.as_str()).increment(1);
}

/// Counts an emitted event.
pub fn record_event(level: EventLevel) {
    counter!("phaseflow_events_total", "level" => level.as_str()).increment(1);
}

/// Publishes the engine state code.
pub fn set_engine_state(state: EngineState) {
    gauge!("phaseflow_engine_state").set(f64::from(state.code()));
}
