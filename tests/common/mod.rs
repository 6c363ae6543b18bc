//! Shared integration-test helpers: scripted test modules, an observer that
//! records hook calls, and a runner for the `phaseflow` binary.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use phaseflow::EngineConfig;
use phaseflow::engine::{Context, EngineHandle, Module, Phase, PhaseObserver};
use phaseflow::error::{EngineError, ModuleError};
use phaseflow::observability::{Event, EventLevel};

/// Shared, ordered record of which modules ran.
pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Engine config with no retries, no delay and a 1s timeout.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        phase_timeout_ms: 1_000,
        max_retries: 0,
        retry_delay_ms: 0,
        ..EngineConfig::default()
    }
}

/// Events of `kind`, optionally filtered by level.
pub fn events_of(history: &[Event], kind: &str, level: Option<EventLevel>) -> Vec<Event> {
    history
        .iter()
        .filter(|e| e.event_type == kind && level.is_none_or(|l| e.level == l))
        .cloned()
        .collect()
}

// ============================================================================
// Test modules
// ============================================================================

/// Appends its name to the log and writes `name → phase` into the context.
pub struct Recording {
    pub name: String,
    pub phase: Phase,
    pub log: Log,
}

impl Recording {
    pub fn new(name: &str, phase: Phase, log: &Log) -> Self {
        Self {
            name: name.to_string(),
            phase,
            log: Arc::clone(log),
        }
    }
}

#[async_trait]
impl Module for Recording {
    fn name(&self) -> &str {
        &self.name
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn phase(&self) -> Phase {
        self.phase
    }
    async fn run(&mut self, ctx: &mut Context) -> Result<(), ModuleError> {
        self.log.lock().unwrap().push(self.name.clone());
        ctx.set(self.name.clone(), self.phase.as_str());
        Ok(())
    }
}

/// Fails its first `failures` runs, then succeeds.
pub struct Flaky {
    pub name: String,
    pub phase: Phase,
    pub failures: u32,
    pub calls: Arc<AtomicU32>,
}

impl Flaky {
    pub fn new(name: &str, phase: Phase, failures: u32) -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                name: name.to_string(),
                phase,
                failures,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

#[async_trait]
impl Module for Flaky {
    fn name(&self) -> &str {
        &self.name
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn phase(&self) -> Phase {
        self.phase
    }
    async fn run(&mut self, _ctx: &mut Context) -> Result<(), ModuleError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(ModuleError::failed(format!("attempt {} failed", n + 1)))
        } else {
            Ok(())
        }
    }
}

/// Never finishes. A watcher task flips `cancelled` once the attempt's
/// cancellation token fires.
pub struct Hanging {
    pub name: String,
    pub phase: Phase,
    pub timeout: Option<Duration>,
    pub cancelled: Arc<AtomicBool>,
}

impl Hanging {
    pub fn new(name: &str, phase: Phase) -> (Self, Arc<AtomicBool>) {
        let cancelled = Arc::new(AtomicBool::new(false));
        (
            Self {
                name: name.to_string(),
                phase,
                timeout: None,
                cancelled: Arc::clone(&cancelled),
            },
            cancelled,
        )
    }
}

#[async_trait]
impl Module for Hanging {
    fn name(&self) -> &str {
        &self.name
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn phase(&self) -> Phase {
        self.phase
    }
    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
    async fn run(&mut self, ctx: &mut Context) -> Result<(), ModuleError> {
        let token = ctx.cancellation();
        let flag = Arc::clone(&self.cancelled);
        tokio::spawn(async move {
            token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Counts setup and teardown calls.
pub struct Tracked {
    pub name: String,
    pub phase: Phase,
    /// Makes every setup call fail
    pub fail_setup: bool,
    pub setups: Arc<AtomicU32>,
    pub teardowns: Arc<AtomicU32>,
}

impl Tracked {
    pub fn new(name: &str, phase: Phase) -> (Self, Arc<AtomicU32>, Arc<AtomicU32>) {
        let setups = Arc::new(AtomicU32::new(0));
        let teardowns = Arc::new(AtomicU32::new(0));
        (
            Self {
                name: name.to_string(),
                phase,
                fail_setup: false,
                setups: Arc::clone(&setups),
                teardowns: Arc::clone(&teardowns),
            },
            setups,
            teardowns,
        )
    }
}

#[async_trait]
impl Module for Tracked {
    fn name(&self) -> &str {
        &self.name
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn phase(&self) -> Phase {
        self.phase
    }
    async fn setup(&mut self, _ctx: &mut Context) -> Result<(), ModuleError> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        if self.fail_setup {
            return Err(ModuleError::failed("setup refused"));
        }
        Ok(())
    }
    async fn run(&mut self, _ctx: &mut Context) -> Result<(), ModuleError> {
        Ok(())
    }
    async fn teardown(&mut self, _ctx: &mut Context) -> Result<(), ModuleError> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Drives the engine through its handle from inside a run.
pub struct Controller {
    pub name: String,
    pub phase: Phase,
    pub handle: EngineHandle,
    pub action: ControlAction,
}

#[derive(Debug, Clone, Copy)]
pub enum ControlAction {
    /// pause, pause again, resume
    PauseResume,
    /// pause and leave the engine paused
    Pause,
    /// stop the engine
    Stop,
}

#[async_trait]
impl Module for Controller {
    fn name(&self) -> &str {
        &self.name
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn phase(&self) -> Phase {
        self.phase
    }
    async fn run(&mut self, ctx: &mut Context) -> Result<(), ModuleError> {
        match self.action {
            ControlAction::PauseResume => {
                let first = self.handle.pause().await;
                let second = self.handle.pause().await;
                let resumed = self.handle.resume().await;
                ctx.set("control", serde_json::json!([first, second, resumed]));
            }
            ControlAction::Pause => {
                self.handle.pause().await;
            }
            ControlAction::Stop => {
                self.handle.stop().await;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Observer
// ============================================================================

/// Records every hook call as `"<hook>"` or `"error:<phase>:<kind>"`.
#[derive(Default)]
pub struct HookRecorder {
    pub calls: Mutex<Vec<String>>,
}

impl HookRecorder {
    fn push(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PhaseObserver for HookRecorder {
    async fn on_initialization_start(&self, _ctx: &Context) {
        self.push("on_initialization_start");
    }
    async fn on_initialization_complete(&self, _ctx: &Context) {
        self.push("on_initialization_complete");
    }
    async fn on_preparation_start(&self, _ctx: &Context) {
        self.push("on_preparation_start");
    }
    async fn on_preparation_complete(&self, _ctx: &Context) {
        self.push("on_preparation_complete");
    }
    async fn on_validation_start(&self, _ctx: &Context) {
        self.push("on_validation_start");
    }
    async fn on_validation_complete(&self, _ctx: &Context) {
        self.push("on_validation_complete");
    }
    async fn on_execution_start(&self, _ctx: &Context) {
        self.push("on_execution_start");
    }
    async fn on_execution_complete(&self, _ctx: &Context) {
        self.push("on_execution_complete");
    }
    async fn on_monitoring_start(&self, _ctx: &Context) {
        self.push("on_monitoring_start");
    }
    async fn on_monitoring_complete(&self, _ctx: &Context) {
        self.push("on_monitoring_complete");
    }
    async fn on_cleanup_start(&self, _ctx: &Context) {
        self.push("on_cleanup_start");
    }
    async fn on_cleanup_complete(&self, _ctx: &Context) {
        self.push("on_cleanup_complete");
    }
    async fn on_error(&self, error: &EngineError, phase: Phase) {
        self.push(format!("error:{phase}:{}", error.kind()));
    }
}

// ============================================================================
// Binary
// ============================================================================

/// Path to a file under `tests/fixtures/`.
pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Runs the `phaseflow` binary to completion.
pub fn run_cli(args: &[&str]) -> Output {
    std::process::Command::new(env!("CARGO_BIN_EXE_phaseflow"))
        .args(args)
        .env_remove("PHASEFLOW_LOG_LEVEL")
        .env_remove("PHASEFLOW_CONFIG")
        .env_remove("PHASEFLOW_METRICS_PORT")
        .env_remove("PHASEFLOW_LOG_FORMAT")
        .output()
        .expect("failed to spawn phaseflow")
}
