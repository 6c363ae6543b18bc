//! The lifecycle engine.
//!
//! [`LifecycleEngine`] owns the module registry, the shared context and the
//! statistics, and drives the fixed phase sequence. Control that has to
//! reach a run in flight (pause, resume, stop, state queries) goes through
//! a clonable [`EngineHandle`]; the engine state lives in a
//! [`tokio::sync::watch`] channel shared by both.
//!
//! Pause and stop are honoured at phase boundaries. A phase that has
//! started always runs to completion.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use serde_json::json;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{ConfigError, EngineError};
use crate::observability::events::{Event, EventBuilder, EventLevel, kinds};
use crate::observability::metrics;

use super::bus::{EventBus, EventListener, ListenerId, ObserverId};
use super::context::Context;
use super::executor::ModuleExecutor;
use super::module::{Module, ModuleRegistry, ModuleStatus};
use super::observer::{ObserverHook, PhaseObserver};
use super::phase::{EngineState, Phase};
use super::runner::{PhaseReport, PhaseRunner};
use super::stats::EngineStats;

// ============================================================================
// Run summary
// ============================================================================

fn serialize_ms<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
}

/// Outcome of one successful [`LifecycleEngine::start`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Identifier of the context the run used
    pub run_id: Uuid,
    /// Phases that ran to completion
    pub phases_completed: usize,
    /// Phases in which at least one module failed
    pub phases_failed: usize,
    /// Module failures across the run
    pub modules_failed: usize,
    /// Wall time of the run
    #[serde(rename = "duration_ms", serialize_with = "serialize_ms")]
    pub duration: Duration,
    /// `stop()` ended the run before every phase ran
    pub stopped_early: bool,
}

impl RunSummary {
    const fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            phases_completed: 0,
            phases_failed: 0,
            modules_failed: 0,
            duration: Duration::ZERO,
            stopped_early: false,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {} {} in {}ms: {} phase(s) completed, {} with failures, {} module failure(s)",
            self.run_id,
            if self.stopped_early { "stopped" } else { "finished" },
            self.duration.as_millis(),
            self.phases_completed,
            self.phases_failed,
            self.modules_failed,
        )
    }
}

// ============================================================================
// Shared state and handle
// ============================================================================

#[derive(Debug)]
struct Shared {
    state: watch::Sender<EngineState>,
    bus: EventBus,
}

impl Shared {
    fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    fn set_state(&self, next: EngineState) {
        self.state.send_replace(next);
        metrics::set_engine_state(next);
    }

    /// Moves to `to` only if the current state is one of `from`.
    fn transition(&self, from: &[EngineState], to: EngineState) -> Option<EngineState> {
        let mut previous = None;
        self.state.send_if_modified(|state| {
            if from.contains(state) {
                previous = Some(*state);
                *state = to;
                true
            } else {
                false
            }
        });
        if previous.is_some() {
            metrics::set_engine_state(to);
        }
        previous
    }

    async fn pause(&self) -> bool {
        if self
            .transition(&[EngineState::Running], EngineState::Paused)
            .is_none()
        {
            debug!(state = %self.state(), "pause ignored");
            return false;
        }
        self.bus
            .emit(
                EventBuilder::new(kinds::ENGINE_PAUSED, "Engine paused", EventLevel::Info)
                    .description("engine paused; the run halts at the next phase boundary"),
            )
            .await;
        true
    }

    async fn resume(&self) -> bool {
        if self
            .transition(&[EngineState::Paused], EngineState::Running)
            .is_none()
        {
            debug!(state = %self.state(), "resume ignored");
            return false;
        }
        self.bus
            .emit(
                EventBuilder::new(kinds::ENGINE_RESUMED, "Engine resumed", EventLevel::Info)
                    .description("engine resumed"),
            )
            .await;
        true
    }

    async fn stop(&self) -> bool {
        let from = [
            EngineState::Uninitialized,
            EngineState::Preparing,
            EngineState::Running,
            EngineState::Paused,
            EngineState::Error,
        ];
        let Some(previous) = self.transition(&from, EngineState::Stopped) else {
            debug!("stop ignored; engine already stopped");
            return false;
        };
        self.bus
            .emit(
                EventBuilder::new(kinds::ENGINE_STOPPED, "Engine stopped", EventLevel::Info)
                    .description(format!("engine stopped from {previous}"))
                    .payload(json!({ "previous_state": previous.as_str() })),
            )
            .await;
        true
    }

    /// Waits at a phase boundary while paused.
    ///
    /// Returns `false` once the run should end.
    async fn phase_boundary(&self) -> bool {
        let mut rx = self.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                EngineState::Running => return true,
                EngineState::Paused => {
                    debug!("run paused at phase boundary");
                    if rx.changed().await.is_err() {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

/// Clonable control surface for a [`LifecycleEngine`].
///
/// Handles stay valid for the engine's whole life and may be used from
/// other tasks or from inside a module while a run is in flight.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    /// Current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    /// `Running → Paused`. The run halts before the next phase.
    ///
    /// Returns `false` (and emits nothing) unless the engine was running.
    pub async fn pause(&self) -> bool {
        self.shared.pause().await
    }

    /// `Paused → Running`.
    ///
    /// Returns `false` (and emits nothing) unless the engine was paused.
    pub async fn resume(&self) -> bool {
        self.shared.resume().await
    }

    /// Any state `→ Stopped`. A run in flight ends at the next phase
    /// boundary.
    ///
    /// Returns `false` if the engine was already stopped.
    pub async fn stop(&self) -> bool {
        self.shared.stop().await
    }

    /// Resolves once the engine enters `target`.
    pub async fn wait_for_state(&self, target: EngineState) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|state| *state == target).await;
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.shared.state.subscribe()
    }

    /// Emits a custom event through the engine's bus.
    pub async fn emit(&self, draft: EventBuilder) -> Event {
        self.shared.bus.emit(draft).await
    }

    /// Most recent events, oldest first.
    #[must_use]
    pub fn event_history(&self, limit: Option<usize>) -> Vec<Event> {
        self.shared.bus.history(limit)
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Initialization {
    Pending,
    Succeeded,
    Failed,
}

/// Drives registered modules through the six phases.
///
/// ```
/// use phaseflow::config::EngineConfig;
/// use phaseflow::engine::{EngineState, LifecycleEngine};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut engine = LifecycleEngine::new(EngineConfig::default()).unwrap();
/// let summary = engine.start().await.unwrap();
/// assert_eq!(summary.phases_completed, 5);
/// assert_eq!(engine.state(), EngineState::Stopped);
/// # }
/// ```
#[derive(Debug)]
pub struct LifecycleEngine {
    config: EngineConfig,
    registry: ModuleRegistry,
    shared: Arc<Shared>,
    context: Option<Context>,
    stats: EngineStats,
    initialization: Initialization,
}

impl LifecycleEngine {
    /// Creates an engine in the `Uninitialized` state.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if `config` has invalid
    /// values.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.ensure_valid()?;
        let (state, _) = watch::channel(EngineState::Uninitialized);
        let bus = EventBus::new(&config);
        Ok(Self {
            config,
            registry: ModuleRegistry::default(),
            shared: Arc::new(Shared { state, bus }),
            context: None,
            stats: EngineStats::default(),
            initialization: Initialization::Pending,
        })
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns a control handle sharing this engine's state and bus.
    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn fresh_context(bus: &EventBus) -> Context {
        let ctx = Context::new();
        bus.attach(&ctx);
        ctx
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Registers `module` for `phase`.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidModule`] if the module is malformed, declares
    /// another phase, or reuses a registered name;
    /// [`EngineError::InvalidState`] while the engine is running.
    pub async fn register_module<M: Module + 'static>(
        &mut self,
        phase: Phase,
        module: M,
    ) -> Result<(), EngineError> {
        self.register_boxed(phase, Box::new(module)).await
    }

    /// Registers an already boxed module. See [`Self::register_module`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::register_module`].
    pub async fn register_boxed(
        &mut self,
        phase: Phase,
        module: Box<dyn Module>,
    ) -> Result<(), EngineError> {
        let state = self.state();
        if matches!(state, EngineState::Preparing | EngineState::Running) {
            return Err(EngineError::invalid_state("register module", state));
        }

        let name = module.name().to_string();
        let version = module.version().to_string();
        self.registry.register(phase, module)?;

        self.shared
            .bus
            .emit(
                EventBuilder::new(kinds::MODULE_REGISTERED, "Module registered", EventLevel::Debug)
                    .phase(phase)
                    .source(name.as_str())
                    .description(format!("registered {name}@{version} for {phase}"))
                    .payload(json!({
                        "version": version,
                        "position": self.registry.count(phase),
                    })),
            )
            .await;
        Ok(())
    }

    /// Adds an event listener.
    pub fn add_event_listener(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        self.shared.bus.add_listener(listener)
    }

    /// Removes an event listener. Returns `false` if it was not registered.
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.shared.bus.remove_listener(id)
    }

    /// Adds a phase observer.
    pub fn add_observer(&self, observer: Arc<dyn PhaseObserver>) -> ObserverId {
        self.shared.bus.add_observer(observer)
    }

    /// Removes a phase observer. Returns `false` if it was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.shared.bus.remove_observer(id)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Runs the initialization phase.
    ///
    /// Valid once per engine, from `Uninitialized` or from a `Stopped`
    /// engine that was never initialized. Moves through `Preparing` to
    /// `Stopped` on success, or to `Error` on failure.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidState`] if initialization already ran, or the
    /// phase error if an initialization module failed.
    pub async fn initialize(&mut self) -> Result<(), EngineError> {
        let state = self.state();
        let ready = matches!(state, EngineState::Uninitialized | EngineState::Stopped);
        if self.initialization != Initialization::Pending || !ready {
            return Err(EngineError::invalid_state("initialize", state));
        }

        self.shared.set_state(EngineState::Preparing);
        self.ensure_context();
        self.shared
            .bus
            .emit(
                EventBuilder::new(
                    kinds::ENGINE_INITIALIZING,
                    "Engine initializing",
                    EventLevel::Info,
                )
                .description(format!(
                    "initializing with {} registered module(s)",
                    self.registry.len()
                )),
            )
            .await;

        match self.execute_phase(Phase::Initialization).await {
            Ok(_) => {
                self.initialization = Initialization::Succeeded;
                self.shared.set_state(EngineState::Stopped);
                self.shared
                    .bus
                    .emit(
                        EventBuilder::new(
                            kinds::ENGINE_INITIALIZED,
                            "Engine initialized",
                            EventLevel::Info,
                        )
                        .phase(Phase::Initialization)
                        .description("initialization complete"),
                    )
                    .await;
                Ok(())
            }
            Err(err) => {
                self.initialization = Initialization::Failed;
                Err(self.fail(err, Phase::Initialization).await)
            }
        }
    }

    /// Runs preparation through cleanup once.
    ///
    /// Initializes first if that has not happened. Valid from `Stopped` or
    /// `Paused`; the context created at initialization is reused, so values
    /// written by earlier runs stay visible.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidState`] from any other state, or the first
    /// phase error when `continue_on_error` is off. The engine is then in
    /// the `Error` state; `stop()` followed by `start()` runs again.
    pub async fn start(&mut self) -> Result<RunSummary, EngineError> {
        let run_started = Instant::now();

        if self.initialization == Initialization::Pending {
            if let Err(err) = self.initialize().await {
                if !matches!(err, EngineError::InvalidState { .. }) {
                    self.finish_run(run_started.elapsed(), false);
                }
                return Err(err);
            }
        }
        if self.initialization == Initialization::Failed {
            return Err(EngineError::InvalidState {
                operation: "start",
                subject: "engine".to_string(),
                state: format!("{} after failed initialization", self.state()),
            });
        }

        let state = self.state();
        if !matches!(state, EngineState::Stopped | EngineState::Paused) {
            return Err(EngineError::invalid_state("start", state));
        }

        self.shared.set_state(EngineState::Running);
        let run_id = self.ensure_context().run_id();
        let run_number = self.stats.global.total_executions + 1;
        self.shared
            .bus
            .emit(
                EventBuilder::new(kinds::ENGINE_STARTED, "Engine started", EventLevel::Info)
                    .description(format!("run {run_number} started"))
                    .payload(json!({ "run_id": run_id, "run": run_number })),
            )
            .await;

        let mut summary = RunSummary::new(run_id);
        for phase in Phase::RUN_SEQUENCE {
            if !self.shared.phase_boundary().await {
                info!(%phase, "run stopped before phase");
                summary.stopped_early = true;
                break;
            }

            match self.execute_phase(phase).await {
                Ok(report) => {
                    summary.phases_completed += 1;
                    summary.modules_failed += report.modules_failed;
                    if report.modules_failed > 0 {
                        summary.phases_failed += 1;
                    }
                }
                // `continue_on_error` failures come back inside the report.
                Err(err) => {
                    self.finish_run(run_started.elapsed(), false);
                    return Err(self.fail(err, phase).await);
                }
            }
        }

        summary.duration = run_started.elapsed();
        self.finish_run(summary.duration, true);
        self.shared.transition(
            &[EngineState::Running, EngineState::Paused],
            EngineState::Stopped,
        );

        let description = summary.to_string();
        self.shared
            .bus
            .emit(
                EventBuilder::new(kinds::ENGINE_COMPLETED, "Engine completed", EventLevel::Info)
                    .description(description)
                    .payload(serde_json::to_value(&summary).unwrap_or_default())
                    .duration(summary.duration),
            )
            .await;
        Ok(summary)
    }

    /// See [`EngineHandle::pause`].
    pub async fn pause(&self) -> bool {
        self.shared.pause().await
    }

    /// See [`EngineHandle::resume`].
    pub async fn resume(&self) -> bool {
        self.shared.resume().await
    }

    /// See [`EngineHandle::stop`].
    pub async fn stop(&self) -> bool {
        self.shared.stop().await
    }

    /// Stops the engine and tears down every module that was set up,
    /// last registered first.
    ///
    /// Torn-down modules cannot run again.
    ///
    /// # Errors
    ///
    /// Returns the first teardown failure after attempting all of them.
    pub async fn shutdown(&mut self) -> Result<(), EngineError> {
        self.shared.stop().await;

        let Self {
            config,
            registry,
            shared,
            context,
            ..
        } = self;
        let bus = &shared.bus;
        let ctx = context.get_or_insert_with(|| Self::fresh_context(bus));
        let executor = ModuleExecutor::new(config, bus);

        let mut torn_down = 0_usize;
        let mut first_error = None;
        for slot in registry.iter_mut().rev() {
            match executor.teardown(slot, ctx).await {
                Ok(true) => torn_down += 1,
                Ok(false) => {}
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        info!(torn_down, "engine shut down");

        first_error.map_or(Ok(()), Err)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ensure_context(&mut self) -> &mut Context {
        let bus = &self.shared.bus;
        self.context.get_or_insert_with(|| Self::fresh_context(bus))
    }

    fn finish_run(&mut self, duration: Duration, success: bool) {
        self.stats.record_run(duration, success);
        metrics::record_run(success, duration);
    }

    /// Enters the error state and reports `err`, returning it.
    async fn fail(&self, err: EngineError, phase: Phase) -> EngineError {
        self.shared.set_state(EngineState::Error);
        self.shared
            .bus
            .emit(
                EventBuilder::new(kinds::ENGINE_FAILED, "Engine failed", EventLevel::Critical)
                    .phase(phase)
                    .description(format!("engine failed in {phase}: {err}"))
                    .payload(json!({ "kind": err.kind(), "error": err.to_string() })),
            )
            .await;
        err
    }

    async fn execute_phase(&mut self, phase: Phase) -> Result<PhaseReport, EngineError> {
        let Self {
            config,
            registry,
            shared,
            context,
            stats,
            ..
        } = self;
        let bus = &shared.bus;
        let ctx = context.get_or_insert_with(|| Self::fresh_context(bus));

        let previous = ctx.current_phase();
        ctx.enter_phase(phase);
        bus.emit(
            EventBuilder::new(kinds::PHASE_START, "Phase started", EventLevel::Info)
                .phase(phase)
                .description(format!("entering {phase}"))
                .payload(json!({
                    "modules": registry.count(phase),
                    "previous_phase": previous,
                })),
        )
        .await;
        bus.notify_hook(ObserverHook::start(phase), ctx).await;

        let started = Instant::now();
        let result = PhaseRunner::new(config, bus)
            .run(phase, registry.phase_mut(phase), ctx)
            .await;
        let elapsed = started.elapsed();

        if let Ok(report) = &result {
            bus.emit(
                EventBuilder::new(kinds::PHASE_COMPLETE, "Phase complete", EventLevel::Info)
                    .phase(phase)
                    .description(format!("{phase} complete"))
                    .payload(json!({
                        "modules_run": report.modules_run,
                        "modules_failed": report.modules_failed,
                    }))
                    .duration(report.duration),
            )
            .await;
            bus.notify_hook(ObserverHook::complete(phase), ctx).await;
        }

        let success = matches!(&result, Ok(report) if report.modules_failed == 0);
        stats.record_phase(phase, elapsed, success);
        metrics::record_phase_execution(phase, success, elapsed);
        result
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    /// Phase most recently entered, if any.
    #[must_use]
    pub fn current_phase(&self) -> Option<Phase> {
        self.context.as_ref().and_then(Context::current_phase)
    }

    /// Run and phase statistics.
    #[must_use]
    pub const fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Up to `limit` most recent events, oldest first.
    #[must_use]
    pub fn event_history(&self, limit: Option<usize>) -> Vec<Event> {
        self.shared.bus.history(limit)
    }

    /// The shared context, once initialization or a run created it.
    #[must_use]
    pub const fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    /// The shared context, created if needed. Useful for seeding values
    /// before the first run.
    pub fn context_mut(&mut self) -> &mut Context {
        self.ensure_context()
    }

    /// Status of the module registered as `name`.
    #[must_use]
    pub fn module_status(&self, name: &str) -> Option<ModuleStatus> {
        self.registry.find(name).map(super::module::ModuleSlot::status)
    }

    /// Status of every module, phase order then registration order.
    #[must_use]
    pub fn module_statuses(&self) -> Vec<ModuleStatus> {
        self.registry.iter().map(super::module::ModuleSlot::status).collect()
    }
}
