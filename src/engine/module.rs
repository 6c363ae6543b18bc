//! Module contract, module lifecycle and the module registry.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{EngineError, ModuleError};

use super::context::Context;
use super::phase::Phase;

// ============================================================================
// Module trait
// ============================================================================

/// A named, versioned unit of work bound to one phase.
///
/// `setup` runs once per engine lifetime before the first `run`; `run` runs
/// once per phase execution (plus retries); `teardown` runs when the engine
/// is shut down.
#[allow(unused_variables)]
#[async_trait]
pub trait Module: Send + Sync {
    /// Unique module name.
    fn name(&self) -> &str;

    /// Module version string.
    fn version(&self) -> &str;

    /// Phase this module belongs to.
    fn phase(&self) -> Phase;

    /// Per-attempt timeout overriding `phase_timeout_ms`.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// One-time preparation.
    async fn setup(&mut self, ctx: &mut Context) -> Result<(), ModuleError> {
        Ok(())
    }

    /// The unit of work.
    async fn run(&mut self, ctx: &mut Context) -> Result<(), ModuleError>;

    /// Releases whatever `setup` acquired.
    async fn teardown(&mut self, ctx: &mut Context) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Module-specific statistics reported through [`ModuleStatus::stats`].
    fn stats(&self) -> Value {
        Value::Null
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Per-module lifecycle.
///
/// `Unset → Ready` when setup succeeds, `Ready → TornDown` on teardown.
/// Nothing leaves `TornDown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleLifecycle {
    /// Setup has not succeeded yet
    Unset,
    /// Setup succeeded; the module may run
    Ready,
    /// Teardown ran; the module is retired
    TornDown,
}

impl ModuleLifecycle {
    /// Validates and performs a transition.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] for any transition other than
    /// `Unset → Ready` or `Ready → TornDown`.
    pub fn transition(self, to: Self, module: &str) -> Result<Self, EngineError> {
        match (self, to) {
            (Self::Unset, Self::Ready) | (Self::Ready, Self::TornDown) => Ok(to),
            (_, Self::Ready) => Err(EngineError::invalid_module_state("set up", module, self)),
            (_, Self::TornDown) => Err(EngineError::invalid_module_state("tear down", module, self)),
            (_, Self::Unset) => Err(EngineError::invalid_module_state("reset", module, self)),
        }
    }
}

impl fmt::Display for ModuleLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unset => "unset",
            Self::Ready => "ready",
            Self::TornDown => "torn_down",
        })
    }
}

// ============================================================================
// Status
// ============================================================================

/// Outcome of the most recent run of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModuleOutcome {
    /// The last run succeeded (possibly after retries)
    Success {
        /// Attempts used
        attempts: u32,
    },
    /// The last run exhausted its attempts, or setup failed
    Failed {
        /// Attempts used
        attempts: u32,
        /// Final error message
        message: String,
    },
}

/// Point-in-time view of one registered module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleStatus {
    /// Module name
    pub name: String,
    /// Module version
    pub version: String,
    /// Phase the module is bound to
    pub phase: Phase,
    /// Lifecycle state
    pub lifecycle: ModuleLifecycle,
    /// Whether an attempt is in flight
    pub running: bool,
    /// Outcome of the last run
    pub last_result: Option<ModuleOutcome>,
    /// Completed runs (success or final failure)
    pub execution_count: u64,
    /// Executor counters plus the module's own `stats()`
    pub stats: Value,
}

// ============================================================================
// Slot
// ============================================================================

/// A registered module plus the bookkeeping the engine keeps for it.
pub(crate) struct ModuleSlot {
    pub(crate) module: Box<dyn Module>,
    pub(crate) lifecycle: ModuleLifecycle,
    pub(crate) running: bool,
    pub(crate) last_result: Option<ModuleOutcome>,
    pub(crate) execution_count: u64,
    pub(crate) attempts: u64,
    pub(crate) timeouts: u64,
    pub(crate) failures: u64,
    pub(crate) total_duration: Duration,
}

impl ModuleSlot {
    fn new(module: Box<dyn Module>) -> Self {
        Self {
            module,
            lifecycle: ModuleLifecycle::Unset,
            running: false,
            last_result: None,
            execution_count: 0,
            attempts: 0,
            timeouts: 0,
            failures: 0,
            total_duration: Duration::ZERO,
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.module.name()
    }

    pub(crate) fn status(&self) -> ModuleStatus {
        ModuleStatus {
            name: self.module.name().to_string(),
            version: self.module.version().to_string(),
            phase: self.module.phase(),
            lifecycle: self.lifecycle,
            running: self.running,
            last_result: self.last_result.clone(),
            execution_count: self.execution_count,
            stats: json!({
                "attempts": self.attempts,
                "timeouts": self.timeouts,
                "failures": self.failures,
                "total_duration_ms": self.total_duration.as_secs_f64() * 1000.0,
                "module": self.module.stats(),
            }),
        }
    }
}

impl fmt::Debug for ModuleSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSlot")
            .field("name", &self.module.name())
            .field("lifecycle", &self.lifecycle)
            .field("execution_count", &self.execution_count)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Modules grouped by phase, each group in registration order.
#[derive(Debug, Default)]
pub(crate) struct ModuleRegistry {
    phases: [Vec<ModuleSlot>; 6],
}

impl ModuleRegistry {
    /// Validates and appends `module` to `phase`.
    pub(crate) fn register(
        &mut self,
        phase: Phase,
        module: Box<dyn Module>,
    ) -> Result<(), EngineError> {
        let name = module.name().to_string();
        let invalid = |reason: String| EngineError::InvalidModule {
            module: name.clone(),
            reason,
        };

        if name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if module.version().trim().is_empty() {
            return Err(invalid("version must not be empty".to_string()));
        }
        if module.phase() != phase {
            return Err(invalid(format!(
                "declares phase {} but was registered for {phase}",
                module.phase()
            )));
        }
        if self.find(&name).is_some() {
            return Err(invalid("a module with this name is already registered".to_string()));
        }

        self.phases[phase.index()].push(ModuleSlot::new(module));
        Ok(())
    }

    pub(crate) fn phase_mut(&mut self, phase: Phase) -> &mut [ModuleSlot] {
        &mut self.phases[phase.index()]
    }

    pub(crate) fn count(&self, phase: Phase) -> usize {
        self.phases[phase.index()].len()
    }

    pub(crate) fn len(&self) -> usize {
        self.phases.iter().map(Vec::len).sum()
    }

    /// All slots, phase order then registration order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &ModuleSlot> {
        self.phases.iter().flatten()
    }

    pub(crate) fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut ModuleSlot> {
        self.phases.iter_mut().flatten()
    }

    pub(crate) fn find(&self, name: &str) -> Option<&ModuleSlot> {
        self.iter().find(|slot| slot.name() == name)
    }
}
