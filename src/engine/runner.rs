//! Runs every module registered for one phase, in registration order.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::time::Instant;
use tracing::warn;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::observability::events::{EventBuilder, EventLevel, kinds};

use super::bus::EventBus;
use super::context::{Context, RecordedError};
use super::executor::ModuleExecutor;
use super::module::ModuleSlot;
use super::phase::Phase;

/// What a phase run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PhaseReport {
    pub modules_run: usize,
    pub modules_failed: usize,
    pub duration: Duration,
}

pub(crate) struct PhaseRunner<'a> {
    bus: &'a EventBus,
    executor: ModuleExecutor<'a>,
    continue_on_error: bool,
}

impl<'a> PhaseRunner<'a> {
    pub(crate) fn new(config: &EngineConfig, bus: &'a EventBus) -> Self {
        Self {
            bus,
            executor: ModuleExecutor::new(config, bus),
            continue_on_error: config.continue_on_error,
        }
    }

    /// Runs the phase's modules strictly one after another.
    ///
    /// # Errors
    ///
    /// With `continue_on_error` off, the first module failure ends the phase
    /// and is returned wrapped in [`EngineError::Phase`]. With it on, module
    /// failures are recorded and counted in the report instead.
    pub(crate) async fn run(
        &self,
        phase: Phase,
        slots: &mut [ModuleSlot],
        ctx: &mut Context,
    ) -> Result<PhaseReport, EngineError> {
        let started = Instant::now();
        let mut report = PhaseReport {
            modules_run: 0,
            modules_failed: 0,
            duration: Duration::ZERO,
        };

        for slot in slots.iter_mut() {
            report.modules_run += 1;
            let result = match self.executor.setup(slot, ctx).await {
                Ok(()) => self.executor.execute(slot, ctx).await.map(|_| ()),
                Err(err) => Err(err),
            };

            let Err(err) = result else {
                continue;
            };
            report.modules_failed += 1;
            self.record_failure(phase, slot.name(), &err, ctx).await;

            if !self.continue_on_error {
                return Err(EngineError::Phase {
                    phase,
                    source: Box::new(err),
                });
            }
            warn!(%phase, module = slot.name(), "continuing after module failure");
        }

        report.duration = started.elapsed();
        Ok(report)
    }

    async fn record_failure(&self, phase: Phase, module: &str, err: &EngineError, ctx: &Context) {
        ctx.record_error(RecordedError {
            phase,
            module: module.to_string(),
            kind: err.kind(),
            message: err.to_string(),
            timestamp: Utc::now(),
        });

        self.bus
            .emit(
                EventBuilder::new(kinds::PHASE_ERROR, "Phase error", EventLevel::Error)
                    .phase(phase)
                    .source(module)
                    .description(format!("module '{module}' failed in {phase}: {err}"))
                    .payload(json!({
                        "module": module,
                        "kind": err.kind(),
                        "error": err.to_string(),
                        "continue_on_error": self.continue_on_error,
                    })),
            )
            .await;
        self.bus.notify_error(err, phase).await;
    }
}
