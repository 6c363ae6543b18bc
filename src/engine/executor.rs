//! Module executor: per-attempt timeout with bounded retry.
//!
//! Each attempt races the module future against a deadline with
//! [`tokio::time::timeout`]. When the deadline wins, the attempt future is
//! dropped at its current await point and the attempt's cancellation token
//! is cancelled. Anything the module spawned outside that future keeps
//! running until it observes the token; the executor never preempts it.

use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::observability::events::{EventBuilder, EventLevel, kinds};
use crate::observability::metrics;

use super::bus::EventBus;
use super::context::Context;
use super::module::{ModuleLifecycle, ModuleOutcome, ModuleSlot};
use super::phase::ModuleStage;

/// Result of a successful [`ModuleExecutor::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExecutionReport {
    /// Attempts used, including the successful one
    pub attempts: u32,
    /// Wall time across all attempts and retry delays
    pub duration: Duration,
}

/// Applies timeout and retry policy to module invocations.
pub(crate) struct ModuleExecutor<'a> {
    bus: &'a EventBus,
    default_timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl<'a> ModuleExecutor<'a> {
    pub(crate) fn new(config: &EngineConfig, bus: &'a EventBus) -> Self {
        Self {
            bus,
            default_timeout: config.phase_timeout(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        }
    }

    fn timeout_for(&self, slot: &ModuleSlot) -> Duration {
        slot.module.timeout().unwrap_or(self.default_timeout)
    }

    /// Runs `setup` if the module has not been set up yet.
    ///
    /// Setup is attempted once per call, under the module's timeout, and is
    /// not retried; a module whose setup failed stays `Unset` and is set up
    /// again the next time its phase runs. A failed setup counts as a
    /// failed attempt in the module's status.
    pub(crate) async fn setup(
        &self,
        slot: &mut ModuleSlot,
        ctx: &mut Context,
    ) -> Result<(), EngineError> {
        match slot.lifecycle {
            ModuleLifecycle::Ready => return Ok(()),
            ModuleLifecycle::TornDown => {
                return Err(EngineError::invalid_module_state(
                    "run",
                    slot.name(),
                    slot.lifecycle,
                ));
            }
            ModuleLifecycle::Unset => {}
        }

        let name = slot.name().to_string();
        let phase = slot.module.phase();
        let timeout = self.timeout_for(slot);
        let started = Instant::now();
        let token = ctx.begin_attempt();

        let result = match tokio::time::timeout(timeout, slot.module.setup(ctx)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(EngineError::ModuleExecution {
                module: name.clone(),
                phase,
                stage: ModuleStage::Setup,
                source,
            }),
            Err(_) => {
                token.cancel();
                Err(EngineError::ModuleTimeout {
                    module: name.clone(),
                    phase,
                    timeout,
                })
            }
        };
        if let Err(err) = result {
            slot.attempts += 1;
            let timed_out = matches!(err, EngineError::ModuleTimeout { .. });
            if timed_out {
                slot.timeouts += 1;
            }
            metrics::record_module_attempt(phase, if timed_out { "timeout" } else { "failure" });
            let elapsed = started.elapsed();
            slot.failures += 1;
            slot.total_duration += elapsed;
            slot.last_result = Some(ModuleOutcome::Failed {
                attempts: 1,
                message: err.to_string(),
            });
            self.bus
                .emit(
                    EventBuilder::new(kinds::MODULE_FAILED, "Module failed", EventLevel::Error)
                        .phase(phase)
                        .source(name.as_str())
                        .description(format!("module '{name}' failed during setup: {err}"))
                        .payload(json!({
                            "stage": ModuleStage::Setup.to_string(),
                            "attempts": 1,
                            "kind": err.kind(),
                            "error": err.to_string(),
                        }))
                        .duration(elapsed),
                )
                .await;
            return Err(err);
        }

        slot.lifecycle = slot.lifecycle.transition(ModuleLifecycle::Ready, &name)?;
        self.bus
            .emit(
                EventBuilder::new(kinds::MODULE_SETUP, "Module set up", EventLevel::Debug)
                    .phase(phase)
                    .source(name.as_str())
                    .description(format!("module '{name}' set up"))
                    .duration(started.elapsed()),
            )
            .await;
        Ok(())
    }

    /// Runs one attempt of `run` under `timeout`.
    async fn attempt(
        slot: &mut ModuleSlot,
        ctx: &mut Context,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        let phase = slot.module.phase();
        let token = ctx.begin_attempt();

        match tokio::time::timeout(timeout, slot.module.run(ctx)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(EngineError::ModuleExecution {
                module: slot.name().to_string(),
                phase,
                stage: ModuleStage::Run,
                source,
            }),
            Err(_) => {
                token.cancel();
                Err(EngineError::ModuleTimeout {
                    module: slot.name().to_string(),
                    phase,
                    timeout,
                })
            }
        }
    }

    /// Runs the module up to `max_retries + 1` times, stopping at the first
    /// success.
    ///
    /// # Errors
    ///
    /// Returns the final attempt's failure once the retry budget is spent.
    pub(crate) async fn execute(
        &self,
        slot: &mut ModuleSlot,
        ctx: &mut Context,
    ) -> Result<ExecutionReport, EngineError> {
        if slot.lifecycle != ModuleLifecycle::Ready {
            return Err(EngineError::invalid_module_state(
                "run",
                slot.name(),
                slot.lifecycle,
            ));
        }

        let name = slot.name().to_string();
        let phase = slot.module.phase();
        let timeout = self.timeout_for(slot);
        let started = Instant::now();
        let mut retries: u32 = 0;

        slot.running = true;
        loop {
            slot.attempts += 1;
            debug!(module = %name, %phase, attempt = retries + 1, "running module");
            let result = Self::attempt(slot, ctx, timeout).await;

            let err = match result {
                Ok(()) => {
                    let elapsed = started.elapsed();
                    let attempts = retries + 1;
                    slot.running = false;
                    slot.execution_count += 1;
                    slot.total_duration += elapsed;
                    slot.last_result = Some(ModuleOutcome::Success { attempts });
                    metrics::record_module_attempt(phase, "success");

                    self.bus
                        .emit(
                            EventBuilder::new(
                                kinds::MODULE_COMPLETED,
                                "Module completed",
                                EventLevel::Info,
                            )
                            .phase(phase)
                            .source(name.as_str())
                            .description(format!("module '{name}' completed"))
                            .payload(json!({ "attempts": attempts }))
                            .duration(elapsed),
                        )
                        .await;
                    return Ok(ExecutionReport {
                        attempts,
                        duration: elapsed,
                    });
                }
                Err(err) => err,
            };

            let timed_out = matches!(err, EngineError::ModuleTimeout { .. });
            if timed_out {
                slot.timeouts += 1;
            }
            metrics::record_module_attempt(phase, if timed_out { "timeout" } else { "failure" });

            if retries < self.max_retries && err.is_retryable() {
                retries += 1;
                metrics::record_module_retry(phase);
                self.bus
                    .emit(
                        EventBuilder::new(kinds::MODULE_RETRY, "Module retry", EventLevel::Warn)
                            .phase(phase)
                            .source(name.as_str())
                            .description(format!(
                                "retrying module '{name}' ({retries}/{}): {err}",
                                self.max_retries
                            ))
                            .payload(json!({
                                "retry": retries,
                                "max_retries": self.max_retries,
                                "kind": err.kind(),
                                "error": err.to_string(),
                                "delay_ms": self.retry_delay.as_secs_f64() * 1000.0,
                            })),
                    )
                    .await;
                if !self.retry_delay.is_zero() {
                    tokio::time::sleep(self.retry_delay).await;
                }
                continue;
            }

            let elapsed = started.elapsed();
            let attempts = retries + 1;
            slot.running = false;
            slot.execution_count += 1;
            slot.failures += 1;
            slot.total_duration += elapsed;
            slot.last_result = Some(ModuleOutcome::Failed {
                attempts,
                message: err.to_string(),
            });

            self.bus
                .emit(
                    EventBuilder::new(kinds::MODULE_FAILED, "Module failed", EventLevel::Error)
                        .phase(phase)
                        .source(name.as_str())
                        .description(format!(
                            "module '{name}' failed after {attempts} attempt(s): {err}"
                        ))
                        .payload(json!({
                            "stage": ModuleStage::Run.to_string(),
                            "attempts": attempts,
                            "kind": err.kind(),
                            "error": err.to_string(),
                        }))
                        .duration(elapsed),
                )
                .await;
            return Err(err);
        }
    }

    /// Tears down a `Ready` module.
    ///
    /// Returns `Ok(false)` without calling the module when it was never set
    /// up or is already torn down. A module whose teardown fails is still
    /// retired.
    pub(crate) async fn teardown(
        &self,
        slot: &mut ModuleSlot,
        ctx: &mut Context,
    ) -> Result<bool, EngineError> {
        if slot.lifecycle != ModuleLifecycle::Ready {
            return Ok(false);
        }

        let name = slot.name().to_string();
        let phase = slot.module.phase();
        let timeout = self.timeout_for(slot);
        let started = Instant::now();
        let token = ctx.begin_attempt();

        let result = match tokio::time::timeout(timeout, slot.module.teardown(ctx)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(EngineError::ModuleExecution {
                module: name.clone(),
                phase,
                stage: ModuleStage::Teardown,
                source,
            }),
            Err(_) => {
                token.cancel();
                Err(EngineError::ModuleTimeout {
                    module: name.clone(),
                    phase,
                    timeout,
                })
            }
        };
        slot.lifecycle = slot.lifecycle.transition(ModuleLifecycle::TornDown, &name)?;

        match result {
            Ok(()) => {
                self.bus
                    .emit(
                        EventBuilder::new(
                            kinds::MODULE_TEARDOWN,
                            "Module torn down",
                            EventLevel::Info,
                        )
                        .phase(phase)
                        .source(name.as_str())
                        .description(format!("module '{name}' torn down"))
                        .duration(started.elapsed()),
                    )
                    .await;
                Ok(true)
            }
            Err(err) => {
                self.bus
                    .emit(
                        EventBuilder::new(
                            kinds::MODULE_TEARDOWN,
                            "Module teardown failed",
                            EventLevel::Error,
                        )
                        .phase(phase)
                        .source(name.as_str())
                        .description(err.to_string())
                        .payload(json!({ "kind": err.kind(), "error": err.to_string() })),
                    )
                    .await;
                Err(err)
            }
        }
    }
}
