//! Modules driven by scenario steps.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::{ScriptedModuleConfig, Step};
use crate::engine::{Context, Module, ParsePhaseError, Phase};
use crate::error::ModuleError;

/// A [`Module`] that replays a fixed list of [`Step`]s on every attempt.
#[derive(Debug)]
pub struct ScriptedModule {
    name: String,
    version: String,
    phase: Phase,
    timeout: Option<Duration>,
    steps: Vec<Step>,
    /// Times each `fail` step has fired, indexed like `steps`
    fired: Vec<u32>,
    runs: u64,
}

impl ScriptedModule {
    /// Builds a module from its scenario entry.
    ///
    /// # Errors
    ///
    /// Returns [`ParsePhaseError`] if the phase name is unknown.
    pub fn from_config(config: &ScriptedModuleConfig) -> Result<Self, ParsePhaseError> {
        Ok(Self {
            name: config.name.clone(),
            version: config.version.clone(),
            phase: config.parsed_phase()?,
            timeout: config.timeout_ms.map(Duration::from_millis),
            steps: config.steps.clone(),
            fired: vec![0; config.steps.len()],
            runs: 0,
        })
    }
}

#[async_trait]
impl Module for ScriptedModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn run(&mut self, ctx: &mut Context) -> Result<(), ModuleError> {
        self.runs += 1;
        for (index, step) in self.steps.iter().enumerate() {
            match step {
                Step::Set { key, value } => {
                    ctx.set(key.clone(), value.clone());
                }
                Step::Require { key } => {
                    if !ctx.has(key) {
                        return Err(ModuleError::failed(format!(
                            "required context key '{key}' is missing"
                        )));
                    }
                }
                Step::Remove { key } => {
                    ctx.delete(key);
                }
                Step::Sleep { ms } => {
                    tokio::time::sleep(Duration::from_millis(*ms)).await;
                }
                Step::Fail { message, times } => {
                    let fired = &mut self.fired[index];
                    if times.is_none_or(|limit| *fired < limit) {
                        *fired += 1;
                        debug!(module = %self.name, step = index, "injected failure");
                        return Err(ModuleError::failed(message.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    fn stats(&self) -> Value {
        json!({
            "runs": self.runs,
            "steps": self.steps.len(),
            "failures_injected": self.fired.iter().map(|n| u64::from(*n)).sum::<u64>(),
        })
    }
}
