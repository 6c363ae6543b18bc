//! Configuration schema types.
//!
//! [`EngineConfig`] tunes the engine; [`ScenarioConfig`] is the YAML file the
//! CLI runs: engine settings plus a list of scripted modules.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{ParsePhaseError, Phase};
use crate::error::ConfigError;

// ============================================================================
// Engine configuration
// ============================================================================

/// Engine tuning knobs. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Per-attempt module timeout in milliseconds. Must be positive.
    pub phase_timeout_ms: u64,

    /// Mirror debug-level events into the log.
    pub enable_debug_logging: bool,

    /// Keep running the remaining modules and phases after a failure.
    pub continue_on_error: bool,

    /// Extra attempts after the first failed one.
    pub max_retries: u32,

    /// Pause between attempts in milliseconds.
    pub retry_delay_ms: u64,

    /// Keep emitted events in the bounded history.
    pub save_history: bool,

    /// History capacity. Must be positive.
    pub max_history_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            phase_timeout_ms: 30_000,
            enable_debug_logging: false,
            continue_on_error: false,
            max_retries: 3,
            retry_delay_ms: 1_000,
            save_history: true,
            max_history_size: 1_000,
        }
    }
}

impl EngineConfig {
    /// Per-attempt timeout.
    #[must_use]
    pub const fn phase_timeout(&self) -> Duration {
        Duration::from_millis(self.phase_timeout_ms)
    }

    /// Delay between attempts.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Checks value ranges, returning `Ok` only if there are no errors.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] listing every problem.
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        let result = super::validation::Validator::new().validate_engine(self);
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: "<engine config>".to_string(),
                errors: result.errors,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Scenario file
// ============================================================================

/// Root of a scenario file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Modules, registered in file order
    #[serde(default)]
    pub modules: Vec<ScriptedModuleConfig>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

/// A module whose behavior is a list of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptedModuleConfig {
    /// Unique module name
    pub name: String,

    /// Module version
    #[serde(default = "default_version")]
    pub version: String,

    /// Phase name, e.g. `validation`
    pub phase: String,

    /// Per-attempt timeout overriding the engine default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Steps run in order on every attempt
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl ScriptedModuleConfig {
    /// Parses the phase name.
    ///
    /// # Errors
    ///
    /// Returns [`ParsePhaseError`] for unknown names.
    pub fn parsed_phase(&self) -> Result<Phase, ParsePhaseError> {
        self.phase.parse()
    }
}

/// One scripted action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    /// Write a context value
    Set {
        /// Context key
        key: String,
        /// Value to store
        value: serde_json::Value,
    },
    /// Fail unless the key is present
    Require {
        /// Context key
        key: String,
    },
    /// Delete a context value
    Remove {
        /// Context key
        key: String,
    },
    /// Wait
    Sleep {
        /// Milliseconds
        ms: u64,
    },
    /// Fail the attempt
    Fail {
        /// Failure message
        message: String,
        /// Fail only the first `times` attempts; forever when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        times: Option<u32>,
    },
}
