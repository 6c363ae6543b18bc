//! Configuration validation.
//!
//! Validation runs on the deserialized config and collects every issue
//! rather than stopping at the first one.

use std::collections::HashSet;

use crate::config::schema::{EngineConfig, ScenarioConfig, ScriptedModuleConfig, Step};
use crate::error::{Severity, ValidationIssue};

/// Retry budgets above this draw a warning.
const LARGE_RETRY_BUDGET: u32 = 10;

// ============================================================================
// Public API
// ============================================================================

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Collects validation issues for engine and scenario configs.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates engine settings on their own.
    pub fn validate_engine(&mut self, config: &EngineConfig) -> ValidationResult {
        self.reset();
        self.check_engine(config, "");
        self.finish()
    }

    /// Validates a whole scenario.
    pub fn validate_scenario(&mut self, scenario: &ScenarioConfig) -> ValidationResult {
        self.reset();
        self.check_engine(&scenario.engine, "engine.");

        let mut names = HashSet::new();
        for (index, module) in scenario.modules.iter().enumerate() {
            let path = format!("modules[{index}]");
            self.check_module(module, &path);
            if !module.name.trim().is_empty() && !names.insert(module.name.as_str()) {
                self.add_error(
                    &format!("{path}.name"),
                    &format!("duplicate module name '{}'", module.name),
                );
            }
        }
        if scenario.modules.is_empty() {
            self.add_warning("modules", "scenario defines no modules");
        }
        self.finish()
    }

    // ========================================================================
    // Checks
    // ========================================================================

    fn check_engine(&mut self, config: &EngineConfig, prefix: &str) {
        if config.phase_timeout_ms == 0 {
            self.add_error(
                &format!("{prefix}phase_timeout_ms"),
                "must be greater than 0",
            );
        }
        if config.max_history_size == 0 {
            self.add_error(
                &format!("{prefix}max_history_size"),
                "must be greater than 0",
            );
        }
        if config.max_retries > LARGE_RETRY_BUDGET {
            self.add_warning(
                &format!("{prefix}max_retries"),
                &format!(
                    "{} retries per module multiplies worst-case phase time by {}",
                    config.max_retries,
                    u64::from(config.max_retries) + 1
                ),
            );
        }
    }

    fn check_module(&mut self, module: &ScriptedModuleConfig, path: &str) {
        if module.name.trim().is_empty() {
            self.add_error(&format!("{path}.name"), "must not be empty");
        }
        if module.version.trim().is_empty() {
            self.add_error(&format!("{path}.version"), "must not be empty");
        }
        if let Err(err) = module.parsed_phase() {
            self.add_error(&format!("{path}.phase"), &err.to_string());
        }
        if module.timeout_ms == Some(0) {
            self.add_error(&format!("{path}.timeout_ms"), "must be greater than 0");
        }
        if module.steps.is_empty() {
            self.add_warning(&format!("{path}.steps"), "module has no steps");
        }

        for (index, step) in module.steps.iter().enumerate() {
            let step_path = format!("{path}.steps[{index}]");
            match step {
                Step::Set { key, .. } | Step::Require { key } | Step::Remove { key } => {
                    if key.is_empty() {
                        self.add_error(&format!("{step_path}.key"), "must not be empty");
                    }
                }
                Step::Fail { times: Some(0), .. } => {
                    self.add_warning(
                        &format!("{step_path}.times"),
                        "a fail step with times: 0 never fails",
                    );
                }
                Step::Sleep { .. } | Step::Fail { .. } => {}
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn reset(&mut self) {
        self.errors.clear();
        self.warnings.clear();
    }

    fn finish(&mut self) -> ValidationResult {
        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    /// Adds an error to the collection.
    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    /// Adds a warning to the collection.
    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}
