//! Error types for `phaseflow`
//!
//! The hierarchy has two layers: domain errors raised by the engine and
//! configuration loader, and a top-level [`Error`] that aggregates them and
//! maps each to a CLI exit code.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::engine::{EngineState, ModuleLifecycle, ModuleStage, Phase};

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `phaseflow` CLI operations.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Engine error (phase aborted, illegal state transition)
    pub const ENGINE_ERROR: i32 = 5;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `phaseflow` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Engine error
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Engine(_) => ExitCode::ENGINE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}: {}", summarize(.errors))]
    ValidationError {
        /// Path to the configuration file, or `"<inline>"`
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .filter(|i| i.severity == Severity::Error)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "modules[2].phase")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Error - validation failure that prevents configuration from being used
    Error,
    /// Warning - potential issue that does not prevent configuration loading
    Warning,
}

// ============================================================================
// Module Errors
// ============================================================================

/// Boxed error returned by module implementations that wrap foreign errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported by a module's `setup`, `run` or `teardown`.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Plain failure message
    #[error("{0}")]
    Failed(String),

    /// Failure carrying an underlying error
    #[error(transparent)]
    Source(#[from] BoxError),
}

impl ModuleError {
    /// Creates a message-only module failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

// ============================================================================
// Engine Errors
// ============================================================================

/// Errors raised by the lifecycle engine and its components.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Registration of a malformed module
    #[error("invalid module '{module}': {reason}")]
    InvalidModule {
        /// Module name as reported by the module
        module: String,
        /// Why the registration was rejected
        reason: String,
    },

    /// Illegal state transition attempt
    #[error("cannot {operation} while {subject} is {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// What was in the wrong state (`engine` or `module '<name>'`)
        subject: String,
        /// State it was in
        state: String,
    },

    /// Module exceeded its timeout
    #[error("module '{module}' timed out after {}ms in {phase}", .timeout.as_millis())]
    ModuleTimeout {
        /// Module name
        module: String,
        /// Phase the module belongs to
        phase: Phase,
        /// Timeout that fired
        timeout: Duration,
    },

    /// Module failed during setup, run or teardown
    #[error("module '{module}' failed during {stage} in {phase}: {source}")]
    ModuleExecution {
        /// Module name
        module: String,
        /// Phase the module belongs to
        phase: Phase,
        /// Which module operation failed
        stage: ModuleStage,
        /// Underlying module failure
        #[source]
        source: ModuleError,
    },

    /// A phase failed after exhausting the continue/retry policy
    #[error("phase {phase} failed: {source}")]
    Phase {
        /// Phase that failed
        phase: Phase,
        /// Final failure that aborted the phase
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Builds an [`EngineError::InvalidState`] for the given engine state.
    #[must_use]
    pub fn invalid_state(operation: &'static str, state: EngineState) -> Self {
        Self::InvalidState {
            operation,
            subject: "engine".to_string(),
            state: state.to_string(),
        }
    }

    /// Builds an [`EngineError::InvalidState`] for a module lifecycle violation.
    #[must_use]
    pub fn invalid_module_state(
        operation: &'static str,
        module: &str,
        lifecycle: ModuleLifecycle,
    ) -> Self {
        Self::InvalidState {
            operation,
            subject: format!("module '{module}'"),
            state: lifecycle.to_string(),
        }
    }

    /// Returns the short kind name used in event payloads.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidModule { .. } => "InvalidModuleError",
            Self::InvalidState { .. } => "InvalidStateError",
            Self::ModuleTimeout { .. } => "ModuleTimeoutError",
            Self::ModuleExecution { .. } => "ModuleExecutionError",
            Self::Phase { .. } => "PhaseError",
        }
    }

    /// Whether the module executor may retry after this failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ModuleTimeout { .. } | Self::ModuleExecution { .. }
        )
    }
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `phaseflow` operations.
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Tests
// ============================================================================
