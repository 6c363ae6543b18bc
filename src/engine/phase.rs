//! Phase identifiers and engine states.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One stage in the engine's fixed execution order.
///
/// The derived ordering follows declaration order, which is the order
/// phases execute in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Runs once per engine via `initialize()`
    Initialization,
    /// First phase of every `start()` run
    Preparation,
    /// Checks preconditions before execution
    Validation,
    /// Main unit of work
    Execution,
    /// Observes results of execution
    Monitoring,
    /// Releases run-scoped resources
    Cleanup,
}

impl Phase {
    /// Every phase, in execution order.
    pub const ALL: [Self; 6] = [
        Self::Initialization,
        Self::Preparation,
        Self::Validation,
        Self::Execution,
        Self::Monitoring,
        Self::Cleanup,
    ];

    /// The phases executed by `start()` after initialization.
    pub const RUN_SEQUENCE: [Self; 5] = [
        Self::Preparation,
        Self::Validation,
        Self::Execution,
        Self::Monitoring,
        Self::Cleanup,
    ];

    /// Returns the snake-case name used in configuration, events and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::Preparation => "preparation",
            Self::Validation => "validation",
            Self::Execution => "execution",
            Self::Monitoring => "monitoring",
            Self::Cleanup => "cleanup",
        }
    }

    /// Zero-based position in [`Phase::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a phase name does not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePhaseError {
    /// The rejected input
    pub input: String,
    /// Closest known phase name, when one is reasonably close
    pub suggestion: Option<&'static str>,
}

impl fmt::Display for ParsePhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown phase '{}'", self.input)?;
        if let Some(suggestion) = self.suggestion {
            write!(f, " (did you mean '{suggestion}'?)")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParsePhaseError {}

impl FromStr for Phase {
    type Err = ParsePhaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        if let Some(phase) = Self::ALL.into_iter().find(|p| p.as_str() == normalized) {
            return Ok(phase);
        }

        let suggestion = Self::ALL
            .into_iter()
            .map(|p| (p.as_str(), strsim::jaro_winkler(&normalized, p.as_str())))
            .filter(|(_, score)| *score >= 0.8)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(name, _)| name);

        Err(ParsePhaseError {
            input: s.to_string(),
            suggestion,
        })
    }
}

/// Engine lifecycle state.
///
/// Transitions:
///
/// ```text
/// Uninitialized --initialize--> Preparing --ok--> Stopped
///                                         --err-> Error
/// Stopped|Paused --start--> Running --ok--> Stopped
///                                   --err-> Error
/// Running <--pause/resume--> Paused
/// any --stop--> Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Constructed, `initialize()` not yet called
    Uninitialized,
    /// Initialization phase in progress
    Preparing,
    /// Post-initialization phases in progress
    Running,
    /// Run suspended at a phase boundary
    Paused,
    /// Idle and ready to start
    Stopped,
    /// Last initialization or run aborted
    Error,
}

impl EngineState {
    /// Returns the snake-case name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Preparing => "preparing",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    /// Numeric code exported through the state gauge.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Preparing => 1,
            Self::Running => 2,
            Self::Paused => 3,
            Self::Stopped => 4,
            Self::Error => 5,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Module operation being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStage {
    /// `Module::setup`
    Setup,
    /// `Module::run`
    Run,
    /// `Module::teardown`
    Teardown,
}

impl fmt::Display for ModuleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Setup => "setup",
            Self::Run => "run",
            Self::Teardown => "teardown",
        })
    }
}
