//! Scenario loader.
//!
//! Pipeline: size check, read, YAML parse, reject removed settings,
//! deserialize, validate.

use std::path::Path;

use serde_yaml::Value;

use crate::config::schema::ScenarioConfig;
use crate::config::validation::Validator;
use crate::error::{ConfigError, Severity, ValidationIssue};

/// Largest scenario file accepted, in bytes.
pub const MAX_SCENARIO_SIZE: u64 = 1024 * 1024;

/// Engine keys that older configs may still carry but are no longer
/// honoured.
const REMOVED_ENGINE_KEYS: [(&str, &str); 1] = [(
    "enable_parallel_execution",
    "parallel execution is not supported; modules within a phase always run sequentially",
)];

/// A loaded scenario plus any validation warnings.
#[derive(Debug)]
pub struct LoadResult {
    /// The validated scenario
    pub scenario: ScenarioConfig,
    /// Non-fatal issues
    pub warnings: Vec<ValidationIssue>,
}

/// Loads and validates a scenario file.
///
/// # Errors
///
/// [`ConfigError::MissingFile`] if the file cannot be read,
/// [`ConfigError::ParseError`] for malformed or oversized YAML, and
/// [`ConfigError::ValidationError`] if validation reports errors.
pub fn load_scenario(path: &Path) -> Result<LoadResult, ConfigError> {
    let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
        path: path.to_path_buf(),
    })?;
    if metadata.len() > MAX_SCENARIO_SIZE {
        return Err(ConfigError::ParseError {
            path: path.to_path_buf(),
            line: None,
            message: format!(
                "file is {} bytes; at most {MAX_SCENARIO_SIZE} bytes are accepted",
                metadata.len()
            ),
        });
    }

    let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
        path: path.to_path_buf(),
    })?;
    parse_scenario(&raw, path)
}

/// Parses and validates scenario text. `origin` is only used in errors.
///
/// # Errors
///
/// Same as [`load_scenario`], minus the I/O cases.
pub fn parse_scenario(text: &str, origin: &Path) -> Result<LoadResult, ConfigError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let root: Value = serde_yaml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: origin.to_path_buf(),
        line: e.location().map(|l| l.line()),
        message: e.to_string(),
    })?;
    if root.is_null() {
        return Err(ConfigError::ParseError {
            path: origin.to_path_buf(),
            line: None,
            message: "scenario file is empty".to_string(),
        });
    }

    let removed = removed_settings(&root);
    if !removed.is_empty() {
        return Err(ConfigError::ValidationError {
            path: origin.display().to_string(),
            errors: removed,
        });
    }

    let scenario: ScenarioConfig =
        serde_yaml::from_value(root).map_err(|e| ConfigError::ParseError {
            path: origin.to_path_buf(),
            line: e.location().map(|l| l.line()),
            message: e.to_string(),
        })?;

    let result = Validator::new().validate_scenario(&scenario);
    if result.has_errors() {
        return Err(ConfigError::ValidationError {
            path: origin.display().to_string(),
            errors: result.errors,
        });
    }

    Ok(LoadResult {
        scenario,
        warnings: result.warnings,
    })
}

fn removed_settings(root: &Value) -> Vec<ValidationIssue> {
    let Some(engine) = root.get("engine") else {
        return Vec::new();
    };
    REMOVED_ENGINE_KEYS
        .iter()
        .filter(|(key, _)| engine.get(*key).is_some())
        .map(|(key, message)| ValidationIssue {
            path: format!("engine.{key}"),
            message: (*message).to_string(),
            severity: Severity::Error,
        })
        .collect()
}
