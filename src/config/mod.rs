//! Configuration: engine settings and scenario files.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{LoadResult, load_scenario, parse_scenario};
pub use schema::{EngineConfig, ScenarioConfig, ScriptedModuleConfig, Step};
pub use validation::{ValidationResult, Validator};
