//! `phaseflow` - phase-driven lifecycle orchestration engine
//!
//! Modules register against one of six fixed phases and the engine runs
//! them in order, sharing a single context, bounding every attempt with a
//! timeout and retrying failures. Every action is published as a
//! structured event.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod modules;
pub mod observability;

pub use config::EngineConfig;
pub use engine::{Context, EngineHandle, LifecycleEngine, Module, Phase, PhaseObserver};
pub use error::{EngineError, Error, ModuleError};
