//! Built-in module implementations.

pub mod scripted;

pub use scripted::ScriptedModule;
