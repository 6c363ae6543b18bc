//! Lifecycle engine: phases, modules, context, events and the run loop.
//!
//! The engine drives registered [`Module`]s through a fixed sequence of
//! [`Phase`]s. Within a phase, modules run one at a time in registration
//! order; each attempt is bounded by a timeout and retried up to a
//! configured count. Every state change is published as an event on the
//! [`EventBus`] and mirrored to phase observers.

pub mod bus;
pub mod context;
mod executor;
pub mod lifecycle;
pub mod module;
pub mod observer;
pub mod phase;
mod runner;
pub mod stats;

pub use bus::{EventBus, EventListener, ListenerId, ObserverId};
pub use context::{Context, RecordedError};
pub use lifecycle::{EngineHandle, LifecycleEngine, RunSummary};
pub use module::{Module, ModuleLifecycle, ModuleOutcome, ModuleStatus};
pub use observer::{ObserverHook, PhaseEdge, PhaseObserver};
pub use phase::{EngineState, ModuleStage, ParsePhaseError, Phase};
pub use stats::{EngineStats, GlobalStats, PhaseStats};
