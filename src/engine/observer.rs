//! Phase-boundary observers.
//!
//! An observer implements any subset of the hook methods below; hooks it
//! does not override are no-ops. The engine never looks hooks up by name:
//! every `(phase, edge)` pair is an [`ObserverHook`] value and
//! [`ObserverHook::dispatch`] maps it onto the matching method.

use async_trait::async_trait;

use crate::error::EngineError;

use super::context::Context;
use super::phase::Phase;

/// Callbacks invoked around each phase and on module failures.
#[allow(unused_variables)]
#[async_trait]
pub trait PhaseObserver: Send + Sync {
    /// Before the first initialization module runs.
    async fn on_initialization_start(&self, ctx: &Context) {}
    /// After the initialization phase completes.
    async fn on_initialization_complete(&self, ctx: &Context) {}
    /// Before the first preparation module runs.
    async fn on_preparation_start(&self, ctx: &Context) {}
    /// After the preparation phase completes.
    async fn on_preparation_complete(&self, ctx: &Context) {}
    /// Before the first validation module runs.
    async fn on_validation_start(&self, ctx: &Context) {}
    /// After the validation phase completes.
    async fn on_validation_complete(&self, ctx: &Context) {}
    /// Before the first execution module runs.
    async fn on_execution_start(&self, ctx: &Context) {}
    /// After the execution phase completes.
    async fn on_execution_complete(&self, ctx: &Context) {}
    /// Before the first monitoring module runs.
    async fn on_monitoring_start(&self, ctx: &Context) {}
    /// After the monitoring phase completes.
    async fn on_monitoring_complete(&self, ctx: &Context) {}
    /// Before the first cleanup module runs.
    async fn on_cleanup_start(&self, ctx: &Context) {}
    /// After the cleanup phase completes.
    async fn on_cleanup_complete(&self, ctx: &Context) {}
    /// A module failure was recorded in `phase`.
    async fn on_error(&self, error: &EngineError, phase: Phase) {}
}

/// Which side of a phase a hook fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEdge {
    /// Before any module of the phase runs
    Start,
    /// After every module of the phase ran without aborting
    Complete,
}

/// A phase-boundary hook: one of the twelve `(phase, edge)` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverHook {
    /// Phase the hook belongs to
    pub phase: Phase,
    /// Start or complete
    pub edge: PhaseEdge,
}

impl ObserverHook {
    /// Hook fired when `phase` is entered.
    #[must_use]
    pub const fn start(phase: Phase) -> Self {
        Self {
            phase,
            edge: PhaseEdge::Start,
        }
    }

    /// Hook fired when `phase` completes.
    #[must_use]
    pub const fn complete(phase: Phase) -> Self {
        Self {
            phase,
            edge: PhaseEdge::Complete,
        }
    }

    /// Invokes the matching method on `observer`.
    pub async fn dispatch(self, observer: &dyn PhaseObserver, ctx: &Context) {
        match (self.phase, self.edge) {
            (Phase::Initialization, PhaseEdge::Start) => observer.on_initialization_start(ctx).await,
            (Phase::Initialization, PhaseEdge::Complete) => {
                observer.on_initialization_complete(ctx).await;
            }
            (Phase::Preparation, PhaseEdge::Start) => observer.on_preparation_start(ctx).await,
            (Phase::Preparation, PhaseEdge::Complete) => observer.on_preparation_complete(ctx).await,
            (Phase::Validation, PhaseEdge::Start) => observer.on_validation_start(ctx).await,
            (Phase::Validation, PhaseEdge::Complete) => observer.on_validation_complete(ctx).await,
            (Phase::Execution, PhaseEdge::Start) => observer.on_execution_start(ctx).await,
            (Phase::Execution, PhaseEdge::Complete) => observer.on_execution_complete(ctx).await,
            (Phase::Monitoring, PhaseEdge::Start) => observer.on_monitoring_start(ctx).await,
            (Phase::Monitoring, PhaseEdge::Complete) => observer.on_monitoring_complete(ctx).await,
            (Phase::Cleanup, PhaseEdge::Start) => observer.on_cleanup_start(ctx).await,
            (Phase::Cleanup, PhaseEdge::Complete) => observer.on_cleanup_complete(ctx).await,
        }
    }
}

impl std::fmt::Display for ObserverHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let edge = match self.edge {
            PhaseEdge::Start => "start",
            PhaseEdge::Complete => "complete",
        };
        write!(f, "on_{}_{edge}", self.phase)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, name: &str) {
            self.calls.lock().unwrap().push(name.to_string());
        }
    }

    #[async_trait]
    impl PhaseObserver for Recorder {
        async fn on_validation_start(&self, _ctx: &Context) {
            self.push("on_validation_start");
        }
        async fn on_cleanup_complete(&self, _ctx: &Context) {
            self.push("on_cleanup_complete");
        }
    }

    #[tokio::test]
    async fn test_dispatch_reaches_overridden_hooks() {
        let recorder = Recorder::default();
        let ctx = Context::new();
        ObserverHook::start(Phase::Validation)
            .dispatch(&recorder, &ctx)
            .await;
        ObserverHook::complete(Phase::Cleanup)
            .dispatch(&recorder, &ctx)
            .await;
        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec!["on_validation_start", "on_cleanup_complete"]
        );
    }

    #[tokio::test]
    async fn test_missing_hooks_are_skipped() {
        let recorder = Recorder::default();
        let ctx = Context::new();
        for phase in Phase::ALL {
            if phase != Phase::Validation {
                ObserverHook::start(phase).dispatch(&recorder, &ctx).await;
            }
        }
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_hook_display_matches_method_name() {
        assert_eq!(
            ObserverHook::start(Phase::Monitoring).to_string(),
            "on_monitoring_start"
        );
        assert_eq!(
            ObserverHook::complete(Phase::Initialization).to_string(),
            "on_initialization_complete"
        );
    }
}
