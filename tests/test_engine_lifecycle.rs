mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{
    ControlAction, Controller, Flaky, Recording, Tracked, entries, events_of, fast_config, new_log,
};
use phaseflow::engine::{EngineState, LifecycleEngine, ModuleLifecycle, ModuleOutcome, Phase};
use phaseflow::error::EngineError;
use phaseflow::observability::EventLevel;
use phaseflow::observability::events::kinds;

fn engine() -> LifecycleEngine {
    LifecycleEngine::new(fast_config()).unwrap()
}

// ============================================================================
// State machine
// ============================================================================

#[tokio::test]
async fn fresh_engine_is_uninitialized() {
    let engine = engine();
    assert_eq!(engine.state(), EngineState::Uninitialized);
    assert_eq!(engine.current_phase(), None);
    assert!(engine.context().is_none());
    assert_eq!(engine.stats().global.total_executions, 0);
}

#[tokio::test]
async fn start_initializes_implicitly_once() {
    let log = new_log();
    let mut engine = engine();
    engine
        .register_module(
            Phase::Initialization,
            Recording::new("init", Phase::Initialization, &log),
        )
        .await
        .unwrap();

    engine.start().await.unwrap();
    engine.start().await.unwrap();

    assert_eq!(entries(&log), vec!["init"]);
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(engine.stats().global.total_executions, 2);
}

#[tokio::test]
async fn explicit_initialize_then_start() {
    let mut engine = engine();
    engine.initialize().await.unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(engine.stats().global.total_executions, 0);

    let summary = engine.start().await.unwrap();
    assert_eq!(summary.phases_completed, 5);
    assert!(matches!(
        engine.initialize().await,
        Err(EngineError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn initialization_failure_leaves_error_state() {
    let mut engine = engine();
    let (flaky, _) = Flaky::new("bad-init", Phase::Initialization, u32::MAX);
    engine
        .register_module(Phase::Initialization, flaky)
        .await
        .unwrap();

    let err = engine.initialize().await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Phase {
            phase: Phase::Initialization,
            ..
        }
    ));
    assert_eq!(engine.state(), EngineState::Error);
    // An explicit initialize() is not a run.
    assert_eq!(engine.stats().global.total_executions, 0);

    let history = engine.event_history(None);
    assert_eq!(
        events_of(&history, kinds::ENGINE_FAILED, Some(EventLevel::Critical)).len(),
        1
    );

    // Still refuses to start after a stop: initialization never succeeded.
    engine.stop().await;
    let err = engine.start().await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
    assert_eq!(
        err.to_string(),
        "cannot start while engine is stopped after failed initialization"
    );
    assert_eq!(engine.stats().global.total_executions, 0);
}

#[tokio::test]
async fn stop_before_first_start_still_allows_running() {
    let log = new_log();
    let mut engine = engine();
    engine
        .register_module(
            Phase::Initialization,
            Recording::new("init", Phase::Initialization, &log),
        )
        .await
        .unwrap();

    assert!(engine.stop().await);
    assert_eq!(engine.state(), EngineState::Stopped);

    let summary = engine.start().await.unwrap();
    assert_eq!(summary.phases_completed, 5);
    assert_eq!(entries(&log), vec!["init"]);
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(engine.stats().global.total_executions, 1);
    assert_eq!(engine.stats().global.failed_executions, 0);
}

#[tokio::test]
async fn stop_before_explicit_initialize() {
    let mut engine = engine();
    engine.stop().await;
    engine.initialize().await.unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);

    // Only once.
    let err = engine.initialize().await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
    engine.start().await.unwrap();
}

#[tokio::test]
async fn implicit_initialization_failure_counts_as_failed_run() {
    let mut engine = engine();
    let (flaky, _) = Flaky::new("bad-init", Phase::Initialization, u32::MAX);
    engine
        .register_module(Phase::Initialization, flaky)
        .await
        .unwrap();

    assert!(engine.start().await.is_err());
    assert_eq!(engine.stats().global.total_executions, 1);
    assert_eq!(engine.stats().global.failed_executions, 1);
}

#[tokio::test]
async fn run_failure_sets_error_and_recovers_after_stop() {
    let mut engine = engine();
    let (flaky, calls) = Flaky::new("once", Phase::Validation, 1);
    engine
        .register_module(Phase::Validation, flaky)
        .await
        .unwrap();

    let err = engine.start().await.unwrap_err();
    assert_eq!(err.kind(), "PhaseError");
    assert_eq!(engine.state(), EngineState::Error);
    assert_eq!(engine.stats().global.failed_executions, 1);

    // Error → start is illegal.
    let illegal = engine.start().await.unwrap_err();
    assert!(matches!(illegal, EngineError::InvalidState { .. }));
    assert_eq!(illegal.to_string(), "cannot start while engine is error");

    assert!(engine.stop().await);
    let summary = engine.start().await.unwrap();
    assert_eq!(summary.phases_completed, 5);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(engine.stats().global.successful_executions, 1);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let engine = engine();
    assert!(engine.stop().await);
    assert!(!engine.stop().await);
    let history = engine.event_history(None);
    assert_eq!(events_of(&history, kinds::ENGINE_STOPPED, None).len(), 1);
    assert_eq!(engine.state(), EngineState::Stopped);
}

// ============================================================================
// Pause / resume / stop during a run
// ============================================================================

#[tokio::test]
async fn pause_and_resume_emit_one_event_each() {
    let mut engine = engine();
    let handle = engine.handle();
    engine
        .register_module(
            Phase::Execution,
            Controller {
                name: "control".to_string(),
                phase: Phase::Execution,
                handle,
                action: ControlAction::PauseResume,
            },
        )
        .await
        .unwrap();

    let summary = engine.start().await.unwrap();
    assert_eq!(summary.phases_completed, 5);
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(
        engine.context().unwrap().get("control"),
        Some(&serde_json::json!([true, false, true]))
    );

    let history = engine.event_history(None);
    let paused = events_of(&history, kinds::ENGINE_PAUSED, None);
    let resumed = events_of(&history, kinds::ENGINE_RESUMED, None);
    assert_eq!(paused.len(), 1);
    assert_eq!(resumed.len(), 1);
    assert_eq!(paused[0].level, EventLevel::Info);
    assert_eq!(resumed[0].level, EventLevel::Info);
}

#[tokio::test]
async fn paused_run_waits_at_phase_boundary() {
    let log = new_log();
    let mut engine = engine();
    let handle = engine.handle();
    engine
        .register_module(
            Phase::Validation,
            Controller {
                name: "pauser".to_string(),
                phase: Phase::Validation,
                handle: handle.clone(),
                action: ControlAction::Pause,
            },
        )
        .await
        .unwrap();
    engine
        .register_module(
            Phase::Execution,
            Recording::new("worker", Phase::Execution, &log),
        )
        .await
        .unwrap();

    let controller = async {
        handle.wait_for_state(EngineState::Paused).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let ran_while_paused = !entries(&log).is_empty();
        assert!(handle.resume().await);
        ran_while_paused
    };

    let (summary, ran_while_paused) = tokio::join!(engine.start(), controller);
    assert!(!ran_while_paused, "execution phase ran while paused");
    assert_eq!(summary.unwrap().phases_completed, 5);
    assert_eq!(entries(&log), vec!["worker"]);
}

#[tokio::test]
async fn stop_during_run_skips_remaining_phases() {
    let log = new_log();
    let mut engine = engine();
    let handle = engine.handle();
    engine
        .register_module(
            Phase::Validation,
            Controller {
                name: "stopper".to_string(),
                phase: Phase::Validation,
                handle,
                action: ControlAction::Stop,
            },
        )
        .await
        .unwrap();
    engine
        .register_module(Phase::Cleanup, Recording::new("late", Phase::Cleanup, &log))
        .await
        .unwrap();

    let summary = engine.start().await.unwrap();
    assert!(summary.stopped_early);
    assert_eq!(summary.phases_completed, 2);
    assert!(entries(&log).is_empty());
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(engine.current_phase(), Some(Phase::Validation));
    assert_eq!(engine.stats().global.successful_executions, 1);
}

#[tokio::test]
async fn stopped_from_another_task_while_paused() {
    let mut engine = engine();
    let handle = engine.handle();
    engine
        .register_module(
            Phase::Preparation,
            Controller {
                name: "pauser".to_string(),
                phase: Phase::Preparation,
                handle: handle.clone(),
                action: ControlAction::Pause,
            },
        )
        .await
        .unwrap();

    let stopper = tokio::spawn(async move {
        handle.wait_for_state(EngineState::Paused).await;
        handle.stop().await
    });

    let summary = engine.start().await.unwrap();
    assert!(stopper.await.unwrap());
    assert!(summary.stopped_early);
    assert_eq!(summary.phases_completed, 1);
}

// ============================================================================
// Module lifecycle
// ============================================================================

#[tokio::test]
async fn setup_once_teardown_on_shutdown() {
    let mut engine = engine();
    let (tracked, setups, teardowns) = Tracked::new("tracked", Phase::Monitoring);
    engine
        .register_module(Phase::Monitoring, tracked)
        .await
        .unwrap();

    engine.start().await.unwrap();
    engine.start().await.unwrap();
    assert_eq!(setups.load(Ordering::SeqCst), 1);
    assert_eq!(
        engine.module_status("tracked").unwrap().lifecycle,
        ModuleLifecycle::Ready
    );

    engine.shutdown().await.unwrap();
    engine.shutdown().await.unwrap();
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(
        engine.module_status("tracked").unwrap().lifecycle,
        ModuleLifecycle::TornDown
    );

    // A retired module cannot run again.
    let err = engine.start().await.unwrap_err();
    let EngineError::Phase { source, .. } = err else {
        panic!("expected phase error");
    };
    assert!(matches!(*source, EngineError::InvalidState { .. }));
}

#[tokio::test]
async fn module_status_reports_outcome() {
    let mut engine = LifecycleEngine::new(phaseflow::EngineConfig {
        max_retries: 2,
        ..fast_config()
    })
    .unwrap();
    let (flaky, _) = Flaky::new("flaky", Phase::Execution, 1);
    engine
        .register_module(Phase::Execution, flaky)
        .await
        .unwrap();
    engine.start().await.unwrap();

    let status = engine.module_status("flaky").unwrap();
    assert_eq!(status.phase, Phase::Execution);
    assert_eq!(status.execution_count, 1);
    assert!(!status.running);
    assert_eq!(
        status.last_result,
        Some(ModuleOutcome::Success { attempts: 2 })
    );
    assert_eq!(status.stats["attempts"], 2);
    assert!(engine.module_status("missing").is_none());
    assert_eq!(engine.module_statuses().len(), 1);
}

#[tokio::test]
async fn registration_validation() {
    let log = new_log();
    let mut engine = engine();
    engine
        .register_module(Phase::Execution, Recording::new("a", Phase::Execution, &log))
        .await
        .unwrap();

    let dup = engine
        .register_module(Phase::Execution, Recording::new("a", Phase::Execution, &log))
        .await;
    assert!(matches!(dup, Err(EngineError::InvalidModule { .. })));

    let wrong_phase = engine
        .register_module(Phase::Cleanup, Recording::new("b", Phase::Execution, &log))
        .await;
    assert!(matches!(wrong_phase, Err(EngineError::InvalidModule { .. })));

    let empty = engine
        .register_module(Phase::Cleanup, Recording::new("", Phase::Cleanup, &log))
        .await;
    assert!(matches!(empty, Err(EngineError::InvalidModule { .. })));

    assert_eq!(engine.module_statuses().len(), 1);
}

#[tokio::test]
async fn context_values_survive_across_runs_and_seed() {
    let log = new_log();
    let mut engine = engine();
    engine.context_mut().set("seed", 7);
    engine
        .register_module(Phase::Execution, Recording::new("x", Phase::Execution, &log))
        .await
        .unwrap();

    let first = engine.start().await.unwrap();
    let ctx = engine.context().unwrap();
    assert_eq!(ctx.run_id(), first.run_id);
    assert_eq!(ctx.get_as::<i64>("seed"), Some(7));
    assert_eq!(ctx.get_as::<String>("x").as_deref(), Some("execution"));
    assert!(!ctx.events().is_empty());
}

#[tokio::test]
async fn listeners_can_be_removed() {
    let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let engine = engine();
    let counter = Arc::clone(&seen);
    let id = engine.add_event_listener(Arc::new(move |_: &phaseflow::observability::Event| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    engine.stop().await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    assert!(engine.remove_event_listener(id));
    assert!(!engine.remove_event_listener(id));
}

#[tokio::test]
async fn failed_setup_shows_in_module_status() {
    let mut engine = LifecycleEngine::new(phaseflow::EngineConfig {
        continue_on_error: true,
        ..fast_config()
    })
    .unwrap();
    let (mut tracked, setups, _) = Tracked::new("no-setup", Phase::Validation);
    tracked.fail_setup = true;
    engine
        .register_module(Phase::Validation, tracked)
        .await
        .unwrap();

    let summary = engine.start().await.unwrap();
    assert_eq!(summary.modules_failed, 1);
    assert_eq!(setups.load(Ordering::SeqCst), 1);

    let status = engine.module_status("no-setup").unwrap();
    assert_eq!(status.lifecycle, ModuleLifecycle::Unset);
    assert_eq!(status.execution_count, 0);
    assert_eq!(status.stats["attempts"], 1);
    assert_eq!(status.stats["failures"], 1);
    assert!(matches!(
        status.last_result,
        Some(ModuleOutcome::Failed { attempts: 1, ref message }) if message.contains("setup refused")
    ));

    let history = engine.event_history(None);
    let failed = events_of(&history, kinds::MODULE_FAILED, Some(EventLevel::Error));
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].source.as_deref(), Some("no-setup"));
    assert_eq!(failed[0].payload.as_ref().unwrap()["stage"], "setup");
    assert_eq!(events_of(&history, kinds::PHASE_ERROR, None).len(), 1);
}
