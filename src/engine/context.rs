//! Run-scoped shared context.
//!
//! A single [`Context`] is handed to every module invocation. Modules in
//! later phases read what modules in earlier phases wrote. The engine owns
//! the context and is the only writer of the phase markers; modules mutate
//! the key/value map through the accessors below.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::observability::events::Event;

use super::phase::Phase;

/// A failure recorded into the context by the phase runner.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedError {
    /// Phase in which the failure happened
    pub phase: Phase,
    /// Module that failed
    pub module: String,
    /// Error kind (`ModuleTimeoutError`, `ModuleExecutionError`, ...)
    pub kind: &'static str,
    /// Rendered error message
    pub message: String,
    /// When the failure was recorded
    pub timestamp: DateTime<Utc>,
}

/// Append-only event and error lists for one context.
///
/// Shared with the event bus so that events emitted from an
/// [`EngineHandle`](super::EngineHandle) also land in the live context.
#[derive(Debug, Default)]
pub struct RunJournal {
    events: Mutex<Vec<Event>>,
    errors: Mutex<Vec<RecordedError>>,
}

impl RunJournal {
    pub(crate) fn push_event(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    pub(crate) fn push_error(&self, error: RecordedError) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(error);
        }
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn errors(&self) -> Vec<RecordedError> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

/// Shared key/value store plus phase markers for one engine.
#[derive(Debug)]
pub struct Context {
    run_id: Uuid,
    current_phase: Option<Phase>,
    previous_phase: Option<Phase>,
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
    phase_entered_at: BTreeMap<Phase, DateTime<Utc>>,
    values: HashMap<String, Value>,
    journal: Arc<RunJournal>,
    cancel: CancellationToken,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Creates an empty context stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            current_phase: None,
            previous_phase: None,
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
            phase_entered_at: BTreeMap::new(),
            values: HashMap::new(),
            journal: Arc::new(RunJournal::default()),
            cancel: CancellationToken::new(),
        }
    }

    // ------------------------------------------------------------------
    // Key/value store
    // ------------------------------------------------------------------

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns the value under `key` deserialized into `T`.
    ///
    /// Returns `None` when the key is missing or has an incompatible shape.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Stores `value` under `key`, returning the value it replaced.
    ///
    /// Last write wins.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Removes `key`, returning its value.
    pub fn delete(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Removes every key.
    ///
    /// Nothing stops a module from clearing data a later phase still needs;
    /// that coordination is up to the module authors.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over stored keys in arbitrary order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    // ------------------------------------------------------------------
    // Phase markers
    // ------------------------------------------------------------------

    /// Identifier of this context, stable for its lifetime.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Phase currently executing.
    #[must_use]
    pub const fn current_phase(&self) -> Option<Phase> {
        self.current_phase
    }

    /// Phase that was active before the last transition.
    #[must_use]
    pub const fn previous_phase(&self) -> Option<Phase> {
        self.previous_phase
    }

    /// Wall-clock creation time.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at_utc
    }

    /// Monotonic time since creation.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// When `phase` was last entered, if it has been.
    #[must_use]
    pub fn phase_entered_at(&self, phase: Phase) -> Option<DateTime<Utc>> {
        self.phase_entered_at.get(&phase).copied()
    }

    /// Records entry into `phase`. Called exactly once per phase entry,
    /// before any module of that phase runs.
    pub(crate) fn enter_phase(&mut self, phase: Phase) {
        self.previous_phase = self.current_phase;
        self.current_phase = Some(phase);
        self.phase_entered_at.insert(phase, Utc::now());
    }

    // ------------------------------------------------------------------
    // Journal
    // ------------------------------------------------------------------

    /// Snapshot of every event emitted while this context was live.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.journal.events()
    }

    /// Snapshot of every failure recorded by the phase runner.
    #[must_use]
    pub fn errors(&self) -> Vec<RecordedError> {
        self.journal.errors()
    }

    pub(crate) fn journal(&self) -> Arc<RunJournal> {
        Arc::clone(&self.journal)
    }

    pub(crate) fn record_error(&self, error: RecordedError) {
        self.journal.push_error(error);
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// Token cancelled when the current attempt is abandoned.
    ///
    /// Attempts that time out are dropped at their next await point.
    /// Work a module has spawned elsewhere keeps running unless it watches
    /// this token; cleaning that work up is the module's job.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Installs a fresh token for the next attempt and returns it.
    pub(crate) fn begin_attempt(&mut self) -> CancellationToken {
        self.cancel = CancellationToken::new();
        self.cancel.clone()
    }
}
