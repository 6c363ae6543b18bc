//! Structured event records and the JSONL event sink.
//!
//! Every mutating engine action produces an [`Event`]. Events are immutable
//! once emitted and carry a monotonically increasing id assigned by the
//! event bus, which gives consumers a total order.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::engine::Phase;
use crate::engine::bus::EventListener;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Event severity, totally ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    /// Diagnostic detail, only surfaced with debug logging enabled.
    Debug,
    /// Normal lifecycle progress.
    Info,
    /// Recoverable problem (e.g. a retry).
    Warn,
    /// Failure of a module or phase.
    Error,
    /// Failure that aborted the engine.
    Critical,
}

impl EventLevel {
    /// Returns the lowercase label used for metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Well-known event types
// ---------------------------------------------------------------------------

/// Event type tags emitted by the engine itself.
///
/// The tag is free-form; modules and embedders may emit their own.
pub mod kinds {
    /// `initialize()` began.
    pub const ENGINE_INITIALIZING: &str = "engine_initializing";
    /// Initialization phase finished successfully.
    pub const ENGINE_INITIALIZED: &str = "engine_initialized";
    /// A `start()` run began.
    pub const ENGINE_STARTED: &str = "engine_started";
    /// A `start()` run finished all phases.
    pub const ENGINE_COMPLETED: &str = "engine_completed";
    /// Engine paused.
    pub const ENGINE_PAUSED: &str = "engine_paused";
    /// Engine resumed.
    pub const ENGINE_RESUMED: &str = "engine_resumed";
    /// Engine stopped.
    pub const ENGINE_STOPPED: &str = "engine_stopped";
    /// Initialization or a run aborted.
    pub const ENGINE_FAILED: &str = "engine_failed";
    /// A phase was entered.
    pub const PHASE_START: &str = "phase_start";
    /// A phase finished without aborting.
    pub const PHASE_COMPLETE: &str = "phase_complete";
    /// A module's setup completed.
    pub const MODULE_SETUP: &str = "module_setup";
    /// A module's run completed.
    pub const MODULE_COMPLETED: &str = "module_completed";
    /// A failed attempt will be retried.
    pub const MODULE_RETRY: &str = "module_retry";
    /// A module exhausted its attempts.
    pub const MODULE_FAILED: &str = "module_failed";
    /// A module was torn down.
    pub const MODULE_TEARDOWN: &str = "module_teardown";
    /// A module was registered.
    pub const MODULE_REGISTERED: &str = "module_registered";
    /// A phase recorded a module failure.
    pub const PHASE_ERROR: &str = "phase_error";
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// An immutable, timestamped, severity-tagged record of an engine action.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Unique, monotonically increasing id.
    pub id: u64,
    /// Phase active when the event was emitted, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Free-form type tag (see [`kinds`]).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Short human-readable name.
    pub name: String,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// Longer description.
    pub description: String,
    /// Severity.
    pub level: EventLevel,
    /// Optional structured payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Identifier of the component or module that caused the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Duration of the operation the event reports on.
    #[serde(
        rename = "duration_ms",
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_duration_ms"
    )]
    pub duration: Option<Duration>,
}

#[allow(clippy::ref_option)]
fn serialize_duration_ms<S: Serializer>(
    duration: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match duration {
        Some(d) => serializer.serialize_f64(d.as_secs_f64() * 1000.0),
        None => serializer.serialize_none(),
    }
}

/// Everything about an event except the bus-assigned id and timestamp.
///
/// ```
/// use phaseflow::observability::events::{EventBuilder, EventLevel, kinds};
///
/// let draft = EventBuilder::new(kinds::ENGINE_PAUSED, "Engine paused", EventLevel::Info)
///     .description("paused at phase boundary");
/// assert_eq!(draft.level(), EventLevel::Info);
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct EventBuilder {
    phase: Option<Phase>,
    event_type: String,
    name: String,
    description: String,
    level: EventLevel,
    payload: Option<serde_json::Value>,
    source: Option<String>,
    duration: Option<Duration>,
}

impl EventBuilder {
    /// Starts a new event with the required fields.
    pub fn new(event_type: impl Into<String>, name: impl Into<String>, level: EventLevel) -> Self {
        Self {
            phase: None,
            event_type: event_type.into(),
            name: name.into(),
            description: String::new(),
            level,
            payload: None,
            source: None,
            duration: None,
        }
    }

    /// Sets the phase.
    pub const fn phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Sets the phase when one is known.
    pub const fn maybe_phase(mut self, phase: Option<Phase>) -> Self {
        self.phase = phase;
        self
    }

    /// Sets the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attaches a structured payload.
    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the source identifier.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the reported duration.
    pub const fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Returns the severity this event will carry.
    #[must_use]
    pub const fn level(&self) -> EventLevel {
        self.level
    }

    /// Seals the draft into an immutable [`Event`].
    #[must_use]
    pub fn build(self, id: u64, timestamp: DateTime<Utc>) -> Event {
        Event {
            id,
            phase: self.phase,
            event_type: self.event_type,
            name: self.name,
            timestamp,
            description: self.description,
            level: self.level,
            payload: self.payload,
            source: self.source,
            duration: self.duration,
        }
    }
}

// ---------------------------------------------------------------------------
// JSONL sink
// ---------------------------------------------------------------------------

/// Event listener that writes each event as one line of JSON.
///
/// Serialization or I/O failures are silently dropped because
/// observability must never fail an engine run.
pub struct JsonlSink {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
}

// Box<dyn Write> is not Debug.
impl std::fmt::Debug for JsonlSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlSink").finish_non_exhaustive()
    }
}

impl JsonlSink {
    /// Creates a sink that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
        }
    }

    /// Creates a sink that writes to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Creates a sink that appends to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created or opened.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Writes one event line and flushes.
    pub fn write_event(&self, event: &Event) {
        if let Ok(mut w) = self.writer.lock() {
            if let Ok(line) = serde_json::to_string(event) {
                let _ = writeln!(w, "{line}");
                let _ = w.flush();
            }
        }
    }
}

#[async_trait::async_trait]
impl EventListener for JsonlSink {
    async fn on_event(&self, event: &Event) {
        self.write_event(event);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
