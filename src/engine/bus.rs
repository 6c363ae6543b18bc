//! Event bus: bounded history, listener fan-out and observer notification.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::observability::events::{Event, EventBuilder, EventLevel};
use crate::observability::metrics;

use super::context::{Context, RunJournal};
use super::observer::{ObserverHook, PhaseObserver};
use super::phase::Phase;

/// Receives every event emitted by the engine.
///
/// The emitting call waits for `on_event` to finish before returning.
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Handles one event.
    async fn on_event(&self, event: &Event);
}

#[async_trait]
impl<F> EventListener for F
where
    F: Fn(&Event) + Send + Sync,
{
    async fn on_event(&self, event: &Event) {
        self(event);
    }
}

/// Handle returned by listener registration, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Handle returned by observer registration, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Records, stores and distributes engine events.
pub struct EventBus {
    debug_logging: bool,
    save_history: bool,
    max_history: usize,
    sequence: AtomicU64,
    registrations: AtomicU64,
    history: Mutex<VecDeque<Event>>,
    journal: Mutex<Option<Arc<RunJournal>>>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn EventListener>)>>,
    observers: Mutex<Vec<(ObserverId, Arc<dyn PhaseObserver>)>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .field("max_history", &self.max_history)
            .field("save_history", &self.save_history)
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Creates a bus configured from the engine config.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            debug_logging: config.enable_debug_logging,
            save_history: config.save_history,
            max_history: config.max_history_size,
            sequence: AtomicU64::new(0),
            registrations: AtomicU64::new(0),
            history: Mutex::new(VecDeque::with_capacity(config.max_history_size.min(1024))),
            journal: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Routes subsequent events into the given context's event list.
    pub(crate) fn attach(&self, ctx: &Context) {
        if let Ok(mut journal) = self.journal.lock() {
            *journal = Some(ctx.journal());
        }
    }

    // ------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------

    /// Seals `draft` into an event, stores it and awaits every listener.
    ///
    /// Returns the emitted event.
    pub async fn emit(&self, draft: EventBuilder) -> Event {
        let event = self.record(draft);
        self.log(&event);
        metrics::record_event(event.level);

        let listeners: Vec<Arc<dyn EventListener>> = self
            .listeners
            .lock()
            .map(|l| l.iter().map(|(_, listener)| Arc::clone(listener)).collect())
            .unwrap_or_default();
        if !listeners.is_empty() {
            join_all(listeners.iter().map(|l| l.on_event(&event))).await;
        }

        event
    }

    /// Assigns the id and appends to history and the live journal.
    ///
    /// The history lock is held across id assignment so ids and history
    /// order never disagree.
    fn record(&self, draft: EventBuilder) -> Event {
        let mut history = self
            .history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = self.sequence.fetch_add(1, Ordering::SeqCst);
        let event = draft.build(id, Utc::now());

        if self.save_history {
            while history.len() >= self.max_history.max(1) {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        if let Ok(journal) = self.journal.lock() {
            if let Some(journal) = journal.as_ref() {
                journal.push_event(event.clone());
            }
        }
        drop(history);

        event
    }

    fn log(&self, event: &Event) {
        let phase = event.phase.map(Phase::as_str).unwrap_or_default();
        let source = event.source.as_deref().unwrap_or_default();
        match event.level {
            EventLevel::Debug => {
                if self.debug_logging {
                    debug!(id = event.id, event_type = %event.event_type, phase, source, "{}", event.description);
                }
            }
            EventLevel::Info => {
                info!(id = event.id, event_type = %event.event_type, phase, source, "{}", event.description);
            }
            EventLevel::Warn => {
                warn!(id = event.id, event_type = %event.event_type, phase, source, "{}", event.description);
            }
            EventLevel::Error | EventLevel::Critical => {
                error!(id = event.id, level = %event.level, event_type = %event.event_type, phase, source, "{}", event.description);
            }
        }
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Returns up to `limit` of the most recent events, oldest first.
    ///
    /// `None` returns the whole history.
    #[must_use]
    pub fn history(&self, limit: Option<usize>) -> Vec<Event> {
        let Ok(history) = self.history.lock() else {
            return Vec::new();
        };
        let skip = limit.map_or(0, |l| history.len().saturating_sub(l));
        history.iter().skip(skip).cloned().collect()
    }

    /// Total number of events emitted, including evicted ones.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    fn next_registration(&self) -> u64 {
        self.registrations.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a listener invoked for every event.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = ListenerId(self.next_registration());
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, listener));
        }
        id
    }

    /// Removes a listener. Returns `false` if `id` was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.lock().is_ok_and(|mut listeners| {
            let before = listeners.len();
            listeners.retain(|(lid, _)| *lid != id);
            listeners.len() != before
        })
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Registers a phase observer.
    pub fn add_observer(&self, observer: Arc<dyn PhaseObserver>) -> ObserverId {
        let id = ObserverId(self.next_registration());
        if let Ok(mut observers) = self.observers.lock() {
            observers.push((id, observer));
        }
        id
    }

    /// Removes an observer. Returns `false` if `id` was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.lock().is_ok_and(|mut observers| {
            let before = observers.len();
            observers.retain(|(oid, _)| *oid != id);
            observers.len() != before
        })
    }

    fn observer_snapshot(&self) -> Vec<Arc<dyn PhaseObserver>> {
        self.observers
            .lock()
            .map(|o| o.iter().map(|(_, observer)| Arc::clone(observer)).collect())
            .unwrap_or_default()
    }

    /// Invokes `hook` on every observer, in registration order.
    pub async fn notify_hook(&self, hook: ObserverHook, ctx: &Context) {
        for observer in self.observer_snapshot() {
            hook.dispatch(observer.as_ref(), ctx).await;
        }
    }

    /// Invokes the error hook on every observer, in registration order.
    pub async fn notify_error(&self, error: &EngineError, phase: Phase) {
        for observer in self.observer_snapshot() {
            observer.on_error(error, phase).await;
        }
    }
}
