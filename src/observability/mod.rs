//! Observability: structured events, logging and metrics.

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{Event, EventBuilder, EventLevel, JsonlSink};
pub use logging::{LogFormat, LogSettings};
pub use metrics::init_metrics;
