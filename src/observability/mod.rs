//! Observability
//!
//! - Structured logging (JSON lines on stderr)
//! - Counter metrics
//! - Named events for planning and execution milestones
//!
//! Observability is read-only: nothing here changes query results.
//!
//! ```ignore
//! use kvquery::observability::{log_event, Event, MetricsRegistry};
//!
//! log_event(Event::QueryExecuted, &[("strategy", "MERGE_JOIN")]);
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_queries_executed();
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Logs an event at its own severity
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
