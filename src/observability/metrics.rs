//! Metrics registry
//!
//! - Counters only
//! - Monotonic increase
//! - Reset only on process start

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::{log_event, Event};
use crate::datastore::BackendFault;
use crate::stream::{FaultClass, FaultObserver};

/// Operational counters for planning and execution
///
/// All counters use Relaxed atomics; values are exact once the process is
/// quiescent.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    queries_compiled: AtomicU64,
    queries_rejected: AtomicU64,
    queries_executed: AtomicU64,
    in_memory_fallbacks: AtomicU64,
    records_deleted: AtomicU64,
    timeouts: AtomicU64,
    backend_failures: AtomicU64,
    user_errors: AtomicU64,
    unknown_faults: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_queries_compiled(&self) {
        self.queries_compiled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_queries_rejected(&self) {
        self.queries_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_queries_executed(&self) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_in_memory_fallbacks(&self) {
        self.in_memory_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_records_deleted(&self, count: u64) {
        self.records_deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_fault(&self, class: FaultClass) {
        let counter = match class {
            FaultClass::Timeout => &self.timeouts,
            FaultClass::BackendFailure => &self.backend_failures,
            FaultClass::UserError => &self.user_errors,
            FaultClass::Unknown => &self.unknown_faults,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queries_executed(&self) -> u64 {
        self.queries_executed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_compiled: self.queries_compiled.load(Ordering::Relaxed),
            queries_rejected: self.queries_rejected.load(Ordering::Relaxed),
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            in_memory_fallbacks: self.in_memory_fallbacks.load(Ordering::Relaxed),
            records_deleted: self.records_deleted.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            backend_failures: self.backend_failures.load(Ordering::Relaxed),
            user_errors: self.user_errors.load(Ordering::Relaxed),
            unknown_faults: self.unknown_faults.load(Ordering::Relaxed),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

impl FaultObserver for MetricsRegistry {
    fn on_fault(&self, class: FaultClass, fault: &BackendFault) {
        self.increment_fault(class);
        log_event(
            Event::BackendFault,
            &[
                ("class", class.as_str()),
                ("code", fault.code()),
                ("message", &fault.to_string()),
            ],
        );
    }
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queries_compiled: u64,
    pub queries_rejected: u64,
    pub queries_executed: u64,
    pub in_memory_fallbacks: u64,
    pub records_deleted: u64,
    pub timeouts: u64,
    pub backend_failures: u64,
    pub user_errors: u64,
    pub unknown_faults: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = MetricsRegistry::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queries_executed, 0);
        assert_eq!(snapshot.timeouts, 0);
    }

    #[test]
    fn test_increments() {
        let metrics = MetricsRegistry::new();
        metrics.increment_queries_compiled();
        metrics.increment_queries_executed();
        metrics.increment_queries_executed();
        metrics.add_records_deleted(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queries_compiled, 1);
        assert_eq!(snapshot.queries_executed, 2);
        assert_eq!(snapshot.records_deleted, 3);
    }

    #[test]
    fn test_fault_observer_counts_by_class() {
        let metrics = MetricsRegistry::new();
        metrics.on_fault(FaultClass::Timeout, &BackendFault::Timeout("slow".into()));
        metrics.on_fault(
            FaultClass::UserError,
            &BackendFault::BadRequest("bad".into()),
        );

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.user_errors, 1);
        assert_eq!(snapshot.backend_failures, 0);
    }

    #[test]
    fn test_to_json() {
        let metrics = MetricsRegistry::new();
        metrics.increment_queries_rejected();
        let json: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(json["queries_rejected"], 1);
        assert_eq!(json["in_memory_fallbacks"], 0);
    }
}
