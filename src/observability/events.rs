//! Observable events
//!
//! Events are explicit and typed. Each has a fixed name and severity.

use std::fmt;

use super::logger::Severity;

/// Observable events in query processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    /// Configuration loaded
    ConfigLoaded,
    /// Dataset loaded into the in-memory datastore
    DatasetLoaded,

    // Compilation
    /// Query compiled to a plan
    QueryCompiled,
    /// Query rejected at compile time
    QueryRejected,
    /// Plan falls back to client-side evaluation
    InMemoryFallback,

    // Execution
    /// Plan executed to completion
    QueryExecuted,
    /// Backend fault surfaced while executing
    BackendFault,
    /// Bulk delete finished
    BulkDelete,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::DatasetLoaded => "DATASET_LOADED",
            Event::QueryCompiled => "QUERY_COMPILED",
            Event::QueryRejected => "QUERY_REJECTED",
            Event::InMemoryFallback => "IN_MEMORY_FALLBACK",
            Event::QueryExecuted => "QUERY_EXECUTED",
            Event::BackendFault => "BACKEND_FAULT",
            Event::BulkDelete => "BULK_DELETE",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Event::QueryRejected | Event::InMemoryFallback => Severity::Warn,
            Event::BackendFault => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
