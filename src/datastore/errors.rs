//! Backend fault vocabulary
//!
//! Faults raised by a datastore call, either at dispatch or mid-stream.
//! Callers never see these directly; `stream::faults` classifies and
//! re-wraps them.

use thiserror::Error;

/// Result type for datastore calls
pub type DatastoreResult<T> = Result<T, BackendFault>;

/// Native datastore fault
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendFault {
    /// The request was rejected as malformed
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The call exceeded its deadline
    #[error("deadline exceeded: {0}")]
    Timeout(String),

    /// The backend failed internally
    #[error("internal failure: {0}")]
    InternalFailure(String),

    /// Anything outside the known vocabulary
    #[error("backend error: {0}")]
    Other(String),
}

impl BackendFault {
    pub fn code(&self) -> &'static str {
        match self {
            BackendFault::BadRequest(_) => "BAD_REQUEST",
            BackendFault::Timeout(_) => "DEADLINE_EXCEEDED",
            BackendFault::InternalFailure(_) => "INTERNAL",
            BackendFault::Other(_) => "UNKNOWN",
        }
    }
}
