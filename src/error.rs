//! Caller-facing errors
//!
//! [`QueryError`] is what every public compile/execute entry point returns.
//! Backend faults arrive in one of two families, selected by the active
//! [`ErrorConvention`](crate::stream::ErrorConvention); both keep the
//! classified fault as their source.
//!
//! Error codes:
//! - QUERY_*: compile, misuse and datastore-family errors
//! - PERSISTENCE_*: persistence-family errors

use thiserror::Error;

use crate::planner::{CompileError, MisuseError};
use crate::stream::ClassifiedFault;

/// Result type for query operations
pub type Result<T, E = QueryError> = std::result::Result<T, E>;

/// Datastore-family errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatastoreError {
    #[error("datastore timeout")]
    Timeout(#[source] ClassifiedFault),

    #[error("datastore failure")]
    Failure(#[source] ClassifiedFault),

    #[error("datastore rejected the request")]
    BadRequest(#[source] ClassifiedFault),

    #[error("datastore error")]
    Unknown(#[source] ClassifiedFault),
}

impl DatastoreError {
    pub fn code(&self) -> &'static str {
        match self {
            DatastoreError::Timeout(_) => "QUERY_TIMEOUT",
            DatastoreError::Failure(_) => "QUERY_DATASTORE_FAILURE",
            DatastoreError::BadRequest(_) => "QUERY_BAD_REQUEST",
            DatastoreError::Unknown(_) => "QUERY_DATASTORE_UNKNOWN",
        }
    }

    pub fn fault(&self) -> &ClassifiedFault {
        match self {
            DatastoreError::Timeout(f)
            | DatastoreError::Failure(f)
            | DatastoreError::BadRequest(f)
            | DatastoreError::Unknown(f) => f,
        }
    }
}

/// Persistence-family errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("query timed out")]
    QueryTimeout(#[source] ClassifiedFault),

    #[error("data store failure")]
    DataStoreFailure(#[source] ClassifiedFault),

    #[error("invalid request")]
    User(#[source] ClassifiedFault),

    #[error("persistence error")]
    Unknown(#[source] ClassifiedFault),
}

impl PersistenceError {
    pub fn code(&self) -> &'static str {
        match self {
            PersistenceError::QueryTimeout(_) => "PERSISTENCE_QUERY_TIMEOUT",
            PersistenceError::DataStoreFailure(_) => "PERSISTENCE_DATASTORE_FAILURE",
            PersistenceError::User(_) => "PERSISTENCE_USER_ERROR",
            PersistenceError::Unknown(_) => "PERSISTENCE_UNKNOWN",
        }
    }

    pub fn fault(&self) -> &ClassifiedFault {
        match self {
            PersistenceError::QueryTimeout(f)
            | PersistenceError::DataStoreFailure(f)
            | PersistenceError::User(f)
            | PersistenceError::Unknown(f) => f,
        }
    }
}

/// Query error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// Rejected at compile time; never reached the datastore
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Datastore(#[from] DatastoreError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Lazy result index past the end
    #[error("index {index} out of bounds for result of size {size}")]
    OutOfBounds { index: usize, size: usize },
}

impl From<MisuseError> for QueryError {
    fn from(err: MisuseError) -> Self {
        QueryError::Compile(CompileError::Misuse(err))
    }
}

impl QueryError {
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Compile(err) => err.code(),
            QueryError::Datastore(err) => err.code(),
            QueryError::Persistence(err) => err.code(),
            QueryError::OutOfBounds { .. } => "QUERY_INDEX_OUT_OF_BOUNDS",
        }
    }

    /// Returns true for deadline faults in either family
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            QueryError::Datastore(DatastoreError::Timeout(_))
                | QueryError::Persistence(PersistenceError::QueryTimeout(_))
        )
    }

    /// The classified backend fault, if this error came from the datastore
    pub fn fault(&self) -> Option<&ClassifiedFault> {
        match self {
            QueryError::Datastore(err) => Some(err.fault()),
            QueryError::Persistence(err) => Some(err.fault()),
            _ => None,
        }
    }
}
