//! CLI error types
//!
//! Every CLI error is fatal: it is written as a JSON error object and the
//! process exits non-zero.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::error::QueryError;
use crate::planner::MisuseError;

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("invalid request: {0}")]
    Request(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    pub fn code(&self) -> &'static str {
        match self {
            CliError::Config(err) => err.code(),
            CliError::Query(err) => err.code(),
            CliError::Request(_) => "CLI_INVALID_REQUEST",
            CliError::Io(_) => "CLI_IO_ERROR",
            CliError::Json(_) => "CLI_JSON_ERROR",
        }
    }

    pub(crate) fn request(message: impl Into<String>) -> Self {
        CliError::Request(message.into())
    }
}

impl From<MisuseError> for CliError {
    fn from(err: MisuseError) -> Self {
        CliError::Query(err.into())
    }
}
