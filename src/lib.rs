//! kvquery - query compilation and execution over an ordered key-value datastore
//!
//! Queries are compiled into one of a few execution strategies the
//! datastore can serve (a single native query, a key batch get, a streaming
//! merge join, a count) or rejected with a precise reason. Optional
//! client-side fallbacks cover filters and joins the datastore cannot
//! express. Results are lazy and backend faults are translated into one
//! caller-facing error family.

pub mod cli;
pub mod config;
pub mod datastore;
pub mod error;
pub mod executor;
pub mod model;
pub mod observability;
pub mod planner;
pub mod stream;

pub use error::{QueryError, Result};
