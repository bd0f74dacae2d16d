//! Datastore collaborator
//!
//! The ordered key-value datastore the planner compiles for. Only the
//! contract lives here, plus an in-memory implementation used by the CLI
//! and by tests.
//!
//! Every call carries the caller's [`QueryConfig`] unchanged and fails with
//! a [`BackendFault`]. Query dispatch returns immediately; records are
//! produced as the returned stream is pulled, and a fault may surface on
//! any pull.

mod errors;
mod memory;

pub use errors::{BackendFault, DatastoreResult};
pub use memory::{FaultPoint, MemoryDatastore};

use crate::config::QueryConfig;
use crate::model::{Key, Record};
use crate::planner::NativeQuery;

/// Record stream of one dispatched native query
pub type QueryStream<'a> = Box<dyn Iterator<Item = DatastoreResult<Record>> + 'a>;

/// Ordered key-value datastore
pub trait Datastore {
    /// Dispatches a native query
    fn run_query(&self, query: &NativeQuery, config: &QueryConfig) -> DatastoreResult<QueryStream<'_>>;

    /// Looks up records by key, in key order given, skipping missing keys
    fn batch_get(&self, keys: &[Key], config: &QueryConfig) -> DatastoreResult<Vec<Record>>;

    /// Counts the results of a native query, honoring its offset and limit
    fn count(&self, query: &NativeQuery, config: &QueryConfig) -> DatastoreResult<u64> {
        let mut keys_only = query.clone();
        keys_only.keys_only = true;
        keys_only.projection.clear();

        let mut count = 0;
        for record in self.run_query(&keys_only, config)? {
            record?;
            count += 1;
        }
        Ok(count)
    }

    /// Deletes records by key, returning how many existed
    fn delete(&self, keys: &[Key], config: &QueryConfig) -> DatastoreResult<u64>;
}
