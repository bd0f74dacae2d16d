//! Plan execution
//!
//! Consumes compiled plans and produces lazily materialized results.
//!
//! - [`QueryExecutor`]: runs each plan strategy against a datastore
//! - [`PredicateFilter`]: client-side predicate evaluation
//! - [`ResultSorter`]: client-side sort with datastore ordering rules
//! - [`QueryResult`]: lazy rows plus the resumption cursor

mod executor;
mod filters;
mod result;
mod sorter;

pub use executor::QueryExecutor;
pub use filters::{like_matches, PredicateFilter};
pub use result::{QueryOutput, QueryResult, RowsPage};
pub use sorter::ResultSorter;
