//! Datastore value model
//!
//! Values, hierarchical keys and records exactly as the ordered key-value
//! datastore sees them. Everything above this module (planner, executor,
//! in-memory datastore) speaks in these types.
//!
//! # Ordering
//!
//! Values of different families order by family first:
//! null < bool < number < text < timestamp < key < list.
//! Int and Float share the number family and compare numerically.

mod key;
mod record;
mod value;

pub use key::{Key, KeyId};
pub use record::Record;
pub use value::Value;

/// Reserved property addressing the record key itself.
pub const KEY_PROPERTY: &str = "__key__";

/// Reserved property addressing the ancestor restriction of a query.
pub const ANCESTOR_PROPERTY: &str = "__ancestor__";
