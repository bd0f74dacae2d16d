//! Pull-based stream primitives used by plan execution
//!
//! - [`slice`]: offset/limit over any source
//! - [`lazy`]: memoizing, index-addressable result list
//! - [`faults`]: backend fault classification and re-wrapping
//! - [`join`]: streaming merge join
//!
//! Everything here is single-threaded and lazy: nothing is pulled from a
//! source until a caller asks for it.

pub mod faults;
pub mod join;
pub mod lazy;
pub mod slice;

pub use faults::{ClassifiedFault, ErrorConvention, FaultClass, FaultObserver, FaultTranslator, Translated};
pub use join::{join_keys_of, JoinKeys, JoinParent, MergeJoin};
pub use lazy::{LazyIter, LazyListIter, LazyResult};
pub use slice::{Slice, SlicingIterable, TrySlice};
