//! Record sorting
//!
//! Sort is stable and deterministic: ties on every sort property fall back
//! to key order. A list property sorts by its smallest element ascending
//! and by its largest element descending, as the datastore index does.

use std::cmp::Ordering;

use crate::model::{Record, Value};
use crate::planner::{SortDirection, SortPredicate};

/// Sorts records by sort predicates
pub struct ResultSorter;

impl ResultSorter {
    pub fn sort(records: &mut [Record], sorts: &[SortPredicate]) {
        records.sort_by(|a, b| Self::compare(a, b, sorts));
    }

    pub fn compare(a: &Record, b: &Record, sorts: &[SortPredicate]) -> Ordering {
        for sort in sorts {
            let a_val = Self::sort_value(a, sort);
            let b_val = Self::sort_value(b, sort);

            // Missing properties order first
            let ordering = match (&a_val, &b_val) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => x.compare(y),
            };

            let ordering = match sort.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.key().cmp(b.key())
    }

    /// Returns true if the record holds every sorted property. Records
    /// missing one are not part of a sorted result.
    pub fn has_sort_values(record: &Record, sorts: &[SortPredicate]) -> bool {
        sorts.iter().all(|s| record.value_of(&s.property).is_some())
    }

    /// The value a record sorts by for one sort predicate
    pub fn sort_value(record: &Record, sort: &SortPredicate) -> Option<Value> {
        let value = record.value_of(&sort.property)?;
        let elements = value.elements();
        let picked = match sort.direction {
            SortDirection::Asc => elements.min_by(|x, y| x.compare(y)),
            SortDirection::Desc => elements.max_by(|x, y| x.compare(y)),
        };
        picked.cloned()
    }
}
