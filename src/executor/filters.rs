//! Predicate evaluation against records
//!
//! Datastore semantics throughout:
//! - a missing property matches nothing
//! - a list property matches when any element matches
//! - inequalities only match values of the same family (no coercion)

use std::cmp::Ordering;

use crate::model::{Record, Value, ANCESTOR_PROPERTY};
use crate::planner::{CompareOp, FilterOperator, FilterPredicate, NativeFilter, Predicate};

/// Evaluates native filters and bound predicates against records
pub struct PredicateFilter;

impl PredicateFilter {
    /// Checks if a record matches all native filters (AND semantics)
    pub fn matches_native(record: &Record, filters: &[NativeFilter]) -> bool {
        filters.iter().all(|filter| match filter {
            NativeFilter::Predicate(pred) => Self::matches_filter(record, pred),
            NativeFilter::AnyOf(preds) => preds.iter().any(|p| Self::matches_filter(record, p)),
        })
    }

    /// Checks a single native filter predicate
    pub fn matches_filter(record: &Record, pred: &FilterPredicate) -> bool {
        let Some(actual) = record.value_of(&pred.property) else {
            return false;
        };
        let mut elements = actual.elements();
        match pred.operator {
            FilterOperator::Eq => elements.any(|v| v == &pred.value),
            FilterOperator::In => elements.any(|v| pred.values().contains(v)),
            FilterOperator::Lt => elements.any(|v| ordered(v, &pred.value) == Some(Ordering::Less)),
            FilterOperator::Le => elements.any(|v| {
                matches!(ordered(v, &pred.value), Some(Ordering::Less | Ordering::Equal))
            }),
            FilterOperator::Gt => {
                elements.any(|v| ordered(v, &pred.value) == Some(Ordering::Greater))
            }
            FilterOperator::Ge => elements.any(|v| {
                matches!(ordered(v, &pred.value), Some(Ordering::Greater | Ordering::Equal))
            }),
        }
    }

    /// Checks a bound predicate tree
    pub fn matches(record: &Record, pred: &Predicate) -> bool {
        match pred {
            Predicate::And(items) => items.iter().all(|p| Self::matches(record, p)),
            Predicate::Or(items) => items.iter().any(|p| Self::matches(record, p)),
            Predicate::Not(inner) => !Self::matches(record, inner),
            Predicate::Compare { property, op, value } if property == ANCESTOR_PROPERTY => {
                let is_descendant = value
                    .as_key()
                    .map_or(false, |ancestor| record.key().is_descendant_of(ancestor));
                match op {
                    CompareOp::Eq => is_descendant,
                    CompareOp::Ne => !is_descendant,
                    _ => false,
                }
            }
            Predicate::Compare { property, op, value } => {
                let Some(actual) = record.value_of(property) else {
                    return false;
                };
                let mut elements = actual.elements();
                match op {
                    CompareOp::Eq => elements.any(|v| v == value),
                    CompareOp::Ne => elements.any(|v| {
                        matches!(ordered(v, value), Some(Ordering::Less | Ordering::Greater))
                    }),
                    CompareOp::Lt => elements.any(|v| ordered(v, value) == Some(Ordering::Less)),
                    CompareOp::Le => elements.any(|v| {
                        matches!(ordered(v, value), Some(Ordering::Less | Ordering::Equal))
                    }),
                    CompareOp::Gt => elements.any(|v| ordered(v, value) == Some(Ordering::Greater)),
                    CompareOp::Ge => elements.any(|v| {
                        matches!(ordered(v, value), Some(Ordering::Greater | Ordering::Equal))
                    }),
                }
            }
            Predicate::In { property, values } => record
                .value_of(property)
                .map_or(false, |actual| actual.elements().any(|v| values.contains(v))),
            Predicate::Like { property, pattern } => Self::any_text(record, property, |text| {
                like_matches(text, pattern)
            }),
            Predicate::StartsWith { property, prefix } => {
                Self::any_text(record, property, |text| text.starts_with(prefix.as_str()))
            }
        }
    }

    fn any_text(record: &Record, property: &str, test: impl Fn(&str) -> bool) -> bool {
        record.value_of(property).map_or(false, |actual| {
            actual.elements().filter_map(Value::as_text).any(|text| test(text))
        })
    }
}

/// Ordering between same-family values; None across families
fn ordered(actual: &Value, bound: &Value) -> Option<Ordering> {
    actual.same_family(bound).then(|| actual.compare(bound))
}

/// SQL LIKE: `%` matches any run of characters, `_` exactly one
pub fn like_matches(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    // Greedy matcher with single backtrack point at the last '%'
    let (mut t, mut p) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                star = Some((p, t));
                p += 1;
            }
            Some('_') => {
                t += 1;
                p += 1;
            }
            Some(c) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match star {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    star = Some((star_p, star_t + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}
