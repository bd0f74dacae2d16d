//! Streaming merge join
//!
//! Filters an ordered stream of parent candidates down to those with at
//! least one join key present in a child key stream sorted ascending.
//! One forward pass over both inputs; children are pulled only as far as
//! needed to decide the parent at hand, so a consumer that stops early
//! stops the child stream too.
//!
//! The child stream must be strictly ascending. Unsorted children give
//! wrong matches, not a panic.

use std::collections::BTreeSet;

use crate::model::{Key, Record, Value};

/// Anything exposing one or more ordered join-key values
pub trait JoinKeys {
    fn join_keys(&self) -> Vec<&Key>;
}

/// A parent record joined through one of its properties
#[derive(Debug, Clone, PartialEq)]
pub struct JoinParent<'p> {
    pub record: Record,
    pub property: &'p str,
}

impl JoinKeys for JoinParent<'_> {
    fn join_keys(&self) -> Vec<&Key> {
        join_keys_of(&self.record, self.property)
    }
}

/// Keys held by a record property: a single key, or the keys in a list
/// value. Other values hold no keys.
pub fn join_keys_of<'r>(record: &'r Record, property: &str) -> Vec<&'r Key> {
    match record.get(property) {
        Some(Value::Key(key)) => vec![key],
        Some(Value::List(items)) => items.iter().filter_map(Value::as_key).collect(),
        _ => Vec::new(),
    }
}

/// Merge join iterator
pub struct MergeJoin<P, C> {
    parents: P,
    children: C,
    current: Option<Key>,
    children_done: bool,
    materialized: BTreeSet<Key>,
    failed: bool,
}

impl<P, C> MergeJoin<P, C> {
    pub fn new(parents: P, children: C) -> Self {
        Self {
            parents,
            children,
            current: None,
            children_done: false,
            materialized: BTreeSet::new(),
            failed: false,
        }
    }

    /// Child keys consumed so far
    pub fn materialized_keys(&self) -> &BTreeSet<Key> {
        &self.materialized
    }
}

impl<T, E, P, C> MergeJoin<P, C>
where
    P: Iterator<Item = Result<T, E>>,
    C: Iterator<Item = Result<Key, E>>,
    T: JoinKeys,
{
    /// Advances the child cursor until it reaches `key` or runs out
    fn advance_to(&mut self, key: &Key) -> Result<(), E> {
        while !self.children_done && self.current.as_ref().map_or(true, |current| key > current) {
            match self.children.next() {
                Some(Ok(child)) => {
                    self.materialized.insert(child.clone());
                    self.current = Some(child);
                }
                Some(Err(err)) => return Err(err),
                None => self.children_done = true,
            }
        }
        Ok(())
    }

    fn matches(&mut self, parent: &T) -> Result<bool, E> {
        for key in parent.join_keys() {
            self.advance_to(key)?;
            if self.materialized.contains(key) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl<T, E, P, C> Iterator for MergeJoin<P, C>
where
    P: Iterator<Item = Result<T, E>>,
    C: Iterator<Item = Result<Key, E>>,
    T: JoinKeys,
{
    type Item = Result<T, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let parent = match self.parents.next()? {
                Ok(parent) => parent,
                Err(err) => return Some(Err(err)),
            };
            match self.matches(&parent) {
                Ok(true) => return Some(Ok(parent)),
                Ok(false) => continue,
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
