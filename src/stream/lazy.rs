//! Lazy, memoizing result list
//!
//! A [`LazyResult`] owns one forward-only source and resolves elements on
//! demand into a cache. Each source element is pulled and transformed at
//! most once. Backward traversal reads the cache only.
//!
//! Two instances are equal only if they are the same instance: value
//! equality over a partially consumed, possibly unbounded source is not
//! well defined.

use std::fmt;

use crate::error::{QueryError, Result};

type Source<'a, T> = Box<dyn Iterator<Item = Result<T>> + 'a>;

/// Index-addressable view over a single-pass source
pub struct LazyResult<'a, T> {
    source: Option<Source<'a, T>>,
    cache: Vec<T>,
    sized: bool,
}

impl<'a, T> LazyResult<'a, T> {
    /// Wraps `source`, applying `transform` to each element as it is pulled
    pub fn new<S, I, F>(source: I, mut transform: F) -> Self
    where
        I: Iterator<Item = Result<S>> + 'a,
        F: FnMut(S) -> T + 'a,
    {
        let source = source.map(move |item| item.map(&mut transform));
        Self {
            source: Some(Box::new(source)),
            cache: Vec::new(),
            sized: false,
        }
    }

    /// Result over an already-materialized sequence
    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            source: None,
            cache: items,
            sized: false,
        }
    }

    /// Pulls one element into the cache. Returns false once exhausted.
    fn resolve_next(&mut self) -> Result<bool> {
        let Some(source) = self.source.as_mut() else {
            return Ok(false);
        };
        match source.next() {
            Some(Ok(item)) => {
                self.cache.push(item);
                Ok(true)
            }
            Some(Err(err)) => Err(err),
            None => {
                self.source = None;
                Ok(false)
            }
        }
    }

    fn resolve_to(&mut self, index: usize) -> Result<bool> {
        while self.cache.len() <= index {
            if !self.resolve_next()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Element at `index`, resolving further source elements as needed
    pub fn get(&mut self, index: usize) -> Result<&T> {
        if !self.resolve_to(index)? {
            return Err(QueryError::OutOfBounds {
                index,
                size: self.cache.len(),
            });
        }
        Ok(&self.cache[index])
    }

    /// Total element count. Resolves the whole source on first call.
    pub fn size(&mut self) -> Result<usize> {
        while self.resolve_next()? {}
        self.sized = true;
        Ok(self.cache.len())
    }

    /// Number of elements resolved so far
    pub fn resolved(&self) -> usize {
        self.cache.len()
    }

    /// Returns true once the source has been drained
    pub fn is_exhausted(&self) -> bool {
        self.source.is_none()
    }

    /// Returns true if `size()` has materialized the whole result
    pub fn is_sized(&self) -> bool {
        self.sized
    }

    /// Resolves everything and returns the elements
    pub fn into_vec(mut self) -> Result<Vec<T>> {
        self.size()?;
        Ok(self.cache)
    }

    /// Bidirectional cursor starting before `start`
    pub fn list_iter(&mut self, start: usize) -> LazyListIter<'_, 'a, T> {
        LazyListIter {
            list: self,
            position: start,
        }
    }
}

impl<'a, T: Clone> LazyResult<'a, T> {
    /// Forward iterator yielding owned elements
    pub fn iter(&mut self) -> LazyIter<'_, 'a, T> {
        LazyIter {
            list: self,
            position: 0,
        }
    }
}

impl<T> PartialEq for LazyResult<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl<T: fmt::Debug> fmt::Debug for LazyResult<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyResult")
            .field("resolved", &self.cache)
            .field("exhausted", &self.source.is_none())
            .finish()
    }
}

/// Forward iterator over a [`LazyResult`]; errors end nothing, they are yielded
pub struct LazyIter<'l, 'a, T> {
    list: &'l mut LazyResult<'a, T>,
    position: usize,
}

impl<T: Clone> Iterator for LazyIter<'_, '_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        match self.list.resolve_to(self.position) {
            Ok(true) => {
                let item = self.list.cache[self.position].clone();
                self.position += 1;
                Some(Ok(item))
            }
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

/// Bidirectional cursor over a [`LazyResult`]
///
/// The position sits between elements: `next` returns the element after it,
/// `previous` the element before it.
pub struct LazyListIter<'l, 'a, T> {
    list: &'l mut LazyResult<'a, T>,
    position: usize,
}

impl<T> LazyListIter<'_, '_, T> {
    /// Resolves the next element if needed
    pub fn has_next(&mut self) -> Result<bool> {
        self.list.resolve_to(self.position)
    }

    pub fn next(&mut self) -> Option<Result<&T>> {
        match self.list.resolve_to(self.position) {
            Ok(true) => {
                self.position += 1;
                Some(Ok(&self.list.cache[self.position - 1]))
            }
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }

    /// Returns true if the element before the position is resolved
    pub fn has_previous(&self) -> bool {
        self.position > 0 && self.position <= self.list.cache.len()
    }

    /// Moves back one element, reading the cache only. The position is left
    /// alone when that element is not resolved.
    pub fn previous(&mut self) -> Option<&T> {
        let index = self.position.checked_sub(1)?;
        let item = self.list.cache.get(index)?;
        self.position = index;
        Some(item)
    }

    pub fn next_index(&self) -> usize {
        self.position
    }

    /// `None` before the first element
    pub fn previous_index(&self) -> Option<usize> {
        self.position.checked_sub(1)
    }
}
