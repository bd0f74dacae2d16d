//! Offset/limit slicing
//!
//! [`SlicingIterable`] yields exactly the source positions
//! `[offset, offset + limit)`, clipped to the source length. Skipped
//! elements are pulled and dropped, never buffered, and nothing is pulled
//! once the limit is reached.

/// Re-iterable offset/limit view over a source
#[derive(Debug, Clone, PartialEq)]
pub struct SlicingIterable<S> {
    source: S,
    offset: u64,
    limit: Option<u64>,
}

impl<S> SlicingIterable<S> {
    /// `limit == None` means unbounded
    pub fn new(source: S, offset: u64, limit: Option<u64>) -> Self {
        Self {
            source,
            offset,
            limit,
        }
    }

    /// Fresh pass over the source
    pub fn iter<'a>(&'a self) -> Slice<<&'a S as IntoIterator>::IntoIter>
    where
        &'a S: IntoIterator,
    {
        Slice::new((&self.source).into_iter(), self.offset, self.limit)
    }
}

impl<S: IntoIterator> IntoIterator for SlicingIterable<S> {
    type Item = S::Item;
    type IntoIter = Slice<S::IntoIter>;

    fn into_iter(self) -> Self::IntoIter {
        Slice::new(self.source.into_iter(), self.offset, self.limit)
    }
}

impl<'a, S> IntoIterator for &'a SlicingIterable<S>
where
    &'a S: IntoIterator,
{
    type Item = <&'a S as IntoIterator>::Item;
    type IntoIter = Slice<<&'a S as IntoIterator>::IntoIter>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Single pass of a slice
#[derive(Debug)]
pub struct Slice<I> {
    inner: I,
    to_skip: u64,
    remaining: Option<u64>,
}

impl<I> Slice<I> {
    pub fn new(inner: I, offset: u64, limit: Option<u64>) -> Self {
        Self {
            inner,
            to_skip: offset,
            remaining: limit,
        }
    }
}

impl<I: Iterator> Iterator for Slice<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        while self.to_skip > 0 {
            self.inner.next()?;
            self.to_skip -= 1;
        }
        let item = self.inner.next()?;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(item)
    }
}

/// Slice over a fallible stream: errors pass through and occupy no position
#[derive(Debug)]
pub struct TrySlice<I> {
    inner: I,
    to_skip: u64,
    remaining: Option<u64>,
}

impl<I> TrySlice<I> {
    pub fn new(inner: I, offset: u64, limit: Option<u64>) -> Self {
        Self {
            inner,
            to_skip: offset,
            remaining: limit,
        }
    }
}

impl<T, E, I> Iterator for TrySlice<I>
where
    I: Iterator<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        loop {
            match self.inner.next()? {
                Err(err) => return Some(Err(err)),
                Ok(_) if self.to_skip > 0 => self.to_skip -= 1,
                Ok(item) => {
                    if let Some(remaining) = self.remaining.as_mut() {
                        *remaining -= 1;
                    }
                    return Some(Ok(item));
                }
            }
        }
    }
}
