//! Result types for query execution

use serde::Serialize;

use crate::error::Result;
use crate::model::Record;
use crate::planner::{Cursor, NativeQuery};
use crate::stream::{LazyIter, LazyListIter, LazyResult};

/// Lazily materialized rows of one execution
pub struct QueryResult<'a> {
    rows: LazyResult<'a, Record>,
    /// Native query backing the rows when they stream from exactly one query
    streaming: Option<NativeQuery>,
}

impl<'a> QueryResult<'a> {
    pub(crate) fn new(rows: LazyResult<'a, Record>, streaming: Option<NativeQuery>) -> Self {
        Self { rows, streaming }
    }

    pub fn get(&mut self, index: usize) -> Result<&Record> {
        self.rows.get(index)
    }

    pub fn size(&mut self) -> Result<usize> {
        self.rows.size()
    }

    pub fn iter(&mut self) -> LazyIter<'_, 'a, Record> {
        self.rows.iter()
    }

    pub fn list_iter(&mut self, start: usize) -> LazyListIter<'_, 'a, Record> {
        self.rows.list_iter(start)
    }

    /// Rows resolved so far
    pub fn resolved(&self) -> usize {
        self.rows.resolved()
    }

    /// Resumption point after the last resolved row.
    ///
    /// `None` unless the rows stream from a single native query that has
    /// not been materialized through [`size`](Self::size).
    pub fn cursor(&self) -> Option<Cursor> {
        let query = self.streaming.as_ref()?;
        if self.rows.is_sized() {
            return None;
        }
        let position = query
            .first_position()?
            .checked_add(self.rows.resolved() as u64)?;
        Some(Cursor::new(query, position))
    }

    pub fn into_records(self) -> Result<Vec<Record>> {
        self.rows.into_vec()
    }
}

/// Execution output
pub enum QueryOutput<'a> {
    Rows(QueryResult<'a>),
    Count(u64),
}

impl<'a> QueryOutput<'a> {
    pub fn rows(self) -> Option<QueryResult<'a>> {
        match self {
            QueryOutput::Rows(rows) => Some(rows),
            QueryOutput::Count(_) => None,
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            QueryOutput::Count(n) => Some(*n),
            QueryOutput::Rows(_) => None,
        }
    }
}

/// Serializable page of rows, as written by the CLI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowsPage {
    pub records: Vec<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl RowsPage {
    /// Drains `result`, capturing the cursor once every row is resolved
    /// by iteration rather than by `size()`.
    pub fn collect(mut result: QueryResult<'_>) -> Result<Self> {
        let records = result.iter().collect::<Result<Vec<_>>>()?;
        let cursor = result.cursor().map(|c| c.to_web_safe_string());
        Ok(Self { records, cursor })
    }
}
