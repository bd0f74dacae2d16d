//! In-memory datastore
//!
//! Records live in a key-ordered map. Native queries are evaluated with
//! datastore semantics: kind and ancestor restriction, filters, sorts
//! (records missing a sort property are excluded, ties in key order),
//! then start position, offset and limit, then keys-only or projection.
//!
//! Faults can be injected per call to exercise fault translation.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use super::errors::{BackendFault, DatastoreResult};
use super::{Datastore, QueryStream};
use crate::config::QueryConfig;
use crate::executor::{PredicateFilter, ResultSorter};
use crate::model::{Key, Record};
use crate::planner::NativeQuery;

/// Where an injected fault surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// The call itself fails
    Dispatch,
    /// The stream yields this many records, then the fault, then ends
    AfterRecords(usize),
}

/// Key-ordered in-memory datastore
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    records: RwLock<BTreeMap<Key, Record>>,
    faults: Mutex<VecDeque<(FaultPoint, BackendFault)>>,
    served: AtomicU64,
}

fn poisoned() -> BackendFault {
    BackendFault::InternalFailure("datastore lock poisoned".to_string())
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.records.write() {
            map.extend(records.into_iter().map(|r| (r.key.clone(), r)));
        }
        store
    }

    pub fn insert(&self, record: Record) -> DatastoreResult<()> {
        let mut map = self.records.write().map_err(|_| poisoned())?;
        map.insert(record.key.clone(), record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queues a fault for the next call that consumes one
    pub fn inject_fault(&self, point: FaultPoint, fault: BackendFault) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push_back((point, fault));
        }
    }

    /// Records yielded by all query streams so far
    pub fn records_served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    fn next_fault(&self) -> DatastoreResult<Option<(FaultPoint, BackendFault)>> {
        Ok(self.faults.lock().map_err(|_| poisoned())?.pop_front())
    }

    fn select(&self, query: &NativeQuery) -> DatastoreResult<Vec<Record>> {
        let map = self.records.read().map_err(|_| poisoned())?;
        let mut matched: Vec<Record> = map
            .values()
            .filter(|r| r.key.kind() == query.kind)
            .filter(|r| match &query.ancestor {
                Some(ancestor) => r.key.is_descendant_of(ancestor),
                None => true,
            })
            .filter(|r| ResultSorter::has_sort_values(r, &query.sorts))
            .filter(|r| PredicateFilter::matches_native(r, &query.filters))
            .cloned()
            .collect();
        drop(map);

        if !query.sorts.is_empty() {
            ResultSorter::sort(&mut matched, &query.sorts);
        }

        let skip = query
            .first_position()
            .and_then(|p| usize::try_from(p).ok())
            .ok_or_else(|| BackendFault::BadRequest("start position out of range".to_string()))?;
        let take = query.limit.map_or(usize::MAX, |l| l as usize);
        Ok(matched
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|r| {
                if query.keys_only {
                    r.key_only()
                } else if !query.projection.is_empty() {
                    r.project(&query.projection)
                } else {
                    r
                }
            })
            .collect())
    }
}

/// Rejects queries the index model cannot serve
fn validate(query: &NativeQuery) -> DatastoreResult<()> {
    let inequalities: HashSet<&str> = query
        .filters
        .iter()
        .filter(|f| f.is_inequality())
        .filter_map(|f| f.property())
        .collect();
    if inequalities.len() > 1 {
        return Err(BackendFault::BadRequest(
            "inequality filters on more than one property".to_string(),
        ));
    }
    if let (Some(property), Some(first)) = (inequalities.iter().next(), query.sorts.first()) {
        if first.property != *property {
            return Err(BackendFault::BadRequest(format!(
                "first sort must be the inequality property '{}'",
                property
            )));
        }
    }
    Ok(())
}

impl Datastore for MemoryDatastore {
    fn run_query(&self, query: &NativeQuery, _config: &QueryConfig) -> DatastoreResult<QueryStream<'_>> {
        let fault = self.next_fault()?;
        let fail_after = match fault {
            Some((FaultPoint::Dispatch, fault)) => return Err(fault),
            Some((FaultPoint::AfterRecords(n), fault)) => Some((n, fault)),
            None => None,
        };
        validate(query)?;
        let records = self.select(query)?;

        let served = &self.served;
        let stream = records.into_iter().map(Ok);
        let stream: QueryStream<'_> = match fail_after {
            Some((n, fault)) => Box::new(
                stream
                    .take(n)
                    .chain(std::iter::once(Err(fault))),
            ),
            None => Box::new(stream),
        };
        Ok(Box::new(stream.inspect(move |item| {
            if item.is_ok() {
                served.fetch_add(1, Ordering::Relaxed);
            }
        })))
    }

    fn batch_get(&self, keys: &[Key], _config: &QueryConfig) -> DatastoreResult<Vec<Record>> {
        if let Some((_, fault)) = self.next_fault()? {
            return Err(fault);
        }
        let map = self.records.read().map_err(|_| poisoned())?;
        Ok(keys.iter().filter_map(|k| map.get(k).cloned()).collect())
    }

    fn delete(&self, keys: &[Key], _config: &QueryConfig) -> DatastoreResult<u64> {
        if let Some((_, fault)) = self.next_fault()? {
            return Err(fault);
        }
        let mut map = self.records.write().map_err(|_| poisoned())?;
        Ok(keys.iter().filter(|k| map.remove(*k).is_some()).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;
    use crate::planner::{FilterOperator, FilterPredicate, NativeFilter, SortPredicate};

    fn store() -> MemoryDatastore {
        let ann = Key::new("Author", "ann");
        MemoryDatastore::from_records(vec![
            Record::new(Key::with_parent(ann.clone(), "Book", 1))
                .with("title", "Dune")
                .with("year", 1965),
            Record::new(Key::with_parent(ann, "Book", 2))
                .with("title", "Emma")
                .with("year", 1815),
            Record::new(Key::new("Book", 3)).with("title", "Ulysses").with("year", 1922),
            Record::new(Key::new("Book", 4)).with("title", "Untitled"),
            Record::new(Key::new("Author", "ann")),
        ])
    }

    fn titles(stream: QueryStream<'_>) -> Vec<String> {
        stream
            .map(|r| r.unwrap().get("title").and_then(Value::as_text).unwrap_or("").to_string())
            .collect()
    }

    fn config() -> QueryConfig {
        QueryConfig::default()
    }

    #[test]
    fn test_kind_and_key_order() {
        let store = store();
        let stream = store.run_query(&NativeQuery::new("Book"), &config()).unwrap();
        assert_eq!(titles(stream), vec!["Dune", "Emma", "Ulysses", "Untitled"]);
    }

    #[test]
    fn test_filters_sorts_and_paging() {
        let store = store();
        let mut query = NativeQuery::new("Book");
        query.filters.push(NativeFilter::Predicate(FilterPredicate::new(
            "year",
            FilterOperator::Gt,
            Value::from(1900),
        )));
        query.sorts.push(SortPredicate::desc("year"));
        let stream = store.run_query(&query, &config()).unwrap();
        assert_eq!(titles(stream), vec!["Dune", "Ulysses"]);

        query.offset = 1;
        let stream = store.run_query(&query, &config()).unwrap();
        assert_eq!(titles(stream), vec!["Ulysses"]);

        query.offset = 0;
        query.start = Some(1);
        query.limit = Some(0);
        assert_eq!(store.run_query(&query, &config()).unwrap().count(), 0);
    }

    #[test]
    fn test_sort_excludes_missing_property() {
        let store = store();
        let mut query = NativeQuery::new("Book");
        query.sorts.push(SortPredicate::asc("year"));
        let stream = store.run_query(&query, &config()).unwrap();
        assert_eq!(titles(stream), vec!["Emma", "Ulysses", "Dune"]);
    }

    #[test]
    fn test_ancestor_and_keys_only() {
        let store = store();
        let mut query = NativeQuery::new("Book");
        query.ancestor = Some(Key::new("Author", "ann"));
        query.keys_only = true;
        let records: Vec<Record> = store
            .run_query(&query, &config())
            .unwrap()
            .collect::<DatastoreResult<_>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.properties.is_empty()));
    }

    #[test]
    fn test_rejects_two_inequality_properties() {
        let store = store();
        let mut query = NativeQuery::new("Book");
        for property in ["year", "title"] {
            query.filters.push(NativeFilter::Predicate(FilterPredicate::new(
                property,
                FilterOperator::Gt,
                Value::from(1),
            )));
        }
        assert!(matches!(
            store.run_query(&query, &config()),
            Err(BackendFault::BadRequest(_))
        ));
    }

    #[test]
    fn test_injected_faults() {
        let store = store();
        store.inject_fault(FaultPoint::Dispatch, BackendFault::InternalFailure("down".into()));
        assert!(store.run_query(&NativeQuery::new("Book"), &config()).is_err());

        store.inject_fault(FaultPoint::AfterRecords(1), BackendFault::Timeout("slow".into()));
        let items: Vec<_> = store.run_query(&NativeQuery::new("Book"), &config()).unwrap().collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(items[1], Err(BackendFault::Timeout("slow".into())));
        assert_eq!(store.records_served(), 1);

        assert_eq!(store.run_query(&NativeQuery::new("Book"), &config()).unwrap().count(), 4);
    }

    #[test]
    fn test_batch_get_count_delete() {
        let store = store();
        let keys = vec![Key::new("Book", 4), Key::new("Book", 99), Key::new("Book", 3)];
        let found = store.batch_get(&keys, &config()).unwrap();
        assert_eq!(
            found.iter().map(|r| r.key.clone()).collect::<Vec<_>>(),
            vec![Key::new("Book", 4), Key::new("Book", 3)]
        );

        let mut query = NativeQuery::new("Book");
        query.limit = Some(3);
        assert_eq!(store.count(&query, &config()).unwrap(), 3);

        assert_eq!(store.delete(&keys, &config()).unwrap(), 2);
        assert_eq!(store.len(), 3);
    }
}
