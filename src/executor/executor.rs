//! Plan execution
//!
//! Runs a compiled [`ExecutionPlan`] against a [`Datastore`]. Results are
//! lazy wherever the plan allows: native streams, merge joins and unsorted
//! in-memory filters are pulled only as far as the caller reads. Client-side
//! sorts and batch gets materialize their candidates first.
//!
//! Every backend call and every stream pull goes through one
//! [`FaultTranslator`], so callers only ever see [`QueryError`]s.

use std::collections::HashSet;
use std::sync::Arc;

use super::filters::PredicateFilter;
use super::result::{QueryOutput, QueryResult};
use super::sorter::ResultSorter;
use crate::config::QueryConfig;
use crate::datastore::Datastore;
use crate::error::Result;
use crate::model::{Key, Record};
use crate::observability::{log_event, Event, MetricsRegistry};
use crate::planner::{
    BatchGetPlan, CountPlan, ExecutionPlan, InMemoryPlan, MergeJoinPlan, MisuseError, NativeQuery,
};
use crate::stream::{
    join_keys_of, FaultObserver, FaultTranslator, JoinParent, LazyResult, MergeJoin,
    SlicingIterable, TrySlice,
};

type Rows<'a> = Box<dyn Iterator<Item = Result<Record>> + 'a>;

/// Executes plans against one datastore with one set of read options
pub struct QueryExecutor<'a, D: Datastore> {
    datastore: &'a D,
    config: QueryConfig,
    translator: FaultTranslator,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl<'a, D: Datastore> QueryExecutor<'a, D> {
    pub fn new(datastore: &'a D, config: QueryConfig) -> Self {
        let translator = FaultTranslator::new(config.error_convention);
        Self {
            datastore,
            config,
            translator,
            metrics: None,
        }
    }

    /// Registers a telemetry hook notified once per datastore fault
    pub fn with_observer(mut self, observer: Arc<dyn FaultObserver>) -> Self {
        self.translator = self.translator.with_observer(observer);
        self
    }

    /// Counts executions and faults in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.translator = self.translator.with_observer(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Executes a plan.
    ///
    /// Dispatch faults surface here; faults while streaming surface from
    /// the returned rows as they are read.
    pub fn execute(&self, plan: &'a ExecutionPlan) -> Result<QueryOutput<'a>> {
        let output = match plan {
            ExecutionPlan::Count(count) => QueryOutput::Count(self.count(count)?),
            _ => QueryOutput::Rows(self.rows(plan)?),
        };

        log_event(Event::QueryExecuted, &[("strategy", plan.name())]);
        if let Some(metrics) = &self.metrics {
            metrics.increment_queries_executed();
            if matches!(plan, ExecutionPlan::NativeQueryWithInMemoryFilter(_)) {
                metrics.increment_in_memory_fallbacks();
            }
        }
        Ok(output)
    }

    /// Deletes every record the plan selects and returns how many existed.
    ///
    /// The rows are fully resolved before anything is deleted.
    pub fn delete(&self, plan: &'a ExecutionPlan) -> Result<u64> {
        let keys: Vec<Key> = match plan {
            ExecutionPlan::Count(_) => {
                return Err(MisuseError::DeleteCount.into());
            }
            _ => self
                .rows(plan)?
                .into_records()?
                .into_iter()
                .map(|record| record.key)
                .collect(),
        };

        let deleted = self.translator.call(self.datastore.delete(&keys, &self.config))?;
        let count = deleted.to_string();
        log_event(
            Event::BulkDelete,
            &[("strategy", plan.name()), ("deleted", count.as_str())],
        );
        if let Some(metrics) = &self.metrics {
            metrics.add_records_deleted(deleted);
        }
        Ok(deleted)
    }

    fn rows(&self, plan: &'a ExecutionPlan) -> Result<QueryResult<'a>> {
        match plan {
            ExecutionPlan::SingleNativeQuery(query) => {
                let rows = self.stream(query)?;
                Ok(QueryResult::new(
                    LazyResult::new(rows, |record| record),
                    Some(query.clone()),
                ))
            }
            ExecutionPlan::NativeQueryWithInMemoryFilter(in_memory) => self.in_memory(in_memory),
            ExecutionPlan::BatchGetByKeys(batch) => self.batch_get(batch),
            ExecutionPlan::MergeJoin(join) => self.merge_join(join),
            ExecutionPlan::Count(CountPlan::Rows(inner)) => self.rows(inner),
            ExecutionPlan::Count(CountPlan::Native(query)) => {
                let rows = self.stream(query)?;
                Ok(QueryResult::new(LazyResult::new(rows, |record| record), None))
            }
        }
    }

    fn count(&self, plan: &'a CountPlan) -> Result<u64> {
        match plan {
            CountPlan::Native(query) => self
                .translator
                .call(self.datastore.count(query, &self.config)),
            CountPlan::Rows(inner) => Ok(self.rows(inner)?.size()? as u64),
        }
    }

    /// Dispatches one native query and translates its stream
    fn stream(&self, query: &NativeQuery) -> Result<Rows<'a>> {
        let stream = self
            .translator
            .call(self.datastore.run_query(query, &self.config))?;
        Ok(Box::new(self.translator.wrap(stream)))
    }

    fn in_memory(&self, plan: &'a InMemoryPlan) -> Result<QueryResult<'a>> {
        let joined: Option<(HashSet<Key>, &'a str)> = match &plan.join {
            Some(join) => {
                let keys = self
                    .stream(&join.child)?
                    .map(|record| record.map(|r| r.key))
                    .collect::<Result<HashSet<Key>>>()?;
                Some((keys, join.parent_property.as_str()))
            }
            None => None,
        };

        let candidates = self.stream(&plan.query)?.filter(move |item| {
            let Ok(record) = item else {
                return true;
            };
            let joins = joined.as_ref().map_or(true, |(keys, property)| {
                join_keys_of(record, property)
                    .into_iter()
                    .any(|key| keys.contains(key))
            });
            joins
                && ResultSorter::has_sort_values(record, &plan.sorts)
                && plan
                    .filter
                    .as_ref()
                    .map_or(true, |filter| PredicateFilter::matches(record, filter))
        });

        let ordered: Rows<'a> = if plan.sorts.is_empty() {
            Box::new(candidates)
        } else {
            let mut records = candidates.collect::<Result<Vec<_>>>()?;
            ResultSorter::sort(&mut records, &plan.sorts);
            Box::new(records.into_iter().map(Ok))
        };

        let sliced = TrySlice::new(ordered, plan.offset, plan.limit);
        Ok(QueryResult::new(
            LazyResult::new(sliced, move |record| {
                shape(record, plan.keys_only, &plan.projection)
            }),
            None,
        ))
    }

    fn batch_get(&self, plan: &'a BatchGetPlan) -> Result<QueryResult<'a>> {
        let found = self
            .translator
            .call(self.datastore.batch_get(&plan.keys, &self.config))?;
        let matching: Vec<Record> = found
            .into_iter()
            .filter(|record| record.key.kind() == plan.kind)
            .filter(|record| {
                plan.filters
                    .iter()
                    .all(|filter| PredicateFilter::matches_filter(record, filter))
            })
            .collect();

        let sliced = SlicingIterable::new(matching, plan.offset, plan.limit);
        let rows = sliced
            .into_iter()
            .map(|record| Ok(shape(record, plan.keys_only, &plan.projection)));
        Ok(QueryResult::new(
            LazyResult::new(rows, |record| record),
            None,
        ))
    }

    fn merge_join(&self, plan: &'a MergeJoinPlan) -> Result<QueryResult<'a>> {
        let property = plan.join_property.as_str();
        let parents = self
            .stream(&plan.parent)?
            .map(move |record| record.map(|record| JoinParent { record, property }));
        let children = self
            .stream(&plan.child)?
            .map(|record| record.map(|record| record.key));

        let joined = MergeJoin::new(parents, children).map(|parent| parent.map(|p| p.record));
        let sliced = TrySlice::new(joined, plan.offset, plan.limit);
        Ok(QueryResult::new(
            LazyResult::new(sliced, move |record| {
                shape(record, plan.keys_only, &plan.projection)
            }),
            None,
        ))
    }
}

/// Applies keys-only or projection output shaping
fn shape(record: Record, keys_only: bool, projection: &[String]) -> Record {
    if keys_only {
        record.key_only()
    } else if !projection.is_empty() {
        record.project(projection)
    } else {
        record
    }
}
