//! CLI command implementations
//!
//! Each command loads the configuration, reads one JSON query request from
//! stdin and writes one JSON response to stdout. Compilation and execution
//! are split out from the I/O so they can be driven directly.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::datastore::MemoryDatastore;
use crate::error::QueryError;
use crate::executor::{QueryExecutor, QueryOutput, RowsPage};
use crate::model::{Key, Value};
use crate::observability::{log_event, Event, Logger, MetricsRegistry};
use crate::planner::{
    parse_filter, parse_ordering, CompileError, ExecutionPlan, ExplainPlan, JoinClause,
    Projection, Query, QueryCompiler,
};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{read_request, write_response};

/// One query, as read from stdin
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryRequest {
    pub kind: String,
    /// Textual filter, e.g. `isbn > :min && title LIKE 'D%'`
    pub filter: Option<String>,
    /// Order clause, e.g. `isbn asc, title desc`
    pub order: Option<String>,
    pub params: BTreeMap<String, Value>,
    pub ancestor: Option<Key>,
    pub join: Option<JoinRequest>,
    pub offset: i64,
    pub limit: Option<i64>,
    pub keys_only: bool,
    pub fields: Vec<String>,
    pub count: bool,
    pub cursor: Option<String>,
}

/// Join of the queried kind to a child kind through a key property
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinRequest {
    pub variable: String,
    pub kind: String,
    pub property: String,
    #[serde(default)]
    pub outer: bool,
}

impl QueryRequest {
    pub fn to_query(&self) -> CliResult<Query> {
        if self.kind.is_empty() {
            return Err(CliError::request("'kind' is required"));
        }
        let shapes = [self.count, self.keys_only, !self.fields.is_empty()];
        if shapes.iter().filter(|set| **set).count() > 1 {
            return Err(CliError::request(
                "'count', 'keys_only' and 'fields' are mutually exclusive",
            ));
        }

        let mut query = Query::new(self.kind.as_str());
        if let Some(filter) = &self.filter {
            query = query.with_filter(parse_filter(filter)?);
        }
        if let Some(order) = &self.order {
            for sort in parse_ordering(order)? {
                query = query.with_sort(sort);
            }
        }
        if let Some(ancestor) = &self.ancestor {
            query = query.with_ancestor(ancestor.clone());
        }
        if let Some(join) = &self.join {
            let mut clause = JoinClause::new(
                join.variable.as_str(),
                join.kind.as_str(),
                join.property.as_str(),
            );
            clause.outer = join.outer;
            query = query.with_join(clause);
        }

        query.projection = if self.count {
            Projection::count()
        } else if self.keys_only {
            Projection::KeysOnly
        } else if !self.fields.is_empty() {
            Projection::Fields(self.fields.clone())
        } else {
            Projection::Entities
        };
        query.offset = self.offset;
        query.limit = self.limit;
        query.params = self.params.clone();
        query.cursor = self.cursor.clone();
        Ok(query)
    }
}

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Explain { config } => explain(&config),
        Command::Query { config } => query(&config),
    }
}

/// Compile a request from stdin and write its explain plan.
///
/// A rejected query is still a successful explain: the rejection code,
/// rule and reason are part of the output.
pub fn explain(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    let request: QueryRequest = read_request()?;
    let metrics = MetricsRegistry::new();
    let explained = explain_request(&config, &request, &metrics)?;
    write_response(&explained)
}

/// Execute a request from stdin against the configured dataset
pub fn query(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    let request: QueryRequest = read_request()?;
    let store = load_store(&config)?;
    let metrics = Arc::new(MetricsRegistry::new());
    let response = execute_request(&config, &store, &request, &metrics)?;

    Logger::trace("METRICS", &[("snapshot", metrics.to_json().as_str())]);
    write_response(&response)
}

pub fn explain_request(
    config: &Config,
    request: &QueryRequest,
    metrics: &MetricsRegistry,
) -> CliResult<ExplainPlan> {
    let query = request.to_query()?;
    Ok(match compile(config, &query, metrics) {
        Ok(plan) => ExplainPlan::from_plan(&plan),
        Err(err) => ExplainPlan::from_error(&err),
    })
}

/// Compiles and executes one request, returning the JSON response body
pub fn execute_request(
    config: &Config,
    store: &MemoryDatastore,
    request: &QueryRequest,
    metrics: &Arc<MetricsRegistry>,
) -> CliResult<serde_json::Value> {
    let query = request.to_query()?;
    let plan = compile(config, &query, metrics).map_err(QueryError::from)?;

    let executor =
        QueryExecutor::new(store, config.query.clone()).with_metrics(Arc::clone(metrics));
    let response = match executor.execute(&plan)? {
        QueryOutput::Count(count) => json!({ "count": count }),
        QueryOutput::Rows(rows) => serde_json::to_value(RowsPage::collect(rows)?)?,
    };
    Ok(response)
}

fn compile(
    config: &Config,
    query: &Query,
    metrics: &MetricsRegistry,
) -> Result<ExecutionPlan, CompileError> {
    let compiler = QueryCompiler::new(&config.kinds, &config.query);
    match compiler.compile(query) {
        Ok(plan) => {
            metrics.increment_queries_compiled();
            log_event(
                Event::QueryCompiled,
                &[("kind", query.kind.as_str()), ("strategy", plan.name())],
            );
            Ok(plan)
        }
        Err(err) => {
            metrics.increment_queries_rejected();
            let reason = err.to_string();
            log_event(
                Event::QueryRejected,
                &[
                    ("kind", query.kind.as_str()),
                    ("code", err.code()),
                    ("reason", reason.as_str()),
                ],
            );
            Err(err)
        }
    }
}

fn load_config(path: &Path) -> CliResult<Config> {
    let config = Config::load(path)?;
    Logger::set_min_severity(config.severity()?);
    let path = path.display().to_string();
    log_event(Event::ConfigLoaded, &[("path", path.as_str())]);
    Ok(config)
}

fn load_store(config: &Config) -> CliResult<MemoryDatastore> {
    let records = config.load_dataset()?;
    let count = records.len().to_string();
    log_event(Event::DatasetLoaded, &[("records", count.as_str())]);
    Ok(MemoryDatastore::from_records(records))
}
