//! Explain output
//!
//! Deterministic, human-readable description of a compiled plan or of the
//! compile error that rejected the query. Also serializable for the CLI.

use std::fmt;

use serde::Serialize;

use super::errors::CompileError;
use super::plan::{CountPlan, ExecutionPlan, InMemoryPlan, NativeQuery};

/// Explain plan output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExplainPlan {
    /// Whether compilation succeeded
    pub accepted: bool,
    /// Execution strategy (if accepted)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    /// One line per execution step, nested steps indented
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<String>,
    /// Error code (if rejected)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_code: Option<String>,
    /// Violated rule name (if rejected by a feature rule)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_rule: Option<String>,
    /// Rejection reason (if rejected)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl ExplainPlan {
    /// Creates an explain plan from a compiled plan
    pub fn from_plan(plan: &ExecutionPlan) -> Self {
        let mut steps = Vec::new();
        describe_plan(plan, 0, &mut steps);
        Self {
            accepted: true,
            strategy: Some(plan.name().to_string()),
            steps,
            rejection_code: None,
            rejection_rule: None,
            rejection_reason: None,
        }
    }

    /// Creates an explain plan from a compile error
    pub fn from_error(err: &CompileError) -> Self {
        Self {
            accepted: false,
            strategy: None,
            steps: Vec::new(),
            rejection_code: Some(err.code().to_string()),
            rejection_rule: err.unsupported().map(|rule| rule.rule().to_string()),
            rejection_reason: Some(err.to_string()),
        }
    }
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}

fn paging(offset: u64, limit: Option<u64>) -> Option<String> {
    match (offset, limit) {
        (0, None) => None,
        (offset, None) => Some(format!("offset {}", offset)),
        (offset, Some(limit)) => Some(format!("offset {} limit {}", offset, limit)),
    }
}

fn describe_query(label: &str, query: &NativeQuery, depth: usize, steps: &mut Vec<String>) {
    let pad = indent(depth);
    let mut head = format!("{}{} {}", pad, label, query.kind);
    if query.keys_only {
        head.push_str(" (keys only)");
    }
    steps.push(head);
    if let Some(ancestor) = &query.ancestor {
        steps.push(format!("{}  ancestor {}", pad, ancestor));
    }
    for filter in &query.filters {
        steps.push(format!("{}  filter {}", pad, filter));
    }
    for sort in &query.sorts {
        steps.push(format!("{}  sort {}", pad, sort));
    }
    if !query.projection.is_empty() {
        steps.push(format!("{}  project {}", pad, query.projection.join(", ")));
    }
    if let Some(start) = query.start {
        steps.push(format!("{}  start {}", pad, start));
    }
    if let Some(paging) = paging(query.offset, query.limit) {
        steps.push(format!("{}  {}", pad, paging));
    }
}

fn describe_in_memory(plan: &InMemoryPlan, depth: usize, steps: &mut Vec<String>) {
    let pad = indent(depth);
    describe_query("scan", &plan.query, depth, steps);
    if let Some(join) = &plan.join {
        steps.push(format!("{}hash join on {}", pad, join.parent_property));
        describe_query("child", &join.child, depth + 1, steps);
    }
    if let Some(filter) = &plan.filter {
        steps.push(format!("{}in-memory filter {}", pad, filter));
    }
    for sort in &plan.sorts {
        steps.push(format!("{}in-memory sort {}", pad, sort));
    }
    if let Some(paging) = paging(plan.offset, plan.limit) {
        steps.push(format!("{}slice {}", pad, paging));
    }
}

fn describe_plan(plan: &ExecutionPlan, depth: usize, steps: &mut Vec<String>) {
    let pad = indent(depth);
    match plan {
        ExecutionPlan::SingleNativeQuery(query) => describe_query("query", query, depth, steps),
        ExecutionPlan::NativeQueryWithInMemoryFilter(plan) => describe_in_memory(plan, depth, steps),
        ExecutionPlan::BatchGetByKeys(get) => {
            let keys: Vec<String> = get.keys.iter().map(ToString::to_string).collect();
            steps.push(format!("{}batch get {} [{}]", pad, get.kind, keys.join(", ")));
            for filter in &get.filters {
                steps.push(format!("{}  filter {}", pad, filter));
            }
            if let Some(paging) = paging(get.offset, get.limit) {
                steps.push(format!("{}  slice {}", pad, paging));
            }
        }
        ExecutionPlan::MergeJoin(join) => {
            steps.push(format!("{}merge join on {}", pad, join.join_property));
            describe_query("parent", &join.parent, depth + 1, steps);
            describe_query("child", &join.child, depth + 1, steps);
            if let Some(paging) = paging(join.offset, join.limit) {
                steps.push(format!("{}  slice {}", pad, paging));
            }
        }
        ExecutionPlan::Count(CountPlan::Native(query)) => describe_query("count", query, depth, steps),
        ExecutionPlan::Count(CountPlan::Rows(inner)) => {
            steps.push(format!("{}count rows of {}", pad, inner.name()));
            describe_plan(inner, depth + 1, steps);
        }
    }
}

impl fmt::Display for ExplainPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== EXPLAIN PLAN ===")?;

        if self.accepted {
            writeln!(f, "Status: ACCEPTED")?;
            if let Some(strategy) = &self.strategy {
                writeln!(f, "Strategy: {}", strategy)?;
            }
            if !self.steps.is_empty() {
                writeln!(f, "Steps:")?;
                for step in &self.steps {
                    writeln!(f, "  {}", step)?;
                }
            }
        } else {
            writeln!(f, "Status: REJECTED")?;
            if let Some(code) = &self.rejection_code {
                writeln!(f, "Error Code: {}", code)?;
            }
            if let Some(rule) = &self.rejection_rule {
                writeln!(f, "Rule: {}", rule)?;
            }
            if let Some(reason) = &self.rejection_reason {
                writeln!(f, "Reason: {}", reason)?;
            }
        }

        Ok(())
    }
}
