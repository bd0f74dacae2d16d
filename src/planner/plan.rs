//! Execution plans
//!
//! Immutable output of the compiler. A plan is built once per execution and
//! never mutated; rebinding parameters compiles a new one.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ast::{CompareOp, SortDirection};
use crate::model::{Key, Value};

/// Operators the datastore evaluates natively
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

impl FilterOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "==",
            FilterOperator::Lt => "<",
            FilterOperator::Le => "<=",
            FilterOperator::Gt => ">",
            FilterOperator::Ge => ">=",
            FilterOperator::In => "IN",
        }
    }

    pub fn is_inequality(&self) -> bool {
        matches!(
            self,
            FilterOperator::Lt | FilterOperator::Le | FilterOperator::Gt | FilterOperator::Ge
        )
    }

    /// Maps a range or equality comparison; NE has no single native form.
    pub fn from_compare(op: CompareOp) -> Option<FilterOperator> {
        match op {
            CompareOp::Eq => Some(FilterOperator::Eq),
            CompareOp::Lt => Some(FilterOperator::Lt),
            CompareOp::Le => Some(FilterOperator::Le),
            CompareOp::Gt => Some(FilterOperator::Gt),
            CompareOp::Ge => Some(FilterOperator::Ge),
            CompareOp::Ne => None,
        }
    }
}

/// A native filter predicate. For `In` the value is a `Value::List`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPredicate {
    pub property: String,
    pub operator: FilterOperator,
    pub value: Value,
}

impl FilterPredicate {
    pub fn new(property: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            property: property.into(),
            operator,
            value,
        }
    }

    /// Values an IN predicate ranges over, or the single value otherwise
    pub fn values(&self) -> &[Value] {
        match (&self.operator, &self.value) {
            (FilterOperator::In, Value::List(items)) => items,
            _ => std::slice::from_ref(&self.value),
        }
    }
}

impl fmt::Display for FilterPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.property, self.operator.symbol(), self.value)
    }
}

/// One native filter: a predicate, or a disjunction over a single property
/// (the native form of NE).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeFilter {
    Predicate(FilterPredicate),
    AnyOf(Vec<FilterPredicate>),
}

impl NativeFilter {
    pub fn property(&self) -> Option<&str> {
        match self {
            NativeFilter::Predicate(p) => Some(&p.property),
            NativeFilter::AnyOf(preds) => preds.first().map(|p| p.property.as_str()),
        }
    }

    pub fn is_inequality(&self) -> bool {
        match self {
            NativeFilter::Predicate(p) => p.operator.is_inequality(),
            NativeFilter::AnyOf(preds) => preds.iter().any(|p| p.operator.is_inequality()),
        }
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, NativeFilter::Predicate(p) if p.operator == FilterOperator::Eq)
    }
}

impl fmt::Display for NativeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeFilter::Predicate(p) => write!(f, "{}", p),
            NativeFilter::AnyOf(preds) => {
                let parts: Vec<String> = preds.iter().map(ToString::to_string).collect();
                write!(f, "({})", parts.join(" || "))
            }
        }
    }
}

/// Native sort order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortPredicate {
    pub property: String,
    pub direction: SortDirection,
}

impl SortPredicate {
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortDirection::Desc,
        }
    }
}

impl fmt::Display for SortPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.property, self.direction.as_str())
    }
}

/// A query the datastore executes directly against its ordered index:
/// at most one inequality property, which leads the sorts if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeQuery {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ancestor: Option<Key>,
    #[serde(default)]
    pub filters: Vec<NativeFilter>,
    #[serde(default)]
    pub sorts: Vec<SortPredicate>,
    #[serde(default)]
    pub keys_only: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projection: Vec<String>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Absolute start position decoded from a cursor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,
}

impl NativeQuery {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ancestor: None,
            filters: Vec::new(),
            sorts: Vec::new(),
            keys_only: false,
            projection: Vec::new(),
            offset: 0,
            limit: None,
            start: None,
        }
    }

    /// The single inequality property, if any
    pub fn inequality_property(&self) -> Option<&str> {
        self.filters
            .iter()
            .find(|f| f.is_inequality())
            .and_then(NativeFilter::property)
    }

    /// Position of the first result in the unsliced result sequence, or
    /// `None` when start plus offset does not fit in a `u64`
    pub fn first_position(&self) -> Option<u64> {
        self.start.unwrap_or(0).checked_add(self.offset)
    }

    /// Copy without paging, used when paging moves client-side
    pub fn unpaged(&self) -> NativeQuery {
        NativeQuery {
            offset: 0,
            limit: None,
            start: None,
            ..self.clone()
        }
    }
}

/// Client-side hash join used when a join cannot run as a merge join
#[derive(Debug, Clone, PartialEq)]
pub struct HashJoin {
    /// Keys-only query over the child kind
    pub child: NativeQuery,
    /// Parent property holding child keys
    pub parent_property: String,
}

/// Fully bound predicate tree evaluated client-side
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare {
        property: String,
        op: CompareOp,
        value: Value,
    },
    In {
        property: String,
        values: Vec<Value>,
    },
    Like {
        property: String,
        pattern: String,
    },
    StartsWith {
        property: String,
        prefix: String,
    },
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::And(items) | Predicate::Or(items) => {
                let sep = if matches!(self, Predicate::And(_)) { " && " } else { " || " };
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "({})", parts.join(sep))
            }
            Predicate::Not(inner) => write!(f, "NOT {}", inner),
            Predicate::Compare { property, op, value } => {
                write!(f, "{} {} {}", property, op.symbol(), value)
            }
            Predicate::In { property, values } => {
                write!(f, "{} IN {}", property, Value::List(values.clone()))
            }
            Predicate::Like { property, pattern } => write!(f, "{} LIKE {:?}", property, pattern),
            Predicate::StartsWith { property, prefix } => {
                write!(f, "{}.startsWith({:?})", property, prefix)
            }
        }
    }
}

/// Native query followed by client-side filter, sort and slice
#[derive(Debug, Clone, PartialEq)]
pub struct InMemoryPlan {
    /// Unpaged native query supplying candidates
    pub query: NativeQuery,
    pub join: Option<HashJoin>,
    pub filter: Option<Predicate>,
    pub sorts: Vec<SortPredicate>,
    pub offset: u64,
    pub limit: Option<u64>,
    pub keys_only: bool,
    pub projection: Vec<String>,
}

/// Direct key lookup, intersected with co-occurring equality filters
#[derive(Debug, Clone, PartialEq)]
pub struct BatchGetPlan {
    pub kind: String,
    pub keys: Vec<Key>,
    pub filters: Vec<FilterPredicate>,
    pub offset: u64,
    pub limit: Option<u64>,
    pub keys_only: bool,
    pub projection: Vec<String>,
}

/// Streaming merge join between parents sorted by the join property and a
/// keys-only child query sorted by key
#[derive(Debug, Clone, PartialEq)]
pub struct MergeJoinPlan {
    pub parent: NativeQuery,
    pub child: NativeQuery,
    pub join_property: String,
    pub offset: u64,
    pub limit: Option<u64>,
    pub keys_only: bool,
    pub projection: Vec<String>,
}

/// Source of a count
#[derive(Debug, Clone, PartialEq)]
pub enum CountPlan {
    /// Native count primitive honoring the query's offset/limit
    Native(NativeQuery),
    /// Count the rows of another plan
    Rows(Box<ExecutionPlan>),
}

/// Compiled plan, one variant per execution strategy
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionPlan {
    SingleNativeQuery(NativeQuery),
    NativeQueryWithInMemoryFilter(InMemoryPlan),
    BatchGetByKeys(BatchGetPlan),
    MergeJoin(MergeJoinPlan),
    Count(CountPlan),
}

impl ExecutionPlan {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionPlan::SingleNativeQuery(_) => "SINGLE_NATIVE_QUERY",
            ExecutionPlan::NativeQueryWithInMemoryFilter(_) => "NATIVE_QUERY_WITH_IN_MEMORY_FILTER",
            ExecutionPlan::BatchGetByKeys(_) => "BATCH_GET_BY_KEYS",
            ExecutionPlan::MergeJoin(_) => "MERGE_JOIN",
            ExecutionPlan::Count(_) => "COUNT",
        }
    }

    /// The native query when the plan is exactly one streaming query
    pub fn single_query(&self) -> Option<&NativeQuery> {
        match self {
            ExecutionPlan::SingleNativeQuery(q) => Some(q),
            _ => None,
        }
    }
}
