//! Compile-time error types
//!
//! Every error here is a deterministic function of the query shape and is
//! raised before any datastore call.
//!
//! Error codes:
//! - QUERY_UNSUPPORTED_OPERATOR: the operator itself cannot be executed
//! - QUERY_UNSUPPORTED_FEATURE: operators are fine alone, the combination is not
//! - QUERY_* misuse codes: caller errors (bad paging, parameters, cursors)

use std::fmt;

use thiserror::Error;

use super::ast::{AggregateFn, BinaryOp, CompareOp};

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;

/// Operators with no native or in-memory evaluation path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Disjunction across different properties
    Or,
    /// NOT wrapping a conjunction or a multi-property disjunction
    Not,
    /// Arithmetic or concatenation
    Binary(BinaryOp),
    /// Aggregates other than COUNT
    Aggregate(AggregateFn),
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Or => write!(f, "OR"),
            Operator::Not => write!(f, "NOT"),
            Operator::Binary(op) => write!(f, "{}", op.symbol()),
            Operator::Aggregate(func) => write!(f, "{}", func.as_str()),
        }
    }
}

/// Query shapes the datastore cannot execute even though each operator is
/// individually supported. One variant per rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Unsupported {
    #[error("only one inequality property is allowed per query (found '{first}' and '{second}')")]
    MultipleInequality { first: String, second: String },

    #[error("inequality property '{property}' must be the first sort, ascending (first sort is '{sort}')")]
    SortMustLeadWithInequality { property: String, sort: String },

    #[error("LIKE pattern {0:?} is not a literal prefix followed by a single trailing '%'")]
    LikePattern(String),

    #[error("LIKE with a custom escape character is not supported")]
    EscapeNotSupported,

    #[error("OR filters can only check equality (property '{property}')")]
    OrRequiresEquality { property: String },

    #[error("NOT cannot be applied to {0}")]
    Negated(&'static str),

    #[error("a query can have at most one ancestor restriction")]
    DuplicateAncestor,

    #[error("ancestor restriction only supports equality (found '{0}')")]
    AncestorOperator(String),

    #[error("cannot sort by the ancestor")]
    SortByAncestor,

    #[error("identifier filters cannot be combined with an inequality on '{property}'")]
    IdentifierWithInequality { property: String },

    #[error("operator '{}' cannot be applied to a list of values", .0.symbol())]
    ListOperand(CompareOp),

    #[error("join operator '{}' is not supported, joins must use equality", .0.symbol())]
    JoinOperator(CompareOp),

    #[error("filter on parent property '{property}' uses '{operator}', joins only support equality filters")]
    JoinParentFilter { property: String, operator: String },

    #[error("filter on child property '{property}' uses '{operator}', joins only support equality filters")]
    JoinChildFilter { property: String, operator: String },

    #[error("joins can only be sorted by the join property '{join_property}' (found '{property}')")]
    JoinSortTarget { property: String, join_property: String },

    #[error("joins support at most one sort order")]
    JoinSortCount,

    #[error("joins can only be sorted in ascending order")]
    JoinSortDirection,

    #[error("joins cannot be sorted by child property '{property}'")]
    JoinChildSort { property: String },

    #[error("outer joins are not supported")]
    OuterJoin,

    #[error("COUNT cannot be combined with projected field '{field}'")]
    CountWithProjection { field: String },

    #[error("GROUP BY is not supported")]
    GroupBy,

    #[error("HAVING is not supported")]
    Having,
}

impl Unsupported {
    /// Stable rule name for logs and explain output
    pub fn rule(&self) -> &'static str {
        match self {
            Unsupported::MultipleInequality { .. } => "multiple_inequality",
            Unsupported::SortMustLeadWithInequality { .. } => "inequality_sort_order",
            Unsupported::LikePattern(_) => "like_pattern",
            Unsupported::EscapeNotSupported => "like_escape",
            Unsupported::OrRequiresEquality { .. } => "or_requires_equality",
            Unsupported::Negated(_) => "negation",
            Unsupported::DuplicateAncestor => "duplicate_ancestor",
            Unsupported::AncestorOperator(_) => "ancestor_operator",
            Unsupported::SortByAncestor => "sort_by_ancestor",
            Unsupported::IdentifierWithInequality { .. } => "identifier_with_inequality",
            Unsupported::ListOperand(_) => "list_operand",
            Unsupported::JoinOperator(_) => "join_operator",
            Unsupported::JoinParentFilter { .. } => "join_parent_filter",
            Unsupported::JoinChildFilter { .. } => "join_child_filter",
            Unsupported::JoinSortTarget { .. } => "join_sort_target",
            Unsupported::JoinSortCount => "join_sort_count",
            Unsupported::JoinSortDirection => "join_sort_direction",
            Unsupported::JoinChildSort { .. } => "join_child_sort",
            Unsupported::OuterJoin => "outer_join",
            Unsupported::CountWithProjection { .. } => "count_with_projection",
            Unsupported::GroupBy => "group_by",
            Unsupported::Having => "having",
        }
    }

    /// Returns true for join rules the in-memory hash join can satisfy
    pub fn is_merge_join_restriction(&self) -> bool {
        matches!(
            self,
            Unsupported::JoinParentFilter { .. }
                | Unsupported::JoinChildFilter { .. }
                | Unsupported::JoinSortTarget { .. }
                | Unsupported::JoinSortCount
                | Unsupported::JoinSortDirection
        )
    }
}

/// Caller errors: bad paging values, parameters, cursors, unparsable text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MisuseError {
    #[error("offset must be non-negative (got {0})")]
    NegativeOffset(i64),

    #[error("limit must be non-negative (got {0})")]
    NegativeLimit(i64),

    #[error("parameter ':{0}' is not bound")]
    UnboundParameter(String),

    #[error("'{name}' expects a {expected} value but got {found}")]
    ParameterType {
        name: String,
        expected: String,
        found: String,
    },

    #[error("IN list for '{0}' is empty")]
    EmptyInList(String),

    #[error("unknown kind '{0}'")]
    UnknownKind(String),

    #[error("parse error at byte {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("invalid cursor: {0}")]
    Cursor(String),

    #[error("cursor was issued for a different query")]
    CursorMismatch,

    #[error("a count query selects no records to delete")]
    DeleteCount,
}

impl MisuseError {
    pub fn code(&self) -> &'static str {
        match self {
            MisuseError::NegativeOffset(_) => "QUERY_INVALID_OFFSET",
            MisuseError::NegativeLimit(_) => "QUERY_INVALID_LIMIT",
            MisuseError::UnboundParameter(_) => "QUERY_UNBOUND_PARAMETER",
            MisuseError::ParameterType { .. } => "QUERY_PARAMETER_TYPE",
            MisuseError::EmptyInList(_) => "QUERY_EMPTY_IN_LIST",
            MisuseError::UnknownKind(_) => "QUERY_UNKNOWN_KIND",
            MisuseError::Parse { .. } => "QUERY_PARSE_ERROR",
            MisuseError::Cursor(_) => "QUERY_INVALID_CURSOR",
            MisuseError::CursorMismatch => "QUERY_CURSOR_MISMATCH",
            MisuseError::DeleteCount => "QUERY_DELETE_COUNT",
        }
    }

    pub(crate) fn parse(position: usize, message: impl Into<String>) -> Self {
        MisuseError::Parse {
            position,
            message: message.into(),
        }
    }

    pub(crate) fn parameter_type(
        name: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        MisuseError::ParameterType {
            name: name.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// Compilation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("unsupported operator '{0}'")]
    UnsupportedOperator(Operator),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(#[from] Unsupported),

    #[error(transparent)]
    Misuse(#[from] MisuseError),
}

impl CompileError {
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::UnsupportedOperator(_) => "QUERY_UNSUPPORTED_OPERATOR",
            CompileError::UnsupportedFeature(_) => "QUERY_UNSUPPORTED_FEATURE",
            CompileError::Misuse(err) => err.code(),
        }
    }

    /// Returns true if the failure is about query shape only, so that the
    /// whole filter can still be evaluated client-side.
    pub fn evaluable_in_memory(&self) -> bool {
        match self {
            CompileError::UnsupportedOperator(op) => matches!(op, Operator::Or | Operator::Not),
            CompileError::UnsupportedFeature(rule) => matches!(
                rule,
                Unsupported::MultipleInequality { .. }
                    | Unsupported::SortMustLeadWithInequality { .. }
                    | Unsupported::LikePattern(_)
                    | Unsupported::OrRequiresEquality { .. }
                    | Unsupported::Negated(_)
                    | Unsupported::IdentifierWithInequality { .. }
            ),
            CompileError::Misuse(_) => false,
        }
    }

    /// The violated rule, when this is an unsupported-feature error
    pub fn unsupported(&self) -> Option<&Unsupported> {
        match self {
            CompileError::UnsupportedFeature(rule) => Some(rule),
            _ => None,
        }
    }
}
