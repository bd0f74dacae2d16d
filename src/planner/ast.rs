//! Query AST
//!
//! Closed, typed representation of a declarative query: a filter tree,
//! sort list, optional join, projection and paging. Produced either by
//! [`super::parser`] from text or built directly through the helpers here.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Key, Value};

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    /// Returns true for the range operators (NE excluded)
    pub fn is_range(&self) -> bool {
        matches!(self, CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge)
    }

    /// Logical complement, used to push NOT into a comparison
    pub fn complement(&self) -> CompareOp {
        match self {
            CompareOp::Eq => CompareOp::Ne,
            CompareOp::Ne => CompareOp::Eq,
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Le => CompareOp::Gt,
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Ge => CompareOp::Lt,
        }
    }
}

/// Arithmetic and string operators. Parsed but never executable natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Concat,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Concat => "||",
        }
    }
}

/// Right-hand side of a predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Inline literal
    Literal(Value),
    /// Named parameter, bound at compile time
    Param(String),
    /// Unary minus
    Negate(Box<Operand>),
    /// Binary expression
    Binary {
        op: BinaryOp,
        left: Box<Operand>,
        right: Box<Operand>,
    },
    /// Current time, read from the compiler clock
    CurrentTimestamp,
}

impl Operand {
    pub fn literal(value: impl Into<Value>) -> Self {
        Operand::Literal(value.into())
    }

    pub fn param(name: impl Into<String>) -> Self {
        Operand::Param(name.into())
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Literal(value)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(v) => write!(f, "{}", v),
            Operand::Param(name) => write!(f, ":{}", name),
            Operand::Negate(inner) => write!(f, "-{}", inner),
            Operand::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Operand::CurrentTimestamp => write!(f, "CURRENT_TIMESTAMP"),
        }
    }
}

/// Filter expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Compare {
        property: String,
        op: CompareOp,
        operand: Operand,
    },
    /// `property IN operand`; the operand must resolve to a list
    In { property: String, operand: Operand },
    /// `operand MEMBER OF property` over a multi-valued property
    MemberOf { operand: Operand, property: String },
    /// SQL-style LIKE with `%` and `_` wildcards
    Like {
        property: String,
        pattern: Operand,
        escape: Option<char>,
    },
    /// `property.startsWith(prefix)`
    StartsWith { property: String, prefix: Operand },
}

impl Expr {
    pub fn compare(property: impl Into<String>, op: CompareOp, operand: impl Into<Operand>) -> Self {
        Expr::Compare {
            property: property.into(),
            op,
            operand: operand.into(),
        }
    }

    pub fn eq(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Eq, Operand::Literal(value.into()))
    }

    pub fn ne(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Ne, Operand::Literal(value.into()))
    }

    pub fn lt(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Lt, Operand::Literal(value.into()))
    }

    pub fn le(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Le, Operand::Literal(value.into()))
    }

    pub fn gt(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Gt, Operand::Literal(value.into()))
    }

    pub fn ge(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Ge, Operand::Literal(value.into()))
    }

    pub fn in_list(property: impl Into<String>, values: Vec<Value>) -> Self {
        Expr::In {
            property: property.into(),
            operand: Operand::Literal(Value::List(values)),
        }
    }

    pub fn like(property: impl Into<String>, pattern: impl Into<Value>) -> Self {
        Expr::Like {
            property: property.into(),
            pattern: Operand::Literal(pattern.into()),
            escape: None,
        }
    }

    pub fn and(self, other: Expr) -> Expr {
        match self {
            Expr::And(mut items) => {
                items.push(other);
                Expr::And(items)
            }
            first => Expr::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Expr) -> Expr {
        match self {
            Expr::Or(mut items) => {
                items.push(other);
                Expr::Or(items)
            }
            first => Expr::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn joined(f: &mut fmt::Formatter<'_>, items: &[Expr], sep: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", sep)?;
                }
                write!(f, "{}", item)?;
            }
            write!(f, ")")
        }

        match self {
            Expr::And(items) => joined(f, items, "&&"),
            Expr::Or(items) => joined(f, items, "||"),
            Expr::Not(inner) => write!(f, "NOT {}", inner),
            Expr::Compare { property, op, operand } => {
                write!(f, "{} {} {}", property, op.symbol(), operand)
            }
            Expr::In { property, operand } => write!(f, "{} IN {}", property, operand),
            Expr::MemberOf { operand, property } => {
                write!(f, "{} MEMBER OF {}", operand, property)
            }
            Expr::Like { property, pattern, escape } => {
                write!(f, "{} LIKE {}", property, pattern)?;
                if let Some(c) = escape {
                    write!(f, " ESCAPE '{}'", c)?;
                }
                Ok(())
            }
            Expr::StartsWith { property, prefix } => {
                write!(f, "{}.startsWith({})", property, prefix)
            }
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// One entry of an ORDER BY list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub property: String,
    pub direction: SortDirection,
}

impl SortSpec {
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

/// Join between the candidate kind and a child kind.
///
/// `parent_property` holds child keys on each parent record. Child
/// filters are ordinary filter predicates whose property is prefixed with
/// `variable.` (e.g. `c.name == "x"`).
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub variable: String,
    pub child_kind: String,
    pub parent_property: String,
    pub operator: CompareOp,
    pub outer: bool,
}

impl JoinClause {
    /// Inner equality join: `parent_property == variable`
    pub fn new(
        variable: impl Into<String>,
        child_kind: impl Into<String>,
        parent_property: impl Into<String>,
    ) -> Self {
        Self {
            variable: variable.into(),
            child_kind: child_kind.into(),
            parent_property: parent_property.into(),
            operator: CompareOp::Eq,
            outer: false,
        }
    }

    /// Strips the join variable prefix from a property name, returning the
    /// child property if the name refers to the child.
    pub fn child_property<'p>(&self, property: &'p str) -> Option<&'p str> {
        property
            .strip_prefix(self.variable.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
    }
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFn {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFn {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFn::Count => "COUNT",
            AggregateFn::Sum => "SUM",
            AggregateFn::Avg => "AVG",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
        }
    }
}

/// What the query returns
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Projection {
    /// Whole records
    #[default]
    Entities,
    /// Keys only
    KeysOnly,
    /// Selected properties
    Fields(Vec<String>),
    /// Aggregate functions, optionally alongside plain fields
    Aggregates {
        functions: Vec<AggregateFn>,
        fields: Vec<String>,
    },
}

impl Projection {
    pub fn count() -> Self {
        Projection::Aggregates {
            functions: vec![AggregateFn::Count],
            fields: Vec::new(),
        }
    }
}

/// A complete query over one candidate kind
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Candidate kind
    pub kind: String,
    /// Filter tree
    pub filter: Option<Expr>,
    /// Sort list, order-sensitive
    pub sorts: Vec<SortSpec>,
    /// Ancestor restriction given directly rather than as a filter
    pub ancestor: Option<Key>,
    /// Optional join
    pub join: Option<JoinClause>,
    /// Result shape
    pub projection: Projection,
    /// GROUP BY properties
    pub group_by: Vec<String>,
    /// HAVING clause
    pub having: Option<Expr>,
    /// Rows to skip; validated to be non-negative
    pub offset: i64,
    /// Maximum rows; validated to be non-negative
    pub limit: Option<i64>,
    /// Bound parameter values
    pub params: BTreeMap<String, Value>,
    /// Web-safe start cursor
    pub cursor: Option<String>,
}

impl Query {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            filter: None,
            sorts: Vec::new(),
            ancestor: None,
            join: None,
            projection: Projection::Entities,
            group_by: Vec::new(),
            having: None,
            offset: 0,
            limit: None,
            params: BTreeMap::new(),
            cursor: None,
        }
    }

    /// ANDs `expr` into the filter
    pub fn with_filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn with_ancestor(mut self, ancestor: Key) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    pub fn with_join(mut self, join: JoinClause) -> Self {
        self.join = Some(join);
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}
