//! Query planner subsystem
//!
//! Compiles declarative queries into execution plans for an ordered
//! key-value datastore.
//!
//! # Design Principles
//!
//! - Deterministic: same query, parameters and clock give the same plan
//! - Fail closed: every unsupported shape is rejected before any datastore call
//! - Explicit: client-side evaluation only when the configuration allows it
//!
//! # Plan Selection (strict order)
//!
//! 1. Identifier equality or IN with only equality co-filters: batch get
//! 2. Join: merge join, or an in-memory hash join when permitted
//! 3. Natively expressible filter: single native query
//! 4. Shape violation with in-memory filtering permitted: native query
//!    plus client-side filter, sort and slice

mod ast;
mod compiler;
mod cursor;
mod errors;
mod explain;
mod parser;
mod plan;

pub use ast::{
    AggregateFn, BinaryOp, CompareOp, Expr, JoinClause, Operand, Projection, Query,
    SortDirection, SortSpec,
};
pub use compiler::{KindMetadata, KindRegistry, QueryCompiler};
pub use cursor::Cursor;
pub use errors::{CompileError, CompileResult, MisuseError, Operator, Unsupported};
pub use explain::ExplainPlan;
pub use parser::{parse_filter, parse_ordering};
pub use plan::{
    BatchGetPlan, CountPlan, ExecutionPlan, FilterOperator, FilterPredicate, HashJoin,
    InMemoryPlan, MergeJoinPlan, NativeFilter, NativeQuery, Predicate, SortPredicate,
};
