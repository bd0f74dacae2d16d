//! Query compiler
//!
//! Turns a [`Query`] into an [`ExecutionPlan`] the datastore can run.
//!
//! Compilation proceeds in fixed order and fails closed before any
//! datastore call:
//!
//! 1. Kind lookup and paging validation
//! 2. Projection analysis (keys-only, fields, COUNT)
//! 3. Parameter binding into a [`Predicate`] tree; operator errors surface here
//! 4. Classification against the native index model; shape errors surface here
//! 5. Plan selection: batch get, single native query, merge join, count,
//!    or a client-side fallback when the configuration allows it

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ast::{CompareOp, Expr, JoinClause, Operand, Projection, Query, SortDirection, SortSpec};
use super::cursor::Cursor;
use super::errors::{CompileError, CompileResult, MisuseError, Operator, Unsupported};
use super::plan::{
    BatchGetPlan, CountPlan, ExecutionPlan, FilterOperator, FilterPredicate, HashJoin,
    InMemoryPlan, MergeJoinPlan, NativeFilter, NativeQuery, Predicate, SortPredicate,
};
use crate::config::QueryConfig;
use crate::model::{Key, Value, ANCESTOR_PROPERTY, KEY_PROPERTY};
use crate::observability::{log_event, Event};

/// Metadata the compiler needs about a kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindMetadata {
    /// Property name that addresses the record key
    #[serde(default)]
    pub id_property: Option<String>,
    /// Property name that addresses the parent key (ancestor restriction)
    #[serde(default)]
    pub parent_property: Option<String>,
}

impl KindMetadata {
    pub fn with_id(mut self, property: impl Into<String>) -> Self {
        self.id_property = Some(property.into());
        self
    }

    pub fn with_parent(mut self, property: impl Into<String>) -> Self {
        self.parent_property = Some(property.into());
        self
    }

    /// Maps mapped identifier/parent names onto the reserved properties
    fn normalize<'p>(&self, property: &'p str) -> &'p str {
        if self.id_property.as_deref() == Some(property) {
            KEY_PROPERTY
        } else if self.parent_property.as_deref() == Some(property) {
            ANCESTOR_PROPERTY
        } else {
            property
        }
    }
}

/// Read-only kind registry
pub trait KindRegistry {
    /// Metadata for `kind`, or None if the kind is unknown
    fn metadata(&self, kind: &str) -> Option<&KindMetadata>;
}

impl KindRegistry for BTreeMap<String, KindMetadata> {
    fn metadata(&self, kind: &str) -> Option<&KindMetadata> {
        self.get(kind)
    }
}

impl KindRegistry for HashMap<String, KindMetadata> {
    fn metadata(&self, kind: &str) -> Option<&KindMetadata> {
        self.get(kind)
    }
}

/// Compiles queries against a kind registry and query configuration
pub struct QueryCompiler<'a, R: KindRegistry> {
    registry: &'a R,
    config: &'a QueryConfig,
    clock: Box<dyn Fn() -> DateTime<Utc> + 'a>,
}

/// Result shape derived from the projection
#[derive(Debug, Default)]
struct Output {
    keys_only: bool,
    projection: Vec<String>,
    count: bool,
}

impl<'a, R: KindRegistry> QueryCompiler<'a, R> {
    pub fn new(registry: &'a R, config: &'a QueryConfig) -> Self {
        Self {
            registry,
            config,
            clock: Box::new(Utc::now),
        }
    }

    /// Replaces the clock used for CURRENT_TIMESTAMP
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'a) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Compiles a query. Deterministic for a fixed clock: same inputs, same plan.
    pub fn compile(&self, query: &Query) -> CompileResult<ExecutionPlan> {
        let meta = self.kind_metadata(&query.kind)?;
        let (offset, limit) = paging(query)?;

        if !query.group_by.is_empty() {
            return Err(Unsupported::GroupBy.into());
        }
        if query.having.is_some() {
            return Err(Unsupported::Having.into());
        }
        let output = analyze_projection(meta, &query.projection)?;

        let child = match &query.join {
            Some(join) => Some((join, self.kind_metadata(&join.child_kind)?)),
            None => None,
        };
        let binder = Binder {
            kind: &query.kind,
            meta,
            child,
            params: &query.params,
            now: (self.clock)(),
        };
        let filter = query.filter.as_ref().map(|e| binder.bind(e)).transpose()?;

        let plan = match &query.join {
            Some(join) => self.compile_join(query, meta, join, filter, offset, limit, output)?,
            None => self.compile_single(query, meta, filter, offset, limit, output)?,
        };

        match &query.cursor {
            Some(encoded) => apply_cursor(plan, encoded),
            None => Ok(plan),
        }
    }

    fn kind_metadata(&self, kind: &str) -> CompileResult<&'a KindMetadata> {
        self.registry
            .metadata(kind)
            .ok_or_else(|| MisuseError::UnknownKind(kind.to_string()).into())
    }

    fn compile_single(
        &self,
        query: &Query,
        meta: &KindMetadata,
        filter: Option<Predicate>,
        offset: u64,
        limit: Option<u64>,
        output: Output,
    ) -> CompileResult<ExecutionPlan> {
        let sorts = map_sorts(meta, &query.sorts)?;

        let parts = match native_parts(filter.as_ref(), query.ancestor.clone(), &sorts) {
            Ok(parts) => parts,
            Err(err) if self.config.allow_in_memory_filter && err.evaluable_in_memory() => {
                log_fallback(&query.kind, &err);
                let plan = ExecutionPlan::NativeQueryWithInMemoryFilter(InMemoryPlan {
                    query: NativeQuery {
                        ancestor: query.ancestor.clone(),
                        ..NativeQuery::new(query.kind.as_str())
                    },
                    join: None,
                    filter,
                    sorts,
                    offset,
                    limit,
                    keys_only: output.keys_only,
                    projection: output.projection,
                });
                return Ok(wrap_count(plan, output.count));
            }
            Err(err) => return Err(err),
        };

        if let Some(plan) = batch_get(&query.kind, &parts, &sorts, offset, limit, &output) {
            return Ok(wrap_count(plan, output.count));
        }

        let mut native = NativeQuery::new(query.kind.as_str());
        native.ancestor = parts.ancestor;
        native.filters = parts.filters;
        native.sorts = sorts;
        native.offset = offset;
        native.limit = limit;
        native.keys_only = output.keys_only;
        native.projection = output.projection;

        if output.count {
            return Ok(ExecutionPlan::Count(CountPlan::Native(native)));
        }
        Ok(ExecutionPlan::SingleNativeQuery(native))
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_join(
        &self,
        query: &Query,
        meta: &KindMetadata,
        join: &JoinClause,
        filter: Option<Predicate>,
        offset: u64,
        limit: Option<u64>,
        output: Output,
    ) -> CompileResult<ExecutionPlan> {
        if join.outer {
            return Err(Unsupported::OuterJoin.into());
        }
        if join.operator != CompareOp::Eq {
            return Err(Unsupported::JoinOperator(join.operator).into());
        }

        let (parent_preds, child_preds) = split_join_filter(filter, &join.variable)?;

        if let Some(sort) = query
            .sorts
            .iter()
            .find(|s| join.child_property(&s.property).is_some())
        {
            return Err(Unsupported::JoinChildSort {
                property: sort.property.clone(),
            }
            .into());
        }
        let sorts = map_sorts(meta, &query.sorts)?;
        let join_property = join.parent_property.clone();

        let child_parts = |preds: &[Predicate], sorts: &[SortPredicate]| {
            native_parts(conjunction(preds.to_vec()).as_ref(), None, sorts)
        };

        match merge_violation(&parent_preds, &child_preds, &sorts, &join_property) {
            None => {
                let parent_sorts = vec![SortPredicate::asc(join_property.as_str())];
                let parts = native_parts(
                    conjunction(parent_preds).as_ref(),
                    query.ancestor.clone(),
                    &parent_sorts,
                )?;
                let mut parent = NativeQuery::new(query.kind.as_str());
                parent.ancestor = parts.ancestor;
                parent.filters = parts.filters;
                parent.sorts = parent_sorts;

                let child_sorts = vec![SortPredicate::asc(KEY_PROPERTY)];
                let parts = child_parts(&child_preds, &child_sorts)?;
                let mut child = NativeQuery::new(join.child_kind.as_str());
                child.filters = parts.filters;
                child.sorts = child_sorts;
                child.keys_only = true;

                let plan = ExecutionPlan::MergeJoin(MergeJoinPlan {
                    parent,
                    child,
                    join_property,
                    offset,
                    limit,
                    keys_only: output.keys_only,
                    projection: output.projection,
                });
                Ok(wrap_count(plan, output.count))
            }
            Some(rule) if self.config.allow_in_memory_join && rule.is_merge_join_restriction() => {
                let err = CompileError::from(rule);
                log_fallback(&query.kind, &err);

                let parts = child_parts(&child_preds, &[])?;
                let mut child = NativeQuery::new(join.child_kind.as_str());
                child.filters = parts.filters;
                child.keys_only = true;

                let plan = ExecutionPlan::NativeQueryWithInMemoryFilter(InMemoryPlan {
                    query: NativeQuery {
                        ancestor: query.ancestor.clone(),
                        ..NativeQuery::new(query.kind.as_str())
                    },
                    join: Some(HashJoin {
                        child,
                        parent_property: join_property,
                    }),
                    filter: conjunction(parent_preds),
                    sorts,
                    offset,
                    limit,
                    keys_only: output.keys_only,
                    projection: output.projection,
                });
                Ok(wrap_count(plan, output.count))
            }
            Some(rule) => Err(rule.into()),
        }
    }
}

fn log_fallback(kind: &str, reason: &CompileError) {
    let reason = reason.to_string();
    log_event(
        Event::InMemoryFallback,
        &[("kind", kind), ("reason", reason.as_str())],
    );
}

fn wrap_count(plan: ExecutionPlan, count: bool) -> ExecutionPlan {
    if count {
        ExecutionPlan::Count(CountPlan::Rows(Box::new(plan)))
    } else {
        plan
    }
}

fn paging(query: &Query) -> CompileResult<(u64, Option<u64>)> {
    let offset = u64::try_from(query.offset).map_err(|_| MisuseError::NegativeOffset(query.offset))?;
    let limit = match query.limit {
        Some(limit) => Some(u64::try_from(limit).map_err(|_| MisuseError::NegativeLimit(limit))?),
        None => None,
    };
    Ok((offset, limit))
}

fn analyze_projection(meta: &KindMetadata, projection: &Projection) -> CompileResult<Output> {
    match projection {
        Projection::Entities => Ok(Output::default()),
        Projection::KeysOnly => Ok(Output {
            keys_only: true,
            ..Output::default()
        }),
        Projection::Fields(fields) => {
            let fields: Vec<String> = fields
                .iter()
                .filter(|f| meta.normalize(f) != KEY_PROPERTY)
                .cloned()
                .collect();
            Ok(Output {
                keys_only: fields.is_empty(),
                projection: fields,
                count: false,
            })
        }
        Projection::Aggregates { functions, fields } => {
            if let Some(func) = functions.iter().find(|f| **f != super::ast::AggregateFn::Count) {
                return Err(CompileError::UnsupportedOperator(Operator::Aggregate(*func)));
            }
            if let Some(field) = fields.iter().find(|f| meta.normalize(f) != KEY_PROPERTY) {
                return Err(Unsupported::CountWithProjection {
                    field: field.clone(),
                }
                .into());
            }
            Ok(Output {
                keys_only: true,
                projection: Vec::new(),
                count: true,
            })
        }
    }
}

fn map_sorts(meta: &KindMetadata, sorts: &[SortSpec]) -> CompileResult<Vec<SortPredicate>> {
    sorts
        .iter()
        .map(|sort| {
            let property = meta.normalize(&sort.property);
            if property == ANCESTOR_PROPERTY {
                return Err(Unsupported::SortByAncestor.into());
            }
            Ok(SortPredicate {
                property: property.to_string(),
                direction: sort.direction,
            })
        })
        .collect()
}

fn apply_cursor(plan: ExecutionPlan, encoded: &str) -> CompileResult<ExecutionPlan> {
    let cursor = Cursor::from_web_safe_string(encoded)?;
    match plan {
        ExecutionPlan::SingleNativeQuery(mut native) => {
            cursor.verify(&native)?;
            native.start = Some(cursor.position());
            if native.first_position().is_none() {
                return Err(MisuseError::Cursor(format!(
                    "cursor position {} is out of range for offset {}",
                    cursor.position(),
                    native.offset
                ))
                .into());
            }
            Ok(ExecutionPlan::SingleNativeQuery(native))
        }
        other => Err(MisuseError::Cursor(format!(
            "cursors require a single native query, this query compiles to {}",
            other.name()
        ))
        .into()),
    }
}

// ==================
// Binding
// ==================

/// Binds parameters and normalizes property names
struct Binder<'b> {
    kind: &'b str,
    meta: &'b KindMetadata,
    child: Option<(&'b JoinClause, &'b KindMetadata)>,
    params: &'b BTreeMap<String, Value>,
    now: DateTime<Utc>,
}

/// A property resolved against the kind that owns it
struct Target<'b> {
    name: String,
    base: String,
    kind: &'b str,
}

impl<'b> Binder<'b> {
    fn target(&self, property: &str) -> Target<'b> {
        if let Some((join, child_meta)) = self.child {
            if let Some(child_property) = join.child_property(property) {
                let base = child_meta.normalize(child_property).to_string();
                return Target {
                    name: format!("{}.{}", join.variable, base),
                    base,
                    kind: join.child_kind.as_str(),
                };
            }
        }
        let base = self.meta.normalize(property).to_string();
        Target {
            name: base.clone(),
            base,
            kind: self.kind,
        }
    }

    fn bind(&self, expr: &Expr) -> CompileResult<Predicate> {
        match expr {
            Expr::And(items) => Ok(Predicate::And(
                items.iter().map(|e| self.bind(e)).collect::<CompileResult<_>>()?,
            )),
            Expr::Or(items) => Ok(Predicate::Or(
                items.iter().map(|e| self.bind(e)).collect::<CompileResult<_>>()?,
            )),
            Expr::Not(inner) => Ok(Predicate::Not(Box::new(self.bind(inner)?))),
            Expr::Compare { property, op, operand } => {
                let target = self.target(property);
                let value = self.resolve(operand)?;
                let value = coerce(&target, value)?;
                Ok(Predicate::Compare {
                    property: target.name,
                    op: *op,
                    value,
                })
            }
            Expr::MemberOf { operand, property } => {
                let target = self.target(property);
                let value = coerce(&target, self.resolve(operand)?)?;
                Ok(Predicate::Compare {
                    property: target.name,
                    op: CompareOp::Eq,
                    value,
                })
            }
            Expr::In { property, operand } => {
                let target = self.target(property);
                let values = match self.resolve(operand)? {
                    Value::List(values) => values,
                    other => {
                        return Err(MisuseError::parameter_type(
                            property.as_str(),
                            "list",
                            other.type_name(),
                        )
                        .into())
                    }
                };
                if values.is_empty() {
                    return Err(MisuseError::EmptyInList(property.clone()).into());
                }
                let values = values
                    .into_iter()
                    .map(|v| coerce(&target, v))
                    .collect::<CompileResult<Vec<_>>>()?;
                Ok(Predicate::In {
                    property: target.name,
                    values,
                })
            }
            Expr::Like { property, pattern, escape } => {
                if escape.is_some() {
                    return Err(Unsupported::EscapeNotSupported.into());
                }
                let pattern = self.resolve_text(property, pattern)?;
                Ok(Predicate::Like {
                    property: self.target(property).name,
                    pattern,
                })
            }
            Expr::StartsWith { property, prefix } => {
                let prefix = self.resolve_text(property, prefix)?;
                Ok(Predicate::StartsWith {
                    property: self.target(property).name,
                    prefix,
                })
            }
        }
    }

    fn resolve(&self, operand: &Operand) -> CompileResult<Value> {
        match operand {
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Param(name) => self
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| MisuseError::UnboundParameter(name.clone()).into()),
            Operand::Negate(inner) => match self.resolve(inner)? {
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| MisuseError::parameter_type("-", "negatable int", "i64::MIN").into()),
                Value::Float(x) => Ok(Value::Float(-x)),
                other => Err(MisuseError::parameter_type("-", "number", other.type_name()).into()),
            },
            Operand::Binary { op, .. } => Err(CompileError::UnsupportedOperator(Operator::Binary(*op))),
            Operand::CurrentTimestamp => Ok(Value::Timestamp(self.now)),
        }
    }

    fn resolve_text(&self, property: &str, operand: &Operand) -> CompileResult<String> {
        match self.resolve(operand)? {
            Value::Text(s) => Ok(s),
            other => Err(MisuseError::parameter_type(property, "text", other.type_name()).into()),
        }
    }
}

/// Converts identifier and ancestor values into keys
fn coerce(target: &Target<'_>, value: Value) -> CompileResult<Value> {
    if target.base == KEY_PROPERTY {
        return match value {
            Value::Int(id) => Ok(Value::Key(Key::new(target.kind, id))),
            Value::Text(name) => Ok(Value::Key(Key::new(target.kind, name))),
            Value::Key(key) if key.kind() == target.kind => Ok(Value::Key(key)),
            Value::Key(key) => Err(MisuseError::parameter_type(
                target.name.as_str(),
                format!("key of kind {}", target.kind),
                format!("key of kind {}", key.kind()),
            )
            .into()),
            Value::List(items) => Ok(Value::List(
                items
                    .into_iter()
                    .map(|v| coerce(target, v))
                    .collect::<CompileResult<_>>()?,
            )),
            other => Err(MisuseError::parameter_type(
                target.name.as_str(),
                "identifier",
                other.type_name(),
            )
            .into()),
        };
    }
    if target.base == ANCESTOR_PROPERTY {
        return match value {
            Value::Key(key) => Ok(Value::Key(key)),
            Value::List(items) => Ok(Value::List(
                items
                    .into_iter()
                    .map(|v| coerce(target, v))
                    .collect::<CompileResult<_>>()?,
            )),
            other => Err(MisuseError::parameter_type(
                target.name.as_str(),
                "ancestor key",
                other.type_name(),
            )
            .into()),
        };
    }
    Ok(value)
}

// ==================
// Native classification
// ==================

#[derive(Debug, Default)]
struct NativeParts {
    ancestor: Option<Key>,
    filters: Vec<NativeFilter>,
}

/// Classifies a bound filter into native filters and checks the resulting
/// query shape against `sorts`.
fn native_parts(
    filter: Option<&Predicate>,
    ancestor: Option<Key>,
    sorts: &[SortPredicate],
) -> CompileResult<NativeParts> {
    let mut parts = NativeParts {
        ancestor,
        filters: Vec::new(),
    };
    if let Some(filter) = filter {
        classify(filter, &mut parts)?;
    }
    check_shape(&parts, sorts)?;
    Ok(parts)
}

fn classify(pred: &Predicate, parts: &mut NativeParts) -> CompileResult<()> {
    match pred {
        Predicate::And(items) => {
            for item in items {
                classify(item, parts)?;
            }
            Ok(())
        }
        Predicate::Compare { property, op, value } => {
            if property == ANCESTOR_PROPERTY {
                if *op != CompareOp::Eq {
                    return Err(Unsupported::AncestorOperator(op.symbol().to_string()).into());
                }
                return set_ancestor(parts, value);
            }
            if let Value::List(values) = value {
                if *op != CompareOp::Eq {
                    return Err(Unsupported::ListOperand(*op).into());
                }
                if values.is_empty() {
                    return Err(MisuseError::EmptyInList(property.clone()).into());
                }
                parts.filters.push(in_filter(property, values.clone()));
                return Ok(());
            }
            let filter = match FilterOperator::from_compare(*op) {
                Some(operator) => {
                    NativeFilter::Predicate(FilterPredicate::new(property.as_str(), operator, value.clone()))
                }
                None => NativeFilter::AnyOf(vec![
                    FilterPredicate::new(property.as_str(), FilterOperator::Lt, value.clone()),
                    FilterPredicate::new(property.as_str(), FilterOperator::Gt, value.clone()),
                ]),
            };
            parts.filters.push(filter);
            Ok(())
        }
        Predicate::In { property, values } => {
            if property == ANCESTOR_PROPERTY {
                return Err(Unsupported::AncestorOperator("IN".to_string()).into());
            }
            parts.filters.push(in_filter(property, values.clone()));
            Ok(())
        }
        Predicate::Or(items) => {
            let (property, values) = normalize_or(items)?;
            if property == ANCESTOR_PROPERTY {
                return Err(Unsupported::AncestorOperator("OR".to_string()).into());
            }
            parts.filters.push(in_filter(&property, values));
            Ok(())
        }
        Predicate::Not(inner) => classify(&push_not(inner)?, parts),
        Predicate::Like { property, pattern } => match like_prefix(pattern) {
            Some(prefix) => {
                push_prefix_range(parts, property, prefix);
                Ok(())
            }
            None => Err(Unsupported::LikePattern(pattern.clone()).into()),
        },
        Predicate::StartsWith { property, prefix } => {
            push_prefix_range(parts, property, prefix);
            Ok(())
        }
    }
}

fn set_ancestor(parts: &mut NativeParts, value: &Value) -> CompileResult<()> {
    if parts.ancestor.is_some() {
        return Err(Unsupported::DuplicateAncestor.into());
    }
    match value {
        Value::Key(key) => {
            parts.ancestor = Some(key.clone());
            Ok(())
        }
        Value::List(_) => Err(Unsupported::AncestorOperator("IN".to_string()).into()),
        other => Err(MisuseError::parameter_type(ANCESTOR_PROPERTY, "ancestor key", other.type_name()).into()),
    }
}

fn in_filter(property: &str, values: Vec<Value>) -> NativeFilter {
    NativeFilter::Predicate(FilterPredicate::new(property, FilterOperator::In, Value::List(values)))
}

/// Collapses a same-property equality disjunction into one IN value list,
/// duplicate-free in order of first occurrence.
fn normalize_or(items: &[Predicate]) -> CompileResult<(String, Vec<Value>)> {
    let mut leaves = Vec::new();
    collect_or_leaves(items, &mut leaves)?;

    let property = match leaves.first() {
        Some(leaf) => leaf_property(leaf).to_string(),
        None => return Err(CompileError::UnsupportedOperator(Operator::Or)),
    };
    if leaves.iter().any(|leaf| leaf_property(leaf) != property) {
        return Err(CompileError::UnsupportedOperator(Operator::Or));
    }

    let mut values: Vec<Value> = Vec::new();
    let mut push = |value: &Value| {
        if !values.contains(value) {
            values.push(value.clone());
        }
    };
    for leaf in &leaves {
        match leaf {
            Predicate::Compare {
                op: CompareOp::Eq,
                value: Value::List(items),
                ..
            } => items.iter().for_each(&mut push),
            Predicate::Compare {
                op: CompareOp::Eq,
                value,
                ..
            } => push(value),
            Predicate::In { values: items, .. } => items.iter().for_each(&mut push),
            _ => {
                return Err(Unsupported::OrRequiresEquality {
                    property: property.clone(),
                }
                .into())
            }
        }
    }
    Ok((property, values))
}

fn collect_or_leaves<'p>(items: &'p [Predicate], leaves: &mut Vec<&'p Predicate>) -> CompileResult<()> {
    for item in items {
        match item {
            Predicate::Or(nested) => collect_or_leaves(nested, leaves)?,
            Predicate::Compare { .. }
            | Predicate::In { .. }
            | Predicate::Like { .. }
            | Predicate::StartsWith { .. } => leaves.push(item),
            Predicate::And(_) | Predicate::Not(_) => {
                return Err(CompileError::UnsupportedOperator(Operator::Or))
            }
        }
    }
    Ok(())
}

fn leaf_property(leaf: &Predicate) -> &str {
    match leaf {
        Predicate::Compare { property, .. }
        | Predicate::In { property, .. }
        | Predicate::Like { property, .. }
        | Predicate::StartsWith { property, .. } => property,
        Predicate::And(_) | Predicate::Or(_) | Predicate::Not(_) => "",
    }
}

/// Pushes a NOT into its operand
fn push_not(inner: &Predicate) -> CompileResult<Predicate> {
    match inner {
        Predicate::Compare { property, op, value } => Ok(Predicate::Compare {
            property: property.clone(),
            op: op.complement(),
            value: value.clone(),
        }),
        Predicate::Not(twice) => Ok((**twice).clone()),
        Predicate::Or(items) => {
            let mut leaves = Vec::new();
            let single_property = collect_or_leaves(items, &mut leaves).is_ok()
                && leaves
                    .windows(2)
                    .all(|w| leaf_property(w[0]) == leaf_property(w[1]));
            if single_property {
                Err(Unsupported::Negated("a disjunction").into())
            } else {
                Err(CompileError::UnsupportedOperator(Operator::Not))
            }
        }
        Predicate::And(_) => Err(CompileError::UnsupportedOperator(Operator::Not)),
        Predicate::In { .. } => Err(Unsupported::Negated("IN").into()),
        Predicate::Like { .. } => Err(Unsupported::Negated("LIKE").into()),
        Predicate::StartsWith { .. } => Err(Unsupported::Negated("startsWith").into()),
    }
}

/// Literal prefix of a `prefix%` pattern with no other wildcards
fn like_prefix(pattern: &str) -> Option<&str> {
    pattern
        .strip_suffix('%')
        .filter(|prefix| !prefix.is_empty() && !prefix.contains(['%', '_']))
}

fn push_prefix_range(parts: &mut NativeParts, property: &str, prefix: &str) {
    parts.filters.push(NativeFilter::Predicate(FilterPredicate::new(
        property,
        FilterOperator::Ge,
        Value::from(prefix),
    )));
    if let Some(upper) = prefix_upper_bound(prefix) {
        parts.filters.push(NativeFilter::Predicate(FilterPredicate::new(
            property,
            FilterOperator::Lt,
            Value::Text(upper),
        )));
    }
}

/// Smallest string greater than every string starting with `prefix`:
/// the prefix with its last character incremented.
pub(crate) fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let mut code = last as u32 + 1;
        if (0xD800..=0xDFFF).contains(&code) {
            code = 0xE000;
        }
        if let Some(next) = char::from_u32(code) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

/// Enforces the single-inequality rule and the inequality/sort rule
fn check_shape(parts: &NativeParts, sorts: &[SortPredicate]) -> CompileResult<()> {
    let mut inequality: Option<&str> = None;
    for filter in parts.filters.iter().filter(|f| f.is_inequality()) {
        let property = filter.property().unwrap_or_default();
        match inequality {
            None => inequality = Some(property),
            Some(first) if first != property => {
                return Err(Unsupported::MultipleInequality {
                    first: first.to_string(),
                    second: property.to_string(),
                }
                .into())
            }
            Some(_) => {}
        }
    }

    let Some(property) = inequality else {
        return Ok(());
    };

    if property != KEY_PROPERTY
        && parts
            .filters
            .iter()
            .any(|f| f.property() == Some(KEY_PROPERTY))
    {
        return Err(Unsupported::IdentifierWithInequality {
            property: property.to_string(),
        }
        .into());
    }

    if let Some(first) = sorts.first() {
        if first.property != property || first.direction != SortDirection::Asc {
            return Err(Unsupported::SortMustLeadWithInequality {
                property: property.to_string(),
                sort: first.property.clone(),
            }
            .into());
        }
    }
    Ok(())
}

/// Identifier EQ/IN with only co-occurring equality filters and no sorts
/// becomes a batch get.
fn batch_get(
    kind: &str,
    parts: &NativeParts,
    sorts: &[SortPredicate],
    offset: u64,
    limit: Option<u64>,
    output: &Output,
) -> Option<ExecutionPlan> {
    if !sorts.is_empty() || parts.ancestor.is_some() {
        return None;
    }

    let mut keys = None;
    let mut residual = Vec::new();
    for filter in &parts.filters {
        let NativeFilter::Predicate(pred) = filter else {
            return None;
        };
        let is_key_lookup = pred.property == KEY_PROPERTY
            && matches!(pred.operator, FilterOperator::Eq | FilterOperator::In);
        if is_key_lookup && keys.is_none() {
            let found: Option<Vec<Key>> = pred.values().iter().map(|v| v.as_key().cloned()).collect();
            keys = Some(found?);
        } else if pred.operator == FilterOperator::Eq && pred.property != KEY_PROPERTY {
            residual.push(pred.clone());
        } else {
            return None;
        }
    }

    keys.map(|keys| {
        ExecutionPlan::BatchGetByKeys(BatchGetPlan {
            kind: kind.to_string(),
            keys,
            filters: residual,
            offset,
            limit,
            keys_only: output.keys_only,
            projection: output.projection.clone(),
        })
    })
}

// ==================
// Joins
// ==================

fn conjunction(mut preds: Vec<Predicate>) -> Option<Predicate> {
    match preds.len() {
        0 => None,
        1 => preds.pop(),
        _ => Some(Predicate::And(preds)),
    }
}

fn flatten_and(pred: Predicate, out: &mut Vec<Predicate>) {
    match pred {
        Predicate::And(items) => items.into_iter().for_each(|p| flatten_and(p, out)),
        other => out.push(other),
    }
}

/// Splits the filter conjuncts into parent and child predicates; child
/// predicates lose their `variable.` prefix.
fn split_join_filter(
    filter: Option<Predicate>,
    variable: &str,
) -> CompileResult<(Vec<Predicate>, Vec<Predicate>)> {
    let mut conjuncts = Vec::new();
    if let Some(filter) = filter {
        flatten_and(filter, &mut conjuncts);
    }

    let prefix = format!("{}.", variable);
    let mut parents = Vec::new();
    let mut children = Vec::new();
    for conjunct in conjuncts {
        let mut names = Vec::new();
        property_names(&conjunct, &mut names);
        let child_refs = names.iter().filter(|n| n.starts_with(&prefix)).count();
        if child_refs == 0 {
            parents.push(conjunct);
        } else if child_refs == names.len() {
            children.push(strip_prefix(conjunct, &prefix));
        } else {
            return Err(CompileError::UnsupportedOperator(Operator::Or));
        }
    }
    Ok((parents, children))
}

fn property_names<'p>(pred: &'p Predicate, out: &mut Vec<&'p str>) {
    match pred {
        Predicate::And(items) | Predicate::Or(items) => {
            items.iter().for_each(|p| property_names(p, out))
        }
        Predicate::Not(inner) => property_names(inner, out),
        other => out.push(leaf_property(other)),
    }
}

fn strip_prefix(pred: Predicate, prefix: &str) -> Predicate {
    let strip = |property: String| match property.strip_prefix(prefix) {
        Some(rest) => rest.to_string(),
        None => property,
    };
    match pred {
        Predicate::And(items) => {
            Predicate::And(items.into_iter().map(|p| strip_prefix(p, prefix)).collect())
        }
        Predicate::Or(items) => {
            Predicate::Or(items.into_iter().map(|p| strip_prefix(p, prefix)).collect())
        }
        Predicate::Not(inner) => Predicate::Not(Box::new(strip_prefix(*inner, prefix))),
        Predicate::Compare { property, op, value } => Predicate::Compare {
            property: strip(property),
            op,
            value,
        },
        Predicate::In { property, values } => Predicate::In {
            property: strip(property),
            values,
        },
        Predicate::Like { property, pattern } => Predicate::Like {
            property: strip(property),
            pattern,
        },
        Predicate::StartsWith { property, prefix: p } => Predicate::StartsWith {
            property: strip(property),
            prefix: p,
        },
    }
}

/// Operator label of a non-equality predicate, for join errors
fn describe(pred: &Predicate) -> Option<(String, String)> {
    let (property, operator) = match pred {
        Predicate::Compare {
            op: CompareOp::Eq,
            value,
            ..
        } if !matches!(value, Value::List(_)) => return None,
        Predicate::Compare { property, op, .. } => (property.as_str(), op.symbol()),
        Predicate::In { property, .. } => (property.as_str(), "IN"),
        Predicate::Like { property, .. } => (property.as_str(), "LIKE"),
        Predicate::StartsWith { property, .. } => (property.as_str(), "startsWith"),
        Predicate::Or(items) => (items.first().map(leaf_property).unwrap_or_default(), "OR"),
        Predicate::Not(inner) => (leaf_property(inner), "NOT"),
        Predicate::And(_) => ("", "AND"),
    };
    Some((property.to_string(), operator.to_string()))
}

/// First merge-join restriction violated, if any
fn merge_violation(
    parents: &[Predicate],
    children: &[Predicate],
    sorts: &[SortPredicate],
    join_property: &str,
) -> Option<Unsupported> {
    if let Some((property, operator)) = parents.iter().find_map(describe) {
        return Some(Unsupported::JoinParentFilter { property, operator });
    }
    if let Some((property, operator)) = children.iter().find_map(describe) {
        return Some(Unsupported::JoinChildFilter { property, operator });
    }
    if sorts.len() > 1 {
        return Some(Unsupported::JoinSortCount);
    }
    if let Some(sort) = sorts.first() {
        if sort.property != join_property {
            return Some(Unsupported::JoinSortTarget {
                property: sort.property.clone(),
                join_property: join_property.to_string(),
            });
        }
        if sort.direction != SortDirection::Asc {
            return Some(Unsupported::JoinSortDirection);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::ast::{AggregateFn, BinaryOp};
    use crate::planner::parser::{parse_filter, parse_ordering};
    use chrono::TimeZone;

    fn registry() -> BTreeMap<String, KindMetadata> {
        let mut kinds = BTreeMap::new();
        kinds.insert(
            "Book".to_string(),
            KindMetadata::default().with_id("id").with_parent("author"),
        );
        kinds.insert("Chapter".to_string(), KindMetadata::default().with_id("id"));
        kinds
    }

    fn compile_with(query: &Query, config: &QueryConfig) -> CompileResult<ExecutionPlan> {
        let kinds = registry();
        let plan = QueryCompiler::new(&kinds, config).compile(query);
        plan
    }

    fn compile(query: &Query) -> CompileResult<ExecutionPlan> {
        compile_with(query, &QueryConfig::default())
    }

    fn book(filter: &str) -> Query {
        Query::new("Book").with_filter(parse_filter(filter).unwrap())
    }

    fn native(plan: ExecutionPlan) -> NativeQuery {
        match plan {
            ExecutionPlan::SingleNativeQuery(q) => q,
            other => panic!("expected single native query, got {:?}", other),
        }
    }

    fn unsupported(result: CompileResult<ExecutionPlan>) -> Unsupported {
        match result {
            Err(CompileError::UnsupportedFeature(rule)) => rule,
            other => panic!("expected unsupported feature, got {:?}", other),
        }
    }

    #[test]
    fn test_or_on_one_property_becomes_in() {
        let q = native(compile(&book(r#"title == "2" || title == 2"#)).unwrap());
        assert_eq!(
            q.filters,
            vec![in_filter("title", vec![Value::from("2"), Value::from(2)])]
        );

        let q = native(compile(&book(r#"title == "2" || title == 2 || title == false"#)).unwrap());
        assert_eq!(
            q.filters,
            vec![in_filter(
                "title",
                vec![Value::from("2"), Value::from(2), Value::from(false)]
            )]
        );
    }

    #[test]
    fn test_or_dedupes_in_first_occurrence_order() {
        let q = native(compile(&book("n == 3 || n IN (1, 3) || n == 2 || n == 1")).unwrap());
        assert_eq!(
            q.filters,
            vec![in_filter(
                "n",
                vec![Value::from(3), Value::from(1), Value::from(2)]
            )]
        );
    }

    #[test]
    fn test_or_across_properties_is_unsupported_operator() {
        assert_eq!(
            compile(&book("title == 'a' || isbn == 'b'")).unwrap_err(),
            CompileError::UnsupportedOperator(Operator::Or)
        );
    }

    #[test]
    fn test_or_requires_equality() {
        assert!(matches!(
            unsupported(compile(&book("isbn == 1 || isbn > 5"))),
            Unsupported::OrRequiresEquality { .. }
        ));
    }

    #[test]
    fn test_inequality_must_lead_sort() {
        let mut query = book("title > 2");
        query.sorts = parse_ordering("isbn").unwrap();
        assert_eq!(
            unsupported(compile(&query)),
            Unsupported::SortMustLeadWithInequality {
                property: "title".into(),
                sort: "isbn".into(),
            }
        );

        let mut query = book("title > 2");
        query.sorts = parse_ordering("title desc").unwrap();
        assert!(compile(&query).is_err());

        let mut query = book("title > 2");
        query.sorts = parse_ordering("title, isbn desc").unwrap();
        let q = native(compile(&query).unwrap());
        assert_eq!(q.sorts.len(), 2);
    }

    #[test]
    fn test_single_inequality_property() {
        assert!(matches!(
            unsupported(compile(&book("title > 2 && isbn < 5"))),
            Unsupported::MultipleInequality { .. }
        ));
        let q = native(compile(&book("isbn > 2 && isbn <= 5 && title == 'x'")).unwrap());
        assert_eq!(q.inequality_property(), Some("isbn"));
    }

    #[test]
    fn test_ne_compiles_to_disjunction() {
        let q = native(compile(&book("isbn != 3")).unwrap());
        assert_eq!(
            q.filters,
            vec![NativeFilter::AnyOf(vec![
                FilterPredicate::new("isbn", FilterOperator::Lt, Value::from(3)),
                FilterPredicate::new("isbn", FilterOperator::Gt, Value::from(3)),
            ])]
        );
    }

    #[test]
    fn test_like_prefix() {
        let q = native(compile(&book("title LIKE 'Du%'")).unwrap());
        assert_eq!(
            q.filters,
            vec![
                NativeFilter::Predicate(FilterPredicate::new("title", FilterOperator::Ge, Value::from("Du"))),
                NativeFilter::Predicate(FilterPredicate::new("title", FilterOperator::Lt, Value::from("Dv"))),
            ]
        );
    }

    #[test]
    fn test_like_shapes_rejected() {
        for pattern in ["%une", "D%ne", "Dune", "D_%", "%"] {
            let query = Query::new("Book").with_filter(Expr::like("title", pattern));
            assert_eq!(
                unsupported(compile(&query)),
                Unsupported::LikePattern(pattern.to_string()),
                "pattern {}",
                pattern
            );
        }
        assert_eq!(
            unsupported(compile(&book("title LIKE 'a%' ESCAPE '!'"))),
            Unsupported::EscapeNotSupported
        );
    }

    #[test]
    fn test_starts_with_param_must_be_text() {
        let query = book("title.startsWith(:p)").with_param("p", 3);
        assert!(matches!(
            compile(&query),
            Err(CompileError::Misuse(MisuseError::ParameterType { .. }))
        ));
        let query = book("title.startsWith(:p)").with_param("p", "Du");
        assert_eq!(native(compile(&query).unwrap()).filters.len(), 2);
    }

    #[test]
    fn test_prefix_upper_bound() {
        assert_eq!(prefix_upper_bound("abc").as_deref(), Some("abd"));
        assert_eq!(prefix_upper_bound("a\u{10FFFF}").as_deref(), Some("b"));
        assert_eq!(prefix_upper_bound("\u{D7FF}").as_deref(), Some("\u{E000}"));
        assert_eq!(prefix_upper_bound(""), None);
    }

    #[test]
    fn test_arithmetic_is_unsupported_operator() {
        assert_eq!(
            compile(&book("isbn > 1 + 2")).unwrap_err(),
            CompileError::UnsupportedOperator(Operator::Binary(BinaryOp::Add))
        );
    }

    #[test]
    fn test_negated_literal_folds() {
        let q = native(compile(&book("isbn > -3")).unwrap());
        assert_eq!(
            q.filters,
            vec![NativeFilter::Predicate(FilterPredicate::new(
                "isbn",
                FilterOperator::Gt,
                Value::from(-3)
            ))]
        );
    }

    #[test]
    fn test_current_timestamp_uses_clock() {
        let kinds = registry();
        let config = QueryConfig::default();
        let fixed = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let plan = QueryCompiler::new(&kinds, &config)
            .with_clock(move || fixed)
            .compile(&book("published < CURRENT_TIMESTAMP"))
            .unwrap();
        assert_eq!(
            native(plan).filters,
            vec![NativeFilter::Predicate(FilterPredicate::new(
                "published",
                FilterOperator::Lt,
                Value::Timestamp(fixed)
            ))]
        );
    }

    #[test]
    fn test_not_pushdown() {
        let q = native(compile(&book("NOT (isbn < 3)")).unwrap());
        assert_eq!(
            q.filters,
            vec![NativeFilter::Predicate(FilterPredicate::new(
                "isbn",
                FilterOperator::Ge,
                Value::from(3)
            ))]
        );

        assert_eq!(
            compile(&book("NOT (a == 1 || b == 2)")).unwrap_err(),
            CompileError::UnsupportedOperator(Operator::Not)
        );
        assert_eq!(
            unsupported(compile(&book("NOT (a == 1 || a == 2)"))),
            Unsupported::Negated("a disjunction")
        );
        assert_eq!(unsupported(compile(&book("NOT a IN (1, 2)"))), Unsupported::Negated("IN"));
    }

    #[test]
    fn test_parameters() {
        assert_eq!(
            compile(&book("isbn == :isbn")).unwrap_err(),
            CompileError::Misuse(MisuseError::UnboundParameter("isbn".into()))
        );

        let query = book("isbn == :isbn").with_param("isbn", "978");
        assert_eq!(native(compile(&query).unwrap()).filters.len(), 1);

        let query = book("tags == :tags").with_param("tags", vec!["a", "b"]);
        assert_eq!(
            native(compile(&query).unwrap()).filters,
            vec![in_filter("tags", vec![Value::from("a"), Value::from("b")])]
        );

        let query = book("tags > :tags").with_param("tags", vec!["a", "b"]);
        assert_eq!(
            unsupported(compile(&query)),
            Unsupported::ListOperand(CompareOp::Gt)
        );

        let query = book("tags IN :tags").with_param("tags", Value::List(Vec::new()));
        assert_eq!(
            compile(&query).unwrap_err(),
            CompileError::Misuse(MisuseError::EmptyInList("tags".into()))
        );
    }

    #[test]
    fn test_member_of_is_equality() {
        let query = book(":t MEMBER OF tags").with_param("t", "scifi");
        assert_eq!(
            native(compile(&query).unwrap()).filters,
            vec![NativeFilter::Predicate(FilterPredicate::new(
                "tags",
                FilterOperator::Eq,
                Value::from("scifi")
            ))]
        );
    }

    #[test]
    fn test_paging_validation() {
        assert_eq!(
            compile(&Query::new("Book").with_offset(-1)).unwrap_err(),
            CompileError::Misuse(MisuseError::NegativeOffset(-1))
        );
        assert_eq!(
            compile(&Query::new("Book").with_limit(-5)).unwrap_err(),
            CompileError::Misuse(MisuseError::NegativeLimit(-5))
        );
        let q = native(compile(&Query::new("Book").with_offset(2).with_limit(0)).unwrap());
        assert_eq!((q.offset, q.limit), (2, Some(0)));
    }

    #[test]
    fn test_unknown_kind() {
        assert_eq!(
            compile(&Query::new("Magazine")).unwrap_err(),
            CompileError::Misuse(MisuseError::UnknownKind("Magazine".into()))
        );
    }

    #[test]
    fn test_identifier_equality_is_batch_get() {
        let plan = compile(&book("id == 4 && title == 'Dune'")).unwrap();
        match plan {
            ExecutionPlan::BatchGetByKeys(get) => {
                assert_eq!(get.keys, vec![Key::new("Book", 4)]);
                assert_eq!(get.filters.len(), 1);
            }
            other => panic!("expected batch get, got {:?}", other),
        }

        let plan = compile(&book("id IN (1, 'x')")).unwrap();
        match plan {
            ExecutionPlan::BatchGetByKeys(get) => {
                assert_eq!(get.keys, vec![Key::new("Book", 1), Key::new("Book", "x")]);
            }
            other => panic!("expected batch get, got {:?}", other),
        }
    }

    #[test]
    fn test_identifier_with_sort_stays_native() {
        let mut query = book("id == 4");
        query.sorts = vec![SortSpec::asc("title")];
        let q = native(compile(&query).unwrap());
        assert_eq!(q.filters[0].property(), Some(KEY_PROPERTY));
    }

    #[test]
    fn test_identifier_with_inequality() {
        assert_eq!(
            unsupported(compile(&book("id == 4 && isbn > 3"))),
            Unsupported::IdentifierWithInequality {
                property: "isbn".into()
            }
        );
    }

    #[test]
    fn test_identifier_of_wrong_kind() {
        let query = book("id == :k").with_param("k", Key::new("Chapter", 1));
        assert!(matches!(
            compile(&query),
            Err(CompileError::Misuse(MisuseError::ParameterType { .. }))
        ));
    }

    #[test]
    fn test_sort_by_identifier_maps_to_key() {
        let mut query = Query::new("Book");
        query.sorts = vec![SortSpec::desc("id")];
        assert_eq!(
            native(compile(&query).unwrap()).sorts,
            vec![SortPredicate::desc(KEY_PROPERTY)]
        );
    }

    #[test]
    fn test_ancestor() {
        let ann = Key::new("Author", "ann");
        let query = book("author == :a").with_param("a", ann.clone());
        let q = native(compile(&query).unwrap());
        assert_eq!(q.ancestor, Some(ann.clone()));
        assert!(q.filters.is_empty());

        let query = book("author == :a").with_param("a", ann.clone()).with_ancestor(ann.clone());
        assert_eq!(unsupported(compile(&query)), Unsupported::DuplicateAncestor);

        let query = book("author > :a").with_param("a", ann.clone());
        assert_eq!(
            unsupported(compile(&query)),
            Unsupported::AncestorOperator(">".into())
        );

        let query = book("author == null");
        assert!(matches!(
            compile(&query),
            Err(CompileError::Misuse(MisuseError::ParameterType { .. }))
        ));

        let mut query = Query::new("Book");
        query.sorts = vec![SortSpec::asc("author")];
        assert_eq!(unsupported(compile(&query)), Unsupported::SortByAncestor);
    }

    #[test]
    fn test_count() {
        let query = book("title == 'x'")
            .with_projection(Projection::count())
            .with_limit(5);
        match compile(&query).unwrap() {
            ExecutionPlan::Count(CountPlan::Native(q)) => {
                assert!(q.keys_only);
                assert_eq!(q.limit, Some(5));
            }
            other => panic!("expected native count, got {:?}", other),
        }

        let query = Query::new("Book").with_projection(Projection::Aggregates {
            functions: vec![AggregateFn::Count],
            fields: vec!["title".into()],
        });
        assert_eq!(
            unsupported(compile(&query)),
            Unsupported::CountWithProjection {
                field: "title".into()
            }
        );

        let query = Query::new("Book").with_projection(Projection::Aggregates {
            functions: vec![AggregateFn::Avg],
            fields: Vec::new(),
        });
        assert_eq!(
            compile(&query).unwrap_err(),
            CompileError::UnsupportedOperator(Operator::Aggregate(AggregateFn::Avg))
        );

        let mut query = Query::new("Book");
        query.group_by = vec!["title".into()];
        assert_eq!(unsupported(compile(&query)), Unsupported::GroupBy);
    }

    #[test]
    fn test_projection() {
        let query = Query::new("Book").with_projection(Projection::Fields(vec!["id".into()]));
        assert!(native(compile(&query).unwrap()).keys_only);

        let query = Query::new("Book")
            .with_projection(Projection::Fields(vec!["id".into(), "title".into()]));
        let q = native(compile(&query).unwrap());
        assert!(!q.keys_only);
        assert_eq!(q.projection, vec!["title".to_string()]);
    }

    #[test]
    fn test_in_memory_fallback() {
        let config = QueryConfig::default().with_in_memory_filter(true);

        let query = book("title == 'a' || isbn == 'b'").with_offset(1).with_limit(2);
        match compile_with(&query, &config).unwrap() {
            ExecutionPlan::NativeQueryWithInMemoryFilter(plan) => {
                assert!(plan.query.filters.is_empty());
                assert_eq!(plan.query.limit, None);
                assert!(plan.filter.is_some());
                assert_eq!((plan.offset, plan.limit), (1, Some(2)));
            }
            other => panic!("expected in-memory plan, got {:?}", other),
        }

        let mut query = book("title > 2");
        query.sorts = parse_ordering("isbn").unwrap();
        assert!(matches!(
            compile_with(&query, &config).unwrap(),
            ExecutionPlan::NativeQueryWithInMemoryFilter(_)
        ));

        // operator errors never fall back
        assert!(compile_with(&book("isbn > 1 * 2"), &config).is_err());
    }

    #[test]
    fn test_cursor_applies_start() {
        let query = book("title == 'x'");
        let q = native(compile(&query).unwrap());
        let encoded = Cursor::new(&q, 7).to_web_safe_string();

        let resumed = native(compile(&query.clone().with_cursor(encoded.clone())).unwrap());
        assert_eq!(resumed.start, Some(7));

        let other = book("title == 'y'").with_cursor(encoded);
        assert_eq!(
            compile(&other).unwrap_err(),
            CompileError::Misuse(MisuseError::CursorMismatch)
        );

        let query = book("id == 1").with_cursor(Cursor::new(&q, 1).to_web_safe_string());
        assert!(matches!(
            compile(&query),
            Err(CompileError::Misuse(MisuseError::Cursor(_)))
        ));
    }

    #[test]
    fn test_cursor_position_overflow_is_rejected() {
        let query = book("title == 'x'").with_offset(1);
        let q = native(compile(&query).unwrap());
        let encoded = Cursor::new(&q, u64::MAX).to_web_safe_string();

        assert!(matches!(
            compile(&query.with_cursor(encoded)),
            Err(CompileError::Misuse(MisuseError::Cursor(_)))
        ));
    }

    fn join_query(filter: &str) -> Query {
        let mut query = Query::new("Book").with_join(JoinClause::new("c", "Chapter", "chapters"));
        if !filter.is_empty() {
            query = query.with_filter(parse_filter(filter).unwrap());
        }
        query
    }

    #[test]
    fn test_merge_join_plan() {
        let plan = compile(&join_query("genre == 'scifi' && c.title == 'Intro'").with_limit(3)).unwrap();
        match plan {
            ExecutionPlan::MergeJoin(join) => {
                assert_eq!(join.parent.sorts, vec![SortPredicate::asc("chapters")]);
                assert_eq!(join.parent.filters.len(), 1);
                assert_eq!(join.child.kind, "Chapter");
                assert!(join.child.keys_only);
                assert_eq!(join.child.sorts, vec![SortPredicate::asc(KEY_PROPERTY)]);
                assert_eq!(
                    join.child.filters,
                    vec![NativeFilter::Predicate(FilterPredicate::new(
                        "title",
                        FilterOperator::Eq,
                        Value::from("Intro")
                    ))]
                );
                assert_eq!(join.limit, Some(3));
            }
            other => panic!("expected merge join, got {:?}", other),
        }
    }

    #[test]
    fn test_join_rules() {
        assert!(matches!(
            unsupported(compile(&join_query("genre > 'a'"))),
            Unsupported::JoinParentFilter { .. }
        ));
        assert!(matches!(
            unsupported(compile(&join_query("c.pages > 10"))),
            Unsupported::JoinChildFilter { .. }
        ));

        let mut query = join_query("");
        query.sorts = parse_ordering("title").unwrap();
        assert!(matches!(unsupported(compile(&query)), Unsupported::JoinSortTarget { .. }));

        let mut query = join_query("");
        query.sorts = parse_ordering("chapters desc").unwrap();
        assert_eq!(unsupported(compile(&query)), Unsupported::JoinSortDirection);

        let mut query = join_query("");
        query.sorts = parse_ordering("chapters, title").unwrap();
        assert_eq!(unsupported(compile(&query)), Unsupported::JoinSortCount);

        let mut query = join_query("");
        query.sorts = parse_ordering("c.title").unwrap();
        assert!(matches!(unsupported(compile(&query)), Unsupported::JoinChildSort { .. }));

        let mut query = join_query("");
        if let Some(join) = query.join.as_mut() {
            join.outer = true;
        }
        assert_eq!(unsupported(compile(&query)), Unsupported::OuterJoin);

        let mut query = join_query("");
        if let Some(join) = query.join.as_mut() {
            join.operator = CompareOp::Lt;
        }
        assert_eq!(unsupported(compile(&query)), Unsupported::JoinOperator(CompareOp::Lt));
    }

    #[test]
    fn test_join_in_memory_fallback() {
        let config = QueryConfig::default().with_in_memory_join(true);
        let plan = compile_with(&join_query("genre > 'a' && c.title == 'Intro'"), &config).unwrap();
        match plan {
            ExecutionPlan::NativeQueryWithInMemoryFilter(plan) => {
                let join = plan.join.expect("hash join");
                assert_eq!(join.parent_property, "chapters");
                assert!(join.child.keys_only);
                assert!(plan.filter.is_some());
            }
            other => panic!("expected hash join, got {:?}", other),
        }

        let mut query = join_query("");
        query.sorts = parse_ordering("c.title").unwrap();
        assert!(compile_with(&query, &config).is_err());
    }
}
