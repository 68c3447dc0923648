//! Turns request options into query clauses.
//!
//! [`compile`] drops every column reference the entity does not have, each
//! with a warning. [`apply`] then adds clauses to a [`Select`] in a fixed
//! order: projection, preloads, filters, raw predicates, id, ordering,
//! count, pagination.

use std::sync::Arc;

use serde_json::Value;

use crate::error::QueryError;
use crate::model::{EntityDescriptor, RelationKeys};
use crate::options::operator::range_bounds;
use crate::options::types::{FilterOption, LogicOperator, PreloadOption, RequestOptions, SortOption};
use crate::query::{Condition, OrderBy, Projection, RelationLoad, Select, TableRef};

/// Count sentinel when counting was skipped.
pub const COUNT_SKIPPED: i64 = -1;

pub fn compile(descriptor: &EntityDescriptor, mut options: RequestOptions) -> RequestOptions {
    options.columns = descriptor.filter_valid_columns(&options.columns);
    options.omit_columns = descriptor.filter_valid_columns(&options.omit_columns);
    options.filters = sanitize_filters(descriptor, options.filters);
    options.sort = sanitize_sort(descriptor, options.sort);
    options.computed_columns.retain_mut(|computed| match descriptor.column(&computed.name) {
        Some(column) => {
            computed.name = column.name.clone();
            true
        }
        None => {
            tracing::warn!(entity = %descriptor.name, column = %computed.name, "dropping computed column without a real column");
            false
        }
    });
    options.custom_operators.retain(|op| !op.sql.trim().is_empty());
    options.preload = options
        .preload
        .into_iter()
        .filter_map(|p| sanitize_preload(descriptor, p))
        .collect();
    options
}

fn sanitize_filters(descriptor: &EntityDescriptor, filters: Vec<FilterOption>) -> Vec<FilterOption> {
    filters
        .into_iter()
        .filter_map(|mut f| {
            let Some(column) = descriptor.column(f.column.trim()) else {
                tracing::warn!(entity = %descriptor.name, column = %f.column, "dropping filter on unknown column");
                return None;
            };
            if f.operator.is_range() && range_bounds(&f.value).is_none() {
                tracing::warn!(
                    entity = %descriptor.name,
                    column = %f.column,
                    operator = f.operator.name(),
                    "dropping range filter without exactly two values"
                );
                return None;
            }
            f.column = column.name.clone();
            Some(f)
        })
        .collect()
}

fn sanitize_sort(descriptor: &EntityDescriptor, sort: Vec<SortOption>) -> Vec<SortOption> {
    sort.into_iter()
        .filter_map(|mut s| match descriptor.column(s.column.trim()) {
            Some(column) => {
                s.column = column.name.clone();
                Some(s)
            }
            None => {
                tracing::warn!(entity = %descriptor.name, column = %s.column, "dropping sort on unknown column");
                None
            }
        })
        .collect()
}

fn sanitize_preload(descriptor: &EntityDescriptor, mut preload: PreloadOption) -> Option<PreloadOption> {
    let Some(relation) = descriptor.relation(&preload.relation) else {
        tracing::warn!(entity = %descriptor.name, relation = %preload.relation, "dropping preload of unknown relation");
        return None;
    };
    if relation.keys.is_none() {
        tracing::warn!(entity = %descriptor.name, relation = %relation.name, "dropping preload of relation without join keys");
        return None;
    }
    let target = relation.target();
    preload.relation = relation.name.clone();
    preload.columns = target.filter_valid_columns(&preload.columns);
    preload.omit_columns = target.filter_valid_columns(&preload.omit_columns);
    preload.filters = sanitize_filters(&target, preload.filters);
    preload.sort = sanitize_sort(&target, preload.sort);
    Some(preload)
}

/// Columns to project: the requested list (or every column when only
/// omissions or computed columns were given) minus omissions, with computed
/// expressions in place of their columns. Empty means every column.
pub fn projections(descriptor: &EntityDescriptor, options: &RequestOptions) -> Vec<Projection> {
    if options.columns.is_empty() && options.omit_columns.is_empty() && options.computed_columns.is_empty() {
        return Vec::new();
    }
    let base = if options.columns.is_empty() {
        descriptor.column_names()
    } else {
        options.columns.clone()
    };
    let mut out: Vec<Projection> = base
        .into_iter()
        .filter(|c| !options.omit_columns.contains(c))
        .map(|c| match options.computed_columns.iter().find(|cc| cc.name == c) {
            Some(cc) => Projection::Expr {
                sql: cc.expression.clone(),
                alias: cc.name.clone(),
            },
            None => Projection::Column(c),
        })
        .collect();
    for cc in &options.computed_columns {
        let projected = out.iter().any(|p| matches!(p, Projection::Expr { alias, .. } if *alias == cc.name));
        if !projected {
            out.push(Projection::Expr {
                sql: cc.expression.clone(),
                alias: cc.name.clone(),
            });
        }
    }
    out
}

fn filter_condition(filters: &[FilterOption]) -> Option<Condition> {
    let mut acc: Option<Condition> = None;
    for f in filters {
        let Some(c) = f.operator.condition(&f.column, &f.value) else {
            continue;
        };
        acc = Some(match (acc, f.logic_operator) {
            (None, _) => c,
            (Some(prev), LogicOperator::And) => prev.and(c),
            (Some(prev), LogicOperator::Or) => prev.or(c),
        });
    }
    acc
}

fn order_by(sort: &[SortOption]) -> Vec<OrderBy> {
    sort.iter()
        .map(|s| OrderBy {
            column: s.column.clone(),
            direction: s.direction,
        })
        .collect()
}

/// Join keys and projection for one sanitized preload.
pub fn relation_load(descriptor: &EntityDescriptor, preload: &PreloadOption) -> Option<RelationLoad> {
    let relation = descriptor.relation(&preload.relation)?;
    let target = relation.target();
    let canonical = |d: &EntityDescriptor, name: &str| d.column(name).map(|c| c.name.clone()).unwrap_or_else(|| name.to_string());
    let (parent_key, child_key) = match relation.keys.as_ref()? {
        RelationKeys::HasMany { foreign_key } | RelationKeys::HasOne { foreign_key } => {
            (descriptor.primary_key()?.name.clone(), canonical(&target, foreign_key))
        }
        RelationKeys::BelongsTo { foreign_key } => {
            (canonical(descriptor, foreign_key), target.primary_key()?.name.clone())
        }
    };
    let mut columns = if preload.columns.is_empty() && !preload.omit_columns.is_empty() {
        target.column_names()
    } else {
        preload.columns.clone()
    };
    columns.retain(|c| !preload.omit_columns.contains(c));
    Some(RelationLoad {
        name: relation.name.clone(),
        many: relation.many,
        table: TableRef {
            schema: descriptor.schema.clone(),
            name: target.table.clone(),
        },
        target: Arc::new(target),
        parent_key,
        child_key,
        columns,
        filter: filter_condition(&preload.filters),
        order: order_by(&preload.sort),
        limit: preload.limit,
    })
}

/// Adds the compiled options to `select`. Returns the query ready to scan and
/// the row count taken before pagination ([`COUNT_SKIPPED`] when skipped).
pub async fn apply<'a>(
    mut select: Select<'a>,
    descriptor: &EntityDescriptor,
    options: &RequestOptions,
    id: Option<&Value>,
) -> Result<(Select<'a>, i64), QueryError> {
    for projection in projections(descriptor, options) {
        select = match projection {
            Projection::Column(c) => select.column(c),
            Projection::Expr { sql, alias } => select.column_expr(sql, alias),
        };
    }
    select = select.distinct(options.distinct);

    for preload in &options.preload {
        if let Some(load) = relation_load(descriptor, preload) {
            select = select.relation(load);
        }
    }

    for f in &options.filters {
        let Some(c) = f.operator.condition(&f.column, &f.value) else {
            continue;
        };
        select = match f.logic_operator {
            LogicOperator::And => select.where_(c),
            LogicOperator::Or => select.where_or(c),
        };
    }

    for op in &options.custom_operators {
        tracing::debug!(name = %op.name, "custom operator");
        select = select.where_(Condition::raw(op.sql.clone()));
    }
    if let Some(sql) = options.custom_sql_where.as_deref().filter(|s| !s.trim().is_empty()) {
        select = select.where_(Condition::raw(sql));
    }
    if let Some(sql) = options.custom_sql_or.as_deref().filter(|s| !s.trim().is_empty()) {
        select = select.where_or(Condition::raw(sql));
    }

    if let Some(id) = id {
        let pk = descriptor.primary_key().map(|c| c.name.as_str()).unwrap_or("id");
        select = select.where_(Condition::eq(pk, id.clone()));
    }

    for s in &options.sort {
        select = select.order(s.column.clone(), s.direction);
    }

    let total = if options.skip_count {
        COUNT_SKIPPED
    } else {
        select.count().await?
    };

    if let Some(n) = options.limit {
        select = select.limit(n);
    }
    if let Some(n) = options.offset {
        select = select.offset(n);
    }
    Ok((select, total))
}
