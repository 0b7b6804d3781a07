//! Rewrite engine: produces the physical SQL and parameters of every route
//! unit, plus the layout the merge engine needs to rebuild the logical result.

mod derive;
mod dialect;
mod encrypt;
mod writer;


pub use dialect::{Dialect, MysqlGenerator, PostgresGenerator, SqlGenerator};
pub use writer::SqlWriter;

use serde::Serialize;
use tracing::debug;

use crate::ast::{Expr, Insert, Statement, Value};
use crate::condition::GeneratedKey;
use crate::context::StatementContext;
use crate::error::{ShardError, ShardResult};
use crate::merge::MergeContext;
use crate::route::{RouteContext, RouteUnit};
use crate::rule::RuleSet;

/// SQL and parameters for one route unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewriteUnit {
    pub unit: RouteUnit,
    pub sql: String,
    pub params: Vec<Value>,
    /// The unit's rows feed a grouping merge.
    pub needs_aggregation: bool,
}

#[derive(Debug, Clone)]
pub struct RewriteResult {
    pub units: Vec<RewriteUnit>,
    pub merge: MergeContext,
}

/// Rewrite a routed statement.
pub fn rewrite(ctx: &StatementContext, route: &RouteContext, rules: &RuleSet) -> ShardResult<RewriteResult> {
    check_subqueries(ctx, route, rules)?;

    let mut stmt = ctx.statement().clone();
    let mut params = ctx.params().to_vec();

    if let (Statement::Insert(insert), Some(key)) = (&mut stmt, &route.generated_key) {
        append_generated_key(insert, key, &mut params, !ctx.params().is_empty());
    }

    let encrypted = match rules.encrypt() {
        Some(rule) => Some(encrypt::EncryptRewriter::new(ctx, rule, &mut params).rewrite(&mut stmt)?),
        None => None,
    };

    let multi = route.units.len() > 1;
    let mut merge = match &mut stmt {
        Statement::Select(select) if multi => derive::multi_shard(ctx, select, &mut params)?,
        Statement::Select(select) => derive::single(select),
        _ => MergeContext::passthrough(),
    };
    if let Some(outcome) = encrypted {
        merge.decrypt = outcome.decrypt;
        merge.hidden_labels = outcome.hidden_labels;
    }

    let dialect = rules.props().dialect;
    let mut units = Vec::with_capacity(route.units.len());
    for unit in &route.units {
        let unit_stmt = match &stmt {
            Statement::Insert(insert) if !unit.row_indexes.is_empty() => {
                Statement::Insert(rows_of(insert, &unit.row_indexes))
            }
            other => other.clone(),
        };
        let mut writer = SqlWriter::new(dialect, unit, &params);
        let sql = writer.statement(&unit_stmt)?;
        debug!(data_source = %unit.data_source.actual, sql = %sql, "rewrote statement");
        units.push(RewriteUnit {
            unit: unit.clone(),
            sql,
            params: writer.into_params(),
            needs_aggregation: multi && merge.grouped,
        });
    }

    Ok(RewriteResult { units, merge })
}

/// Subqueries are rendered with their logical table names, so every table
/// they read must exist under that name on each unit's data source.
fn check_subqueries(ctx: &StatementContext, route: &RouteContext, rules: &RuleSet) -> ShardResult<()> {
    for table in ctx.subquery_tables() {
        if let Some(sharding) = rules.sharding() {
            if sharding.is_sharded(table) {
                return Err(ShardError::rewrite(format!(
                    "sharded table '{}' cannot be read in a subquery",
                    table
                )));
            }
            let elsewhere = sharding
                .default_data_source()
                .filter(|_| !sharding.is_broadcast(table))
                .and_then(|default| {
                    route
                        .units
                        .iter()
                        .find(|u| !u.data_source.logical.eq_ignore_ascii_case(default))
                        .map(|u| (default, &u.data_source.logical))
                });
            if let Some((default, other)) = elsewhere {
                return Err(ShardError::rewrite(format!(
                    "table '{}' in a subquery lives on '{}', not on '{}'",
                    table, default, other
                )));
            }
        }
        if rules.encrypt().is_some_and(|rule| rule.has_table(table)) {
            return Err(ShardError::rewrite(format!(
                "encrypted table '{}' cannot be read in a subquery",
                table
            )));
        }
    }
    if let Some(rule) = rules.encrypt() {
        let outer = ctx.subquery_columns().iter().find(|c| {
            c.owner
                .as_deref()
                .and_then(|owner| ctx.owner_table(owner))
                .is_some_and(|table| rule.column(table, &c.name).is_some())
        });
        if let Some(column) = outer {
            return Err(ShardError::rewrite(format!(
                "encrypted column '{}' cannot be used in a subquery",
                column
            )));
        }
    }
    Ok(())
}

/// Add the generated key column; values are bound as trailing parameters
/// when the statement is a prepared one.
fn append_generated_key(insert: &mut Insert, key: &GeneratedKey, params: &mut Vec<Value>, prepared: bool) {
    if insert
        .columns
        .iter()
        .any(|c| c.eq_ignore_ascii_case(&key.column))
    {
        return;
    }
    insert.columns.push(key.column.clone());
    for (row, value) in insert.rows.iter_mut().zip(&key.values) {
        if prepared {
            params.push(value.clone());
            row.push(Expr::Param(params.len()));
        } else {
            row.push(Expr::Literal(value.clone()));
        }
    }
}

fn rows_of(insert: &Insert, indexes: &[usize]) -> Insert {
    Insert {
        table: insert.table.clone(),
        columns: insert.columns.clone(),
        rows: indexes
            .iter()
            .filter_map(|i| insert.rows.get(*i).cloned())
            .collect(),
    }
}
