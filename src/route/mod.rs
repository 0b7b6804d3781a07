//! Route engine: decides which physical data sources and tables a statement
//! runs against.
//!
//! Rule kinds are consulted in [`RuleKind::PRECEDENCE`] order. Shadow and
//! read-write splitting only decide how logical data sources map to actual
//! ones; sharding decides the units themselves.

mod sharding;

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::algorithm::ShadowValue;
use crate::ast::{BinaryOp, Expr, Statement};
use crate::condition::{GeneratedKey, ShardingConditions};
use crate::context::StatementContext;
use crate::error::ShardResult;
use crate::rule::{RuleKind, RuleSet, ShadowDataSource, ShadowRule};

/// A logical name and the actual name it resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RouteMapper {
    pub logical: String,
    pub actual: String,
}

impl RouteMapper {
    pub fn new(logical: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            logical: logical.into(),
            actual: actual.into(),
        }
    }

    /// A name that maps to itself.
    pub fn identity(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            logical: name.clone(),
            actual: name,
        }
    }
}

/// One physical target of a statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteUnit {
    pub data_source: RouteMapper,
    /// Every logical table of the statement, in reference order.
    pub tables: Vec<RouteMapper>,
    /// VALUES rows sent to this unit (INSERT only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub row_indexes: Vec<usize>,
}

impl RouteUnit {
    /// Actual table for a logical table, case-insensitively.
    pub fn actual_table(&self, logical: &str) -> Option<&str> {
        self.tables
            .iter()
            .find(|t| t.logical.eq_ignore_ascii_case(logical))
            .map(|t| t.actual.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
    Single,
    MultiShard,
    Broadcast,
    /// Nothing matched; a read returns an empty result.
    Unsupported,
}

/// Ordered, duplicate-free route units plus their classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteContext {
    pub units: Vec<RouteUnit>,
    pub class: RouteClass,
    /// Keys generated for an INSERT, carried to the rewrite.
    #[serde(skip)]
    pub generated_key: Option<GeneratedKey>,
}

impl RouteContext {
    pub fn new(units: Vec<RouteUnit>, class: RouteClass) -> Self {
        Self {
            units,
            class,
            generated_key: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn is_single(&self) -> bool {
        self.units.len() == 1
    }

    /// Actual data sources, in unit order, without duplicates.
    pub fn data_sources(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for unit in &self.units {
            if !seen.contains(&unit.data_source.actual.as_str()) {
                seen.push(&unit.data_source.actual);
            }
        }
        seen
    }
}

/// Compute the route of a statement.
pub fn route(
    ctx: &StatementContext,
    conditions: &ShardingConditions,
    rules: &RuleSet,
) -> ShardResult<RouteContext> {
    let mut shadow: Option<Vec<&ShadowDataSource>> = None;
    let mut read_replica = false;
    let mut routed = None;

    for kind in RuleKind::PRECEDENCE {
        match kind {
            RuleKind::Shadow => {
                shadow = rules.shadow().and_then(|rule| shadow_targets(ctx, rule));
            }
            RuleKind::ReadwriteSplitting => {
                read_replica = shadow.is_none()
                    && rules.readwrite().is_some()
                    && ctx.is_read()
                    && !ctx.is_locking()
                    && !ctx.hints().write_route_only;
            }
            RuleKind::Sharding => {
                routed = Some(sharding::route(ctx, conditions, rules)?);
            }
            RuleKind::Encrypt => {}
        }
    }
    let Some(mut route) = routed else {
        return Ok(RouteContext::new(Vec::new(), RouteClass::Unsupported));
    };

    let mut replicas: BTreeMap<String, String> = BTreeMap::new();
    for unit in &mut route.units {
        let logical = unit.data_source.logical.clone();
        let mut actual = logical.clone();
        if let Some(group) = rules.readwrite().and_then(|rw| rw.group(&logical)) {
            actual = if read_replica {
                match replicas.get(&group.name) {
                    Some(picked) => picked.clone(),
                    None => {
                        let picked = group.select_read()?;
                        replicas.insert(group.name.clone(), picked.clone());
                        picked
                    }
                }
            } else {
                group.write.clone()
            };
        }
        if let Some(pair) = shadow
            .as_ref()
            .and_then(|pairs| pairs.iter().find(|p| p.production == actual))
        {
            actual = pair.shadow.clone();
        }
        unit.data_source = RouteMapper::new(logical, actual);
    }
    route.generated_key = conditions.generated_key().cloned();

    debug!(
        units = route.units.len(),
        class = ?route.class,
        shadow = shadow.is_some(),
        read_replica,
        "routed statement"
    );
    Ok(route)
}

/// Shadow pairs to apply, or `None` when the statement is not shadowed.
fn shadow_targets<'r>(ctx: &StatementContext, rule: &'r ShadowRule) -> Option<Vec<&'r ShadowDataSource>> {
    let values = shadow_values(ctx);
    let mut names: BTreeSet<&str> = BTreeSet::new();
    let mut configured = false;

    for table in ctx.tables() {
        let Some(shadow_table) = rule.table(table) else {
            continue;
        };
        configured = true;
        let matched = shadow_table.algorithms.iter().any(|algorithm| {
            algorithm.is_shadow(&ShadowValue::Hint(ctx.hints()))
                || values
                    .iter()
                    .filter(|(owner, _, _)| owner.is_none_or(|o| o.eq_ignore_ascii_case(table)))
                    .any(|(_, column, value)| {
                        algorithm.is_shadow(&ShadowValue::Column {
                            table,
                            operation: ctx.kind(),
                            column,
                            value,
                        })
                    })
        });
        if matched {
            names.extend(shadow_table.data_sources.iter().map(String::as_str));
        }
    }

    if names.is_empty() && !configured {
        let by_hint = rule
            .default_algorithm()
            .is_some_and(|a| a.is_shadow(&ShadowValue::Hint(ctx.hints())));
        if by_hint {
            return Some(rule.data_sources().collect());
        }
    }
    if names.is_empty() {
        return None;
    }
    Some(names.into_iter().filter_map(|n| rule.data_source(n)).collect())
}

/// Constant column values a shadow algorithm can look at: INSERT rows, or
/// top-level `=` / `IN` atoms of the WHERE clause.
fn shadow_values(ctx: &StatementContext) -> Vec<(Option<&str>, String, crate::ast::Value)> {
    let mut out = Vec::new();
    match ctx.statement() {
        Statement::Insert(insert) => {
            for row in &insert.rows {
                for (column, expr) in insert.columns.iter().zip(row) {
                    if let Ok(Some(v)) = ctx.resolve(expr) {
                        out.push((None, column.clone(), v));
                    }
                }
            }
        }
        stmt => {
            if let Some(selection) = stmt.selection() {
                collect_atoms(ctx, selection, &mut out);
            }
        }
    }
    out
}

fn collect_atoms<'c>(
    ctx: &'c StatementContext,
    expr: &Expr,
    out: &mut Vec<(Option<&'c str>, String, crate::ast::Value)>,
) {
    match expr {
        Expr::Binary {
            left,
            op: BinaryOp::And,
            right,
        } => {
            collect_atoms(ctx, left, out);
            collect_atoms(ctx, right, out);
        }
        Expr::Binary {
            left,
            op: BinaryOp::Eq,
            right,
        } => {
            let (column, value) = match (left.as_ref(), right.as_ref()) {
                (Expr::Column(c), other) | (other, Expr::Column(c)) => (c, other),
                _ => return,
            };
            if let Ok(Some(v)) = ctx.resolve(value) {
                let owner = column.owner.as_deref().and_then(|o| ctx.owner_table(o));
                out.push((owner, column.name.clone(), v));
            }
        }
        Expr::InList {
            expr,
            list,
            negated: false,
        } => {
            let Expr::Column(column) = expr.as_ref() else {
                return;
            };
            let owner = column.owner.as_deref().and_then(|o| ctx.owner_table(o));
            for item in list {
                if let Ok(Some(v)) = ctx.resolve(item) {
                    out.push((owner, column.name.clone(), v));
                }
            }
        }
        _ => {}
    }
}
