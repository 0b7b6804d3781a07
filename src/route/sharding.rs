use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use super::{RouteClass, RouteContext, RouteMapper, RouteUnit};
use crate::algorithm::ShardingValue;
use crate::ast::Statement;
use crate::condition::{ConditionBranch, ConditionValue, ShardingCondition, ShardingConditions};
use crate::context::StatementContext;
use crate::error::{ShardError, ShardResult};
use crate::rule::{DataNode, RuleSet, ShardingRule, ShardingStrategy, TableRule};

/// Route by the sharding rule; statements without sharded tables go to the
/// default data source, broadcast tables to one or every data source.
pub(super) fn route(
    ctx: &StatementContext,
    conditions: &ShardingConditions,
    rules: &RuleSet,
) -> ShardResult<RouteContext> {
    let Some(sharding) = rules.sharding() else {
        let ds = rules.data_sources().first().cloned().unwrap_or_default();
        return Ok(single_unit(ctx, &ds));
    };
    check_sharding_key_update(ctx, sharding)?;

    let sharded: Vec<&TableRule> = ctx
        .tables()
        .iter()
        .filter_map(|t| sharding.table_rule(t))
        .collect();

    if sharded.is_empty() {
        return route_unsharded(ctx, sharding);
    }
    if let Statement::Insert(_) = ctx.statement() {
        return route_insert(ctx, conditions, sharded[0]);
    }

    let primary = sharded
        .iter()
        .copied()
        .find(|r| conditions.get(&r.logic_table).is_some_and(|c| c.is_narrowed()))
        .unwrap_or(sharded[0]);
    let primary_nodes = table_nodes(primary, conditions.get(&primary.logic_table))?;
    if primary_nodes.len() > 1 && !conditions.get(&primary.logic_table).is_some_and(|c| c.is_narrowed()) {
        debug!(table = %primary.logic_table, nodes = primary_nodes.len(), "no sharding value, routing to every data node");
    }

    // Tables that are neither the primary nor bound to it: each must land on a
    // single node, on the primary's only data source.
    let mut unbound: BTreeMap<String, DataNode> = BTreeMap::new();
    for rule in sharded.iter().copied() {
        if sharding.is_bound(&primary.logic_table, &rule.logic_table) {
            continue;
        }
        let nodes = table_nodes(rule, conditions.get(&rule.logic_table))?;
        let same_source = |n: &DataNode| primary_nodes.iter().all(|p| p.data_source == n.data_source);
        match (primary_nodes.len(), nodes.as_slice()) {
            (0, _) => {}
            (_, []) => {
                debug!(table = %rule.logic_table, "condition matches no data node");
                return finish(ctx, Vec::new(), RouteClass::MultiShard, &rule.logic_table);
            }
            (1, [node]) if same_source(node) => {
                unbound.insert(rule.logic_table.to_ascii_lowercase(), node.clone());
            }
            _ => {
                return Err(ShardError::unsupported_route(
                    &primary.logic_table,
                    &rule.logic_table,
                    "tables are not bound and route to more than one data node",
                ));
            }
        }
    }

    let mut units = Vec::with_capacity(primary_nodes.len());
    for node in &primary_nodes {
        let Some(index) = primary.node_index(&node.data_source, &node.table) else {
            continue;
        };
        let mut tables = Vec::with_capacity(ctx.tables().len());
        for table in ctx.tables() {
            let mapper = if let Some(rule) = sharding.table_rule(table) {
                if let Some(fixed) = unbound.get(&table.to_ascii_lowercase()) {
                    RouteMapper::new(table.clone(), fixed.table.clone())
                } else {
                    let bound = rule.data_nodes.get(index).ok_or_else(|| {
                        ShardError::unsupported_route(
                            &primary.logic_table,
                            table,
                            "binding tables have different numbers of data nodes",
                        )
                    })?;
                    RouteMapper::new(table.clone(), bound.table.clone())
                }
            } else if sharding.is_broadcast(table) {
                RouteMapper::identity(table.clone())
            } else {
                let default = sharding.default_data_source();
                if default != Some(node.data_source.as_str()) {
                    return Err(ShardError::unsupported_route(
                        &primary.logic_table,
                        table,
                        "single table is not on the sharded table's data source",
                    ));
                }
                RouteMapper::identity(table.clone())
            };
            tables.push(mapper);
        }
        let unit = RouteUnit {
            data_source: RouteMapper::identity(node.data_source.clone()),
            tables,
            row_indexes: Vec::new(),
        };
        if !units.contains(&unit) {
            units.push(unit);
        }
    }

    let class = if units.len() > 1 && units.len() == primary.data_nodes.len() {
        RouteClass::Broadcast
    } else {
        RouteClass::MultiShard
    };
    finish(ctx, units, class, &primary.logic_table)
}

/// Data nodes a table's condition selects, in declaration order.
fn table_nodes(rule: &TableRule, condition: Option<&ShardingCondition>) -> ShardResult<Vec<DataNode>> {
    let full;
    let condition = match condition {
        Some(c) => c,
        None => {
            full = ShardingCondition::unconstrained(&rule.logic_table, &rule.sharding_columns());
            &full
        }
    };

    let mut picked: BTreeSet<usize> = BTreeSet::new();
    for branch in &condition.branches {
        if rule.strict {
            if let Some(column) = rule
                .sharding_columns()
                .into_iter()
                .find(|c| branch.is_undetermined(c))
            {
                return Err(ShardError::ambiguous(
                    &rule.logic_table,
                    format!("no usable value for sharding column '{}'", column),
                ));
            }
        }
        if !branch.undetermined.is_empty() {
            warn!(
                table = %rule.logic_table,
                columns = ?branch.undetermined,
                "sharding columns cannot be evaluated, routing to every candidate"
            );
        }
        for node in branch_nodes(rule, branch)? {
            if let Some(index) = rule.node_index(&node.data_source, &node.table) {
                picked.insert(index);
            }
        }
    }
    Ok(picked.into_iter().map(|i| rule.data_nodes[i].clone()).collect())
}

fn branch_nodes(rule: &TableRule, branch: &ConditionBranch) -> ShardResult<Vec<DataNode>> {
    let sources: Vec<String> = rule.data_sources().into_iter().map(String::from).collect();
    let sources = apply_strategy(rule.database_strategy.as_ref(), branch, &sources)?;

    let mut nodes = Vec::new();
    for ds in &sources {
        let tables: Vec<String> = rule
            .data_nodes
            .iter()
            .filter(|n| &n.data_source == ds)
            .map(|n| n.table.clone())
            .collect();
        for table in apply_strategy(rule.table_strategy.as_ref(), branch, &tables)? {
            nodes.push(DataNode::new(ds.clone(), table));
        }
    }
    Ok(nodes)
}

fn apply_strategy(
    strategy: Option<&ShardingStrategy>,
    branch: &ConditionBranch,
    candidates: &[String],
) -> ShardResult<Vec<String>> {
    let Some(strategy) = strategy else {
        return Ok(candidates.to_vec());
    };
    let targets = match branch.value(&strategy.column) {
        None => return Ok(candidates.to_vec()),
        Some(ConditionValue::Exact(values)) => strategy.algorithm.compute(
            candidates,
            &ShardingValue::Exact {
                column: &strategy.column,
                values,
            },
        )?,
        Some(ConditionValue::Range(range)) => strategy.algorithm.compute(
            candidates,
            &ShardingValue::Range {
                column: &strategy.column,
                range,
            },
        )?,
    };
    Ok(candidates
        .iter()
        .filter(|c| targets.contains(c))
        .cloned()
        .collect())
}

fn route_insert(
    ctx: &StatementContext,
    conditions: &ShardingConditions,
    rule: &TableRule,
) -> ShardResult<RouteContext> {
    let Some(condition) = conditions.get(&rule.logic_table) else {
        return Err(ShardError::NoMatchingShard(rule.logic_table.clone()));
    };
    let mut rows: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for branch in &condition.branches {
        let nodes = branch_nodes(rule, branch)?;
        let row = branch.insert_row.unwrap_or_default();
        let node = match nodes.as_slice() {
            [node] => node,
            [] => return Err(ShardError::NoMatchingShard(rule.logic_table.clone())),
            _ => {
                return Err(ShardError::ambiguous(
                    &rule.logic_table,
                    format!("row {} resolves to {} data nodes", row, nodes.len()),
                ));
            }
        };
        let index = rule
            .node_index(&node.data_source, &node.table)
            .ok_or_else(|| ShardError::NoMatchingShard(rule.logic_table.clone()))?;
        rows.entry(index).or_default().push(row);
    }

    let units = rows
        .into_iter()
        .map(|(index, row_indexes)| {
            let node = &rule.data_nodes[index];
            RouteUnit {
                data_source: RouteMapper::identity(node.data_source.clone()),
                tables: vec![RouteMapper::new(rule.logic_table.clone(), node.table.clone())],
                row_indexes,
            }
        })
        .collect();
    finish(ctx, units, RouteClass::MultiShard, &rule.logic_table)
}

fn route_unsharded(ctx: &StatementContext, sharding: &ShardingRule) -> ShardResult<RouteContext> {
    let all_broadcast = ctx.tables().iter().all(|t| sharding.is_broadcast(t));
    let any_broadcast = ctx.tables().iter().any(|t| sharding.is_broadcast(t));

    if all_broadcast && !ctx.is_read() {
        let units: Vec<RouteUnit> = sharding
            .data_sources()
            .iter()
            .map(|ds| unit_on(ctx, ds))
            .collect();
        let class = if units.len() == 1 {
            RouteClass::Single
        } else {
            RouteClass::Broadcast
        };
        return Ok(RouteContext::new(units, class));
    }
    if all_broadcast {
        let ds = sharding.data_sources().first().cloned().unwrap_or_default();
        return Ok(single_unit(ctx, &ds));
    }

    let ds = sharding.default_data_source().ok_or_else(|| {
        let table = ctx
            .tables()
            .iter()
            .find(|t| !sharding.is_broadcast(t))
            .cloned()
            .unwrap_or_default();
        ShardError::Route(format!("no default data source for single table '{}'", table))
    })?;
    if any_broadcast {
        debug!(data_source = ds, "broadcast tables joined with single tables");
    }
    Ok(single_unit(ctx, ds))
}

fn check_sharding_key_update(ctx: &StatementContext, sharding: &ShardingRule) -> ShardResult<()> {
    let Statement::Update(update) = ctx.statement() else {
        return Ok(());
    };
    let Some(rule) = sharding.table_rule(&update.table.name) else {
        return Ok(());
    };
    let columns = rule.sharding_columns();
    match update
        .assignments
        .iter()
        .find(|a| columns.contains(&a.column.to_ascii_lowercase().as_str()))
    {
        Some(a) => Err(ShardError::Route(format!(
            "cannot update sharding column '{}' of table '{}'",
            a.column, rule.logic_table
        ))),
        None => Ok(()),
    }
}

fn unit_on(ctx: &StatementContext, ds: &str) -> RouteUnit {
    RouteUnit {
        data_source: RouteMapper::identity(ds),
        tables: ctx.tables().iter().map(|t| RouteMapper::identity(t.clone())).collect(),
        row_indexes: Vec::new(),
    }
}

fn single_unit(ctx: &StatementContext, ds: &str) -> RouteContext {
    RouteContext::new(vec![unit_on(ctx, ds)], RouteClass::Single)
}

/// Apply the zero-unit and single-unit rules.
fn finish(
    ctx: &StatementContext,
    units: Vec<RouteUnit>,
    class: RouteClass,
    table: &str,
) -> ShardResult<RouteContext> {
    match units.len() {
        0 if ctx.is_read() => Ok(RouteContext::new(units, RouteClass::Unsupported)),
        0 => Err(ShardError::NoMatchingShard(table.to_string())),
        1 => Ok(RouteContext::new(units, RouteClass::Single)),
        _ => Ok(RouteContext::new(units, class)),
    }
}
