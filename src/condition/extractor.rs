use tracing::{debug, warn};

use super::dnf::{Conjunction, to_dnf};
use super::{
    ConditionBranch, ConditionValue, GeneratedKey, ShardingCondition, ShardingConditions,
    ValueRange,
};
use crate::ast::{BinaryOp, ColumnRef, Expr, Insert, Statement, Value};
use crate::context::StatementContext;
use crate::error::{ShardError, ShardResult};
use crate::rule::{RuleSet, ShardingRule, TableRule};

/// Extract sharding conditions for every sharded table of the statement.
pub fn extract(ctx: &StatementContext, rules: &RuleSet) -> ShardResult<ShardingConditions> {
    let Some(sharding) = rules.sharding() else {
        return Ok(ShardingConditions::default());
    };
    let conditions = match ctx.statement() {
        Statement::Insert(insert) => extract_insert(ctx, insert, sharding)?,
        stmt => {
            let cap = rules.props().max_condition_branches;
            extract_predicate(ctx, stmt.selection(), sharding, cap)?
        }
    };
    debug!(
        tables = conditions.iter().count(),
        generated_key = conditions.generated_key().is_some(),
        "extracted sharding conditions"
    );
    Ok(conditions)
}

fn extract_predicate(
    ctx: &StatementContext,
    selection: Option<&Expr>,
    sharding: &ShardingRule,
    cap: usize,
) -> ShardResult<ShardingConditions> {
    let sharded: Vec<(&str, &TableRule)> = ctx
        .tables()
        .iter()
        .filter_map(|t| sharding.table_rule(t).map(|r| (t.as_str(), r)))
        .collect();

    let mut conditions = ShardingConditions::default();
    if sharded.is_empty() {
        return Ok(conditions);
    }

    let conjunctions = match selection {
        None => Some(vec![Vec::new()]),
        Some(expr) => to_dnf(expr, cap),
    };
    let Some(conjunctions) = conjunctions else {
        warn!(cap, "predicate exceeds the condition branch cap, routing to every data node");
        for (table, rule) in &sharded {
            conditions.insert(ShardingCondition::unconstrained(*table, &rule.sharding_columns()));
        }
        return Ok(conditions);
    };

    for (table, rule) in &sharded {
        let walker = Walker {
            ctx,
            table,
            columns: rule.sharding_columns(),
            sharded: &sharded,
        };
        let mut branches: Vec<ConditionBranch> = Vec::new();
        for conj in &conjunctions {
            if let Some(branch) = walker.branch(conj)? {
                if !branches.contains(&branch) {
                    branches.push(branch);
                }
            }
        }
        conditions.insert(ShardingCondition {
            table: table.to_string(),
            branches,
        });
    }
    Ok(conditions)
}

fn extract_insert(
    ctx: &StatementContext,
    insert: &Insert,
    sharding: &ShardingRule,
) -> ShardResult<ShardingConditions> {
    let mut conditions = ShardingConditions::default();
    let table = insert.table.name.as_str();
    let Some(rule) = sharding.table_rule(table) else {
        return Ok(conditions);
    };
    let columns: Vec<String> = insert.columns.iter().map(|c| c.to_ascii_lowercase()).collect();

    let generated = match rule.key_generate() {
        Some(kg) if !columns.contains(&kg.column) => {
            let values = insert
                .rows
                .iter()
                .map(|_| kg.algorithm.generate())
                .collect::<ShardResult<Vec<_>>>()?;
            Some(GeneratedKey {
                column: kg.column.clone(),
                values,
            })
        }
        _ => None,
    };

    let mut branches = Vec::with_capacity(insert.rows.len());
    for (i, row) in insert.rows.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(ShardError::ambiguous(
                table,
                format!("row {} has {} values for {} columns", i, row.len(), columns.len()),
            ));
        }
        let mut branch = ConditionBranch::for_row(i);
        for column in rule.sharding_columns() {
            let value = if let Some(pos) = columns.iter().position(|c| c == column) {
                ctx.resolve(&row[pos])?.ok_or_else(|| {
                    ShardError::ambiguous(
                        table,
                        format!("row {}: sharding column '{}' is not a constant", i, column),
                    )
                })?
            } else if let Some(key) = generated.as_ref().filter(|k| k.column == column) {
                key.values[i].clone()
            } else {
                return Err(ShardError::ambiguous(
                    table,
                    format!("sharding column '{}' is missing and has no key generator", column),
                ));
            };
            branch.narrow(column, ConditionValue::Exact(vec![value]));
        }
        branches.push(branch);
    }

    conditions.insert(ShardingCondition {
        table: table.to_string(),
        branches,
    });
    if let Some(key) = generated {
        conditions.set_generated_key(key);
    }
    Ok(conditions)
}

/// What one predicate atom says about the current table.
enum Effect {
    Narrow(String, ConditionValue),
    Undetermined(Vec<String>),
    False,
    Nothing,
}

/// A direct reference to one of the current table's sharding columns.
struct OwnColumn {
    name: String,
    /// The unqualified name is a sharding column of several tables.
    ambiguous: bool,
}

struct Walker<'a> {
    ctx: &'a StatementContext,
    table: &'a str,
    columns: Vec<&'a str>,
    sharded: &'a [(&'a str, &'a TableRule)],
}

impl Walker<'_> {
    fn branch(&self, conj: &Conjunction<'_>) -> ShardResult<Option<ConditionBranch>> {
        let mut branch = ConditionBranch::default();
        for atom in conj {
            match self.atom(atom)? {
                Effect::Narrow(column, value) => {
                    if !branch.narrow(&column, value) {
                        return Ok(None);
                    }
                }
                Effect::Undetermined(columns) => branch.undetermined.extend(columns),
                Effect::False => return Ok(None),
                Effect::Nothing => {}
            }
        }
        branch.undetermined.retain(|c| !branch.values.contains_key(c));
        Ok(Some(branch))
    }

    fn atom(&self, atom: &Expr) -> ShardResult<Effect> {
        match atom {
            Expr::Literal(Value::Bool(false)) | Expr::Literal(Value::Null) => Ok(Effect::False),
            Expr::Binary { left, op, right } if op.is_comparison() => {
                if let Some(col) = self.own_column(left) {
                    return self.compare(col, *op, right);
                }
                if let Some(col) = self.own_column(right) {
                    return self.compare(col, op.flip(), left);
                }
                if let (Some(l), Some(r)) = (self.ctx.resolve(left)?, self.ctx.resolve(right)?) {
                    return Ok(constant_comparison(&l, *op, &r));
                }
                Ok(self.nested(atom))
            }
            Expr::InList {
                expr,
                list,
                negated: false,
            } => {
                let Some(col) = self.own_column(expr) else {
                    return Ok(self.nested(atom));
                };
                if col.ambiguous {
                    return Ok(Effect::Undetermined(vec![col.name]));
                }
                let mut values = Vec::with_capacity(list.len());
                for item in list {
                    match self.ctx.resolve(item)? {
                        Some(Value::Null) => {}
                        Some(v) => values.push(v),
                        None => return Ok(Effect::Undetermined(vec![col.name])),
                    }
                }
                if values.is_empty() {
                    return Ok(Effect::False);
                }
                Ok(Effect::Narrow(col.name, ConditionValue::exact(values)))
            }
            Expr::Between {
                expr,
                low,
                high,
                negated: false,
            } => {
                let Some(col) = self.own_column(expr) else {
                    return Ok(self.nested(atom));
                };
                if col.ambiguous {
                    return Ok(Effect::Undetermined(vec![col.name]));
                }
                match (self.ctx.resolve(low)?, self.ctx.resolve(high)?) {
                    (Some(Value::Null), _) | (_, Some(Value::Null)) => Ok(Effect::False),
                    (Some(l), Some(h)) => Ok(Effect::Narrow(
                        col.name,
                        ConditionValue::Range(ValueRange::closed(l, h)),
                    )),
                    _ => Ok(Effect::Undetermined(vec![col.name])),
                }
            }
            // NOT, <>, NOT IN, NOT BETWEEN, LIKE and IS NULL never narrow.
            _ => Ok(Effect::Nothing),
        }
    }

    fn compare(&self, col: OwnColumn, op: BinaryOp, other: &Expr) -> ShardResult<Effect> {
        if col.ambiguous {
            return Ok(Effect::Undetermined(vec![col.name]));
        }
        let effect = match self.ctx.resolve(other)? {
            None => Effect::Undetermined(vec![col.name]),
            Some(Value::Null) => Effect::False,
            Some(v) if op == BinaryOp::Eq => Effect::Narrow(col.name, ConditionValue::Exact(vec![v])),
            Some(v) => match ValueRange::from_comparison(op, v) {
                Some(range) => Effect::Narrow(col.name, ConditionValue::Range(range)),
                None => Effect::Nothing,
            },
        };
        Ok(effect)
    }

    /// Sharding columns of this table buried in functions or arithmetic.
    fn nested(&self, atom: &Expr) -> Effect {
        let mut found: Vec<String> = Vec::new();
        atom.for_each_column(&mut |c| {
            if let Some(col) = self.column(c) {
                if !found.contains(&col.name) {
                    found.push(col.name);
                }
            }
        });
        if found.is_empty() {
            Effect::Nothing
        } else {
            Effect::Undetermined(found)
        }
    }

    fn own_column(&self, expr: &Expr) -> Option<OwnColumn> {
        match expr {
            Expr::Column(c) => self.column(c),
            _ => None,
        }
    }

    fn column(&self, c: &ColumnRef) -> Option<OwnColumn> {
        let name = c.name.to_ascii_lowercase();
        if !self.columns.contains(&name.as_str()) {
            return None;
        }
        match &c.owner {
            Some(owner) => {
                let owner_table = self.ctx.owner_table(owner)?;
                owner_table
                    .eq_ignore_ascii_case(self.table)
                    .then_some(OwnColumn {
                        name,
                        ambiguous: false,
                    })
            }
            None => {
                let claimants = self
                    .sharded
                    .iter()
                    .filter(|(_, rule)| rule.sharding_columns().contains(&name.as_str()))
                    .count();
                Some(OwnColumn {
                    name,
                    ambiguous: claimants > 1,
                })
            }
        }
    }
}

fn constant_comparison(left: &Value, op: BinaryOp, right: &Value) -> Effect {
    use std::cmp::Ordering::*;
    if left.is_null() || right.is_null() {
        return Effect::False;
    }
    let ord = left.compare(right);
    let holds = match op {
        BinaryOp::Eq => ord == Equal,
        BinaryOp::Lt => ord == Less,
        BinaryOp::Lte => ord != Greater,
        BinaryOp::Gt => ord == Greater,
        BinaryOp::Gte => ord != Less,
        _ => true,
    };
    if holds { Effect::Nothing } else { Effect::False }
}
