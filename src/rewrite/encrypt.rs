//! Encrypted column rewrite.
//!
//! Logical columns are replaced by their cipher (or assisted query) columns
//! and literal values are encrypted before the statement leaves the
//! middleware. Result columns to decrypt are recorded for the merge engine.

use std::sync::Arc;

use crate::algorithm::EncryptAlgorithm;
use crate::ast::{
    AggregateFunc, Assignment, BinaryOp, ColumnRef, Expr, Insert, Select, SelectItem, Statement,
    Update, Value,
};
use crate::context::StatementContext;
use crate::error::{ShardError, ShardResult};
use crate::merge::DecryptColumn;
use crate::rule::{EncryptColumn, EncryptRule};

/// Columns the merge engine has to decrypt or hide.
#[derive(Debug, Default)]
pub(super) struct EncryptOutcome {
    pub decrypt: Vec<DecryptColumn>,
    pub hidden_labels: Vec<String>,
}

pub(super) struct EncryptRewriter<'a> {
    ctx: &'a StatementContext,
    rule: &'a EncryptRule,
    params: &'a mut Vec<Value>,
    outcome: EncryptOutcome,
}

impl<'a> EncryptRewriter<'a> {
    pub fn new(ctx: &'a StatementContext, rule: &'a EncryptRule, params: &'a mut Vec<Value>) -> Self {
        Self {
            ctx,
            rule,
            params,
            outcome: EncryptOutcome::default(),
        }
    }

    pub fn rewrite(mut self, stmt: &mut Statement) -> ShardResult<EncryptOutcome> {
        match stmt {
            Statement::Select(select) => self.select(select)?,
            Statement::Insert(insert) => self.insert(insert)?,
            Statement::Update(update) => self.update(update)?,
            Statement::Delete(delete) => {
                if let Some(selection) = &mut delete.selection {
                    self.predicate(selection)?;
                }
            }
        }
        Ok(self.outcome)
    }

    fn select(&mut self, select: &mut Select) -> ShardResult<()> {
        for item in &mut select.projections {
            self.projection(item)?;
        }
        for join in &mut select.joins {
            if let Some(on) = &mut join.on {
                self.predicate(on)?;
            }
        }
        if let Some(selection) = &mut select.selection {
            self.predicate(selection)?;
        }
        for e in &select.group_by {
            self.reject(e, "GROUP BY")?;
        }
        if let Some(having) = &select.having {
            self.reject(having, "HAVING")?;
        }
        for item in &select.order_by {
            self.reject(&item.expr, "ORDER BY")?;
        }
        Ok(())
    }

    fn projection(&mut self, item: &mut SelectItem) -> ShardResult<()> {
        match item {
            SelectItem::Star { owner } => {
                let (ctx, rule) = (self.ctx, self.rule);
                let tables: Vec<&str> = match owner {
                    Some(owner) => ctx.owner_table(owner).into_iter().collect(),
                    None => ctx.tables().iter().map(String::as_str).collect(),
                };
                for table in tables {
                    for column in rule.columns(table) {
                        self.outcome.decrypt.push(DecryptColumn {
                            label: column.cipher_column.clone(),
                            rename: Some(column.logic_column.clone()),
                            encryptor: Arc::clone(&column.encryptor),
                        });
                        if let Some(assisted) = &column.assisted_query {
                            self.outcome.hidden_labels.push(assisted.column.clone());
                        }
                    }
                }
                Ok(())
            }
            SelectItem::Expr {
                expr: Expr::Column(c),
                alias,
            } => {
                let Some(column) = self.lookup(c) else {
                    return Ok(());
                };
                let label = alias.clone().unwrap_or_else(|| c.name.clone());
                c.name = column.cipher_column.clone();
                *alias = Some(label.clone());
                self.outcome.decrypt.push(DecryptColumn {
                    label,
                    rename: None,
                    encryptor: Arc::clone(&column.encryptor),
                });
                Ok(())
            }
            SelectItem::Expr { expr, .. } => self.reject(expr, "a projection expression"),
            SelectItem::Aggregate {
                func: AggregateFunc::Count,
                arg: Some(Expr::Column(c)),
                ..
            } => {
                if let Some(column) = self.lookup(c) {
                    c.name = column.cipher_column.clone();
                }
                Ok(())
            }
            SelectItem::Aggregate { arg: Some(arg), .. } => self.reject(arg, "an aggregate"),
            SelectItem::Aggregate { arg: None, .. } => Ok(()),
        }
    }

    fn insert(&mut self, insert: &mut Insert) -> ShardResult<()> {
        let rule = self.rule;
        let table = insert.table.name.clone();
        let mut assisted_columns = Vec::new();
        let mut assisted_values: Vec<Vec<Expr>> = vec![Vec::new(); insert.rows.len()];

        for i in 0..insert.columns.len() {
            let Some(column) = rule.column(&table, &insert.columns[i]) else {
                continue;
            };
            for (row, extra) in insert.rows.iter_mut().zip(assisted_values.iter_mut()) {
                let Some(value) = row.get_mut(i) else {
                    continue;
                };
                let original = value.clone();
                *value = self.encrypt_operand(&original, column.encryptor.as_ref(), &column.logic_column)?;
                if let Some(assisted) = &column.assisted_query {
                    extra.push(self.encrypt_operand(
                        &original,
                        assisted.encryptor.as_ref(),
                        &column.logic_column,
                    )?);
                }
            }
            insert.columns[i] = column.cipher_column.clone();
            if let Some(assisted) = &column.assisted_query {
                assisted_columns.push(assisted.column.clone());
            }
        }

        insert.columns.extend(assisted_columns);
        for (row, extra) in insert.rows.iter_mut().zip(assisted_values) {
            row.extend(extra);
        }
        Ok(())
    }

    fn update(&mut self, update: &mut Update) -> ShardResult<()> {
        let rule = self.rule;
        let table = update.table.name.clone();
        let mut extra = Vec::new();
        for assignment in &mut update.assignments {
            if let Some(column) = rule.column(&table, &assignment.column) {
                let original = assignment.value.clone();
                assignment.value =
                    self.encrypt_operand(&original, column.encryptor.as_ref(), &column.logic_column)?;
                assignment.column = column.cipher_column.clone();
                if let Some(assisted) = &column.assisted_query {
                    extra.push(Assignment {
                        column: assisted.column.clone(),
                        value: self.encrypt_operand(
                            &original,
                            assisted.encryptor.as_ref(),
                            &column.logic_column,
                        )?,
                    });
                }
            } else {
                self.reject(&assignment.value, "an assignment")?;
            }
        }
        update.assignments.extend(extra);
        if let Some(selection) = &mut update.selection {
            self.predicate(selection)?;
        }
        Ok(())
    }

    fn predicate(&mut self, expr: &mut Expr) -> ShardResult<()> {
        match expr {
            Expr::Binary {
                left,
                op: BinaryOp::And | BinaryOp::Or,
                right,
            } => {
                self.predicate(left)?;
                self.predicate(right)
            }
            Expr::Not(inner) => self.predicate(inner),
            Expr::Binary {
                left,
                op: BinaryOp::Eq | BinaryOp::Ne,
                right,
            } => {
                if let Some(column) = self.encrypted(left) {
                    self.equality(left, right, column)
                } else if let Some(column) = self.encrypted(right) {
                    self.equality(right, left, column)
                } else {
                    self.reject(left, "a comparison")?;
                    self.reject(right, "a comparison")
                }
            }
            Expr::InList { expr: subject, list, .. } => {
                let Some(column) = self.encrypted(subject) else {
                    self.reject(subject, "an IN list")?;
                    for item in list.iter() {
                        self.reject(item, "an IN list")?;
                    }
                    return Ok(());
                };
                let (target, encryptor) = query_column(column);
                for item in list.iter_mut() {
                    *item = self.encrypt_operand(item, encryptor.as_ref(), &column.logic_column)?;
                }
                rename(subject, target);
                Ok(())
            }
            Expr::IsNull { expr: subject, .. } => {
                if let Some(column) = self.encrypted(subject) {
                    rename(subject, &column.cipher_column);
                }
                Ok(())
            }
            other => self.reject(other, "a range, LIKE or function predicate"),
        }
    }

    fn equality(&mut self, subject: &mut Expr, value: &mut Expr, column: &EncryptColumn) -> ShardResult<()> {
        let (target, encryptor) = query_column(column);
        *value = self.encrypt_operand(value, encryptor.as_ref(), &column.logic_column)?;
        rename(subject, target);
        Ok(())
    }

    /// Encrypt a literal or bound parameter. Parameters are re-bound as new
    /// trailing parameters so the original value stays untouched.
    fn encrypt_operand(
        &mut self,
        operand: &Expr,
        encryptor: &dyn EncryptAlgorithm,
        logical: &str,
    ) -> ShardResult<Expr> {
        match operand {
            Expr::Literal(v) => Ok(Expr::Literal(encryptor.encrypt(v)?)),
            Expr::Param(n) => {
                let value = n
                    .checked_sub(1)
                    .and_then(|i| self.params.get(i))
                    .ok_or(ShardError::MissingParameter {
                        index: *n,
                        bound: self.params.len(),
                    })?;
                let cipher = encryptor.encrypt(value)?;
                self.params.push(cipher);
                Ok(Expr::Param(self.params.len()))
            }
            other => Err(ShardError::rewrite(format!(
                "encrypted column '{}' can only take a literal or parameter, got {}",
                logical, other
            ))),
        }
    }

    fn encrypted(&self, expr: &Expr) -> Option<&'a EncryptColumn> {
        match expr {
            Expr::Column(c) => self.lookup(c),
            _ => None,
        }
    }

    /// Qualified columns resolve through their owner; unqualified ones to the
    /// first referenced table that encrypts a column of that name.
    fn lookup(&self, column: &ColumnRef) -> Option<&'a EncryptColumn> {
        let rule: &'a EncryptRule = self.rule;
        let ctx: &'a StatementContext = self.ctx;
        match &column.owner {
            Some(owner) => rule.column(ctx.owner_table(owner)?, &column.name),
            None => ctx.tables().iter().find_map(|t| rule.column(t, &column.name)),
        }
    }

    fn reject(&self, expr: &Expr, clause: &str) -> ShardResult<()> {
        let mut found = None;
        expr.for_each_column(&mut |c| {
            if found.is_none() && self.lookup(c).is_some() {
                found = Some(c.to_string());
            }
        });
        match found {
            Some(column) => Err(ShardError::rewrite(format!(
                "encrypted column '{}' cannot be used in {}",
                column, clause
            ))),
            None => Ok(()),
        }
    }
}

/// Column and encryptor used to compare a value: the assisted query column
/// when configured, the cipher column otherwise.
fn query_column(column: &EncryptColumn) -> (&str, &Arc<dyn EncryptAlgorithm>) {
    match &column.assisted_query {
        Some(assisted) => (&assisted.column, &assisted.encryptor),
        None => (&column.cipher_column, &column.encryptor),
    }
}

fn rename(expr: &mut Expr, name: &str) {
    if let Expr::Column(c) = expr {
        c.name = name.to_string();
    }
}
