//! Renders a statement for one route unit.
//!
//! Logical tables become the unit's actual tables and placeholders are
//! renumbered in render order, so every unit carries exactly the parameters
//! its SQL references.

use super::dialect::{Dialect, SqlGenerator};
use crate::ast::{
    BinaryOp, Delete, Expr, Insert, LockMode, Select, SelectItem, SortOrder, Statement, TableRef,
    Update, Value,
};
use crate::error::{ShardError, ShardResult};
use crate::route::RouteUnit;

pub struct SqlWriter<'a> {
    generator: Box<dyn SqlGenerator>,
    unit: &'a RouteUnit,
    /// Original parameters followed by the ones the rewrite appended.
    params: &'a [Value],
    bound: Vec<Value>,
    aliases: Vec<String>,
}

impl<'a> SqlWriter<'a> {
    pub fn new(dialect: Dialect, unit: &'a RouteUnit, params: &'a [Value]) -> Self {
        Self {
            generator: dialect.generator(),
            unit,
            params,
            bound: Vec::new(),
            aliases: Vec::new(),
        }
    }

    /// Parameters referenced by the rendered SQL, in placeholder order.
    pub fn into_params(self) -> Vec<Value> {
        self.bound
    }

    pub fn statement(&mut self, stmt: &Statement) -> ShardResult<String> {
        match stmt {
            Statement::Select(s) => self.select(s),
            Statement::Insert(i) => self.insert(i),
            Statement::Update(u) => self.update(u),
            Statement::Delete(d) => self.delete(d),
        }
    }

    fn select(&mut self, select: &Select) -> ShardResult<String> {
        self.aliases
            .extend(select.table_refs().filter_map(|t| t.alias.clone()));

        let mut sql = String::from("SELECT ");
        if select.distinct {
            sql.push_str("DISTINCT ");
        }
        let mut items = Vec::with_capacity(select.projections.len());
        for item in &select.projections {
            items.push(self.select_item(item)?);
        }
        sql.push_str(&items.join(", "));

        sql.push_str(" FROM ");
        sql.push_str(&self.table(&select.from));
        for join in &select.joins {
            sql.push(' ');
            sql.push_str(join.kind.keyword());
            sql.push(' ');
            sql.push_str(&self.table(&join.table));
            if let Some(on) = &join.on {
                sql.push_str(" ON ");
                sql.push_str(&self.expr(on)?);
            }
        }
        if let Some(selection) = &select.selection {
            sql.push_str(" WHERE ");
            sql.push_str(&self.expr(selection)?);
        }
        if !select.group_by.is_empty() {
            let mut keys = Vec::with_capacity(select.group_by.len());
            for e in &select.group_by {
                keys.push(self.expr(e)?);
            }
            sql.push_str(" GROUP BY ");
            sql.push_str(&keys.join(", "));
        }
        if let Some(having) = &select.having {
            sql.push_str(" HAVING ");
            sql.push_str(&self.expr(having)?);
        }
        if !select.order_by.is_empty() {
            let mut keys = Vec::with_capacity(select.order_by.len());
            for item in &select.order_by {
                let key = self.expr(&item.expr)?;
                keys.push(match item.order {
                    SortOrder::Asc => key,
                    SortOrder::Desc => format!("{} DESC", key),
                });
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }
        if let Some(limit) = &select.limit {
            sql.push_str(" LIMIT ");
            sql.push_str(&self.expr(limit)?);
        }
        if let Some(offset) = &select.offset {
            sql.push_str(" OFFSET ");
            sql.push_str(&self.expr(offset)?);
        }
        match select.lock {
            Some(LockMode::ForUpdate) => sql.push_str(" FOR UPDATE"),
            Some(LockMode::ForShare) => sql.push_str(" FOR SHARE"),
            None => {}
        }
        Ok(sql)
    }

    fn select_item(&mut self, item: &SelectItem) -> ShardResult<String> {
        Ok(match item {
            SelectItem::Star { owner: None } => "*".to_string(),
            SelectItem::Star { owner: Some(owner) } => format!("{}.*", self.qualifier(owner)),
            SelectItem::Expr { expr, alias } => {
                let text = self.expr(expr)?;
                self.aliased(text, alias.as_deref())
            }
            SelectItem::Aggregate {
                func,
                arg,
                distinct,
                alias,
            } => {
                let arg = match arg {
                    Some(arg) => self.expr(arg)?,
                    None => "*".to_string(),
                };
                let distinct = if *distinct { "DISTINCT " } else { "" };
                self.aliased(format!("{}({}{})", func, distinct, arg), alias.as_deref())
            }
        })
    }

    fn aliased(&self, text: String, alias: Option<&str>) -> String {
        match alias {
            Some(alias) => format!("{} AS {}", text, self.generator.quote_identifier(alias)),
            None => text,
        }
    }

    fn insert(&mut self, insert: &Insert) -> ShardResult<String> {
        let columns: Vec<String> = insert
            .columns
            .iter()
            .map(|c| self.generator.quote_identifier(c))
            .collect();
        let mut rows = Vec::with_capacity(insert.rows.len());
        for row in &insert.rows {
            let mut values = Vec::with_capacity(row.len());
            for e in row {
                values.push(self.expr(e)?);
            }
            rows.push(format!("({})", values.join(", ")));
        }
        Ok(format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table_name(&insert.table.name),
            columns.join(", "),
            rows.join(", ")
        ))
    }

    fn update(&mut self, update: &Update) -> ShardResult<String> {
        self.aliases.extend(update.table.alias.clone());
        let mut sets = Vec::with_capacity(update.assignments.len());
        for a in &update.assignments {
            let value = self.expr(&a.value)?;
            sets.push(format!("{} = {}", self.generator.quote_identifier(&a.column), value));
        }
        let mut sql = format!("UPDATE {} SET {}", self.table(&update.table), sets.join(", "));
        if let Some(selection) = &update.selection {
            sql.push_str(" WHERE ");
            sql.push_str(&self.expr(selection)?);
        }
        Ok(sql)
    }

    fn delete(&mut self, delete: &Delete) -> ShardResult<String> {
        self.aliases.extend(delete.table.alias.clone());
        let mut sql = format!("DELETE FROM {}", self.table(&delete.table));
        if let Some(selection) = &delete.selection {
            sql.push_str(" WHERE ");
            sql.push_str(&self.expr(selection)?);
        }
        Ok(sql)
    }

    fn table_name(&self, logical: &str) -> String {
        let actual = self.unit.actual_table(logical).unwrap_or(logical);
        self.generator.quote_identifier(actual)
    }

    fn table(&self, table: &TableRef) -> String {
        let name = self.table_name(&table.name);
        match &table.alias {
            Some(alias) => format!("{} AS {}", name, self.generator.quote_identifier(alias)),
            None => name,
        }
    }

    /// A qualifier naming an unaliased logical table follows its substitution.
    fn qualifier(&self, owner: &str) -> String {
        if self.aliases.iter().any(|a| a.eq_ignore_ascii_case(owner)) {
            return self.generator.quote_identifier(owner);
        }
        self.table_name(owner)
    }

    fn expr(&mut self, expr: &Expr) -> ShardResult<String> {
        Ok(match expr {
            Expr::Literal(v) => self.generator.literal(v),
            Expr::Param(n) => {
                let value = n
                    .checked_sub(1)
                    .and_then(|i| self.params.get(i))
                    .ok_or(ShardError::MissingParameter {
                        index: *n,
                        bound: self.params.len(),
                    })?;
                self.bound.push(value.clone());
                self.generator.placeholder(self.bound.len())
            }
            Expr::Column(c) => {
                let name = self.generator.quote_identifier(&c.name);
                match &c.owner {
                    Some(owner) => format!("{}.{}", self.qualifier(owner), name),
                    None => name,
                }
            }
            Expr::Binary { left, op, right } => {
                let l = self.operand(left, *op, false)?;
                let r = self.operand(right, *op, true)?;
                format!("{} {} {}", l, op, r)
            }
            Expr::Not(inner) => format!("NOT ({})", self.expr(inner)?),
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                if list.is_empty() {
                    return Ok(if *negated { "1 = 1" } else { "1 = 0" }.to_string());
                }
                let subject = self.subject(expr)?;
                let mut items = Vec::with_capacity(list.len());
                match list.as_slice() {
                    [Expr::Subquery(select)] => items.push(self.select(select)?),
                    _ => {
                        for item in list {
                            items.push(self.expr(item)?);
                        }
                    }
                }
                let not = if *negated { "NOT " } else { "" };
                format!("{} {}IN ({})", subject, not, items.join(", "))
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let subject = self.subject(expr)?;
                let low = self.subject(low)?;
                let high = self.subject(high)?;
                let not = if *negated { "NOT " } else { "" };
                format!("{} {}BETWEEN {} AND {}", subject, not, low, high)
            }
            Expr::IsNull { expr, negated } => {
                let not = if *negated { "NOT " } else { "" };
                format!("{} IS {}NULL", self.subject(expr)?, not)
            }
            Expr::Function { name, args } => {
                let mut items = Vec::with_capacity(args.len());
                for arg in args {
                    items.push(self.expr(arg)?);
                }
                format!("{}({})", name, items.join(", "))
            }
            Expr::Subquery(select) => format!("({})", self.select(select)?),
        })
    }

    fn operand(&mut self, operand: &Expr, parent: BinaryOp, right: bool) -> ShardResult<String> {
        let text = self.expr(operand)?;
        let wrap = match operand {
            Expr::Binary { op, .. } => {
                op.precedence() < parent.precedence()
                    || (right
                        && op.precedence() == parent.precedence()
                        && !matches!(
                            parent,
                            BinaryOp::And | BinaryOp::Or | BinaryOp::Add | BinaryOp::Mul
                        ))
            }
            _ => false,
        };
        Ok(if wrap { format!("({})", text) } else { text })
    }

    /// Operand of IN / BETWEEN / IS NULL.
    fn subject(&mut self, expr: &Expr) -> ShardResult<String> {
        let text = self.expr(expr)?;
        Ok(match expr {
            Expr::Binary { op, .. } if op.precedence() <= BinaryOp::Eq.precedence() => {
                format!("({})", text)
            }
            _ => text,
        })
    }
}
