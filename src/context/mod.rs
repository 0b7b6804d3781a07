//! Statement context: one normalized, read-only view of a parsed statement
//! and its bound parameters.

use serde::{Deserialize, Serialize};

use crate::ast::{ColumnRef, Expr, LockMode, Select, SelectItem, Statement, TableRef, Value};
use crate::error::{ShardError, ShardResult};

/// Statement category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl SqlKind {
    /// Lowercase name, as used in shadow algorithm properties.
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlKind::Select => "select",
            SqlKind::Insert => "insert",
            SqlKind::Update => "update",
            SqlKind::Delete => "delete",
        }
    }
}

/// Routing hints supplied next to the statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hints {
    /// Route to shadow data sources (SQL_HINT shadow algorithms).
    #[serde(default)]
    pub shadow: bool,
    /// Force reads to the write data source.
    #[serde(default)]
    pub write_route_only: bool,
}

/// A resolved LIMIT or OFFSET value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationValue {
    pub value: u64,
    /// Whether the original clause used a placeholder.
    pub bound: bool,
}

/// LIMIT / OFFSET with placeholders resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub offset: Option<PaginationValue>,
    pub limit: Option<PaginationValue>,
}

impl Pagination {
    pub fn is_present(&self) -> bool {
        self.offset.is_some() || self.limit.is_some()
    }

    pub fn offset_value(&self) -> u64 {
        self.offset.map(|o| o.value).unwrap_or(0)
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit.map(|l| l.value)
    }
}

/// Immutable per-request view of a statement.
#[derive(Debug, Clone)]
pub struct StatementContext {
    statement: Statement,
    params: Vec<Value>,
    kind: SqlKind,
    table_refs: Vec<TableRef>,
    tables: Vec<String>,
    projection_labels: Vec<String>,
    pagination: Pagination,
    hints: Hints,
    subqueries: SubqueryRefs,
}

/// Tables and columns read inside subqueries, at any depth.
#[derive(Debug, Clone, Default)]
struct SubqueryRefs {
    tables: Vec<String>,
    columns: Vec<ColumnRef>,
}

impl SubqueryRefs {
    fn collect(statement: &Statement) -> Self {
        let mut refs = Self::default();
        for expr in statement.expressions() {
            expr.for_each_subquery(&mut |select| refs.visit(select));
        }
        refs
    }

    fn visit(&mut self, select: &Select) {
        for t in select.table_refs() {
            push_table(&mut self.tables, &t.name);
        }
        for expr in select.expressions() {
            expr.for_each_column(&mut |c| self.columns.push(c.clone()));
            expr.for_each_subquery(&mut |inner| self.visit(inner));
        }
    }
}

impl StatementContext {
    /// Build a context, checking every placeholder against `params`.
    pub fn new(statement: Statement, params: Vec<Value>) -> ShardResult<Self> {
        check_params(&statement, params.len())?;

        let (kind, table_refs) = match &statement {
            Statement::Select(s) => (SqlKind::Select, select_table_refs(s)),
            Statement::Insert(i) => (SqlKind::Insert, vec![i.table.clone()]),
            Statement::Update(u) => (SqlKind::Update, vec![u.table.clone()]),
            Statement::Delete(d) => (SqlKind::Delete, vec![d.table.clone()]),
        };

        let mut tables: Vec<String> = Vec::new();
        for t in &table_refs {
            push_table(&mut tables, &t.name);
        }
        let subqueries = SubqueryRefs::collect(&statement);

        let projection_labels = match &statement {
            Statement::Select(s) => s.projections.iter().map(SelectItem::label).collect(),
            _ => Vec::new(),
        };

        let pagination = match &statement {
            Statement::Select(s) => Pagination {
                offset: resolve_pagination(s.offset.as_ref(), &params)?,
                limit: resolve_pagination(s.limit.as_ref(), &params)?,
            },
            _ => Pagination::default(),
        };

        Ok(Self {
            statement,
            params,
            kind,
            table_refs,
            tables,
            projection_labels,
            pagination,
            hints: Hints::default(),
            subqueries,
        })
    }

    pub fn with_hints(mut self, hints: Hints) -> Self {
        self.hints = hints;
        self
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub fn select(&self) -> Option<&Select> {
        match &self.statement {
            Statement::Select(s) => Some(s),
            _ => None,
        }
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn kind(&self) -> SqlKind {
        self.kind
    }

    /// Logical table names in first-reference order, without duplicates.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Every table reference, including aliases and repeats.
    pub fn table_refs(&self) -> &[TableRef] {
        &self.table_refs
    }

    /// Logical tables referenced inside subqueries, without duplicates.
    /// Routing only considers [`Self::tables`].
    pub fn subquery_tables(&self) -> &[String] {
        &self.subqueries.tables
    }

    /// Column references inside subqueries, at any depth.
    pub fn subquery_columns(&self) -> &[ColumnRef] {
        &self.subqueries.columns
    }

    pub fn projection_labels(&self) -> &[String] {
        &self.projection_labels
    }

    pub fn pagination(&self) -> &Pagination {
        &self.pagination
    }

    pub fn hints(&self) -> &Hints {
        &self.hints
    }

    pub fn is_read(&self) -> bool {
        self.kind == SqlKind::Select
    }

    pub fn lock(&self) -> Option<LockMode> {
        self.select().and_then(|s| s.lock)
    }

    pub fn is_locking(&self) -> bool {
        self.lock().is_some()
    }

    /// Resolve a column qualifier (table name or alias) to its logical table.
    pub fn owner_table(&self, owner: &str) -> Option<&str> {
        self.table_refs
            .iter()
            .find(|t| t.is_referenced_by(owner))
            .map(|t| t.name.as_str())
    }

    /// Look up a 1-based placeholder.
    pub fn param(&self, index: usize) -> ShardResult<&Value> {
        lookup_param(&self.params, index)
    }

    /// Value of a literal or placeholder; `None` for anything else.
    pub fn resolve(&self, expr: &Expr) -> ShardResult<Option<Value>> {
        match expr {
            Expr::Literal(v) => Ok(Some(v.clone())),
            Expr::Param(n) => self.param(*n).map(|v| Some(v.clone())),
            _ => Ok(None),
        }
    }
}

fn lookup_param(params: &[Value], index: usize) -> ShardResult<&Value> {
    if index == 0 {
        return Err(ShardError::MissingParameter {
            index,
            bound: params.len(),
        });
    }
    params.get(index - 1).ok_or(ShardError::MissingParameter {
        index,
        bound: params.len(),
    })
}

fn push_table(tables: &mut Vec<String>, name: &str) {
    if !tables.iter().any(|n| n.eq_ignore_ascii_case(name)) {
        tables.push(name.to_string());
    }
}

fn select_table_refs(select: &Select) -> Vec<TableRef> {
    select.table_refs().cloned().collect()
}

fn resolve_pagination(expr: Option<&Expr>, params: &[Value]) -> ShardResult<Option<PaginationValue>> {
    let Some(expr) = expr else {
        return Ok(None);
    };
    let (value, bound) = match expr {
        Expr::Literal(v) => (v, false),
        Expr::Param(n) => (lookup_param(params, *n)?, true),
        other => {
            return Err(ShardError::rewrite(format!(
                "unsupported pagination expression: {}",
                other
            )));
        }
    };
    let n = value.as_i64()?;
    let value = u64::try_from(n).map_err(|_| ShardError::coercion(n, "non-negative integer"))?;
    Ok(Some(PaginationValue { value, bound }))
}

/// Fails with `MissingParameter` on the first placeholder outside `1..=bound`.
fn check_params(statement: &Statement, bound: usize) -> ShardResult<()> {
    let mut missing = None;
    let mut check = |n: usize| {
        if (n == 0 || n > bound) && missing.is_none() {
            missing = Some(n);
        }
    };
    match statement {
        Statement::Select(s) => visit_select_params(s, &mut check),
        Statement::Insert(i) => {
            for row in &i.rows {
                for e in row {
                    visit_params(e, &mut check);
                }
            }
        }
        Statement::Update(u) => {
            for a in &u.assignments {
                visit_params(&a.value, &mut check);
            }
            if let Some(e) = &u.selection {
                visit_params(e, &mut check);
            }
        }
        Statement::Delete(d) => {
            if let Some(e) = &d.selection {
                visit_params(e, &mut check);
            }
        }
    }
    match missing {
        Some(index) => Err(ShardError::MissingParameter { index, bound }),
        None => Ok(()),
    }
}

fn visit_select_params(select: &Select, f: &mut impl FnMut(usize)) {
    for item in &select.projections {
        match item {
            SelectItem::Expr { expr, .. } => visit_params(expr, f),
            SelectItem::Aggregate { arg: Some(arg), .. } => visit_params(arg, f),
            _ => {}
        }
    }
    for join in &select.joins {
        if let Some(on) = &join.on {
            visit_params(on, f);
        }
    }
    let clauses = select
        .selection
        .iter()
        .chain(select.group_by.iter())
        .chain(select.having.iter())
        .chain(select.order_by.iter().map(|o| &o.expr))
        .chain(select.limit.iter())
        .chain(select.offset.iter());
    for e in clauses {
        visit_params(e, f);
    }
}

fn visit_params(expr: &Expr, f: &mut impl FnMut(usize)) {
    match expr {
        Expr::Param(n) => f(*n),
        Expr::Literal(_) | Expr::Column(_) => {}
        Expr::Binary { left, right, .. } => {
            visit_params(left, f);
            visit_params(right, f);
        }
        Expr::Not(inner) => visit_params(inner, f),
        Expr::InList { expr, list, .. } => {
            visit_params(expr, f);
            for e in list {
                visit_params(e, f);
            }
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            visit_params(expr, f);
            visit_params(low, f);
            visit_params(high, f);
        }
        Expr::IsNull { expr, .. } => visit_params(expr, f),
        Expr::Function { args, .. } => {
            for e in args {
                visit_params(e, f);
            }
        }
        Expr::Subquery(select) => visit_select_params(select, f),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AggregateFunc, JoinKind};

    fn order_join() -> Statement {
        Select::from(TableRef::aliased("t_order", "o"))
            .projections(vec![
                SelectItem::column("order_id"),
                SelectItem::aggregate(AggregateFunc::Sum, Some(Expr::col("amount"))),
                SelectItem::count_star().with_alias("cnt"),
            ])
            .join(
                JoinKind::Inner,
                TableRef::aliased("t_order_item", "i"),
                Some(Expr::qualified("o", "order_id").equals(Expr::qualified("i", "order_id"))),
            )
            .join(JoinKind::Left, TableRef::new("t_order"), None)
            .filter(Expr::qualified("o", "user_id").equals(Expr::param(1)))
            .limit(Expr::param(2))
            .offset(Expr::lit(5))
            .into()
    }

    #[test]
    fn test_tables_are_deduplicated_in_order() {
        let ctx = StatementContext::new(order_join(), vec![Value::Int(7), Value::Int(10)]).unwrap();
        assert_eq!(ctx.tables(), &["t_order".to_string(), "t_order_item".to_string()]);
        assert_eq!(ctx.table_refs().len(), 3);
        assert_eq!(ctx.owner_table("i"), Some("t_order_item"));
        assert_eq!(ctx.owner_table("x"), None);
    }

    #[test]
    fn test_subquery_tables_are_collected_at_any_depth() {
        let deepest = Select::from(TableRef::new("t_vip")).projections(vec![SelectItem::column("user_id")]);
        let inner = Select::from(TableRef::aliased("t_order", "o"))
            .projections(vec![SelectItem::column("user_id")])
            .filter(Expr::col("user_id").in_list(vec![Expr::Subquery(Box::new(deepest))]));
        let stmt: Statement = Select::from(TableRef::new("t_user"))
            .filter(Expr::col("user_id").in_list(vec![Expr::Subquery(Box::new(inner))]))
            .into();
        let ctx = StatementContext::new(stmt, vec![]).unwrap();
        assert_eq!(ctx.tables(), &["t_user".to_string()]);
        assert_eq!(ctx.subquery_tables(), &["t_order".to_string(), "t_vip".to_string()]);
        assert_eq!(ctx.subquery_columns().len(), 3);
    }

    #[test]
    fn test_projection_labels() {
        let ctx = StatementContext::new(order_join(), vec![Value::Int(7), Value::Int(10)]).unwrap();
        assert_eq!(ctx.projection_labels(), &["order_id", "SUM(amount)", "cnt"]);
    }

    #[test]
    fn test_pagination_resolves_placeholders() {
        let ctx = StatementContext::new(order_join(), vec![Value::Int(7), Value::Int(10)]).unwrap();
        let page = ctx.pagination();
        assert_eq!(page.limit, Some(PaginationValue { value: 10, bound: true }));
        assert_eq!(page.offset, Some(PaginationValue { value: 5, bound: false }));
    }

    #[test]
    fn test_missing_parameter() {
        let err = StatementContext::new(order_join(), vec![Value::Int(7)]).unwrap_err();
        assert!(matches!(err, ShardError::MissingParameter { index: 2, bound: 1 }));
    }

    #[test]
    fn test_negative_limit_is_rejected() {
        let stmt: Statement = Select::from(TableRef::new("t")).limit(Expr::lit(-1)).into();
        assert!(matches!(
            StatementContext::new(stmt, vec![]),
            Err(ShardError::TypeCoercion { .. })
        ));
    }

    #[test]
    fn test_locking_select() {
        let stmt: Statement = Select::from(TableRef::new("t"))
            .lock(LockMode::ForUpdate)
            .into();
        let ctx = StatementContext::new(stmt, vec![]).unwrap();
        assert!(ctx.is_read());
        assert!(ctx.is_locking());
    }
}
