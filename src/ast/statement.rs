use serde::{Deserialize, Serialize};

use super::expr::Expr;

/// A table in FROM / JOIN / INTO position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
        }
    }

    pub fn aliased(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }

    /// Whether a column qualifier refers to this table.
    pub fn is_referenced_by(&self, owner: &str) -> bool {
        match &self.alias {
            Some(alias) => alias.eq_ignore_ascii_case(owner),
            None => self.name.eq_ignore_ascii_case(owner),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Cross,
}

impl JoinKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Cross => "CROSS JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    pub on: Option<Expr>,
}

/// Aggregate functions the merge engine knows how to combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateFunc {
    /// Resolve a function name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "COUNT" => Some(AggregateFunc::Count),
            "SUM" => Some(AggregateFunc::Sum),
            "MIN" => Some(AggregateFunc::Min),
            "MAX" => Some(AggregateFunc::Max),
            "AVG" => Some(AggregateFunc::Avg),
            _ => None,
        }
    }
}

impl std::fmt::Display for AggregateFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateFunc::Count => write!(f, "COUNT"),
            AggregateFunc::Sum => write!(f, "SUM"),
            AggregateFunc::Min => write!(f, "MIN"),
            AggregateFunc::Max => write!(f, "MAX"),
            AggregateFunc::Avg => write!(f, "AVG"),
        }
    }
}

/// One item of the SELECT list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectItem {
    /// `*` or `owner.*`
    Star { owner: Option<String> },
    Expr { expr: Expr, alias: Option<String> },
    /// Aggregate call; `arg: None` means `COUNT(*)`
    Aggregate {
        func: AggregateFunc,
        arg: Option<Expr>,
        distinct: bool,
        alias: Option<String>,
    },
}

impl SelectItem {
    pub fn star() -> Self {
        SelectItem::Star { owner: None }
    }

    pub fn column(name: impl Into<String>) -> Self {
        SelectItem::Expr {
            expr: Expr::col(name),
            alias: None,
        }
    }

    pub fn aliased(expr: Expr, alias: impl Into<String>) -> Self {
        SelectItem::Expr {
            expr,
            alias: Some(alias.into()),
        }
    }

    pub fn aggregate(func: AggregateFunc, arg: Option<Expr>) -> Self {
        SelectItem::Aggregate {
            func,
            arg,
            distinct: false,
            alias: None,
        }
    }

    pub fn count_star() -> Self {
        Self::aggregate(AggregateFunc::Count, None)
    }

    /// Column label the item produces in a result set.
    pub fn label(&self) -> String {
        match self {
            SelectItem::Star { owner: Some(owner) } => format!("{}.*", owner),
            SelectItem::Star { owner: None } => "*".to_string(),
            SelectItem::Expr { alias: Some(a), .. } | SelectItem::Aggregate { alias: Some(a), .. } => {
                a.clone()
            }
            SelectItem::Expr {
                expr: Expr::Column(c),
                ..
            } => c.name.clone(),
            SelectItem::Expr { expr, .. } => expr.to_string(),
            SelectItem::Aggregate {
                func,
                arg,
                distinct,
                ..
            } => {
                let distinct = if *distinct { "DISTINCT " } else { "" };
                match arg {
                    Some(arg) => format!("{}({}{})", func, distinct, arg),
                    None => format!("{}(*)", func),
                }
            }
        }
    }

    /// Attach an alias to an expression or aggregate item.
    pub fn with_alias(mut self, name: impl Into<String>) -> Self {
        match &mut self {
            SelectItem::Expr { alias, .. } | SelectItem::Aggregate { alias, .. } => {
                *alias = Some(name.into());
            }
            SelectItem::Star { .. } => {}
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByItem {
    pub expr: Expr,
    pub order: SortOrder,
}

impl OrderByItem {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            order: SortOrder::Asc,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            order: SortOrder::Desc,
        }
    }
}

/// Row locking clause of a SELECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockMode {
    ForUpdate,
    ForShare,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Select {
    #[serde(default)]
    pub distinct: bool,
    pub projections: Vec<SelectItem>,
    pub from: TableRef,
    #[serde(default)]
    pub joins: Vec<Join>,
    #[serde(default)]
    pub selection: Option<Expr>,
    #[serde(default)]
    pub group_by: Vec<Expr>,
    #[serde(default)]
    pub having: Option<Expr>,
    #[serde(default)]
    pub order_by: Vec<OrderByItem>,
    /// Literal or placeholder
    #[serde(default)]
    pub limit: Option<Expr>,
    #[serde(default)]
    pub offset: Option<Expr>,
    #[serde(default)]
    pub lock: Option<LockMode>,
}

impl Select {
    /// `SELECT * FROM table`
    pub fn from(table: TableRef) -> Self {
        Self {
            distinct: false,
            projections: vec![SelectItem::star()],
            from: table,
            joins: Vec::new(),
            selection: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            lock: None,
        }
    }

    pub fn projections(mut self, items: Vec<SelectItem>) -> Self {
        self.projections = items;
        self
    }

    pub fn join(mut self, kind: JoinKind, table: TableRef, on: Option<Expr>) -> Self {
        self.joins.push(Join { kind, table, on });
        self
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.selection = Some(match self.selection.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn group_by(mut self, exprs: Vec<Expr>) -> Self {
        self.group_by = exprs;
        self
    }

    pub fn order_by(mut self, items: Vec<OrderByItem>) -> Self {
        self.order_by = items;
        self
    }

    pub fn limit(mut self, limit: Expr) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: Expr) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn lock(mut self, mode: LockMode) -> Self {
        self.lock = Some(mode);
        self
    }

    /// Every table in FROM and JOIN position, in declaration order.
    pub fn table_refs(&self) -> impl Iterator<Item = &TableRef> {
        std::iter::once(&self.from).chain(self.joins.iter().map(|j| &j.table))
    }

    /// Top-level expressions of every clause.
    pub fn expressions(&self) -> Vec<&Expr> {
        let mut exprs = Vec::new();
        for item in &self.projections {
            match item {
                SelectItem::Expr { expr, .. } => exprs.push(expr),
                SelectItem::Aggregate { arg: Some(arg), .. } => exprs.push(arg),
                _ => {}
            }
        }
        exprs.extend(self.joins.iter().filter_map(|j| j.on.as_ref()));
        exprs.extend(self.selection.iter());
        exprs.extend(self.group_by.iter());
        exprs.extend(self.having.iter());
        exprs.extend(self.order_by.iter().map(|o| &o.expr));
        exprs.extend(self.limit.iter());
        exprs.extend(self.offset.iter());
        exprs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insert {
    pub table: TableRef,
    pub columns: Vec<String>,
    /// VALUES rows; each row has one expression per column
    pub rows: Vec<Vec<Expr>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub table: TableRef,
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub selection: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delete {
    pub table: TableRef,
    #[serde(default)]
    pub selection: Option<Expr>,
}

/// A parsed statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

impl Statement {
    /// The WHERE clause, if the statement has one.
    pub fn selection(&self) -> Option<&Expr> {
        match self {
            Statement::Select(s) => s.selection.as_ref(),
            Statement::Update(u) => u.selection.as_ref(),
            Statement::Delete(d) => d.selection.as_ref(),
            Statement::Insert(_) => None,
        }
    }

    /// Top-level expressions of every clause.
    pub fn expressions(&self) -> Vec<&Expr> {
        match self {
            Statement::Select(s) => s.expressions(),
            Statement::Insert(i) => i.rows.iter().flatten().collect(),
            Statement::Update(u) => u
                .assignments
                .iter()
                .map(|a| &a.value)
                .chain(u.selection.iter())
                .collect(),
            Statement::Delete(d) => d.selection.iter().collect(),
        }
    }
}

impl From<Select> for Statement {
    fn from(select: Select) -> Self {
        Statement::Select(select)
    }
}

impl From<Insert> for Statement {
    fn from(insert: Insert) -> Self {
        Statement::Insert(insert)
    }
}

impl From<Update> for Statement {
    fn from(update: Update) -> Self {
        Statement::Update(update)
    }
}

impl From<Delete> for Statement {
    fn from(delete: Delete) -> Self {
        Statement::Delete(delete)
    }
}
