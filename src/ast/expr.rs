use serde::{Deserialize, Serialize};

use super::statement::Select;
use super::value::Value;

/// Binary operators for predicates and arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Like,
    Add,
    Sub,
    Mul,
    Div,
    /// Modulo (%)
    Rem,
}

impl BinaryOp {
    pub fn sql_symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Like => "LIKE",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }

    /// Comparison operators that can narrow a sharding column.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte
        )
    }

    /// The operator with its operands swapped (`5 < id` becomes `id > 5`).
    pub fn flip(&self) -> BinaryOp {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Lte => BinaryOp::Gte,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Gte => BinaryOp::Lte,
            other => *other,
        }
    }

    /// Binding strength used when rendering nested expressions.
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Lte
            | BinaryOp::Gt
            | BinaryOp::Gte
            | BinaryOp::Like => 3,
            BinaryOp::Add | BinaryOp::Sub => 4,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 5,
        }
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql_symbol())
    }
}

/// Column reference, optionally qualified by a table name or alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    pub owner: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            owner: None,
            name: name.into(),
        }
    }

    pub fn qualified(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.owner {
            Some(owner) => write!(f, "{}.{}", owner, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Expression tree produced by the parser.
///
/// Closed: every walker matches it exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Value),
    /// Positional placeholder, 1-based (`$1`, or the first `?`)
    Param(usize),
    Column(ColumnRef),
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    /// Scalar function call (UPPER, COALESCE, NOW, ...)
    Function { name: String, args: Vec<Expr> },
    /// Nested SELECT
    Subquery(Box<Select>),
}

impl Expr {
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column(ColumnRef::new(name))
    }

    pub fn qualified(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Expr::Column(ColumnRef::qualified(owner, name))
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn param(index: usize) -> Self {
        Expr::Param(index)
    }

    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn equals(self, right: Expr) -> Self {
        Self::binary(self, BinaryOp::Eq, right)
    }

    pub fn not_equals(self, right: Expr) -> Self {
        Self::binary(self, BinaryOp::Ne, right)
    }

    pub fn lt(self, right: Expr) -> Self {
        Self::binary(self, BinaryOp::Lt, right)
    }

    pub fn lte(self, right: Expr) -> Self {
        Self::binary(self, BinaryOp::Lte, right)
    }

    pub fn gt(self, right: Expr) -> Self {
        Self::binary(self, BinaryOp::Gt, right)
    }

    pub fn gte(self, right: Expr) -> Self {
        Self::binary(self, BinaryOp::Gte, right)
    }

    pub fn and(self, right: Expr) -> Self {
        Self::binary(self, BinaryOp::And, right)
    }

    pub fn or(self, right: Expr) -> Self {
        Self::binary(self, BinaryOp::Or, right)
    }

    pub fn in_list(self, list: Vec<Expr>) -> Self {
        Expr::InList {
            expr: Box::new(self),
            list,
            negated: false,
        }
    }

    pub fn between(self, low: Expr, high: Expr) -> Self {
        Expr::Between {
            expr: Box::new(self),
            low: Box::new(low),
            high: Box::new(high),
            negated: false,
        }
    }

    pub fn function(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    /// Whether the expression is a literal or placeholder.
    pub fn is_constant(&self) -> bool {
        matches!(self, Expr::Literal(_) | Expr::Param(_))
    }

    /// Calls `f` for every subquery directly in the tree. Subqueries nested
    /// inside those are left to the caller.
    pub fn for_each_subquery<'a>(&'a self, f: &mut impl FnMut(&'a Select)) {
        match self {
            Expr::Subquery(select) => f(select),
            Expr::Literal(_) | Expr::Param(_) | Expr::Column(_) => {}
            Expr::Binary { left, right, .. } => {
                left.for_each_subquery(f);
                right.for_each_subquery(f);
            }
            Expr::Not(inner) => inner.for_each_subquery(f),
            Expr::InList { expr, list, .. } => {
                expr.for_each_subquery(f);
                for item in list {
                    item.for_each_subquery(f);
                }
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.for_each_subquery(f);
                low.for_each_subquery(f);
                high.for_each_subquery(f);
            }
            Expr::IsNull { expr, .. } => expr.for_each_subquery(f),
            Expr::Function { args, .. } => {
                for arg in args {
                    arg.for_each_subquery(f);
                }
            }
        }
    }

    /// Calls `f` for every column reference in the tree, outside subqueries.
    pub fn for_each_column<'a>(&'a self, f: &mut impl FnMut(&'a ColumnRef)) {
        match self {
            Expr::Column(c) => f(c),
            Expr::Literal(_) | Expr::Param(_) | Expr::Subquery(_) => {}
            Expr::Binary { left, right, .. } => {
                left.for_each_column(f);
                right.for_each_column(f);
            }
            Expr::Not(inner) => inner.for_each_column(f),
            Expr::InList { expr, list, .. } => {
                expr.for_each_column(f);
                for item in list {
                    item.for_each_column(f);
                }
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.for_each_column(f);
                low.for_each_column(f);
                high.for_each_column(f);
            }
            Expr::IsNull { expr, .. } => expr.for_each_column(f),
            Expr::Function { args, .. } => {
                for arg in args {
                    arg.for_each_column(f);
                }
            }
        }
    }
}

impl std::fmt::Display for Expr {
    /// Compact SQL-like text with literals inline. Used for default
    /// projection labels and log output, never for executable SQL.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Param(n) => write!(f, "${}", n),
            Expr::Column(c) => write!(f, "{}", c),
            Expr::Binary { left, op, right } => {
                write_operand(f, left, *op)?;
                write!(f, " {} ", op)?;
                write_operand(f, right, *op)
            }
            Expr::Not(inner) => write!(f, "NOT ({})", inner),
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let items: Vec<String> = list.iter().map(|e| e.to_string()).collect();
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{} {}IN ({})", expr, not, items.join(", "))
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{} {}BETWEEN {} AND {}", expr, not, low, high)
            }
            Expr::IsNull { expr, negated } => {
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{} IS {}NULL", expr, not)
            }
            Expr::Function { name, args } => {
                let items: Vec<String> = args.iter().map(|e| e.to_string()).collect();
                write!(f, "{}({})", name, items.join(", "))
            }
            Expr::Subquery(_) => write!(f, "(subquery)"),
        }
    }
}

fn write_operand(f: &mut std::fmt::Formatter<'_>, operand: &Expr, parent: BinaryOp) -> std::fmt::Result {
    match operand {
        Expr::Binary { op, .. } if op.precedence() < parent.precedence() => {
            write!(f, "({})", operand)
        }
        _ => write!(f, "{}", operand),
    }
}
