//! Statement tree handed over by the SQL parser.
//!
//! The parser itself lives outside this crate; it produces a [`Statement`]
//! whose expressions are the closed [`Expr`] enum.

mod expr;
mod statement;
mod value;

pub use expr::{BinaryOp, ColumnRef, Expr};
pub use statement::{
    AggregateFunc, Assignment, Delete, Insert, Join, JoinKind, LockMode, OrderByItem, Select,
    SelectItem, SortOrder, Statement, TableRef, Update,
};
pub use value::Value;
