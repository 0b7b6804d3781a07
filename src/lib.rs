//! # qail-shard: sharding middleware core
//!
//! Routes a logical SQL statement to physical shards, rewrites it for every
//! target and merges the per-shard results back into one logical result.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use qail_shard::prelude::*;
//!
//! let runtime = ShardConfig::load(None)?.runtime()?;
//! let select = Select::from(TableRef::new("t_order"))
//!     .projections(vec![SelectItem::star()])
//!     .filter(Expr::col("user_id").equals(Expr::param(1)));
//! let ctx = StatementContext::new(select.into(), vec![Value::Int(42)])?;
//!
//! let plan = runtime.prepare(&ctx)?;
//! for unit in &plan.units {
//!     println!("{} => {}", unit.unit.data_source.actual, unit.sql);
//! }
//! // Run every unit, then:
//! // let rows = plan.merge(cursors)?.collect_rows()?;
//! ```
//!
//! ## Pipeline
//!
//! | Stage     | Module                 | Output               |
//! |-----------|------------------------|----------------------|
//! | Context   | [`context`]            | `StatementContext`   |
//! | Extract   | [`condition`]          | `ShardingConditions` |
//! | Route     | [`route`]              | `RouteContext`       |
//! | Rewrite   | [`rewrite`]            | `RewriteUnit`s       |
//! | Merge     | [`merge`]              | `MergedResult`       |

pub mod algorithm;
pub mod ast;
pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod merge;
pub mod rewrite;
pub mod route;
pub mod rule;
pub mod runtime;

pub mod prelude {
    pub use crate::algorithm::AlgorithmRegistry;
    pub use crate::ast::*;
    pub use crate::config::ShardConfig;
    pub use crate::context::{Hints, SqlKind, StatementContext};
    pub use crate::error::*;
    pub use crate::merge::{MemoryCursor, MergeContext, MergedResult, Row, RowCursor};
    pub use crate::rewrite::{Dialect, RewriteUnit};
    pub use crate::route::{RouteClass, RouteContext, RouteUnit};
    pub use crate::rule::{RuleConfig, RuleSet, RuleStore};
    pub use crate::runtime::{ExecutionPlan, ShardingRuntime};
}
