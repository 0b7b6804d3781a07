//! Pipeline facade: extract, route and rewrite against one rule snapshot,
//! then merge the cursors the executor returns.

use std::sync::Arc;

use tracing::debug;

use crate::condition;
use crate::context::StatementContext;
use crate::error::{ShardError, ShardResult};
use crate::merge::{self, MergeContext, MergedResult, RowCursor};
use crate::rewrite::{self, RewriteUnit};
use crate::route::{self, RouteContext};
use crate::rule::{RuleSet, RuleStore};

/// Everything the executor needs to run one statement.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub route: RouteContext,
    pub units: Vec<RewriteUnit>,
    pub merge: MergeContext,
    rules: Arc<RuleSet>,
}

impl ExecutionPlan {
    /// Rule snapshot the plan was built against.
    pub fn rules(&self) -> &Arc<RuleSet> {
        &self.rules
    }

    /// Merge one cursor per rewrite unit, given in unit order.
    pub fn merge(&self, mut cursors: Vec<Box<dyn RowCursor>>) -> ShardResult<MergedResult> {
        if cursors.len() != self.units.len() {
            cursors.iter_mut().for_each(|c| c.close());
            return Err(ShardError::Route(format!(
                "plan has {} units but {} cursors were supplied",
                self.units.len(),
                cursors.len()
            )));
        }
        merge::merge(&self.merge, cursors)
    }
}

/// Sharding pipeline bound to a swappable rule store.
#[derive(Debug)]
pub struct ShardingRuntime {
    store: RuleStore,
}

impl ShardingRuntime {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            store: RuleStore::new(rules),
        }
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    /// Plan a statement. The rule snapshot taken here is used for every stage.
    pub fn prepare(&self, ctx: &StatementContext) -> ShardResult<ExecutionPlan> {
        let rules = self.store.snapshot();
        let conditions = condition::extract(ctx, &rules)?;
        let route = route::route(ctx, &conditions, &rules)?;
        let rewritten = rewrite::rewrite(ctx, &route, &rules)?;
        debug!(
            kind = ctx.kind().as_str(),
            units = rewritten.units.len(),
            grouped = rewritten.merge.grouped,
            "prepared statement"
        );
        Ok(ExecutionPlan {
            route,
            units: rewritten.units,
            merge: rewritten.merge,
            rules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Select, SelectItem, Statement, TableRef, Value};
    use crate::merge::MemoryCursor;

    const RULES: &str = r#"
data_sources = ["ds_0", "ds_1"]

[sharding.tables.t_order]
actual_data_nodes = "ds_${0..1}.t_order"
database_strategy = { column = "user_id", algorithm = "db_mod" }

[sharding.algorithms.db_mod]
type = "MOD"
props = { sharding_count = 2 }
"#;

    fn select_all() -> StatementContext {
        let select = Select::from(TableRef::new("t_order")).projections(vec![SelectItem::column("id")]);
        StatementContext::new(Statement::Select(select), Vec::new()).unwrap()
    }

    #[test]
    fn test_plan_requires_one_cursor_per_unit() {
        let runtime = ShardingRuntime::new(RuleSet::from_toml(RULES).unwrap());
        let plan = runtime.prepare(&select_all()).unwrap();
        assert_eq!(plan.units.len(), 2);
        let cursor = MemoryCursor::with_labels("ds_0", &["id"], vec![vec![Value::Int(1)]]);
        let flag = cursor.closed_flag();
        assert!(plan.merge(vec![cursor.boxed()]).is_err());
        assert!(flag.load(std::sync::atomic::Ordering::Acquire));
    }

    #[test]
    fn test_plan_keeps_its_snapshot_across_swap() {
        let runtime = ShardingRuntime::new(RuleSet::from_toml(RULES).unwrap());
        let plan = runtime.prepare(&select_all()).unwrap();
        runtime
            .store()
            .swap(RuleSet::from_toml(r#"data_sources = ["ds_9"]"#).unwrap());
        assert_eq!(plan.rules().data_sources(), ["ds_0", "ds_1"]);
        assert_eq!(runtime.store().snapshot().data_sources(), ["ds_9"]);
    }
}
