use pretty_assertions::assert_eq;

use super::*;
use crate::ast::{
    Assignment, Delete, Expr, Insert, JoinKind, LockMode, Select, TableRef, Update, Value,
};
use crate::condition::extract;
use crate::context::Hints;
use crate::error::ShardError;

const SHARDING: &str = r#"
data_sources = ["ds_0", "ds_1"]

[sharding]
binding_tables = [["t_order", "t_order_item"]]
broadcast_tables = ["t_config"]
default_data_source = "ds_0"

[sharding.tables.t_order]
actual_data_nodes = "ds_${0..1}.t_order_${0..1}"
database_strategy = { column = "user_id", algorithm = "mod2" }
table_strategy = { column = "order_id", algorithm = "mod2" }

[sharding.tables.t_order_item]
actual_data_nodes = "ds_${0..1}.t_order_item_${0..1}"
database_strategy = { column = "user_id", algorithm = "mod2" }
table_strategy = { column = "order_id", algorithm = "mod2" }

[sharding.tables.t_user]
actual_data_nodes = "ds_${0..1}.t_user"
database_strategy = { column = "user_id", algorithm = "mod2" }

[sharding.tables.t_payment]
actual_data_nodes = "ds_${0..1}.t_payment"
database_strategy = { column = "user_id", algorithm = "mod2" }
strict_routing = true

[sharding.algorithms.mod2]
type = "MOD"
props = { sharding_count = 2 }
"#;

const SPLITTING: &str = r#"
[readwrite_splitting.groups.ds_0]
write = "ds_0_primary"
reads = ["ds_0_replica_0", "ds_0_replica_1"]

[readwrite_splitting.groups.ds_1]
write = "ds_1_primary"
reads = ["ds_1_replica_0"]

[shadow.data_sources.shadow_0]
production = "ds_0_primary"
shadow = "ds_0_shadow"

[shadow.data_sources.shadow_1]
production = "ds_1_primary"
shadow = "ds_1_shadow"

[shadow.tables.t_order]
data_sources = ["shadow_0", "shadow_1"]
algorithms = ["test_user"]

[shadow.algorithms.test_user]
type = "VALUE_MATCH"
props = { operation = "insert", column = "user_id", value = "0" }

[shadow.algorithms.hint]
type = "SQL_HINT"
"#;

fn sharding_rules() -> RuleSet {
    RuleSet::from_toml(SHARDING).unwrap()
}

fn full_rules() -> RuleSet {
    RuleSet::from_toml(&format!("{}{}", SHARDING, SPLITTING)).unwrap()
}

fn route_with(rules: &RuleSet, ctx: &StatementContext) -> ShardResult<RouteContext> {
    let conditions = extract(ctx, rules)?;
    route(ctx, &conditions, rules)
}

fn route_stmt(rules: &RuleSet, stmt: Statement, params: Vec<Value>) -> ShardResult<RouteContext> {
    route_with(rules, &StatementContext::new(stmt, params)?)
}

fn orders(filter: Option<Expr>) -> Statement {
    let select = Select::from(TableRef::new("t_order"));
    match filter {
        Some(f) => select.filter(f).into(),
        None => select.into(),
    }
}

fn targets(route: &RouteContext) -> Vec<String> {
    route
        .units
        .iter()
        .map(|u| {
            let tables: Vec<&str> = u.tables.iter().map(|t| t.actual.as_str()).collect();
            format!("{}:{}", u.data_source.actual, tables.join(","))
        })
        .collect()
}

#[test]
fn test_exact_values_route_to_one_node() {
    let filter = Expr::col("user_id")
        .equals(Expr::param(1))
        .and(Expr::col("order_id").equals(Expr::lit(3)));
    let route = route_stmt(&sharding_rules(), orders(Some(filter)), vec![Value::Int(1)]).unwrap();
    assert_eq!(targets(&route), vec!["ds_1:t_order_1"]);
    assert_eq!(route.class, RouteClass::Single);
    assert_eq!(route.units[0].tables[0].logical, "t_order");
}

#[test]
fn test_no_condition_routes_everywhere_in_node_order() {
    let route = route_stmt(&sharding_rules(), orders(None), vec![]).unwrap();
    assert_eq!(
        targets(&route),
        vec!["ds_0:t_order_0", "ds_0:t_order_1", "ds_1:t_order_0", "ds_1:t_order_1"]
    );
    assert_eq!(route.class, RouteClass::Broadcast);
    assert_eq!(route.data_sources(), vec!["ds_0", "ds_1"]);
}

#[test]
fn test_in_list_is_multi_shard() {
    let filter = Expr::col("order_id").in_list(vec![Expr::lit(2), Expr::lit(4)]);
    let route = route_stmt(&sharding_rules(), orders(Some(filter)), vec![]).unwrap();
    assert_eq!(targets(&route), vec!["ds_0:t_order_0", "ds_1:t_order_0"]);
    assert_eq!(route.class, RouteClass::MultiShard);
}

#[test]
fn test_or_branches_are_unioned() {
    let filter = Expr::col("user_id")
        .equals(Expr::lit(0))
        .and(Expr::col("order_id").equals(Expr::lit(0)))
        .or(Expr::col("user_id").equals(Expr::lit(1)).and(Expr::col("order_id").equals(Expr::lit(1))));
    let route = route_stmt(&sharding_rules(), orders(Some(filter)), vec![]).unwrap();
    assert_eq!(targets(&route), vec!["ds_0:t_order_0", "ds_1:t_order_1"]);
}

#[test]
fn test_unmatched_read_is_empty() {
    let filter = Expr::col("user_id")
        .equals(Expr::lit(1))
        .and(Expr::col("user_id").equals(Expr::lit(2)));
    let route = route_stmt(&sharding_rules(), orders(Some(filter)), vec![]).unwrap();
    assert!(route.is_empty());
    assert_eq!(route.class, RouteClass::Unsupported);
}

#[test]
fn test_unmatched_dml_fails() {
    let stmt: Statement = Delete {
        table: TableRef::new("t_order"),
        selection: Some(Expr::col("user_id").in_list(vec![Expr::lit(Value::Null)])),
    }
    .into();
    let err = route_stmt(&sharding_rules(), stmt, vec![]).unwrap_err();
    assert!(matches!(err, ShardError::NoMatchingShard(t) if t == "t_order"));
}

#[test]
fn test_binding_tables_route_together() {
    let stmt: Statement = Select::from(TableRef::aliased("t_order", "o"))
        .join(
            JoinKind::Inner,
            TableRef::aliased("t_order_item", "i"),
            Some(Expr::qualified("o", "order_id").equals(Expr::qualified("i", "order_id"))),
        )
        .filter(Expr::qualified("o", "order_id").equals(Expr::lit(1)))
        .into();
    let route = route_stmt(&sharding_rules(), stmt, vec![]).unwrap();
    assert_eq!(
        targets(&route),
        vec!["ds_0:t_order_1,t_order_item_1", "ds_1:t_order_1,t_order_item_1"]
    );
}

#[test]
fn test_unbound_tables_on_many_nodes_are_rejected() {
    let stmt: Statement = Select::from(TableRef::new("t_order"))
        .join(JoinKind::Inner, TableRef::new("t_user"), None)
        .into();
    let err = route_stmt(&sharding_rules(), stmt, vec![]).unwrap_err();
    match err {
        ShardError::UnsupportedRoute { left, right, .. } => {
            assert_eq!((left.as_str(), right.as_str()), ("t_order", "t_user"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unbound_tables_on_one_node_are_allowed() {
    let stmt: Statement = Select::from(TableRef::aliased("t_order", "o"))
        .join(JoinKind::Inner, TableRef::aliased("t_user", "u"), None)
        .filter(Expr::qualified("o", "user_id").equals(Expr::lit(1)))
        .filter(Expr::qualified("o", "order_id").equals(Expr::lit(1)))
        .filter(Expr::qualified("u", "user_id").equals(Expr::lit(1)))
        .into();
    let route = route_stmt(&sharding_rules(), stmt, vec![]).unwrap();
    assert_eq!(targets(&route), vec!["ds_1:t_order_1,t_user"]);
}

#[test]
fn test_unmatched_unbound_table_empties_the_route() {
    let stmt: Statement = Select::from(TableRef::aliased("t_order", "o"))
        .join(JoinKind::Inner, TableRef::aliased("t_user", "u"), None)
        .filter(Expr::qualified("o", "user_id").equals(Expr::lit(1)))
        .filter(Expr::qualified("o", "order_id").equals(Expr::lit(1)))
        .filter(Expr::qualified("u", "user_id").equals(Expr::lit(1)))
        .filter(Expr::qualified("u", "user_id").equals(Expr::lit(2)))
        .into();
    let route = route_stmt(&sharding_rules(), stmt, vec![]).unwrap();
    assert!(route.is_empty());
    assert_eq!(route.class, RouteClass::Unsupported);
}

#[test]
fn test_broadcast_tables() {
    let rules = sharding_rules();
    let read: Statement = Select::from(TableRef::new("t_config")).into();
    let route = route_stmt(&rules, read, vec![]).unwrap();
    assert_eq!(targets(&route), vec!["ds_0:t_config"]);
    assert_eq!(route.class, RouteClass::Single);

    let write: Statement = Delete {
        table: TableRef::new("t_config"),
        selection: None,
    }
    .into();
    let route = route_stmt(&rules, write, vec![]).unwrap();
    assert_eq!(targets(&route), vec!["ds_0:t_config", "ds_1:t_config"]);
    assert_eq!(route.class, RouteClass::Broadcast);
}

#[test]
fn test_single_table_uses_default_data_source() {
    let stmt: Statement = Select::from(TableRef::new("t_dict")).into();
    let route = route_stmt(&sharding_rules(), stmt, vec![]).unwrap();
    assert_eq!(targets(&route), vec!["ds_0:t_dict"]);
}

#[test]
fn test_insert_rows_are_split() {
    let stmt: Statement = Insert {
        table: TableRef::new("t_order"),
        columns: vec!["user_id".into(), "order_id".into()],
        rows: vec![
            vec![Expr::lit(1), Expr::lit(1)],
            vec![Expr::lit(0), Expr::lit(0)],
            vec![Expr::lit(3), Expr::lit(5)],
        ],
    }
    .into();
    let route = route_stmt(&sharding_rules(), stmt, vec![]).unwrap();
    assert_eq!(targets(&route), vec!["ds_0:t_order_0", "ds_1:t_order_1"]);
    assert_eq!(route.units[0].row_indexes, vec![1]);
    assert_eq!(route.units[1].row_indexes, vec![0, 2]);
}

#[test]
fn test_strict_routing_requires_a_value() {
    let stmt: Statement = Select::from(TableRef::new("t_payment")).into();
    let err = route_stmt(&sharding_rules(), stmt, vec![]).unwrap_err();
    assert!(matches!(err, ShardError::AmbiguousCondition { .. }));

    let stmt: Statement = Select::from(TableRef::new("t_payment"))
        .filter(Expr::col("user_id").equals(Expr::lit(4)))
        .into();
    assert!(route_stmt(&sharding_rules(), stmt, vec![]).is_ok());
}

#[test]
fn test_sharding_column_update_is_rejected() {
    let stmt: Statement = Update {
        table: TableRef::new("t_order"),
        assignments: vec![Assignment {
            column: "user_id".into(),
            value: Expr::lit(9),
        }],
        selection: None,
    }
    .into();
    assert!(matches!(
        route_stmt(&sharding_rules(), stmt, vec![]),
        Err(ShardError::Route(_))
    ));
}

#[test]
fn test_routing_is_idempotent() {
    let rules = sharding_rules();
    let filter = Expr::col("order_id").between(Expr::lit(1), Expr::lit(2));
    let ctx = StatementContext::new(orders(Some(filter)), vec![]).unwrap();
    assert_eq!(route_with(&rules, &ctx).unwrap(), route_with(&rules, &ctx).unwrap());
}

#[test]
fn test_reads_go_to_replicas_round_robin() {
    let rules = full_rules();
    let ctx = StatementContext::new(orders(None), vec![]).unwrap();
    let first = route_with(&rules, &ctx).unwrap();
    assert_eq!(first.data_sources(), vec!["ds_0_replica_0", "ds_1_replica_0"]);
    assert_eq!(first.units[0].data_source.logical, "ds_0");
    // One replica per group per statement.
    assert_eq!(first.units[0].data_source, first.units[1].data_source);

    let second = route_with(&rules, &ctx).unwrap();
    assert_eq!(second.data_sources(), vec!["ds_0_replica_1", "ds_1_replica_0"]);
}

#[test]
fn test_locking_reads_and_hints_use_the_primary() {
    let rules = full_rules();
    let locking: Statement = Select::from(TableRef::new("t_dict"))
        .lock(LockMode::ForUpdate)
        .into();
    let route = route_stmt(&rules, locking, vec![]).unwrap();
    assert_eq!(route.data_sources(), vec!["ds_0_primary"]);

    let ctx = StatementContext::new(Select::from(TableRef::new("t_dict")).into(), vec![])
        .unwrap()
        .with_hints(Hints {
            write_route_only: true,
            ..Hints::default()
        });
    assert_eq!(route_with(&rules, &ctx).unwrap().data_sources(), vec!["ds_0_primary"]);
}

#[test]
fn test_writes_go_to_the_primary() {
    let stmt: Statement = Delete {
        table: TableRef::new("t_order"),
        selection: Some(Expr::col("user_id").equals(Expr::lit(1))),
    }
    .into();
    let route = route_stmt(&full_rules(), stmt, vec![]).unwrap();
    assert_eq!(route.data_sources(), vec!["ds_1_primary"]);
}

#[test]
fn test_shadow_value_redirects_and_skips_replicas() {
    let stmt: Statement = Insert {
        table: TableRef::new("t_order"),
        columns: vec!["user_id".into(), "order_id".into()],
        rows: vec![vec![Expr::lit(0), Expr::lit(2)]],
    }
    .into();
    let route = route_stmt(&full_rules(), stmt, vec![]).unwrap();
    assert_eq!(route.data_sources(), vec!["ds_0_shadow"]);
    assert_eq!(route.units[0].data_source.logical, "ds_0");
}

#[test]
fn test_shadow_value_mismatch_keeps_production() {
    let stmt: Statement = Insert {
        table: TableRef::new("t_order"),
        columns: vec!["user_id".into(), "order_id".into()],
        rows: vec![vec![Expr::lit(2), Expr::lit(2)]],
    }
    .into();
    let route = route_stmt(&full_rules(), stmt, vec![]).unwrap();
    assert_eq!(route.data_sources(), vec!["ds_0_primary"]);
}

#[test]
fn test_default_shadow_algorithm_uses_hint() {
    let splitting = SPLITTING.replace(
        "[shadow.data_sources.shadow_0]",
        "[shadow]\ndefault_algorithm = \"hint\"\n\n[shadow.data_sources.shadow_0]",
    );
    let config = format!("{}{}", SHARDING, splitting);
    let rules = RuleSet::from_toml(&config).unwrap();

    let ctx = StatementContext::new(Select::from(TableRef::new("t_dict")).into(), vec![])
        .unwrap()
        .with_hints(Hints {
            shadow: true,
            ..Hints::default()
        });
    assert_eq!(route_with(&rules, &ctx).unwrap().data_sources(), vec!["ds_0_shadow"]);
}
