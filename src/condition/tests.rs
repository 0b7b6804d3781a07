use pretty_assertions::assert_eq;

use super::*;
use crate::ast::{BinaryOp, Expr, Insert, JoinKind, Select, Statement, TableRef, Value};
use crate::context::StatementContext;
use crate::error::ShardError;
use crate::rule::RuleSet;

const RULES: &str = r#"
data_sources = ["ds_0", "ds_1"]

[runtime]
max_condition_branches = 4

[sharding.tables.t_order]
actual_data_nodes = "ds_${0..1}.t_order_${0..1}"
database_strategy = { column = "user_id", algorithm = "mod2" }
table_strategy = { column = "order_id", algorithm = "mod2" }
key_generate = { column = "order_id", generator = "uuid" }

[sharding.tables.t_user]
actual_data_nodes = "ds_${0..1}.t_user"
database_strategy = { column = "user_id", algorithm = "mod2" }

[sharding.tables.t_audit]
actual_data_nodes = "ds_${0..1}.t_audit"
database_strategy = { column = "audit_id", algorithm = "mod2" }

[sharding.algorithms.mod2]
type = "MOD"
props = { sharding_count = 2 }

[sharding.key_generators.uuid]
type = "UUID"
"#;

fn rules() -> RuleSet {
    RuleSet::from_toml(RULES).unwrap()
}

fn select(filter: Expr) -> Statement {
    Select::from(TableRef::new("t_order")).filter(filter).into()
}

fn conditions(stmt: Statement, params: Vec<Value>) -> ShardingConditions {
    let ctx = StatementContext::new(stmt, params).unwrap();
    extract(&ctx, &rules()).unwrap()
}

fn exact(values: &[i64]) -> ConditionValue {
    ConditionValue::Exact(values.iter().map(|v| Value::Int(*v)).collect())
}

#[test]
fn test_equality_narrows_both_operand_orders() {
    let stmt = select(
        Expr::col("user_id")
            .equals(Expr::lit(3))
            .and(Expr::lit(8).equals(Expr::col("order_id"))),
    );
    let c = conditions(stmt, vec![]);
    let order = c.get("t_order").unwrap();
    assert_eq!(order.branches.len(), 1);
    assert_eq!(order.branches[0].value("user_id"), Some(&exact(&[3])));
    assert_eq!(order.branches[0].value("order_id"), Some(&exact(&[8])));
    assert!(order.branches[0].undetermined.is_empty());
}

#[test]
fn test_placeholders_resolve_against_params() {
    let stmt = select(Expr::col("user_id").in_list(vec![Expr::param(1), Expr::param(2), Expr::lit(5)]));
    let c = conditions(stmt, vec![Value::Int(5), Value::Int(6)]);
    let branch = &c.get("t_order").unwrap().branches[0];
    assert_eq!(branch.value("user_id"), Some(&exact(&[5, 6])));
}

#[test]
fn test_or_yields_one_branch_per_conjunction() {
    let stmt = select(
        Expr::col("user_id")
            .equals(Expr::lit(1))
            .or(Expr::col("user_id").equals(Expr::lit(2))),
    );
    let c = conditions(stmt, vec![]);
    let order = c.get("t_order").unwrap();
    assert_eq!(order.branches.len(), 2);
    assert_eq!(order.branches[1].value("user_id"), Some(&exact(&[2])));
}

#[test]
fn test_contradiction_is_unmatched() {
    let stmt = select(
        Expr::col("user_id")
            .equals(Expr::lit(1))
            .and(Expr::col("user_id").equals(Expr::lit(2))),
    );
    let c = conditions(stmt, vec![]);
    assert!(c.get("t_order").unwrap().is_unmatched());
}

#[test]
fn test_null_comparison_is_unmatched() {
    let stmt = select(Expr::col("user_id").equals(Expr::lit(Value::Null)));
    assert!(conditions(stmt, vec![]).get("t_order").unwrap().is_unmatched());
}

#[test]
fn test_ranges_intersect() {
    let stmt = select(
        Expr::col("order_id")
            .gte(Expr::lit(10))
            .and(Expr::col("order_id").between(Expr::lit(0), Expr::lit(20))),
    );
    let c = conditions(stmt, vec![]);
    let branch = &c.get("t_order").unwrap().branches[0];
    let expected = ConditionValue::Range(ValueRange::closed(Value::Int(10), Value::Int(20)));
    assert_eq!(branch.value("order_id"), Some(&expected));
}

#[test]
fn test_in_list_intersected_with_range() {
    let stmt = select(
        Expr::col("order_id")
            .in_list(vec![Expr::lit(1), Expr::lit(5), Expr::lit(9)])
            .and(Expr::col("order_id").lt(Expr::lit(6))),
    );
    let c = conditions(stmt, vec![]);
    let branch = &c.get("t_order").unwrap().branches[0];
    assert_eq!(branch.value("order_id"), Some(&exact(&[1, 5])));
}

#[test]
fn test_function_and_column_comparisons_are_undetermined() {
    let stmt = select(
        Expr::function("ABS", vec![Expr::col("user_id")])
            .equals(Expr::lit(1))
            .and(Expr::col("order_id").equals(Expr::col("other_id"))),
    );
    let c = conditions(stmt, vec![]);
    let branch = &c.get("t_order").unwrap().branches[0];
    assert!(branch.values.is_empty());
    assert!(branch.undetermined.contains("user_id"));
    assert!(branch.undetermined.contains("order_id"));
}

#[test]
fn test_negations_never_narrow() {
    let stmt = select(
        Expr::Not(Box::new(Expr::col("user_id").equals(Expr::lit(1))))
            .and(Expr::col("order_id").not_equals(Expr::lit(2)))
            .and(Expr::IsNull {
                expr: Box::new(Expr::col("user_id")),
                negated: false,
            }),
    );
    let c = conditions(stmt, vec![]);
    let order = c.get("t_order").unwrap();
    assert_eq!(order.branches.len(), 1);
    assert!(!order.is_narrowed());
}

#[test]
fn test_unqualified_column_shared_by_two_tables() {
    let stmt: Statement = Select::from(TableRef::aliased("t_order", "o"))
        .join(
            JoinKind::Inner,
            TableRef::aliased("t_user", "u"),
            Some(Expr::qualified("o", "user_id").equals(Expr::qualified("u", "user_id"))),
        )
        .filter(Expr::col("user_id").equals(Expr::lit(1)))
        .filter(Expr::qualified("o", "order_id").equals(Expr::lit(2)))
        .into();
    let c = conditions(stmt, vec![]);
    let order = &c.get("t_order").unwrap().branches[0];
    assert!(order.undetermined.contains("user_id"));
    assert_eq!(order.value("order_id"), Some(&exact(&[2])));
    let user = &c.get("t_user").unwrap().branches[0];
    assert!(user.undetermined.contains("user_id"));
    assert_eq!(user.value("order_id"), None);
}

#[test]
fn test_qualified_column_of_other_table_is_ignored() {
    let stmt: Statement = Select::from(TableRef::new("t_order"))
        .join(JoinKind::Inner, TableRef::aliased("t_user", "u"), None)
        .filter(Expr::qualified("u", "user_id").equals(Expr::lit(7)))
        .into();
    let c = conditions(stmt, vec![]);
    assert!(!c.get("t_order").unwrap().is_narrowed());
    assert_eq!(
        c.get("t_user").unwrap().branches[0].value("user_id"),
        Some(&exact(&[7]))
    );
}

#[test]
fn test_branch_cap_degrades_to_full_route() {
    let mut filter = Expr::col("user_id").equals(Expr::lit(0));
    for i in 1..5 {
        filter = filter.or(Expr::col("user_id").equals(Expr::lit(i)));
    }
    let c = conditions(select(filter), vec![]);
    let order = c.get("t_order").unwrap();
    assert_eq!(order.branches.len(), 1);
    assert!(!order.is_narrowed());
    assert!(order.branches[0].undetermined.contains("user_id"));
}

#[test]
fn test_unsharded_tables_have_no_condition() {
    let stmt: Statement = Select::from(TableRef::new("t_dict"))
        .filter(Expr::col("user_id").equals(Expr::lit(1)))
        .into();
    assert!(conditions(stmt, vec![]).is_empty());
}

fn insert(columns: &[&str], rows: Vec<Vec<Expr>>) -> Statement {
    Insert {
        table: TableRef::new("t_order"),
        columns: columns.iter().map(|c| c.to_string()).collect(),
        rows,
    }
    .into()
}

#[test]
fn test_insert_branch_per_row() {
    let stmt = insert(
        &["user_id", "order_id"],
        vec![
            vec![Expr::lit(1), Expr::lit(10)],
            vec![Expr::param(1), Expr::lit(11)],
        ],
    );
    let c = conditions(stmt, vec![Value::Int(2)]);
    let order = c.get("t_order").unwrap();
    assert_eq!(order.branches.len(), 2);
    assert_eq!(order.branches[1].insert_row, Some(1));
    assert_eq!(order.branches[1].value("user_id"), Some(&exact(&[2])));
    assert!(c.generated_key().is_none());
}

#[test]
fn test_insert_generates_missing_key() {
    let stmt = insert(&["user_id"], vec![vec![Expr::lit(1)], vec![Expr::lit(2)]]);
    let c = conditions(stmt, vec![]);
    let key = c.generated_key().unwrap();
    assert_eq!(key.column, "order_id");
    assert_eq!(key.values.len(), 2);
    assert_ne!(key.values[0], key.values[1]);
    let branch = &c.get("t_order").unwrap().branches[0];
    assert_eq!(
        branch.value("order_id"),
        Some(&ConditionValue::Exact(vec![key.values[0].clone()]))
    );
}

#[test]
fn test_insert_without_sharding_value_is_ambiguous() {
    let stmt: Statement = Insert {
        table: TableRef::new("t_user"),
        columns: vec!["name".into()],
        rows: vec![vec![Expr::lit("a")]],
    }
    .into();
    let ctx = StatementContext::new(stmt, vec![]).unwrap();
    let err = extract(&ctx, &rules()).unwrap_err();
    assert!(matches!(err, ShardError::AmbiguousCondition { .. }));
}

#[test]
fn test_insert_with_computed_sharding_value_is_ambiguous() {
    let stmt = insert(
        &["user_id", "order_id"],
        vec![vec![Expr::binary(Expr::col("x"), BinaryOp::Add, Expr::lit(1)), Expr::lit(1)]],
    );
    let ctx = StatementContext::new(stmt, vec![]).unwrap();
    assert!(matches!(
        extract(&ctx, &rules()),
        Err(ShardError::AmbiguousCondition { .. })
    ));
}
