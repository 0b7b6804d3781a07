//! End-to-end checks: prepare a statement, play the executor with in-memory
//! shards, merge the cursors.

use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use qail_shard::prelude::*;

const RULES: &str = r#"
data_sources = ["ds_0"]

[sharding.tables.t_order]
actual_data_nodes = "ds_0.t_order_${0..2}"
table_strategy = { column = "id", algorithm = "range" }

[sharding.algorithms.range]
type = "BOUNDARY_RANGE"
props = { sharding_ranges = [100, 200] }
"#;

#[derive(Debug, Clone)]
struct Order {
    id: i64,
    status: &'static str,
    amount: i64,
}

impl Order {
    fn row(&self) -> Row {
        vec![Value::Int(self.id), Value::from(self.status), Value::Int(self.amount)]
    }
}

fn runtime() -> ShardingRuntime {
    ShardingRuntime::new(RuleSet::from_toml(RULES).unwrap())
}

fn all_orders() -> Vec<Order> {
    (0..300)
        .step_by(7)
        .map(|id| Order {
            id,
            status: ["new", "paid", "void"][(id % 3) as usize],
            amount: (id * 37) % 101,
        })
        .collect()
}

/// Rows stored in one physical table.
fn shard(table: &str) -> Vec<Order> {
    let index: i64 = table.trim_start_matches("t_order_").parse().unwrap();
    all_orders()
        .into_iter()
        .filter(|o| o.id / 100 == index)
        .collect()
}

fn actual_table(unit: &RewriteUnit) -> &str {
    unit.unit.actual_table("t_order").unwrap()
}

fn prepare(select: Select, params: Vec<Value>) -> ExecutionPlan {
    let ctx = StatementContext::new(select.into(), params).unwrap();
    runtime().prepare(&ctx).unwrap()
}

fn orders() -> Select {
    Select::from(TableRef::new("t_order"))
}

fn cursor(unit: &RewriteUnit, labels: &[&str], rows: Vec<Row>) -> Box<dyn RowCursor> {
    MemoryCursor::with_labels(unit.unit.data_source.actual.clone(), labels, rows).boxed()
}

#[test]
fn test_boundary_range_routes_to_one_table() {
    let plan = prepare(orders().filter(Expr::col("id").equals(Expr::lit(150))), vec![]);
    assert_eq!(plan.route.class, RouteClass::Single);
    assert_eq!(plan.units.len(), 1);
    assert_eq!(actual_table(&plan.units[0]), "t_order_1");
    assert_eq!(plan.units[0].sql, "SELECT * FROM t_order_1 WHERE id = 150");
}

#[test]
fn test_single_shard_result_passes_through() {
    let plan = prepare(orders().filter(Expr::col("id").equals(Expr::param(1))), vec![Value::Int(42)]);
    assert_eq!(plan.units.len(), 1);
    let rows: Vec<Row> = shard(actual_table(&plan.units[0])).iter().map(Order::row).collect();
    let merged = plan
        .merge(vec![cursor(&plan.units[0], &["id", "status", "amount"], rows.clone())])
        .unwrap();
    assert_eq!(merged.columns(), ["id", "status", "amount"]);
    assert_eq!(merged.collect_rows().unwrap(), rows);
}

#[test]
fn test_star_keeps_multibyte_labels_across_shards() {
    let plan = prepare(orders(), vec![]);
    assert_eq!(plan.units.len(), 3);
    let labels = ["id", "a订单编号金额"];
    let cursors = plan
        .units
        .iter()
        .map(|u| {
            let rows = shard(actual_table(u))
                .iter()
                .map(|o| vec![Value::Int(o.id), Value::Int(o.amount)])
                .collect();
            cursor(u, &labels, rows)
        })
        .collect();
    let merged = plan.merge(cursors).unwrap();
    assert_eq!(merged.columns(), labels);
    assert_eq!(merged.collect_rows().unwrap().len(), all_orders().len());
}

#[test]
fn test_count_star_is_summed_across_shards() {
    let plan = prepare(orders().projections(vec![SelectItem::count_star()]), vec![]);
    assert_eq!(plan.units.len(), 3);
    assert_eq!(plan.units[2].sql, "SELECT COUNT(*) FROM t_order_2");

    let cursors = plan
        .units
        .iter()
        .map(|u| {
            let count = shard(actual_table(u)).len() as i64;
            cursor(u, &["count"], vec![vec![Value::Int(count)]])
        })
        .collect();
    let merged = plan.merge(cursors).unwrap();
    assert_eq!(merged.columns(), ["COUNT(*)"]);
    assert_eq!(
        merged.collect_rows().unwrap(),
        vec![vec![Value::Int(all_orders().len() as i64)]]
    );
}

#[test]
fn test_descending_page_is_trimmed_after_merge() {
    let plan = prepare(
        orders()
            .order_by(vec![OrderByItem::desc(Expr::col("id"))])
            .limit(Expr::lit(5))
            .offset(Expr::lit(10)),
        vec![],
    );
    assert_eq!(plan.units.len(), 3);
    for unit in &plan.units {
        assert_eq!(
            unit.sql,
            format!("SELECT * FROM {} ORDER BY id DESC LIMIT 15 OFFSET 0", actual_table(unit))
        );
    }

    let cursors = plan
        .units
        .iter()
        .map(|u| {
            let mut rows = shard(actual_table(u));
            rows.sort_by(|a, b| b.id.cmp(&a.id));
            rows.truncate(15);
            cursor(u, &["id", "status", "amount"], rows.iter().map(Order::row).collect())
        })
        .collect();
    let ids: Vec<Value> = plan
        .merge(cursors)
        .unwrap()
        .collect_rows()
        .unwrap()
        .into_iter()
        .map(|r| r[0].clone())
        .collect();

    let mut expected = all_orders();
    expected.sort_by(|a, b| b.id.cmp(&a.id));
    let expected: Vec<Value> = expected[10..15].iter().map(|o| Value::Int(o.id)).collect();
    assert_eq!(ids, expected);
}

#[test]
fn test_sorted_merge_equals_sorting_the_concatenation() {
    let plan = prepare(
        orders()
            .projections(vec![SelectItem::column("id"), SelectItem::column("amount")])
            .order_by(vec![OrderByItem::asc(Expr::col("amount"))]),
        vec![],
    );
    let cursors = plan
        .units
        .iter()
        .map(|u| {
            let mut rows = shard(actual_table(u));
            rows.sort_by_key(|o| o.amount);
            cursor(
                u,
                &["id", "amount"],
                rows.iter()
                    .map(|o| vec![Value::Int(o.id), Value::Int(o.amount)])
                    .collect(),
            )
        })
        .collect();
    let amounts: Vec<Value> = plan
        .merge(cursors)
        .unwrap()
        .map(|row| row.unwrap()[1].clone())
        .collect();

    let mut expected: Vec<i64> = all_orders().iter().map(|o| o.amount).collect();
    expected.sort();
    assert_eq!(amounts, expected.into_iter().map(Value::Int).collect::<Vec<_>>());
}

#[test]
fn test_grouped_aggregates_equal_direct_computation() {
    let amount = || Some(Expr::col("amount"));
    let plan = prepare(
        orders()
            .projections(vec![
                SelectItem::column("status"),
                SelectItem::count_star(),
                SelectItem::aggregate(AggregateFunc::Sum, amount()),
                SelectItem::aggregate(AggregateFunc::Min, amount()),
                SelectItem::aggregate(AggregateFunc::Max, amount()),
                SelectItem::aggregate(AggregateFunc::Avg, amount()),
            ])
            .group_by(vec![Expr::col("status")]),
        vec![],
    );
    assert_eq!(
        plan.units[0].sql,
        "SELECT status, COUNT(*), SUM(amount), MIN(amount), MAX(amount), \
         SUM(amount) AS AVG_DERIVED_SUM_0, COUNT(amount) AS AVG_DERIVED_COUNT_0 \
         FROM t_order_0 GROUP BY status"
    );

    let labels = [
        "status",
        "count",
        "sum",
        "min",
        "max",
        "AVG_DERIVED_SUM_0",
        "AVG_DERIVED_COUNT_0",
    ];
    let cursors = plan
        .units
        .iter()
        .map(|u| {
            let rows = aggregate(&shard(actual_table(u)))
                .into_iter()
                .map(|(status, (count, sum, min, max))| {
                    vec![
                        Value::from(status),
                        Value::Int(count),
                        Value::Int(sum),
                        Value::Int(min),
                        Value::Int(max),
                        Value::Int(sum),
                        Value::Int(count),
                    ]
                })
                .collect();
            cursor(u, &labels, rows)
        })
        .collect();
    let merged = plan.merge(cursors).unwrap();
    assert_eq!(
        merged.columns(),
        ["status", "COUNT(*)", "SUM(amount)", "MIN(amount)", "MAX(amount)", "AVG(amount)"]
    );

    let expected: Vec<Row> = aggregate(&all_orders())
        .into_iter()
        .map(|(status, (count, sum, min, max))| {
            vec![
                Value::from(status),
                Value::Int(count),
                Value::Int(sum),
                Value::Int(min),
                Value::Int(max),
                Value::Float(sum as f64 / count as f64),
            ]
        })
        .collect();
    assert_eq!(merged.collect_rows().unwrap(), expected);
}

/// Per-status (count, sum, min, max), as a database would compute it.
fn aggregate(orders: &[Order]) -> BTreeMap<&'static str, (i64, i64, i64, i64)> {
    let mut groups = BTreeMap::new();
    for o in orders {
        let entry = groups
            .entry(o.status)
            .or_insert((0, 0, o.amount, o.amount));
        entry.0 += 1;
        entry.1 += o.amount;
        entry.2 = entry.2.min(o.amount);
        entry.3 = entry.3.max(o.amount);
    }
    groups
}

#[test]
fn test_pagination_equals_slice_of_sorted_rows() {
    let mut sorted: Vec<i64> = all_orders().iter().map(|o| o.id).collect();
    sorted.sort();
    let total = sorted.len() as u64;

    for offset in [0, 1, 7, 20, total - 1, total, total + 5] {
        for limit in 0..6u64 {
            let plan = prepare(
                orders()
                    .projections(vec![SelectItem::column("id")])
                    .order_by(vec![OrderByItem::asc(Expr::col("id"))])
                    .limit(Expr::lit(limit as i64))
                    .offset(Expr::lit(offset as i64)),
                vec![],
            );
            let cursors = plan
                .units
                .iter()
                .map(|u| {
                    let mut ids: Vec<i64> = shard(actual_table(u)).iter().map(|o| o.id).collect();
                    ids.sort();
                    ids.truncate((offset + limit) as usize);
                    cursor(u, &["id"], ids.into_iter().map(|id| vec![Value::Int(id)]).collect())
                })
                .collect();
            let got: Vec<Row> = plan.merge(cursors).unwrap().collect_rows().unwrap();

            let start = (offset as usize).min(sorted.len());
            let end = ((offset + limit) as usize).min(sorted.len());
            let expected: Vec<Row> = sorted[start..end].iter().map(|id| vec![Value::Int(*id)]).collect();
            assert_eq!(got, expected, "offset {} limit {}", offset, limit);
        }
    }
}

#[test]
fn test_prepare_is_idempotent() {
    let runtime = runtime();
    let ctx = StatementContext::new(
        orders()
            .filter(Expr::col("id").between(Expr::lit(90), Expr::lit(120)))
            .into(),
        vec![],
    )
    .unwrap();
    let first = runtime.prepare(&ctx).unwrap();
    let second = runtime.prepare(&ctx).unwrap();
    assert_eq!(first.route, second.route);
    assert_eq!(first.units, second.units);
    assert_eq!(
        first.units.iter().map(actual_table).collect::<Vec<_>>(),
        vec!["t_order_0", "t_order_1"]
    );
}
