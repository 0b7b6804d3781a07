use std::sync::Arc;
use std::sync::atomic::Ordering;

use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::algorithm::{EncryptAlgorithm, XorStreamEncryptor};
use crate::ast::{AggregateFunc, SortOrder, Value};

fn int_rows(values: &[&[i64]]) -> Vec<Row> {
    values
        .iter()
        .map(|r| r.iter().map(|v| Value::Int(*v)).collect())
        .collect()
}

fn plain_items(labels: &[&str]) -> (Vec<MergeItem>, Vec<OutputColumn>) {
    let items = labels
        .iter()
        .map(|l| MergeItem::new(*l, ItemKind::Plain))
        .collect();
    let outputs = (0..labels.len()).map(OutputColumn::Item).collect();
    (items, outputs)
}

#[test]
fn test_single_unit_passes_through() {
    let rows = int_rows(&[&[1, 10], &[2, 20]]);
    let (items, outputs) = plain_items(&["id", "amount"]);
    let ctx = MergeContext {
        items,
        outputs,
        ..MergeContext::passthrough()
    };
    let cursor = MemoryCursor::with_labels("ds_0", &["id", "amount"], rows.clone()).boxed();
    let result = merge(&ctx, vec![cursor]).unwrap();
    assert_eq!(result.columns(), ["id", "amount"]);
    assert_eq!(result.collect_rows().unwrap(), rows);
}

#[test]
fn test_sorted_merge_trims_window_and_hides_derived_key() {
    let (mut items, outputs) = plain_items(&["id"]);
    items.push(MergeItem::derived("ORDER_BY_DERIVED_0", ItemKind::Plain));
    let ctx = MergeContext {
        items,
        outputs,
        order_by: vec![SortKey {
            source: KeySource::Item(1),
            order: SortOrder::Desc,
        }],
        pagination: Some(PageWindow {
            offset: 1,
            limit: Some(2),
        }),
        ..MergeContext::default()
    };
    let labels = ["id", "ORDER_BY_DERIVED_0"];
    let cursors = vec![
        MemoryCursor::with_labels("ds_0", &labels, int_rows(&[&[1, 90], &[2, 50]])).boxed(),
        MemoryCursor::with_labels("ds_1", &labels, int_rows(&[&[3, 70], &[4, 10]])).boxed(),
    ];
    let result = merge(&ctx, cursors).unwrap();
    assert_eq!(result.columns(), ["id"]);
    assert_eq!(result.collect_rows().unwrap(), int_rows(&[&[3], &[2]]));
}

#[test]
fn test_avg_recomputed_per_group() {
    let ctx = MergeContext {
        items: vec![
            MergeItem::new("status", ItemKind::Plain),
            MergeItem::derived("AVG_DERIVED_SUM_0", ItemKind::Aggregate(AggregateFunc::Sum)),
            MergeItem::derived("AVG_DERIVED_COUNT_0", ItemKind::Aggregate(AggregateFunc::Count)),
        ],
        outputs: vec![
            OutputColumn::Item(0),
            OutputColumn::Avg {
                label: "AVG(amount)".into(),
                sum: 1,
                count: 2,
            },
        ],
        group_by: vec![KeySource::Item(0)],
        grouped: true,
        ..MergeContext::default()
    };
    let labels = ["status", "AVG_DERIVED_SUM_0", "AVG_DERIVED_COUNT_0"];
    let row = |s: &str, sum: i64, count: i64| vec![Value::from(s), Value::Int(sum), Value::Int(count)];
    let cursors = vec![
        MemoryCursor::with_labels("ds_0", &labels, vec![row("a", 10, 2), row("b", 3, 1)]).boxed(),
        MemoryCursor::with_labels("ds_1", &labels, vec![row("a", 20, 3)]).boxed(),
    ];
    let result = merge(&ctx, cursors).unwrap();
    assert_eq!(result.columns(), ["status", "AVG(amount)"]);
    assert_eq!(
        result.collect_rows().unwrap(),
        vec![
            vec![Value::from("a"), Value::Float(6.0)],
            vec![Value::from("b"), Value::Float(3.0)],
        ]
    );
}

#[test]
fn test_count_without_group_by_sums_shards() {
    let ctx = MergeContext {
        items: vec![MergeItem::new("COUNT(*)", ItemKind::Aggregate(AggregateFunc::Count))],
        outputs: vec![OutputColumn::Item(0)],
        grouped: true,
        ..MergeContext::default()
    };
    let cursors = (0..3)
        .map(|i| MemoryCursor::with_labels(format!("ds_{}", i), &["count"], int_rows(&[&[i + 4]])).boxed())
        .collect();
    let rows = merge(&ctx, cursors).unwrap().collect_rows().unwrap();
    assert_eq!(rows, int_rows(&[&[15]]));
}

#[test]
fn test_error_is_reported_once_and_closes_cursors() {
    let (items, outputs) = plain_items(&["id"]);
    let ctx = MergeContext {
        items,
        outputs,
        ..MergeContext::default()
    };
    let healthy = MemoryCursor::with_labels("ds_0", &["id"], int_rows(&[&[1], &[2]]));
    let failing = MemoryCursor::with_labels("ds_1", &["id"], int_rows(&[&[3]])).fail_after(0, "timeout");
    let flags = [healthy.closed_flag(), failing.closed_flag()];

    let mut result = merge(&ctx, vec![healthy.boxed(), failing.boxed()]).unwrap();
    assert_eq!(result.next_row().unwrap(), Some(vec![Value::Int(1)]));
    assert_eq!(result.next_row().unwrap(), Some(vec![Value::Int(2)]));
    let err = result.next_row().unwrap_err();
    assert_eq!(err.to_string(), "Fetch from 'ds_1' failed: timeout");
    assert!(flags.iter().all(|f| f.load(Ordering::Acquire)));
    assert_eq!(result.next_row().unwrap(), None);
}

#[test]
fn test_drop_closes_cursors() {
    let cursor = MemoryCursor::with_labels("ds_0", &["id"], int_rows(&[&[1], &[2]]));
    let flag = cursor.closed_flag();
    let mut result = merge(&MergeContext::passthrough(), vec![cursor.boxed()]).unwrap();
    assert_eq!(result.next_row().unwrap(), Some(vec![Value::Int(1)]));
    drop(result);
    assert!(flag.load(Ordering::Acquire));
}

#[test]
fn test_no_units_yields_empty_result() {
    let (items, outputs) = plain_items(&["id", "name"]);
    let ctx = MergeContext {
        items,
        outputs,
        ..MergeContext::default()
    };
    let mut result = merge(&ctx, Vec::new()).unwrap();
    assert_eq!(result.columns(), ["id", "name"]);
    assert_eq!(result.next_row().unwrap(), None);
}

#[test]
fn test_column_count_mismatch_is_rejected() {
    let cursors = vec![
        MemoryCursor::with_labels("ds_0", &["id"], Vec::new()).boxed(),
        MemoryCursor::with_labels("ds_1", &["id", "name"], Vec::new()).boxed(),
    ];
    assert!(merge(&MergeContext::default(), cursors).is_err());
}

#[test]
fn test_star_decrypts_and_renames_cipher_column() {
    let xor: Arc<dyn EncryptAlgorithm> = Arc::new(
        XorStreamEncryptor::new(&serde_json::from_value(json!({"key": "secret"})).unwrap()).unwrap(),
    );
    let cipher = xor.encrypt(&Value::from("555-0100")).unwrap();
    let ctx = MergeContext {
        items: vec![MergeItem::new("*", ItemKind::Star)],
        outputs: vec![OutputColumn::Item(0)],
        decrypt: vec![DecryptColumn {
            label: "phone_cipher".into(),
            rename: Some("phone".into()),
            encryptor: Arc::clone(&xor),
        }],
        hidden_labels: vec!["phone_digest".into()],
        ..MergeContext::passthrough()
    };
    let cursor = MemoryCursor::with_labels(
        "ds_0",
        &["id", "phone_cipher", "phone_digest"],
        vec![vec![Value::Int(1), cipher, Value::from("abc")]],
    );
    let result = merge(&ctx, vec![cursor.boxed()]).unwrap();
    assert_eq!(result.columns(), ["id", "phone"]);
    assert_eq!(
        result.collect_rows().unwrap(),
        vec![vec![Value::Int(1), Value::from("555-0100")]]
    );
}
