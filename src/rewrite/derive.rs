//! Projection derivation for statements that run on more than one unit.
//!
//! AVG is split into SUM and COUNT, ORDER BY and GROUP BY keys missing from
//! the projection are appended under derived labels, and pagination is
//! widened so every unit returns enough rows for the merge to trim.

use crate::ast::{AggregateFunc, Expr, Select, SelectItem, Value};
use crate::context::StatementContext;
use crate::error::{ShardError, ShardResult};
use crate::merge::{ItemKind, KeySource, MergeContext, MergeItem, OutputColumn, PageWindow, SortKey};

/// Merge layout of a statement forwarded to a single unit.
pub(super) fn single(select: &Select) -> MergeContext {
    let mut merge = MergeContext::passthrough();
    for (i, item) in select.projections.iter().enumerate() {
        merge.items.push(MergeItem::new(item.label(), item_kind(item)));
        merge.outputs.push(OutputColumn::Item(i));
    }
    merge
}

struct AvgColumn {
    label: String,
    arg: Option<Expr>,
    sum: usize,
    count: usize,
}

pub(super) fn multi_shard(
    ctx: &StatementContext,
    select: &mut Select,
    params: &mut Vec<Value>,
) -> ShardResult<MergeContext> {
    if select.having.is_some() {
        return Err(ShardError::rewrite("HAVING is not supported across shards"));
    }

    let mut merge = MergeContext::default();
    let mut avgs: Vec<AvgColumn> = Vec::new();
    let original = std::mem::take(&mut select.projections);

    for item in original {
        match &item {
            SelectItem::Aggregate {
                func,
                arg,
                distinct,
                ..
            } => {
                if arg.as_ref().is_some_and(contains_aggregate) {
                    return Err(ShardError::rewrite(format!(
                        "nested aggregate in '{}' cannot be merged",
                        item.label()
                    )));
                }
                if *distinct && !matches!(func, AggregateFunc::Min | AggregateFunc::Max) {
                    return Err(ShardError::rewrite(format!(
                        "'{}' cannot be merged across shards",
                        item.label()
                    )));
                }
                if *func == AggregateFunc::Avg {
                    let index = avgs.len();
                    let sum = push_derived(
                        select,
                        &mut merge,
                        AggregateFunc::Sum,
                        arg.clone(),
                        format!("AVG_DERIVED_SUM_{}", index),
                    );
                    let count = push_derived(
                        select,
                        &mut merge,
                        AggregateFunc::Count,
                        arg.clone(),
                        format!("AVG_DERIVED_COUNT_{}", index),
                    );
                    merge.outputs.push(OutputColumn::Avg {
                        label: item.label(),
                        sum,
                        count,
                    });
                    avgs.push(AvgColumn {
                        label: item.label(),
                        arg: arg.clone(),
                        sum,
                        count,
                    });
                    continue;
                }
            }
            SelectItem::Expr { expr, .. } if contains_aggregate(expr) => {
                return Err(ShardError::rewrite(format!(
                    "aggregate inside expression '{}' cannot be merged",
                    expr
                )));
            }
            _ => {}
        }
        merge.outputs.push(OutputColumn::Item(merge.items.len()));
        merge
            .items
            .push(MergeItem::new(item.label(), item_kind(&item)));
        select.projections.push(item);
    }

    let has_star = select
        .projections
        .iter()
        .any(|i| matches!(i, SelectItem::Star { .. }));

    let order_by = select.order_by.clone();
    for (n, item) in order_by.iter().enumerate() {
        let source = match find_key(select, &avgs, &item.expr, has_star) {
            Some(source) => source,
            None => {
                let label = format!("ORDER_BY_DERIVED_{}", n);
                KeySource::Item(push_plain(select, &mut merge, &item.expr, label))
            }
        };
        merge.order_by.push(SortKey {
            source,
            order: item.order,
        });
    }

    let group_by = select.group_by.clone();
    for (n, expr) in group_by.iter().enumerate() {
        let source = match find_key(select, &avgs, expr, has_star) {
            Some(source) => source,
            None => {
                let label = format!("GROUP_BY_DERIVED_{}", n);
                KeySource::Item(push_plain(select, &mut merge, expr, label))
            }
        };
        merge.group_by.push(source);
    }

    let aggregated = merge
        .items
        .iter()
        .any(|i| matches!(i.kind, ItemKind::Aggregate(_)));
    merge.distinct = select.distinct;
    merge.grouped = !select.group_by.is_empty() || aggregated || select.distinct;

    let page = *ctx.pagination();
    if page.is_present() {
        merge.pagination = Some(PageWindow {
            offset: page.offset_value(),
            limit: page.limit_value(),
        });
    }
    if merge.grouped {
        // Groups are materialized and sorted at merge time.
        select.order_by.clear();
        select.limit = None;
        select.offset = None;
    } else if let Some(limit) = page.limit {
        let total = page.offset_value().checked_add(limit.value).ok_or_else(|| {
            ShardError::rewrite("OFFSET + LIMIT overflows")
        })?;
        select.limit = Some(page_value(total, limit.bound, params)?);
        if let Some(offset) = page.offset {
            select.offset = Some(page_value(0, offset.bound, params)?);
        }
    } else {
        select.offset = None;
    }

    Ok(merge)
}

fn item_kind(item: &SelectItem) -> ItemKind {
    match item {
        SelectItem::Star { .. } => ItemKind::Star,
        SelectItem::Expr { .. } => ItemKind::Plain,
        SelectItem::Aggregate { func, .. } => ItemKind::Aggregate(*func),
    }
}

fn push_derived(
    select: &mut Select,
    merge: &mut MergeContext,
    func: AggregateFunc,
    arg: Option<Expr>,
    label: String,
) -> usize {
    select.projections.push(SelectItem::Aggregate {
        func,
        arg,
        distinct: false,
        alias: Some(label.clone()),
    });
    merge
        .items
        .push(MergeItem::derived(label, ItemKind::Aggregate(func)));
    merge.items.len() - 1
}

fn push_plain(select: &mut Select, merge: &mut MergeContext, expr: &Expr, label: String) -> usize {
    select.projections.push(SelectItem::aliased(expr.clone(), label.clone()));
    merge.items.push(MergeItem::derived(label, ItemKind::Plain));
    merge.items.len() - 1
}

/// Locate an ORDER BY / GROUP BY key among the projection items.
fn find_key(select: &Select, avgs: &[AvgColumn], key: &Expr, has_star: bool) -> Option<KeySource> {
    for avg in avgs {
        let by_label = is_label(key, Some(&avg.label));
        let by_call = aggregate_call(key)
            .is_some_and(|(f, a)| f == AggregateFunc::Avg && a == avg.arg.as_ref());
        if by_label || by_call {
            return Some(KeySource::Avg {
                sum: avg.sum,
                count: avg.count,
            });
        }
    }

    for (i, item) in select.projections.iter().enumerate() {
        let matched = match item {
            SelectItem::Star { .. } => false,
            SelectItem::Expr { expr, alias } => {
                expr == key
                    || is_label(key, alias.as_deref())
                    || match (expr, key) {
                        (Expr::Column(a), Expr::Column(b)) => {
                            a.name.eq_ignore_ascii_case(&b.name)
                                && (a.owner.is_none() || b.owner.is_none())
                        }
                        _ => false,
                    }
            }
            SelectItem::Aggregate {
                func,
                arg,
                distinct,
                alias,
            } => {
                is_label(key, alias.as_deref())
                    || (!*distinct
                        && aggregate_call(key).is_some_and(|(f, a)| f == *func && a == arg.as_ref()))
            }
        };
        if matched {
            return Some(KeySource::Item(i));
        }
    }

    match key {
        Expr::Column(c) if has_star => Some(KeySource::Label(c.name.clone())),
        _ => None,
    }
}

fn is_label(key: &Expr, alias: Option<&str>) -> bool {
    match (key, alias) {
        (Expr::Column(c), Some(alias)) => c.owner.is_none() && c.name.eq_ignore_ascii_case(alias),
        _ => false,
    }
}

/// `COUNT(x)` written as a function call; `COUNT()` stands for `COUNT(*)`.
fn aggregate_call(expr: &Expr) -> Option<(AggregateFunc, Option<&Expr>)> {
    match expr {
        Expr::Function { name, args } if args.len() <= 1 => {
            AggregateFunc::from_name(name).map(|f| (f, args.first()))
        }
        _ => None,
    }
}

fn contains_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Function { name, args } => {
            AggregateFunc::from_name(name).is_some() || args.iter().any(contains_aggregate)
        }
        Expr::Literal(_) | Expr::Param(_) | Expr::Column(_) | Expr::Subquery(_) => false,
        Expr::Binary { left, right, .. } => contains_aggregate(left) || contains_aggregate(right),
        Expr::Not(inner) => contains_aggregate(inner),
        Expr::InList { expr, list, .. } => {
            contains_aggregate(expr) || list.iter().any(contains_aggregate)
        }
        Expr::Between {
            expr, low, high, ..
        } => contains_aggregate(expr) || contains_aggregate(low) || contains_aggregate(high),
        Expr::IsNull { expr, .. } => contains_aggregate(expr),
    }
}

/// A rewritten LIMIT / OFFSET value; placeholders stay placeholders.
fn page_value(value: u64, bound: bool, params: &mut Vec<Value>) -> ShardResult<Expr> {
    let value = i64::try_from(value).map_err(|_| ShardError::coercion(value, "integer"))?;
    if bound {
        params.push(Value::Int(value));
        Ok(Expr::Param(params.len()))
    } else {
        Ok(Expr::Literal(Value::Int(value)))
    }
}
