//! Binds the merge context to the physical columns the cursors return.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::context::{ItemKind, KeySource, MergeContext, OutputColumn, is_derived_label};
use super::cursor::Row;
use crate::algorithm::EncryptAlgorithm;
use crate::ast::{AggregateFunc, SortOrder, Value};
use crate::error::{ShardError, ShardResult};

/// Where a logical value is read from in a physical row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    Column(usize),
    Avg { sum: usize, count: usize },
}

impl Source {
    pub fn read(&self, row: &Row) -> ShardResult<Value> {
        match *self {
            Source::Column(i) => Ok(row.get(i).cloned().unwrap_or(Value::Null)),
            Source::Avg { sum, count } => {
                let (Some(sum), Some(count)) = (row.get(sum), row.get(count)) else {
                    return Ok(Value::Null);
                };
                if sum.is_null() || count.is_null() {
                    return Ok(Value::Null);
                }
                let count = count.as_f64()?;
                if count == 0.0 {
                    return Ok(Value::Null);
                }
                Ok(Value::Float(sum.as_f64()? / count))
            }
        }
    }
}

/// How rows of one group fold a physical column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Combine {
    First,
    Sum,
    Min,
    Max,
}

/// Order key read from a physical row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OrderKey {
    pub source: Source,
    pub order: SortOrder,
}

/// Compare two key tuples under per-key sort orders.
pub(crate) fn compare_keys(a: &[Value], b: &[Value], orders: &[SortOrder]) -> Ordering {
    for ((x, y), order) in a.iter().zip(b).zip(orders) {
        let ord = match order {
            SortOrder::Asc => x.compare(y),
            SortOrder::Desc => y.compare(x),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[derive(Debug, Clone)]
pub(crate) struct Layout {
    pub labels: Vec<String>,
    pub outputs: Vec<Source>,
    pub order: Vec<OrderKey>,
    pub group: Vec<Source>,
    pub combine: Vec<Combine>,
    pub decrypt: Vec<(usize, Arc<dyn EncryptAlgorithm>)>,
}

impl Layout {
    /// Place every projection item on a physical column.
    ///
    /// Items before the first `*` take the leading columns and items after
    /// the last `*` the trailing ones; items between stars are found by
    /// label. The remaining columns, minus derived and hidden ones, expand
    /// the first `*`.
    pub fn resolve(ctx: &MergeContext, columns: &[String]) -> ShardResult<Self> {
        let n = ctx.items.len();
        let m = columns.len();
        let mut positions: Vec<Option<usize>> = vec![None; n];
        let mut expansions: Vec<Vec<usize>> = vec![Vec::new(); n];

        let stars: Vec<usize> = (0..n)
            .filter(|i| ctx.items[*i].kind == ItemKind::Star)
            .collect();
        match (stars.first(), stars.last()) {
            (Some(&first), Some(&last)) => {
                let tail = n - 1 - last;
                if m < first + tail {
                    return Err(layout_error(n, m));
                }
                for (i, position) in positions.iter_mut().enumerate().take(first) {
                    *position = Some(i);
                }
                for k in 0..tail {
                    positions[last + 1 + k] = Some(m - tail + k);
                }
                let middle = first..m - tail;
                let mut claimed = BTreeSet::new();
                for i in first..=last {
                    if ctx.items[i].kind == ItemKind::Star {
                        continue;
                    }
                    let label = &ctx.items[i].label;
                    let found = middle
                        .clone()
                        .find(|p| !claimed.contains(p) && columns[*p].eq_ignore_ascii_case(label))
                        .ok_or_else(|| {
                            ShardError::rewrite(format!("column '{}' is missing from the result", label))
                        })?;
                    claimed.insert(found);
                    positions[i] = Some(found);
                }
                expansions[first] = middle
                    .filter(|p| {
                        !claimed.contains(p)
                            && !is_derived_label(&columns[*p])
                            && !ctx
                                .hidden_labels
                                .iter()
                                .any(|h| h.eq_ignore_ascii_case(&columns[*p]))
                    })
                    .collect();
            }
            _ => {
                if m < n {
                    return Err(layout_error(n, m));
                }
                for (i, position) in positions.iter_mut().enumerate() {
                    *position = Some(i);
                }
            }
        }

        let position = |item: usize| -> ShardResult<usize> {
            positions
                .get(item)
                .copied()
                .flatten()
                .ok_or_else(|| ShardError::rewrite(format!("projection item {} has no column", item)))
        };

        let mut labels = Vec::new();
        let mut outputs = Vec::new();
        for output in &ctx.outputs {
            match output {
                OutputColumn::Item(i) if ctx.items.get(*i).is_some_and(|it| it.kind == ItemKind::Star) => {
                    for p in &expansions[*i] {
                        labels.push(columns[*p].clone());
                        outputs.push(Source::Column(*p));
                    }
                }
                OutputColumn::Item(i) => {
                    labels.push(ctx.items[*i].label.clone());
                    outputs.push(Source::Column(position(*i)?));
                }
                OutputColumn::Avg { label, sum, count } => {
                    labels.push(label.clone());
                    outputs.push(Source::Avg {
                        sum: position(*sum)?,
                        count: position(*count)?,
                    });
                }
            }
        }

        let star_columns: Vec<usize> = expansions.iter().flatten().copied().collect();
        let key = |source: &KeySource| -> ShardResult<Source> {
            match source {
                KeySource::Item(i) => position(*i).map(Source::Column),
                KeySource::Avg { sum, count } => Ok(Source::Avg {
                    sum: position(*sum)?,
                    count: position(*count)?,
                }),
                KeySource::Label(name) => star_columns
                    .iter()
                    .copied()
                    .chain(0..m)
                    .find(|p| columns[*p].eq_ignore_ascii_case(name))
                    .map(Source::Column)
                    .ok_or_else(|| {
                        ShardError::rewrite(format!("sort or group column '{}' is not in the result", name))
                    }),
            }
        };
        let mut order = Vec::with_capacity(ctx.order_by.len());
        for k in &ctx.order_by {
            order.push(OrderKey {
                source: key(&k.source)?,
                order: k.order,
            });
        }
        let mut group = Vec::with_capacity(ctx.group_by.len());
        for g in &ctx.group_by {
            group.push(key(g)?);
        }

        let mut combine = vec![Combine::First; m];
        for (i, item) in ctx.items.iter().enumerate() {
            let (Some(p), ItemKind::Aggregate(func)) = (positions[i], item.kind) else {
                continue;
            };
            combine[p] = match func {
                AggregateFunc::Count | AggregateFunc::Sum => Combine::Sum,
                AggregateFunc::Min => Combine::Min,
                AggregateFunc::Max => Combine::Max,
                AggregateFunc::Avg => Combine::First,
            };
        }

        let mut decrypt = Vec::new();
        for column in &ctx.decrypt {
            let Some(index) = labels.iter().position(|l| l.eq_ignore_ascii_case(&column.label)) else {
                continue;
            };
            if let Some(rename) = &column.rename {
                labels[index] = rename.clone();
            }
            decrypt.push((index, Arc::clone(&column.encryptor)));
        }

        Ok(Self {
            labels,
            outputs,
            order,
            group,
            combine,
            decrypt,
        })
    }

    /// Labels of a result nobody returned rows for.
    pub fn empty_labels(ctx: &MergeContext) -> Vec<String> {
        ctx.outputs
            .iter()
            .filter_map(|output| match output {
                OutputColumn::Item(i) => ctx
                    .items
                    .get(*i)
                    .filter(|item| item.kind != ItemKind::Star)
                    .map(|item| item.label.clone()),
                OutputColumn::Avg { label, .. } => Some(label.clone()),
            })
            .collect()
    }
}

fn layout_error(items: usize, columns: usize) -> ShardError {
    ShardError::rewrite(format!(
        "result has {} columns but the projection needs at least {}",
        columns, items
    ))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::merge::MergeItem;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_star_expands_between_fixed_items() {
        let ctx = MergeContext {
            items: vec![
                MergeItem::new("id", ItemKind::Plain),
                MergeItem::new("*", ItemKind::Star),
                MergeItem::derived("ORDER_BY_DERIVED_0", ItemKind::Plain),
            ],
            outputs: vec![OutputColumn::Item(0), OutputColumn::Item(1)],
            hidden_labels: vec!["phone_digest".into()],
            ..MergeContext::default()
        };
        let columns = labels(&["id", "id", "name", "phone_digest", "ORDER_BY_DERIVED_0"]);
        let layout = Layout::resolve(&ctx, &columns).unwrap();
        assert_eq!(layout.labels, labels(&["id", "id", "name"]));
        assert_eq!(
            layout.outputs,
            vec![Source::Column(0), Source::Column(1), Source::Column(2)]
        );
    }

    #[test]
    fn test_avg_reads_sum_over_count() {
        let row = vec![Value::Int(9), Value::Int(4)];
        let avg = Source::Avg { sum: 0, count: 1 };
        assert_eq!(avg.read(&row).unwrap(), Value::Float(2.25));
        assert_eq!(avg.read(&vec![Value::Null, Value::Int(0)]).unwrap(), Value::Null);
    }

    #[test]
    fn test_too_few_columns() {
        let ctx = MergeContext {
            items: vec![
                MergeItem::new("a", ItemKind::Plain),
                MergeItem::new("b", ItemKind::Plain),
            ],
            outputs: vec![OutputColumn::Item(0), OutputColumn::Item(1)],
            ..MergeContext::default()
        };
        assert!(Layout::resolve(&ctx, &labels(&["a"])).is_err());
    }
}
