//! Grouping merge: folds the rows of every unit into one row per group.

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};

use super::cursor::Row;
use super::layout::{Combine, OrderKey, Source, compare_keys};
use super::stream::RowStream;
use crate::ast::{SortOrder, Value};
use crate::error::ShardResult;

/// Group key ordered by [`Value::compare`].
#[derive(Debug, Clone)]
struct GroupKey(Vec<Value>);

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let orders = vec![SortOrder::Asc; self.0.len().max(other.0.len())];
        compare_keys(&self.0, &other.0, &orders).then(self.0.len().cmp(&other.0.len()))
    }
}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GroupKey {}

/// Materializes every input row, then yields the folded groups.
///
/// Without GROUP BY keys a DISTINCT statement groups by the whole row and a
/// plain aggregate statement folds into a single group. Groups come out
/// sorted by the ORDER BY keys, or by group key when there are none.
pub(crate) struct GroupedMerge {
    input: Box<dyn RowStream>,
    group: Vec<Source>,
    distinct: bool,
    combine: Vec<Combine>,
    order: Vec<OrderKey>,
    output: Option<VecDeque<Row>>,
}

impl GroupedMerge {
    pub fn new(
        input: Box<dyn RowStream>,
        group: Vec<Source>,
        distinct: bool,
        combine: Vec<Combine>,
        order: Vec<OrderKey>,
    ) -> Self {
        Self {
            input,
            group,
            distinct,
            combine,
            order,
            output: None,
        }
    }

    fn key_of(&self, row: &Row) -> ShardResult<GroupKey> {
        if self.group.is_empty() && self.distinct {
            return Ok(GroupKey(row.clone()));
        }
        self.group
            .iter()
            .map(|s| s.read(row))
            .collect::<ShardResult<Vec<_>>>()
            .map(GroupKey)
    }

    fn fold(&self, acc: &mut Row, row: Row) -> ShardResult<()> {
        for (j, value) in row.into_iter().enumerate() {
            let Some(current) = acc.get_mut(j) else {
                break;
            };
            match self.combine.get(j).copied().unwrap_or(Combine::First) {
                Combine::First => {}
                Combine::Sum => {
                    if current.is_null() {
                        *current = value;
                    } else if !value.is_null() {
                        *current = current.add(&value)?;
                    }
                }
                Combine::Min => {
                    if current.is_null() || (!value.is_null() && value.compare(current) == Ordering::Less) {
                        *current = value;
                    }
                }
                Combine::Max => {
                    if current.is_null() || (!value.is_null() && value.compare(current) == Ordering::Greater) {
                        *current = value;
                    }
                }
            }
        }
        Ok(())
    }

    fn materialize(&mut self) -> ShardResult<VecDeque<Row>> {
        let mut groups: BTreeMap<GroupKey, Row> = BTreeMap::new();
        while let Some(row) = self.input.next_row()? {
            let key = self.key_of(&row)?;
            match groups.get_mut(&key) {
                Some(acc) => self.fold(acc, row)?,
                None => {
                    groups.insert(key, row);
                }
            }
        }
        self.input.close();

        let rows: Vec<Row> = groups.into_values().collect();
        if self.order.is_empty() {
            return Ok(rows.into());
        }
        let orders: Vec<SortOrder> = self.order.iter().map(|k| k.order).collect();
        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            let key = self
                .order
                .iter()
                .map(|k| k.source.read(&row))
                .collect::<ShardResult<Vec<_>>>()?;
            keyed.push((key, row));
        }
        keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, &orders));
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }
}

impl RowStream for GroupedMerge {
    fn next_row(&mut self) -> ShardResult<Option<Row>> {
        if self.output.is_none() {
            let rows = self.materialize()?;
            self.output = Some(rows);
        }
        Ok(self.output.as_mut().and_then(VecDeque::pop_front))
    }

    fn close(&mut self) {
        self.output = Some(VecDeque::new());
        self.input.close();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::merge::MemoryCursor;
    use crate::merge::stream::IteratorMerge;

    fn input(shards: Vec<Vec<Row>>) -> Box<dyn RowStream> {
        let cursors = shards
            .into_iter()
            .enumerate()
            .map(|(i, rows)| {
                MemoryCursor::with_labels(format!("ds_{}", i), &["status", "cnt", "low"], rows).boxed()
            })
            .collect();
        Box::new(IteratorMerge::new(cursors))
    }

    fn row(status: &str, cnt: i64, low: i64) -> Row {
        vec![Value::from(status), Value::Int(cnt), Value::Int(low)]
    }

    #[test]
    fn test_groups_fold_count_and_min() {
        let mut merge = GroupedMerge::new(
            input(vec![
                vec![row("paid", 2, 30), row("new", 1, 5)],
                vec![row("paid", 3, 10)],
            ]),
            vec![Source::Column(0)],
            false,
            vec![Combine::First, Combine::Sum, Combine::Min],
            Vec::new(),
        );
        assert_eq!(merge.next_row().unwrap(), Some(row("new", 1, 5)));
        assert_eq!(merge.next_row().unwrap(), Some(row("paid", 5, 10)));
        assert_eq!(merge.next_row().unwrap(), None);
    }

    #[test]
    fn test_groups_sorted_by_aggregate_desc() {
        let mut merge = GroupedMerge::new(
            input(vec![vec![row("a", 1, 0), row("b", 4, 0)], vec![row("a", 5, 0)]]),
            vec![Source::Column(0)],
            false,
            vec![Combine::First, Combine::Sum, Combine::First],
            vec![OrderKey {
                source: Source::Column(1),
                order: SortOrder::Desc,
            }],
        );
        assert_eq!(merge.next_row().unwrap(), Some(row("a", 6, 0)));
        assert_eq!(merge.next_row().unwrap(), Some(row("b", 4, 0)));
    }

    #[test]
    fn test_distinct_groups_whole_row() {
        let mut merge = GroupedMerge::new(
            input(vec![vec![row("a", 1, 0)], vec![row("a", 1, 0), row("a", 2, 0)]]),
            Vec::new(),
            true,
            vec![Combine::First; 3],
            Vec::new(),
        );
        let mut rows = Vec::new();
        while let Some(r) = merge.next_row().unwrap() {
            rows.push(r);
        }
        assert_eq!(rows, vec![row("a", 1, 0), row("a", 2, 0)]);
    }
}
