//! Row streams combining the cursors of every route unit.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use super::cursor::{Row, RowCursor};
use super::layout::{OrderKey, compare_keys};
use crate::ast::{SortOrder, Value};
use crate::error::ShardResult;

/// Internal pull interface shared by every merge layer.
pub(crate) trait RowStream: Send {
    fn next_row(&mut self) -> ShardResult<Option<Row>>;

    /// Close every cursor under this stream.
    fn close(&mut self);
}

fn close_all(cursors: &mut [Box<dyn RowCursor>]) {
    for cursor in cursors {
        cursor.close();
    }
}

/// A single unit's cursor, forwarded untouched.
pub(crate) struct PassThrough {
    cursor: Box<dyn RowCursor>,
}

impl PassThrough {
    pub fn new(cursor: Box<dyn RowCursor>) -> Self {
        Self { cursor }
    }
}

impl RowStream for PassThrough {
    fn next_row(&mut self) -> ShardResult<Option<Row>> {
        self.cursor.next_row()
    }

    fn close(&mut self) {
        self.cursor.close();
    }
}

/// Drains the cursors one after another, in unit order.
pub(crate) struct IteratorMerge {
    cursors: Vec<Box<dyn RowCursor>>,
    current: usize,
}

impl IteratorMerge {
    pub fn new(cursors: Vec<Box<dyn RowCursor>>) -> Self {
        Self { cursors, current: 0 }
    }
}

impl RowStream for IteratorMerge {
    fn next_row(&mut self) -> ShardResult<Option<Row>> {
        while let Some(cursor) = self.cursors.get_mut(self.current) {
            match cursor.next_row()? {
                Some(row) => return Ok(Some(row)),
                None => {
                    cursor.close();
                    self.current += 1;
                }
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        close_all(&mut self.cursors);
    }
}

struct HeapEntry {
    key: Vec<Value>,
    shard: usize,
    row: Row,
    orders: Arc<[SortOrder]>,
}

impl Ord for HeapEntry {
    // BinaryHeap pops the greatest entry, so the order is reversed.
    fn cmp(&self, other: &Self) -> Ordering {
        compare_keys(&self.key, &other.key, &self.orders)
            .then(self.shard.cmp(&other.shard))
            .reverse()
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

/// K-way merge of cursors that are each sorted by the same keys.
///
/// Equal keys come out in unit order.
pub(crate) struct SortedMerge {
    cursors: Vec<Box<dyn RowCursor>>,
    keys: Vec<OrderKey>,
    orders: Arc<[SortOrder]>,
    heap: BinaryHeap<HeapEntry>,
    primed: bool,
}

impl SortedMerge {
    pub fn new(cursors: Vec<Box<dyn RowCursor>>, keys: Vec<OrderKey>) -> Self {
        let orders: Arc<[SortOrder]> = keys.iter().map(|k| k.order).collect();
        Self {
            heap: BinaryHeap::with_capacity(cursors.len()),
            cursors,
            keys,
            orders,
            primed: false,
        }
    }

    fn pull(&mut self, shard: usize) -> ShardResult<()> {
        let cursor = &mut self.cursors[shard];
        match cursor.next_row()? {
            Some(row) => {
                let key = self
                    .keys
                    .iter()
                    .map(|k| k.source.read(&row))
                    .collect::<ShardResult<Vec<_>>>()?;
                self.heap.push(HeapEntry {
                    key,
                    shard,
                    row,
                    orders: Arc::clone(&self.orders),
                });
            }
            None => cursor.close(),
        }
        Ok(())
    }
}

impl RowStream for SortedMerge {
    fn next_row(&mut self) -> ShardResult<Option<Row>> {
        if !self.primed {
            self.primed = true;
            for shard in 0..self.cursors.len() {
                self.pull(shard)?;
            }
        }
        let Some(entry) = self.heap.pop() else {
            return Ok(None);
        };
        self.pull(entry.shard)?;
        Ok(Some(entry.row))
    }

    fn close(&mut self) {
        self.heap.clear();
        close_all(&mut self.cursors);
    }
}
