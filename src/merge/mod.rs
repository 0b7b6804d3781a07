//! Merge engine: rebuilds one logical result from the cursors of every
//! route unit.
//!
//! The stream is assembled from layers. The base layer drains cursors in
//! unit order, k-way merges them by the ORDER BY keys, or folds groups.
//! Pagination trims the merged rows, and a projection layer drops derived
//! columns, recomputes AVG and decrypts encrypted columns.

mod context;
mod cursor;
mod decorator;
mod group;
mod layout;
mod stream;

#[cfg(test)]
mod tests;

pub use context::{
    DERIVED_PREFIXES, DecryptColumn, ItemKind, KeySource, MergeContext, MergeItem, OutputColumn, PageWindow,
    SortKey, is_derived_label,
};
pub use cursor::{MemoryCursor, Row, RowCursor};

use tracing::{debug, warn};

use crate::error::{ShardError, ShardResult};
use decorator::{PaginationTrim, Projection};
use group::GroupedMerge;
use layout::Layout;
use stream::{IteratorMerge, PassThrough, RowStream, SortedMerge};

/// The logical result of a statement.
///
/// Rows are pulled lazily. The first error is returned once and closes every
/// underlying cursor; later pulls report the end of the stream. Dropping the
/// result closes the cursors too.
pub struct MergedResult {
    columns: Vec<String>,
    stream: Box<dyn RowStream>,
    finished: bool,
}

impl MergedResult {
    fn new(columns: Vec<String>, stream: Box<dyn RowStream>) -> Self {
        Self {
            columns,
            stream,
            finished: false,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn next_row(&mut self) -> ShardResult<Option<Row>> {
        if self.finished {
            return Ok(None);
        }
        match self.stream.next_row() {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => {
                self.close();
                Ok(None)
            }
            Err(err) => {
                warn!(error = %err, "merge failed, closing cursors");
                self.close();
                Err(err)
            }
        }
    }

    pub fn close(&mut self) {
        if !self.finished {
            self.finished = true;
            self.stream.close();
        }
    }

    /// Drain every remaining row.
    pub fn collect_rows(mut self) -> ShardResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }
}

impl Iterator for MergedResult {
    type Item = ShardResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

impl Drop for MergedResult {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MergedResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergedResult")
            .field("columns", &self.columns)
            .field("finished", &self.finished)
            .finish()
    }
}

struct Empty;

impl RowStream for Empty {
    fn next_row(&mut self) -> ShardResult<Option<Row>> {
        Ok(None)
    }

    fn close(&mut self) {}
}

/// Merge the cursors of every route unit, given in unit order.
pub fn merge(ctx: &MergeContext, mut cursors: Vec<Box<dyn RowCursor>>) -> ShardResult<MergedResult> {
    let Some(first) = cursors.first() else {
        return Ok(MergedResult::new(Layout::empty_labels(ctx), Box::new(Empty)));
    };
    let columns = first.columns().to_vec();
    if let Some(i) = cursors.iter().position(|c| c.columns().len() != columns.len()) {
        let found = cursors[i].columns().len();
        cursors.iter_mut().for_each(|c| c.close());
        return Err(ShardError::fetch(
            format!("unit {}", i),
            format!("returned {} columns, expected {}", found, columns.len()),
        ));
    }

    let raw = ctx.outputs.is_empty() || (ctx.single && ctx.decrypt.is_empty() && ctx.hidden_labels.is_empty());
    if raw {
        debug!(cursors = cursors.len(), "merging without layout");
        let stream: Box<dyn RowStream> = if cursors.len() == 1 {
            Box::new(PassThrough::new(cursors.remove(0)))
        } else {
            Box::new(IteratorMerge::new(cursors))
        };
        return Ok(MergedResult::new(columns, stream));
    }

    let layout = match Layout::resolve(ctx, &columns) {
        Ok(layout) => layout,
        Err(err) => {
            cursors.iter_mut().for_each(|c| c.close());
            return Err(err);
        }
    };

    let multi = !ctx.single && cursors.len() > 1;
    let base: Box<dyn RowStream> = if ctx.grouped && !ctx.single {
        debug!(groups = layout.group.len(), "grouping merge");
        Box::new(GroupedMerge::new(
            Box::new(IteratorMerge::new(cursors)),
            layout.group,
            ctx.distinct,
            layout.combine,
            layout.order,
        ))
    } else if multi && !layout.order.is_empty() {
        debug!(keys = layout.order.len(), "sorted merge");
        Box::new(SortedMerge::new(cursors, layout.order))
    } else {
        Box::new(IteratorMerge::new(cursors))
    };
    let paged: Box<dyn RowStream> = match ctx.pagination {
        Some(window) if !ctx.single => Box::new(PaginationTrim::new(base, window)),
        _ => base,
    };
    let stream = Projection::new(paged, layout.outputs, layout.decrypt);
    Ok(MergedResult::new(layout.labels, Box::new(stream)))
}
