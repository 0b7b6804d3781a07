//! Physical row cursors handed back by the executor.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::ast::Value;
use crate::error::{ShardError, ShardResult};

/// One result row, positionally aligned with the cursor's columns.
pub type Row = Vec<Value>;

/// Pull-based cursor over the rows one route unit returned.
pub trait RowCursor: Send {
    /// Column labels, in row order.
    fn columns(&self) -> &[String];

    /// Next row, or `None` at the end of the stream.
    fn next_row(&mut self) -> ShardResult<Option<Row>>;

    /// Release the cursor. Closing twice is a no-op.
    fn close(&mut self);
}

/// Cursor over rows already in memory.
///
/// Used by the CLI and tests; an optional failure point simulates a fetch
/// error after a number of rows.
#[derive(Debug)]
pub struct MemoryCursor {
    data_source: String,
    columns: Vec<String>,
    rows: VecDeque<Row>,
    fail_after: Option<(usize, String)>,
    fetched: usize,
    closed: Arc<AtomicBool>,
}

impl MemoryCursor {
    pub fn new(data_source: impl Into<String>, columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            data_source: data_source.into(),
            columns,
            rows: rows.into(),
            fail_after: None,
            fetched: 0,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Build from string labels.
    pub fn with_labels(data_source: impl Into<String>, labels: &[&str], rows: Vec<Row>) -> Self {
        Self::new(
            data_source,
            labels.iter().map(|l| l.to_string()).collect(),
            rows,
        )
    }

    /// Fail with a fetch error once `rows` rows were returned.
    pub fn fail_after(mut self, rows: usize, message: impl Into<String>) -> Self {
        self.fail_after = Some((rows, message.into()));
        self
    }

    /// Shared flag that turns true once the cursor is closed.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    pub fn boxed(self) -> Box<dyn RowCursor> {
        Box::new(self)
    }
}

impl RowCursor for MemoryCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> ShardResult<Option<Row>> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(None);
        }
        if let Some((limit, message)) = &self.fail_after {
            if self.fetched >= *limit {
                return Err(ShardError::fetch(&self.data_source, message.clone()));
            }
        }
        let row = self.rows.pop_front();
        if row.is_some() {
            self.fetched += 1;
        }
        Ok(row)
    }

    fn close(&mut self) {
        self.rows.clear();
        self.closed.store(true, Ordering::Release);
    }
}
