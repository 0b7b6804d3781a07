//! Layers applied on top of a merged stream.

use std::sync::Arc;

use super::context::PageWindow;
use super::cursor::Row;
use super::layout::Source;
use super::stream::RowStream;
use crate::algorithm::EncryptAlgorithm;
use crate::error::ShardResult;

/// Applies the logical OFFSET and LIMIT to the merged rows.
///
/// Cursors are closed as soon as the window is filled.
pub(crate) struct PaginationTrim {
    inner: Box<dyn RowStream>,
    skip: u64,
    remaining: Option<u64>,
    done: bool,
}

impl PaginationTrim {
    pub fn new(inner: Box<dyn RowStream>, window: PageWindow) -> Self {
        Self {
            inner,
            skip: window.offset,
            remaining: window.limit,
            done: false,
        }
    }

    fn finish(&mut self) -> ShardResult<Option<Row>> {
        self.done = true;
        self.inner.close();
        Ok(None)
    }
}

impl RowStream for PaginationTrim {
    fn next_row(&mut self) -> ShardResult<Option<Row>> {
        if self.done || self.remaining == Some(0) {
            return self.finish();
        }
        while self.skip > 0 {
            if self.inner.next_row()?.is_none() {
                return self.finish();
            }
            self.skip -= 1;
        }
        let Some(row) = self.inner.next_row()? else {
            return self.finish();
        };
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                self.done = true;
                self.inner.close();
            }
        }
        Ok(Some(row))
    }

    fn close(&mut self) {
        self.done = true;
        self.inner.close();
    }
}

/// Maps physical rows to logical ones.
///
/// Derived columns disappear, AVG is recomputed from its SUM and COUNT and
/// encrypted columns are decrypted.
pub(crate) struct Projection {
    inner: Box<dyn RowStream>,
    outputs: Vec<Source>,
    decrypt: Vec<(usize, Arc<dyn EncryptAlgorithm>)>,
}

impl Projection {
    pub fn new(
        inner: Box<dyn RowStream>,
        outputs: Vec<Source>,
        decrypt: Vec<(usize, Arc<dyn EncryptAlgorithm>)>,
    ) -> Self {
        Self {
            inner,
            outputs,
            decrypt,
        }
    }
}

impl RowStream for Projection {
    fn next_row(&mut self) -> ShardResult<Option<Row>> {
        let Some(physical) = self.inner.next_row()? else {
            return Ok(None);
        };
        let mut row = self
            .outputs
            .iter()
            .map(|s| s.read(&physical))
            .collect::<ShardResult<Row>>()?;
        for (index, encryptor) in &self.decrypt {
            if let Some(value) = row.get_mut(*index) {
                *value = encryptor.decrypt(value)?;
            }
        }
        Ok(Some(row))
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ast::Value;
    use crate::merge::MemoryCursor;
    use crate::merge::stream::IteratorMerge;

    fn numbers(n: i64) -> (Box<dyn RowStream>, Arc<std::sync::atomic::AtomicBool>) {
        let cursor = MemoryCursor::with_labels(
            "ds_0",
            &["n"],
            (0..n).map(|i| vec![Value::Int(i)]).collect(),
        );
        let flag = cursor.closed_flag();
        (Box::new(IteratorMerge::new(vec![cursor.boxed()])), flag)
    }

    #[test]
    fn test_trim_closes_when_window_filled() {
        let (inner, closed) = numbers(10);
        let mut trim = PaginationTrim::new(
            inner,
            PageWindow {
                offset: 3,
                limit: Some(2),
            },
        );
        assert_eq!(trim.next_row().unwrap(), Some(vec![Value::Int(3)]));
        assert!(!closed.load(std::sync::atomic::Ordering::Acquire));
        assert_eq!(trim.next_row().unwrap(), Some(vec![Value::Int(4)]));
        assert!(closed.load(std::sync::atomic::Ordering::Acquire));
        assert_eq!(trim.next_row().unwrap(), None);
    }

    #[test]
    fn test_offset_past_end_is_empty() {
        let (inner, _) = numbers(3);
        let mut trim = PaginationTrim::new(
            inner,
            PageWindow {
                offset: 5,
                limit: None,
            },
        );
        assert_eq!(trim.next_row().unwrap(), None);
    }
}
