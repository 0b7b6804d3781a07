use std::sync::Arc;

use crate::algorithm::EncryptAlgorithm;
use crate::ast::{AggregateFunc, SortOrder};

/// Label prefixes of columns the rewrite adds for merging only.
pub const DERIVED_PREFIXES: [&str; 3] = ["AVG_DERIVED_", "ORDER_BY_DERIVED_", "GROUP_BY_DERIVED_"];

/// Whether a physical label names a derived column.
pub fn is_derived_label(label: &str) -> bool {
    DERIVED_PREFIXES
        .iter()
        .any(|p| {
            label.len() > p.len() && label.get(..p.len()).is_some_and(|h| h.eq_ignore_ascii_case(p))
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// `*` or `owner.*`, expanded against the physical columns.
    Star,
    Plain,
    Aggregate(AggregateFunc),
}

/// One item of the rewritten projection list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeItem {
    pub label: String,
    pub kind: ItemKind,
    /// Derived for merging and removed from the logical row.
    pub hidden: bool,
}

impl MergeItem {
    pub fn new(label: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            label: label.into(),
            kind,
            hidden: false,
        }
    }

    pub fn derived(label: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            label: label.into(),
            kind,
            hidden: true,
        }
    }
}

/// One logical result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputColumn {
    /// A projection item; a star item expands to several columns.
    Item(usize),
    /// AVG recomputed from derived SUM and COUNT items.
    Avg { label: String, sum: usize, count: usize },
}

/// Where an ORDER BY or GROUP BY key is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    Item(usize),
    /// A column covered by a star item, found by its physical label.
    Label(String),
    Avg { sum: usize, count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub source: KeySource,
    pub order: SortOrder,
}

/// Logical OFFSET / LIMIT applied at merge time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: u64,
    pub limit: Option<u64>,
}

/// An encrypted column to decrypt in the merged rows.
#[derive(Debug, Clone)]
pub struct DecryptColumn {
    /// Result label carrying the cipher text.
    pub label: String,
    /// Logical name to expose instead of `label`.
    pub rename: Option<String>,
    pub encryptor: Arc<dyn EncryptAlgorithm>,
}

/// Everything the merge engine needs to know about the rewritten statement.
#[derive(Debug, Clone, Default)]
pub struct MergeContext {
    pub items: Vec<MergeItem>,
    pub outputs: Vec<OutputColumn>,
    pub order_by: Vec<SortKey>,
    pub group_by: Vec<KeySource>,
    /// GROUP BY, aggregates or DISTINCT across shards.
    pub grouped: bool,
    pub distinct: bool,
    pub pagination: Option<PageWindow>,
    pub decrypt: Vec<DecryptColumn>,
    /// Physical labels dropped from star expansion (assisted query columns).
    pub hidden_labels: Vec<String>,
    /// The statement runs on one unit and every clause was pushed down.
    pub single: bool,
}

impl MergeContext {
    /// Context for a statement whose result is forwarded untouched.
    pub fn passthrough() -> Self {
        Self {
            single: true,
            ..Self::default()
        }
    }
}
