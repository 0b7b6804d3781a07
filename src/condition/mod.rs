//! Sharding condition extraction.
//!
//! Walks the predicate tree (or the VALUES rows of an INSERT) and collects,
//! per sharded table, the candidate values of its sharding columns.

mod dnf;
mod extractor;
mod value;

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet};

pub use extractor::extract;
pub use value::{ConditionValue, ValueRange};

use crate::ast::Value;

/// One conjunction of the predicate, seen from a single table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionBranch {
    /// Narrowed sharding columns (lowercase).
    pub values: BTreeMap<String, ConditionValue>,
    /// Sharding columns that appear in a form that cannot be evaluated.
    pub undetermined: BTreeSet<String>,
    /// VALUES row this branch was built from (INSERT only).
    pub insert_row: Option<usize>,
}

impl ConditionBranch {
    pub fn for_row(row: usize) -> Self {
        Self {
            insert_row: Some(row),
            ..Self::default()
        }
    }

    pub fn value(&self, column: &str) -> Option<&ConditionValue> {
        self.values.get(column)
    }

    /// AND a value set into the branch. Returns `false` on contradiction.
    pub fn narrow(&mut self, column: &str, value: ConditionValue) -> bool {
        let merged = match self.values.get(column) {
            Some(existing) => existing.intersect(&value),
            None if value.is_empty() => None,
            None => Some(value),
        };
        match merged {
            Some(v) => {
                self.values.insert(column.to_string(), v);
                true
            }
            None => false,
        }
    }

    /// Whether the column has no usable value in this branch.
    pub fn is_undetermined(&self, column: &str) -> bool {
        !self.values.contains_key(column)
    }
}

/// Disjunction of branches for one logical table.
///
/// No branches means the predicate can never match the table.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardingCondition {
    pub table: String,
    pub branches: Vec<ConditionBranch>,
}

impl ShardingCondition {
    /// A single branch that leaves every column open.
    pub fn unconstrained(table: impl Into<String>, columns: &[&str]) -> Self {
        let branch = ConditionBranch {
            undetermined: columns.iter().map(|c| c.to_string()).collect(),
            ..ConditionBranch::default()
        };
        Self {
            table: table.into(),
            branches: vec![branch],
        }
    }

    pub fn is_unmatched(&self) -> bool {
        self.branches.is_empty()
    }

    /// Whether at least one branch narrows a sharding column.
    pub fn is_narrowed(&self) -> bool {
        self.branches.iter().any(|b| !b.values.is_empty())
    }
}

/// Key values produced by a key generator for an INSERT.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedKey {
    pub column: String,
    /// One value per VALUES row.
    pub values: Vec<Value>,
}

/// Conditions of every sharded table referenced by a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShardingConditions {
    tables: BTreeMap<String, ShardingCondition>,
    generated_key: Option<GeneratedKey>,
}

impl ShardingConditions {
    pub fn get(&self, table: &str) -> Option<&ShardingCondition> {
        self.tables.get(&table.to_ascii_lowercase())
    }

    pub fn insert(&mut self, condition: ShardingCondition) {
        self.tables
            .insert(condition.table.to_ascii_lowercase(), condition);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShardingCondition> {
        self.tables.values()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn generated_key(&self) -> Option<&GeneratedKey> {
        self.generated_key.as_ref()
    }

    pub fn set_generated_key(&mut self, key: GeneratedKey) {
        self.generated_key = Some(key);
    }
}
