//! Pluggable algorithms consumed by the rules.
//!
//! Every algorithm kind is a trait object resolved once per rule set from
//! the [`AlgorithmRegistry`] by its configured type name.

mod balance;
mod encrypt;
mod keygen;
mod props;
mod registry;
mod shadow;
mod sharding;

use std::fmt::Debug;

pub use balance::{RandomLoadBalancer, RoundRobinLoadBalancer, WeightLoadBalancer};
pub use encrypt::{Sha256Encryptor, XorStreamEncryptor};
pub use keygen::{SnowflakeKeyGenerator, UuidKeyGenerator};
pub use props::Props;
pub use registry::AlgorithmRegistry;
pub use shadow::{RegexMatchShadow, SqlHintShadow, ValueMatchShadow};
pub use sharding::{
    BoundaryRangeSharding, HashModSharding, InlineSharding, IntervalSharding, ModSharding,
    VolumeRangeSharding,
};

use crate::ast::Value;
use crate::condition::ValueRange;
use crate::context::{Hints, SqlKind};
use crate::error::ShardResult;

/// Value handed to a sharding algorithm for one column.
#[derive(Debug, Clone, Copy)]
pub enum ShardingValue<'a> {
    Exact {
        column: &'a str,
        values: &'a [Value],
    },
    Range {
        column: &'a str,
        range: &'a ValueRange,
    },
}

impl ShardingValue<'_> {
    pub fn column(&self) -> &str {
        match self {
            ShardingValue::Exact { column, .. } | ShardingValue::Range { column, .. } => column,
        }
    }
}

/// Picks data sources or actual tables for a sharding value.
pub trait ShardingAlgorithm: Debug + Send + Sync {
    /// Subset of `candidates` the value may live on, in candidate order.
    fn compute(&self, candidates: &[String], value: &ShardingValue<'_>) -> ShardResult<Vec<String>>;
}

/// Picks one replica of a read-write splitting group.
pub trait LoadBalanceAlgorithm: Debug + Send + Sync {
    fn select(&self, group: &str, replicas: &[String]) -> ShardResult<String>;
}

/// Column value encryption.
pub trait EncryptAlgorithm: Debug + Send + Sync {
    fn encrypt(&self, plain: &Value) -> ShardResult<Value>;
    fn decrypt(&self, cipher: &Value) -> ShardResult<Value>;
}

/// Input of a shadow algorithm.
#[derive(Debug, Clone, Copy)]
pub enum ShadowValue<'a> {
    Column {
        table: &'a str,
        operation: SqlKind,
        column: &'a str,
        value: &'a Value,
    },
    Hint(&'a Hints),
}

/// Decides whether a statement targets shadow data sources.
pub trait ShadowAlgorithm: Debug + Send + Sync {
    fn is_shadow(&self, value: &ShadowValue<'_>) -> bool;
}

/// Generates values for a missing key column on INSERT.
pub trait KeyGenerateAlgorithm: Debug + Send + Sync {
    fn generate(&self) -> ShardResult<Value>;
}

/// Whether `candidate` is `suffix` itself or ends in `_<suffix>`.
pub(crate) fn has_suffix(candidate: &str, suffix: &str) -> bool {
    if candidate.eq_ignore_ascii_case(suffix) {
        return true;
    }
    let (c, s) = (candidate.as_bytes(), suffix.as_bytes());
    c.len() > s.len()
        && c[c.len() - s.len() - 1] == b'_'
        && c[c.len() - s.len()..].eq_ignore_ascii_case(s)
}

/// Candidates matching any of the suffixes, in candidate order.
pub(crate) fn select_by_suffix(candidates: &[String], suffixes: &[String]) -> Vec<String> {
    candidates
        .iter()
        .filter(|c| suffixes.iter().any(|s| has_suffix(c, s)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_matching() {
        assert!(has_suffix("t_order_1", "1"));
        assert!(!has_suffix("t_order_11", "1"));
        assert!(has_suffix("ds_0", "ds_0"));
        assert!(has_suffix("t_order_202401", "202401"));
        assert!(!has_suffix("t_order1", "1"));
    }

    #[test]
    fn test_select_keeps_candidate_order() {
        let candidates: Vec<String> = (0..4).map(|i| format!("t_{}", i)).collect();
        let picked = select_by_suffix(&candidates, &["3".into(), "1".into()]);
        assert_eq!(picked, vec!["t_1", "t_3"]);
    }
}
