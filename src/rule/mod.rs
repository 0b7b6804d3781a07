//! Rule sets: the resolved, read-only form of a [`RuleConfig`].

pub mod config;
pub mod inline;
mod encrypt;
mod readwrite;
mod shadow;
mod sharding;

use std::sync::{Arc, RwLock};

use tracing::info;

pub use config::{RuleConfig, RuntimeConfig};
pub use encrypt::{AssistedQuery, EncryptColumn, EncryptRule};
pub use readwrite::{ReadwriteGroup, ReadwriteSplittingRule};
pub use shadow::{ShadowDataSource, ShadowRule, ShadowTable};
pub use sharding::{DataNode, KeyGenerate, ShardingRule, ShardingStrategy, TableRule};

use crate::algorithm::AlgorithmRegistry;
use crate::error::{ShardError, ShardResult};

/// Rule kinds, in the order the router consults them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Shadow,
    ReadwriteSplitting,
    Sharding,
    Encrypt,
}

impl RuleKind {
    pub const PRECEDENCE: [RuleKind; 4] = [
        RuleKind::Shadow,
        RuleKind::ReadwriteSplitting,
        RuleKind::Sharding,
        RuleKind::Encrypt,
    ];
}

/// Every rule active for one statement, with algorithms already resolved.
#[derive(Debug, Clone)]
pub struct RuleSet {
    data_sources: Vec<String>,
    sharding: Option<ShardingRule>,
    readwrite: Option<ReadwriteSplittingRule>,
    encrypt: Option<EncryptRule>,
    shadow: Option<ShadowRule>,
    props: RuntimeConfig,
}

impl RuleSet {
    pub fn from_config(config: &RuleConfig, registry: &AlgorithmRegistry) -> ShardResult<Self> {
        if config.data_sources.is_empty() {
            return Err(ShardError::Config("no data sources declared".to_string()));
        }
        for (i, ds) in config.data_sources.iter().enumerate() {
            if config.data_sources[..i].contains(ds) {
                return Err(ShardError::Config(format!("data source '{}' is declared twice", ds)));
            }
        }
        if config.runtime.max_condition_branches == 0 {
            return Err(ShardError::Config(
                "runtime.max_condition_branches must be positive".to_string(),
            ));
        }

        let sharding = config
            .sharding
            .as_ref()
            .map(|c| ShardingRule::from_config(c, &config.data_sources, registry))
            .transpose()?;

        let readwrite = config
            .readwrite_splitting
            .as_ref()
            .map(|c| ReadwriteSplittingRule::from_config(c, registry))
            .transpose()?;
        if let Some(rw) = &readwrite {
            if let Some(g) = rw.groups().find(|g| !config.data_sources.contains(&g.name)) {
                return Err(ShardError::Config(format!(
                    "read-write group '{}' is not a declared data source",
                    g.name
                )));
            }
        }

        let encrypt = config
            .encrypt
            .as_ref()
            .map(|c| EncryptRule::from_config(c, registry))
            .transpose()?;

        let shadow = config
            .shadow
            .as_ref()
            .map(|c| ShadowRule::from_config(c, registry))
            .transpose()?;
        if let Some(shadow) = &shadow {
            let known = |ds: &str| {
                config.data_sources.iter().any(|d| d == ds)
                    || readwrite
                        .as_ref()
                        .is_some_and(|rw| rw.groups().any(|g| g.write == ds))
            };
            if let Some(pair) = shadow.data_sources().find(|p| !known(&p.production)) {
                return Err(ShardError::Config(format!(
                    "shadow data source '{}' uses unknown production data source '{}'",
                    pair.name, pair.production
                )));
            }
        }

        info!(
            data_sources = config.data_sources.len(),
            sharded_tables = sharding.as_ref().map_or(0, |s| s.table_rules().count()),
            readwrite = readwrite.is_some(),
            encrypt = encrypt.is_some(),
            shadow = shadow.is_some(),
            "rule set loaded"
        );

        Ok(Self {
            data_sources: config.data_sources.clone(),
            sharding,
            readwrite,
            encrypt,
            shadow,
            props: config.runtime.clone(),
        })
    }

    /// Parse and resolve a TOML rule document with the built-in algorithms.
    pub fn from_toml(content: &str) -> ShardResult<Self> {
        Self::from_config(&RuleConfig::from_toml(content)?, &AlgorithmRegistry::default())
    }

    pub fn data_sources(&self) -> &[String] {
        &self.data_sources
    }

    pub fn sharding(&self) -> Option<&ShardingRule> {
        self.sharding.as_ref()
    }

    pub fn readwrite(&self) -> Option<&ReadwriteSplittingRule> {
        self.readwrite.as_ref()
    }

    pub fn encrypt(&self) -> Option<&EncryptRule> {
        self.encrypt.as_ref()
    }

    pub fn shadow(&self) -> Option<&ShadowRule> {
        self.shadow.as_ref()
    }

    pub fn props(&self) -> &RuntimeConfig {
        &self.props
    }
}

/// Holder of the current rule set.
///
/// Statements take a snapshot and keep it for their whole lifetime, so a
/// swap never changes the rules under an in-flight statement.
#[derive(Debug)]
pub struct RuleStore {
    current: RwLock<Arc<RuleSet>>,
}

impl RuleStore {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(rules)),
        }
    }

    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the rule set, returning the previous one.
    pub fn swap(&self, rules: RuleSet) -> Arc<RuleSet> {
        let next = Arc::new(rules);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        info!(data_sources = next.data_sources.len(), "rule set swapped");
        std::mem::replace(&mut *guard, next)
    }
}
