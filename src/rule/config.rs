//! Rule configuration as written in TOML.
//!
//! ```toml
//! data_sources = ["ds_0", "ds_1"]
//!
//! [runtime]
//! dialect = "mysql"
//!
//! [sharding.tables.t_order]
//! actual_data_nodes = "ds_${0..1}.t_order_${0..1}"
//! database_strategy = { column = "user_id", algorithm = "db_mod" }
//! table_strategy = { column = "order_id", algorithm = "table_mod" }
//! key_generate = { column = "order_id", generator = "snowflake" }
//!
//! [sharding.algorithms.db_mod]
//! type = "MOD"
//! props = { sharding_count = 2 }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::algorithm::Props;
use crate::rewrite::Dialect;

/// Default cap on predicate conjunctions after DNF expansion.
pub const DEFAULT_MAX_CONDITION_BRANCHES: usize = 64;

/// Root of a rule configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// Logical data source names, in routing order.
    #[serde(default)]
    pub data_sources: Vec<String>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    pub sharding: Option<ShardingConfig>,
    pub readwrite_splitting: Option<ReadwriteSplittingConfig>,
    pub encrypt: Option<EncryptConfig>,
    pub shadow: Option<ShadowConfig>,
}

impl RuleConfig {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> crate::error::ShardResult<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub dialect: Dialect,
    #[serde(default = "default_max_branches")]
    pub max_condition_branches: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            max_condition_branches: DEFAULT_MAX_CONDITION_BRANCHES,
        }
    }
}

fn default_max_branches() -> usize {
    DEFAULT_MAX_CONDITION_BRANCHES
}

/// A configured algorithm: registry type name plus properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub props: Props,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub column: String,
    /// Name under `[sharding.algorithms]`.
    pub algorithm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyGenerateConfig {
    pub column: String,
    /// Name under `[sharding.key_generators]`.
    pub generator: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Inline expression such as `ds_${0..1}.t_order_${0..3}`.
    /// Defaults to the logical table on the default data source.
    pub actual_data_nodes: Option<String>,
    pub database_strategy: Option<StrategyConfig>,
    pub table_strategy: Option<StrategyConfig>,
    pub key_generate: Option<KeyGenerateConfig>,
    /// Fail instead of scanning every data node when no sharding value is found.
    #[serde(default)]
    pub strict_routing: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardingConfig {
    #[serde(default)]
    pub tables: BTreeMap<String, TableConfig>,
    /// Groups of tables sharing one layout.
    #[serde(default)]
    pub binding_tables: Vec<Vec<String>>,
    #[serde(default)]
    pub broadcast_tables: Vec<String>,
    pub default_data_source: Option<String>,
    pub default_database_strategy: Option<StrategyConfig>,
    pub default_table_strategy: Option<StrategyConfig>,
    #[serde(default)]
    pub algorithms: BTreeMap<String, AlgorithmConfig>,
    #[serde(default)]
    pub key_generators: BTreeMap<String, AlgorithmConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadwriteGroupConfig {
    pub write: String,
    #[serde(default)]
    pub reads: Vec<String>,
    #[serde(default)]
    pub disabled_reads: Vec<String>,
    /// Name under `[readwrite_splitting.load_balancers]`; round robin when absent.
    pub load_balancer: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadwriteSplittingConfig {
    #[serde(default)]
    pub groups: BTreeMap<String, ReadwriteGroupConfig>,
    #[serde(default)]
    pub load_balancers: BTreeMap<String, AlgorithmConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptColumnConfig {
    pub cipher_column: String,
    pub encryptor: String,
    pub assisted_query_column: Option<String>,
    pub assisted_query_encryptor: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptTableConfig {
    #[serde(default)]
    pub columns: BTreeMap<String, EncryptColumnConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptConfig {
    #[serde(default)]
    pub tables: BTreeMap<String, EncryptTableConfig>,
    #[serde(default)]
    pub encryptors: BTreeMap<String, AlgorithmConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowDataSourceConfig {
    pub production: String,
    pub shadow: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShadowTableConfig {
    /// Names under `[shadow.data_sources]`.
    #[serde(default)]
    pub data_sources: Vec<String>,
    /// Names under `[shadow.algorithms]`.
    #[serde(default)]
    pub algorithms: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShadowConfig {
    #[serde(default)]
    pub data_sources: BTreeMap<String, ShadowDataSourceConfig>,
    #[serde(default)]
    pub tables: BTreeMap<String, ShadowTableConfig>,
    /// Hint algorithm applied to statements on tables without shadow config.
    pub default_algorithm: Option<String>,
    #[serde(default)]
    pub algorithms: BTreeMap<String, AlgorithmConfig>,
}
