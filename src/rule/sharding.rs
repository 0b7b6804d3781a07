use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::config::{ShardingConfig, StrategyConfig};
use super::inline;
use crate::algorithm::{AlgorithmRegistry, KeyGenerateAlgorithm, ShardingAlgorithm};
use crate::error::{ShardError, ShardResult};

/// One `data_source.actual_table` pair of a logical table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataNode {
    pub data_source: String,
    pub table: String,
}

impl DataNode {
    pub fn new(data_source: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into(),
            table: table.into(),
        }
    }

    /// Parse `ds.table`.
    pub fn parse(node: &str) -> ShardResult<Self> {
        match node.split_once('.') {
            Some((ds, table)) if !ds.is_empty() && !table.is_empty() && !table.contains('.') => {
                Ok(Self::new(ds.trim(), table.trim()))
            }
            _ => Err(ShardError::Config(format!(
                "data node '{}' is not of the form data_source.table",
                node
            ))),
        }
    }
}

impl std::fmt::Display for DataNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.data_source, self.table)
    }
}

/// Sharding column plus the algorithm that maps its values to targets.
#[derive(Debug, Clone)]
pub struct ShardingStrategy {
    /// Lowercase column name.
    pub column: String,
    pub algorithm: Arc<dyn ShardingAlgorithm>,
}

/// Key column filled in by a generator when an INSERT omits it.
#[derive(Debug, Clone)]
pub struct KeyGenerate {
    /// Lowercase column name.
    pub column: String,
    pub algorithm: Arc<dyn KeyGenerateAlgorithm>,
}

/// Layout and strategies of one sharded logical table.
#[derive(Debug, Clone)]
pub struct TableRule {
    pub logic_table: String,
    pub data_nodes: Vec<DataNode>,
    pub database_strategy: Option<ShardingStrategy>,
    pub table_strategy: Option<ShardingStrategy>,
    pub key_generate: Option<KeyGenerate>,
    pub strict: bool,
}

impl TableRule {
    /// Sharding columns, database strategy first, without duplicates.
    pub fn sharding_columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = Vec::with_capacity(2);
        for strategy in [&self.database_strategy, &self.table_strategy].into_iter().flatten() {
            if !columns.contains(&strategy.column.as_str()) {
                columns.push(&strategy.column);
            }
        }
        columns
    }

    pub fn key_generate(&self) -> Option<&KeyGenerate> {
        self.key_generate.as_ref()
    }

    /// Data sources of the data nodes, in declaration order.
    pub fn data_sources(&self) -> Vec<&str> {
        let mut sources: Vec<&str> = Vec::new();
        for node in &self.data_nodes {
            if !sources.contains(&node.data_source.as_str()) {
                sources.push(&node.data_source);
            }
        }
        sources
    }

    /// Index of a data node within the table's layout.
    pub fn node_index(&self, data_source: &str, table: &str) -> Option<usize> {
        self.data_nodes
            .iter()
            .position(|n| n.data_source == data_source && n.table == table)
    }

    /// Whether `actual` is one of this table's physical tables.
    pub fn has_actual_table(&self, actual: &str) -> bool {
        self.data_nodes.iter().any(|n| n.table.eq_ignore_ascii_case(actual))
    }
}

/// Sharding rule: table layouts, binding groups, broadcast tables.
#[derive(Debug, Clone)]
pub struct ShardingRule {
    tables: BTreeMap<String, TableRule>,
    binding_groups: Vec<BTreeSet<String>>,
    broadcast_tables: BTreeSet<String>,
    default_data_source: Option<String>,
    data_sources: Vec<String>,
}

impl ShardingRule {
    pub fn from_config(
        config: &ShardingConfig,
        data_sources: &[String],
        registry: &AlgorithmRegistry,
    ) -> ShardResult<Self> {
        let mut algorithms = BTreeMap::new();
        for (name, algo) in &config.algorithms {
            algorithms.insert(name.as_str(), registry.sharding(&algo.kind, &algo.props)?);
        }
        let mut generators = BTreeMap::new();
        for (name, algo) in &config.key_generators {
            generators.insert(name.as_str(), registry.key_generate(&algo.kind, &algo.props)?);
        }

        let strategy = |cfg: Option<&StrategyConfig>, table: &str| -> ShardResult<Option<ShardingStrategy>> {
            let Some(cfg) = cfg else {
                return Ok(None);
            };
            let algorithm = algorithms.get(cfg.algorithm.as_str()).cloned().ok_or_else(|| {
                ShardError::Config(format!(
                    "table '{}' references undefined sharding algorithm '{}'",
                    table, cfg.algorithm
                ))
            })?;
            Ok(Some(ShardingStrategy {
                column: cfg.column.to_ascii_lowercase(),
                algorithm,
            }))
        };

        let default_data_source = match &config.default_data_source {
            Some(ds) => Some(ds.clone()),
            None if data_sources.len() == 1 => Some(data_sources[0].clone()),
            None => None,
        };
        if let Some(ds) = &default_data_source {
            if !data_sources.contains(ds) {
                return Err(ShardError::Config(format!(
                    "default data source '{}' is not declared",
                    ds
                )));
            }
        }

        let mut tables = BTreeMap::new();
        for (name, table) in &config.tables {
            let data_nodes = match &table.actual_data_nodes {
                Some(expr) => inline::expand(expr)?
                    .iter()
                    .map(|n| DataNode::parse(n))
                    .collect::<ShardResult<Vec<_>>>()?,
                None => {
                    let ds = default_data_source.clone().ok_or_else(|| {
                        ShardError::Config(format!(
                            "table '{}' has no actual_data_nodes and there is no default data source",
                            name
                        ))
                    })?;
                    vec![DataNode::new(ds, name.clone())]
                }
            };
            if data_nodes.is_empty() {
                return Err(ShardError::Config(format!("table '{}' has no data nodes", name)));
            }
            for node in &data_nodes {
                if !data_sources.contains(&node.data_source) {
                    return Err(ShardError::Config(format!(
                        "data node '{}' of table '{}' uses undeclared data source '{}'",
                        node, name, node.data_source
                    )));
                }
            }
            let unique: BTreeSet<&DataNode> = data_nodes.iter().collect();
            if unique.len() != data_nodes.len() {
                return Err(ShardError::Config(format!("table '{}' repeats a data node", name)));
            }

            let key_generate = match &table.key_generate {
                Some(kg) => Some(KeyGenerate {
                    column: kg.column.to_ascii_lowercase(),
                    algorithm: generators.get(kg.generator.as_str()).cloned().ok_or_else(|| {
                        ShardError::Config(format!(
                            "table '{}' references undefined key generator '{}'",
                            name, kg.generator
                        ))
                    })?,
                }),
                None => None,
            };

            let rule = TableRule {
                logic_table: name.clone(),
                data_nodes,
                database_strategy: strategy(
                    table
                        .database_strategy
                        .as_ref()
                        .or(config.default_database_strategy.as_ref()),
                    name,
                )?,
                table_strategy: strategy(
                    table
                        .table_strategy
                        .as_ref()
                        .or(config.default_table_strategy.as_ref()),
                    name,
                )?,
                key_generate,
                strict: table.strict_routing,
            };
            tables.insert(name.to_ascii_lowercase(), rule);
        }

        let mut binding_groups = Vec::new();
        for group in &config.binding_tables {
            let names: BTreeSet<String> = group.iter().map(|t| t.to_ascii_lowercase()).collect();
            let mut layout: Option<(&str, Vec<&str>)> = None;
            for name in &names {
                let rule = tables.get(name).ok_or_else(|| {
                    ShardError::Config(format!("binding table '{}' is not a sharded table", name))
                })?;
                let sources: Vec<&str> = rule.data_nodes.iter().map(|n| n.data_source.as_str()).collect();
                if let Some((first, expected)) = &layout {
                    if *expected != sources {
                        return Err(ShardError::Config(format!(
                            "binding tables '{}' and '{}' have different data node layouts",
                            first, name
                        )));
                    }
                    continue;
                }
                layout = Some((name.as_str(), sources));
            }
            binding_groups.push(names);
        }

        let broadcast_tables: BTreeSet<String> = config
            .broadcast_tables
            .iter()
            .map(|t| t.to_ascii_lowercase())
            .collect();
        if let Some(t) = broadcast_tables.iter().find(|t| tables.contains_key(*t)) {
            return Err(ShardError::Config(format!(
                "table '{}' cannot be both sharded and broadcast",
                t
            )));
        }

        Ok(Self {
            tables,
            binding_groups,
            broadcast_tables,
            default_data_source,
            data_sources: data_sources.to_vec(),
        })
    }

    pub fn table_rule(&self, table: &str) -> Option<&TableRule> {
        self.tables.get(&table.to_ascii_lowercase())
    }

    pub fn table_rules(&self) -> impl Iterator<Item = &TableRule> {
        self.tables.values()
    }

    pub fn is_sharded(&self, table: &str) -> bool {
        self.table_rule(table).is_some()
    }

    pub fn is_broadcast(&self, table: &str) -> bool {
        self.broadcast_tables.contains(&table.to_ascii_lowercase())
    }

    /// Whether two sharded tables belong to the same binding group.
    pub fn is_bound(&self, a: &str, b: &str) -> bool {
        let (a, b) = (a.to_ascii_lowercase(), b.to_ascii_lowercase());
        a == b
            || self
                .binding_groups
                .iter()
                .any(|g| g.contains(&a) && g.contains(&b))
    }

    pub fn broadcast_tables(&self) -> impl Iterator<Item = &str> {
        self.broadcast_tables.iter().map(String::as_str)
    }

    pub fn default_data_source(&self) -> Option<&str> {
        self.default_data_source.as_deref()
    }

    pub fn data_sources(&self) -> &[String] {
        &self.data_sources
    }

    /// Logical table owning an actual table name, if any.
    pub fn logic_table_of(&self, actual: &str) -> Option<&str> {
        self.tables
            .values()
            .find(|r| r.has_actual_table(actual))
            .map(|r| r.logic_table.as_str())
    }
}
