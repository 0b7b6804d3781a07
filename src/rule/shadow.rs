use std::collections::BTreeMap;
use std::sync::Arc;

use super::config::ShadowConfig;
use crate::algorithm::{AlgorithmRegistry, ShadowAlgorithm};
use crate::error::{ShardError, ShardResult};

/// Production data source and its shadow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowDataSource {
    pub name: String,
    pub production: String,
    pub shadow: String,
}

#[derive(Debug, Clone)]
pub struct ShadowTable {
    /// Names of the shadow data source pairs the table uses.
    pub data_sources: Vec<String>,
    pub algorithms: Vec<Arc<dyn ShadowAlgorithm>>,
}

#[derive(Debug, Clone)]
pub struct ShadowRule {
    data_sources: BTreeMap<String, ShadowDataSource>,
    tables: BTreeMap<String, ShadowTable>,
    default_algorithm: Option<Arc<dyn ShadowAlgorithm>>,
}

impl ShadowRule {
    pub fn from_config(config: &ShadowConfig, registry: &AlgorithmRegistry) -> ShardResult<Self> {
        let mut algorithms = BTreeMap::new();
        for (name, algo) in &config.algorithms {
            algorithms.insert(name.as_str(), registry.shadow(&algo.kind, &algo.props)?);
        }
        let lookup = |name: &str| {
            algorithms.get(name).cloned().ok_or_else(|| {
                ShardError::Config(format!("undefined shadow algorithm '{}'", name))
            })
        };

        let data_sources: BTreeMap<String, ShadowDataSource> = config
            .data_sources
            .iter()
            .map(|(name, ds)| {
                (
                    name.clone(),
                    ShadowDataSource {
                        name: name.clone(),
                        production: ds.production.clone(),
                        shadow: ds.shadow.clone(),
                    },
                )
            })
            .collect();

        let mut tables = BTreeMap::new();
        for (table, t) in &config.tables {
            if let Some(unknown) = t.data_sources.iter().find(|d| !data_sources.contains_key(*d)) {
                return Err(ShardError::Config(format!(
                    "shadow table '{}' references unknown shadow data source '{}'",
                    table, unknown
                )));
            }
            let table_algorithms = t
                .algorithms
                .iter()
                .map(|a| lookup(a))
                .collect::<ShardResult<Vec<_>>>()?;
            tables.insert(
                table.to_ascii_lowercase(),
                ShadowTable {
                    data_sources: t.data_sources.clone(),
                    algorithms: table_algorithms,
                },
            );
        }

        let default_algorithm = match &config.default_algorithm {
            Some(name) => Some(lookup(name)?),
            None => None,
        };

        Ok(Self {
            data_sources,
            tables,
            default_algorithm,
        })
    }

    pub fn table(&self, table: &str) -> Option<&ShadowTable> {
        self.tables.get(&table.to_ascii_lowercase())
    }

    pub fn default_algorithm(&self) -> Option<&Arc<dyn ShadowAlgorithm>> {
        self.default_algorithm.as_ref()
    }

    pub fn data_source(&self, name: &str) -> Option<&ShadowDataSource> {
        self.data_sources.get(name)
    }

    pub fn data_sources(&self) -> impl Iterator<Item = &ShadowDataSource> {
        self.data_sources.values()
    }
}
