use std::collections::BTreeMap;
use std::sync::Arc;

use super::config::EncryptConfig;
use crate::algorithm::{AlgorithmRegistry, EncryptAlgorithm};
use crate::error::{ShardError, ShardResult};

/// Physical layout of one encrypted logical column.
#[derive(Debug, Clone)]
pub struct EncryptColumn {
    pub logic_column: String,
    pub cipher_column: String,
    pub encryptor: Arc<dyn EncryptAlgorithm>,
    pub assisted_query: Option<AssistedQuery>,
}

/// Deterministic digest column used for equality lookups.
#[derive(Debug, Clone)]
pub struct AssistedQuery {
    pub column: String,
    pub encryptor: Arc<dyn EncryptAlgorithm>,
}

/// Encrypted columns keyed by lowercase table, then lowercase column.
#[derive(Debug, Clone)]
pub struct EncryptRule {
    tables: BTreeMap<String, BTreeMap<String, EncryptColumn>>,
}

impl EncryptRule {
    pub fn from_config(config: &EncryptConfig, registry: &AlgorithmRegistry) -> ShardResult<Self> {
        let mut encryptors = BTreeMap::new();
        for (name, algo) in &config.encryptors {
            encryptors.insert(name.as_str(), registry.encrypt(&algo.kind, &algo.props)?);
        }
        let lookup = |name: &str, table: &str| {
            encryptors.get(name).cloned().ok_or_else(|| {
                ShardError::Config(format!(
                    "table '{}' references undefined encryptor '{}'",
                    table, name
                ))
            })
        };

        let mut tables = BTreeMap::new();
        for (table, table_config) in &config.tables {
            let mut columns = BTreeMap::new();
            for (column, c) in &table_config.columns {
                let assisted_query = match (&c.assisted_query_column, &c.assisted_query_encryptor) {
                    (Some(col), Some(enc)) => Some(AssistedQuery {
                        column: col.clone(),
                        encryptor: lookup(enc, table)?,
                    }),
                    (None, None) => None,
                    _ => {
                        return Err(ShardError::Config(format!(
                            "column '{}.{}' needs both assisted_query_column and assisted_query_encryptor",
                            table, column
                        )));
                    }
                };
                columns.insert(
                    column.to_ascii_lowercase(),
                    EncryptColumn {
                        logic_column: column.clone(),
                        cipher_column: c.cipher_column.clone(),
                        encryptor: lookup(&c.encryptor, table)?,
                        assisted_query,
                    },
                );
            }
            tables.insert(table.to_ascii_lowercase(), columns);
        }
        Ok(Self { tables })
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&EncryptColumn> {
        self.tables
            .get(&table.to_ascii_lowercase())?
            .get(&column.to_ascii_lowercase())
    }

    /// Encrypted columns of a table.
    pub fn columns(&self, table: &str) -> impl Iterator<Item = &EncryptColumn> {
        self.tables
            .get(&table.to_ascii_lowercase())
            .into_iter()
            .flat_map(|c| c.values())
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(&table.to_ascii_lowercase())
    }
}
