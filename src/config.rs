//! Locating and loading the rule configuration file.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::algorithm::AlgorithmRegistry;
use crate::error::{ShardError, ShardResult};
use crate::rule::{RuleConfig, RuleSet};
use crate::runtime::ShardingRuntime;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "QAIL_SHARD_CONFIG";

/// A rule configuration together with the file it came from.
#[derive(Debug, Clone)]
pub struct ShardConfig {
    pub path: PathBuf,
    pub rules: RuleConfig,
}

impl ShardConfig {
    /// Configuration file to use: the explicit path, then `$QAIL_SHARD_CONFIG`,
    /// then `~/.qail/shard.toml`.
    pub fn locate(explicit: Option<&Path>) -> ShardResult<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(path));
        }
        dirs::home_dir()
            .map(|home| home.join(".qail").join("shard.toml"))
            .ok_or_else(|| {
                ShardError::Config(format!(
                    "no configuration path given, {} is unset and the home directory is unknown",
                    CONFIG_ENV
                ))
            })
    }

    pub fn load(explicit: Option<&Path>) -> ShardResult<Self> {
        Self::from_file(Self::locate(explicit)?)
    }

    pub fn from_file(path: impl Into<PathBuf>) -> ShardResult<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ShardError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let rules = RuleConfig::from_toml(&content)?;
        debug!(path = %path.display(), "loaded rule configuration");
        Ok(Self { path, rules })
    }

    /// Resolve the rules with the built-in algorithms.
    pub fn rule_set(&self) -> ShardResult<RuleSet> {
        self.rule_set_with(&AlgorithmRegistry::default())
    }

    pub fn rule_set_with(&self, registry: &AlgorithmRegistry) -> ShardResult<RuleSet> {
        RuleSet::from_config(&self.rules, registry)
    }

    pub fn runtime(&self) -> ShardResult<ShardingRuntime> {
        Ok(ShardingRuntime::new(self.rule_set()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let path = ShardConfig::locate(Some(Path::new("/etc/qail/shard.toml"))).unwrap();
        assert_eq!(path, PathBuf::from("/etc/qail/shard.toml"));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("qail-shard-{}.toml", std::process::id()));
        std::fs::write(&path, "data_sources = [\"ds_0\"]\n").unwrap();
        let config = ShardConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.rules.data_sources, vec!["ds_0".to_string()]);
        assert_eq!(config.rule_set().unwrap().data_sources(), ["ds_0"]);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = ShardConfig::from_file("/nonexistent/qail/shard.toml").unwrap_err();
        assert!(matches!(err, ShardError::Config(_)));
    }
}
