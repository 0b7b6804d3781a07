use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::config::ReadwriteSplittingConfig;
use crate::algorithm::{AlgorithmRegistry, LoadBalanceAlgorithm, RoundRobinLoadBalancer};
use crate::error::{ShardError, ShardResult};

/// One write data source with its replicas.
#[derive(Debug, Clone)]
pub struct ReadwriteGroup {
    pub name: String,
    pub write: String,
    pub reads: Vec<String>,
    pub disabled_reads: BTreeSet<String>,
    pub load_balancer: Arc<dyn LoadBalanceAlgorithm>,
}

impl ReadwriteGroup {
    /// Replicas that are not disabled, in declaration order.
    pub fn available_reads(&self) -> Vec<String> {
        self.reads
            .iter()
            .filter(|r| !self.disabled_reads.contains(*r))
            .cloned()
            .collect()
    }

    /// Pick a replica through the group's load balancer.
    pub fn select_read(&self) -> ShardResult<String> {
        let available = self.available_reads();
        if available.is_empty() {
            return Err(ShardError::Route(format!(
                "no available read data source in group '{}'",
                self.name
            )));
        }
        self.load_balancer.select(&self.name, &available)
    }
}

/// Read-write splitting groups keyed by logical data source name.
#[derive(Debug, Clone)]
pub struct ReadwriteSplittingRule {
    groups: BTreeMap<String, ReadwriteGroup>,
}

impl ReadwriteSplittingRule {
    pub fn from_config(config: &ReadwriteSplittingConfig, registry: &AlgorithmRegistry) -> ShardResult<Self> {
        let mut balancers = BTreeMap::new();
        for (name, algo) in &config.load_balancers {
            balancers.insert(name.as_str(), registry.load_balance(&algo.kind, &algo.props)?);
        }

        let mut groups = BTreeMap::new();
        for (name, group) in &config.groups {
            let load_balancer: Arc<dyn LoadBalanceAlgorithm> = match &group.load_balancer {
                Some(lb) => balancers.get(lb.as_str()).cloned().ok_or_else(|| {
                    ShardError::Config(format!(
                        "read-write group '{}' references undefined load balancer '{}'",
                        name, lb
                    ))
                })?,
                None => Arc::new(RoundRobinLoadBalancer::default()),
            };
            if let Some(unknown) = group.disabled_reads.iter().find(|d| !group.reads.contains(d)) {
                return Err(ShardError::Config(format!(
                    "read-write group '{}' disables unknown read data source '{}'",
                    name, unknown
                )));
            }
            groups.insert(
                name.clone(),
                ReadwriteGroup {
                    name: name.clone(),
                    write: group.write.clone(),
                    reads: group.reads.clone(),
                    disabled_reads: group.disabled_reads.iter().cloned().collect(),
                    load_balancer,
                },
            );
        }
        Ok(Self { groups })
    }

    pub fn group(&self, data_source: &str) -> Option<&ReadwriteGroup> {
        self.groups.get(data_source)
    }

    pub fn groups(&self) -> impl Iterator<Item = &ReadwriteGroup> {
        self.groups.values()
    }
}
