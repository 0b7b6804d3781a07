use std::collections::HashMap;
use std::sync::Mutex;

use rand::Rng;

use super::LoadBalanceAlgorithm;
use super::props::Props;
use crate::error::{ShardError, ShardResult};

fn no_replica(group: &str) -> ShardError {
    ShardError::Route(format!("no available read data source in group '{}'", group))
}

/// Cycles through the replicas of each group.
#[derive(Debug, Default)]
pub struct RoundRobinLoadBalancer {
    counters: Mutex<HashMap<String, usize>>,
}

impl RoundRobinLoadBalancer {
    pub fn new(_props: &Props) -> ShardResult<Self> {
        Ok(Self::default())
    }
}

impl LoadBalanceAlgorithm for RoundRobinLoadBalancer {
    fn select(&self, group: &str, replicas: &[String]) -> ShardResult<String> {
        if replicas.is_empty() {
            return Err(no_replica(group));
        }
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let counter = counters.entry(group.to_string()).or_insert(0);
        let picked = replicas[*counter % replicas.len()].clone();
        *counter = counter.wrapping_add(1);
        Ok(picked)
    }
}

/// Uniformly random replica.
#[derive(Debug, Default)]
pub struct RandomLoadBalancer;

impl RandomLoadBalancer {
    pub fn new(_props: &Props) -> ShardResult<Self> {
        Ok(Self)
    }
}

impl LoadBalanceAlgorithm for RandomLoadBalancer {
    fn select(&self, group: &str, replicas: &[String]) -> ShardResult<String> {
        if replicas.is_empty() {
            return Err(no_replica(group));
        }
        let idx = rand::rng().random_range(0..replicas.len());
        Ok(replicas[idx].clone())
    }
}

/// Random replica weighted by the per-replica weights in the properties.
#[derive(Debug)]
pub struct WeightLoadBalancer {
    weights: HashMap<String, f64>,
}

impl WeightLoadBalancer {
    pub fn new(props: &Props) -> ShardResult<Self> {
        let mut weights = HashMap::new();
        for (replica, weight) in props {
            let w = weight
                .as_f64()
                .or_else(|| weight.as_str().and_then(|s| s.trim().parse().ok()))
                .filter(|w: &f64| w.is_finite() && *w >= 0.0)
                .ok_or_else(|| {
                    ShardError::algorithm(
                        "load balance",
                        format!("weight of '{}' must be a non-negative number", replica),
                    )
                })?;
            weights.insert(replica.clone(), w);
        }
        if weights.is_empty() {
            return Err(ShardError::algorithm("load balance", "no replica weights configured"));
        }
        Ok(Self { weights })
    }
}

impl LoadBalanceAlgorithm for WeightLoadBalancer {
    fn select(&self, group: &str, replicas: &[String]) -> ShardResult<String> {
        let mut weighted = Vec::with_capacity(replicas.len());
        for replica in replicas {
            let w = self.weights.get(replica).copied().ok_or_else(|| {
                ShardError::algorithm(
                    "load balance",
                    format!("no weight configured for replica '{}'", replica),
                )
            })?;
            if w > 0.0 {
                weighted.push((replica, w));
            }
        }
        let total: f64 = weighted.iter().map(|(_, w)| w).sum();
        if weighted.is_empty() || total <= 0.0 {
            return Err(no_replica(group));
        }
        let mut point = rand::rng().random::<f64>() * total;
        for (replica, w) in &weighted {
            if point < *w {
                return Ok((*replica).clone());
            }
            point -= w;
        }
        // Rounding can leave the point just past the last weight.
        Ok(weighted[weighted.len() - 1].0.clone())
    }
}
