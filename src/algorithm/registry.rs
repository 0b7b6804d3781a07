use std::collections::HashMap;
use std::sync::Arc;

use super::*;
use crate::error::{ShardError, ShardResult};

/// Constructor of an algorithm from its properties.
pub type Factory<T> = fn(&Props) -> ShardResult<Arc<T>>;

/// Algorithm constructors keyed by upper-case type name.
///
/// `AlgorithmRegistry::default()` carries every built-in type; custom
/// types are added with the `register_*` methods before building a rule set.
#[derive(Clone)]
pub struct AlgorithmRegistry {
    sharding: HashMap<String, Factory<dyn ShardingAlgorithm>>,
    load_balance: HashMap<String, Factory<dyn LoadBalanceAlgorithm>>,
    encrypt: HashMap<String, Factory<dyn EncryptAlgorithm>>,
    shadow: HashMap<String, Factory<dyn ShadowAlgorithm>>,
    key_generate: HashMap<String, Factory<dyn KeyGenerateAlgorithm>>,
}

impl AlgorithmRegistry {
    /// A registry without any algorithm type.
    pub fn empty() -> Self {
        Self {
            sharding: HashMap::new(),
            load_balance: HashMap::new(),
            encrypt: HashMap::new(),
            shadow: HashMap::new(),
            key_generate: HashMap::new(),
        }
    }

    pub fn register_sharding(&mut self, name: &str, factory: Factory<dyn ShardingAlgorithm>) {
        self.sharding.insert(name.to_ascii_uppercase(), factory);
    }

    pub fn register_load_balance(&mut self, name: &str, factory: Factory<dyn LoadBalanceAlgorithm>) {
        self.load_balance.insert(name.to_ascii_uppercase(), factory);
    }

    pub fn register_encrypt(&mut self, name: &str, factory: Factory<dyn EncryptAlgorithm>) {
        self.encrypt.insert(name.to_ascii_uppercase(), factory);
    }

    pub fn register_shadow(&mut self, name: &str, factory: Factory<dyn ShadowAlgorithm>) {
        self.shadow.insert(name.to_ascii_uppercase(), factory);
    }

    pub fn register_key_generate(&mut self, name: &str, factory: Factory<dyn KeyGenerateAlgorithm>) {
        self.key_generate.insert(name.to_ascii_uppercase(), factory);
    }

    pub fn sharding(&self, type_name: &str, props: &Props) -> ShardResult<Arc<dyn ShardingAlgorithm>> {
        create(&self.sharding, "sharding", type_name, props)
    }

    pub fn load_balance(
        &self,
        type_name: &str,
        props: &Props,
    ) -> ShardResult<Arc<dyn LoadBalanceAlgorithm>> {
        create(&self.load_balance, "load balance", type_name, props)
    }

    pub fn encrypt(&self, type_name: &str, props: &Props) -> ShardResult<Arc<dyn EncryptAlgorithm>> {
        create(&self.encrypt, "encrypt", type_name, props)
    }

    pub fn shadow(&self, type_name: &str, props: &Props) -> ShardResult<Arc<dyn ShadowAlgorithm>> {
        create(&self.shadow, "shadow", type_name, props)
    }

    pub fn key_generate(
        &self,
        type_name: &str,
        props: &Props,
    ) -> ShardResult<Arc<dyn KeyGenerateAlgorithm>> {
        create(&self.key_generate, "key generate", type_name, props)
    }
}

fn create<T: ?Sized>(
    factories: &HashMap<String, Factory<T>>,
    kind: &'static str,
    type_name: &str,
    props: &Props,
) -> ShardResult<Arc<T>> {
    let factory = factories
        .get(&type_name.to_ascii_uppercase())
        .ok_or_else(|| ShardError::UnknownAlgorithm {
            kind,
            name: type_name.to_string(),
        })?;
    factory(props)
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();

        registry.register_sharding("MOD", |p| Ok(Arc::new(ModSharding::new(p)?)));
        registry.register_sharding("HASH_MOD", |p| Ok(Arc::new(HashModSharding::new(p)?)));
        registry.register_sharding("BOUNDARY_RANGE", |p| Ok(Arc::new(BoundaryRangeSharding::new(p)?)));
        registry.register_sharding("VOLUME_RANGE", |p| Ok(Arc::new(VolumeRangeSharding::new(p)?)));
        registry.register_sharding("INLINE", |p| Ok(Arc::new(InlineSharding::new(p)?)));
        registry.register_sharding("INTERVAL", |p| Ok(Arc::new(IntervalSharding::new(p)?)));

        registry.register_load_balance("ROUND_ROBIN", |p| Ok(Arc::new(RoundRobinLoadBalancer::new(p)?)));
        registry.register_load_balance("RANDOM", |p| Ok(Arc::new(RandomLoadBalancer::new(p)?)));
        registry.register_load_balance("WEIGHT", |p| Ok(Arc::new(WeightLoadBalancer::new(p)?)));

        registry.register_encrypt("XOR_STREAM", |p| Ok(Arc::new(XorStreamEncryptor::new(p)?)));
        registry.register_encrypt("SHA256", |p| Ok(Arc::new(Sha256Encryptor::new(p)?)));

        registry.register_shadow("VALUE_MATCH", |p| Ok(Arc::new(ValueMatchShadow::new(p)?)));
        registry.register_shadow("REGEX_MATCH", |p| Ok(Arc::new(RegexMatchShadow::new(p)?)));
        registry.register_shadow("SQL_HINT", |p| Ok(Arc::new(SqlHintShadow::new(p)?)));

        registry.register_key_generate("SNOWFLAKE", |p| Ok(Arc::new(SnowflakeKeyGenerator::new(p)?)));
        registry.register_key_generate("UUID", |p| Ok(Arc::new(UuidKeyGenerator::new(p)?)));

        registry
    }
}

impl std::fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |map: Vec<&String>| {
            let mut v: Vec<String> = map.into_iter().cloned().collect();
            v.sort();
            v
        };
        f.debug_struct("AlgorithmRegistry")
            .field("sharding", &names(self.sharding.keys().collect()))
            .field("load_balance", &names(self.load_balance.keys().collect()))
            .field("encrypt", &names(self.encrypt.keys().collect()))
            .field("shadow", &names(self.shadow.keys().collect()))
            .field("key_generate", &names(self.key_generate.keys().collect()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Value;

    #[derive(Debug)]
    struct Fixed;

    impl ShardingAlgorithm for Fixed {
        fn compute(&self, candidates: &[String], _value: &ShardingValue<'_>) -> ShardResult<Vec<String>> {
            Ok(candidates.iter().take(1).cloned().collect())
        }
    }

    #[test]
    fn test_type_names_are_case_insensitive() {
        let registry = AlgorithmRegistry::default();
        let props: Props = serde_json::from_value(serde_json::json!({"sharding_count": 2})).unwrap();
        assert!(registry.sharding("mod", &props).is_ok());
    }

    #[test]
    fn test_unknown_type() {
        let registry = AlgorithmRegistry::default();
        let err = registry.sharding("CONSISTENT_HASH", &Props::new()).unwrap_err();
        assert!(matches!(err, ShardError::UnknownAlgorithm { kind: "sharding", .. }));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = AlgorithmRegistry::empty();
        registry.register_sharding("FIXED", |_| Ok(Arc::new(Fixed)));
        let algo = registry.sharding("fixed", &Props::new()).unwrap();
        let candidates = vec!["a".to_string(), "b".to_string()];
        let values = [Value::Int(1)];
        let picked = algo
            .compute(&candidates, &ShardingValue::Exact { column: "id", values: &values })
            .unwrap();
        assert_eq!(picked, vec!["a"]);
    }
}
