use std::collections::BTreeMap;

use serde_json::Value as Json;

use crate::error::{ShardError, ShardResult};

/// Free-form algorithm properties as written in the rule configuration.
pub type Props = BTreeMap<String, Json>;

pub(crate) fn optional_i64(props: &Props, key: &str, kind: &'static str) -> ShardResult<Option<i64>> {
    match props.get(key) {
        None => Ok(None),
        Some(Json::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| ShardError::algorithm(kind, format!("'{}' must be an integer", key))),
        Some(Json::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ShardError::algorithm(kind, format!("'{}' must be an integer, got '{}'", key, s))),
        Some(other) => Err(ShardError::algorithm(
            kind,
            format!("'{}' must be an integer, got {}", key, other),
        )),
    }
}

pub(crate) fn required_i64(props: &Props, key: &str, kind: &'static str) -> ShardResult<i64> {
    optional_i64(props, key, kind)?.ok_or_else(|| missing(key, kind))
}

/// Integer property that must be strictly positive.
pub(crate) fn positive_i64(props: &Props, key: &str, kind: &'static str) -> ShardResult<i64> {
    let n = required_i64(props, key, kind)?;
    if n <= 0 {
        return Err(ShardError::algorithm(kind, format!("'{}' must be positive, got {}", key, n)));
    }
    Ok(n)
}

pub(crate) fn optional_str(props: &Props, key: &str, kind: &'static str) -> ShardResult<Option<String>> {
    match props.get(key) {
        None => Ok(None),
        Some(Json::String(s)) => Ok(Some(s.clone())),
        Some(Json::Number(n)) => Ok(Some(n.to_string())),
        Some(Json::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(ShardError::algorithm(
            kind,
            format!("'{}' must be a string, got {}", key, other),
        )),
    }
}

pub(crate) fn required_str(props: &Props, key: &str, kind: &'static str) -> ShardResult<String> {
    optional_str(props, key, kind)?.ok_or_else(|| missing(key, kind))
}

/// Integer list given either as an array or as a comma-separated string.
pub(crate) fn i64_list(props: &Props, key: &str, kind: &'static str) -> ShardResult<Vec<i64>> {
    let invalid = || ShardError::algorithm(kind, format!("'{}' must be a list of integers", key));
    match props.get(key) {
        None => Err(missing(key, kind)),
        Some(Json::Array(items)) => items.iter().map(|v| v.as_i64().ok_or_else(invalid)).collect(),
        Some(Json::String(s)) => s
            .split(',')
            .map(|part| part.trim().parse().map_err(|_| invalid()))
            .collect(),
        Some(_) => Err(invalid()),
    }
}

fn missing(key: &str, kind: &'static str) -> ShardError {
    ShardError::algorithm(kind, format!("missing property '{}'", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Json) -> Props {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_integer_from_string_or_number() {
        let p = props(json!({"a": 3, "b": " 4 ", "c": "x"}));
        assert_eq!(required_i64(&p, "a", "sharding").unwrap(), 3);
        assert_eq!(required_i64(&p, "b", "sharding").unwrap(), 4);
        assert!(required_i64(&p, "c", "sharding").is_err());
        assert!(matches!(
            required_i64(&p, "d", "sharding"),
            Err(ShardError::AlgorithmConfig { kind: "sharding", .. })
        ));
    }

    #[test]
    fn test_integer_list_forms() {
        let p = props(json!({"a": [100, 200], "b": "100, 200"}));
        assert_eq!(i64_list(&p, "a", "sharding").unwrap(), vec![100, 200]);
        assert_eq!(i64_list(&p, "b", "sharding").unwrap(), vec![100, 200]);
    }

    #[test]
    fn test_positive() {
        let p = props(json!({"n": 0}));
        assert!(positive_i64(&p, "n", "sharding").is_err());
    }
}
