//! Error types for qail-shard.

use thiserror::Error;

/// The main error type for routing, rewriting and merging.
#[derive(Debug, Error)]
pub enum ShardError {
    /// A sharding value could not be resolved for a table that requires it.
    #[error("Ambiguous sharding condition on '{table}': {reason}")]
    AmbiguousCondition { table: String, reason: String },

    /// A DML statement matched no data node.
    #[error("No matching shard for table '{0}'")]
    NoMatchingShard(String),

    /// Cross-shard join between tables without a declared binding.
    #[error("Unsupported route between '{left}' and '{right}': {reason}")]
    UnsupportedRoute {
        left: String,
        right: String,
        reason: String,
    },

    /// The statement cannot be rewritten safely for its route.
    #[error("Rewrite failure: {0}")]
    RewriteFailure(String),

    /// A physical cursor reported a fetch error.
    #[error("Fetch from '{data_source}' failed: {message}")]
    ShardFetchFailure {
        data_source: String,
        message: String,
    },

    /// A placeholder references a parameter that was not bound.
    #[error("Parameter ${index} is not bound ({bound} parameters supplied)")]
    MissingParameter { index: usize, bound: usize },

    /// A value could not be coerced to the type an algorithm requires.
    #[error("Cannot coerce {value} to {target}")]
    TypeCoercion { value: String, target: &'static str },

    /// No algorithm registered under the configured type name.
    #[error("Unknown {kind} algorithm type '{name}'")]
    UnknownAlgorithm { kind: &'static str, name: String },

    /// Algorithm properties are missing or invalid.
    #[error("Invalid {kind} algorithm configuration: {message}")]
    AlgorithmConfig { kind: &'static str, message: String },

    /// Failed to parse or evaluate an inline expression.
    #[error("Inline expression error at position {position}: {message}")]
    InlineExpression { position: usize, message: String },

    /// Routing failed for a reason other than a missing shard.
    #[error("Routing error: {0}")]
    Route(String),

    /// Rule configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML decoding error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ShardError {
    /// Create an ambiguous condition error.
    pub fn ambiguous(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AmbiguousCondition {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Create an unsupported route error for a table pair.
    pub fn unsupported_route(
        left: impl Into<String>,
        right: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnsupportedRoute {
            left: left.into(),
            right: right.into(),
            reason: reason.into(),
        }
    }

    /// Create a rewrite failure.
    pub fn rewrite(message: impl Into<String>) -> Self {
        Self::RewriteFailure(message.into())
    }

    /// Create a shard fetch failure.
    pub fn fetch(data_source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ShardFetchFailure {
            data_source: data_source.into(),
            message: message.into(),
        }
    }

    /// Create a type coercion error.
    pub fn coercion(value: impl std::fmt::Display, target: &'static str) -> Self {
        Self::TypeCoercion {
            value: value.to_string(),
            target,
        }
    }

    /// Create an algorithm configuration error.
    pub fn algorithm(kind: &'static str, message: impl Into<String>) -> Self {
        Self::AlgorithmConfig {
            kind,
            message: message.into(),
        }
    }

    /// Create an inline expression error at the given position.
    pub fn inline(position: usize, message: impl Into<String>) -> Self {
        Self::InlineExpression {
            position,
            message: message.into(),
        }
    }

    /// Whether the statement must be aborted rather than degraded.
    ///
    /// Every kind is fatal except `NoMatchingShard`, which a read statement
    /// may treat as an empty result.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::NoMatchingShard(_))
    }
}

/// Result type alias for qail-shard operations.
pub type ShardResult<T> = Result<T, ShardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ShardError::unsupported_route("t_order", "t_user", "no binding declared");
        assert_eq!(
            err.to_string(),
            "Unsupported route between 't_order' and 't_user': no binding declared"
        );
    }

    #[test]
    fn test_missing_parameter_display() {
        let err = ShardError::MissingParameter { index: 3, bound: 2 };
        assert_eq!(
            err.to_string(),
            "Parameter $3 is not bound (2 parameters supplied)"
        );
    }

    #[test]
    fn test_fatality() {
        assert!(!ShardError::NoMatchingShard("t_order".into()).is_fatal());
        assert!(ShardError::rewrite("HAVING").is_fatal());
    }
}
