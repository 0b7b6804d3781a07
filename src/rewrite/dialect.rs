//! Dialect-specific identifier quoting and placeholders.

use serde::{Deserialize, Serialize};

use crate::ast::Value;

/// SQL reserved words that must be quoted when used as identifiers.
pub const RESERVED_WORDS: &[&str] = &[
    "order",
    "group",
    "user",
    "table",
    "select",
    "from",
    "where",
    "join",
    "left",
    "right",
    "inner",
    "outer",
    "on",
    "and",
    "or",
    "not",
    "null",
    "true",
    "false",
    "limit",
    "offset",
    "as",
    "in",
    "is",
    "like",
    "between",
    "having",
    "union",
    "all",
    "distinct",
    "case",
    "when",
    "then",
    "else",
    "end",
    "insert",
    "update",
    "delete",
    "index",
    "key",
    "primary",
    "default",
    "check",
    "count",
];

/// Whether an identifier must be quoted to survive as written.
pub fn needs_quoting(name: &str) -> bool {
    let lower = name.to_lowercase();
    RESERVED_WORDS.contains(&lower.as_str())
        || name.chars().any(|c| !c.is_alphanumeric() && c != '_')
        || name.chars().next().map(|c| c.is_numeric()).unwrap_or(false)
}

/// Target SQL dialect of the physical data sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
    MySql,
}

impl Dialect {
    pub fn generator(&self) -> Box<dyn SqlGenerator> {
        match self {
            Dialect::Postgres => Box::new(PostgresGenerator),
            Dialect::MySql => Box::new(MysqlGenerator),
        }
    }
}

/// Trait for dialect-specific SQL generation.
pub trait SqlGenerator: Send + Sync {
    /// Quote an identifier (table or column name) when needed.
    fn quote_identifier(&self, name: &str) -> String;
    /// Parameter placeholder for a 1-based index.
    fn placeholder(&self, index: usize) -> String;
    /// Inline literal.
    fn literal(&self, value: &Value) -> String {
        value.to_string()
    }
}

pub struct PostgresGenerator;

impl SqlGenerator for PostgresGenerator {
    fn quote_identifier(&self, name: &str) -> String {
        if needs_quoting(name) {
            format!("\"{}\"", name.replace('"', "\"\""))
        } else {
            name.to_string()
        }
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Bytes(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                format!("'\\x{}'", hex)
            }
            other => other.to_string(),
        }
    }
}

pub struct MysqlGenerator;

impl SqlGenerator for MysqlGenerator {
    fn quote_identifier(&self, name: &str) -> String {
        if needs_quoting(name) {
            format!("`{}`", name.replace('`', "``"))
        } else {
            name.to_string()
        }
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''")),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quotes_only_when_needed() {
        let pg = Dialect::Postgres.generator();
        assert_eq!(pg.quote_identifier("t_order_1"), "t_order_1");
        assert_eq!(pg.quote_identifier("order"), "\"order\"");
        assert_eq!(pg.quote_identifier("1st"), "\"1st\"");
        let my = Dialect::MySql.generator();
        assert_eq!(my.quote_identifier("user"), "`user`");
        assert_eq!(my.quote_identifier("a`b"), "`a``b`");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::Postgres.generator().placeholder(3), "$3");
        assert_eq!(Dialect::MySql.generator().placeholder(3), "?");
    }

    #[test]
    fn test_literals() {
        let bytes = Value::Bytes(vec![0xde, 0xad]);
        assert_eq!(Dialect::Postgres.generator().literal(&bytes), "'\\xdead'");
        assert_eq!(Dialect::MySql.generator().literal(&bytes), "X'dead'");
        assert_eq!(
            Dialect::MySql.generator().literal(&Value::from("a\\b'c")),
            "'a\\\\b''c'"
        );
    }
}
