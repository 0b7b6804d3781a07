use regex::Regex;

use super::props::{self, Props};
use super::{ShadowAlgorithm, ShadowValue};
use crate::context::SqlKind;
use crate::error::{ShardError, ShardResult};

const KIND: &str = "shadow";

fn operation(props: &Props) -> ShardResult<SqlKind> {
    let op = props::required_str(props, "operation", KIND)?;
    match op.to_ascii_lowercase().as_str() {
        "select" => Ok(SqlKind::Select),
        "insert" => Ok(SqlKind::Insert),
        "update" => Ok(SqlKind::Update),
        "delete" => Ok(SqlKind::Delete),
        _ => Err(ShardError::algorithm(KIND, format!("unknown operation '{}'", op))),
    }
}

/// Column value equal to the configured one.
#[derive(Debug)]
pub struct ValueMatchShadow {
    operation: SqlKind,
    column: String,
    value: String,
}

impl ValueMatchShadow {
    pub fn new(props: &Props) -> ShardResult<Self> {
        Ok(Self {
            operation: operation(props)?,
            column: props::required_str(props, "column", KIND)?,
            value: props::required_str(props, "value", KIND)?,
        })
    }
}

impl ShadowAlgorithm for ValueMatchShadow {
    fn is_shadow(&self, value: &ShadowValue<'_>) -> bool {
        match value {
            ShadowValue::Column {
                operation,
                column,
                value,
                ..
            } => {
                *operation == self.operation
                    && column.eq_ignore_ascii_case(&self.column)
                    && value.to_plain_string() == self.value
            }
            ShadowValue::Hint(_) => false,
        }
    }
}

/// Column value matching a regular expression.
#[derive(Debug)]
pub struct RegexMatchShadow {
    operation: SqlKind,
    column: String,
    regex: Regex,
}

impl RegexMatchShadow {
    pub fn new(props: &Props) -> ShardResult<Self> {
        let pattern = props::required_str(props, "regex", KIND)?;
        let regex = Regex::new(&pattern)
            .map_err(|e| ShardError::algorithm(KIND, format!("invalid regex '{}': {}", pattern, e)))?;
        Ok(Self {
            operation: operation(props)?,
            column: props::required_str(props, "column", KIND)?,
            regex,
        })
    }
}

impl ShadowAlgorithm for RegexMatchShadow {
    fn is_shadow(&self, value: &ShadowValue<'_>) -> bool {
        match value {
            ShadowValue::Column {
                operation,
                column,
                value,
                ..
            } => {
                *operation == self.operation
                    && column.eq_ignore_ascii_case(&self.column)
                    && self.regex.is_match(&value.to_plain_string())
            }
            ShadowValue::Hint(_) => false,
        }
    }
}

/// Statement carries the `shadow` hint.
#[derive(Debug, Default)]
pub struct SqlHintShadow;

impl SqlHintShadow {
    pub fn new(_props: &Props) -> ShardResult<Self> {
        Ok(Self)
    }
}

impl ShadowAlgorithm for SqlHintShadow {
    fn is_shadow(&self, value: &ShadowValue<'_>) -> bool {
        matches!(value, ShadowValue::Hint(hints) if hints.shadow)
    }
}
