//! Session parameters and the `alter session` statements that change them.

use serde_json::Value;
use std::fmt;

/// Names of session parameters used by the driver and its tests.
pub struct SessionParameter;

impl SessionParameter {
    /// Server-side fix for duplicate execution after a post-compilation retry.
    pub const ENABLE_FIX_225928: &'static str = "ENABLE_FIX_225928";
    /// Allow the server to retry queries.
    pub const ENABLE_QUERY_RETRIES: &'static str = "ENABLE_QUERY_RETRIES";
    /// Compile and describe in one job on the server.
    pub const ENABLE_COMBINED_DESCRIBE: &'static str = "ENABLE_COMBINED_DESCRIBE";
    /// Client-side switch: executes reuse the described job.
    pub const JDBC_ENABLE_COMBINED_DESCRIBE: &'static str = "JDBC_ENABLE_COMBINED_DESCRIBE";
    /// Allow retries of queries issued by the service itself.
    pub const QUERY_RETRY_ALLOW_SNOWFLAKE_QUERIES: &'static str =
        "QUERY_RETRY_ALLOW_SNOWFLAKE_QUERIES";
    /// Server retry budget.
    pub const QUERY_RETRY_MAX_ATTEMPTS: &'static str = "QUERY_RETRY_MAX_ATTEMPTS";
    /// Fault-injection directives, as a JSON array.
    pub const GS_FAULT_INJECTION: &'static str = "GS_FAULT_INJECTION";
}

/// Value of a session parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl ParameterValue {
    /// Interpret a parameter value echoed by the server.
    ///
    /// Returns `None` for JSON `null`, which the server uses for unset
    /// parameters.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(ParameterValue::Bool(*b)),
            Value::Number(n) => Some(match n.as_i64() {
                Some(i) => ParameterValue::Integer(i),
                None => ParameterValue::Text(n.to_string()),
            }),
            Value::String(s) => Some(ParameterValue::Text(s.clone())),
            other => Some(ParameterValue::Text(other.to_string())),
        }
    }

    /// Truthiness as the server reads it; text values `true`/`false` count.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Bool(b) => Some(*b),
            ParameterValue::Integer(i) => Some(*i != 0),
            ParameterValue::Text(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
        }
    }

    /// Render as a SQL literal.
    ///
    /// Text is single-quoted. Backslashes are escapes inside such literals,
    /// so they are doubled along with the quotes.
    pub fn to_sql_literal(&self) -> String {
        match self {
            ParameterValue::Bool(b) => b.to_string(),
            ParameterValue::Integer(i) => i.to_string(),
            ParameterValue::Text(s) => {
                format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
            }
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Bool(b) => write!(f, "{}", b),
            ParameterValue::Integer(i) => write!(f, "{}", i),
            ParameterValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        ParameterValue::Bool(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        ParameterValue::Integer(value)
    }
}

impl From<i32> for ParameterValue {
    fn from(value: i32) -> Self {
        ParameterValue::Integer(value as i64)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::Text(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::Text(value)
    }
}

/// `alter session set NAME = value`
pub fn set_statement(name: &str, value: &ParameterValue) -> String {
    format!("alter session set {} = {}", name, value.to_sql_literal())
}

/// `alter session unset NAME`
pub fn unset_statement(name: &str) -> String {
    format!("alter session unset {}", name)
}
