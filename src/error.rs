use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for the query-resolution core.
///
/// A flat, stringly-detailed `thiserror` enum: every variant carries a
/// human-readable message rather than structured fields, since the
/// caller-facing contract (spec.md §7) is "a structured result containing
/// the error message", not a typed cause.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum CoreError {
    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    #[error("schema introspection failed: {0}")]
    IntrospectionFailed(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("LLM provider unavailable: {0}")]
    LlmUnavailable(String),

    #[error("selector agent failed: {0}")]
    SelectorFailed(String),

    #[error("decomposer agent failed: {0}")]
    DecomposerFailed(String),

    #[error("refiner agent failed: {0}")]
    RefinerFailed(String),

    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("execution timed out after {0}s")]
    ExecutionTimeout(u64),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("no SQL could be extracted from the model response")]
    EmptySql,

    #[error("decomposition response was malformed: {0}")]
    MalformedDecomposition(String),

    #[error("refiner received an empty SQL string")]
    NoSql,

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("LLM provider error: {0}")]
    LlmProviderError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("invalid configuration: {0}")]
    ConfigError(String),

    #[error("{0}")]
    Other(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::LlmProviderError(err.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::StorageError(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Closed taxonomy of repairable SQL execution faults (spec.md §3).
///
/// Distinct from [`CoreError`]: this classifies *why an executed query
/// failed* so the refiner/orchestrator can reason about retry strategy,
/// whereas `CoreError` reports faults escaping an agent boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlErrorType {
    SyntaxError,
    SchemaError,
    LogicError,
    ExecutionError,
    UnknownError,
}

impl std::fmt::Display for SqlErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SyntaxError => "syntax_error",
            Self::SchemaError => "schema_error",
            Self::LogicError => "logic_error",
            Self::ExecutionError => "execution_error",
            Self::UnknownError => "unknown_error",
        };
        write!(f, "{s}")
    }
}

impl SqlErrorType {
    /// Whether the orchestrator should route this failure back to the
    /// decomposer for another attempt rather than terminating immediately
    /// (spec.md §4.4, §7 — repeated execution-class failures, e.g.
    /// timeouts, are not repaired by regenerating SQL).
    pub fn is_repairable(&self) -> bool {
        !matches!(self, Self::ExecutionError)
    }
}

/// Classify a raw executor error message into the closed SQL error
/// taxonomy via string-pattern matching: cheap, regex-free substring
/// checks ordered from most to least specific.
pub fn classify_sql_error(message: &str) -> SqlErrorType {
    let lower = message.to_lowercase();

    if lower.contains("timeout") || lower.contains("timed out") {
        return SqlErrorType::ExecutionError;
    }
    if lower.contains("connection")
        || lower.contains("permission denied")
        || lower.contains("access denied")
        || lower.contains("too many connections")
        || lower.contains("out of memory")
    {
        return SqlErrorType::ExecutionError;
    }
    if lower.contains("does not exist")
        || lower.contains("doesn't exist")
        || lower.contains("unknown column")
        || lower.contains("unknown table")
        || lower.contains("no such table")
        || lower.contains("no such column")
        || lower.contains("undefined column")
        || lower.contains("undefined table")
        || lower.contains("foreign key constraint")
        || lower.contains("violates foreign key")
    {
        return SqlErrorType::SchemaError;
    }
    if lower.contains("group by")
        || lower.contains("having")
        || lower.contains("aggregate")
        || lower.contains("not a group by expression")
        || lower.contains("must appear in the group by clause")
    {
        return SqlErrorType::LogicError;
    }
    if lower.contains("syntax error")
        || lower.contains("parse error")
        || lower.contains("unexpected token")
        || lower.contains("near \"")
    {
        return SqlErrorType::SyntaxError;
    }

    SqlErrorType::UnknownError
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_schema_errors() {
        assert_eq!(
            classify_sql_error("relation \"user\" does not exist"),
            SqlErrorType::SchemaError
        );
        assert_eq!(
            classify_sql_error("Unknown column 'foo' in 'field list'"),
            SqlErrorType::SchemaError
        );
    }

    #[test]
    fn classifies_syntax_errors() {
        assert_eq!(
            classify_sql_error("syntax error at or near \"FORM\""),
            SqlErrorType::SyntaxError
        );
    }

    #[test]
    fn classifies_logic_errors() {
        assert_eq!(
            classify_sql_error("column \"id\" must appear in the GROUP BY clause"),
            SqlErrorType::LogicError
        );
    }

    #[test]
    fn classifies_execution_errors_as_unrepairable() {
        let t = classify_sql_error("connection timeout after 120s");
        assert_eq!(t, SqlErrorType::ExecutionError);
        assert!(!t.is_repairable());
    }

    #[test]
    fn falls_through_to_unknown() {
        assert_eq!(classify_sql_error("something weird happened"), SqlErrorType::UnknownError);
    }
}
