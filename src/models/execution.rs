use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SqlErrorType;

/// A single result row, normalised to a uniform shape regardless of the
/// executor's native row representation (spec.md §4.4).
pub type Row = Vec<serde_json::Value>;

/// Outcome of executing one SQL statement against a target database.
///
/// Invariant: `is_successful` holds iff `error_text` is empty and no
/// timeout fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlExecutionResult {
    pub sql: String,
    pub rows: Vec<Row>,
    pub error_text: String,
    pub exception_class: Option<String>,
    pub execution_time_seconds: f64,
    pub is_successful: bool,
}

impl SqlExecutionResult {
    pub fn success(sql: impl Into<String>, rows: Vec<Row>, execution_time_seconds: f64) -> Self {
        Self {
            sql: sql.into(),
            rows,
            error_text: String::new(),
            exception_class: None,
            execution_time_seconds,
            is_successful: true,
        }
    }

    pub fn failure(
        sql: impl Into<String>,
        error_text: impl Into<String>,
        exception_class: Option<String>,
        execution_time_seconds: f64,
    ) -> Self {
        Self {
            sql: sql.into(),
            rows: Vec::new(),
            error_text: error_text.into(),
            exception_class,
            execution_time_seconds,
            is_successful: false,
        }
    }
}

/// One refiner failure, appended to `Message::error_history` and consumed
/// by the decomposer on retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub attempt_number: u32,
    pub failed_sql: String,
    pub error_message: String,
    pub error_type: SqlErrorType,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_failure_invariant_holds() {
        let ok = SqlExecutionResult::success("SELECT 1", vec![], 0.01);
        assert!(ok.is_successful);
        assert!(ok.error_text.is_empty());

        let err = SqlExecutionResult::failure("SELECT 1", "boom", None, 0.01);
        assert!(!err.is_successful);
        assert!(!err.error_text.is_empty());
    }
}
