use std::sync::Arc;

use async_trait::async_trait;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::error::{CoreError, CoreResult};
use crate::models::{DatabaseInfo, DatabaseStats, SqlExecutionResult};

use super::{JsonSchemaSource, QueryExecutor};

/// The executor the orchestrator is actually constructed with: a live
/// engine adapter when one is provided, falling back to a pre-exported
/// JSON schema for introspection and a syntax-only "development mode"
/// stand-in for execution otherwise (spec.md §4.2, §4.4).
pub struct CompositeExecutor {
    live: Option<Arc<dyn QueryExecutor>>,
    json_fallback: Option<JsonSchemaSource>,
}

impl CompositeExecutor {
    pub fn new(live: Option<Arc<dyn QueryExecutor>>, json_fallback: Option<JsonSchemaSource>) -> Self {
        Self { live, json_fallback }
    }

    pub fn live_only(live: Arc<dyn QueryExecutor>) -> Self {
        Self::new(Some(live), None)
    }
}

#[async_trait]
impl QueryExecutor for CompositeExecutor {
    async fn introspect(&self, database_id: &str) -> CoreResult<(DatabaseInfo, DatabaseStats)> {
        if let Some(live) = &self.live {
            match live.introspect(database_id).await {
                Ok(result) => return Ok(result),
                Err(e) if self.json_fallback.is_some() => {
                    tracing::warn!(database_id, error = %e, "live introspection failed, falling back to exported schema");
                }
                Err(e) => return Err(e),
            }
        }

        let fallback = self
            .json_fallback
            .as_ref()
            .ok_or_else(|| CoreError::DatabaseNotFound(database_id.to_string()))?;
        let info = fallback.load(database_id)?;
        let stats = info.stats();
        Ok((info, stats))
    }

    async fn execute(&self, database_id: &str, sql: &str, timeout_s: u64) -> CoreResult<SqlExecutionResult> {
        if let Some(live) = &self.live {
            return live.execute(database_id, sql, timeout_s).await;
        }

        // Development-mode stand-in: no engine is wired up, so we can only
        // confirm the statement parses and report an (empty) success.
        // This keeps the refiner's contract ("execute and report success
        // or a classified error") satisfiable without a real database.
        let started = std::time::Instant::now();
        match Parser::parse_sql(&GenericDialect {}, sql) {
            Ok(_) => Ok(SqlExecutionResult::success(sql, Vec::new(), started.elapsed().as_secs_f64())),
            Err(e) => Ok(SqlExecutionResult::failure(sql, format!("syntax error: {e}"), Some("ParserError".to_string()), started.elapsed().as_secs_f64())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dev_mode_accepts_well_formed_select() {
        let executor = CompositeExecutor::new(None, None);
        let result = executor.execute("shop", "SELECT * FROM schools", 5).await.unwrap();
        assert!(result.is_successful);
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn dev_mode_rejects_malformed_sql() {
        let executor = CompositeExecutor::new(None, None);
        let result = executor.execute("shop", "SELEKT * FORM schools", 5).await.unwrap();
        assert!(!result.is_successful);
    }

    #[tokio::test]
    async fn introspect_without_any_source_is_database_not_found() {
        let executor = CompositeExecutor::new(None, None);
        let err = executor.introspect("ghost").await.unwrap_err();
        assert!(matches!(err, CoreError::DatabaseNotFound(_)));
    }
}
