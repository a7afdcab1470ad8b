use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{CoreError, CoreResult};
use crate::models::{DatabaseInfo, DatabaseStats, SqlExecutionResult};

use super::QueryExecutor;

/// In-process fake executor driven entirely by scripted data, used by
/// agent and orchestrator tests (spec.md §1 treats the executor as an
/// external collaborator with a documented interface — this is the "fake
/// adapter" half of that contract).
#[derive(Default)]
pub struct FakeExecutor {
    schemas: Mutex<HashMap<String, DatabaseInfo>>,
    /// Scripted `execute` outcomes, keyed by exact SQL string. Anything
    /// not found here is treated as success with zero rows.
    outcomes: Mutex<HashMap<String, SqlExecutionResult>>,
    /// SQL strings that should surface as a hard `Err` (e.g. a timeout)
    /// rather than an `Ok(SqlExecutionResult::failure(..))`, mirroring how
    /// `SqlxExecutor` propagates its 120s hard cap (spec.md §4.4).
    hard_errors: Mutex<HashMap<String, CoreError>>,
    /// When set, every `execute` call not otherwise scripted fails with
    /// this message regardless of the SQL text.
    fail_message: Mutex<Option<String>>,
    /// When set, exactly the *next* `execute` call not otherwise scripted
    /// fails with this message; it is cleared after firing once, so a
    /// subsequent retry with different SQL succeeds.
    fail_once: Mutex<Option<String>>,
    pub execute_calls: Mutex<Vec<String>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(self, database_id: impl Into<String>, info: DatabaseInfo) -> Self {
        self.schemas.lock().expect("lock").insert(database_id.into(), info);
        self
    }

    /// An executor whose `execute` calls always succeed, unused scripting
    /// aside — named for readability at call sites that want a plain
    /// "everything works" double.
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// An executor whose every `execute` call fails with `message`,
    /// regardless of the SQL text — useful for exercising a refiner's
    /// repair-attempt exhaustion.
    pub fn always_failing(message: impl Into<String>) -> Self {
        let executor = Self::default();
        *executor.fail_message.lock().expect("lock") = Some(message.into());
        executor
    }

    /// An executor whose first `execute` call fails with `message`; every
    /// later call (e.g. a refiner's retry with repaired SQL) succeeds.
    pub fn failing_then_succeeding(message: impl Into<String>) -> Self {
        let executor = Self::default();
        *executor.fail_once.lock().expect("lock") = Some(message.into());
        executor
    }

    pub fn script_outcome(&self, sql: impl Into<String>, outcome: SqlExecutionResult) {
        self.outcomes.lock().expect("lock").insert(sql.into(), outcome);
    }

    pub fn script_hard_error(&self, sql: impl Into<String>, error: CoreError) {
        self.hard_errors.lock().expect("lock").insert(sql.into(), error);
    }
}

#[async_trait]
impl QueryExecutor for FakeExecutor {
    async fn introspect(&self, database_id: &str) -> CoreResult<(DatabaseInfo, DatabaseStats)> {
        let schemas = self.schemas.lock().expect("lock");
        let info = schemas
            .get(database_id)
            .cloned()
            .ok_or_else(|| CoreError::DatabaseNotFound(database_id.to_string()))?;
        let stats = info.stats();
        Ok((info, stats))
    }

    async fn execute(&self, _database_id: &str, sql: &str, _timeout_s: u64) -> CoreResult<SqlExecutionResult> {
        self.execute_calls.lock().expect("lock").push(sql.to_string());
        if let Some(error) = self.hard_errors.lock().expect("lock").get(sql).cloned() {
            return Err(error);
        }
        if let Some(outcome) = self.outcomes.lock().expect("lock").get(sql).cloned() {
            return Ok(outcome);
        }
        if let Some(message) = self.fail_once.lock().expect("lock").take() {
            return Ok(SqlExecutionResult::failure(sql, message, None, 0.001));
        }
        if let Some(message) = self.fail_message.lock().expect("lock").clone() {
            return Ok(SqlExecutionResult::failure(sql, message, None, 0.001));
        }
        Ok(SqlExecutionResult::success(sql, Vec::new(), 0.001))
    }
}
