//! Target SQL engines are external collaborators, abstracted as query
//! executors (spec.md §1, §6): `introspect` resolves a database's schema,
//! `execute` runs one statement under a caller-supplied timeout. Adapter
//! implementations may target any engine; the core is engine-agnostic.

mod composite;
mod fake;
mod json_schema;
mod sqlx_executor;

pub use composite::CompositeExecutor;
pub use fake::FakeExecutor;
pub use json_schema::JsonSchemaSource;
pub use sqlx_executor::{DatabaseTarget, SqlxExecutor};

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::models::{DatabaseInfo, DatabaseStats, SqlExecutionResult};

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn introspect(&self, database_id: &str) -> CoreResult<(DatabaseInfo, DatabaseStats)>;

    async fn execute(&self, database_id: &str, sql: &str, timeout_s: u64) -> CoreResult<SqlExecutionResult>;
}
