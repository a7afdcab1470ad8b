use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::{Column, MySqlPool, PgPool, Row as SqlxRow, TypeInfo};

use crate::error::{CoreError, CoreResult};
use crate::models::database::{ColumnDescription, ForeignKeyEdge, SampleColumnValues};
use crate::models::{DatabaseInfo, SqlExecutionResult};

use super::QueryExecutor;

/// A registered database's connection target. One `database_id` maps to
/// exactly one engine and connection string; registration happens once,
/// out of band from query processing (spec.md treats connection
/// provisioning as caller-owned configuration, not part of the
/// resolution core's hot path).
#[derive(Debug, Clone)]
pub enum DatabaseTarget {
    Postgres { url: String, schema: String },
    MySql { url: String, database: String },
}

/// [`QueryExecutor`] over live Postgres/MySQL engines: a pool-per-id
/// connection manager (tolerate-recompute init under concurrent first
/// access) with information_schema introspection and typed row conversion
/// to JSON.
pub struct SqlxExecutor {
    targets: Mutex<HashMap<String, DatabaseTarget>>,
    pg_pools: Mutex<HashMap<String, PgPool>>,
    mysql_pools: Mutex<HashMap<String, MySqlPool>>,
}

impl SqlxExecutor {
    pub fn new() -> Self {
        Self {
            targets: Mutex::new(HashMap::new()),
            pg_pools: Mutex::new(HashMap::new()),
            mysql_pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, database_id: impl Into<String>, target: DatabaseTarget) {
        self.targets
            .lock()
            .expect("targets lock")
            .insert(database_id.into(), target);
    }

    fn target(&self, database_id: &str) -> CoreResult<DatabaseTarget> {
        self.targets
            .lock()
            .expect("targets lock")
            .get(database_id)
            .cloned()
            .ok_or_else(|| CoreError::DatabaseNotFound(database_id.to_string()))
    }

    async fn pg_pool(&self, database_id: &str, url: &str) -> CoreResult<PgPool> {
        if let Some(pool) = self.pg_pools.lock().expect("pg pool lock").get(database_id) {
            return Ok(pool.clone());
        }
        let pool = PgPool::connect(url)
            .await
            .map_err(|e| CoreError::IntrospectionFailed(format!("postgres connect failed: {e}")))?;
        let mut pools = self.pg_pools.lock().expect("pg pool lock");
        Ok(match pools.entry(database_id.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => entry.insert(pool).clone(),
        })
    }

    async fn mysql_pool(&self, database_id: &str, url: &str) -> CoreResult<MySqlPool> {
        if let Some(pool) = self.mysql_pools.lock().expect("mysql pool lock").get(database_id) {
            return Ok(pool.clone());
        }
        let pool = MySqlPool::connect(url)
            .await
            .map_err(|e| CoreError::IntrospectionFailed(format!("mysql connect failed: {e}")))?;
        let mut pools = self.mysql_pools.lock().expect("mysql pool lock");
        Ok(match pools.entry(database_id.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => entry.insert(pool).clone(),
        })
    }

    async fn introspect_postgres(&self, database_id: &str, url: &str, schema: &str) -> CoreResult<DatabaseInfo> {
        let pool = self.pg_pool(database_id, url).await?;

        let tables_query = r#"
            SELECT table_name FROM information_schema.tables
            WHERE table_schema = $1 AND table_type = 'BASE TABLE'
            ORDER BY table_name
        "#;
        let table_rows = sqlx::query(tables_query)
            .bind(schema)
            .fetch_all(&pool)
            .await
            .map_err(|e| CoreError::IntrospectionFailed(e.to_string()))?;

        let mut info = DatabaseInfo { database_name: database_id.to_string(), ..Default::default() };

        for row in &table_rows {
            let table_name: String = row.try_get("table_name").map_err(|e| CoreError::IntrospectionFailed(e.to_string()))?;

            let columns_query = r#"
                SELECT
                    c.column_name,
                    c.data_type,
                    col_description(format('%I.%I', c.table_schema, c.table_name)::regclass::oid, c.ordinal_position) AS comment,
                    CASE WHEN pk.column_name IS NOT NULL THEN true ELSE false END AS is_primary_key,
                    fk.foreign_table_name,
                    fk.foreign_column_name
                FROM information_schema.columns c
                LEFT JOIN (
                    SELECT ku.column_name
                    FROM information_schema.table_constraints tc
                    JOIN information_schema.key_column_usage ku ON tc.constraint_name = ku.constraint_name
                    WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = $1 AND tc.table_name = $2
                ) pk ON c.column_name = pk.column_name
                LEFT JOIN (
                    SELECT kcu.column_name, ccu.table_name AS foreign_table_name, ccu.column_name AS foreign_column_name
                    FROM information_schema.table_constraints tc
                    JOIN information_schema.key_column_usage kcu ON tc.constraint_name = kcu.constraint_name
                    JOIN information_schema.constraint_column_usage ccu ON ccu.constraint_name = tc.constraint_name
                    WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1 AND tc.table_name = $2
                ) fk ON c.column_name = fk.column_name
                WHERE c.table_schema = $1 AND c.table_name = $2
                ORDER BY c.ordinal_position
            "#;
            let column_rows = sqlx::query(columns_query)
                .bind(schema)
                .bind(&table_name)
                .fetch_all(&pool)
                .await
                .map_err(|e| CoreError::IntrospectionFailed(e.to_string()))?;

            let mut descriptions = Vec::new();
            let mut primary_keys = Vec::new();
            let mut foreign_keys = Vec::new();

            for column_row in &column_rows {
                let column_name: String = column_row.try_get("column_name").map_err(|e| CoreError::IntrospectionFailed(e.to_string()))?;
                let comment: Option<String> = column_row.try_get("comment").ok().flatten();
                let is_pk: bool = column_row.try_get("is_primary_key").unwrap_or(false);
                let foreign_table: Option<String> = column_row.try_get("foreign_table_name").ok().flatten();
                let foreign_column: Option<String> = column_row.try_get("foreign_column_name").ok().flatten();

                if is_pk {
                    primary_keys.push(column_name.clone());
                }
                if let (Some(ft), Some(fc)) = (foreign_table, foreign_column) {
                    foreign_keys.push(ForeignKeyEdge { local_column: column_name.clone(), foreign_table: ft, foreign_column: fc });
                }

                descriptions.push(ColumnDescription { display_name: column_name.clone(), column_name, comment });
            }

            let sample_values = self.sample_postgres_rows(&pool, schema, &table_name, &descriptions).await;

            info.description_map.insert(table_name.clone(), descriptions);
            info.primary_key_map.insert(table_name.clone(), primary_keys);
            info.foreign_key_map.insert(table_name.clone(), foreign_keys);
            info.sample_value_map.insert(table_name, sample_values);
        }

        Ok(info)
    }

    async fn sample_postgres_rows(
        &self,
        pool: &PgPool,
        schema: &str,
        table: &str,
        columns: &[ColumnDescription],
    ) -> Vec<SampleColumnValues> {
        let qualified = format!("\"{schema}\".\"{table}\"");
        let rows = sqlx::query(&format!("SELECT * FROM {qualified} LIMIT 3"))
            .fetch_all(pool)
            .await
            .unwrap_or_default();

        columns
            .iter()
            .map(|col| {
                let examples = rows
                    .iter()
                    .filter_map(|row| row.try_get::<Option<String>, _>(col.column_name.as_str()).ok().flatten())
                    .collect();
                SampleColumnValues { column_name: col.column_name.clone(), examples }
            })
            .collect()
    }

    async fn introspect_mysql(&self, database_id: &str, url: &str, database: &str) -> CoreResult<DatabaseInfo> {
        let pool = self.mysql_pool(database_id, url).await?;

        let table_rows = sqlx::query("SELECT table_name FROM information_schema.tables WHERE table_schema = ? AND table_type = 'BASE TABLE' ORDER BY table_name")
            .bind(database)
            .fetch_all(&pool)
            .await
            .map_err(|e| CoreError::IntrospectionFailed(e.to_string()))?;

        let mut info = DatabaseInfo { database_name: database_id.to_string(), ..Default::default() };

        for row in &table_rows {
            let table_name: String = row.try_get("table_name").map_err(|e| CoreError::IntrospectionFailed(e.to_string()))?;

            let columns_query = r#"
                SELECT
                    c.column_name,
                    c.data_type,
                    c.column_comment AS comment,
                    CASE WHEN c.column_key = 'PRI' THEN true ELSE false END AS is_primary_key,
                    kcu.referenced_table_name AS foreign_table_name,
                    kcu.referenced_column_name AS foreign_column_name
                FROM information_schema.columns c
                LEFT JOIN information_schema.key_column_usage kcu
                    ON kcu.table_schema = c.table_schema
                    AND kcu.table_name = c.table_name
                    AND kcu.column_name = c.column_name
                    AND kcu.referenced_table_name IS NOT NULL
                WHERE c.table_schema = ? AND c.table_name = ?
                ORDER BY c.ordinal_position
            "#;
            let column_rows = sqlx::query(columns_query)
                .bind(database)
                .bind(&table_name)
                .fetch_all(&pool)
                .await
                .map_err(|e| CoreError::IntrospectionFailed(e.to_string()))?;

            let mut descriptions = Vec::new();
            let mut primary_keys = Vec::new();
            let mut foreign_keys = Vec::new();

            for column_row in &column_rows {
                let column_name: String = column_row.try_get("column_name").map_err(|e| CoreError::IntrospectionFailed(e.to_string()))?;
                let comment: Option<String> = column_row.try_get("comment").ok().filter(|s: &String| !s.is_empty());
                let is_pk: bool = column_row.try_get("is_primary_key").unwrap_or(false);
                let foreign_table: Option<String> = column_row.try_get("foreign_table_name").ok().flatten();
                let foreign_column: Option<String> = column_row.try_get("foreign_column_name").ok().flatten();

                if is_pk {
                    primary_keys.push(column_name.clone());
                }
                if let (Some(ft), Some(fc)) = (foreign_table, foreign_column) {
                    foreign_keys.push(ForeignKeyEdge { local_column: column_name.clone(), foreign_table: ft, foreign_column: fc });
                }

                descriptions.push(ColumnDescription { display_name: column_name.clone(), column_name, comment });
            }

            let sample_values = self.sample_mysql_rows(&pool, &table_name, &descriptions).await;

            info.description_map.insert(table_name.clone(), descriptions);
            info.primary_key_map.insert(table_name.clone(), primary_keys);
            info.foreign_key_map.insert(table_name.clone(), foreign_keys);
            info.sample_value_map.insert(table_name, sample_values);
        }

        Ok(info)
    }

    async fn sample_mysql_rows(&self, pool: &MySqlPool, table: &str, columns: &[ColumnDescription]) -> Vec<SampleColumnValues> {
        let rows = sqlx::query(&format!("SELECT * FROM `{table}` LIMIT 3"))
            .fetch_all(pool)
            .await
            .unwrap_or_default();

        columns
            .iter()
            .map(|col| {
                let examples = rows
                    .iter()
                    .filter_map(|row| row.try_get::<Option<String>, _>(col.column_name.as_str()).ok().flatten())
                    .collect();
                SampleColumnValues { column_name: col.column_name.clone(), examples }
            })
            .collect()
    }

    async fn execute_postgres(&self, database_id: &str, url: &str, sql: &str, timeout_s: u64) -> CoreResult<SqlExecutionResult> {
        let pool = self.pg_pool(database_id, url).await?;
        let started = std::time::Instant::now();

        let fut = sqlx::query(sql).fetch_all(&pool);
        let result = tokio::time::timeout(std::time::Duration::from_secs(timeout_s), fut).await;

        let elapsed = started.elapsed().as_secs_f64();
        match result {
            Err(_) => Err(CoreError::ExecutionTimeout(timeout_s)),
            Ok(Err(e)) => Ok(SqlExecutionResult::failure(sql, e.to_string(), Some("sqlx::Error".to_string()), elapsed)),
            Ok(Ok(rows)) => {
                let normalized = rows.iter().map(postgres_row_to_values).collect();
                Ok(SqlExecutionResult::success(sql, normalized, elapsed))
            }
        }
    }

    async fn execute_mysql(&self, database_id: &str, url: &str, sql: &str, timeout_s: u64) -> CoreResult<SqlExecutionResult> {
        let pool = self.mysql_pool(database_id, url).await?;
        let started = std::time::Instant::now();

        let fut = sqlx::query(sql).fetch_all(&pool);
        let result = tokio::time::timeout(std::time::Duration::from_secs(timeout_s), fut).await;

        let elapsed = started.elapsed().as_secs_f64();
        match result {
            Err(_) => Err(CoreError::ExecutionTimeout(timeout_s)),
            Ok(Err(e)) => Ok(SqlExecutionResult::failure(sql, e.to_string(), Some("sqlx::Error".to_string()), elapsed)),
            Ok(Ok(rows)) => {
                let normalized = rows.iter().map(mysql_row_to_values).collect();
                Ok(SqlExecutionResult::success(sql, normalized, elapsed))
            }
        }
    }
}

impl Default for SqlxExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryExecutor for SqlxExecutor {
    async fn introspect(&self, database_id: &str) -> CoreResult<(DatabaseInfo, crate::models::DatabaseStats)> {
        let target = self.target(database_id)?;
        let info = match target {
            DatabaseTarget::Postgres { url, schema } => self.introspect_postgres(database_id, &url, &schema).await?,
            DatabaseTarget::MySql { url, database } => self.introspect_mysql(database_id, &url, &database).await?,
        };
        let stats = info.stats();
        Ok((info, stats))
    }

    async fn execute(&self, database_id: &str, sql: &str, timeout_s: u64) -> CoreResult<SqlExecutionResult> {
        let target = self.target(database_id)?;
        match target {
            DatabaseTarget::Postgres { url, .. } => self.execute_postgres(database_id, &url, sql, timeout_s).await,
            DatabaseTarget::MySql { url, .. } => self.execute_mysql(database_id, &url, sql, timeout_s).await,
        }
    }
}

/// Normalise one Postgres row into the uniform `Row` shape (spec.md
/// §4.4), covering the common scalar types; anything unrecognised falls
/// back to a string read so introspected-but-unusual columns degrade
/// gracefully instead of panicking.
fn postgres_row_to_values(row: &sqlx::postgres::PgRow) -> Vec<serde_json::Value> {
    let columns = row.columns();
    columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let type_name = column.type_info().to_string().to_uppercase();
            match type_name.as_str() {
                "BOOL" => row.try_get::<Option<bool>, _>(idx).ok().flatten().map(serde_json::Value::Bool).unwrap_or(serde_json::Value::Null),
                "INT2" | "SMALLINT" => row.try_get::<Option<i16>, _>(idx).ok().flatten().map(|v| v.into()).unwrap_or(serde_json::Value::Null),
                "INT4" | "INT" | "SERIAL" => row.try_get::<Option<i32>, _>(idx).ok().flatten().map(|v| v.into()).unwrap_or(serde_json::Value::Null),
                "INT8" | "BIGINT" | "BIGSERIAL" => row.try_get::<Option<i64>, _>(idx).ok().flatten().map(|v| v.into()).unwrap_or(serde_json::Value::Null),
                "FLOAT4" | "REAL" => row.try_get::<Option<f32>, _>(idx).ok().flatten().and_then(|v| serde_json::Number::from_f64(v as f64)).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
                "FLOAT8" | "DOUBLE PRECISION" => row.try_get::<Option<f64>, _>(idx).ok().flatten().and_then(serde_json::Number::from_f64).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
                "NUMERIC" | "DECIMAL" => row.try_get::<Option<rust_decimal::Decimal>, _>(idx).ok().flatten().map(|v| serde_json::Value::String(v.to_string())).unwrap_or(serde_json::Value::Null),
                "DATE" => row.try_get::<Option<NaiveDate>, _>(idx).ok().flatten().map(|v| serde_json::Value::String(v.to_string())).unwrap_or(serde_json::Value::Null),
                "TIME" => row.try_get::<Option<NaiveTime>, _>(idx).ok().flatten().map(|v| serde_json::Value::String(v.to_string())).unwrap_or(serde_json::Value::Null),
                "TIMESTAMP" => row.try_get::<Option<NaiveDateTime>, _>(idx).ok().flatten().map(|v| serde_json::Value::String(v.to_string())).unwrap_or(serde_json::Value::Null),
                "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => row.try_get::<Option<DateTime<chrono::Utc>>, _>(idx).ok().flatten().map(|v| serde_json::Value::String(v.to_rfc3339())).unwrap_or(serde_json::Value::Null),
                "UUID" => row.try_get::<Option<uuid::Uuid>, _>(idx).ok().flatten().map(|v| serde_json::Value::String(v.to_string())).unwrap_or(serde_json::Value::Null),
                "JSON" | "JSONB" => row.try_get::<Option<serde_json::Value>, _>(idx).ok().flatten().unwrap_or(serde_json::Value::Null),
                _ => row.try_get::<Option<String>, _>(idx).ok().flatten().map(serde_json::Value::String).unwrap_or(serde_json::Value::Null),
            }
        })
        .collect()
}

fn mysql_row_to_values(row: &sqlx::mysql::MySqlRow) -> Vec<serde_json::Value> {
    let columns = row.columns();
    columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let type_name = column.type_info().to_string().to_uppercase();
            match type_name.as_str() {
                "TINYINT(1)" | "BOOLEAN" | "BOOL" => row.try_get::<Option<bool>, _>(idx).ok().flatten().map(serde_json::Value::Bool).unwrap_or(serde_json::Value::Null),
                "TINYINT" | "SMALLINT" => row.try_get::<Option<i16>, _>(idx).ok().flatten().map(|v| v.into()).unwrap_or(serde_json::Value::Null),
                "INT" | "INTEGER" | "MEDIUMINT" => row.try_get::<Option<i32>, _>(idx).ok().flatten().map(|v| v.into()).unwrap_or(serde_json::Value::Null),
                "BIGINT" => row.try_get::<Option<i64>, _>(idx).ok().flatten().map(|v| v.into()).unwrap_or(serde_json::Value::Null),
                "FLOAT" => row.try_get::<Option<f32>, _>(idx).ok().flatten().and_then(|v| serde_json::Number::from_f64(v as f64)).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
                "DOUBLE" => row.try_get::<Option<f64>, _>(idx).ok().flatten().and_then(serde_json::Number::from_f64).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
                "DECIMAL" => row.try_get::<Option<rust_decimal::Decimal>, _>(idx).ok().flatten().map(|v| serde_json::Value::String(v.to_string())).unwrap_or(serde_json::Value::Null),
                "DATE" => row.try_get::<Option<NaiveDate>, _>(idx).ok().flatten().map(|v| serde_json::Value::String(v.to_string())).unwrap_or(serde_json::Value::Null),
                "DATETIME" | "TIMESTAMP" => row.try_get::<Option<NaiveDateTime>, _>(idx).ok().flatten().map(|v| serde_json::Value::String(v.to_string())).unwrap_or(serde_json::Value::Null),
                "JSON" => row.try_get::<Option<serde_json::Value>, _>(idx).ok().flatten().unwrap_or(serde_json::Value::Null),
                _ => row.try_get::<Option<String>, _>(idx).ok().flatten().map(serde_json::Value::String).unwrap_or(serde_json::Value::Null),
            }
        })
        .collect()
}
