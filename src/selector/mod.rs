//! Schema Selector (spec.md §4.2): introspects a database once per
//! process lifetime, decides whether its schema needs pruning, and when it
//! does, delegates the prune decision to an LLM via the
//! `selector.schema_pruning` prompt.
//!
//! Built around the shared [`DatabaseInfo`] model and extended with a
//! three-layer cache, a complexity gate, and PK/FK-aware reinstatement
//! spec.md requires.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::config::{LlmConfig, SelectorConfig};
use crate::error::{CoreError, CoreResult};
use crate::executor::QueryExecutor;
use crate::llm::{extract_json, LlmClient};
use crate::models::{ColumnSelection, DatabaseInfo, DatabaseStats, Message};
use crate::prompts::{PromptKey, PromptRegistry};

/// What the three-layer cache of spec.md §4.2 holds per `database_id`:
/// the typed introspection result, its derived stats, and a cached JSON
/// rendering (handed back verbatim to callers that want the raw schema,
/// e.g. an exported-schema refresh tool).
struct CachedSchema {
    info: DatabaseInfo,
    stats: DatabaseStats,
    description_json: String,
}

/// Running counters the selector exposes for `Orchestrator::get_stats`
/// (spec.md §4.2 "Observable effects").
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorStats {
    pub query_count: u64,
    pub prune_count: u64,
    total_reduction_ratio: f64,
}

impl SelectorStats {
    pub fn average_reduction_ratio(&self) -> f64 {
        if self.prune_count == 0 {
            0.0
        } else {
            self.total_reduction_ratio / self.prune_count as f64
        }
    }
}

pub struct SchemaSelector {
    executor: Arc<dyn QueryExecutor>,
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptRegistry>,
    config: SelectorConfig,
    llm_config: LlmConfig,
    cache: std::sync::RwLock<HashMap<String, Arc<OnceCell<Arc<CachedSchema>>>>>,
    stats: Mutex<SelectorStats>,
}

impl SchemaSelector {
    pub fn new(executor: Arc<dyn QueryExecutor>, llm: Arc<dyn LlmClient>, prompts: Arc<PromptRegistry>, config: SelectorConfig, llm_config: LlmConfig) -> Self {
        Self {
            executor,
            llm,
            prompts,
            config,
            llm_config,
            cache: std::sync::RwLock::new(HashMap::new()),
            stats: Mutex::new(SelectorStats::default()),
        }
    }

    pub fn stats(&self) -> SelectorStats {
        *self.stats.lock().expect("selector stats lock poisoned")
    }

    /// Explicit invalidation hook (spec.md §9 "never evicted implicitly").
    pub fn invalidate(&self, database_id: &str) {
        self.cache.write().expect("selector cache lock poisoned").remove(database_id);
    }

    async fn cached_schema(&self, database_id: &str) -> CoreResult<Arc<CachedSchema>> {
        let cell = {
            let mut cache = self.cache.write().expect("selector cache lock poisoned");
            cache.entry(database_id.to_string()).or_insert_with(|| Arc::new(OnceCell::new())).clone()
        };

        // `get_or_try_init` guarantees exactly one introspection per key
        // even under concurrent first-access (spec.md §5 "exclusive-init
        // -per-key"); a failed init leaves the cell empty for the next try.
        let schema = cell
            .get_or_try_init(|| async {
                let (info, stats) = self.executor.introspect(database_id).await?;
                let description_json = serde_json::to_string(&info)?;
                Ok::<Arc<CachedSchema>, CoreError>(Arc::new(CachedSchema { info, stats, description_json }))
            })
            .await?;

        Ok(schema.clone())
    }

    /// Run the selector over `message`, writing `extracted_schema`,
    /// `schema_description`, `foreign_key_description`, and `was_pruned`.
    pub async fn select(&self, message: &mut Message) -> CoreResult<()> {
        self.stats.lock().expect("selector stats lock poisoned").query_count += 1;

        let cached = self.cached_schema(&message.database_id).await.map_err(|e| match e {
            CoreError::DatabaseNotFound(id) => CoreError::DatabaseNotFound(id),
            other => CoreError::IntrospectionFailed(other.to_string()),
        })?;
        let info = &cached.info;
        let stats = cached.stats;

        let full_schema_text = render_description(info, None);
        let needs_pruning = stats.average_column_count > self.config.average_column_count_threshold
            || stats.total_column_count > self.config.total_column_count_threshold
            || count_tokens(&full_schema_text) >= self.config.schema_token_threshold;

        if !needs_pruning {
            message.extracted_schema = None;
            message.schema_description = Some(full_schema_text);
            message.foreign_key_description = Some(render_foreign_keys(info, None));
            message.was_pruned = false;
            return Ok(());
        }

        let full_fk_text = render_foreign_keys(info, None);

        let mut values = HashMap::new();
        values.insert("schema", full_schema_text.as_str());
        values.insert("foreign_keys", full_fk_text.as_str());
        values.insert("question", message.question.as_str());
        values.insert("evidence", message.evidence.as_str());

        let template = self.prompts.get(PromptKey::SchemaPruning);
        let (system_prompt, user_prompt) = template.format(&values)?;

        let response = self
            .llm
            .generate(&system_prompt, &user_prompt, self.llm_config.temperature, 2048, self.llm_config.request_timeout_secs)
            .await
            .map_err(|e| CoreError::SelectorFailed(e.to_string()))?;

        if !response.success {
            return Err(CoreError::SelectorFailed(response.error.unwrap_or_else(|| "LLM returned no content".to_string())));
        }

        match parse_pruning_response(&response.content, info) {
            Some(selection) => {
                let selection = reinstate_foreign_key_targets(selection, info);
                let pruned_schema_text = render_description(info, Some(&selection));
                let pruned_fk_text = render_foreign_keys(info, Some(&selection));

                let mut stats_guard = self.stats.lock().expect("selector stats lock poisoned");
                stats_guard.prune_count += 1;
                if !full_schema_text.is_empty() {
                    stats_guard.total_reduction_ratio += 1.0 - (pruned_schema_text.len() as f64 / full_schema_text.len() as f64).min(1.0);
                }
                drop(stats_guard);

                message.extracted_schema = Some(selection);
                message.schema_description = Some(pruned_schema_text);
                message.foreign_key_description = Some(pruned_fk_text);
                message.was_pruned = true;
            }
            None => {
                tracing::warn!(database_id = %message.database_id, "selector pruning response was malformed, falling back to the full schema");
                message.extracted_schema = None;
                message.schema_description = Some(full_schema_text);
                message.foreign_key_description = Some(full_fk_text);
                message.was_pruned = false;
            }
        }

        Ok(())
    }
}

/// Count tokens with a model-aware tokenizer, falling back to a whitespace
/// word count when the tokenizer's static data cannot be loaded (spec.md
/// §4.2 "via a model-aware tokenizer; word-count fallback otherwise").
fn count_tokens(text: &str) -> usize {
    match tiktoken_rs::cl100k_base() {
        Ok(bpe) => bpe.encode_ordinary(text).len(),
        Err(_) => text.split_whitespace().count(),
    }
}

fn parse_pruning_response(content: &str, info: &DatabaseInfo) -> Option<HashMap<String, ColumnSelection>> {
    let json_str = extract_json(content)?;
    let parsed: serde_json::Value = serde_json::from_str(json_str).ok()?;
    let tables = parsed.get("tables")?.as_object()?;

    let mut selection = HashMap::new();
    for (table_name, value) in tables {
        let Some(actual_name) = info.description_map.keys().find(|t| t.eq_ignore_ascii_case(table_name)) else {
            continue;
        };
        let column_selection = match value {
            serde_json::Value::String(s) if s.eq_ignore_ascii_case("all") => ColumnSelection::All,
            serde_json::Value::String(s) if s.eq_ignore_ascii_case("drop") => ColumnSelection::Drop,
            serde_json::Value::Array(cols) => ColumnSelection::Columns(cols.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()),
            _ => continue,
        };
        selection.insert(actual_name.clone(), column_selection);
    }

    if selection.is_empty() {
        None
    } else {
        Some(selection)
    }
}

/// Always retain primary keys on kept tables, and reinstate (as key-only)
/// any table a retained foreign key points at, even if the LLM marked it
/// `"drop"` or omitted it entirely (spec.md §4.2).
fn reinstate_foreign_key_targets(mut selection: HashMap<String, ColumnSelection>, info: &DatabaseInfo) -> HashMap<String, ColumnSelection> {
    for (table, sel) in selection.iter_mut() {
        if let ColumnSelection::Columns(cols) = sel {
            if let Some(pks) = info.primary_key_map.get(table) {
                for pk in pks {
                    if !cols.iter().any(|c| c.eq_ignore_ascii_case(pk)) {
                        cols.push(pk.clone());
                    }
                }
            }
        }
    }

    let mut required_key_columns: HashMap<String, Vec<String>> = HashMap::new();
    for (table, sel) in &selection {
        if matches!(sel, ColumnSelection::Drop) {
            continue;
        }
        if let Some(edges) = info.foreign_key_map.get(table) {
            for edge in edges {
                let cols = required_key_columns.entry(edge.foreign_table.clone()).or_default();
                if !cols.iter().any(|c| c.eq_ignore_ascii_case(&edge.foreign_column)) {
                    cols.push(edge.foreign_column.clone());
                }
            }
        }
    }

    for (foreign_table, mut key_columns) in required_key_columns {
        let needs_reinstatement = matches!(selection.get(&foreign_table), None | Some(ColumnSelection::Drop));
        if !needs_reinstatement {
            continue;
        }
        if let Some(pks) = info.primary_key_map.get(&foreign_table) {
            for pk in pks {
                if !key_columns.iter().any(|c| c.eq_ignore_ascii_case(pk)) {
                    key_columns.push(pk.clone());
                }
            }
        }
        selection.insert(foreign_table, ColumnSelection::Columns(key_columns));
    }

    selection
}

/// Render table blocks in the stable format spec.md §4.2 specifies: a
/// table header followed by one `(column, display_name. Value examples:
/// […]. comment),` line per kept column. Table/column ordering is
/// alphabetical so the same schema always renders identically.
fn render_description(info: &DatabaseInfo, selection: Option<&HashMap<String, ColumnSelection>>) -> String {
    let mut table_names: Vec<&String> = info.description_map.keys().collect();
    table_names.sort();

    let mut blocks = Vec::new();
    for table in table_names {
        let table_selection = selection.map(|s| s.get(table));
        if matches!(table_selection, Some(None) | Some(Some(ColumnSelection::Drop))) {
            continue;
        }
        let keep_columns: Option<&Vec<String>> = match table_selection {
            Some(Some(ColumnSelection::Columns(cols))) => Some(cols),
            _ => None,
        };

        let columns = &info.description_map[table];
        let samples = info.sample_value_map.get(table);

        let mut entries = Vec::new();
        for col in columns {
            if let Some(keep) = keep_columns {
                if !keep.iter().any(|c| c.eq_ignore_ascii_case(&col.column_name)) {
                    continue;
                }
            }
            let examples = samples
                .and_then(|svs| svs.iter().find(|sv| sv.column_name == col.column_name))
                .map(|sv| sv.examples.join(", "))
                .unwrap_or_default();
            let comment = col.comment.clone().unwrap_or_default();
            entries.push(format!("  ({}, {}. Value examples: [{}]. {}),", col.column_name, col.display_name, examples, comment));
        }

        if entries.is_empty() {
            continue;
        }
        blocks.push(format!("{}:\n{}", table, entries.join("\n")));
    }

    blocks.join("\n\n")
}

/// One line per foreign-key edge: `local_table.local_col = foreign_table.foreign_col`.
/// A table dropped (or absent) from `selection` contributes no edges.
fn render_foreign_keys(info: &DatabaseInfo, selection: Option<&HashMap<String, ColumnSelection>>) -> String {
    let mut table_names: Vec<&String> = info.foreign_key_map.keys().collect();
    table_names.sort();

    let mut lines = Vec::new();
    for table in table_names {
        if let Some(sel) = selection {
            if matches!(sel.get(table), None | Some(ColumnSelection::Drop)) {
                continue;
            }
        }
        for edge in &info.foreign_key_map[table] {
            lines.push(format!("{}.{} = {}.{}", table, edge.local_column, edge.foreign_table, edge.foreign_column));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmConfig, SelectorConfig};
    use crate::llm::ScriptedLlmClient;
    use crate::models::{ColumnDescription, ForeignKeyEdge};
    use async_trait::async_trait;

    struct FixedExecutor(DatabaseInfo);

    #[async_trait]
    impl QueryExecutor for FixedExecutor {
        async fn introspect(&self, _database_id: &str) -> CoreResult<(DatabaseInfo, DatabaseStats)> {
            let stats = self.0.stats();
            Ok((self.0.clone(), stats))
        }

        async fn execute(&self, _database_id: &str, _sql: &str, _timeout_s: u64) -> CoreResult<crate::models::SqlExecutionResult> {
            unimplemented!("not exercised by selector tests")
        }
    }

    fn small_schema() -> DatabaseInfo {
        let mut description_map = HashMap::new();
        description_map.insert(
            "schools".to_string(),
            vec![
                ColumnDescription { column_name: "id".into(), display_name: "ID".into(), comment: None },
                ColumnDescription { column_name: "city".into(), display_name: "City".into(), comment: None },
            ],
        );
        DatabaseInfo { database_name: "shop".into(), description_map, ..Default::default() }
    }

    fn large_schema() -> DatabaseInfo {
        let mut description_map = HashMap::new();
        for t in 0..30 {
            let cols = (0..14).map(|c| ColumnDescription { column_name: format!("c{c}"), display_name: format!("C{c}"), comment: None }).collect();
            description_map.insert(format!("t{t}"), cols);
        }
        let mut primary_key_map = HashMap::new();
        primary_key_map.insert("t0".to_string(), vec!["c0".to_string()]);
        let mut foreign_key_map = HashMap::new();
        foreign_key_map.insert("t1".to_string(), vec![ForeignKeyEdge { local_column: "c1".into(), foreign_table: "t0".into(), foreign_column: "c0".into() }]);
        DatabaseInfo { database_name: "big".into(), description_map, primary_key_map, foreign_key_map, sample_value_map: HashMap::new() }
    }

    fn selector_with(info: DatabaseInfo, llm_responses: Vec<&str>) -> SchemaSelector {
        SchemaSelector::new(
            Arc::new(FixedExecutor(info)),
            Arc::new(ScriptedLlmClient::new(llm_responses)),
            Arc::new(PromptRegistry::default()),
            SelectorConfig::default(),
            LlmConfig::default(),
        )
    }

    #[tokio::test]
    async fn small_schema_is_not_pruned() {
        let selector = selector_with(small_schema(), vec![]);
        let mut message = Message::new("shop", "List all schools", "", 3);
        selector.select(&mut message).await.unwrap();
        assert!(!message.was_pruned);
        assert!(message.extracted_schema.is_none());
        assert!(message.schema_description.unwrap().contains("schools"));
    }

    #[tokio::test]
    async fn large_schema_is_pruned_and_reinstates_fk_target() {
        let response = r#"{"reasoning": "r", "tables": {"t1": "all", "t0": "drop"}}"#;
        let selector = selector_with(large_schema(), vec![response]);
        let mut message = Message::new("big", "a complex question", "", 3);
        selector.select(&mut message).await.unwrap();

        assert!(message.was_pruned);
        let selection = message.extracted_schema.unwrap();
        assert!(matches!(selection.get("t1"), Some(ColumnSelection::All)));
        match selection.get("t0") {
            Some(ColumnSelection::Columns(cols)) => assert!(cols.iter().any(|c| c == "c0")),
            other => panic!("expected t0 reinstated as key-only, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_pruning_response_falls_back_to_full_schema() {
        let selector = selector_with(large_schema(), vec!["not json at all"]);
        let mut message = Message::new("big", "q", "", 3);
        selector.select(&mut message).await.unwrap();
        assert!(!message.was_pruned);
        assert!(message.extracted_schema.is_none());
    }

    #[tokio::test]
    async fn second_call_reuses_the_cache_without_reintrospecting() {
        let selector = selector_with(small_schema(), vec![]);
        let mut first = Message::new("shop", "q1", "", 3);
        let mut second = Message::new("shop", "q2", "", 3);
        selector.select(&mut first).await.unwrap();
        selector.select(&mut second).await.unwrap();
        assert_eq!(selector.stats().query_count, 2);
    }

    #[test]
    fn render_description_is_alphabetically_stable() {
        let info = small_schema();
        let rendered = render_description(&info, None);
        assert!(rendered.starts_with("schools:"));
    }

    #[tokio::test]
    async fn description_json_cache_round_trips_through_the_schema() {
        let selector = selector_with(small_schema(), vec![]);
        let cached = selector.cached_schema("shop").await.unwrap();
        assert!(cached.description_json.contains("schools"));
    }

    struct MissingExecutor;

    #[async_trait]
    impl QueryExecutor for MissingExecutor {
        async fn introspect(&self, database_id: &str) -> CoreResult<(DatabaseInfo, DatabaseStats)> {
            Err(CoreError::DatabaseNotFound(database_id.to_string()))
        }

        async fn execute(&self, _database_id: &str, _sql: &str, _timeout_s: u64) -> CoreResult<crate::models::SqlExecutionResult> {
            unimplemented!("not exercised by selector tests")
        }
    }

    #[tokio::test]
    async fn unknown_database_surfaces_as_database_not_found_not_introspection_failed() {
        let selector = SchemaSelector::new(
            Arc::new(MissingExecutor),
            Arc::new(ScriptedLlmClient::new(vec![])),
            Arc::new(PromptRegistry::default()),
            SelectorConfig::default(),
            LlmConfig::default(),
        );
        let mut message = Message::new("ghost", "q", "", 3);
        match selector.select(&mut message).await {
            Err(CoreError::DatabaseNotFound(id)) => assert_eq!(id, "ghost"),
            other => panic!("expected DatabaseNotFound, got {other:?}"),
        }
    }
}
