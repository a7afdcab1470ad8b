//! Cross-module end-to-end scenarios (spec.md §8 "Concrete end-to-end
//! scenarios") driven entirely through the public `Orchestrator` API with
//! in-process fake collaborators — no network, no real database.

use std::collections::HashMap;
use std::sync::Arc;

use text2sql_core::config::{DecomposerConfig, LlmConfig, OrchestratorConfig, RefinerConfig, RetrievalConfig, SelectorConfig};
use text2sql_core::embedding::HashingEmbedder;
use text2sql_core::executor::{CompositeExecutor, FakeExecutor};
use text2sql_core::llm::ScriptedLlmClient;
use text2sql_core::models::{ColumnDescription, DatabaseInfo, SqlExecutionResult};
use text2sql_core::prompts::PromptRegistry;
use text2sql_core::retrieval::TrainingStore;
use text2sql_core::vectorstore::InMemoryVectorStore;
use text2sql_core::{CoreError, Orchestrator, ProcessQueryRequest};

fn large_schema_30x14() -> DatabaseInfo {
    let mut description_map = HashMap::new();
    description_map.insert(
        "schools".to_string(),
        vec![
            ColumnDescription { column_name: "id".into(), display_name: "ID".into(), comment: None },
            ColumnDescription { column_name: "city".into(), display_name: "City".into(), comment: None },
            ColumnDescription { column_name: "sat_score".into(), display_name: "SAT Score".into(), comment: None },
        ],
    );
    for t in 0..29 {
        let cols = (0..14)
            .map(|c| ColumnDescription { column_name: format!("c{c}"), display_name: format!("C{c}"), comment: None })
            .collect();
        description_map.insert(format!("t{t}"), cols);
    }
    DatabaseInfo { database_name: "shop".to_string(), description_map, ..Default::default() }
}

fn small_schema() -> DatabaseInfo {
    let mut description_map = HashMap::new();
    description_map.insert(
        "users".to_string(),
        vec![
            ColumnDescription { column_name: "id".into(), display_name: "ID".into(), comment: None },
            ColumnDescription { column_name: "name".into(), display_name: "Name".into(), comment: None },
        ],
    );
    DatabaseInfo { database_name: "shop".to_string(), description_map, ..Default::default() }
}

struct Harness {
    orchestrator: Orchestrator,
    executor: Arc<FakeExecutor>,
}

fn build(schema: DatabaseInfo, llm_responses: Vec<&str>, refiner_max_attempts: u32, orchestrator_max_retries: u32) -> Harness {
    let executor = Arc::new(FakeExecutor::new().with_schema("shop", schema));
    let composite: Arc<dyn text2sql_core::executor::QueryExecutor> = Arc::new(CompositeExecutor::live_only(executor.clone()));
    let llm: Arc<dyn text2sql_core::llm::LlmClient> = Arc::new(ScriptedLlmClient::new(llm_responses));
    let prompts = Arc::new(PromptRegistry::default());
    let training_store = Arc::new(TrainingStore::new(
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(HashingEmbedder::default()),
        RetrievalConfig { similarity_threshold: 0.0, ..RetrievalConfig::default() },
    ));

    let selector = Arc::new(text2sql_core::selector::SchemaSelector::new(
        composite.clone(),
        llm.clone(),
        prompts.clone(),
        SelectorConfig::default(),
        LlmConfig::default(),
    ));
    let decomposer = Arc::new(text2sql_core::decomposer::QueryDecomposer::new(
        llm.clone(),
        prompts.clone(),
        training_store.clone(),
        DecomposerConfig::default(),
        LlmConfig::default(),
    ));
    let refiner = Arc::new(text2sql_core::refiner::ExecutionRefiner::new(
        composite,
        llm,
        prompts,
        RefinerConfig { max_attempts: refiner_max_attempts, ..RefinerConfig::default() },
        LlmConfig::default(),
    ));

    let config = OrchestratorConfig { max_retries: orchestrator_max_retries, ..OrchestratorConfig::default() };
    let orchestrator = Orchestrator::new(selector, decomposer, refiner, training_store, config);
    Harness { orchestrator, executor }
}

/// Scenario 2 (spec.md §8): a 30-table schema gets pruned down to the
/// `schools` table, and the decomposer's aggregation question yields a
/// GROUP BY/AVG statement over the columns the selector kept.
#[tokio::test]
async fn large_schema_pruned_and_aggregated() {
    let pruning_response = r#"{"reasoning": "only schools is relevant", "tables": {"schools": "all"}}"#;
    let sql_response = "```sql\nSELECT city, AVG(sat_score) FROM schools GROUP BY city\n```";
    let harness = build(large_schema_30x14(), vec![pruning_response, sql_response], 3, 3);

    let outcome = harness
        .orchestrator
        .process_query(ProcessQueryRequest::new("shop", "Average SAT score by city"))
        .await
        .unwrap();

    assert!(outcome.success, "expected success, got {:?}", outcome.error);
    let sql = outcome.sql.unwrap();
    assert!(sql.contains("GROUP BY"));
    assert!(sql.contains("AVG(sat_score)") || sql.to_uppercase().contains("AVG(SAT_SCORE)"));
}

/// Scenario 3 (spec.md §8): the decomposer's first SQL references a
/// nonexistent table; the refiner's schema-error failure routes back to
/// the decomposer with the error in context, and the second attempt
/// succeeds against the real table name.
#[tokio::test]
async fn repair_after_schema_error_routes_back_to_decomposer() {
    let harness = build(
        small_schema(),
        vec!["```sql\nSELECT * FROM user\n```", "```sql\nSELECT * FROM users\n```"],
        1,
        3,
    );
    harness.executor.script_outcome(
        "SELECT * FROM user LIMIT 1000",
        SqlExecutionResult::failure("SELECT * FROM user LIMIT 1000", "relation \"user\" does not exist", None, 0.001),
    );

    let outcome = harness.orchestrator.process_query(ProcessQueryRequest::new("shop", "List all users")).await.unwrap();

    assert!(outcome.success, "expected success, got {:?}", outcome.error);
    assert_eq!(outcome.retry_count, 1);
    // A successful outcome carries no error_history (spec.md §4.1/§6: the
    // success payload is `{sql, rows, total_time, per_agent_time}`, with
    // error_history reserved for the failure payload); the one repaired
    // attempt is reflected in `retry_count` above instead.
    assert!(outcome.error_history.is_empty());
    assert!(outcome.sql.unwrap().contains("FROM users"));
}

/// spec.md §7: "`EXECUTION_TIMEOUT` ... one repair attempt is permitted".
/// A first execution timeout routes back to the decomposer like any other
/// repairable refiner failure, and a differently-worded retry succeeds.
#[tokio::test]
async fn first_execution_timeout_is_retried_once_and_recovers() {
    let harness = build(
        small_schema(),
        vec!["```sql\nSELECT * FROM users\n```", "```sql\nSELECT id FROM users\n```"],
        1,
        3,
    );
    harness.executor.script_hard_error("SELECT * FROM users LIMIT 1000", CoreError::ExecutionTimeout(120));

    let outcome = harness.orchestrator.process_query(ProcessQueryRequest::new("shop", "List all users")).await.unwrap();

    assert!(outcome.success, "expected success, got {:?}", outcome.error);
    assert_eq!(outcome.retry_count, 1);
    assert!(outcome.sql.unwrap().contains("SELECT id FROM users"));
}

/// spec.md §7: "...but repeated timeouts must terminate." A second
/// consecutive timeout must end the query even though retry budget
/// remains, rather than looping back to the decomposer again.
#[tokio::test]
async fn repeated_execution_timeout_terminates_despite_remaining_retry_budget() {
    let harness = build(
        small_schema(),
        vec!["```sql\nSELECT * FROM users\n```", "```sql\nSELECT * FROM users\n```"],
        1,
        3,
    );
    harness.executor.script_hard_error("SELECT * FROM users LIMIT 1000", CoreError::ExecutionTimeout(120));

    let outcome = harness.orchestrator.process_query(ProcessQueryRequest::new("shop", "List all users")).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.retry_count, 1, "only the first timeout should have looped back before terminating");
    assert!(outcome.error.unwrap().to_lowercase().contains("timed out"));
}
