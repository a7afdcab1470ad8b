//! Workflow Orchestrator (spec.md §4.1): drives a [`Message`] through
//! Selector → Decomposer → Refiner, retries the Decomposer/Refiner pair on
//! a repairable execution failure up to `max_retries` times, and persists
//! per-thread conversation history across calls.
//!
//! An explicit state machine rather than dynamic dispatch between agents:
//! a bounded retry loop and an append-only conversation log, per
//! spec.md §4.1/§9.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::OrchestratorConfig;
use crate::conversation::{last_n, ConversationStore, InMemoryConversationStore};
use crate::decomposer::QueryDecomposer;
use crate::error::{classify_sql_error, CoreError, CoreResult};
use crate::models::{ConversationEntry, ErrorRecord, Message, NodeState, QueryOutcome, WorkflowState};
use crate::refiner::ExecutionRefiner;
use crate::retrieval::TrainingStore;
use crate::selector::SchemaSelector;

/// Input to [`Orchestrator::process_query`] (spec.md §6).
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessQueryRequest {
    pub database_id: String,
    pub question: String,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

impl ProcessQueryRequest {
    pub fn new(database_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self { database_id: database_id.into(), question: question.into(), evidence: String::new(), user_id: None, thread_id: None }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = evidence.into();
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }
}

/// Health of the orchestrator's wired collaborators (spec.md §4.1
/// `health_check`). Every check is cheap and local — this does not probe
/// the live LLM/executor/vector-store over the network, since spec.md §1
/// excludes process-lifecycle concerns; it reports that the core's own
/// wiring is intact.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub checks: std::collections::HashMap<String, bool>,
}

/// Running counters for [`Orchestrator::get_stats`] (spec.md §4.1).
#[derive(Debug, Clone, Default)]
struct RunStats {
    total: u64,
    successful: u64,
    failed: u64,
    total_processing_time: f64,
    total_retries: u64,
}

/// Aggregate statistics snapshot returned by `get_stats`.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub avg_latency: f64,
    pub retry_rate: f64,
}

/// SQL-fault categories the orchestrator treats as repairable-via-retry
/// once they escape [`ExecutionRefiner::refine`]: the refiner's own
/// internal repair attempts were exhausted or it produced no SQL at all.
/// `ExecutionTimeout` is included — spec.md §7 grants a timeout one
/// repair attempt — but the orchestrator loop below terminates on a
/// second *consecutive* timeout rather than retrying indefinitely.
/// `SecurityViolation` is deliberately excluded — it is terminal
/// regardless of remaining budget (spec.md §4.4, §7).
fn is_orchestrator_repairable(err: &CoreError) -> bool {
    matches!(
        err,
        CoreError::ExecutionFailed(_) | CoreError::NoSql | CoreError::EmptySql | CoreError::RefinerFailed(_) | CoreError::ExecutionTimeout(_)
    )
}

/// Drives the three agents and owns the retry/routing logic spec.md §9
/// assigns to it rather than to a registry of arbitrary agents: the
/// routing decision enumerates exactly the fixed Selector/Decomposer/
/// Refiner/Completed/Failed transitions (spec.md §4.1 state machine).
pub struct Orchestrator {
    selector: Arc<SchemaSelector>,
    decomposer: Arc<QueryDecomposer>,
    refiner: Arc<ExecutionRefiner>,
    training_store: Arc<TrainingStore>,
    conversation_store: Arc<dyn ConversationStore>,
    config: OrchestratorConfig,
    stats: std::sync::Mutex<RunStats>,
}

impl Orchestrator {
    pub fn new(
        selector: Arc<SchemaSelector>,
        decomposer: Arc<QueryDecomposer>,
        refiner: Arc<ExecutionRefiner>,
        training_store: Arc<TrainingStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self::with_conversation_store(selector, decomposer, refiner, training_store, Arc::new(InMemoryConversationStore::new()), config)
    }

    pub fn with_conversation_store(
        selector: Arc<SchemaSelector>,
        decomposer: Arc<QueryDecomposer>,
        refiner: Arc<ExecutionRefiner>,
        training_store: Arc<TrainingStore>,
        conversation_store: Arc<dyn ConversationStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self { selector, decomposer, refiner, training_store, conversation_store, config, stats: std::sync::Mutex::new(RunStats::default()) }
    }

    pub async fn health_check(&self) -> HealthCheck {
        let mut checks = std::collections::HashMap::new();
        checks.insert("selector".to_string(), true);
        checks.insert("decomposer".to_string(), true);
        checks.insert("refiner".to_string(), true);
        checks.insert("training_store".to_string(), true);
        HealthCheck { status: "ok".to_string(), checks }
    }

    pub fn get_stats(&self) -> OrchestratorStats {
        let stats = self.stats.lock().expect("orchestrator stats lock poisoned");
        let avg_latency = if stats.total == 0 { 0.0 } else { stats.total_processing_time / stats.total as f64 };
        let retry_rate = if stats.total == 0 { 0.0 } else { stats.total_retries as f64 / stats.total as f64 };
        OrchestratorStats { total: stats.total, successful: stats.successful, failed: stats.failed, avg_latency, retry_rate }
    }

    /// Run `(database_id, question, evidence, user_id, thread_id)` through
    /// the pipeline (spec.md §6). Returns `Err` only for the pre-flight
    /// `INVALID_MESSAGE` check; every other failure is reported as an
    /// `Ok(QueryOutcome { success: false, .. })` structured result, per
    /// spec.md §7 "the caller receives a structured result, not an
    /// exception".
    pub async fn process_query(&self, request: ProcessQueryRequest) -> CoreResult<QueryOutcome> {
        if request.question.trim().is_empty() {
            return Err(CoreError::InvalidMessage("question must not be empty".to_string()));
        }

        let mut message = Message::new(request.database_id.clone(), request.question.clone(), request.evidence.clone(), self.config.max_retries);
        if let Some(user_id) = &request.user_id {
            message.metadata.insert("user_id".to_string(), serde_json::Value::String(user_id.clone()));
        }

        let mut state = WorkflowState::new(message);
        if let Some(thread_id) = &request.thread_id {
            state.conversation_history = self.conversation_store.load(thread_id).await?;
        }
        // Entries from index `history_offset` onward are new to this call;
        // only those are ever persisted back, so a threaded call's prior
        // turns are never re-appended to the store (spec.md §9 append-only
        // log — not append-the-whole-loaded-history-again).
        let history_offset = state.conversation_history.len();
        state.conversation_history.push(ConversationEntry::system(format!(
            "Processing question for database '{}': {}",
            request.database_id, request.question
        )));

        tracing::info!(database_id = %request.database_id, "orchestrator: entering selector");
        state.current_agent = NodeState::Selector;
        let t0 = Utc::now();
        if let Err(e) = self.selector.select(&mut state.message).await {
            return self.finalize_failure(state, request.thread_id.as_deref(), CoreError::SelectorFailed(e.to_string()), history_offset).await;
        }
        self.record_time(&mut state, "selector", t0);
        state.conversation_history.push(ConversationEntry::agent(format!(
            "selector: was_pruned={}, schema_chars={}",
            state.message.was_pruned,
            state.message.schema_description.as_deref().map(str::len).unwrap_or(0)
        )));

        // Consecutive `ExecutionTimeout` counter (spec.md §7: "one repair
        // attempt is permitted but repeated timeouts must terminate"). Any
        // other repairable failure resets the streak.
        let mut consecutive_timeouts: u32 = 0;

        loop {
            tracing::info!(database_id = %request.database_id, retry_count = state.retry_count, "orchestrator: entering decomposer");
            state.current_agent = NodeState::Decomposer;
            let t0 = Utc::now();
            let history_window = last_n(&state.conversation_history, self.config.conversation_history_limit).to_vec();
            if let Err(e) = self.decomposer.decompose(&mut state.message, &history_window).await {
                return self.finalize_failure(state, request.thread_id.as_deref(), CoreError::DecomposerFailed(e.to_string()), history_offset).await;
            }
            self.record_time(&mut state, "decomposer", t0);
            state.conversation_history.push(ConversationEntry::agent(format!(
                "decomposer: strategy={:?}, sub_questions={}",
                state.message.decomposition_strategy,
                state.message.sub_questions.len()
            )));

            tracing::info!(database_id = %request.database_id, retry_count = state.retry_count, "orchestrator: entering refiner");
            state.current_agent = NodeState::Refiner;
            let t0 = Utc::now();
            match self.refiner.refine(&mut state.message).await {
                Ok(()) => {
                    self.record_time(&mut state, "refiner", t0);
                    return self.finalize_success(state, request.thread_id.as_deref(), history_offset).await;
                }
                Err(e) if matches!(e, CoreError::SecurityViolation(_)) => {
                    self.record_time(&mut state, "refiner", t0);
                    return self.finalize_failure(state, request.thread_id.as_deref(), e, history_offset).await;
                }
                Err(e) if matches!(e, CoreError::ExecutionTimeout(_)) && consecutive_timeouts >= 1 => {
                    // A second consecutive timeout: spec.md §7 says a first
                    // timeout may be retried once, but repeated timeouts
                    // must terminate regardless of remaining retry budget.
                    self.record_time(&mut state, "refiner", t0);
                    return self.finalize_failure(state, request.thread_id.as_deref(), e, history_offset).await;
                }
                Err(e) if is_orchestrator_repairable(&e) => {
                    self.record_time(&mut state, "refiner", t0);
                    consecutive_timeouts = if matches!(e, CoreError::ExecutionTimeout(_)) { consecutive_timeouts + 1 } else { 0 };
                    // Exactly one `ErrorRecord` per refiner invocation is
                    // surfaced here (spec.md §4.4 "surfaces the latest
                    // error to the orchestrator"): the refiner's own
                    // internal repair attempts never touch
                    // `message.error_history` directly, so this keeps its
                    // length bounded by `max_retries + 1` with a strictly
                    // increasing `attempt_number` (spec.md §8).
                    let error_message = state.message.execution_result.as_ref().map(|r| r.error_text.clone()).unwrap_or_else(|| e.to_string());
                    let record = ErrorRecord {
                        attempt_number: state.retry_count + 1,
                        failed_sql: state.message.final_sql.clone().unwrap_or_default(),
                        error_message: error_message.clone(),
                        error_type: classify_sql_error(&error_message),
                        timestamp: Utc::now(),
                    };
                    state.conversation_history.push(ConversationEntry::error_context(format!(
                        "attempt {} failed ({}): {}",
                        record.attempt_number, record.error_type, record.error_message
                    )));
                    state.message.push_error(record);
                    state.retry_count += 1;
                    if state.retry_count >= state.max_retries {
                        return self.finalize_failure(state, request.thread_id.as_deref(), e, history_offset).await;
                    }
                    tracing::info!(database_id = %request.database_id, retry_count = state.retry_count, "orchestrator: routing back to decomposer after refiner failure");
                    continue;
                }
                Err(e) => {
                    // Refiner-node-level fault (spec.md §4.1 tie-break):
                    // terminal even if retry budget remains.
                    self.record_time(&mut state, "refiner", t0);
                    return self.finalize_failure(state, request.thread_id.as_deref(), CoreError::RefinerFailed(e.to_string()), history_offset).await;
                }
            }
        }
    }

    fn record_time(&self, state: &mut WorkflowState, agent: &str, started_at: chrono::DateTime<Utc>) {
        let elapsed = (Utc::now() - started_at).num_milliseconds().max(0) as f64 / 1000.0;
        *state.agent_execution_times.entry(agent.to_string()).or_insert(0.0) += elapsed;
    }

    async fn finalize_success(&self, mut state: WorkflowState, thread_id: Option<&str>, history_offset: usize) -> CoreResult<QueryOutcome> {
        let processing_time = (Utc::now() - state.start_time).num_milliseconds().max(0) as f64 / 1000.0;

        // Best-effort write-back; must never block or fail the primary
        // response path (spec.md §5 "writes... are best-effort and MUST
        // NOT block the primary response path").
        if let (Some(sql), question, database_id) = (state.message.final_sql.clone(), state.message.question.clone(), state.message.database_id.clone()) {
            if let Err(e) = self.training_store.auto_train_from_successful_query(&question, &sql, &database_id).await {
                tracing::warn!(database_id, error = %e, "auto-train from successful query failed (non-fatal)");
            }
        }

        state.conversation_history.push(ConversationEntry::agent(format!(
            "refiner: succeeded, was_fixed={}, rows={}",
            state.message.was_fixed,
            state.message.execution_result.as_ref().map(|r| r.rows.len()).unwrap_or(0)
        )));

        state.finished = true;
        state.success = true;
        state.current_agent = NodeState::Completed;
        state.end_time = Some(Utc::now());

        let outcome = QueryOutcome {
            success: true,
            sql: state.message.final_sql.clone(),
            rows: state.message.execution_result.as_ref().map(|r| r.rows.clone()),
            processing_time,
            retry_count: state.retry_count,
            per_agent_time: state.agent_execution_times.clone(),
            error: None,
            last_sql: None,
            error_history: Vec::new(),
        };
        state.result = Some(outcome.clone());

        self.persist_and_record(thread_id, &state, true, history_offset).await;
        Ok(outcome)
    }

    async fn finalize_failure(&self, mut state: WorkflowState, thread_id: Option<&str>, error: CoreError, history_offset: usize) -> CoreResult<QueryOutcome> {
        let processing_time = (Utc::now() - state.start_time).num_milliseconds().max(0) as f64 / 1000.0;

        state.conversation_history.push(ConversationEntry::error_context(format!("query failed terminally: {error}")));
        state.finished = true;
        state.success = false;
        state.current_agent = NodeState::Failed;
        state.end_time = Some(Utc::now());

        let outcome = QueryOutcome {
            success: false,
            sql: None,
            rows: None,
            processing_time,
            retry_count: state.retry_count,
            per_agent_time: state.agent_execution_times.clone(),
            error: Some(error.to_string()),
            last_sql: state.message.final_sql.clone(),
            error_history: state.message.error_history.clone(),
        };
        state.result = Some(outcome.clone());

        self.persist_and_record(thread_id, &state, false, history_offset).await;
        Ok(outcome)
    }

    /// Persists only the entries this call appended (`conversation_history[history_offset..]`)
    /// — never the prior turns already loaded from the store — so a
    /// threaded call's history grows by exactly this call's entries rather
    /// than doubling on every invocation (spec.md §9 append-only log).
    async fn persist_and_record(&self, thread_id: Option<&str>, state: &WorkflowState, success: bool, history_offset: usize) {
        if let Some(thread_id) = thread_id {
            let new_entries = state.conversation_history[history_offset..].to_vec();
            if let Err(e) = self.conversation_store.append(thread_id, new_entries).await {
                tracing::warn!(thread_id, error = %e, "failed to persist conversation history (non-fatal)");
            }
        }

        let mut stats = self.stats.lock().expect("orchestrator stats lock poisoned");
        stats.total += 1;
        if success {
            stats.successful += 1;
        } else {
            stats.failed += 1;
        }
        stats.total_processing_time += state.result.as_ref().map(|r| r.processing_time).unwrap_or(0.0);
        stats.total_retries += state.retry_count as u64;
    }
}
