//! Query Decomposer (spec.md §4.3): decides whether a question needs a
//! single SQL statement or a sequential sub-question plan, pulls retrieval
//! context to ground the synthesis prompt, and produces `final_sql`.
//!
//! Complexity is judged by a closed eight-indicator scoring rule
//! (spec.md §4.3) rather than a single LLM-judged call, and extended with
//! retrieval-context composition and error-aware regeneration.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::{DatasetProfile, DecomposerConfig, LlmConfig};
use crate::error::{CoreError, CoreResult};
use crate::llm::{extract_json, extract_sql, LlmClient};
use crate::models::{ConversationEntry, ConversationEntryType, DecompositionStrategy, ErrorRecord, Message};
use crate::prompts::{PromptKey, PromptRegistry};
use crate::retrieval::{RetrievalStrategy, TrainingStore};

/// Running counters the decomposer exposes for `Orchestrator::get_stats`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecomposerStats {
    pub query_count: u64,
    pub decomposed_count: u64,
    pub error_aware_regenerations: u64,
}

/// Whether a question can be answered with one SQL statement or needs an
/// LLM-authored sub-question plan first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComplexityLevel {
    Simple,
    Complex,
}

/// The eight indicators spec.md §4.3 names, each a small keyword deny-list
/// over the lowercased question. `score` is the count of indicators that
/// fired; `score <= 2` is simple, `score >= 4` is complex, and `score == 3`
/// is the borderline case a [`DatasetProfile`] may escalate.
const AGGREGATION_MARKERS: &[&str] = &["average", "avg", "sum of", "total", "count of", "how many", "maximum", "minimum", "mean "];
const GROUPING_MARKERS: &[&str] = &["each ", "every ", " per ", "grouped by", "breakdown by", "by category", "by month", "by year"];
const FILTERING_MARKERS: &[&str] = &["where ", "only ", "at least", "no more than", "excluding", "whose ", "that have", "with a "];
const SORTING_MARKERS: &[&str] = &["top ", "highest", "lowest", "rank", "ordered by", "sorted by", "best ", "worst ", "most "];
const JOINING_MARKERS: &[&str] = &["and their", "along with", "together with", "related to", "associated with", "corresponding"];
const COMPARISON_MARKERS: &[&str] = &["compare", "versus", " vs ", "difference between", "more than", "greater than", "higher than"];
const TEMPORAL_MARKERS: &[&str] = &["before ", "after ", "since ", "until ", "last year", "this month", "between ", "trend", "over time", "each year", "each month"];
const MULTI_ENTITY_MARKERS: &[&str] = &[" and ", ", "];

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| haystack.contains(m))
}

/// Score a question against the eight indicators. Padded with surrounding
/// spaces so word-boundary markers like `"per "` or `" and "` still match
/// at the start or end of the question.
fn complexity_score(question: &str) -> u32 {
    let padded = format!(" {} ", question.to_lowercase());
    let indicators = [
        contains_any(&padded, AGGREGATION_MARKERS),
        contains_any(&padded, GROUPING_MARKERS),
        contains_any(&padded, FILTERING_MARKERS),
        contains_any(&padded, SORTING_MARKERS),
        contains_any(&padded, JOINING_MARKERS),
        contains_any(&padded, COMPARISON_MARKERS),
        contains_any(&padded, TEMPORAL_MARKERS),
        contains_any(&padded, MULTI_ENTITY_MARKERS),
    ];
    indicators.iter().filter(|&&fired| fired).count() as u32
}

fn classify(score: u32, profile: DatasetProfile) -> ComplexityLevel {
    match score {
        0..=2 => ComplexityLevel::Simple,
        3 if profile.escalates_borderline_complexity() => ComplexityLevel::Complex,
        3 => ComplexityLevel::Simple,
        _ => ComplexityLevel::Complex,
    }
}

fn retrieval_strategy_for(profile: DatasetProfile) -> RetrievalStrategy {
    match profile {
        DatasetProfile::Bird => RetrievalStrategy::ContextFocused,
        DatasetProfile::Spider => RetrievalStrategy::SqlFocused,
        DatasetProfile::Generic => RetrievalStrategy::Balanced,
    }
}

pub struct QueryDecomposer {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptRegistry>,
    training_store: Arc<TrainingStore>,
    config: DecomposerConfig,
    llm_config: LlmConfig,
    stats: Mutex<DecomposerStats>,
}

impl QueryDecomposer {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<PromptRegistry>, training_store: Arc<TrainingStore>, config: DecomposerConfig, llm_config: LlmConfig) -> Self {
        Self { llm, prompts, training_store, config, llm_config, stats: Mutex::new(DecomposerStats::default()) }
    }

    pub fn stats(&self) -> DecomposerStats {
        *self.stats.lock().expect("decomposer stats lock poisoned")
    }

    /// Run the decomposer over `message`, writing `sub_questions`,
    /// `decomposition_strategy`, `final_sql`, and `qa_pairs`.
    ///
    /// `conversation_history` should already be truncated to the caller's
    /// window (e.g. via [`crate::conversation::last_n`]) — the decomposer
    /// does not own conversation persistence itself (spec.md §4.1).
    pub async fn decompose(&self, message: &mut Message, conversation_history: &[ConversationEntry]) -> CoreResult<()> {
        self.stats.lock().expect("decomposer stats lock poisoned").query_count += 1;

        let score = complexity_score(&message.question);
        let level = classify(score, self.config.dataset_profile);

        let sub_questions = match level {
            ComplexityLevel::Simple => vec![message.question.clone()],
            ComplexityLevel::Complex => {
                self.stats.lock().expect("decomposer stats lock poisoned").decomposed_count += 1;
                self.decompose_via_llm(message).await?
            }
        };
        let sub_questions: Vec<String> = sub_questions.into_iter().take(self.config.max_sub_queries).collect();

        let strategy = retrieval_strategy_for(self.config.dataset_profile);
        let retrieved = self.training_store.retrieve_context(&message.question, &message.database_id, strategy).await?;
        let retrieved_context = self.training_store.compose_prompt_context(&retrieved);

        let error_context = if message.error_context_available {
            self.stats.lock().expect("decomposer stats lock poisoned").error_aware_regenerations += 1;
            render_error_context(&message.error_history)
        } else {
            String::new()
        };

        let schema = message.schema_description.clone().unwrap_or_default();
        let foreign_keys = message.foreign_key_description.clone().unwrap_or_default();

        let (final_sql, strategy_used) = if sub_questions.len() <= 1 {
            let history_text = render_conversation_history(conversation_history);
            let sql = self
                .synthesize_simple(message, &schema, &foreign_keys, &retrieved_context, &history_text, &error_context)
                .await?;
            (sql, DecompositionStrategy::Simple)
        } else {
            let sql = self
                .synthesize_cot(message, &schema, &foreign_keys, &sub_questions, &retrieved_context, &error_context)
                .await?;
            (sql, DecompositionStrategy::Cot)
        };

        let qa_pairs = render_qa_pairs(&sub_questions, &final_sql, strategy_used);

        message.sub_questions = sub_questions;
        message.decomposition_strategy = Some(strategy_used);
        message.final_sql = Some(final_sql);
        message.qa_pairs = Some(qa_pairs);
        Ok(())
    }

    async fn decompose_via_llm(&self, message: &Message) -> CoreResult<Vec<String>> {
        let schema = message.schema_description.clone().unwrap_or_default();
        let foreign_keys = message.foreign_key_description.clone().unwrap_or_default();
        let max_sub_questions = self.config.max_sub_queries.to_string();

        let mut values = HashMap::new();
        values.insert("schema", schema.as_str());
        values.insert("foreign_keys", foreign_keys.as_str());
        values.insert("max_sub_questions", max_sub_questions.as_str());
        values.insert("question", message.question.as_str());
        values.insert("evidence", message.evidence.as_str());

        let template = self.prompts.get(PromptKey::QueryDecomposition);
        let (system_prompt, user_prompt) = template.format(&values)?;

        let response = self
            .llm
            .generate(&system_prompt, &user_prompt, self.llm_config.temperature, 1024, self.llm_config.request_timeout_secs)
            .await
            .map_err(|e| CoreError::DecomposerFailed(e.to_string()))?;

        if !response.success {
            return Err(CoreError::DecomposerFailed(response.error.unwrap_or_else(|| "LLM returned no content".to_string())));
        }

        match parse_decomposition(&response.content) {
            Some(subs) if !subs.is_empty() => Ok(subs),
            _ => {
                tracing::warn!(database_id = %message.database_id, "decomposer response was malformed, falling back to the original question");
                Ok(vec![message.question.clone()])
            }
        }
    }

    async fn synthesize_simple(
        &self,
        message: &Message,
        schema: &str,
        foreign_keys: &str,
        retrieved_context: &str,
        conversation_history: &str,
        error_context: &str,
    ) -> CoreResult<String> {
        let mut values = HashMap::new();
        values.insert("schema", schema);
        values.insert("foreign_keys", foreign_keys);
        values.insert("db_type", self.config.db_type.as_str());
        values.insert("retrieved_context", retrieved_context);
        values.insert("conversation_history", conversation_history);
        values.insert("error_context", error_context);
        values.insert("question", message.question.as_str());
        values.insert("evidence", message.evidence.as_str());

        let template = self.prompts.get(PromptKey::SimpleSqlGeneration);
        let (system_prompt, user_prompt) = template.format(&values)?;
        self.generate_sql(&system_prompt, &user_prompt).await
    }

    async fn synthesize_cot(
        &self,
        message: &Message,
        schema: &str,
        foreign_keys: &str,
        sub_questions: &[String],
        retrieved_context: &str,
        error_context: &str,
    ) -> CoreResult<String> {
        let sub_questions_text = sub_questions
            .iter()
            .enumerate()
            .map(|(i, q)| format!("{}. {}", i + 1, q))
            .collect::<Vec<_>>()
            .join("\n");

        let mut values = HashMap::new();
        values.insert("schema", schema);
        values.insert("foreign_keys", foreign_keys);
        values.insert("db_type", self.config.db_type.as_str());
        values.insert("sub_questions", sub_questions_text.as_str());
        values.insert("retrieved_context", retrieved_context);
        values.insert("error_context", error_context);
        values.insert("question", message.question.as_str());
        values.insert("evidence", message.evidence.as_str());

        let template = self.prompts.get(PromptKey::CotSqlGeneration);
        let (system_prompt, user_prompt) = template.format(&values)?;
        self.generate_sql(&system_prompt, &user_prompt).await
    }

    async fn generate_sql(&self, system_prompt: &str, user_prompt: &str) -> CoreResult<String> {
        let response = self
            .llm
            .generate(system_prompt, user_prompt, self.llm_config.temperature, 1024, self.llm_config.request_timeout_secs)
            .await
            .map_err(|e| CoreError::DecomposerFailed(e.to_string()))?;

        if !response.success {
            return Err(CoreError::DecomposerFailed(response.error.unwrap_or_else(|| "LLM returned no content".to_string())));
        }

        extract_sql(&response.content).ok_or(CoreError::EmptySql)
    }
}

fn parse_decomposition(content: &str) -> Option<Vec<String>> {
    let json_str = extract_json(content)?;
    let parsed: serde_json::Value = serde_json::from_str(json_str).ok()?;
    let subs = parsed.get("sub_questions")?.as_array()?;
    let out: Vec<String> = subs.iter().filter_map(|v| v.as_str().map(str::to_string)).filter(|s| !s.trim().is_empty()).collect();
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Render the last few conversation turns for the simple-generation prompt,
/// skipping interrupted/error-context entries — those are surfaced
/// separately via `error_context` (spec.md §4.1 "context propagation").
fn render_conversation_history(history: &[ConversationEntry]) -> String {
    history
        .iter()
        .filter(|e| matches!(e.entry_type, ConversationEntryType::System | ConversationEntryType::Agent))
        .map(|e| format!("- {}", truncate(&e.content, 200)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    }
}

/// Render prior failed attempts as a "do not repeat" block, flagging a
/// repeated `error_type` across the most recent attempts so the model
/// addresses the root cause rather than retrying cosmetic variations
/// (spec.md §4.3 "error-aware regeneration").
fn render_error_context(error_history: &[ErrorRecord]) -> String {
    if error_history.is_empty() {
        return String::new();
    }

    let mut lines = vec!["PREVIOUS ATTEMPTS THAT FAILED (do not repeat these SQL strings):".to_string()];
    for record in error_history {
        lines.push(format!(
            "Attempt {}: SQL: {} | ERROR ({}): {}",
            record.attempt_number, record.failed_sql, record.error_type, record.error_message
        ));
    }

    if error_history.len() >= 2 {
        let last_two_same = error_history[error_history.len() - 2..].windows(2).all(|w| w[0].error_type == w[1].error_type);
        if last_two_same {
            let repeated = error_history.last().expect("checked non-empty above").error_type;
            lines.push(format!("NOTE: the last two attempts both failed with a {repeated} error - address the root cause, not just the syntax."));
        }
    }

    lines.join("\n")
}

/// A human-readable trace of the decomposition for `Message::qa_pairs`:
/// the ordered sub-question plan (if any) followed by the SQL it produced.
fn render_qa_pairs(sub_questions: &[String], final_sql: &str, strategy: DecompositionStrategy) -> String {
    match strategy {
        DecompositionStrategy::Simple => format!("Q: {}\nSQL: {}", sub_questions.first().map(String::as_str).unwrap_or(""), final_sql),
        DecompositionStrategy::Cot => {
            let steps = sub_questions.iter().enumerate().map(|(i, q)| format!("Step {}: {}", i + 1, q)).collect::<Vec<_>>().join("\n");
            format!("{steps}\nFinal SQL: {final_sql}")
        }
    }
}
