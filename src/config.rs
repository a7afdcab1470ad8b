use serde::{Deserialize, Serialize};

/// Which benchmark a target database's question distribution resembles,
/// used to pick a retrieval-context bias and to decide whether a
/// borderline complexity score escalates to decomposition (spec.md §4.3:
/// "score == 3 → simple by default; decomposer may escalate if dataset
/// profile so configures"). BIRD's heavier reliance on external knowledge
/// and multi-step reasoning is why it is the one profile that escalates;
/// this is an Open Question spec.md leaves to policy — see DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetProfile {
    Bird,
    Spider,
    Generic,
}

impl DatasetProfile {
    pub fn escalates_borderline_complexity(&self) -> bool {
        matches!(self, Self::Bird)
    }
}

/// Resolved configuration for the query-decomposer agent.
///
/// Loading configuration from a file or environment is out of scope for
/// this crate (spec.md §1) — callers construct these structs directly and
/// hand them to the agents rather than the agents reading them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecomposerConfig {
    /// Maximum number of sub-queries the decomposer will emit for a single
    /// complex question.
    pub max_sub_queries: usize,
    pub dataset_profile: DatasetProfile,
    /// SQL dialect named in the generation prompts (spec.md §6 treats the
    /// target engine as caller-supplied configuration, the same as
    /// connection provisioning — not something this crate detects).
    pub db_type: String,
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self {
            max_sub_queries: 5,
            dataset_profile: DatasetProfile::Generic,
            db_type: "postgres".to_string(),
        }
    }
}

/// Resolved configuration for the schema-selection agent.
///
/// Pruning is required when ANY of the three thresholds below is crossed
/// (spec.md §4.2, boundary cases in §8: exactly 30 total columns at an
/// average of 6 must NOT trigger; 31 total OR average > 6 MUST trigger;
/// a token count of exactly 25,000 MUST trigger).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub average_column_count_threshold: f64,
    pub total_column_count_threshold: usize,
    pub schema_token_threshold: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            average_column_count_threshold: 6.0,
            total_column_count_threshold: 30,
            schema_token_threshold: 25_000,
        }
    }
}

/// Resolved configuration for the execution-refinement agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinerConfig {
    /// Internal repair attempts before giving up and reporting failure.
    pub max_attempts: u32,
    /// Wall-clock budget for a single query execution.
    pub execution_timeout_secs: u64,
    /// `LIMIT` cap applied to statements that omit one or request more.
    pub max_result_rows: u64,
    /// Target engine, for the per-engine safety nuances beyond the generic
    /// deny-list (spec.md §4.4 "SUPPLEMENT"; SPEC_FULL.md §B).
    pub db_type: String,
    /// Whether to run the advisory `refiner.sql_validation` LLM pass before
    /// execution (spec.md §4.4 "if a validation prompt is configured").
    /// Off by default: it is an extra LLM round-trip whose verdict never
    /// blocks execution, so callers opt in only when they want the logged
    /// second opinion — an Open Question spec.md leaves to policy, see
    /// DESIGN.md.
    pub enable_llm_prevalidation: bool,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            execution_timeout_secs: 120,
            max_result_rows: 1000,
            db_type: "postgres".to_string(),
            enable_llm_prevalidation: false,
        }
    }
}

/// Resolved configuration for the retrieval and training store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Minimum cosine similarity for a candidate to be considered at all.
    pub similarity_threshold: f32,
    /// Maximum records of any single training-record type surfaced per
    /// retrieval call.
    pub max_examples_per_type: usize,
    /// Maximum combined length (characters) of the rendered retrieval
    /// context handed to an agent prompt.
    pub max_context_length: usize,
    /// Jaccard-similarity ceiling above which a candidate is dropped as a
    /// near-duplicate of one already selected (spec.md §4.5 diversity
    /// filter).
    pub diversity_threshold: f32,
    /// Minimum cosine *distance* (1 - similarity) a candidate QA pair must
    /// have from every existing QA pair for `auto_train_from_successful_query`
    /// to write it — the novelty gate spec.md §4.5/§9 requires to avoid
    /// corpus bloat from near-identical successes.
    pub novelty_distance_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            max_examples_per_type: 3,
            max_context_length: 8000,
            diversity_threshold: 0.5,
            novelty_distance_threshold: 0.15,
        }
    }
}

/// Timeouts and limits for outbound LLM calls, shared by all three agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub request_timeout_secs: u64,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            temperature: 0.0,
        }
    }
}

/// Top-level configuration for the orchestrator and every agent it drives.
///
/// Construct with [`OrchestratorConfig::default`] and override individual
/// fields before handing the whole struct down to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub selector: SelectorConfig,
    pub decomposer: DecomposerConfig,
    pub refiner: RefinerConfig,
    pub retrieval: RetrievalConfig,
    pub llm: LlmConfig,
    /// Number of selector→decomposer→refiner cycles permitted before the
    /// orchestrator gives up on a query and returns `Failed` (spec.md §4.1).
    pub max_retries: u32,
    /// How many prior conversation turns are folded into agent prompts.
    pub conversation_history_limit: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            selector: SelectorConfig::default(),
            decomposer: DecomposerConfig::default(),
            refiner: RefinerConfig::default(),
            retrieval: RetrievalConfig::default(),
            llm: LlmConfig::default(),
            max_retries: 3,
            conversation_history_limit: 10,
        }
    }
}

impl OrchestratorConfig {
    pub fn max_retries_default() -> u32 {
        3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_thresholds() {
        let cfg = OrchestratorConfig {
            max_retries: OrchestratorConfig::max_retries_default(),
            conversation_history_limit: 10,
            ..Default::default()
        };
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.refiner.max_attempts, 3);
        assert_eq!(cfg.refiner.execution_timeout_secs, 120);
        assert_eq!(cfg.llm.request_timeout_secs, 30);
        assert_eq!(cfg.retrieval.similarity_threshold, 0.7);
        assert_eq!(cfg.retrieval.max_examples_per_type, 3);
        assert_eq!(cfg.retrieval.max_context_length, 8000);
    }
}
