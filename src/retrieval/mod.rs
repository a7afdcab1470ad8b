//! Retrieval & training store (spec.md §4.5): a typed-vector index that both
//! feeds contextual retrieval during generation and grows from successful
//! interactions.
//!
//! An embed-then-filter-then-rank shape, adapted to the five closed
//! [`TrainingDataType`] sources and the quality/diversity/novelty gates
//! spec.md §4.5 and §9 require.

mod filters;
mod strategy;

pub use strategy::RetrievalStrategy;

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::CoreResult;
use crate::models::{TrainingDataType, TrainingRecord};
use crate::vectorstore::{MetadataFilter, VectorRecord, VectorStore};

/// Input to [`TrainingStore::train_documentation`].
#[derive(Debug, Clone)]
pub struct DocumentationItem {
    pub title: String,
    pub content: String,
    pub category: Option<String>,
}

/// Input to [`TrainingStore::train_qa_pairs`] — the highest-signal training
/// form (spec.md §4.5).
#[derive(Debug, Clone)]
pub struct QaPairItem {
    pub question: String,
    pub sql: String,
}

/// One retrieved record plus the similarity score it was ranked on. Kept
/// alongside the record (rather than discarded after filtering) because
/// the decomposer's prompt-composition step needs it again, e.g. the
/// "QA pairs scored ≥0.8" rule in spec.md §4.5.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: TrainingRecord,
    pub score: f32,
}

/// The shape `retrieve_context` returns: up to [`RetrievalConfig::max_examples_per_type`]
/// records per data type, already quality- and diversity-filtered.
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub ddl: Vec<ScoredRecord>,
    pub documentation: Vec<ScoredRecord>,
    pub sql_examples: Vec<ScoredRecord>,
    pub qa_pairs: Vec<ScoredRecord>,
    pub domain_knowledge: Vec<ScoredRecord>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.ddl.is_empty()
            && self.documentation.is_empty()
            && self.sql_examples.is_empty()
            && self.qa_pairs.is_empty()
            && self.domain_knowledge.is_empty()
    }
}

fn data_type_key(t: TrainingDataType) -> &'static str {
    match t {
        TrainingDataType::Ddl => "DDL",
        TrainingDataType::Documentation => "DOCUMENTATION",
        TrainingDataType::SqlExample => "SQL_EXAMPLE",
        TrainingDataType::QaPair => "QA_PAIR",
        TrainingDataType::DomainKnowledge => "DOMAIN_KNOWLEDGE",
    }
}

/// How many extra candidates to pull per type before the quality/diversity
/// filters run, so a type budget of e.g. 3 still has enough raw hits left
/// after dropping low-score, too-short/long, or near-duplicate candidates.
const FETCH_MULTIPLIER: usize = 4;

/// The retrieval corpus: external vector index + embedder, wrapped with the
/// ingest and context-assembly operations spec.md §4.5 specifies. Every read
/// filter carries `(database_id, data_type)` — cross-database leakage is
/// structurally impossible since [`VectorStore::search`] takes the filter as
/// a required argument, not an afterthought.
pub struct TrainingStore {
    vector_store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

/// Namespace for the deterministic per-record ids training writes derive
/// content-addressed identity from, so re-ingesting the same logical
/// record is an upsert rather than a duplicate (spec.md §4.5 "Writes are
/// idempotent per id"; §8 "Repeated ingestion... yields at most one stored
/// record per logical identity").
const TRAINING_RECORD_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6f, 0x1a, 0x3c, 0x9e, 0x2b, 0x4d, 0x41, 0x7a, 0x93, 0x5e, 0x8c, 0x0d, 0x71, 0x4b, 0x2f, 0x66,
]);

fn content_identity(data_type: TrainingDataType, database_id: &str, content: &str) -> Uuid {
    let key = format!("{}:{database_id}:{content}", data_type_key(data_type));
    Uuid::new_v5(&TRAINING_RECORD_NAMESPACE, key.as_bytes())
}

impl TrainingStore {
    pub fn new(vector_store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, config: RetrievalConfig) -> Self {
        Self { vector_store, embedder, config }
    }

    async fn ingest_one(&self, data_type: TrainingDataType, database_id: &str, content: String) -> CoreResult<TrainingRecord> {
        self.ingest_with(data_type, database_id, content, None, None).await
    }

    async fn ingest_with(
        &self,
        data_type: TrainingDataType,
        database_id: &str,
        content: String,
        question: Option<String>,
        sql: Option<String>,
    ) -> CoreResult<TrainingRecord> {
        let embedding = self.embedder.embed(&content).await?;
        let id = content_identity(data_type, database_id, &content);

        let mut record = TrainingRecord::new(data_type, database_id, content, embedding.clone());
        record.id = id;
        record.question = question;
        record.sql = sql;

        let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
        metadata.insert("database_id".to_string(), serde_json::Value::String(database_id.to_string()));
        metadata.insert("data_type".to_string(), serde_json::Value::String(data_type_key(data_type).to_string()));
        metadata.insert("content".to_string(), serde_json::Value::String(record.content.clone()));
        if let Some(q) = &record.question {
            metadata.insert("question".to_string(), serde_json::Value::String(q.clone()));
        }
        if let Some(s) = &record.sql {
            metadata.insert("sql".to_string(), serde_json::Value::String(s.clone()));
        }
        record.metadata = metadata.clone();

        self.vector_store
            .insert(VectorRecord { id, vector: embedding, metadata })
            .await?;

        Ok(record)
    }

    pub async fn train_ddl(&self, statements: Vec<String>, database_id: &str) -> CoreResult<Vec<TrainingRecord>> {
        let mut out = Vec::with_capacity(statements.len());
        for ddl in statements {
            out.push(self.ingest_one(TrainingDataType::Ddl, database_id, ddl).await?);
        }
        Ok(out)
    }

    pub async fn train_documentation(&self, docs: Vec<DocumentationItem>, database_id: &str) -> CoreResult<Vec<TrainingRecord>> {
        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            let content = match doc.category {
                Some(category) => format!("{}\n[{}]\n{}", doc.title, category, doc.content),
                None => format!("{}\n{}", doc.title, doc.content),
            };
            out.push(self.ingest_one(TrainingDataType::Documentation, database_id, content).await?);
        }
        Ok(out)
    }

    pub async fn train_sql_examples(&self, examples: Vec<String>, database_id: &str) -> CoreResult<Vec<TrainingRecord>> {
        let mut out = Vec::with_capacity(examples.len());
        for sql in examples {
            out.push(self.ingest_with(TrainingDataType::SqlExample, database_id, sql.clone(), None, Some(sql)).await?);
        }
        Ok(out)
    }

    pub async fn train_qa_pairs(&self, pairs: Vec<QaPairItem>, database_id: &str) -> CoreResult<Vec<TrainingRecord>> {
        let mut out = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let content = format!("Q: {}\nSQL: {}", pair.question, pair.sql);
            out.push(self.ingest_with(TrainingDataType::QaPair, database_id, content, Some(pair.question), Some(pair.sql)).await?);
        }
        Ok(out)
    }

    pub async fn train_domain_knowledge(&self, facts: Vec<String>, database_id: &str) -> CoreResult<Vec<TrainingRecord>> {
        let mut out = Vec::with_capacity(facts.len());
        for fact in facts {
            out.push(self.ingest_one(TrainingDataType::DomainKnowledge, database_id, fact).await?);
        }
        Ok(out)
    }

    /// Write a QA pair from a successful query, but only if it is
    /// semantically distinct from every existing QA pair for this database
    /// (spec.md §4.5, §9 "novelty gate... to avoid corpus bloat"). Returns
    /// whether a record was actually written.
    ///
    /// This is the orchestrator's hook after a successful `process_query`
    /// (spec.md §4.1); the orchestrator is expected to call it without
    /// awaiting the result on the primary response path (spec.md §5
    /// "writes... MUST NOT block").
    pub async fn auto_train_from_successful_query(&self, question: &str, sql: &str, database_id: &str) -> CoreResult<bool> {
        let embedding = self.embedder.embed(question).await?;

        let mut filter = MetadataFilter::new();
        filter.insert("database_id".to_string(), database_id.to_string());
        filter.insert("data_type".to_string(), data_type_key(TrainingDataType::QaPair).to_string());

        let nearest = self.vector_store.search(&embedding, &filter, 1).await?;
        let is_novel = match nearest.first() {
            Some(hit) => (1.0 - hit.score) >= self.config.novelty_distance_threshold,
            None => true,
        };

        if !is_novel {
            return Ok(false);
        }

        self.train_qa_pairs(vec![QaPairItem { question: question.to_string(), sql: sql.to_string() }], database_id)
            .await?;
        Ok(true)
    }

    /// Retrieve the context block the decomposer folds into its synthesis
    /// prompt: up to `max_examples_per_type` quality- and diversity-filtered
    /// records per data type, strategy-weighted and scoped to `database_id`
    /// (spec.md §4.5).
    pub async fn retrieve_context(&self, question: &str, database_id: &str, strategy: RetrievalStrategy) -> CoreResult<RetrievedContext> {
        let embedding = self.embedder.embed(question).await?;
        let mut context = RetrievedContext::default();

        for data_type in TrainingDataType::ALL {
            let budget = strategy.budget(data_type, self.config.max_examples_per_type);
            if budget == 0 {
                continue;
            }

            let mut filter = MetadataFilter::new();
            filter.insert("database_id".to_string(), database_id.to_string());
            filter.insert("data_type".to_string(), data_type_key(data_type).to_string());

            let hits = self.vector_store.search(&embedding, &filter, budget * FETCH_MULTIPLIER).await?;
            let candidates: Vec<ScoredRecord> = hits
                .into_iter()
                .filter_map(|hit| {
                    let content = hit.metadata.get("content")?.as_str()?.to_string();
                    let mut record = TrainingRecord::new(data_type, database_id, content, Vec::new());
                    record.id = hit.id;
                    record.question = hit.metadata.get("question").and_then(|v| v.as_str()).map(str::to_string);
                    record.sql = hit.metadata.get("sql").and_then(|v| v.as_str()).map(str::to_string);
                    Some(ScoredRecord { record, score: hit.score })
                })
                .filter(|candidate| filters::passes_quality(candidate, data_type, self.config.similarity_threshold))
                .collect();

            // `budget` is the strategy-scaled search/diversity-pool size
            // (2x for a focused type); the final per-type result count is
            // always capped at the flat `max_examples_per_type` (spec.md
            // §4.5's pipeline ends with "Cap at `max_examples_per_type`
            // (default 3)" — the strategy weighting governs how much is
            // searched and diversity-filtered, not how much is returned).
            let mut kept = filters::apply_diversity(candidates, self.config.diversity_threshold, budget);
            kept.truncate(self.config.max_examples_per_type);

            match data_type {
                TrainingDataType::Ddl => context.ddl = kept,
                TrainingDataType::Documentation => context.documentation = kept,
                TrainingDataType::SqlExample => context.sql_examples = kept,
                TrainingDataType::QaPair => context.qa_pairs = kept,
                TrainingDataType::DomainKnowledge => context.domain_knowledge = kept,
            }
        }

        Ok(context)
    }

    /// Assemble the decomposer's retrieved-context prompt block in the
    /// fixed priority order spec.md §4.5 mandates: similar SQL examples (up
    /// to 2) → high-quality QA pairs (score ≥0.8, up to 2) → business
    /// documentation (up to 2). The lowest-priority section present is
    /// truncated first if the combined text would exceed `max_context_length`.
    pub fn compose_prompt_context(&self, context: &RetrievedContext) -> String {
        let mut sections: Vec<(&str, String)> = Vec::new();

        if !context.sql_examples.is_empty() {
            let body = context
                .sql_examples
                .iter()
                .take(2)
                .map(|r| format!("- {}", r.record.content))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(("Similar SQL examples", body));
        }

        let high_quality_qa: Vec<_> = context.qa_pairs.iter().filter(|r| r.score >= 0.8).take(2).collect();
        if !high_quality_qa.is_empty() {
            let body = high_quality_qa.iter().map(|r| format!("- {}", r.record.content)).collect::<Vec<_>>().join("\n");
            sections.push(("High-quality question/SQL pairs", body));
        }

        if !context.documentation.is_empty() {
            let body = context
                .documentation
                .iter()
                .take(2)
                .map(|r| format!("- {}", r.record.content))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(("Business documentation", body));
        }

        // Truncate the lowest-priority section first (the one appended
        // last) until the composed block fits the character budget.
        let mut rendered = render_sections(&sections);
        while rendered.len() > self.config.max_context_length && !sections.is_empty() {
            sections.pop();
            rendered = render_sections(&sections);
        }
        rendered
    }
}

fn render_sections(sections: &[(&str, String)]) -> String {
    sections
        .iter()
        .map(|(title, body)| format!("{title}:\n{body}"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::vectorstore::InMemoryVectorStore;

    fn store() -> TrainingStore {
        TrainingStore::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(HashingEmbedder::default()),
            RetrievalConfig {
                similarity_threshold: 0.0,
                max_examples_per_type: 3,
                max_context_length: 8000,
                diversity_threshold: 0.5,
                novelty_distance_threshold: 0.15,
            },
        )
    }

    #[tokio::test]
    async fn retrieve_context_never_crosses_database_id() {
        let store = store();
        store.train_qa_pairs(vec![QaPairItem { question: "how many users".into(), sql: "SELECT COUNT(*) FROM users".into() }], "shop").await.unwrap();
        store.train_qa_pairs(vec![QaPairItem { question: "how many users".into(), sql: "SELECT COUNT(*) FROM users".into() }], "other_db").await.unwrap();

        let context = store.retrieve_context("how many users are there", "shop", RetrievalStrategy::Balanced).await.unwrap();
        assert_eq!(context.qa_pairs.len(), 1);
        assert_eq!(context.qa_pairs[0].record.database_id, "shop");
    }

    #[tokio::test]
    async fn round_trip_freshly_inserted_qa_pair_is_retrieved() {
        let store = store();
        store.train_qa_pairs(vec![QaPairItem { question: "average sat score by city".into(), sql: "SELECT city, AVG(sat_score) FROM schools GROUP BY city".into() }], "shop").await.unwrap();

        let context = store.retrieve_context("average sat score by city", "shop", RetrievalStrategy::Balanced).await.unwrap();
        assert!(!context.qa_pairs.is_empty());
        assert!(context.qa_pairs[0].record.content.contains("AVG(sat_score)"));
    }

    #[tokio::test]
    async fn repeated_ddl_ingestion_is_idempotent() {
        let store = store();
        store.train_ddl(vec!["CREATE TABLE schools (id INT)".to_string()], "shop").await.unwrap();
        store.train_ddl(vec!["CREATE TABLE schools (id INT)".to_string()], "shop").await.unwrap();

        let stats = store.vector_store.get_stats().await.unwrap();
        assert_eq!(stats.total_vectors, 1);
    }

    #[tokio::test]
    async fn novelty_gate_skips_near_identical_questions() {
        let store = store();
        let inserted_first = store.auto_train_from_successful_query("how many users are there", "SELECT COUNT(*) FROM users", "shop").await.unwrap();
        assert!(inserted_first);

        let inserted_second = store.auto_train_from_successful_query("how many users are there", "SELECT COUNT(*) FROM users", "shop").await.unwrap();
        assert!(!inserted_second, "an identical question should not pass the novelty gate");
    }

    #[tokio::test]
    async fn novelty_gate_admits_distinct_questions() {
        let store = store();
        store.auto_train_from_successful_query("how many users are there", "SELECT COUNT(*) FROM users", "shop").await.unwrap();
        let inserted = store.auto_train_from_successful_query("what is the average order value", "SELECT AVG(total) FROM orders", "shop").await.unwrap();
        assert!(inserted);
    }

    #[tokio::test]
    async fn focused_strategy_still_caps_results_at_max_examples_per_type() {
        let store = store();
        // Each question/sql pair uses an entirely distinct vocabulary (only
        // the fixed "Q:"/"SQL:" template words are shared) so the Jaccard
        // diversity filter keeps all 8 — the per-type cap, not the
        // diversity filter, is what this test exercises.
        let topics = [
            ("alpha beta gamma delta epsilon", "col_a"),
            ("zeta eta theta iota kappa", "col_b"),
            ("lambda mu nu xi omicron", "col_c"),
            ("pi rho sigma tau upsilon", "col_d"),
            ("phi chi psi omega aleph", "col_e"),
            ("bravo charlie delta echo foxtrot", "col_f"),
            ("golf hotel india juliet kilo", "col_g"),
            ("lima mike november oscar papa", "col_h"),
        ];
        for (question, column) in topics {
            store.train_qa_pairs(vec![QaPairItem { question: question.to_string(), sql: format!("SELECT {column} FROM t") }], "shop").await.unwrap();
        }

        // QaFocused doubles the QA_PAIR search/diversity budget (6 at the
        // default 3), but the final per-type count returned must still be
        // capped at `max_examples_per_type` (spec.md §4.5's closing "Cap at
        // `max_examples_per_type`").
        let context = store.retrieve_context("alpha beta gamma", "shop", RetrievalStrategy::QaFocused).await.unwrap();
        assert_eq!(context.qa_pairs.len(), 3);
    }

    #[tokio::test]
    async fn compose_prompt_context_orders_sql_then_qa_then_docs() {
        let store = store();
        store.train_sql_examples(vec!["SELECT * FROM schools".to_string()], "shop").await.unwrap();
        store.train_qa_pairs(vec![QaPairItem { question: "q".into(), sql: "SELECT 1".into() }], "shop").await.unwrap();
        store.train_documentation(vec![DocumentationItem { title: "Schools".into(), content: "Schools table holds campus info".into(), category: None }], "shop").await.unwrap();

        let context = store.retrieve_context("schools", "shop", RetrievalStrategy::Balanced).await.unwrap();
        let rendered = store.compose_prompt_context(&context);
        let sql_pos = rendered.find("Similar SQL examples");
        let docs_pos = rendered.find("Business documentation");
        if let (Some(sql_pos), Some(docs_pos)) = (sql_pos, docs_pos) {
            assert!(sql_pos < docs_pos);
        }
    }
}
