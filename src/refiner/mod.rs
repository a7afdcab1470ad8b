//! Execution Refiner (spec.md §4.4): the mandatory safety gate in front of
//! every executed statement, plus the internal repair loop that tries to
//! recover from a failed execution before surfacing the error upward.
//!
//! Combines a try-execute/generate-correction repair loop with a rule-based
//! deny-list, extended with a richer pattern set and a structured,
//! risk-leveled `SafetyReport` (spec.md §4.4) rather than a plain pass/fail,
//! plus a per-engine nuance check as a second, additive layer (SPEC_FULL.md §B).

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use chrono::Utc;
use regex::Regex;

use crate::config::{LlmConfig, RefinerConfig};
use crate::error::{classify_sql_error, CoreError, CoreResult};
use crate::executor::QueryExecutor;
use crate::llm::{extract_json, extract_sql, LlmClient};
use crate::models::{ErrorRecord, Message};
use crate::prompts::{PromptKey, PromptRegistry};

/// Severity of a blocked statement, reported alongside the block reason
/// rather than a bare pass/fail (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Result of the mandatory rule-based pre-execution check.
#[derive(Debug, Clone)]
pub struct SafetyReport {
    pub is_safe: bool,
    pub risk_level: RiskLevel,
    pub detected_pattern: Option<String>,
    pub recommendations: Vec<String>,
}

impl SafetyReport {
    fn safe() -> Self {
        Self { is_safe: true, risk_level: RiskLevel::Low, detected_pattern: None, recommendations: Vec::new() }
    }

    fn unsafe_with(risk_level: RiskLevel, pattern: impl Into<String>, recommendation: impl Into<String>) -> Self {
        Self { is_safe: false, risk_level, detected_pattern: Some(pattern.into()), recommendations: vec![recommendation.into()] }
    }
}

struct DenyRule {
    pattern: Regex,
    risk: RiskLevel,
    label: &'static str,
    recommendation: &'static str,
}

/// The curated pattern list spec.md §4.4 names, ordered most-to-least
/// severe so the first match reported is the most serious one present.
static DENY_RULES: LazyLock<Vec<DenyRule>> = LazyLock::new(|| {
    vec![
        DenyRule {
            pattern: Regex::new(r"(?i);\s*(DROP|DELETE|UPDATE|INSERT|CREATE|ALTER|TRUNCATE)\b").unwrap(),
            risk: RiskLevel::Critical,
            label: "stacked mutation statement",
            recommendation: "submit a single read-only statement",
        },
        DenyRule {
            pattern: Regex::new(r"(?i)\bxp_cmdshell\b|\bsp_executesql\b").unwrap(),
            risk: RiskLevel::Critical,
            label: "shell/dynamic-execution procedure",
            recommendation: "remove the procedure call",
        },
        DenyRule {
            pattern: Regex::new(r"(?i)\bUNION\s+SELECT\b").unwrap(),
            risk: RiskLevel::High,
            label: "UNION SELECT",
            recommendation: "rewrite without UNION SELECT or confirm the additional result set is intended",
        },
        DenyRule {
            pattern: Regex::new(r"(?i)\bEXEC\s*\(").unwrap(),
            risk: RiskLevel::High,
            label: "EXEC(...)",
            recommendation: "remove dynamic statement execution",
        },
        DenyRule {
            pattern: Regex::new(r"(?i)\b(SLEEP|BENCHMARK|LOAD_FILE)\s*\(|\bINTO\s+(OUTFILE|DUMPFILE)\b").unwrap(),
            risk: RiskLevel::High,
            label: "dangerous function or file operation",
            recommendation: "remove the flagged function/clause",
        },
        DenyRule {
            pattern: Regex::new(r"(?i)'\s*OR\s*'1'\s*=\s*'1|\bOR\s+1\s*=\s*1\b|\b1\s*=\s*1\b").unwrap(),
            risk: RiskLevel::Medium,
            label: "tautological condition (possible injection)",
            recommendation: "replace the tautological predicate with the intended filter",
        },
    ]
});

static HAS_LIMIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\s+(\d+)").unwrap());

/// Mandatory rule-based pre-execution check (spec.md §4.4). Runs before any
/// LLM pre-validation and is the only layer allowed to block execution.
fn validate_safety(sql: &str) -> SafetyReport {
    let trimmed = sql.trim();
    let leading_keyword = trimmed.split_whitespace().next().unwrap_or("").to_uppercase();
    if leading_keyword != "SELECT" && leading_keyword != "WITH" {
        return SafetyReport::unsafe_with(
            RiskLevel::Critical,
            "leading keyword is not SELECT or WITH",
            "only SELECT or WITH statements are permitted",
        );
    }

    for rule in DENY_RULES.iter() {
        if rule.pattern.is_match(trimmed) {
            return SafetyReport::unsafe_with(rule.risk, rule.label, rule.recommendation);
        }
    }

    SafetyReport::safe()
}

/// Per-engine nuance layer beyond the generic deny-list (SPEC_FULL.md §B).
fn validate_for_engine(sql: &str, db_type: &str) -> Option<SafetyReport> {
    match db_type {
        "postgres" if sql.contains("pg_") || sql.contains("pgcrypto") => {
            Some(SafetyReport::unsafe_with(RiskLevel::High, "postgres system catalog/function access", "remove references to pg_* catalogs or pgcrypto"))
        }
        "mysql" | "mariadb" if sql.contains("LOAD_FILE") || sql.contains("INTO OUTFILE") => {
            Some(SafetyReport::unsafe_with(RiskLevel::High, "mysql file operation", "remove LOAD_FILE/INTO OUTFILE"))
        }
        _ => None,
    }
}

/// Ensure a `LIMIT` clause is present and does not exceed `max_rows`,
/// appending one when absent (spec.md §4.4 "Supplemented features").
fn normalize_limit(sql: &str, max_rows: u64) -> String {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    match HAS_LIMIT.captures(trimmed) {
        Some(caps) => {
            let current: u64 = caps[1].parse().unwrap_or(max_rows);
            if current > max_rows {
                HAS_LIMIT.replace(trimmed, format!("LIMIT {max_rows}")).to_string()
            } else {
                trimmed.to_string()
            }
        }
        None => format!("{trimmed} LIMIT {max_rows}"),
    }
}

/// Append `<-- CHECK THIS` to any schema line naming a column the error
/// message mentions, flagging the likely culprit (spec.md §4.4 "schema
/// description... for the repair
/// prompt"). Schema lines here are the selector's rendered
/// `(column, display_name. Value examples: [...]. comment),` format.
fn highlight_schema_for_error(schema_description: &str, error_message: &str) -> String {
    let lower_error = error_message.to_lowercase();
    schema_description
        .lines()
        .map(|line| {
            let column_name = line.trim_start().strip_prefix('(').and_then(|rest| rest.split(',').next());
            let flagged = column_name.map(|c| lower_error.contains(&c.to_lowercase())).unwrap_or(false);
            if flagged {
                format!("{line} <-- CHECK THIS")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_attempt_history(error_history: &[ErrorRecord]) -> String {
    error_history
        .iter()
        .map(|r| format!("Attempt {}:\nSQL: {}\nError: {}", r.attempt_number, r.failed_sql, r.error_message))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Running counters the refiner exposes for `Orchestrator::get_stats`
/// (spec.md §4.4 "Emits statistics").
#[derive(Debug, Clone, Copy, Default)]
pub struct RefinerStats {
    pub validation_count: u64,
    pub execution_count: u64,
    pub refinement_count: u64,
    pub security_violation_count: u64,
    success_count: u64,
}

impl RefinerStats {
    pub fn success_rate(&self) -> f64 {
        if self.execution_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.execution_count as f64
        }
    }
}

pub struct ExecutionRefiner {
    executor: Arc<dyn QueryExecutor>,
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptRegistry>,
    config: RefinerConfig,
    llm_config: LlmConfig,
    stats: Mutex<RefinerStats>,
}

impl ExecutionRefiner {
    pub fn new(executor: Arc<dyn QueryExecutor>, llm: Arc<dyn LlmClient>, prompts: Arc<PromptRegistry>, config: RefinerConfig, llm_config: LlmConfig) -> Self {
        Self { executor, llm, prompts, config, llm_config, stats: Mutex::new(RefinerStats::default()) }
    }

    pub fn stats(&self) -> RefinerStats {
        *self.stats.lock().expect("refiner stats lock poisoned")
    }

    /// Validate, execute, and (on a repairable failure) repair `final_sql`
    /// up to `config.max_attempts` times, writing `execution_result`,
    /// `was_fixed`, and (if replaced) `final_sql`.
    ///
    /// These internal attempts are independent of the orchestrator's retry
    /// loop (spec.md §4.4) and are never written to `message.error_history`
    /// directly: on terminal failure only the latest error is surfaced (via
    /// `message.execution_result` and the returned `CoreError`), and it is
    /// the orchestrator's job to record exactly one `ErrorRecord` per
    /// `refine()` invocation, keeping `error_history` bounded by
    /// `max_retries + 1` and its `attempt_number`s strictly increasing
    /// (spec.md §8).
    pub async fn refine(&self, message: &mut Message) -> CoreResult<()> {
        self.stats.lock().expect("refiner stats lock poisoned").validation_count += 1;

        let original_sql = message.final_sql.clone().unwrap_or_default();
        if original_sql.trim().is_empty() {
            return Err(CoreError::NoSql);
        }

        let mut current_sql = normalize_limit(&original_sql, self.config.max_result_rows);
        self.gate_safety(&current_sql)?;
        self.advisory_prevalidate(message, &current_sql).await;

        let mut attempt_number: u32 = 0;
        let mut internal_attempts: Vec<ErrorRecord> = Vec::new();
        loop {
            attempt_number += 1;
            self.stats.lock().expect("refiner stats lock poisoned").execution_count += 1;

            let exec_result = self.executor.execute(&message.database_id, &current_sql, self.config.execution_timeout_secs).await?;

            if exec_result.is_successful {
                self.stats.lock().expect("refiner stats lock poisoned").success_count += 1;
                message.was_fixed = attempt_number > 1;
                message.final_sql = Some(current_sql);
                message.execution_result = Some(exec_result);
                return Ok(());
            }

            let error_type = classify_sql_error(&exec_result.error_text);
            internal_attempts.push(ErrorRecord {
                attempt_number,
                failed_sql: current_sql.clone(),
                error_message: exec_result.error_text.clone(),
                error_type,
                timestamp: Utc::now(),
            });

            if attempt_number >= self.config.max_attempts || !error_type.is_repairable() {
                message.final_sql = Some(current_sql);
                message.execution_result = Some(exec_result.clone());
                return Err(CoreError::ExecutionFailed(exec_result.error_text));
            }

            self.stats.lock().expect("refiner stats lock poisoned").refinement_count += 1;
            let repaired = self.generate_repair(message, &current_sql, &exec_result.error_text, &internal_attempts).await?;
            current_sql = normalize_limit(&repaired, self.config.max_result_rows);
            self.gate_safety(&current_sql)?;
        }
    }

    fn gate_safety(&self, sql: &str) -> CoreResult<()> {
        let report = validate_safety(sql);
        if !report.is_safe {
            self.stats.lock().expect("refiner stats lock poisoned").security_violation_count += 1;
            return Err(CoreError::SecurityViolation(report.detected_pattern.unwrap_or_default()));
        }
        if let Some(report) = validate_for_engine(sql, &self.config.db_type) {
            self.stats.lock().expect("refiner stats lock poisoned").security_violation_count += 1;
            return Err(CoreError::SecurityViolation(report.detected_pattern.unwrap_or_default()));
        }
        Ok(())
    }

    /// Advisory-only LLM review: a negative verdict is logged, never
    /// blocking (spec.md §4.4 "does NOT block execution").
    async fn advisory_prevalidate(&self, message: &Message, sql: &str) {
        if !self.config.enable_llm_prevalidation {
            return;
        }

        let schema = message.schema_description.clone().unwrap_or_default();
        let mut values = HashMap::new();
        values.insert("schema", schema.as_str());
        values.insert("sql", sql);

        let Ok((system_prompt, user_prompt)) = self.prompts.get(PromptKey::SqlValidation).format(&values) else {
            return;
        };
        let Ok(response) = self
            .llm
            .generate(&system_prompt, &user_prompt, self.llm_config.temperature, 512, self.llm_config.request_timeout_secs)
            .await
        else {
            return;
        };
        if !response.success {
            return;
        }

        if let Some(json_str) = extract_json(&response.content) {
            if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(json_str) {
                if parsed.get("is_valid").and_then(|v| v.as_bool()) == Some(false) {
                    tracing::warn!(sql, report = %parsed, "advisory SQL validation raised concerns (non-blocking)");
                }
            }
        }
    }

    async fn generate_repair(&self, message: &Message, failed_sql: &str, error_message: &str, internal_attempts: &[ErrorRecord]) -> CoreResult<String> {
        let schema = message.schema_description.clone().unwrap_or_default();
        let highlighted_schema = highlight_schema_for_error(&schema, error_message);
        let foreign_keys = message.foreign_key_description.clone().unwrap_or_default();
        let attempt_history = render_attempt_history(internal_attempts);

        let mut values = HashMap::new();
        values.insert("schema", highlighted_schema.as_str());
        values.insert("foreign_keys", foreign_keys.as_str());
        values.insert("question", message.question.as_str());
        values.insert("failed_sql", failed_sql);
        values.insert("error_message", error_message);
        values.insert("attempt_history", attempt_history.as_str());

        let template = self.prompts.get(PromptKey::SqlRefinement);
        let (system_prompt, user_prompt) = template.format(&values)?;

        let response = self
            .llm
            .generate(&system_prompt, &user_prompt, self.llm_config.temperature, 1024, self.llm_config.request_timeout_secs)
            .await
            .map_err(|e| CoreError::RefinerFailed(e.to_string()))?;

        if !response.success {
            return Err(CoreError::RefinerFailed(response.error.unwrap_or_else(|| "LLM returned no content".to_string())));
        }

        extract_sql(&response.content).ok_or(CoreError::EmptySql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::executor::FakeExecutor;
    use crate::llm::ScriptedLlmClient;
    use crate::models::SqlExecutionResult;

    fn refiner_with(executor: Arc<dyn QueryExecutor>, responses: Vec<&str>) -> ExecutionRefiner {
        ExecutionRefiner::new(executor, Arc::new(ScriptedLlmClient::new(responses)), Arc::new(PromptRegistry::default()), RefinerConfig::default(), LlmConfig::default())
    }

    fn message_with_sql(sql: &str) -> Message {
        let mut msg = Message::new("shop", "List all schools", "", 3);
        msg.schema_description = Some("schools:\n  (id, ID. Value examples: []. ),\n  (city, City. Value examples: []. ),".to_string());
        msg.foreign_key_description = Some(String::new());
        msg.final_sql = Some(sql.to_string());
        msg
    }

    #[test]
    fn rejects_non_select_leading_keyword() {
        let report = validate_safety("DELETE FROM users");
        assert!(!report.is_safe);
        assert_eq!(report.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn rejects_stacked_mutation() {
        let report = validate_safety("SELECT 1; DROP TABLE users");
        assert!(!report.is_safe);
    }

    #[test]
    fn rejects_union_select() {
        let report = validate_safety("SELECT * FROM users UNION SELECT * FROM passwords");
        assert!(!report.is_safe);
        assert_eq!(report.risk_level, RiskLevel::High);
    }

    #[test]
    fn rejects_tautological_condition() {
        let report = validate_safety("SELECT * FROM users WHERE 1=1");
        assert!(!report.is_safe);
        assert_eq!(report.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn accepts_well_formed_select() {
        let report = validate_safety("SELECT id, city FROM schools WHERE city = 'Plano'");
        assert!(report.is_safe);
    }

    #[test]
    fn normalize_limit_appends_when_missing() {
        assert_eq!(normalize_limit("SELECT * FROM schools", 1000), "SELECT * FROM schools LIMIT 1000");
    }

    #[test]
    fn normalize_limit_caps_an_oversized_limit() {
        assert_eq!(normalize_limit("SELECT * FROM schools LIMIT 50000", 1000), "SELECT * FROM schools LIMIT 1000");
    }

    #[test]
    fn normalize_limit_leaves_a_reasonable_limit_untouched() {
        assert_eq!(normalize_limit("SELECT * FROM schools LIMIT 10", 1000), "SELECT * FROM schools LIMIT 10");
    }

    #[tokio::test]
    async fn security_violation_is_terminal_and_never_executes() {
        let refiner = refiner_with(Arc::new(FakeExecutor::default()), vec![]);
        let mut msg = message_with_sql("DELETE FROM schools");
        let err = refiner.refine(&mut msg).await.unwrap_err();
        assert!(matches!(err, CoreError::SecurityViolation(_)));
        assert_eq!(refiner.stats().security_violation_count, 1);
        assert_eq!(refiner.stats().execution_count, 0);
    }

    #[tokio::test]
    async fn successful_first_attempt_is_not_marked_fixed() {
        let refiner = refiner_with(Arc::new(FakeExecutor::succeeding()), vec![]);
        let mut msg = message_with_sql("SELECT id FROM schools");
        refiner.refine(&mut msg).await.unwrap();
        assert!(!msg.was_fixed);
        assert!(msg.execution_result.unwrap().is_successful);
    }

    #[tokio::test]
    async fn repairable_failure_retries_with_llm_generated_fix() {
        let executor = Arc::new(FakeExecutor::failing_then_succeeding("relation \"shcools\" does not exist"));
        let refiner = refiner_with(executor, vec!["```sql\nSELECT id FROM schools\n```"]);
        let mut msg = message_with_sql("SELECT id FROM shcools");
        refiner.refine(&mut msg).await.unwrap();

        assert!(msg.was_fixed);
        assert_eq!(msg.final_sql.as_deref(), Some("SELECT id FROM schools LIMIT 1000"));
        assert_eq!(refiner.stats().refinement_count, 1);
        // The failed first attempt is internal to this invocation and never
        // surfaces to `message.error_history` — only the orchestrator
        // records a single entry per `refine()` invocation, and this one
        // succeeded.
        assert!(msg.error_history.is_empty());
    }

    #[tokio::test]
    async fn exhausting_attempts_surfaces_the_latest_error() {
        let executor = Arc::new(FakeExecutor::always_failing("syntax error near \"FORM\""));
        let refiner = refiner_with(executor, vec!["```sql\nSELECT 1 FORM schools\n```", "```sql\nSELECT 1 FORM schools\n```"]);
        let mut msg = message_with_sql("SELECT 1 FORM schools");
        let err = refiner.refine(&mut msg).await.unwrap_err();

        assert!(matches!(err, CoreError::ExecutionFailed(_)));
        // All 3 internal attempts stay local to this invocation; the
        // orchestrator is the only thing that appends to
        // `message.error_history`, one record per `refine()` call.
        assert!(msg.error_history.is_empty());
        assert_eq!(msg.execution_result.unwrap().error_text, "syntax error near \"FORM\"");
    }

    #[test]
    fn highlight_marks_the_column_named_in_the_error() {
        let schema = "schools:\n  (id, ID. Value examples: []. ),\n  (city, City. Value examples: []. ),";
        let highlighted = highlight_schema_for_error(schema, "column \"city\" does not exist");
        assert!(highlighted.contains("(city, City. Value examples: []. ), <-- CHECK THIS"));
        assert!(!highlighted.contains("(id, ID. Value examples: []. ), <-- CHECK THIS"));
    }
}
