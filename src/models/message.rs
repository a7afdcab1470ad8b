use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::execution::{ErrorRecord, SqlExecutionResult};

/// One of the three closed pipeline roles. Represented as a tagged variant
/// rather than a registry of arbitrary named agents — the set is fixed
/// (spec.md §9 "Dynamic dispatch → explicit variants").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentName {
    Selector,
    Decomposer,
    Refiner,
}

impl std::fmt::Display for AgentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Selector => "selector",
            Self::Decomposer => "decomposer",
            Self::Refiner => "refiner",
        };
        write!(f, "{s}")
    }
}

/// Per-table directive the selector writes into `Message::extracted_schema`:
/// keep every column, drop the table entirely, or keep an explicit ordered
/// subset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnSelection {
    All,
    Drop,
    Columns(Vec<String>),
}

/// How the decomposer arrived at `final_sql`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionStrategy {
    Simple,
    Cot,
}

/// The sole inter-agent carrier. Each agent reads the fields it consumes
/// and writes the fields it owns; no agent holds cross-request state of
/// its own except the selector's schema cache and the retrieval store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub sender: Option<AgentName>,
    /// 1 (lowest) through 4 (highest).
    pub priority: u8,
    pub retry_count: u32,
    pub max_retries: u32,
    pub context: HashMap<String, serde_json::Value>,
    pub metadata: HashMap<String, serde_json::Value>,

    pub database_id: String,
    pub question: String,
    pub evidence: String,
    /// Name of the next agent to run, or `"System"` once the pipeline has
    /// nothing left to dispatch.
    pub send_to: String,

    // Selector outputs.
    pub extracted_schema: Option<HashMap<String, ColumnSelection>>,
    pub schema_description: Option<String>,
    pub foreign_key_description: Option<String>,
    pub was_pruned: bool,

    // Decomposer outputs.
    pub final_sql: Option<String>,
    pub qa_pairs: Option<String>,
    pub sub_questions: Vec<String>,
    pub decomposition_strategy: Option<DecompositionStrategy>,

    // Refiner outputs.
    pub execution_result: Option<SqlExecutionResult>,
    pub was_fixed: bool,

    // Error carrier.
    pub error_history: Vec<ErrorRecord>,
    pub error_context_available: bool,
}

pub const SYSTEM_SENTINEL: &str = "System";

impl Message {
    /// Construct the initial carrier for a fresh `process_query` call.
    pub fn new(database_id: impl Into<String>, question: impl Into<String>, evidence: impl Into<String>, max_retries: u32) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            sender: None,
            priority: 2,
            retry_count: 0,
            max_retries,
            context: HashMap::new(),
            metadata: HashMap::new(),
            database_id: database_id.into(),
            question: question.into(),
            evidence: evidence.into(),
            send_to: AgentName::Selector.to_string(),
            extracted_schema: None,
            schema_description: None,
            foreign_key_description: None,
            was_pruned: false,
            final_sql: None,
            qa_pairs: None,
            sub_questions: Vec::new(),
            decomposition_strategy: None,
            execution_result: None,
            was_fixed: false,
            error_history: Vec::new(),
            error_context_available: false,
        }
    }

    pub fn push_error(&mut self, record: ErrorRecord) {
        self.error_history.push(record);
        self.error_context_available = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_routes_to_selector_first() {
        let msg = Message::new("shop", "List all schools", "", 3);
        assert_eq!(msg.send_to, "selector");
        assert!(!msg.error_context_available);
        assert!(msg.error_history.is_empty());
    }

    #[test]
    fn push_error_sets_context_available() {
        let mut msg = Message::new("shop", "q", "", 3);
        msg.push_error(ErrorRecord {
            attempt_number: 1,
            failed_sql: "SELECT * FROM user".into(),
            error_message: "relation \"user\" does not exist".into(),
            error_type: crate::error::SqlErrorType::SchemaError,
            timestamp: Utc::now(),
        });
        assert!(msg.error_context_available);
        assert_eq!(msg.error_history.len(), 1);
    }
}
