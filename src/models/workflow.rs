use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::execution::{ErrorRecord, Row};
use super::message::Message;

/// Sentinel node the orchestrator's state machine currently sits on.
/// Closed set — see `orchestrator::state_machine` for the legal-transition
/// table over these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Selector,
    Decomposer,
    Refiner,
    Completed,
    Failed,
    Error,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Selector => "Selector",
            Self::Decomposer => "Decomposer",
            Self::Refiner => "Refiner",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Error => "Error",
        };
        write!(f, "{s}")
    }
}

/// Typed kind of one append-only conversation-history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationEntryType {
    System,
    Agent,
    ErrorContext,
    /// Recorded when a query is cancelled mid-flight so the history for
    /// the thread stays legible (spec.md §5 "Cancellation").
    Interrupted,
}

/// One entry in the append-only conversation-history log. This is the
/// sole store of error context visible across retries — every retry
/// derives its error view by filtering this log, never a parallel field
/// (spec.md §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub entry_type: ConversationEntryType,
    pub content: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ConversationEntry {
    pub fn system(content: impl Into<String>) -> Self {
        Self { entry_type: ConversationEntryType::System, content: content.into(), metadata: HashMap::new(), timestamp: Utc::now() }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self { entry_type: ConversationEntryType::Agent, content: content.into(), metadata: HashMap::new(), timestamp: Utc::now() }
    }

    pub fn error_context(content: impl Into<String>) -> Self {
        Self { entry_type: ConversationEntryType::ErrorContext, content: content.into(), metadata: HashMap::new(), timestamp: Utc::now() }
    }

    pub fn interrupted(content: impl Into<String>) -> Self {
        Self { entry_type: ConversationEntryType::Interrupted, content: content.into(), metadata: HashMap::new(), timestamp: Utc::now() }
    }
}

/// The caller-facing result of `process_query`, covering both the success
/// and failure shapes of spec.md §6 in one serializable struct (fields not
/// relevant to the outcome are simply omitted from the wire form).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    pub processing_time: f64,
    pub retry_count: u32,
    pub per_agent_time: HashMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sql: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub error_history: Vec<ErrorRecord>,
}

/// Supersets [`Message`] with the bookkeeping the orchestrator owns:
/// current node, retry accounting, timing, and the conversation-history
/// log. Agents see and mutate `message`; only the orchestrator mutates
/// the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub message: Message,
    pub current_agent: NodeState,
    pub processing_stage: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub finished: bool,
    pub success: bool,
    pub result: Option<QueryOutcome>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub agent_execution_times: HashMap<String, f64>,
    pub conversation_history: Vec<ConversationEntry>,
}

impl WorkflowState {
    pub fn new(message: Message) -> Self {
        let max_retries = message.max_retries;
        Self {
            message,
            current_agent: NodeState::Selector,
            processing_stage: "initialised".to_string(),
            retry_count: 0,
            max_retries,
            finished: false,
            success: false,
            result: None,
            start_time: Utc::now(),
            end_time: None,
            agent_execution_times: HashMap::new(),
            conversation_history: Vec::new(),
        }
    }

    /// Filter the conversation history down to classified error records
    /// only, the way the decomposer is required to derive its error view
    /// (spec.md §4.1 "Context propagation").
    pub fn error_context_entries(&self) -> Vec<&ConversationEntry> {
        self.conversation_history
            .iter()
            .filter(|e| e.entry_type == ConversationEntryType::ErrorContext)
            .collect()
    }

    /// `finished ⇒ current_agent ∈ {Completed, Failed}` and `result` is
    /// populated (spec.md §3 invariant).
    pub fn is_terminal_consistent(&self) -> bool {
        if !self.finished {
            return true;
        }
        matches!(self.current_agent, NodeState::Completed | NodeState::Failed) && self.result.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::Message;

    #[test]
    fn fresh_state_starts_at_selector_and_is_consistent() {
        let msg = Message::new("shop", "q", "", 3);
        let state = WorkflowState::new(msg);
        assert_eq!(state.current_agent, NodeState::Selector);
        assert!(state.is_terminal_consistent());
        assert!(!state.finished);
    }

    #[test]
    fn error_context_entries_filters_by_type() {
        let msg = Message::new("shop", "q", "", 3);
        let mut state = WorkflowState::new(msg);
        state.conversation_history.push(ConversationEntry::system("starting"));
        state.conversation_history.push(ConversationEntry::error_context("schema_error: relation does not exist"));
        let errs = state.error_context_entries();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].entry_type, ConversationEntryType::ErrorContext);
    }
}
