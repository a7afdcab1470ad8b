//! Shared data model for the query-resolution core.
//!
//! These types are passed between the selector, decomposer, and refiner
//! agents and the orchestrator that drives them; none of the agent modules
//! define their own parallel copies.

pub mod database;
pub mod execution;
pub mod message;
pub mod training;
pub mod workflow;

pub use database::{ColumnDescription, DatabaseInfo, DatabaseStats, ForeignKeyEdge, SampleColumnValues};
pub use execution::{ErrorRecord, Row, SqlExecutionResult};
pub use message::{AgentName, ColumnSelection, DecompositionStrategy, Message};
pub use training::{TrainingDataType, TrainingRecord};
pub use workflow::{ConversationEntry, ConversationEntryType, NodeState, QueryOutcome, WorkflowState};
