//! `text2sql-core`: the query-resolution core behind a natural-language-
//! to-SQL system (spec.md §1). Converts `(database_id, question)` into an
//! executable, validated, and — on failure — repaired SQL query.
//!
//! This crate owns exactly the query-resolution pipeline: schema
//! selection, complexity-aware decomposition, safety-gated execution with
//! repair, and the retrieval-backed training corpus that grounds
//! generation and grows from successful interactions. The user-facing
//! surface, process lifecycle, configuration loading, and the concrete
//! LLM/embedding/executor/vector-store providers are external
//! collaborators this crate only consumes through the traits in
//! [`llm`], [`embedding`], [`executor`], and [`vectorstore`].
//!
//! ```ignore
//! let orchestrator = Orchestrator::new(selector, decomposer, refiner, training_store, config);
//! let outcome = orchestrator.process_query(ProcessQueryRequest::new("shop", "List all schools")).await?;
//! ```

pub mod config;
pub mod conversation;
pub mod decomposer;
pub mod embedding;
pub mod error;
pub mod executor;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod refiner;
pub mod retrieval;
pub mod selector;
pub mod vectorstore;

pub use error::{CoreError, CoreResult};
pub use orchestrator::{Orchestrator, ProcessQueryRequest};
