//! The LLM provider is an external collaborator, consumed through
//! [`LlmClient`] rather than owned by this crate (spec.md §1, §6).

mod client;
mod extract;
mod openrouter;

pub use client::{LlmClient, LlmResponse, LlmUsage, ScriptedLlmClient};
pub use extract::{extract_json, extract_sql, normalize_sql};
pub use openrouter::OpenRouterClient;
