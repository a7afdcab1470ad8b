//! Immutable prompt registry keyed by `(agent, prompt_type)`.
//!
//! Templates are registered once at construction and never mutated
//! afterward (spec.md §6 "hot-reload is out of scope"); formatting fails
//! fast if the caller omits a declared parameter rather than silently
//! leaving a `{placeholder}` in the rendered text.

mod registry;
mod template;
mod text;

pub use registry::PromptRegistry;
pub use template::{PromptKey, PromptTemplate};
