use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

/// Token accounting returned by providers that report it. Advisory only —
/// nothing in the core keys behavior off these numbers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Result of one completion call (spec.md §6 "LLM provider interface").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<LlmUsage>,
}

impl LlmResponse {
    pub fn ok(content: impl Into<String>) -> Self {
        Self { content: content.into(), success: true, error: None, usage: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { content: String::new(), success: false, error: Some(error.into()), usage: None }
    }
}

/// The LLM provider, consumed as an external collaborator (spec.md §1,
/// §6). Every agent synthesises its own system/user prompt via the
/// [`crate::prompts::PromptRegistry`] and calls `generate` directly —
/// there is no shared "chat session" state held by this trait.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
        timeout_s: u64,
    ) -> CoreResult<LlmResponse>;
}

/// In-memory fake used by tests and by callers wiring the core up without
/// a live provider. Returns scripted responses keyed by call order.
#[derive(Default)]
pub struct ScriptedLlmClient {
    responses: std::sync::Mutex<std::collections::VecDeque<String>>,
    pub calls: std::sync::Mutex<Vec<(String, String)>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<impl Into<String>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into_iter().map(Into::into).collect()),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("lock").len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        _temperature: f32,
        _max_tokens: u32,
        _timeout_s: u64,
    ) -> CoreResult<LlmResponse> {
        self.calls
            .lock()
            .expect("lock")
            .push((system_prompt.to_string(), user_prompt.to_string()));

        let mut responses = self.responses.lock().expect("lock");
        match responses.pop_front() {
            Some(content) => Ok(LlmResponse::ok(content)),
            None => Ok(LlmResponse::failed("ScriptedLlmClient ran out of scripted responses")),
        }
    }
}
