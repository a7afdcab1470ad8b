use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

use super::client::{LlmClient, LlmResponse, LlmUsage};

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Debug, Serialize)]
struct OpenRouterMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenRouterRequest {
    model: String,
    messages: Vec<OpenRouterMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenRouterResponse {
    choices: Vec<OpenRouterChoice>,
    #[serde(default)]
    usage: Option<OpenRouterUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterChoice {
    message: OpenRouterResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenRouterResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// Concrete [`LlmClient`] backed by the OpenRouter chat-completions API,
/// returning the core's provider-agnostic [`LlmResponse`] instead of a raw
/// content string, and enforcing the per-call timeout at the client
/// boundary rather than leaving it to the caller.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
        timeout_s: u64,
    ) -> crate::error::CoreResult<LlmResponse> {
        let request = OpenRouterRequest {
            model: self.model.clone(),
            messages: vec![
                OpenRouterMessage { role: "system", content: system_prompt.to_string() },
                OpenRouterMessage { role: "user", content: user_prompt.to_string() },
            ],
            temperature,
            max_tokens,
        };

        let send = self
            .client
            .post(OPENROUTER_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", "https://text2sql-core.local")
            .header("X-Title", "text2sql-core")
            .json(&request)
            .send();

        let response = match tokio::time::timeout(std::time::Duration::from_secs(timeout_s), send).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Ok(LlmResponse::failed(format!("request failed: {e}"))),
            Err(_) => return Err(CoreError::LlmUnavailable(format!("LLM call exceeded {timeout_s}s timeout"))),
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
            return Ok(LlmResponse::failed(format!("OpenRouter API error {status}: {body}")));
        }

        let parsed: OpenRouterResponse = response
            .json()
            .await
            .map_err(|e| CoreError::LlmProviderError(format!("failed to parse OpenRouter response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content);

        match content {
            Some(content) => Ok(LlmResponse {
                content,
                success: true,
                error: None,
                usage: parsed.usage.map(|u| LlmUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                }),
            }),
            None => Ok(LlmResponse::failed("OpenRouter returned no message content")),
        }
    }
}
