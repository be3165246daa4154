//! LLM collaborator: a provider-agnostic completion interface with an
//! OpenAI-compatible HTTP implementation, plus the prompt templates.
//!
//! Prompt templates are data (`assets/prompts/*.txt`) with
//! `${placeholder}` substitution, so wording can be tuned without a
//! code change.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SniperError;

pub mod enrich;
pub mod expander;
pub mod relevance;

pub const INTENT_PROMPT: &str = include_str!("../../assets/prompts/intent.txt");
pub const RELEVANCE_PROMPT: &str = include_str!("../../assets/prompts/relevance.txt");
pub const SUMMARIZE_PROMPT: &str = include_str!("../../assets/prompts/summarize.txt");
pub const EXTRACT_PROMPT: &str = include_str!("../../assets/prompts/extract.txt");
pub const EXPAND_PROMPT: &str = include_str!("../../assets/prompts/expand.txt");

const LLM_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Substitute `${name}` placeholders in a prompt template.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (name, value) in vars {
        rendered = rendered.replace(&format!("${{{}}}", name), value);
    }
    rendered
}

/// Pull the first JSON object out of a model reply. Models wrap JSON in
/// prose and code fences often enough that strict parsing loses data.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// One completion request. Kept minimal: the service only ever needs a
/// single-turn prompt with an optional system message.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait LlmApi: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<String, SniperError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// OpenAI-compatible chat-completions client.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str) -> anyhow::Result<OpenAiClient> {
        Self::with_endpoint(api_key, "https://api.openai.com/v1/chat/completions")
    }

    pub fn with_endpoint(api_key: &str, endpoint: &str) -> anyhow::Result<OpenAiClient> {
        Ok(OpenAiClient {
            client: reqwest::Client::builder().timeout(LLM_TIMEOUT).build()?,
            api_key: api_key.to_string(),
            endpoint: endpoint.to_string(),
            model: DEFAULT_MODEL.to_string(),
        })
    }
}

#[async_trait]
impl LlmApi for OpenAiClient {
    async fn complete(&self, request: LlmRequest) -> Result<String, SniperError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.user,
        });

        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SniperError::Network(format!("llm request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SniperError::Network(format!(
                "llm returned HTTP {}",
                status
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| SniperError::Parse(format!("llm response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| SniperError::Parse("llm response had no choices".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_placeholders() {
        let out = render("привет, ${name}! ${name}?", &[("name", "мир")]);
        assert_eq!(out, "привет, мир! мир?");
    }

    #[test]
    fn extract_json_survives_prose_and_fences() {
        let reply = "Вот ответ:\n```json\n{\"relevant\": true, \"confidence\": 90}\n```";
        let value = extract_json(reply).unwrap();
        assert_eq!(value["confidence"], 90);
        assert!(extract_json("никакого json тут нет").is_none());
    }
}
