use crate::models::TokenUsage;
use crate::AnswerError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_LLM_MODEL: &str = "phi3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Sends `prompt` as a single user message.
    async fn complete(&self, prompt: &str) -> Result<Completion, AnswerError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl From<ChatUsage> for TokenUsage {
    fn from(value: ChatUsage) -> Self {
        Self {
            prompt_tokens: value.prompt_tokens,
            completion_tokens: value.completion_tokens,
            total_tokens: value.total_tokens,
        }
    }
}

fn parse_completion(model: &str, response: ChatResponse) -> Result<Completion, AnswerError> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| AnswerError::Generation {
            model: model.to_string(),
            details: "response has no message content".to_string(),
        })?;

    Ok(Completion {
        text,
        usage: response.usage.unwrap_or_default().into(),
    })
}

/// Chat model behind Ollama's OpenAI-compatible API.
pub struct OllamaChatClient {
    client: Arc<Client>,
    base_url: String,
    model: String,
}

impl OllamaChatClient {
    pub fn new(client: Arc<Client>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    /// Asks Ollama to download the model if it is not present yet.
    pub async fn pull_model(&self) -> Result<(), AnswerError> {
        let response = self
            .client
            .post(format!("{}/api/pull", self.base_url))
            .json(&json!({
                "name": self.model,
                "stream": false,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AnswerError::Generation {
                model: self.model.clone(),
                details: format!("pull failed with {status}: {body}"),
            });
        }

        info!(model = %self.model, "model available");
        Ok(())
    }
}

#[async_trait]
impl LanguageModel for OllamaChatClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<Completion, AnswerError> {
        let messages = [ChatMessage {
            role: "user",
            content: prompt,
        }];
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "stream": false,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AnswerError::Generation {
                model: self.model.clone(),
                details: format!("{status}: {body}"),
            });
        }

        let payload: ChatResponse = response.json().await?;
        let completion = parse_completion(&self.model, payload)?;
        debug!(
            model = %self.model,
            total_tokens = completion.usage.total_tokens,
            "completion received"
        );
        Ok(completion)
    }
}
