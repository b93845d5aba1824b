//! OpenAI-compatible chat completion client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ReasoningConfig;
use crate::error::ReasoningError;

use super::traits::{PromptOptions, ReasoningService};

/// Reasoning service backed by a `/chat/completions` endpoint.
pub struct ApiReasoningClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI error response format.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl ApiReasoningClient {
    /// Create a client from configuration. The API key falls back to the
    /// `REASONING_API_KEY` environment variable; local endpoints need none.
    pub fn from_config(config: &ReasoningConfig) -> Result<Self, ReasoningError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("REASONING_API_KEY").ok())
            .filter(|k| !k.is_empty());

        // The caller enforces the real deadline; this only stops leaked
        // connections from living forever.
        let client = Client::builder()
            .timeout(config.timeout().max(config.summary_timeout()) * 4)
            .build()
            .map_err(|e| ReasoningError::Api(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Create a client with explicit parameters.
    pub fn new(base_url: &str, model: &str, api_key: Option<&str>) -> Result<Self, ReasoningError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ReasoningError::Api(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.map(str::to_string),
            temperature: 0.0,
            max_tokens: 1024,
        })
    }

    fn build_request<'a>(
        &'a self,
        text: &'a str,
        system_prompt: Option<&'a str>,
        options: &'a PromptOptions,
    ) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: text,
        });

        ChatRequest {
            model: &self.model,
            messages,
            temperature: options.temperature.unwrap_or(self.temperature),
            max_tokens: options.max_tokens.unwrap_or(self.max_tokens),
            user: options.rate_limit_key.as_deref(),
        }
    }
}

#[async_trait]
impl ReasoningService for ApiReasoningClient {
    async fn prompt(
        &self,
        text: &str,
        system_prompt: Option<&str>,
        options: &PromptOptions,
    ) -> Result<String, ReasoningError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = self.build_request(text, system_prompt, options);

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ReasoningError::Api("Request timed out".to_string())
            } else if e.is_connect() {
                ReasoningError::Api(format!("Connection failed: {}", e))
            } else {
                ReasoningError::Api(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ReasoningError::RateLimited);
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = serde_json::from_str::<ErrorResponse>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(ReasoningError::Api(format!("API error ({}): {}", status, message)));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| ReasoningError::Api(format!("Failed to parse response: {}", e)))?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ReasoningError::EmptyResponse)
    }
}
