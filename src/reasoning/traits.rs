//! Reasoning service trait definitions.

use async_trait::async_trait;

use crate::error::ReasoningError;

/// Per-call options forwarded to the reasoning service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptOptions {
    /// Caller identity for upstream rate limiting.
    pub rate_limit_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl PromptOptions {
    pub fn with_rate_limit_key(mut self, key: Option<String>) -> Self {
        self.rate_limit_key = key;
        self
    }
}

/// Trait for text-generation backends.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Send a prompt and return the generated text.
    async fn prompt(
        &self,
        text: &str,
        system_prompt: Option<&str>,
        options: &PromptOptions,
    ) -> Result<String, ReasoningError>;
}
