//! Provider-agnostic completion types and the `LlmProvider` trait.

use async_trait::async_trait;

use crate::error::LlmError;

/// A single-turn completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Optional system preamble.
    pub system: Option<String>,
    /// The user prompt.
    pub prompt: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Completion output.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
}

/// A text-generation backend bound to one model.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier, e.g. `gemini-2.5-flash`.
    fn model_name(&self) -> &str;

    /// Run one completion. Errors are transient from the caller's point of view.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}
