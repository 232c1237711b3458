//! Text generation for the meal assistant.
//!
//! Supports:
//! - **Gemini**: the default backend, one provider per configured model
//! - **Anthropic** and **OpenAI**: direct API access via rig-core
//!
//! Uses the rig-core crate for HTTP transport and the `RigAdapter` to bridge
//! rig's `CompletionModel` trait to our `LlmProvider` trait. Callers never
//! talk to a provider directly; they go through [`FailoverGateway`].

pub mod failover;
pub mod provider;
pub mod retry;
mod rig_adapter;
pub mod structured;

pub use failover::{ASSISTANT_PERSONA, FailoverGateway, GatewayConfig, normalize_label};
pub use provider::*;
pub use retry::{RetryPolicy, retry_with_backoff};
pub use rig_adapter::RigAdapter;

use std::str::FromStr;
use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::LlmError;

/// Default model preference order.
pub const DEFAULT_MODELS: [&str; 4] = [
    "gemini-2.5-flash",
    "gemini-2.5-pro",
    "gemini-2.0-flash",
    "gemini-2.0-pro",
];

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Gemini,
    Anthropic,
    OpenAi,
}

impl FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            other => Err(format!("unknown LLM backend '{other}'")),
        }
    }
}

/// Configuration for creating the model chain.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    /// Models in preference order.
    pub models: Vec<String>,
}

/// Create one provider per configured model, in preference order.
pub fn create_providers(config: &LlmConfig) -> Result<Vec<Arc<dyn LlmProvider>>, LlmError> {
    if config.models.is_empty() {
        return Err(LlmError::RequestFailed {
            provider: backend_name(config.backend).to_string(),
            reason: "no models configured".to_string(),
        });
    }
    match config.backend {
        LlmBackend::Gemini => create_gemini_providers(config),
        LlmBackend::Anthropic => create_anthropic_providers(config),
        LlmBackend::OpenAi => create_openai_providers(config),
    }
}

fn backend_name(backend: LlmBackend) -> &'static str {
    match backend {
        LlmBackend::Gemini => "gemini",
        LlmBackend::Anthropic => "anthropic",
        LlmBackend::OpenAi => "openai",
    }
}

fn create_gemini_providers(config: &LlmConfig) -> Result<Vec<Arc<dyn LlmProvider>>, LlmError> {
    use rig::providers::gemini;

    let client: gemini::Client =
        gemini::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "gemini".to_string(),
                reason: format!("Failed to create Gemini client: {}", e),
            }
        })?;

    tracing::info!("Using Gemini (models: {})", config.models.join(", "));
    Ok(config
        .models
        .iter()
        .map(|name| {
            let model = client.completion_model(name);
            Arc::new(RigAdapter::new(model, name)) as Arc<dyn LlmProvider>
        })
        .collect())
}

fn create_anthropic_providers(config: &LlmConfig) -> Result<Vec<Arc<dyn LlmProvider>>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    tracing::info!("Using Anthropic (models: {})", config.models.join(", "));
    Ok(config
        .models
        .iter()
        .map(|name| {
            let model = client.completion_model(name);
            Arc::new(RigAdapter::new(model, name)) as Arc<dyn LlmProvider>
        })
        .collect())
}

fn create_openai_providers(config: &LlmConfig) -> Result<Vec<Arc<dyn LlmProvider>>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    tracing::info!("Using OpenAI (models: {})", config.models.join(", "));
    Ok(config
        .models
        .iter()
        .map(|name| {
            let model = client.completion_model(name);
            Arc::new(RigAdapter::new(model, name)) as Arc<dyn LlmProvider>
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(backend: LlmBackend, models: &[&str]) -> LlmConfig {
        LlmConfig {
            backend,
            api_key: secrecy::SecretString::from("test-key"),
            models: models.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[test]
    fn test_gemini_chain_keeps_order() {
        // rig-core clients accept any string as API key at construction time.
        // The actual auth failure happens when making a request.
        let providers = create_providers(&config(LlmBackend::Gemini, &DEFAULT_MODELS)).unwrap();
        let names: Vec<&str> = providers.iter().map(|p| p.model_name()).collect();
        assert_eq!(names, DEFAULT_MODELS);
    }

    #[test]
    fn test_create_openai_providers() {
        let providers = create_providers(&config(LlmBackend::OpenAi, &["gpt-4o"])).unwrap();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].model_name(), "gpt-4o");
    }

    #[test]
    fn test_empty_model_list_rejected() {
        assert!(create_providers(&config(LlmBackend::Anthropic, &[])).is_err());
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("Gemini".parse::<LlmBackend>(), Ok(LlmBackend::Gemini));
        assert_eq!("openai".parse::<LlmBackend>(), Ok(LlmBackend::OpenAi));
        assert!("llama".parse::<LlmBackend>().is_err());
    }
}
