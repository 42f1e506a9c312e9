//! LLM backends for task extraction.
//!
//! Supports:
//! - **Anthropic**: Direct API access via rig-core
//! - **OpenAI**: Direct API access via rig-core
//!
//! rig-core handles HTTP transport; `RigAdapter` bridges rig's
//! `CompletionModel` trait to our `LlmProvider` trait.

pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{ConfigError, LlmError};

const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-latest";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
}

impl LlmConfig {
    /// Read `ANTHROPIC_API_KEY` (preferred) or `OPENAI_API_KEY`, and an
    /// optional `MAILBOX_TASKS_MODEL` override.
    pub fn from_env() -> Result<Self, ConfigError> {
        let model_override = std::env::var("MAILBOX_TASKS_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty());

        let (backend, api_key, default_model) = if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            (LlmBackend::Anthropic, key, DEFAULT_ANTHROPIC_MODEL)
        } else if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            (LlmBackend::OpenAi, key, DEFAULT_OPENAI_MODEL)
        } else {
            return Err(ConfigError::MissingEnvVar(
                "ANTHROPIC_API_KEY or OPENAI_API_KEY".to_string(),
            ));
        };

        Ok(Self {
            backend,
            api_key: SecretString::from(api_key),
            model: model_override.unwrap_or_else(|| default_model.to_string()),
        })
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_provider(config),
        LlmBackend::OpenAi => create_openai_provider(config),
    }
}

fn create_anthropic_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model)))
}

fn create_openai_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_provider_constructs_without_network() {
        // rig-core clients accept any key at construction; auth fails on first request.
        let config = LlmConfig {
            backend: LlmBackend::Anthropic,
            api_key: SecretString::from("test-key"),
            model: "claude-3-5-haiku-latest".to_string(),
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "claude-3-5-haiku-latest");
    }

    #[test]
    fn openai_provider_constructs_without_network() {
        let config = LlmConfig {
            backend: LlmBackend::OpenAi,
            api_key: SecretString::from("sk-test"),
            model: "gpt-4o-mini".to_string(),
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "gpt-4o-mini");
    }
}
