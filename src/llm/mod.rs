//! LLM integration.
//!
//! Defines the `TextGenerator` trait and provides implementations for
//! OpenRouter and Anthropic. The decision contract built on top of a
//! generator lives in [`decision`].

pub mod anthropic;
pub mod decision;
pub mod openrouter;
pub mod transport;

use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::warn;

use crate::config::{AppConfig, LlmConfig};

/// Abstraction over chat-completion style LLM providers.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Run one completion and return the raw text.
    async fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String>;

    /// Model identifier string.
    fn model_name(&self) -> &str;
}

/// Stand-in used when no API key is available. Every call fails, which the
/// decision contract turns into a `wait`.
pub struct UnconfiguredGenerator {
    reason: String,
}

impl UnconfiguredGenerator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl TextGenerator for UnconfiguredGenerator {
    async fn complete(&self, _system: &str, _prompt: &str, _max_tokens: u32) -> Result<String> {
        anyhow::bail!("LLM not configured: {}", self.reason)
    }

    fn model_name(&self) -> &str {
        "unconfigured"
    }
}

/// Build the generator named by `[llm] provider`, falling back to
/// [`UnconfiguredGenerator`] when the key is missing or the provider unknown.
pub fn build_generator(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>> {
    let api_key = match AppConfig::resolve_env(&config.api_key_env) {
        Ok(key) => SecretString::new(key),
        Err(e) => {
            warn!(error = %e, "No LLM API key, decisions will default to wait");
            return Ok(Arc::new(UnconfiguredGenerator::new(e.to_string())));
        }
    };

    let generator: Arc<dyn TextGenerator> = match config.provider.as_str() {
        "openrouter" => Arc::new(openrouter::OpenRouterClient::new(
            api_key,
            Some(config.model.clone()),
            config.fallback_model.clone(),
            Some(config.max_tokens),
        )?),
        "anthropic" => Arc::new(anthropic::AnthropicClient::new(
            api_key,
            Some(config.model.clone()),
            Some(config.max_tokens),
        )?),
        other => {
            warn!(provider = other, "Unknown LLM provider, decisions will default to wait");
            Arc::new(UnconfiguredGenerator::new(format!("unknown provider {other}")))
        }
    };
    Ok(generator)
}
