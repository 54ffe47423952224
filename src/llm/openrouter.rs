//! OpenRouter client.
//!
//! One API key, many model vendors, OpenAI-compatible chat completions. When
//! a fallback model is configured it is tried once the primary has exhausted
//! its retries.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::transport::{RetryPolicy, TokenUsage, UsageMeter, REQUEST_TIMEOUT};
use super::TextGenerator;

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const APP_REFERER: &str = "https://github.com/agora-agent/agora";
const APP_TITLE: &str = "AGORA Autonomous Agent";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    /// The model that actually served the request.
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ReplyMessage>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl ChatResponse {
    fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
            .filter(|t| !t.trim().is_empty())
    }

    fn usage(&self) -> TokenUsage {
        let usage = self.usage.as_ref();
        TokenUsage {
            input: usage.map(|u| u.prompt_tokens).unwrap_or(0),
            output: usage.map(|u| u.completion_tokens).unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error)
        .map(|e| e.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenRouterClient {
    http: Client,
    api_key: SecretString,
    model: String,
    fallback_model: Option<String>,
    max_tokens: u32,
    retry: RetryPolicy,
    meter: UsageMeter,
}

impl OpenRouterClient {
    pub fn new(
        api_key: SecretString,
        model: Option<String>,
        fallback_model: Option<String>,
        max_tokens: Option<u32>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build OpenRouter HTTP client")?;

        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            fallback_model: fallback_model.filter(|m| !m.is_empty()),
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            retry: RetryPolicy::default(),
            meter: UsageMeter::default(),
        })
    }

    /// Primary first, then the fallback if there is one.
    fn models(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.model.as_str()).chain(self.fallback_model.as_deref())
    }

    async fn complete_with(&self, model: &str, system: &str, prompt: &str, max_tokens: u32) -> Result<String> {
        let body = ChatRequest {
            model,
            max_tokens,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let response = self
            .retry
            .send("OpenRouter", model, error_message, || {
                self.http
                    .post(OPENROUTER_API_URL)
                    .bearer_auth(self.api_key.expose_secret())
                    .header("HTTP-Referer", APP_REFERER)
                    .header("X-Title", APP_TITLE)
                    .json(&body)
                    .send()
            })
            .await?;

        let reply: ChatResponse = response
            .json()
            .await
            .context("Failed to parse OpenRouter response")?;

        let served_by = reply.model.as_deref().unwrap_or(model);
        let usage = reply.usage();
        let cost = self.meter.record(served_by, usage);
        info!(
            model = served_by,
            input_tokens = usage.input,
            output_tokens = usage.output,
            cost = format!("${cost:.4}"),
            "Completion finished (OpenRouter)"
        );

        reply
            .text()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("OpenRouter returned an empty completion (model={served_by})"))
    }

    pub fn cumulative_cost(&self) -> f64 {
        self.meter.total_cost()
    }

    pub fn total_calls(&self) -> u64 {
        self.meter.calls()
    }
}

#[async_trait]
impl TextGenerator for OpenRouterClient {
    async fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String> {
        let max_tokens = max_tokens.min(self.max_tokens);
        let mut failures = Vec::new();

        for model in self.models() {
            match self.complete_with(model, system, prompt, max_tokens).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!(model, error = %e, "Model failed");
                    failures.push(format!("{model}: {e}"));
                }
            }
        }

        Err(anyhow!("All OpenRouter models failed: {}", failures.join(" | ")))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
