//! Anthropic Messages API client.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::transport::{RetryPolicy, TokenUsage, UsageMeter, REQUEST_TIMEOUT};
use super::TextGenerator;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [UserTurn<'a>; 1],
}

#[derive(Debug, Serialize)]
struct UserTurn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl MessagesResponse {
    /// Concatenated text blocks, ignoring tool or thinking blocks.
    fn text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text.as_deref())
            .collect()
    }

    fn usage(&self) -> TokenUsage {
        self.usage
            .as_ref()
            .map(|u| TokenUsage {
                input: u.input_tokens,
                output: u.output_tokens,
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Pull the human message out of an Anthropic error body, if it has one.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiError>(body)
        .ok()
        .and_then(|e| e.error)
        .map(|e| e.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.to_string())
}

pub struct AnthropicClient {
    http: Client,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    retry: RetryPolicy,
    meter: UsageMeter,
}

impl AnthropicClient {
    pub fn new(api_key: SecretString, model: Option<String>, max_tokens: Option<u32>) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build Anthropic HTTP client")?;

        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            retry: RetryPolicy::default(),
            meter: UsageMeter::default(),
        })
    }

    pub fn cumulative_cost(&self) -> f64 {
        self.meter.total_cost()
    }

    pub fn total_calls(&self) -> u64 {
        self.meter.calls()
    }
}

#[async_trait]
impl TextGenerator for AnthropicClient {
    async fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: max_tokens.min(self.max_tokens),
            system,
            messages: [UserTurn {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .retry
            .send("Anthropic", &self.model, error_message, || {
                self.http
                    .post(ANTHROPIC_API_URL)
                    .header("x-api-key", self.api_key.expose_secret())
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&body)
                    .send()
            })
            .await?;

        let reply: MessagesResponse = response
            .json()
            .await
            .context("Failed to parse Anthropic response")?;

        let usage = reply.usage();
        let cost = self.meter.record(&self.model, usage);
        info!(
            model = %self.model,
            input_tokens = usage.input,
            output_tokens = usage.output,
            stop_reason = reply.stop_reason.as_deref().unwrap_or("-"),
            cost = format!("${cost:.4}"),
            "Completion finished (Anthropic)"
        );

        let text = reply.text();
        if text.trim().is_empty() {
            return Err(anyhow!("Anthropic returned an empty completion (model={})", self.model));
        }
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
