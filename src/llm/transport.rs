//! HTTP plumbing shared by the provider clients: retry with backoff,
//! per-model pricing and a running usage meter.

use anyhow::{bail, Result};
use reqwest::{Response, StatusCode};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Request timeout for a single completion call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base…
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Rate limits and server-side failures are worth another try.
    pub fn is_retryable(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    /// Run `send` until it yields a 2xx response, retrying transport errors
    /// and retryable statuses. `describe` turns an error body into a message.
    pub async fn send<F, Fut>(
        &self,
        provider: &str,
        model: &str,
        describe: fn(&str) -> String,
        send: F,
    ) -> Result<Response>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = reqwest::Result<Response>>,
    {
        let mut last_error = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                debug!(provider, model, attempt, delay_ms = delay.as_millis() as u64, "Retrying completion");
                tokio::time::sleep(delay).await;
            }

            let response = match send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(provider, model, attempt, error = %e, "Completion request failed");
                    last_error = format!("request error: {e}");
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let message = describe(&response.text().await.unwrap_or_default());
            if !Self::is_retryable(status) {
                bail!("{provider} API error {status} (model={model}): {message}");
            }
            warn!(provider, model, attempt, status = %status, error = %message, "Retryable completion error");
            last_error = format!("HTTP {status}: {message}");
        }

        bail!(
            "{provider} API failed after {} retries (model={model}): {last_error}",
            self.max_retries
        )
    }
}

// ---------------------------------------------------------------------------
// Pricing + usage
// ---------------------------------------------------------------------------

/// Approximate list price per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl Pricing {
    /// Best-effort lookup by model id; unknown models get a conservative rate.
    pub fn for_model(model: &str) -> Self {
        let m = model.to_lowercase();
        let (input_per_1k, output_per_1k) = if m.contains("opus") {
            (0.015, 0.075)
        } else if m.contains("haiku") {
            (0.0008, 0.004)
        } else if m.contains("sonnet") {
            (0.003, 0.015)
        } else if m.contains("gpt-4o-mini") {
            (0.00015, 0.0006)
        } else {
            (0.005, 0.015)
        };
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        input_tokens as f64 / 1000.0 * self.input_per_1k
            + output_tokens as f64 / 1000.0 * self.output_per_1k
    }
}

/// Token counts reported for one completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input: u32,
    pub output: u32,
}

/// Running totals across every call a client makes.
#[derive(Debug, Default)]
pub struct UsageMeter {
    cost_micros: AtomicU64,
    calls: AtomicU64,
}

impl UsageMeter {
    /// Record one call and return its cost.
    pub fn record(&self, model: &str, usage: TokenUsage) -> f64 {
        let cost = Pricing::for_model(model).cost(usage.input, usage.output);
        self.cost_micros
            .fetch_add((cost * 1_000_000.0) as u64, Ordering::Relaxed);
        self.calls.fetch_add(1, Ordering::Relaxed);
        cost
    }

    pub fn total_cost(&self) -> f64 {
        self.cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}
