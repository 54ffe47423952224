//! Decision contract.
//!
//! Builds the bounded view of the cycle the oracle is allowed to see,
//! validates its answer against a strict schema, and resolves the answer to a
//! concrete opportunity. Anything that goes wrong on the oracle side (transport
//! error, timeout, unparseable text) collapses to a `wait` decision; this
//! module never returns an error to the orchestrator.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::TextGenerator;
use crate::sanitize::truncate_chars;
use crate::types::{AgentError, Opportunity, StrategyChoice, StrategyType};

/// Number of top-ranked opportunities shown to the oracle.
pub const DECISION_WINDOW: usize = 5;

/// Description excerpt length per window entry.
const DESCRIPTION_EXCERPT: usize = 200;

const DECISION_MAX_TOKENS: u32 = 1024;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// One opportunity as the oracle sees it.
#[derive(Debug, Clone, Serialize)]
pub struct WindowEntry {
    pub id: String,
    pub strategy_type: StrategyType,
    pub title: String,
    pub roi: Decimal,
    pub risk_score: f64,
    pub description: String,
}

/// Everything the oracle is told about the current cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRequest {
    pub cycle: u64,
    pub balance: Decimal,
    pub window: Vec<WindowEntry>,
}

impl DecisionRequest {
    /// Build a request from already ranked, already scrubbed opportunities,
    /// keeping at most `window` entries.
    pub fn new(cycle: u64, balance: Decimal, ranked: &[Opportunity], window: usize) -> Self {
        let window = ranked
            .iter()
            .take(window)
            .map(|o| WindowEntry {
                id: o.id.clone(),
                strategy_type: o.strategy_type,
                title: o.title.clone(),
                roi: o.expected_roi(),
                risk_score: o.risk_score,
                description: truncate_chars(&o.description, DESCRIPTION_EXCERPT),
            })
            .collect();

        Self {
            cycle,
            balance,
            window,
        }
    }

    /// Render the user prompt.
    pub fn render_prompt(&self) -> String {
        let mut prompt = String::with_capacity(1024);
        let _ = writeln!(prompt, "Cycle {} | Treasury: {} USDC\n", self.cycle, self.balance);
        prompt.push_str("Available opportunities:\n");

        if self.window.is_empty() {
            prompt.push_str("No opportunities found.\n");
        }
        for (i, entry) in self.window.iter().enumerate() {
            let _ = writeln!(
                prompt,
                "{}. [{}] id={} {} | ROI: ${:.2} | Risk: {:.1}/10\n   {}",
                i + 1,
                entry.strategy_type,
                entry.id,
                entry.title,
                entry.roi,
                entry.risk_score,
                entry.description,
            );
        }

        prompt.push_str("\nChoose the best strategy for this cycle.");
        prompt
    }
}

pub fn system_prompt() -> &'static str {
    "You are an autonomous economic agent. Your goal is to grow your USDC \
     treasury through voluntary market participation. Evaluate the available \
     opportunities and choose the best action for this cycle. Respond with \
     only a JSON object: {\"strategy\": \"trade|freelance|arbitrage|content|wait\", \
     \"opportunity_id\": \"<id or null>\", \"reasoning\": \"<1-2 sentences>\"}"
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// The only response shape accepted from the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Decision {
    pub strategy: StrategyChoice,
    #[serde(default)]
    pub opportunity_id: Option<String>,
    pub reasoning: String,
}

impl Decision {
    /// The mandatory fallback.
    pub fn wait(reasoning: impl Into<String>) -> Self {
        Self {
            strategy: StrategyChoice::Wait,
            opportunity_id: None,
            reasoning: reasoning.into(),
        }
    }
}

/// A decision plus the reason it was substituted, if it was.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionOutcome {
    pub decision: Decision,
    pub fallback_cause: Option<String>,
}

/// Strip a markdown fence if present, then parse strictly.
pub fn parse_decision(raw: &str) -> Result<Decision, AgentError> {
    let body = extract_json_body(raw);
    serde_json::from_str::<Decision>(body).map_err(|e| AgentError::DecisionRejected(e.to_string()))
}

fn extract_json_body(raw: &str) -> &str {
    let trimmed = raw.trim();
    let mut parts = trimmed.split("```");
    match (parts.next(), parts.next()) {
        (Some(_), Some(fenced)) => {
            let fenced = fenced.trim_start();
            fenced.strip_prefix("json").unwrap_or(fenced).trim()
        }
        _ => trimmed,
    }
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

/// External service consulted once per cycle. Returns raw text; validation
/// is done by [`decide`].
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn consult(&self, request: &DecisionRequest) -> Result<String>;
}

/// Oracle backed by an LLM text generator.
pub struct LlmDecisionOracle {
    generator: Arc<dyn TextGenerator>,
}

impl LlmDecisionOracle {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl DecisionOracle for LlmDecisionOracle {
    async fn consult(&self, request: &DecisionRequest) -> Result<String> {
        debug!(
            cycle = request.cycle,
            window = request.window.len(),
            model = self.generator.model_name(),
            "Consulting decision oracle"
        );
        self.generator
            .complete(system_prompt(), &request.render_prompt(), DECISION_MAX_TOKENS)
            .await
    }
}

/// Consult the oracle with an upper bound on the wait. Never fails.
pub async fn decide(
    oracle: &dyn DecisionOracle,
    request: &DecisionRequest,
    timeout: Duration,
) -> DecisionOutcome {
    let cause = match tokio::time::timeout(timeout, oracle.consult(request)).await {
        Ok(Ok(raw)) => match parse_decision(&raw) {
            Ok(decision) => {
                info!(
                    cycle = request.cycle,
                    strategy = %decision.strategy,
                    opportunity = ?decision.opportunity_id,
                    reasoning = %decision.reasoning,
                    "Strategy selected"
                );
                return DecisionOutcome {
                    decision,
                    fallback_cause: None,
                };
            }
            Err(e) => {
                warn!(cycle = request.cycle, error = %e, raw = %raw, "Oracle response rejected");
                format!("oracle response rejected: {e}")
            }
        },
        Ok(Err(e)) => {
            warn!(cycle = request.cycle, error = %e, "Oracle call failed");
            format!("oracle call failed: {e}")
        }
        Err(_) => {
            warn!(cycle = request.cycle, timeout_secs = timeout.as_secs(), "Oracle timed out");
            format!("oracle timed out after {}s", timeout.as_secs())
        }
    };

    DecisionOutcome {
        decision: Decision::wait(cause.clone()),
        fallback_cause: Some(cause),
    }
}

/// Map a decision onto a concrete opportunity in the window.
///
/// Exact id first; otherwise, unless waiting, the first window entry of the
/// chosen type, then the first window entry. An empty window selects nothing.
pub fn resolve_opportunity<'a>(
    decision: &Decision,
    window: &'a [Opportunity],
) -> Option<&'a Opportunity> {
    if let Some(id) = decision.opportunity_id.as_deref() {
        if let Some(exact) = window.iter().find(|o| o.id == id) {
            return Some(exact);
        }
    }

    let chosen = decision.strategy.executable()?;
    window
        .iter()
        .find(|o| o.strategy_type == chosen)
        .or_else(|| window.first())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
