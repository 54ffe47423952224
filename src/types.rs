//! Shared types for the AGORA agent.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that market, strategy, approval
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Floor applied to effort and risk scores before they are used as divisors.
pub const SCORE_FLOOR: f64 = 0.1;

// ---------------------------------------------------------------------------
// Strategy identifiers
// ---------------------------------------------------------------------------

/// The executable strategy families. Every opportunity is tagged with one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyType {
    Trade,
    Freelance,
    Arbitrage,
    Content,
}

impl StrategyType {
    /// All executable strategy types, in registry order.
    pub const ALL: &'static [StrategyType] = &[
        StrategyType::Trade,
        StrategyType::Freelance,
        StrategyType::Arbitrage,
        StrategyType::Content,
    ];

    /// Registry identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::Trade => "trade",
            StrategyType::Freelance => "freelance",
            StrategyType::Arbitrage => "arbitrage",
            StrategyType::Content => "content",
        }
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyType {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trade" => Ok(StrategyType::Trade),
            "freelance" => Ok(StrategyType::Freelance),
            "arbitrage" => Ok(StrategyType::Arbitrage),
            "content" => Ok(StrategyType::Content),
            other => Err(AgentError::UnknownStrategy(other.to_string())),
        }
    }
}

/// What the decision oracle may choose for a cycle: one of the executable
/// strategies, or the inert `wait` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyChoice {
    Trade,
    Freelance,
    Arbitrage,
    Content,
    Wait,
}

impl StrategyChoice {
    pub const WAIT: &'static str = "wait";

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyChoice::Wait => Self::WAIT,
            other => other
                .executable()
                .map(|t| t.as_str())
                .unwrap_or(Self::WAIT),
        }
    }

    /// The strategy type to execute, or `None` for `wait`.
    pub fn executable(&self) -> Option<StrategyType> {
        match self {
            StrategyChoice::Trade => Some(StrategyType::Trade),
            StrategyChoice::Freelance => Some(StrategyType::Freelance),
            StrategyChoice::Arbitrage => Some(StrategyType::Arbitrage),
            StrategyChoice::Content => Some(StrategyType::Content),
            StrategyChoice::Wait => None,
        }
    }
}

impl fmt::Display for StrategyChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Opportunity
// ---------------------------------------------------------------------------

/// A candidate action discovered by a market source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub strategy_type: StrategyType,
    pub title: String,
    pub description: String,
    /// Expected gross revenue in currency units.
    pub expected_revenue: Decimal,
    /// Estimated cost (gas, infra, fees) in currency units.
    pub estimated_cost: Decimal,
    /// Effort score 1–10 (1 = easy/fast).
    pub effort_score: f64,
    /// Risk score 1–10 (1 = very safe).
    pub risk_score: f64,
    /// Source-specific payload passed through to the executor.
    #[serde(default)]
    pub payload: BTreeMap<String, serde_json::Value>,
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (roi: {:.2} | cost: {:.2} | effort: {:.1} | risk: {:.1})",
            self.strategy_type,
            self.title,
            self.expected_roi(),
            self.estimated_cost,
            self.effort_score,
            self.risk_score,
        )
    }
}

impl Opportunity {
    /// Net expected return: revenue minus cost.
    pub fn expected_roi(&self) -> Decimal {
        self.expected_revenue - self.estimated_cost
    }

    /// Return on cost as a percentage; infinite when the cost is zero.
    pub fn roi_pct(&self) -> f64 {
        if self.estimated_cost.is_zero() {
            return f64::INFINITY;
        }
        (self.expected_roi() / self.estimated_cost * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0)
    }

    /// Effort clamped to the scoring floor.
    pub fn effective_effort(&self) -> f64 {
        self.effort_score.max(SCORE_FLOOR)
    }

    /// Risk clamped to the scoring floor.
    pub fn effective_risk(&self) -> f64 {
        self.risk_score.max(SCORE_FLOOR)
    }

    /// Payload string field, if present.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }

    /// Payload numeric field, if present.
    pub fn payload_f64(&self, key: &str) -> Option<f64> {
        self.payload.get(key).and_then(|v| v.as_f64())
    }

    /// Helper to build a test/sample opportunity with sensible defaults.
    #[cfg(test)]
    pub fn sample(id: &str, strategy_type: StrategyType) -> Self {
        Opportunity {
            id: id.to_string(),
            strategy_type,
            title: format!("Sample {strategy_type} opportunity"),
            description: "Sample description".to_string(),
            expected_revenue: Decimal::from(10),
            estimated_cost: Decimal::ONE,
            effort_score: 5.0,
            risk_score: 5.0,
            payload: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Approval enums
// ---------------------------------------------------------------------------

/// Risk tier shown to the operator for a gated action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    /// Tier for an opportunity risk score: ≥7 high, ≥4 medium, else low.
    pub fn from_score(risk_score: f64) -> Self {
        if risk_score >= 7.0 {
            RiskTier::High
        } else if risk_score >= 4.0 {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of real-world action awaiting sign-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    Transfer,
    ContainerSpawn,
    StrategyExecution,
    ExternalCall,
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionCategory::Transfer => write!(f, "transfer"),
            ActionCategory::ContainerSpawn => write!(f, "container_spawn"),
            ActionCategory::StrategyExecution => write!(f, "strategy_execution"),
            ActionCategory::ExternalCall => write!(f, "external_call"),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

/// Outcome of one strategy attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Realized profit. Zero while the payoff awaits external confirmation.
    pub profit: Decimal,
    pub details: String,
}

impl ExecutionResult {
    pub fn success(profit: Decimal, details: impl Into<String>) -> Self {
        Self {
            success: true,
            profit,
            details: details.into(),
        }
    }

    pub fn failure(details: impl Into<String>) -> Self {
        Self {
            success: false,
            profit: Decimal::ZERO,
            details: details.into(),
        }
    }

    /// Whether this result carries value that should reach the ledger.
    pub fn is_creditable(&self) -> bool {
        self.success && self.profit > Decimal::ZERO
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = if self.success { "OK" } else { "FAILED" };
        write!(f, "[{tag}] profit={} {}", self.profit, self.details)
    }
}

// ---------------------------------------------------------------------------
// Cycle state
// ---------------------------------------------------------------------------

/// The single mutable record threaded through one iteration of the loop.
///
/// Owned by the orchestrator. Stages never mutate it directly; they return
/// a [`CycleUpdate`] which is merged with [`CycleState::apply`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleState {
    pub cycle: u64,
    pub balance: Decimal,
    pub opportunities: Vec<Opportunity>,
    /// Strategy identifier chosen this cycle (`"wait"` allowed).
    pub selected_strategy: Option<String>,
    pub selected_opportunity: Option<Opportunity>,
    /// Strategy whose executor actually ran this cycle.
    pub executed_strategy: Option<String>,
    pub last_action: String,
    pub errors: Vec<String>,
    /// Per-cycle scratch: one line per stage, cleared with the cycle.
    pub trace: Vec<String>,
}

impl CycleState {
    pub fn new(cycle: u64) -> Self {
        Self {
            cycle,
            last_action: "starting up".to_string(),
            ..Default::default()
        }
    }

    /// Merge a partial update: last writer wins per field, lists append.
    pub fn apply(&mut self, update: CycleUpdate) {
        if update.next_cycle {
            self.cycle += 1;
            self.errors.clear();
            self.trace.clear();
            self.selected_strategy = None;
            self.selected_opportunity = None;
            self.executed_strategy = None;
        }
        if let Some(balance) = update.balance {
            self.balance = balance;
        }
        if let Some(opps) = update.opportunities {
            self.opportunities = opps;
        }
        if let Some(strategy) = update.selected_strategy {
            self.selected_strategy = strategy;
        }
        if let Some(opp) = update.selected_opportunity {
            self.selected_opportunity = opp;
        }
        if let Some(executed) = update.executed_strategy {
            self.executed_strategy = Some(executed);
        }
        if let Some(action) = update.last_action {
            self.last_action = action;
        }
        self.errors.extend(update.errors);
        self.trace.extend(update.trace);
    }

    /// `"failure"` if any error was recorded this cycle, else `"success"`.
    pub fn outcome(&self) -> &'static str {
        if self.errors.is_empty() {
            "success"
        } else {
            "failure"
        }
    }
}

/// Partial update returned by a stage.
#[derive(Debug, Clone, Default)]
pub struct CycleUpdate {
    pub balance: Option<Decimal>,
    pub opportunities: Option<Vec<Opportunity>>,
    pub selected_strategy: Option<Option<String>>,
    pub selected_opportunity: Option<Option<Opportunity>>,
    pub executed_strategy: Option<String>,
    pub last_action: Option<String>,
    pub errors: Vec<String>,
    pub trace: Vec<String>,
    /// Advance the cycle counter and clear per-cycle fields.
    pub next_cycle: bool,
}

impl CycleUpdate {
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    pub fn trace(mut self, line: impl Into<String>) -> Self {
        self.trace.push(line.into());
        self
    }

    pub fn last_action(mut self, action: impl Into<String>) -> Self {
        self.last_action = Some(action.into());
        self
    }
}

// ---------------------------------------------------------------------------
// History episode
// ---------------------------------------------------------------------------

/// One cycle's decision and outcome, as written to history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub ts: DateTime<Utc>,
    pub cycle: u64,
    pub strategy: String,
    pub action: String,
    pub outcome: String,
    pub details: String,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for AGORA.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Strategy registry incomplete, missing executors for: {0:?}")]
    MissingExecutors(Vec<String>),

    #[error("Insufficient capital for {strategy}: need {needed}, have {available}")]
    InsufficientCapital {
        strategy: String,
        needed: Decimal,
        available: Decimal,
    },

    #[error("Invalid payload for {opportunity}: {message}")]
    InvalidPayload { opportunity: String, message: String },

    #[error("Decision rejected: {0}")]
    DecisionRejected(String),

    #[error("Custody error: {0}")]
    Custody(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
