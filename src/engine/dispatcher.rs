//! Strategy dispatch.
//!
//! Turns the cycle's chosen strategy and opportunity into at most one
//! executor call and at most one ledger credit. Nothing in here returns an
//! error: every failure becomes a cycle error string.

use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::approval::{ApprovalDenied, ApprovalGate};
use crate::finance::custody::CustodyHandle;
use crate::finance::ledger::{income_category, Ledger};
use crate::strategies::StrategyRegistry;
use crate::types::{
    ActionCategory, AgentError, ExecutionResult, Opportunity, RiskTier, StrategyChoice,
};

pub const NO_STRATEGY_EXECUTED: &str = "no strategy executed";

/// What one dispatch did.
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    pub last_action: String,
    pub errors: Vec<String>,
    /// Present only when an executor ran to completion.
    pub result: Option<ExecutionResult>,
    /// Whether a ledger credit was written.
    pub credited: bool,
}

impl DispatchOutcome {
    fn noop() -> Self {
        Self {
            last_action: NO_STRATEGY_EXECUTED.to_string(),
            ..Default::default()
        }
    }

    fn failed(last_action: String, error: String) -> Self {
        Self {
            last_action,
            errors: vec![error],
            ..Default::default()
        }
    }

    pub fn executed(&self) -> bool {
        self.result.is_some()
    }
}

pub struct StrategyDispatcher {
    registry: Arc<StrategyRegistry>,
    gate: Arc<ApprovalGate>,
    ledger: Arc<dyn Ledger>,
    custody: Arc<dyn CustodyHandle>,
}

impl StrategyDispatcher {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        gate: Arc<ApprovalGate>,
        ledger: Arc<dyn Ledger>,
        custody: Arc<dyn CustodyHandle>,
    ) -> Self {
        Self {
            registry,
            gate,
            ledger,
            custody,
        }
    }

    pub async fn dispatch(
        &self,
        strategy: Option<&str>,
        opportunity: Option<&Opportunity>,
        balance: Decimal,
    ) -> DispatchOutcome {
        let (id, opp) = match (strategy, opportunity) {
            (Some(id), Some(opp)) if id != StrategyChoice::WAIT => (id, opp),
            _ => return DispatchOutcome::noop(),
        };

        let Some(executor) = self.registry.get(id) else {
            let err = AgentError::UnknownStrategy(id.to_string()).to_string();
            warn!(strategy = id, "Unknown strategy selected");
            return DispatchOutcome::failed(format!("unknown strategy '{id}'"), err);
        };

        let needed = executor.min_capital();
        if balance < needed {
            let err = AgentError::InsufficientCapital {
                strategy: id.to_string(),
                needed,
                available: balance,
            };
            warn!(strategy = id, %needed, %balance, "Insufficient capital, skipping execution");
            return DispatchOutcome::failed(format!("{id} skipped: insufficient capital"), err.to_string());
        }

        if executor.affects_real_world() {
            if let Err(denied) = self.approve(id, opp).await {
                return DispatchOutcome::failed(format!("{id} not executed: {denied}"), denied.to_string());
            }
        }

        info!(strategy = id, opportunity = %opp.id, "Executing strategy");
        let result = match executor.execute(opp, self.custody.as_ref()).await {
            Ok(result) => result,
            Err(e) => {
                if let Some(denied) = e.downcast_ref::<ApprovalDenied>() {
                    warn!(strategy = id, %denied, "Execution stopped by approval denial");
                    return DispatchOutcome::failed(format!("{id} not executed: {denied}"), denied.to_string());
                }
                error!(strategy = id, opportunity = %opp.id, error = %format!("{e:#}"), "Executor failed");
                return DispatchOutcome::failed(
                    format!("{id} failed"),
                    format!("Executor {id} failed: {e:#}"),
                );
            }
        };

        let mut outcome = DispatchOutcome {
            last_action: format!("{id}: {result}"),
            ..Default::default()
        };

        if result.is_creditable() {
            match self
                .ledger
                .record_credit(&income_category(id), result.profit, &result.details, id)
                .await
            {
                Ok(()) => outcome.credited = true,
                Err(e) => {
                    error!(strategy = id, profit = %result.profit, error = %e, "Ledger credit failed");
                    outcome.errors.push(format!("Ledger credit failed for {id}: {e}"));
                }
            }
        } else if !result.success {
            warn!(strategy = id, details = %result.details, "Strategy reported failure");
            outcome.errors.push(format!("{id} failed: {}", result.details));
        }

        info!(
            strategy = id,
            success = result.success,
            profit = %result.profit,
            credited = outcome.credited,
            "Strategy finished"
        );
        outcome.result = Some(result);
        outcome
    }

    async fn approve(&self, id: &str, opp: &Opportunity) -> Result<(), ApprovalDenied> {
        let mut details = BTreeMap::new();
        details.insert("strategy".to_string(), json!(id));
        details.insert("opportunity_id".to_string(), json!(opp.id));
        details.insert("expected_revenue".to_string(), json!(opp.expected_revenue.to_string()));
        details.insert("estimated_cost".to_string(), json!(opp.estimated_cost.to_string()));
        details.insert("risk_score".to_string(), json!(opp.risk_score));

        self.gate
            .request_approval(
                ActionCategory::StrategyExecution,
                &format!("Execute {id}: {}", opp.title),
                details,
                RiskTier::from_score(opp.risk_score),
            )
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
