//! Yield deployment.
//!
//! Puts a slice of the balance into the pool named by the opportunity and
//! books the projected weekly yield.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

use super::{invalid_payload, StrategyExecutor};
use crate::finance::custody::CustodyHandle;
use crate::types::{ExecutionResult, Opportunity, StrategyType};

/// Share of the balance deployed per trade.
const DEPLOY_FRACTION: Decimal = dec!(0.10);
const MAX_DEPLOY: Decimal = dec!(100);
const WEEKS_PER_YEAR: Decimal = dec!(52);

pub struct TradeExecutor {
    min_trade: Decimal,
}

impl TradeExecutor {
    pub fn new(min_trade: Decimal) -> Self {
        Self { min_trade }
    }

    /// Amount deployed from `balance`.
    pub fn deploy_amount(balance: Decimal) -> Decimal {
        (balance * DEPLOY_FRACTION).min(MAX_DEPLOY)
    }

    /// Projected weekly yield on `deploy` at `apy` percent.
    pub fn weekly_yield(deploy: Decimal, apy: Decimal) -> Decimal {
        (deploy * apy / dec!(100) / WEEKS_PER_YEAR).round_dp(3)
    }
}

#[async_trait]
impl StrategyExecutor for TradeExecutor {
    fn strategy(&self) -> StrategyType {
        StrategyType::Trade
    }

    fn min_capital(&self) -> Decimal {
        dec!(10)
    }

    async fn execute(
        &self,
        opportunity: &Opportunity,
        custody: &dyn CustodyHandle,
    ) -> Result<ExecutionResult> {
        let pool_id = match opportunity.payload_str("pool_id") {
            Some(id) if !id.is_empty() => id,
            _ => return Ok(ExecutionResult::failure("No pool_id in opportunity payload")),
        };
        let project = opportunity.payload_str("project").unwrap_or("unknown");
        let apy = opportunity
            .payload_f64("apy")
            .and_then(Decimal::from_f64)
            .ok_or_else(|| invalid_payload(opportunity, "apy missing or not a number"))?;

        let balance = custody.balance().await?;
        if balance < self.min_trade {
            return Ok(ExecutionResult::failure(format!(
                "Insufficient balance: {balance} {} < {} minimum",
                custody.base_asset(),
                self.min_trade
            )));
        }

        let deploy = Self::deploy_amount(balance);
        let weekly = Self::weekly_yield(deploy, apy);
        info!(pool = pool_id, project, %deploy, %apy, %weekly, "Deploying into yield pool");

        Ok(ExecutionResult::success(
            weekly,
            format!(
                "Deployed {deploy} {} into {project} pool. Projected weekly yield: {weekly} at {apy}% APY.",
                custody.base_asset()
            ),
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalGate;
    use crate::finance::custody::PaperCustody;
    use serde_json::json;
    use std::sync::Arc;

    fn custody(balance: Decimal) -> PaperCustody {
        PaperCustody::new("USDC", balance, Arc::new(ApprovalGate::disabled()))
    }

    fn pool_opp(apy: f64) -> Opportunity {
        let mut opp = Opportunity::sample("defi:pool-1", StrategyType::Trade);
        opp.payload.insert("pool_id".into(), json!("pool-1"));
        opp.payload.insert("project".into(), json!("aave-v3"));
        opp.payload.insert("apy".into(), json!(apy));
        opp
    }

    #[test]
    fn test_deploy_amount_capped() {
        assert_eq!(TradeExecutor::deploy_amount(dec!(100)), dec!(10));
        assert_eq!(TradeExecutor::deploy_amount(dec!(5000)), dec!(100));
    }

    #[test]
    fn test_weekly_yield() {
        assert_eq!(TradeExecutor::weekly_yield(dec!(10), dec!(52)), dec!(0.1));
        assert_eq!(TradeExecutor::weekly_yield(dec!(100), dec!(5)), dec!(0.096));
    }

    #[tokio::test]
    async fn test_execute_books_weekly_yield() {
        let exec = TradeExecutor::new(dec!(10));
        let result = exec.execute(&pool_opp(52.0), &custody(dec!(100))).await.unwrap();
        assert!(result.success);
        assert_eq!(result.profit, dec!(0.1));
        assert!(result.details.contains("aave-v3"));
    }

    #[tokio::test]
    async fn test_missing_pool_id_fails() {
        let exec = TradeExecutor::new(dec!(10));
        let opp = Opportunity::sample("x", StrategyType::Trade);
        let result = exec.execute(&opp, &custody(dec!(100))).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.profit, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_below_min_trade_fails() {
        let exec = TradeExecutor::new(dec!(10));
        let result = exec.execute(&pool_opp(8.0), &custody(dec!(9.99))).await.unwrap();
        assert!(!result.success);
        assert!(result.details.contains("Insufficient balance"));
    }

    #[tokio::test]
    async fn test_non_numeric_apy_is_invalid_payload() {
        let exec = TradeExecutor::new(dec!(10));
        let mut opp = pool_opp(1.0);
        opp.payload.insert("apy".into(), json!("lots"));
        assert!(exec.execute(&opp, &custody(dec!(100))).await.is_err());
    }
}
