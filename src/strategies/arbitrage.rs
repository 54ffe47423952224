//! Cross-venue price gap capture.
//!
//! Only the on-chain leg can be executed, so the trade is one-sided: buy SOL
//! when it is cheap on the DEX, sell when it is dear. Other assets are
//! detected upstream but cannot be acted on here.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

use super::{invalid_payload, StrategyExecutor};
use crate::finance::custody::CustodyHandle;
use crate::types::{ExecutionResult, Opportunity, StrategyType};

const DEPLOY_FRACTION: Decimal = dec!(0.10);
const MAX_DEPLOY_QUOTE: Decimal = dec!(25);
const MAX_DEPLOY_SOL: Decimal = dec!(0.15);
const MIN_DEPLOY_SOL: Decimal = dec!(0.01);
const MIN_CAPITAL: Decimal = dec!(5);

const SOL: &str = "SOL";

pub struct ArbitrageExecutor;

impl ArbitrageExecutor {
    pub fn new() -> Self {
        Self
    }

    fn profit(notional: Decimal, gap_pct: Decimal) -> Decimal {
        (notional * gap_pct / dec!(100)).round_dp(4)
    }

    async fn execute_sol(
        &self,
        opportunity: &Opportunity,
        custody: &dyn CustodyHandle,
        quote: &str,
        gap_pct: Decimal,
    ) -> Result<ExecutionResult> {
        let price = opportunity
            .payload_f64("dex_price")
            .and_then(Decimal::from_f64)
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| invalid_payload(opportunity, "dex_price missing or not positive"))?;
        let buy_on = opportunity.payload_str("buy_on").unwrap_or("unknown");

        if buy_on == "dex" {
            let available = custody.balance_of(quote).await?;
            let deploy = (available * DEPLOY_FRACTION).min(MAX_DEPLOY_QUOTE);
            if deploy < MIN_CAPITAL {
                return Ok(ExecutionResult::failure(format!(
                    "Insufficient {quote}: {available} (need {MIN_CAPITAL})"
                )));
            }
            let receipt = custody
                .swap(quote, SOL, deploy, Decimal::ONE / price)
                .await
                .context("DEX buy leg failed")?;
            let profit = Self::profit(deploy, gap_pct);
            info!(%deploy, bought = %receipt.bought, %gap_pct, %profit, "Bought SOL on DEX");
            Ok(ExecutionResult::success(
                profit,
                format!(
                    "DEX swap: {deploy} {quote} -> {} SOL ({gap_pct}% gap) | tx: {}",
                    receipt.bought.round_dp(5),
                    receipt.tx_ref
                ),
            ))
        } else {
            let available = custody.balance_of(SOL).await?;
            let deploy = (available * DEPLOY_FRACTION).min(MAX_DEPLOY_SOL);
            if deploy < MIN_DEPLOY_SOL {
                return Ok(ExecutionResult::failure(format!("Insufficient SOL: {available}")));
            }
            let receipt = custody
                .swap(SOL, quote, deploy, price)
                .await
                .context("DEX sell leg failed")?;
            let profit = Self::profit(receipt.bought, gap_pct);
            info!(%deploy, received = %receipt.bought, %gap_pct, %profit, "Sold SOL on DEX");
            Ok(ExecutionResult::success(
                profit,
                format!(
                    "DEX swap: {deploy} SOL -> {} {quote} ({gap_pct}% gap) | tx: {}",
                    receipt.bought.round_dp(2),
                    receipt.tx_ref
                ),
            ))
        }
    }
}

impl Default for ArbitrageExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StrategyExecutor for ArbitrageExecutor {
    fn strategy(&self) -> StrategyType {
        StrategyType::Arbitrage
    }

    fn min_capital(&self) -> Decimal {
        MIN_CAPITAL
    }

    async fn execute(
        &self,
        opportunity: &Opportunity,
        custody: &dyn CustodyHandle,
    ) -> Result<ExecutionResult> {
        let base = opportunity.payload_str("base").unwrap_or("ETH");
        let quote = opportunity.payload_str("quote").unwrap_or("USDC");
        let gap_pct = opportunity
            .payload_f64("gap_pct")
            .and_then(Decimal::from_f64)
            .unwrap_or(Decimal::ZERO);

        if base.eq_ignore_ascii_case(SOL) {
            return self.execute_sol(opportunity, custody, quote, gap_pct).await;
        }

        info!(base, quote, %gap_pct, "Arbitrage gap detected, no execution leg for this pair");
        Ok(ExecutionResult::failure(format!(
            "{base}/{quote} arb detected ({gap_pct}% gap) but execution leg unavailable"
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
