//! Custody handle.
//!
//! The agent's funds live behind [`CustodyHandle`]. Anything that moves
//! value out (transfers, swaps) must clear the approval gate first; the
//! gate's [`ApprovalDenied`](crate::approval::ApprovalDenied) travels back
//! inside the `anyhow::Error`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::approval::ApprovalGate;
use crate::types::{ActionCategory, AgentError, RiskTier};

/// Value at or above which a transfer is high risk.
const HIGH_RISK_AMOUNT: Decimal = dec!(50);
/// Value at or above which a transfer is medium risk.
const MEDIUM_RISK_AMOUNT: Decimal = dec!(10);

/// Risk tier for moving `value` units of the base asset.
pub fn transfer_risk(value: Decimal) -> RiskTier {
    if value >= HIGH_RISK_AMOUNT {
        RiskTier::High
    } else if value >= MEDIUM_RISK_AMOUNT {
        RiskTier::Medium
    } else {
        RiskTier::Low
    }
}

/// Result of a completed swap.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwapReceipt {
    pub tx_ref: String,
    pub sold: Decimal,
    pub bought: Decimal,
}

#[async_trait]
pub trait CustodyHandle: Send + Sync {
    /// Public receiving address.
    fn address(&self) -> String;

    /// The asset balances and profits are denominated in.
    fn base_asset(&self) -> &str;

    /// Balance of the base asset.
    async fn balance(&self) -> Result<Decimal> {
        let asset = self.base_asset().to_string();
        self.balance_of(&asset).await
    }

    async fn balance_of(&self, asset: &str) -> Result<Decimal>;

    /// Send `amount` of `asset` to `to`. Returns a transaction reference.
    async fn transfer(&self, to: &str, amount: Decimal, asset: &str) -> Result<String>;

    /// Exchange `amount` of `sell` for `buy` at `rate` units of `buy` per
    /// unit of `sell`.
    async fn swap(&self, sell: &str, buy: &str, amount: Decimal, rate: Decimal) -> Result<SwapReceipt>;
}

// ---------------------------------------------------------------------------
// Paper custody
// ---------------------------------------------------------------------------

/// In-memory custody for paper operation. Balances are per asset symbol
/// (case-insensitive). Outbound moves are gated.
pub struct PaperCustody {
    address: String,
    base_asset: String,
    balances: Mutex<HashMap<String, Decimal>>,
    gate: Arc<ApprovalGate>,
}

impl PaperCustody {
    pub fn new(base_asset: &str, starting_balance: Decimal, gate: Arc<ApprovalGate>) -> Self {
        let mut balances = HashMap::new();
        balances.insert(base_asset.to_uppercase(), starting_balance);
        Self {
            address: format!("paper-{}", uuid::Uuid::new_v4().simple()),
            base_asset: base_asset.to_uppercase(),
            balances: Mutex::new(balances),
            gate,
        }
    }

    /// Seed an extra asset balance.
    pub fn with_balance(self, asset: &str, amount: Decimal) -> Self {
        self.set_balance(asset, amount);
        self
    }

    pub fn set_balance(&self, asset: &str, amount: Decimal) {
        if let Ok(mut balances) = self.balances.lock() {
            balances.insert(asset.to_uppercase(), amount);
        }
    }

    fn read(&self, asset: &str) -> Result<Decimal> {
        let balances = self
            .balances
            .lock()
            .map_err(|_| AgentError::Custody("balance lock poisoned".into()))?;
        Ok(balances.get(&asset.to_uppercase()).copied().unwrap_or(Decimal::ZERO))
    }

    /// Apply signed deltas atomically, refusing to go negative.
    fn apply(&self, deltas: &[(&str, Decimal)]) -> Result<()> {
        let mut balances = self
            .balances
            .lock()
            .map_err(|_| AgentError::Custody("balance lock poisoned".into()))?;
        for (asset, delta) in deltas {
            let current = balances.get(&asset.to_uppercase()).copied().unwrap_or(Decimal::ZERO);
            if current + *delta < Decimal::ZERO {
                bail!(AgentError::Custody(format!(
                    "insufficient {asset}: have {current}, need {}",
                    -*delta
                )));
            }
        }
        for (asset, delta) in deltas {
            *balances.entry(asset.to_uppercase()).or_insert(Decimal::ZERO) += *delta;
        }
        Ok(())
    }
}

#[async_trait]
impl CustodyHandle for PaperCustody {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn base_asset(&self) -> &str {
        &self.base_asset
    }

    async fn balance_of(&self, asset: &str) -> Result<Decimal> {
        self.read(asset)
    }

    async fn transfer(&self, to: &str, amount: Decimal, asset: &str) -> Result<String> {
        if to.trim().is_empty() {
            bail!(AgentError::Custody("empty destination address".into()));
        }
        if amount <= Decimal::ZERO {
            bail!(AgentError::Custody(format!("non-positive transfer amount {amount}")));
        }
        let available = self.read(asset)?;
        if amount > available {
            bail!(AgentError::Custody(format!(
                "insufficient {asset}: have {available}, need {amount}"
            )));
        }

        let mut details = BTreeMap::new();
        details.insert("from".to_string(), json!(self.address));
        details.insert("to".to_string(), json!(to));
        details.insert("amount".to_string(), json!(amount.to_string()));
        details.insert("asset".to_string(), json!(asset));

        let risk = if asset.eq_ignore_ascii_case(&self.base_asset) {
            transfer_risk(amount)
        } else {
            RiskTier::High
        };
        self.gate
            .request_approval(
                ActionCategory::Transfer,
                &format!("Send {amount} {asset} to {to}"),
                details,
                risk,
            )
            .await?;

        self.apply(&[(asset, -amount)])?;
        let tx_ref = format!("paper-tx-{}", uuid::Uuid::new_v4().simple());
        info!(to, %amount, asset, tx = %tx_ref, "Paper transfer sent");
        Ok(tx_ref)
    }

    async fn swap(&self, sell: &str, buy: &str, amount: Decimal, rate: Decimal) -> Result<SwapReceipt> {
        if amount <= Decimal::ZERO || rate <= Decimal::ZERO {
            bail!(AgentError::Custody(format!(
                "invalid swap amount {amount} or rate {rate}"
            )));
        }
        let bought = amount * rate;
        let base_value = if sell.eq_ignore_ascii_case(&self.base_asset) {
            amount
        } else {
            bought
        };

        let mut details = BTreeMap::new();
        details.insert("sell".to_string(), json!(sell));
        details.insert("buy".to_string(), json!(buy));
        details.insert("amount".to_string(), json!(amount.to_string()));
        details.insert("rate".to_string(), json!(rate.to_string()));

        self.gate
            .request_approval(
                ActionCategory::Transfer,
                &format!("Swap {amount} {sell} for {buy}"),
                details,
                transfer_risk(base_value),
            )
            .await?;

        self.apply(&[(sell, -amount), (buy, bought)])?;
        let tx_ref = format!("paper-swap-{}", uuid::Uuid::new_v4().simple());
        info!(sell, buy, %amount, %bought, tx = %tx_ref, "Paper swap executed");
        Ok(SwapReceipt {
            tx_ref,
            sold: amount,
            bought,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::audit::AuditLog;
    use crate::approval::channel::{ApprovalChannel, ChannelVerdict, FixedSelector};
    use crate::approval::{ApprovalDenied, ApprovalRequest, DenialReason, DEFAULT_APPROVAL_TIMEOUT};
    use crate::shutdown::Shutdown;

    struct DenyAll;

    #[async_trait]
    impl ApprovalChannel for DenyAll {
        fn name(&self) -> &'static str {
            "deny"
        }

        async fn await_verdict(&self, _request: &ApprovalRequest) -> ChannelVerdict {
            ChannelVerdict::Denied
        }

        async fn abandon(&self, _request: &ApprovalRequest) {}
    }

    fn denying_gate() -> Arc<ApprovalGate> {
        Arc::new(ApprovalGate::new(
            true,
            DEFAULT_APPROVAL_TIMEOUT,
            Arc::new(FixedSelector(Arc::new(DenyAll))),
            AuditLog::disabled(),
            Shutdown::never(),
        ))
    }

    fn open_custody(balance: Decimal) -> PaperCustody {
        PaperCustody::new("usdc", balance, Arc::new(ApprovalGate::disabled()))
    }

    #[test]
    fn test_transfer_risk_tiers() {
        assert_eq!(transfer_risk(dec!(50)), RiskTier::High);
        assert_eq!(transfer_risk(dec!(49.99)), RiskTier::Medium);
        assert_eq!(transfer_risk(dec!(10)), RiskTier::Medium);
        assert_eq!(transfer_risk(dec!(9.99)), RiskTier::Low);
    }

    #[tokio::test]
    async fn test_balance_and_address() {
        let custody = open_custody(dec!(100));
        assert_eq!(custody.balance().await.unwrap(), dec!(100));
        assert_eq!(custody.balance_of("USDC").await.unwrap(), dec!(100));
        assert_eq!(custody.balance_of("sol").await.unwrap(), Decimal::ZERO);
        assert!(custody.address().starts_with("paper-"));
        assert_eq!(custody.base_asset(), "USDC");
    }

    #[tokio::test]
    async fn test_transfer_debits() {
        let custody = open_custody(dec!(100));
        let tx = custody.transfer("dest", dec!(30), "USDC").await.unwrap();
        assert!(tx.starts_with("paper-tx-"));
        assert_eq!(custody.balance().await.unwrap(), dec!(70));
    }

    #[tokio::test]
    async fn test_transfer_rejects_overdraft_and_bad_input() {
        let custody = open_custody(dec!(10));
        assert!(custody.transfer("dest", dec!(11), "USDC").await.is_err());
        assert!(custody.transfer("", dec!(1), "USDC").await.is_err());
        assert!(custody.transfer("dest", dec!(0), "USDC").await.is_err());
        assert_eq!(custody.balance().await.unwrap(), dec!(10));
    }

    #[tokio::test]
    async fn test_denied_transfer_leaves_balance() {
        let custody = PaperCustody::new("USDC", dec!(100), denying_gate());
        let err = custody.transfer("dest", dec!(5), "USDC").await.unwrap_err();
        let denied = err.downcast_ref::<ApprovalDenied>().unwrap();
        assert_eq!(denied.reason, DenialReason::Operator);
        assert_eq!(custody.balance().await.unwrap(), dec!(100));
    }

    #[tokio::test]
    async fn test_swap_moves_both_legs() {
        let custody = open_custody(dec!(100));
        let receipt = custody.swap("USDC", "SOL", dec!(10), dec!(0.05)).await.unwrap();
        assert_eq!(receipt.bought, dec!(0.5));
        assert_eq!(custody.balance().await.unwrap(), dec!(90));
        assert_eq!(custody.balance_of("SOL").await.unwrap(), dec!(0.5));
    }

    #[tokio::test]
    async fn test_swap_insufficient_is_atomic() {
        let custody = open_custody(dec!(100)).with_balance("SOL", dec!(0.1));
        assert!(custody.swap("SOL", "USDC", dec!(1), dec!(150)).await.is_err());
        assert_eq!(custody.balance_of("SOL").await.unwrap(), dec!(0.1));
        assert_eq!(custody.balance().await.unwrap(), dec!(100));
    }

    #[tokio::test]
    async fn test_denied_swap() {
        let custody = PaperCustody::new("USDC", dec!(100), denying_gate());
        let err = custody.swap("USDC", "SOL", dec!(10), dec!(0.05)).await.unwrap_err();
        assert!(err.downcast_ref::<ApprovalDenied>().is_some());
        assert_eq!(custody.balance().await.unwrap(), dec!(100));
    }
}
