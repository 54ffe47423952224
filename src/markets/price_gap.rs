//! CEX/DEX price gap detection.
//!
//! Compares Coinbase spot prices with DeFiLlama's aggregated on-chain price
//! for a few majors. A gap wide enough to clear fees becomes an arbitrage
//! opportunity that says which venue is cheap.
//!
//! API: https://api.coinbase.com/v2/prices/{pair}/spot
//!      https://coins.llama.fi/prices/current/{coins}
//! Auth: none

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use super::OpportunitySource;
use crate::config::PriceGapConfig;
use crate::types::{Opportunity, StrategyType};

const COINBASE_SPOT_URL: &str = "https://api.coinbase.com/v2/prices";
const LLAMA_PRICES_URL: &str = "https://coins.llama.fi/prices/current";
const SOURCE_NAME: &str = "price_gap";

const QUOTE: &str = "USDC";

/// `(symbol, coingecko id)` for each watched base asset.
const PAIRS: &[(&str, &str)] = &[("ETH", "ethereum"), ("SOL", "solana")];

/// Notional traded to estimate revenue.
const NOTIONAL: Decimal = dec!(100);
/// Round-trip fees and gas.
const FEES: Decimal = dec!(1.00);
const EFFORT_SCORE: f64 = 4.0;
const RISK_SCORE: f64 = 6.0;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SpotResponse {
    data: SpotPrice,
}

#[derive(Debug, Deserialize)]
struct SpotPrice {
    amount: String,
}

#[derive(Debug, Deserialize)]
struct CoinsResponse {
    #[serde(default)]
    coins: HashMap<String, CoinPrice>,
}

#[derive(Debug, Deserialize)]
struct CoinPrice {
    price: f64,
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

pub struct PriceGapSource {
    http: Client,
    config: PriceGapConfig,
}

impl PriceGapSource {
    pub fn new(config: PriceGapConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent("AGORA/0.1.0 (autonomous-agent)")
            .build()
            .context("Failed to build HTTP client for price feeds")?;

        Ok(Self { http, config })
    }

    async fn cex_price(&self, base: &str) -> Result<f64> {
        let url = format!("{COINBASE_SPOT_URL}/{base}-{QUOTE}/spot");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Coinbase spot request failed for {base}"))?;

        if !resp.status().is_success() {
            anyhow::bail!("Coinbase spot error {} for {base}", resp.status());
        }

        let parsed: SpotResponse = resp
            .json()
            .await
            .context("Failed to parse Coinbase spot response")?;
        parsed
            .data
            .amount
            .parse::<f64>()
            .with_context(|| format!("Bad Coinbase amount: {}", parsed.data.amount))
    }

    /// On-chain prices keyed by coingecko id.
    async fn dex_prices(&self) -> Result<HashMap<String, f64>> {
        let coins = PAIRS
            .iter()
            .map(|(_, id)| format!("coingecko:{id}"))
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{LLAMA_PRICES_URL}/{coins}");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("DeFiLlama coins request failed")?;

        if !resp.status().is_success() {
            anyhow::bail!("DeFiLlama coins error {}", resp.status());
        }

        let parsed: CoinsResponse = resp
            .json()
            .await
            .context("Failed to parse DeFiLlama coins response")?;
        Ok(parsed
            .coins
            .into_iter()
            .filter_map(|(key, p)| Some((key.strip_prefix("coingecko:")?.to_string(), p.price)))
            .collect())
    }

    /// Turn one pair of venue prices into an opportunity if the gap pays.
    fn gap_to_opportunity(base: &str, cex: f64, dex: f64, min_gap_pct: f64) -> Option<Opportunity> {
        if cex <= 0.0 || dex <= 0.0 {
            return None;
        }
        let gap_pct = (cex - dex).abs() / cex.min(dex) * 100.0;
        if gap_pct < min_gap_pct {
            return None;
        }

        let net = (NOTIONAL * Decimal::from_f64(gap_pct / 100.0)? - FEES).round_dp(2);
        if net <= Decimal::ZERO {
            return None;
        }

        let (buy_on, sell_on) = if dex < cex { ("dex", "cex") } else { ("cex", "dex") };

        let mut payload = BTreeMap::new();
        payload.insert("base".to_string(), json!(base));
        payload.insert("quote".to_string(), json!(QUOTE));
        payload.insert("cex_price".to_string(), json!(cex));
        payload.insert("dex_price".to_string(), json!(dex));
        payload.insert("gap_pct".to_string(), json!((gap_pct * 1000.0).round() / 1000.0));
        payload.insert("buy_on".to_string(), json!(buy_on));
        payload.insert("sell_on".to_string(), json!(sell_on));

        Some(Opportunity {
            id: format!("arb:{}-{}", base.to_lowercase(), QUOTE.to_lowercase()),
            strategy_type: StrategyType::Arbitrage,
            title: format!("{base}/{QUOTE} arb {gap_pct:.2}% gap"),
            description: format!(
                "Buy on {buy_on} at {:.4}, sell on {sell_on} at {:.4}",
                cex.min(dex),
                cex.max(dex)
            ),
            expected_revenue: net,
            estimated_cost: FEES,
            effort_score: EFFORT_SCORE,
            risk_score: RISK_SCORE,
            payload,
        })
    }
}

#[async_trait]
impl OpportunitySource for PriceGapSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn scan(&self) -> Result<Vec<Opportunity>> {
        let dex = self.dex_prices().await?;

        let mut opportunities = Vec::new();
        for (base, coin_id) in PAIRS {
            let Some(&dex_price) = dex.get(*coin_id) else {
                debug!(base, "No on-chain price, skipping pair");
                continue;
            };
            let cex_price = match self.cex_price(base).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(base, error = %e, "Spot price unavailable, skipping pair");
                    continue;
                }
            };
            debug!(base, cex_price, dex_price, "Venue prices");
            if let Some(opp) =
                Self::gap_to_opportunity(base, cex_price, dex_price, self.config.min_gap_pct)
            {
                opportunities.push(opp);
            }
        }

        info!(
            pairs = PAIRS.len(),
            opportunities = opportunities.len(),
            "Price gap scan complete"
        );
        Ok(opportunities)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
