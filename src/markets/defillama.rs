//! DeFiLlama yield pool source.
//!
//! Polls the public yields endpoint for high-APY pools and turns each into
//! a trade opportunity sized against a notional 100-unit deployment.
//!
//! API: https://yields.llama.fi/pools
//! Auth: none

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::OpportunitySource;
use crate::config::DefiLlamaConfig;
use crate::types::{Opportunity, StrategyType};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const POOLS_URL: &str = "https://yields.llama.fi/pools";
const SOURCE_NAME: &str = "defillama";

/// Notional deployment used to estimate weekly revenue.
const NOTIONAL_DEPLOYMENT: Decimal = dec!(100);

/// Flat gas estimate per entry.
const GAS_ESTIMATE: Decimal = dec!(0.50);

const EFFORT_SCORE: f64 = 3.0;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PoolsResponse {
    #[serde(default)]
    data: Vec<Pool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pool {
    pool: String,
    #[serde(default)]
    chain: String,
    #[serde(default)]
    project: String,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    tvl_usd: Option<f64>,
    #[serde(default)]
    apy: Option<f64>,
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// DeFiLlama yield pool scanner.
pub struct DefiLlamaSource {
    http: Client,
    config: DefiLlamaConfig,
}

impl DefiLlamaSource {
    pub fn new(config: DefiLlamaConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("AGORA/0.1.0 (autonomous-agent)")
            .build()
            .context("Failed to build HTTP client for DeFiLlama")?;

        Ok(Self { http, config })
    }

    /// Apply chain, TVL and APY filters, then keep the top pools by APY.
    fn select_pools(&self, pools: Vec<Pool>) -> Vec<Pool> {
        let chains: Vec<String> = self.config.chains.iter().map(|c| c.to_lowercase()).collect();

        let mut candidates: Vec<Pool> = pools
            .into_iter()
            .filter(|p| chains.is_empty() || chains.contains(&p.chain.to_lowercase()))
            .filter(|p| p.tvl_usd.unwrap_or(0.0) >= self.config.min_tvl_usd)
            .filter(|p| p.apy.unwrap_or(0.0) >= self.config.min_apy)
            .collect();

        candidates.sort_by(|a, b| {
            b.apy
                .unwrap_or(0.0)
                .partial_cmp(&a.apy.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(self.config.max_results);
        candidates
    }

    fn pool_to_opportunity(pool: &Pool) -> Option<Opportunity> {
        let apy = pool.apy?;
        let tvl = pool.tvl_usd.unwrap_or(0.0);
        let weekly_rate = Decimal::from_f64(apy / 100.0 / 52.0)?;
        let weekly_revenue = (NOTIONAL_DEPLOYMENT * weekly_rate).round_dp(2);

        let mut payload = BTreeMap::new();
        payload.insert("pool_id".to_string(), json!(pool.pool));
        payload.insert("project".to_string(), json!(pool.project));
        payload.insert("symbol".to_string(), json!(pool.symbol));
        payload.insert("apy".to_string(), json!(apy));
        payload.insert("tvl_usd".to_string(), json!(tvl));
        payload.insert("chain".to_string(), json!(pool.chain));

        Some(Opportunity {
            id: format!("defi:{}", pool.pool),
            strategy_type: StrategyType::Trade,
            title: format!("{} {} {:.1}% APY", pool.project, pool.symbol, apy),
            description: format!(
                "Yield pool on {}. Project: {}, Symbol: {}, APY: {:.2}%, TVL: ${:.0}",
                pool.chain, pool.project, pool.symbol, apy, tvl
            ),
            expected_revenue: weekly_revenue,
            estimated_cost: GAS_ESTIMATE,
            effort_score: EFFORT_SCORE,
            risk_score: (10.0 - apy / 10.0).clamp(1.0, 10.0),
            payload,
        })
    }
}

#[async_trait]
impl OpportunitySource for DefiLlamaSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn scan(&self) -> Result<Vec<Opportunity>> {
        debug!(url = POOLS_URL, "Fetching DeFiLlama pools");

        let resp = self
            .http
            .get(POOLS_URL)
            .send()
            .await
            .context("DeFiLlama API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("DeFiLlama API error {status}: {body}");
        }

        let parsed: PoolsResponse = resp
            .json()
            .await
            .context("Failed to parse DeFiLlama pools response")?;

        let total = parsed.data.len();
        let opportunities: Vec<Opportunity> = self
            .select_pools(parsed.data)
            .iter()
            .filter_map(Self::pool_to_opportunity)
            .collect();

        info!(
            pools = total,
            opportunities = opportunities.len(),
            "DeFiLlama scan complete"
        );
        Ok(opportunities)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
