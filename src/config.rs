//! Agent configuration.
//!
//! `config.toml` maps onto the typed sections below; every section except
//! `[agent]` may be omitted and falls back to its defaults. API keys are
//! named by environment variable and looked up with [`AppConfig::resolve_env`].

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use tracing::warn;

use crate::types::StrategyType;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub custody: CustodyConfig,
    #[serde(default)]
    pub treasury: TreasuryConfig,
    #[serde(default)]
    pub strategies: StrategiesConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// Idle sleep between cycles.
    pub scan_interval_secs: u64,
    /// How many top-ranked opportunities the oracle sees.
    #[serde(default = "default_decision_window")]
    pub decision_window: usize,
    /// Strategy types discovery is restricted to. Empty means all.
    #[serde(default)]
    pub focus: Vec<String>,
    #[serde(default = "default_state_file")]
    pub state_file: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApprovalConfig {
    pub require_approval: bool,
    pub timeout_secs: u64,
    pub audit_log: String,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            require_approval: true,
            timeout_secs: 300,
            audit_log: "data/audit.jsonl".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub max_tokens: u32,
    /// Tried after the primary model gives up (OpenRouter only).
    #[serde(default)]
    pub fallback_model: Option<String>,
    /// Upper bound on one decision consultation.
    #[serde(default = "default_decision_timeout")]
    pub decision_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CustodyConfig {
    pub asset: String,
    pub paper_balance: Decimal,
    /// Minimum balance before the trade strategy deploys capital.
    #[serde(default = "default_min_trade")]
    pub min_trade: Decimal,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            asset: "USDC".to_string(),
            paper_balance: dec!(100),
            min_trade: default_min_trade(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TreasuryConfig {
    pub ledger_path: String,
    pub history_path: String,
    /// Fraction of net profit earmarked for reinvestment.
    pub profit_reinvest_pct: Decimal,
    /// Fraction of balance that may be spent on infrastructure.
    pub max_infra_spend_pct: Decimal,
}

impl Default for TreasuryConfig {
    fn default() -> Self {
        Self {
            ledger_path: "data/ledger.jsonl".to_string(),
            history_path: "data/history.jsonl".to_string(),
            profit_reinvest_pct: dec!(0.70),
            max_infra_spend_pct: dec!(0.10),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategiesConfig {
    pub content_dir: String,
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            content_dir: "data".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub defillama: DefiLlamaConfig,
    #[serde(default)]
    pub github: GitHubBountyConfig,
    #[serde(default)]
    pub affiliate: AffiliateConfig,
    #[serde(default)]
    pub price_gap: PriceGapConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DefiLlamaConfig {
    pub enabled: bool,
    pub min_apy: f64,
    pub min_tvl_usd: f64,
    /// Chain allow-list. Empty means every chain.
    #[serde(default)]
    pub chains: Vec<String>,
    pub max_results: usize,
}

impl Default for DefiLlamaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_apy: 5.0,
            min_tvl_usd: 100_000.0,
            chains: Vec::new(),
            max_results: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitHubBountyConfig {
    pub enabled: bool,
    /// Env var holding a GitHub token. Unset means anonymous requests.
    #[serde(default)]
    pub token_env: Option<String>,
    pub max_results: usize,
}

impl Default for GitHubBountyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token_env: Some("GITHUB_TOKEN".to_string()),
            max_results: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AffiliateConfig {
    pub enabled: bool,
}

impl Default for AffiliateConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PriceGapConfig {
    pub enabled: bool,
    /// Smallest CEX/DEX gap, in percent, worth reporting.
    pub min_gap_pct: f64,
}

impl Default for PriceGapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_gap_pct: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    /// Listen address. Anything but loopback exposes the approval endpoints.
    #[serde(default = "default_dashboard_bind")]
    pub bind: String,
    pub port: u16,
    /// Env var holding the operator token required by the approval endpoints.
    #[serde(default)]
    pub token_env: Option<String>,
}

fn default_decision_window() -> usize {
    5
}

fn default_state_file() -> String {
    crate::storage::DEFAULT_STATE_FILE.to_string()
}

fn default_min_trade() -> Decimal {
    dec!(10)
}

fn default_decision_timeout() -> u64 {
    60
}

fn default_dashboard_bind() -> String {
    "127.0.0.1".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Errors if the variable is unset.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The configured focus as strategy types, skipping unknown names.
    pub fn focus(&self) -> Vec<StrategyType> {
        self.agent
            .focus
            .iter()
            .filter_map(|name| match name.parse::<StrategyType>() {
                Ok(t) => Some(t),
                Err(e) => {
                    warn!(focus = %name, error = %e, "Ignoring unknown focus entry");
                    None
                }
            })
            .collect()
    }
}
