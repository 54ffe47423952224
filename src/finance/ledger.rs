//! Financial ledger.
//!
//! Append-only record of credits and debits. Each append is flushed to disk
//! before the call returns. Amounts are stored as decimal strings so nothing
//! is lost to float rounding.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Credit => write!(f, "credit"),
            Direction::Debit => write!(f, "debit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub ts: DateTime<Utc>,
    /// e.g. `income:trade`, `expense:gas`.
    pub category: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub direction: Direction,
    pub strategy: String,
    pub details: String,
}

impl LedgerEntry {
    /// Signed contribution to P&L.
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }
}

/// Aggregate view of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerTotals {
    pub income: Decimal,
    pub expenses: Decimal,
    pub pnl: Decimal,
    pub entries: usize,
}

impl LedgerTotals {
    pub fn from_entries(entries: &[LedgerEntry]) -> Self {
        let mut totals = LedgerTotals::default();
        for e in entries {
            match e.direction {
                Direction::Credit => totals.income += e.amount,
                Direction::Debit => totals.expenses += e.amount,
            }
        }
        totals.pnl = totals.income - totals.expenses;
        totals.entries = entries.len();
        totals
    }
}

/// Ledger category for income from a strategy.
pub fn income_category(strategy: &str) -> String {
    format!("income:{strategy}")
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Append a credit. Durable before returning.
    async fn record_credit(
        &self,
        category: &str,
        amount: Decimal,
        details: &str,
        strategy: &str,
    ) -> Result<()>;

    /// Append a debit. Durable before returning.
    async fn record_debit(
        &self,
        category: &str,
        amount: Decimal,
        details: &str,
        strategy: &str,
    ) -> Result<()>;

    /// Most recent entries, newest last. `limit == 0` returns everything.
    async fn entries(&self, limit: usize) -> Result<Vec<LedgerEntry>>;

    async fn totals(&self) -> Result<LedgerTotals>;
}

// ---------------------------------------------------------------------------
// JSONL ledger
// ---------------------------------------------------------------------------

/// Ledger backed by a newline-delimited JSON file. Single writer.
pub struct JsonlLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, entry: &LedgerEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry).context("Failed to serialize ledger entry")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create ledger directory: {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open ledger: {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("Failed to write ledger entry")?;
        file.sync_data().await.context("Failed to sync ledger")?;
        Ok(())
    }

    async fn record(
        &self,
        direction: Direction,
        category: &str,
        amount: Decimal,
        details: &str,
        strategy: &str,
    ) -> Result<()> {
        let entry = LedgerEntry {
            ts: Utc::now(),
            category: category.to_string(),
            amount,
            direction,
            strategy: strategy.to_string(),
            details: details.to_string(),
        };
        self.append(&entry).await?;

        let sign = if direction == Direction::Credit { "+" } else { "-" };
        info!(
            category,
            strategy,
            amount = format!("{sign}{amount}"),
            "Ledger entry recorded"
        );
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<LedgerEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read ledger: {}", self.path.display()))?;
        contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).context("Corrupt ledger line"))
            .collect()
    }
}

#[async_trait]
impl Ledger for JsonlLedger {
    async fn record_credit(
        &self,
        category: &str,
        amount: Decimal,
        details: &str,
        strategy: &str,
    ) -> Result<()> {
        self.record(Direction::Credit, category, amount, details, strategy).await
    }

    async fn record_debit(
        &self,
        category: &str,
        amount: Decimal,
        details: &str,
        strategy: &str,
    ) -> Result<()> {
        self.record(Direction::Debit, category, amount, details, strategy).await
    }

    async fn entries(&self, limit: usize) -> Result<Vec<LedgerEntry>> {
        let mut all = self.read_all().await?;
        if limit > 0 && all.len() > limit {
            all.drain(..all.len() - limit);
        }
        Ok(all)
    }

    async fn totals(&self) -> Result<LedgerTotals> {
        Ok(LedgerTotals::from_entries(&self.read_all().await?))
    }
}

// ---------------------------------------------------------------------------
// Profit routing
// ---------------------------------------------------------------------------

/// How realized profit and balance are split between uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfitRouting {
    pub reinvest_pct: Decimal,
    pub max_infra_pct: Decimal,
}

impl ProfitRouting {
    pub fn new(reinvest_pct: Decimal, max_infra_pct: Decimal) -> Self {
        Self {
            reinvest_pct,
            max_infra_pct,
        }
    }

    /// Share of `profit` to put back to work, to the cent.
    pub fn reinvest_amount(&self, profit: Decimal) -> Decimal {
        (profit * self.reinvest_pct).round_dp(2)
    }

    /// What is left of `profit` after reinvestment.
    pub fn reserve_amount(&self, profit: Decimal) -> Decimal {
        profit - self.reinvest_amount(profit)
    }

    /// Most that may be spent on infrastructure in one cycle.
    pub fn max_infra_budget(&self, balance: Decimal) -> Decimal {
        (balance * self.max_infra_pct).round_dp(2)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
