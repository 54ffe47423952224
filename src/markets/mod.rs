//! Opportunity discovery.
//!
//! Defines the `OpportunitySource` trait implemented by each upstream feed,
//! and the `DiscoveryFeed` trait the orchestrator consumes. Concrete sources:
//! - `defillama`: yield pools as trade opportunities
//! - `github`: bounty-labelled issues as freelance work
//! - `affiliate`: affiliate programme niches as content briefs
//! - `price_gap`: Coinbase vs on-chain price gaps as arbitrage

pub mod affiliate;
pub mod defillama;
pub mod github;
pub mod price_gap;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::Opportunity;

/// A single upstream source of opportunities.
///
/// Implementations may fail freely; the aggregating feed contains the error
/// and treats the source as having found nothing.
#[async_trait]
pub trait OpportunitySource: Send + Sync {
    /// Source name for logging.
    fn name(&self) -> &str;

    /// Fetch the current set of candidates from this source.
    async fn scan(&self) -> Result<Vec<Opportunity>>;
}

/// What the orchestrator's scan stage calls once per cycle.
#[async_trait]
pub trait DiscoveryFeed: Send + Sync {
    /// Aggregate all sources and return affordable, ranked candidates.
    ///
    /// Never fails: a broken source contributes an empty list.
    async fn scan_all(&self, available: Decimal) -> Vec<Opportunity>;
}
