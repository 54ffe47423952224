//! Multi-source opportunity scanner.
//!
//! Polls every configured source concurrently, contains per-source failures,
//! scrubs untrusted text, drops what the agent cannot afford, applies the
//! optional strategy focus, and ranks what is left.

use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::ranker;
use crate::markets::{DiscoveryFeed, OpportunitySource};
use crate::sanitize::scrub;
use crate::types::{Opportunity, StrategyType};

/// Aggregating discovery feed over a set of sources.
pub struct OpportunityScanner {
    sources: Vec<Arc<dyn OpportunitySource>>,
    focus: Vec<StrategyType>,
}

impl OpportunityScanner {
    pub fn new(sources: Vec<Arc<dyn OpportunitySource>>) -> Self {
        Self {
            sources,
            focus: Vec::new(),
        }
    }

    /// Restrict results to the given strategy types. Empty keeps everything.
    pub fn with_focus(mut self, focus: Vec<StrategyType>) -> Self {
        self.focus = focus;
        self
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    async fn safe_scan(source: &dyn OpportunitySource) -> Vec<Opportunity> {
        match source.scan().await {
            Ok(opps) => {
                debug!(source = source.name(), count = opps.len(), "Source scanned");
                opps
            }
            Err(e) => {
                warn!(source = source.name(), error = %e, "Source scan failed, continuing without");
                Vec::new()
            }
        }
    }

    fn sanitize(mut opp: Opportunity) -> Opportunity {
        opp.title = scrub(&opp.title);
        opp.description = scrub(&opp.description);
        opp
    }

    fn apply_focus(&self, opps: Vec<Opportunity>) -> Vec<Opportunity> {
        if self.focus.is_empty() {
            return opps;
        }
        opps.into_iter()
            .filter(|o| self.focus.contains(&o.strategy_type))
            .collect()
    }
}

#[async_trait]
impl DiscoveryFeed for OpportunityScanner {
    async fn scan_all(&self, available: Decimal) -> Vec<Opportunity> {
        info!(sources = self.sources.len(), %available, "Starting opportunity scan...");

        let results = join_all(self.sources.iter().map(|s| Self::safe_scan(s.as_ref()))).await;
        let raw: Vec<Opportunity> = results
            .into_iter()
            .flatten()
            .map(Self::sanitize)
            .collect();

        let raw_count = raw.len();
        let affordable = ranker::filter_by_capital(raw, available);
        let focused = self.apply_focus(affordable);
        let ranked = ranker::rank(focused);

        info!(
            raw = raw_count,
            kept = ranked.len(),
            "Opportunity scan complete"
        );
        ranked
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
