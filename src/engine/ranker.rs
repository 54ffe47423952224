//! Opportunity ranking.
//!
//! Orders candidates by risk- and effort-adjusted return so the decision
//! window always holds the best work the agent can actually afford.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use std::cmp::Ordering;

use crate::types::Opportunity;

/// Score assigned to anything with a non-positive expected return.
pub const UNPROFITABLE_SCORE: f64 = -999.0;

/// Risk-adjusted score: `roi / max(effort, 0.1) / max(risk, 0.1)`.
///
/// Opportunities with `expected_roi() <= 0` get [`UNPROFITABLE_SCORE`] so
/// they always sort behind every profitable candidate.
pub fn score(opp: &Opportunity) -> f64 {
    let roi = opp.expected_roi();
    if roi <= Decimal::ZERO {
        return UNPROFITABLE_SCORE;
    }
    let roi = roi.to_f64().unwrap_or(0.0);
    roi / opp.effective_effort() / opp.effective_risk()
}

/// Sort by [`score`], best first. Ties keep their input order.
pub fn rank(mut opps: Vec<Opportunity>) -> Vec<Opportunity> {
    opps.sort_by(|a, b| score(b).partial_cmp(&score(a)).unwrap_or(Ordering::Equal));
    opps
}

/// Keep only opportunities whose cost fits within `available`.
pub fn filter_by_capital(opps: Vec<Opportunity>, available: Decimal) -> Vec<Opportunity> {
    opps.into_iter()
        .filter(|o| o.estimated_cost <= available)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
