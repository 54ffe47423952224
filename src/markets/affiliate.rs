//! Affiliate content niches.
//!
//! A fixed catalogue of affiliate programmes, each turned into a content
//! opportunity whose revenue is the typical commission discounted for
//! competition and a modest conversion estimate. No network access.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

use super::OpportunitySource;
use crate::types::{Opportunity, StrategyType};

const SOURCE_NAME: &str = "affiliate";

/// Share of one commission an article is expected to earn per cycle.
const CONVERSION_ESTIMATE: Decimal = dec!(0.1);
const GENERATION_COST: Decimal = dec!(0.10);
const EFFORT_SCORE: f64 = 4.0;
const RISK_SCORE: f64 = 7.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Competition {
    Low,
    Medium,
    High,
}

impl Competition {
    fn penalty(self) -> Decimal {
        match self {
            Competition::Low => dec!(1.0),
            Competition::Medium => dec!(0.6),
            Competition::High => dec!(0.3),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Competition::Low => "low",
            Competition::Medium => "medium",
            Competition::High => "high",
        }
    }
}

struct Niche {
    name: &'static str,
    avg_commission: Decimal,
    competition: Competition,
}

const NICHES: &[Niche] = &[
    Niche {
        name: "crypto wallets",
        avg_commission: dec!(15),
        competition: Competition::Medium,
    },
    Niche {
        name: "VPN services",
        avg_commission: dec!(40),
        competition: Competition::High,
    },
    Niche {
        name: "web hosting",
        avg_commission: dec!(65),
        competition: Competition::High,
    },
    Niche {
        name: "AI writing tools",
        avg_commission: dec!(20),
        competition: Competition::Medium,
    },
    Niche {
        name: "online courses",
        avg_commission: dec!(30),
        competition: Competition::Low,
    },
    Niche {
        name: "password managers",
        avg_commission: dec!(25),
        competition: Competition::Low,
    },
];

pub struct AffiliateSource;

impl AffiliateSource {
    pub fn new() -> Self {
        Self
    }

    fn expected_revenue(niche: &Niche) -> Decimal {
        (niche.avg_commission * niche.competition.penalty() * CONVERSION_ESTIMATE).round_dp(2)
    }

    fn niche_to_opportunity(niche: &Niche) -> Opportunity {
        let slug = niche.name.to_lowercase().replace(' ', "-");

        let mut payload = BTreeMap::new();
        payload.insert("type".to_string(), json!("affiliate"));
        payload.insert("niche".to_string(), json!(niche.name));
        payload.insert(
            "avg_commission_usd".to_string(),
            json!(niche.avg_commission.to_string()),
        );
        payload.insert("competition".to_string(), json!(niche.competition.as_str()));

        Opportunity {
            id: format!("content:affiliate:{slug}"),
            strategy_type: StrategyType::Content,
            title: format!("Affiliate content: {}", niche.name),
            description: format!(
                "Review article for {} (avg commission ${}, {} competition)",
                niche.name,
                niche.avg_commission,
                niche.competition.as_str()
            ),
            expected_revenue: Self::expected_revenue(niche),
            estimated_cost: GENERATION_COST,
            effort_score: EFFORT_SCORE,
            risk_score: RISK_SCORE,
            payload,
        }
    }
}

impl Default for AffiliateSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OpportunitySource for AffiliateSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn scan(&self) -> Result<Vec<Opportunity>> {
        let opportunities: Vec<Opportunity> =
            NICHES.iter().map(Self::niche_to_opportunity).collect();
        debug!(niches = opportunities.len(), "Affiliate catalogue listed");
        Ok(opportunities)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
