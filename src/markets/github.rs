//! GitHub bounty issues.
//!
//! Searches open issues labelled as bounties and keeps the ones an automated
//! worker could plausibly handle. Bounties pay out after a maintainer merges
//! the fix, so the freelance executor books them as deferred.
//!
//! API: https://api.github.com/search/issues
//! Auth: optional bearer token (raises the rate limit)

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::{debug, info};

use super::OpportunitySource;
use crate::config::GitHubBountyConfig;
use crate::types::{Opportunity, StrategyType};

const SEARCH_URL: &str = "https://api.github.com/search/issues";
const SOURCE_NAME: &str = "github_bounties";
const SEARCH_QUERY: &str =
    "is:issue is:open label:bounty,Bounty,funded language:Python sort:created-desc";

/// Assumed payout when no amount is stated anywhere on the issue.
const DEFAULT_BOUNTY: Decimal = dec!(50);
/// Larger amounts are almost always parse noise (issue numbers, star counts).
const MAX_BOUNTY: Decimal = dec!(5000);
const TOKEN_COST: Decimal = dec!(0.50);
const EFFORT_SCORE: f64 = 5.0;
const RISK_SCORE: f64 = 2.0;
const BODY_EXCERPT: usize = 300;

const CAPABLE_KEYWORDS: &[&str] = &[
    "python", "script", "api", "bot", "scraper", "cli", "data", "json", "csv", "automation",
    "agent", "llm", "gpt", "ai", "bug", "fix", "test", "documentation", "research",
];

static MONEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$\s*([\d,]+(?:\.\d+)?)|([\d,]+(?:\.\d+)?)\s*(?:USDC|USD|\$)").unwrap()
});

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Issue>,
}

#[derive(Debug, Clone, Deserialize)]
struct Issue {
    id: u64,
    html_url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<Label>,
    #[serde(default)]
    repository_url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Label {
    #[serde(default)]
    name: String,
}

impl Issue {
    /// `owner/repo`, taken from the API repository URL.
    fn repo(&self) -> &str {
        self.repository_url
            .split("/repos/")
            .nth(1)
            .unwrap_or(&self.repository_url)
    }

    fn label_text(&self) -> String {
        self.labels
            .iter()
            .map(|l| l.name.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

pub struct GitHubBountySource {
    http: Client,
    token: Option<SecretString>,
    config: GitHubBountyConfig,
}

impl GitHubBountySource {
    pub fn new(config: GitHubBountyConfig, token: Option<SecretString>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("AGORA/0.1.0 (autonomous-agent)")
            .build()
            .context("Failed to build HTTP client for GitHub")?;

        Ok(Self {
            http,
            token,
            config,
        })
    }

    /// First dollar amount found in labels, then title, then body.
    fn bounty_amount(issue: &Issue) -> Decimal {
        let body = issue.body.as_deref().unwrap_or("");
        [issue.label_text().as_str(), issue.title.as_str(), body]
            .into_iter()
            .find_map(parse_amount)
            .map(|amount| amount.min(MAX_BOUNTY))
            .unwrap_or(DEFAULT_BOUNTY)
    }

    fn is_capable(issue: &Issue) -> bool {
        let haystack = format!(
            "{} {} {}",
            issue.title,
            issue.label_text(),
            issue.body.as_deref().unwrap_or("")
        )
        .to_lowercase();
        CAPABLE_KEYWORDS.iter().any(|kw| haystack.contains(kw))
    }

    fn issue_to_opportunity(issue: &Issue) -> Option<Opportunity> {
        if !Self::is_capable(issue) {
            return None;
        }

        let repo = issue.repo();
        let labels = issue
            .labels
            .iter()
            .map(|l| l.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let excerpt: String = issue
            .body
            .as_deref()
            .unwrap_or("")
            .chars()
            .take(BODY_EXCERPT)
            .collect();

        let mut payload = BTreeMap::new();
        payload.insert("url".to_string(), json!(issue.html_url));
        payload.insert("platform".to_string(), json!("github"));
        payload.insert("repo".to_string(), json!(repo));

        Some(Opportunity {
            id: format!("github:{}", issue.id),
            strategy_type: StrategyType::Freelance,
            title: format!("[GitHub] {}", issue.title),
            description: format!("Repo: {repo}\nLabels: {labels}\n{excerpt}"),
            expected_revenue: Self::bounty_amount(issue),
            estimated_cost: TOKEN_COST,
            effort_score: EFFORT_SCORE,
            risk_score: RISK_SCORE,
            payload,
        })
    }
}

/// Parse the first `$N`, `N USD` or `N USDC` amount out of `text`.
fn parse_amount(text: &str) -> Option<Decimal> {
    MONEY.captures_iter(text).find_map(|caps| {
        let raw = caps.get(1).or_else(|| caps.get(2))?.as_str().replace(',', "");
        Decimal::from_str(&raw).ok().filter(|v| *v > Decimal::ZERO)
    })
}

#[async_trait]
impl OpportunitySource for GitHubBountySource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn scan(&self) -> Result<Vec<Opportunity>> {
        debug!(query = SEARCH_QUERY, "Searching GitHub bounty issues");

        let per_page = self.config.max_results.to_string();
        let mut request = self
            .http
            .get(SEARCH_URL)
            .query(&[("q", SEARCH_QUERY), ("per_page", per_page.as_str())])
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let resp = request.send().await.context("GitHub search request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("GitHub search error {status}: {body}");
        }

        let parsed: SearchResponse = resp
            .json()
            .await
            .context("Failed to parse GitHub search response")?;

        let total = parsed.items.len();
        let opportunities: Vec<Opportunity> = parsed
            .items
            .iter()
            .filter_map(Self::issue_to_opportunity)
            .collect();

        info!(
            issues = total,
            opportunities = opportunities.len(),
            "GitHub bounty scan complete"
        );
        Ok(opportunities)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_issue(title: &str, labels: &[&str], body: Option<&str>) -> Issue {
        Issue {
            id: 42,
            html_url: "https://github.com/acme/tool/issues/7".to_string(),
            title: title.to_string(),
            body: body.map(str::to_string),
            labels: labels
                .iter()
                .map(|n| Label {
                    name: n.to_string(),
                })
                .collect(),
            repository_url: "https://api.github.com/repos/acme/tool".to_string(),
        }
    }

    #[test]
    fn test_parse_search_response() {
        let body = r#"{"total_count":1,"items":[{
            "id": 99,
            "html_url": "https://github.com/a/b/issues/1",
            "title": "Fix CSV export",
            "body": null,
            "labels": [{"name": "bounty", "color": "fff"}],
            "repository_url": "https://api.github.com/repos/a/b",
            "state": "open"
        }]}"#;
        let parsed: SearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].repo(), "a/b");
        assert!(parsed.items[0].body.is_none());
    }

    #[test]
    fn test_parse_amount_forms() {
        assert_eq!(parse_amount("Bounty: $150"), Some(dec!(150)));
        assert_eq!(parse_amount("$ 1,200.50 reward"), Some(dec!(1200.50)));
        assert_eq!(parse_amount("pays 75 USDC"), Some(dec!(75)));
        assert_eq!(parse_amount("pays 40 usd on merge"), Some(dec!(40)));
        assert_eq!(parse_amount("no money mentioned"), None);
        assert_eq!(parse_amount("$0"), None);
    }

    #[test]
    fn test_amount_prefers_labels_then_title_then_body() {
        let issue = make_issue("Fix parser ($200)", &["bounty", "$300"], Some("$400"));
        assert_eq!(GitHubBountySource::bounty_amount(&issue), dec!(300));

        let issue = make_issue("Fix parser ($200)", &["bounty"], Some("$400"));
        assert_eq!(GitHubBountySource::bounty_amount(&issue), dec!(200));

        let issue = make_issue("Fix parser", &["bounty"], Some("Reward is $400"));
        assert_eq!(GitHubBountySource::bounty_amount(&issue), dec!(400));
    }

    #[test]
    fn test_amount_defaults_and_caps() {
        let issue = make_issue("Fix parser", &["bounty"], None);
        assert_eq!(GitHubBountySource::bounty_amount(&issue), DEFAULT_BOUNTY);

        let issue = make_issue("Fix parser $90000", &["bounty"], None);
        assert_eq!(GitHubBountySource::bounty_amount(&issue), MAX_BOUNTY);
    }

    #[test]
    fn test_issue_to_opportunity() {
        let issue = make_issue("Add retry to API client", &["bounty", "$120"], Some("details"));
        let opp = GitHubBountySource::issue_to_opportunity(&issue).unwrap();
        assert_eq!(opp.id, "github:42");
        assert_eq!(opp.strategy_type, StrategyType::Freelance);
        assert_eq!(opp.title, "[GitHub] Add retry to API client");
        assert_eq!(opp.expected_revenue, dec!(120));
        assert_eq!(opp.estimated_cost, dec!(0.50));
        assert_eq!(opp.payload_str("platform"), Some("github"));
        assert_eq!(opp.payload_str("repo"), Some("acme/tool"));
        assert!(opp.description.starts_with("Repo: acme/tool\nLabels: bounty, $120\n"));
    }

    #[test]
    fn test_incapable_issue_skipped() {
        let issue = make_issue("Design a new logo", &["Bounty"], Some("Illustrator only"));
        assert!(GitHubBountySource::issue_to_opportunity(&issue).is_none());
    }
}
