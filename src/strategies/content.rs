//! Content generation.
//!
//! Writes an affiliate review or a topical article and saves it as markdown
//! under the configured content directory.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::StrategyExecutor;
use crate::finance::custody::CustodyHandle;
use crate::llm::TextGenerator;
use crate::sanitize::truncate_chars;
use crate::types::{ExecutionResult, Opportunity, StrategyType};

const ARTICLE_MAX_TOKENS: u32 = 1500;
const GENERATION_COST: Decimal = dec!(0.10);

const SYSTEM_PROMPT: &str = "You are a skilled writer producing original, well-structured \
    markdown articles.";

pub struct ContentExecutor {
    generator: Arc<dyn TextGenerator>,
    output_dir: PathBuf,
}

impl ContentExecutor {
    pub fn new(generator: Arc<dyn TextGenerator>, output_dir: PathBuf) -> Self {
        Self {
            generator,
            output_dir,
        }
    }

    /// `(kind, topic, intent)` for the opportunity's payload.
    fn brief(opportunity: &Opportunity) -> (&str, String, &'static str) {
        match opportunity.payload_str("type").unwrap_or("affiliate") {
            "affiliate" => {
                let niche = opportunity.payload_str("niche").unwrap_or("technology");
                (
                    "affiliate",
                    format!("Best {niche} tools and services"),
                    "SEO review article with affiliate links",
                )
            }
            other => (
                other,
                opportunity
                    .payload_str("topic")
                    .unwrap_or("trending news")
                    .to_string(),
                "informative news-style article for display ad revenue",
            ),
        }
    }

    /// Where the article for `id` is saved. Characters outside
    /// `[A-Za-z0-9_-]` become `_`.
    pub fn article_path(&self, id: &str) -> PathBuf {
        let stem: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.output_dir.join(format!("{stem}.md"))
    }

    async fn save(&self, id: &str, article: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.article_path(id);
        tokio::fs::write(&path, article).await?;
        Ok(path)
    }
}

#[async_trait]
impl StrategyExecutor for ContentExecutor {
    fn strategy(&self) -> StrategyType {
        StrategyType::Content
    }

    fn min_capital(&self) -> Decimal {
        dec!(0.10)
    }

    async fn execute(
        &self,
        opportunity: &Opportunity,
        _custody: &dyn CustodyHandle,
    ) -> Result<ExecutionResult> {
        let (kind, topic, intent) = Self::brief(opportunity);
        let prompt = format!(
            "Write a high-quality {intent} about: {topic}\n\n\
             Requirements:\n\
             - 800-1200 words\n\
             - Markdown format with clear headings\n\
             - A compelling intro and an actionable conclusion"
        );

        let article = match self
            .generator
            .complete(SYSTEM_PROMPT, &prompt, ARTICLE_MAX_TOKENS)
            .await
        {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => return Ok(ExecutionResult::failure("Content generation failed: empty response")),
            Err(e) => {
                warn!(opportunity = %opportunity.id, error = %e, "Content generation failed");
                return Ok(ExecutionResult::failure(format!("Content generation failed: {e}")));
            }
        };

        let chars = article.chars().count();
        match self.save(&opportunity.id, &article).await {
            Ok(path) => info!(path = %path.display(), chars, "Content saved"),
            Err(e) => warn!(opportunity = %opportunity.id, error = %e, "Could not save content"),
        }

        let profit = (opportunity.expected_revenue - GENERATION_COST).max(Decimal::ZERO);
        Ok(ExecutionResult::success(
            profit,
            format!(
                "Generated {chars}-char {kind} article for: '{}'",
                truncate_chars(&opportunity.title, 60)
            ),
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
