//! Strategy executors and the registry the dispatcher looks them up in.
//!
//! Every executable [`StrategyType`] must have exactly one executor. The
//! registry is assembled once at start-up and [`RegistryBuilder::build`]
//! refuses to produce a registry with gaps.

pub mod arbitrage;
pub mod content;
pub mod freelance;
pub mod trade;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::finance::custody::CustodyHandle;
use crate::llm::TextGenerator;
use crate::types::{AgentError, ExecutionResult, Opportunity, StrategyType};

/// Something that can act on an opportunity.
///
/// Implementations hold only read-only configuration, so one instance may
/// run concurrently for different opportunities.
#[async_trait]
pub trait StrategyExecutor: Send + Sync {
    fn strategy(&self) -> StrategyType;

    /// Balance below which the dispatcher will not run this executor.
    fn min_capital(&self) -> Decimal;

    /// Whether running this executor has effects outside the process and so
    /// must clear the approval gate.
    fn affects_real_world(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        opportunity: &Opportunity,
        custody: &dyn CustodyHandle,
    ) -> Result<ExecutionResult>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct StrategyRegistry {
    executors: HashMap<StrategyType, Arc<dyn StrategyExecutor>>,
}

impl StrategyRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up an executor by identifier. Unknown identifiers return `None`.
    pub fn get(&self, id: &str) -> Option<Arc<dyn StrategyExecutor>> {
        let strategy = StrategyType::from_str(id).ok()?;
        self.executors.get(&strategy).cloned()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    executors: HashMap<StrategyType, Arc<dyn StrategyExecutor>>,
}

impl RegistryBuilder {
    /// Add an executor. A later registration for the same strategy replaces
    /// the earlier one.
    pub fn register(mut self, executor: Arc<dyn StrategyExecutor>) -> Self {
        self.executors.insert(executor.strategy(), executor);
        self
    }

    /// Finish, failing if any executable strategy has no executor.
    pub fn build(self) -> Result<StrategyRegistry, AgentError> {
        let missing: Vec<String> = StrategyType::ALL
            .iter()
            .filter(|s| !self.executors.contains_key(s))
            .map(|s| s.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(AgentError::MissingExecutors(missing));
        }

        info!(count = self.executors.len(), "Strategy registry built");
        Ok(StrategyRegistry {
            executors: self.executors,
        })
    }
}

/// The four standard executors, wired from configuration.
pub fn standard_registry(
    config: &AppConfig,
    generator: Arc<dyn TextGenerator>,
) -> Result<StrategyRegistry, AgentError> {
    StrategyRegistry::builder()
        .register(Arc::new(trade::TradeExecutor::new(config.custody.min_trade)))
        .register(Arc::new(freelance::FreelanceExecutor::new(generator.clone())))
        .register(Arc::new(arbitrage::ArbitrageExecutor::new()))
        .register(Arc::new(content::ContentExecutor::new(
            generator,
            PathBuf::from(&config.strategies.content_dir),
        )))
        .build()
}

/// Fail with [`AgentError::InvalidPayload`] for `opportunity`.
pub(crate) fn invalid_payload(opportunity: &Opportunity, message: impl Into<String>) -> anyhow::Error {
    AgentError::InvalidPayload {
        opportunity: opportunity.id.clone(),
        message: message.into(),
    }
    .into()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
