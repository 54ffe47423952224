//! In-memory collaborators for integration testing.
//!
//! Deterministic stand-ins for the discovery feed, the decision oracle, the
//! executors, the ledger and the history recorder. All state is in-memory
//! and inspectable from test code.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agora::approval::ApprovalGate;
use agora::engine::dispatcher::StrategyDispatcher;
use agora::engine::orchestrator::{Collaborators, CycleOrchestrator, CycleSettings};
use agora::finance::custody::{CustodyHandle, PaperCustody};
use agora::finance::ledger::{Direction, Ledger, LedgerEntry, LedgerTotals};
use agora::llm::decision::{DecisionOracle, DecisionRequest};
use agora::markets::DiscoveryFeed;
use agora::shutdown::Shutdown;
use agora::storage::history::HistoryRecorder;
use agora::strategies::{StrategyExecutor, StrategyRegistry};
use agora::types::{Episode, ExecutionResult, Opportunity, StrategyType};

/// Build an opportunity with explicit economics.
pub fn opportunity(
    id: &str,
    strategy_type: StrategyType,
    revenue: Decimal,
    cost: Decimal,
    effort: f64,
    risk: f64,
) -> Opportunity {
    Opportunity {
        id: id.to_string(),
        strategy_type,
        title: format!("Mock {strategy_type} {id}"),
        description: format!("Mock opportunity {id}"),
        expected_revenue: revenue,
        estimated_cost: cost,
        effort_score: effort,
        risk_score: risk,
        payload: BTreeMap::new(),
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Returns the same opportunities every cycle, unfiltered.
pub struct MockFeed {
    opportunities: Vec<Opportunity>,
}

impl MockFeed {
    pub fn new(opportunities: Vec<Opportunity>) -> Self {
        Self { opportunities }
    }
}

#[async_trait]
impl DiscoveryFeed for MockFeed {
    async fn scan_all(&self, _available: Decimal) -> Vec<Opportunity> {
        self.opportunities.clone()
    }
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

/// Replies with fixed text and remembers what it was shown.
pub struct MockOracle {
    reply: String,
    seen: Mutex<Vec<DecisionRequest>>,
}

impl MockOracle {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Opportunity ids in each window the oracle was consulted with.
    pub fn windows(&self) -> Vec<Vec<String>> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.window.iter().map(|w| w.id.clone()).collect())
            .collect()
    }

    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionOracle for MockOracle {
    async fn consult(&self, request: &DecisionRequest) -> Result<String> {
        self.seen.lock().unwrap().push(request.clone());
        Ok(self.reply.clone())
    }
}

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

/// Executor with a fixed result that counts its calls.
pub struct MockExecutor {
    strategy: StrategyType,
    profit: Decimal,
    fail_with: Option<String>,
    calls: AtomicUsize,
}

impl MockExecutor {
    pub fn paying(strategy: StrategyType, profit: Decimal) -> Self {
        Self {
            strategy,
            profit,
            fail_with: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn erroring(strategy: StrategyType, message: &str) -> Self {
        Self {
            strategy,
            profit: Decimal::ZERO,
            fail_with: Some(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StrategyExecutor for MockExecutor {
    fn strategy(&self) -> StrategyType {
        self.strategy
    }

    fn min_capital(&self) -> Decimal {
        Decimal::ZERO
    }

    async fn execute(
        &self,
        opportunity: &Opportunity,
        _custody: &dyn CustodyHandle,
    ) -> Result<ExecutionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            bail!("{message}");
        }
        Ok(ExecutionResult::success(
            self.profit,
            format!("mock {} on {}", self.strategy, opportunity.id),
        ))
    }
}

/// A registry where every strategy is a paying mock. The returned map gives
/// access to each executor for call counting.
pub fn paying_registry(
    profit: Decimal,
) -> (StrategyRegistry, BTreeMap<&'static str, Arc<MockExecutor>>) {
    let mut executors = BTreeMap::new();
    let mut builder = StrategyRegistry::builder();
    for strategy in StrategyType::ALL {
        let exec = Arc::new(MockExecutor::paying(*strategy, profit));
        executors.insert(strategy.as_str(), exec.clone());
        builder = builder.register(exec);
    }
    (builder.build().unwrap(), executors)
}

// ---------------------------------------------------------------------------
// Ledger + history
// ---------------------------------------------------------------------------

/// In-memory ledger.
#[derive(Default)]
pub struct RecordingLedger {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl RecordingLedger {
    fn push(&self, category: &str, amount: Decimal, details: &str, strategy: &str, direction: Direction) {
        self.entries.lock().unwrap().push(LedgerEntry {
            ts: Utc::now(),
            category: category.to_string(),
            amount,
            direction,
            strategy: strategy.to_string(),
            details: details.to_string(),
        });
    }

    pub fn snapshot(&self) -> Vec<LedgerEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Ledger for RecordingLedger {
    async fn record_credit(&self, category: &str, amount: Decimal, details: &str, strategy: &str) -> Result<()> {
        self.push(category, amount, details, strategy, Direction::Credit);
        Ok(())
    }

    async fn record_debit(&self, category: &str, amount: Decimal, details: &str, strategy: &str) -> Result<()> {
        self.push(category, amount, details, strategy, Direction::Debit);
        Ok(())
    }

    async fn entries(&self, limit: usize) -> Result<Vec<LedgerEntry>> {
        let all = self.snapshot();
        let skip = if limit == 0 { 0 } else { all.len().saturating_sub(limit) };
        Ok(all.into_iter().skip(skip).collect())
    }

    async fn totals(&self) -> Result<LedgerTotals> {
        Ok(LedgerTotals::from_entries(&self.snapshot()))
    }
}

/// In-memory history.
#[derive(Default)]
pub struct RecordingHistory {
    episodes: Mutex<Vec<Episode>>,
}

impl RecordingHistory {
    pub fn snapshot(&self) -> Vec<Episode> {
        self.episodes.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistoryRecorder for RecordingHistory {
    async fn record_episode(&self, cycle: u64, strategy: &str, action: &str, outcome: &str, details: &str) {
        self.episodes.lock().unwrap().push(Episode {
            ts: Utc::now(),
            cycle,
            strategy: strategy.to_string(),
            action: action.to_string(),
            outcome: outcome.to_string(),
            details: details.to_string(),
        });
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Episode>> {
        let all = self.snapshot();
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).collect())
    }
}

// ---------------------------------------------------------------------------
// Agent assembly
// ---------------------------------------------------------------------------

/// A fully wired orchestrator over mock collaborators.
pub struct MockAgent {
    pub orchestrator: Arc<CycleOrchestrator>,
    pub oracle: Arc<MockOracle>,
    pub custody: Arc<PaperCustody>,
}

pub struct AgentParts {
    pub balance: Decimal,
    pub opportunities: Vec<Opportunity>,
    pub oracle_reply: String,
    pub registry: StrategyRegistry,
    pub gate: Arc<ApprovalGate>,
    pub ledger: Arc<dyn Ledger>,
    pub history: Arc<dyn HistoryRecorder>,
    pub shutdown: Shutdown,
}

impl AgentParts {
    /// Approval disabled, every strategy pays `profit`, in-memory sinks.
    pub fn new(
        balance: Decimal,
        opportunities: Vec<Opportunity>,
        oracle_reply: &str,
        ledger: Arc<dyn Ledger>,
        history: Arc<dyn HistoryRecorder>,
        registry: StrategyRegistry,
    ) -> Self {
        Self {
            balance,
            opportunities,
            oracle_reply: oracle_reply.to_string(),
            registry,
            gate: Arc::new(ApprovalGate::disabled()),
            ledger,
            history,
            shutdown: Shutdown::never(),
        }
    }

    pub fn with_gate(mut self, gate: Arc<ApprovalGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn build(self) -> MockAgent {
        let custody = Arc::new(PaperCustody::new("USDC", self.balance, self.gate.clone()));
        let oracle = Arc::new(MockOracle::new(&self.oracle_reply));
        let dispatcher = StrategyDispatcher::new(
            Arc::new(self.registry),
            self.gate,
            self.ledger,
            custody.clone(),
        );
        let orchestrator = CycleOrchestrator::new(
            Collaborators {
                custody: custody.clone(),
                feed: Arc::new(MockFeed::new(self.opportunities)),
                oracle: oracle.clone(),
                dispatcher,
                history: self.history,
            },
            CycleSettings {
                interval: Duration::from_secs(60),
                ..Default::default()
            },
            self.shutdown,
        );
        MockAgent {
            orchestrator: Arc::new(orchestrator),
            oracle,
            custody,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_mock_oracle_records_windows() {
        let oracle = MockOracle::new(r#"{"strategy":"wait","reasoning":"-"}"#);
        let opps = vec![opportunity("a", StrategyType::Trade, dec!(3), dec!(1), 1.0, 1.0)];
        let request = DecisionRequest::new(1, dec!(10), &opps, 5);

        let reply = oracle.consult(&request).await.unwrap();
        assert!(reply.contains("wait"));
        assert_eq!(oracle.windows(), vec![vec!["a".to_string()]]);
    }

    #[tokio::test]
    async fn test_recording_ledger_totals() {
        let ledger = RecordingLedger::default();
        ledger.record_credit("income:trade", dec!(5), "x", "trade").await.unwrap();
        ledger.record_debit("expense:gas", dec!(1.5), "y", "trade").await.unwrap();

        let totals = ledger.totals().await.unwrap();
        assert_eq!(totals.income, dec!(5));
        assert_eq!(totals.expenses, dec!(1.5));
        assert_eq!(totals.pnl, dec!(3.5));
        assert_eq!(ledger.entries(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_erroring_executor_counts_calls() {
        let exec = MockExecutor::erroring(StrategyType::Content, "boom");
        let custody = PaperCustody::new("USDC", dec!(10), Arc::new(ApprovalGate::disabled()));
        let opp = opportunity("c", StrategyType::Content, dec!(1), dec!(0), 1.0, 1.0);

        assert!(exec.execute(&opp, &custody).await.is_err());
        assert_eq!(exec.calls(), 1);
    }
}
