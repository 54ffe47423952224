//! Cycle orchestrator.
//!
//! Drives the agent through
//! `CheckBalance → Scan → Rank → Decide → {Execute | IdleNoop} → RecordOutcome → IdleWait`
//! forever. Each stage reads the current [`CycleState`] and returns a
//! [`CycleUpdate`]; the orchestrator merges it and asks [`next_stage`] where
//! to go. Stages contain their own faults, so nothing here handles errors
//! beyond merging.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::dispatcher::{StrategyDispatcher, NO_STRATEGY_EXECUTED};
use super::ranker;
use crate::config::AppConfig;
use crate::finance::custody::CustodyHandle;
use crate::llm::decision::{self, DecisionOracle, DecisionRequest, WindowEntry};
use crate::markets::DiscoveryFeed;
use crate::sanitize::truncate_chars;
use crate::shutdown::Shutdown;
use crate::storage::history::HistoryRecorder;
use crate::storage::{self, AgentCheckpoint};
use crate::types::{CycleState, CycleUpdate, StrategyType};

/// Longest action summary written to history.
const MAX_ACTION_LEN: usize = 128;
/// History strategy when nothing executed.
const NO_STRATEGY: &str = "none";

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    CheckBalance,
    Scan,
    Rank,
    Decide,
    Execute,
    IdleNoop,
    RecordOutcome,
    IdleWait,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::CheckBalance => "check_balance",
            Stage::Scan => "scan",
            Stage::Rank => "rank",
            Stage::Decide => "decide",
            Stage::Execute => "execute",
            Stage::IdleNoop => "idle_noop",
            Stage::RecordOutcome => "record_outcome",
            Stage::IdleWait => "idle_wait",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where to go after `stage`, given the state with that stage's update
/// already merged.
pub fn next_stage(stage: Stage, state: &CycleState) -> Stage {
    match stage {
        Stage::CheckBalance => Stage::Scan,
        Stage::Scan => Stage::Rank,
        Stage::Rank => Stage::Decide,
        Stage::Decide if should_execute(state) => Stage::Execute,
        Stage::Decide => Stage::IdleNoop,
        Stage::Execute | Stage::IdleNoop => Stage::RecordOutcome,
        Stage::RecordOutcome => Stage::IdleWait,
        Stage::IdleWait => Stage::CheckBalance,
    }
}

/// An executable strategy was chosen and an opportunity resolved.
fn should_execute(state: &CycleState) -> bool {
    let executable = state
        .selected_strategy
        .as_deref()
        .is_some_and(|s| s.parse::<StrategyType>().is_ok());
    executable && state.selected_opportunity.is_some()
}

// ---------------------------------------------------------------------------
// Live snapshot
// ---------------------------------------------------------------------------

/// What the dashboard shows. Written by the cycle task only.
#[derive(Debug, Clone, Serialize)]
pub struct LiveSnapshot {
    pub cycle: u64,
    pub stage: Stage,
    pub balance: Decimal,
    pub selected_strategy: Option<String>,
    pub selected_opportunity: Option<String>,
    pub reasoning: String,
    pub last_action: String,
    pub errors: Vec<String>,
    pub window: Vec<WindowEntry>,
    pub cycles_completed: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for LiveSnapshot {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            cycle: 0,
            stage: Stage::CheckBalance,
            balance: Decimal::ZERO,
            selected_strategy: None,
            selected_opportunity: None,
            reasoning: String::new(),
            last_action: "starting up".to_string(),
            errors: Vec::new(),
            window: Vec::new(),
            cycles_completed: 0,
            started_at: now,
            updated_at: now,
        }
    }
}

pub type SharedSnapshot = Arc<RwLock<LiveSnapshot>>;

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Tunables for the loop.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    /// Idle sleep between cycles.
    pub interval: Duration,
    pub decision_window: usize,
    pub decision_timeout: Duration,
    /// Checkpoint file. `None` disables checkpointing.
    pub state_file: Option<String>,
}

impl CycleSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.agent.scan_interval_secs),
            decision_window: config.agent.decision_window,
            decision_timeout: Duration::from_secs(config.llm.decision_timeout_secs),
            state_file: Some(config.agent.state_file.clone()),
        }
    }
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            decision_window: decision::DECISION_WINDOW,
            decision_timeout: Duration::from_secs(60),
            state_file: None,
        }
    }
}

/// Everything the loop talks to.
pub struct Collaborators {
    pub custody: Arc<dyn CustodyHandle>,
    pub feed: Arc<dyn DiscoveryFeed>,
    pub oracle: Arc<dyn DecisionOracle>,
    pub dispatcher: StrategyDispatcher,
    pub history: Arc<dyn HistoryRecorder>,
}

pub struct CycleOrchestrator {
    deps: Collaborators,
    settings: CycleSettings,
    live: SharedSnapshot,
    shutdown: Shutdown,
    cycles_completed: AtomicU64,
    started_at: DateTime<Utc>,
}

impl CycleOrchestrator {
    pub fn new(deps: Collaborators, settings: CycleSettings, shutdown: Shutdown) -> Self {
        Self {
            deps,
            settings,
            live: Arc::new(RwLock::new(LiveSnapshot::default())),
            shutdown,
            cycles_completed: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    /// Publish progress into an externally owned snapshot.
    pub fn with_snapshot(mut self, live: SharedSnapshot) -> Self {
        self.live = live;
        self
    }

    pub fn snapshot(&self) -> SharedSnapshot {
        self.live.clone()
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    /// Starting state, resumed from the checkpoint when there is one.
    pub fn initial_state(&self) -> CycleState {
        let path = self.settings.state_file.as_deref();
        if path.is_none() {
            return CycleState::new(1);
        }
        match storage::load_checkpoint(path) {
            Ok(Some(checkpoint)) => {
                self.cycles_completed
                    .store(checkpoint.cycles_completed, Ordering::Relaxed);
                let mut state = CycleState::new(checkpoint.next_cycle());
                state.balance = checkpoint.last_balance;
                state
            }
            Ok(None) => CycleState::new(1),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable checkpoint");
                CycleState::new(1)
            }
        }
    }

    /// Run forever, or until shutdown. Returns the final state.
    ///
    /// Shutdown is honoured only at a cycle boundary: a cycle that has
    /// started always reaches `RecordOutcome`.
    pub async fn run(&self, mut state: CycleState) -> CycleState {
        info!(
            cycle = state.cycle,
            interval_secs = self.settings.interval.as_secs(),
            "Cycle loop starting"
        );
        let mut stage = Stage::CheckBalance;
        loop {
            if stage == Stage::CheckBalance && self.shutdown.is_triggered() {
                break;
            }
            stage = self.advance(stage, &mut state).await;
        }
        info!(cycle = state.cycle, stage = %stage, "Cycle loop stopped");
        state
    }

    /// Run one cycle from `CheckBalance` through `RecordOutcome`.
    pub async fn run_cycle(&self, state: &mut CycleState) {
        let mut stage = Stage::CheckBalance;
        while stage != Stage::IdleWait {
            stage = self.advance(stage, state).await;
        }
    }

    /// Run `stage`, merge its update, return the next stage.
    pub async fn advance(&self, stage: Stage, state: &mut CycleState) -> Stage {
        debug!(cycle = state.cycle, stage = %stage, "Stage start");
        self.live.write().await.stage = stage;

        let update = self.step(stage, state).await;
        state.apply(update);
        self.publish(state).await;

        let next = next_stage(stage, state);
        debug!(cycle = state.cycle, from = %stage, to = %next, "Stage transition");
        next
    }

    /// The work of one stage.
    pub async fn step(&self, stage: Stage, state: &CycleState) -> CycleUpdate {
        match stage {
            Stage::CheckBalance => self.check_balance().await,
            Stage::Scan => self.scan(state).await,
            Stage::Rank => Self::rank(state),
            Stage::Decide => self.decide(state).await,
            Stage::Execute => self.execute(state).await,
            Stage::IdleNoop => CycleUpdate::default().last_action(NO_STRATEGY_EXECUTED),
            Stage::RecordOutcome => self.record_outcome(state).await,
            Stage::IdleWait => self.idle_wait(state).await,
        }
    }

    async fn check_balance(&self) -> CycleUpdate {
        match self.deps.custody.balance().await {
            Ok(balance) => {
                debug!(%balance, asset = self.deps.custody.base_asset(), "Balance checked");
                CycleUpdate {
                    balance: Some(balance),
                    ..Default::default()
                }
                .trace(format!("balance: {balance}"))
            }
            Err(e) => {
                error!(error = %e, "Balance check failed, keeping last known balance");
                CycleUpdate::default().error(format!("balance check failed: {e}"))
            }
        }
    }

    async fn scan(&self, state: &CycleState) -> CycleUpdate {
        let found = self.deps.feed.scan_all(state.balance).await;
        info!(cycle = state.cycle, count = found.len(), "Opportunities discovered");
        let count = found.len();
        CycleUpdate {
            opportunities: Some(found),
            ..Default::default()
        }
        .trace(format!("scanned: {count} opportunities"))
    }

    fn rank(state: &CycleState) -> CycleUpdate {
        let affordable = ranker::filter_by_capital(state.opportunities.clone(), state.balance);
        let ranked = ranker::rank(affordable);
        let top = ranked
            .first()
            .map(|o| format!("top: {} ({:.2})", o.id, ranker::score(o)))
            .unwrap_or_else(|| "top: none".to_string());
        let line = format!("ranked: {} affordable, {top}", ranked.len());
        CycleUpdate {
            opportunities: Some(ranked),
            ..Default::default()
        }
        .trace(line)
    }

    async fn decide(&self, state: &CycleState) -> CycleUpdate {
        let n = self.settings.decision_window.min(state.opportunities.len());
        let window = &state.opportunities[..n];
        let request = DecisionRequest::new(state.cycle, state.balance, window, n);

        let outcome = decision::decide(
            self.deps.oracle.as_ref(),
            &request,
            self.settings.decision_timeout,
        )
        .await;
        let resolved = decision::resolve_opportunity(&outcome.decision, window).cloned();

        {
            let mut live = self.live.write().await;
            live.reasoning = outcome.decision.reasoning.clone();
            live.window = request.window.clone();
        }

        let mut update = CycleUpdate {
            selected_strategy: Some(Some(outcome.decision.strategy.as_str().to_string())),
            selected_opportunity: Some(resolved.clone()),
            ..Default::default()
        }
        .trace(format!(
            "decided: {} on {} ({})",
            outcome.decision.strategy,
            resolved.as_ref().map(|o| o.id.as_str()).unwrap_or("nothing"),
            truncate_chars(&outcome.decision.reasoning, 200)
        ));
        if let Some(cause) = outcome.fallback_cause {
            update = update.error(cause);
        }
        update
    }

    async fn execute(&self, state: &CycleState) -> CycleUpdate {
        let outcome = self
            .deps
            .dispatcher
            .dispatch(
                state.selected_strategy.as_deref(),
                state.selected_opportunity.as_ref(),
                state.balance,
            )
            .await;

        let executed = outcome
            .executed()
            .then(|| state.selected_strategy.clone())
            .flatten();
        CycleUpdate {
            executed_strategy: executed,
            errors: outcome.errors,
            ..Default::default()
        }
        .last_action(outcome.last_action)
    }

    async fn record_outcome(&self, state: &CycleState) -> CycleUpdate {
        let strategy = state.executed_strategy.as_deref().unwrap_or(NO_STRATEGY);
        let action = truncate_chars(&state.last_action, MAX_ACTION_LEN);
        let outcome = state.outcome();
        let details = if state.errors.is_empty() {
            state
                .selected_opportunity
                .as_ref()
                .map(|o| o.title.clone())
                .unwrap_or_default()
        } else {
            state.errors.join("; ")
        };

        self.deps
            .history
            .record_episode(state.cycle, strategy, &action, outcome, &details)
            .await;

        let completed = self.cycles_completed.fetch_add(1, Ordering::Relaxed) + 1;
        self.save_checkpoint(state, completed);

        info!(
            cycle = state.cycle,
            strategy,
            outcome,
            balance = %state.balance,
            errors = state.errors.len(),
            action = %action,
            "Cycle complete"
        );
        CycleUpdate::default().trace(format!("recorded: {outcome}"))
    }

    fn save_checkpoint(&self, state: &CycleState, cycles_completed: u64) {
        let Some(path) = self.settings.state_file.as_deref() else {
            return;
        };
        let checkpoint = AgentCheckpoint {
            cycle: state.cycle,
            last_balance: state.balance,
            cycles_completed,
            started_at: self.started_at,
        };
        if let Err(e) = storage::save_checkpoint(&checkpoint, Some(path)) {
            warn!(path, error = %e, "Failed to save checkpoint");
        }
    }

    async fn idle_wait(&self, state: &CycleState) -> CycleUpdate {
        debug!(
            cycle = state.cycle,
            secs = self.settings.interval.as_secs(),
            "Sleeping until next cycle"
        );
        tokio::select! {
            _ = tokio::time::sleep(self.settings.interval) => CycleUpdate {
                next_cycle: true,
                ..Default::default()
            },
            _ = self.shutdown.triggered() => {
                info!(cycle = state.cycle, "Idle wait interrupted by shutdown");
                CycleUpdate::default()
            }
        }
    }

    async fn publish(&self, state: &CycleState) {
        let mut live = self.live.write().await;
        live.cycle = state.cycle;
        live.balance = state.balance;
        live.selected_strategy = state.selected_strategy.clone();
        live.selected_opportunity = state.selected_opportunity.as_ref().map(|o| o.id.clone());
        live.last_action = state.last_action.clone();
        live.errors = state.errors.clone();
        live.cycles_completed = self.cycles_completed();
        live.started_at = self.started_at;
        live.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
