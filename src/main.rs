//! AGORA — Autonomous economic agent
//!
//! Entry point. Loads configuration, initialises structured logging, wires
//! discovery, the decision oracle, the approval gate, custody, the ledger and
//! the strategy registry together, then runs the cycle loop with graceful
//! shutdown on Ctrl+C.

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use agora::approval::audit::AuditLog;
use agora::approval::channel::AutoSelector;
use agora::approval::registry::PendingApprovals;
use agora::approval::ApprovalGate;
use agora::config;
use agora::dashboard::{self, DashboardState};
use agora::engine::dispatcher::StrategyDispatcher;
use agora::engine::orchestrator::{Collaborators, CycleOrchestrator, CycleSettings, LiveSnapshot};
use agora::engine::scanner::OpportunityScanner;
use agora::finance::custody::{CustodyHandle, PaperCustody};
use agora::finance::ledger::{JsonlLedger, Ledger, ProfitRouting};
use agora::llm;
use agora::llm::decision::LlmDecisionOracle;
use agora::markets::affiliate::AffiliateSource;
use agora::markets::defillama::DefiLlamaSource;
use agora::markets::github::GitHubBountySource;
use agora::markets::price_gap::PriceGapSource;
use agora::markets::OpportunitySource;
use agora::shutdown;
use agora::storage::history::{HistoryRecorder, JsonlHistory};
use agora::strategies;

const BANNER: &str = r#"
    _    ____  ___  ____      _
   / \  / ___|/ _ \|  _ \    / \
  / _ \| |  _| | | | |_) |  / _ \
 / ___ \ |_| | |_| |  _ <  / ___ \
/_/   \_\____|\___/|_| \_\/_/   \_\

  Autonomous economic agent
  v0.1.0
"#;

/// Grace period for blocking work (the stdin reader) once the loop ends.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let result = runtime.block_on(run());
    // A pending stdin read never returns; don't wait on it forever.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    result
}

async fn run() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        scan_interval_secs = cfg.agent.scan_interval_secs,
        require_approval = cfg.approval.require_approval,
        paper_balance = %cfg.custody.paper_balance,
        asset = %cfg.custody.asset,
        "AGORA starting up"
    );

    // -- Shutdown --------------------------------------------------------

    let (trigger, stop) = shutdown::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received."),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
        trigger.trigger();
    });

    // -- Approval --------------------------------------------------------

    let approvals = Arc::new(PendingApprovals::new());
    let gate = Arc::new(ApprovalGate::new(
        cfg.approval.require_approval,
        Duration::from_secs(cfg.approval.timeout_secs),
        Arc::new(AutoSelector::new(approvals.clone())),
        AuditLog::new(&cfg.approval.audit_log),
        stop.clone(),
    ));
    if !gate.is_enabled() {
        warn!("Approval gate disabled: real-world actions will run unattended");
    }

    // -- Treasury --------------------------------------------------------

    let custody: Arc<dyn CustodyHandle> = Arc::new(PaperCustody::new(
        &cfg.custody.asset,
        cfg.custody.paper_balance,
        gate.clone(),
    ));
    let ledger: Arc<dyn Ledger> = Arc::new(JsonlLedger::new(&cfg.treasury.ledger_path));
    let history: Arc<dyn HistoryRecorder> = Arc::new(JsonlHistory::new(&cfg.treasury.history_path));
    let routing = ProfitRouting::new(
        cfg.treasury.profit_reinvest_pct,
        cfg.treasury.max_infra_spend_pct,
    );

    // -- Discovery -------------------------------------------------------

    let mut sources: Vec<Arc<dyn OpportunitySource>> = Vec::new();
    if cfg.sources.defillama.enabled {
        sources.push(Arc::new(DefiLlamaSource::new(cfg.sources.defillama.clone())?));
    }
    if cfg.sources.github.enabled {
        let token = cfg
            .sources
            .github
            .token_env
            .as_deref()
            .and_then(|name| config::AppConfig::resolve_env(name).ok())
            .map(SecretString::new);
        if token.is_none() {
            info!("No GitHub token configured, searching anonymously");
        }
        sources.push(Arc::new(GitHubBountySource::new(cfg.sources.github.clone(), token)?));
    }
    if cfg.sources.affiliate.enabled {
        sources.push(Arc::new(AffiliateSource::new()));
    }
    if cfg.sources.price_gap.enabled {
        sources.push(Arc::new(PriceGapSource::new(cfg.sources.price_gap.clone())?));
    }
    info!(sources = sources.len(), "Discovery sources ready");
    if sources.is_empty() {
        warn!("No discovery sources enabled: every cycle will idle");
    }
    let feed = Arc::new(OpportunityScanner::new(sources).with_focus(cfg.focus()));

    // -- Decision + strategies -------------------------------------------

    let generator = llm::build_generator(&cfg.llm)?;
    info!(model = generator.model_name(), "Text generator ready");
    let oracle = Arc::new(LlmDecisionOracle::new(generator.clone()));

    let registry = Arc::new(
        strategies::standard_registry(&cfg, generator).context("Failed to build strategy registry")?,
    );
    let dispatcher = StrategyDispatcher::new(registry, gate.clone(), ledger.clone(), custody.clone());

    // -- Orchestrator ----------------------------------------------------

    let live = Arc::new(RwLock::new(LiveSnapshot::default()));
    let orchestrator = CycleOrchestrator::new(
        Collaborators {
            custody,
            feed,
            oracle,
            dispatcher,
            history: history.clone(),
        },
        CycleSettings::from_config(&cfg),
        stop.clone(),
    )
    .with_snapshot(live.clone());

    // -- Dashboard -------------------------------------------------------

    if cfg.dashboard.enabled {
        let operator_token = cfg
            .dashboard
            .token_env
            .as_deref()
            .map(|name| config::AppConfig::resolve_env(name).map(SecretString::new))
            .transpose()
            .context("Dashboard operator token")?;
        let state = Arc::new(DashboardState {
            agent_name: cfg.agent.name.clone(),
            live,
            approvals,
            ledger: ledger.clone(),
            history,
            operator_token,
        });
        let served = dashboard::spawn_dashboard(
            state,
            &cfg.dashboard.bind,
            cfg.dashboard.port,
            stop.clone(),
        )
        .await;
        if let Err(e) = served {
            error!(error = %e, "Dashboard failed to start, continuing without it");
        }
    }

    // -- Main loop -------------------------------------------------------

    info!("Entering cycle loop. Press Ctrl+C to stop.");
    let state = orchestrator.initial_state();
    let final_state = orchestrator.run(state).await;

    match ledger.totals().await {
        Ok(totals) => {
            let profit = totals.pnl.max(rust_decimal::Decimal::ZERO);
            info!(
                cycle = final_state.cycle,
                cycles_completed = orchestrator.cycles_completed(),
                balance = %final_state.balance,
                income = %totals.income,
                expenses = %totals.expenses,
                pnl = %totals.pnl,
                reinvest = %routing.reinvest_amount(profit),
                reserve = %routing.reserve_amount(profit),
                infra_budget = %routing.max_infra_budget(final_state.balance),
                "AGORA shut down cleanly."
            );
        }
        Err(e) => {
            error!(error = %e, "Failed to read ledger totals");
            info!(cycle = final_state.cycle, "AGORA shut down.");
        }
    }

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agora=info"));

    let json_logging = std::env::var("AGORA_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
