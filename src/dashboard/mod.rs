//! Dashboard — Axum web server for monitoring and approvals.
//!
//! Serves a REST API and a self-contained HTML dashboard. The approval
//! endpoints are how an operator answers gated actions when the agent runs
//! without a terminal. They are same-origin only and, when an operator token
//! is configured, require it as a bearer token.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    response::Html,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::shutdown::Shutdown;
use routes::AppState;

pub use routes::DashboardState;

/// The embedded dashboard HTML (compiled into the binary).
const DASHBOARD_HTML: &str = include_str!("templates/index.html");

/// Bind `bind:port` and serve in a background task until shutdown.
pub async fn spawn_dashboard(state: AppState, bind: &str, port: u16, shutdown: Shutdown) -> Result<()> {
    if !is_loopback(bind) && state.operator_token.is_none() {
        warn!(bind, "Dashboard exposed beyond localhost without an operator token");
    }
    let app = build_router(state);
    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind((bind, port))
        .await
        .with_context(|| format!("Failed to bind dashboard on {addr}"))?;
    info!(%addr, "Dashboard server starting on http://{addr}");

    tokio::spawn(async move {
        let stop = async move { shutdown.triggered().await };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(stop).await {
            error!(error = %e, "Dashboard server error");
        }
    });

    Ok(())
}

fn is_loopback(bind: &str) -> bool {
    bind == "localhost"
        || bind
            .parse::<std::net::IpAddr>()
            .is_ok_and(|ip| ip.is_loopback())
}

/// Build the Axum router with all routes and middleware.
///
/// Only the read-only views carry CORS headers; the approval routes answer
/// same-origin requests only.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    let views = Router::new()
        .route("/api/status", get(routes::get_status))
        .route("/api/ledger", get(routes::get_ledger))
        .route("/api/episodes", get(routes::get_episodes))
        .route("/health", get(routes::health))
        .route("/", get(serve_dashboard))
        .layer(cors);

    let approvals = Router::new()
        .route("/api/approvals", get(routes::list_approvals))
        .route("/api/approvals/:token", post(routes::resolve_approval));

    views.merge(approvals).with_state(state)
}

/// Serve the embedded HTML dashboard.
async fn serve_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
