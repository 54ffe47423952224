//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.
//! The approval routes additionally check the operator token when one is
//! configured.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::approval::registry::PendingApprovals;
use crate::approval::ApprovalRequest;
use crate::engine::orchestrator::{LiveSnapshot, SharedSnapshot};
use crate::finance::ledger::{Ledger, LedgerEntry, LedgerTotals};
use crate::storage::history::HistoryRecorder;
use crate::types::Episode;

/// Default page size for list endpoints.
const DEFAULT_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub agent_name: String,
    pub live: SharedSnapshot,
    pub approvals: Arc<PendingApprovals>,
    pub ledger: Arc<dyn Ledger>,
    pub history: Arc<dyn HistoryRecorder>,
    /// Bearer token required by the approval routes. `None` leaves them open.
    pub operator_token: Option<SecretString>,
}

pub type AppState = Arc<DashboardState>;

type ApiError = (StatusCode, String);

fn internal(e: anyhow::Error) -> ApiError {
    warn!(error = %e, "Dashboard request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Check `Authorization: Bearer <token>` against the operator token.
fn authorize(state: &DashboardState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.operator_token.as_ref() else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(expected.expose_secret().as_str()) {
        Ok(())
    } else {
        warn!("Rejected approval request without a valid operator token");
        Err((StatusCode::UNAUTHORIZED, "operator token required".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub agent: String,
    #[serde(flatten)]
    pub snapshot: LiveSnapshot,
    pub pending_approvals: usize,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveBody {
    pub approved: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveResponse {
    pub token: String,
    pub approved: bool,
    pub resolved: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

impl ListParams {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerResponse {
    pub totals: LedgerTotals,
    pub entries: Vec<LedgerEntry>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.live.read().await.clone();
    let uptime = (chrono::Utc::now() - snapshot.started_at).num_seconds();
    Json(StatusResponse {
        agent: state.agent_name.clone(),
        pending_approvals: state.approvals.len().await,
        uptime_secs: uptime,
        snapshot,
    })
}

/// GET /api/approvals
pub async fn list_approvals(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ApprovalRequest>>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(state.approvals.list().await))
}

/// POST /api/approvals/:token
///
/// 200 when the token was pending and is now resolved, 404 otherwise,
/// 401 without the operator token.
pub async fn resolve_approval(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ResolveBody>,
) -> Result<(StatusCode, Json<ResolveResponse>), ApiError> {
    authorize(&state, &headers)?;
    let resolved = state.approvals.resolve(&token, body.approved).await;
    let status = if resolved {
        info!(token = %token, approved = body.approved, "Approval resolved over HTTP");
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Ok((
        status,
        Json(ResolveResponse {
            token,
            approved: body.approved,
            resolved,
        }),
    ))
}

/// GET /api/ledger
pub async fn get_ledger(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<LedgerResponse>, ApiError> {
    let totals = state.ledger.totals().await.map_err(internal)?;
    let entries = state.ledger.entries(params.limit()).await.map_err(internal)?;
    Ok(Json(LedgerResponse { totals, entries }))
}

/// GET /api/episodes
pub async fn get_episodes(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Episode>>, ApiError> {
    state
        .history
        .recent(params.limit())
        .await
        .map(Json)
        .map_err(internal)
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
