//! Human approval gate.
//!
//! Every real-world action passes through [`ApprovalGate::request_approval`]
//! before it happens. When gating is enabled the request goes to a channel
//! chosen at creation time (terminal prompt or the remote registry), the wait
//! is bounded, and the result is written to the audit trail before control
//! returns. A denial of any kind comes back as [`ApprovalDenied`].

pub mod audit;
pub mod channel;
pub mod registry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::shutdown::Shutdown;
use crate::types::{ActionCategory, RiskTier};
use audit::{AuditEntry, AuditLog};
use channel::{log_closed, ChannelSelector, ChannelVerdict};

/// Default bound on a single approval wait.
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A gated action awaiting sign-off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub token: String,
    pub category: ActionCategory,
    pub title: String,
    pub details: BTreeMap<String, serde_json::Value>,
    pub risk: RiskTier,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRequest {
    /// Create a request with a fresh unique token.
    pub fn new(
        category: ActionCategory,
        title: impl Into<String>,
        details: BTreeMap<String, serde_json::Value>,
        risk: RiskTier,
    ) -> Self {
        Self {
            token: uuid::Uuid::new_v4().to_string(),
            category,
            title: title.into(),
            details,
            risk,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Denial
// ---------------------------------------------------------------------------

/// Why an approval did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    Operator,
    TimedOut,
    Shutdown,
    ChannelClosed,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::Operator => "operator",
            DenialReason::TimedOut => "timed_out",
            DenialReason::Shutdown => "shutdown",
            DenialReason::ChannelClosed => "channel_closed",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::Operator => write!(f, "denied by operator"),
            DenialReason::TimedOut => write!(f, "approval timed out"),
            DenialReason::Shutdown => write!(f, "shutting down"),
            DenialReason::ChannelClosed => write!(f, "approval channel closed"),
        }
    }
}

/// Non-retryable denial. Distinct from transport or logic errors so callers
/// can recognise it (also through `anyhow::Error::downcast_ref`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Approval denied for '{title}': {reason}")]
pub struct ApprovalDenied {
    pub title: String,
    pub reason: DenialReason,
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

pub struct ApprovalGate {
    enabled: bool,
    timeout: Duration,
    selector: Arc<dyn ChannelSelector>,
    audit: AuditLog,
    shutdown: Shutdown,
}

impl ApprovalGate {
    pub fn new(
        enabled: bool,
        timeout: Duration,
        selector: Arc<dyn ChannelSelector>,
        audit: AuditLog,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            enabled,
            timeout,
            selector,
            audit,
            shutdown,
        }
    }

    /// A gate that approves everything without prompting or auditing.
    pub fn disabled() -> Self {
        Self::new(
            false,
            DEFAULT_APPROVAL_TIMEOUT,
            Arc::new(channel::FixedSelector::remote(Arc::new(registry::PendingApprovals::new()))),
            AuditLog::disabled(),
            Shutdown::never(),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ask for sign-off. `Ok(())` means go ahead.
    pub async fn request_approval(
        &self,
        category: ActionCategory,
        title: &str,
        details: BTreeMap<String, serde_json::Value>,
        risk: RiskTier,
    ) -> Result<(), ApprovalDenied> {
        if !self.enabled {
            return Ok(());
        }

        let request = ApprovalRequest::new(category, title, details, risk);
        let channel = self.selector.select();
        info!(
            token = %request.token,
            category = %request.category,
            title = %request.title,
            risk = %request.risk,
            channel = channel.name(),
            timeout_secs = self.timeout.as_secs(),
            "Approval requested"
        );

        let outcome = tokio::select! {
            waited = tokio::time::timeout(self.timeout, channel.await_verdict(&request)) => {
                match waited {
                    Ok(ChannelVerdict::Approved) => Ok(()),
                    Ok(ChannelVerdict::Denied) => Err(DenialReason::Operator),
                    Ok(ChannelVerdict::Closed(cause)) => {
                        log_closed(channel.name(), &request.token, &cause);
                        Err(DenialReason::ChannelClosed)
                    }
                    Err(_) => Err(DenialReason::TimedOut),
                }
            }
            _ = self.shutdown.triggered() => Err(DenialReason::Shutdown),
        };

        if matches!(outcome, Err(DenialReason::TimedOut | DenialReason::Shutdown)) {
            channel.abandon(&request).await;
        }

        let (approved, resolution) = match outcome {
            Ok(()) => (true, "approved"),
            Err(reason) => (false, reason.as_str()),
        };
        self.audit
            .record(&AuditEntry::new(&request, approved, resolution))
            .await;

        match outcome {
            Ok(()) => {
                info!(token = %request.token, title = %request.title, "Approval granted");
                Ok(())
            }
            Err(reason) => {
                warn!(token = %request.token, title = %request.title, %reason, "Approval denied");
                Err(ApprovalDenied {
                    title: request.title,
                    reason,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
