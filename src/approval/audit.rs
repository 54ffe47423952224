//! Append-only approval audit trail.
//!
//! One JSON object per line, written once per resolved request whatever the
//! channel or outcome. A failed write is logged and swallowed.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use super::ApprovalRequest;
use crate::types::{ActionCategory, RiskTier};

/// One audit line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: DateTime<Utc>,
    pub token: String,
    pub category: ActionCategory,
    pub title: String,
    pub risk: RiskTier,
    pub details: BTreeMap<String, serde_json::Value>,
    pub approved: bool,
    /// `approved`, `operator`, `timed_out`, `shutdown` or `channel_closed`.
    pub resolution: String,
}

impl AuditEntry {
    pub fn new(request: &ApprovalRequest, approved: bool, resolution: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            token: request.token.clone(),
            category: request.category,
            title: request.title.clone(),
            risk: request.risk,
            details: request.details.clone(),
            approved,
            resolution: resolution.into(),
        }
    }
}

/// JSONL audit file. `None` path disables writing (tests).
pub struct AuditLog {
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one entry. Failures are logged, never returned.
    pub async fn record(&self, entry: &AuditEntry) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = self.append(path, entry).await {
            warn!(path = %path.display(), token = %entry.token, error = %e, "Failed to write audit log");
        }
    }

    async fn append(&self, path: &Path, entry: &AuditEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry).context("Failed to serialize audit entry")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create audit directory: {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open audit log: {}", path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Read every entry back. Used by tests and tooling.
    pub async fn read_all(&self) -> Result<Vec<AuditEntry>> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read audit log: {}", path.display()))?;
        contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).context("Corrupt audit line"))
            .collect()
    }
}
