//! Persistence layer.
//!
//! The agent checkpoint is a small JSON file rewritten after every cycle so a
//! restart resumes the cycle counter. Episode history lives in [`history`].

pub mod history;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Default checkpoint path.
pub const DEFAULT_STATE_FILE: &str = "data/agent_state.json";

/// What survives a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCheckpoint {
    /// Last completed cycle.
    pub cycle: u64,
    pub last_balance: Decimal,
    pub cycles_completed: u64,
    pub started_at: DateTime<Utc>,
}

impl AgentCheckpoint {
    pub fn new(balance: Decimal) -> Self {
        Self {
            cycle: 0,
            last_balance: balance,
            cycles_completed: 0,
            started_at: Utc::now(),
        }
    }

    /// Cycle number to run next.
    pub fn next_cycle(&self) -> u64 {
        self.cycle + 1
    }
}

/// Save the checkpoint to a JSON file.
pub fn save_checkpoint(checkpoint: &AgentCheckpoint, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(checkpoint)
        .context("Failed to serialise agent checkpoint")?;

    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create checkpoint directory for {path}"))?;
    }
    std::fs::write(path, &json)
        .context(format!("Failed to write checkpoint to {path}"))?;

    debug!(path, cycle = checkpoint.cycle, balance = %checkpoint.last_balance, "Checkpoint saved");
    Ok(())
}

/// Load the checkpoint. `None` if the file doesn't exist (fresh start).
pub fn load_checkpoint(path: Option<&str>) -> Result<Option<AgentCheckpoint>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No checkpoint found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .context(format!("Failed to read checkpoint from {path}"))?;

    let checkpoint: AgentCheckpoint = serde_json::from_str(&json)
        .context(format!("Failed to parse checkpoint from {path}"))?;

    info!(
        path,
        cycle = checkpoint.cycle,
        cycles_completed = checkpoint.cycles_completed,
        balance = %checkpoint.last_balance,
        "Checkpoint loaded from disk"
    );

    Ok(Some(checkpoint))
}

/// Delete the checkpoint (for testing or reset).
pub fn delete_checkpoint(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path)
            .context(format!("Failed to delete checkpoint {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
