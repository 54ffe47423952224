//! Episode history: one line per cycle recording what was decided and how
//! it went.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::types::Episode;

#[async_trait]
pub trait HistoryRecorder: Send + Sync {
    /// Record one cycle. Never fails: write problems are logged.
    async fn record_episode(&self, cycle: u64, strategy: &str, action: &str, outcome: &str, details: &str);

    /// Newest `limit` episodes, oldest first.
    async fn recent(&self, limit: usize) -> Result<Vec<Episode>>;
}

/// History in a newline-delimited JSON file.
pub struct JsonlHistory {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, episode: &Episode) -> Result<()> {
        let mut line = serde_json::to_string(episode).context("Failed to serialize episode")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open history: {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryRecorder for JsonlHistory {
    async fn record_episode(&self, cycle: u64, strategy: &str, action: &str, outcome: &str, details: &str) {
        let episode = Episode {
            ts: Utc::now(),
            cycle,
            strategy: strategy.to_string(),
            action: action.to_string(),
            outcome: outcome.to_string(),
            details: details.to_string(),
        };
        match self.append(&episode).await {
            Ok(()) => debug!(cycle, strategy, outcome, "Episode recorded"),
            Err(e) => error!(cycle, path = %self.path.display(), error = %e, "Failed to record episode"),
        }
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Episode>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read history: {}", self.path.display()))?;
        let mut episodes: Vec<Episode> = contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        if episodes.len() > limit {
            episodes.drain(..episodes.len() - limit);
        }
        Ok(episodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("agora_history_test_{}.jsonl", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_record_and_recent() {
        let path = temp_path();
        let history = JsonlHistory::new(&path);
        for cycle in 1..=3 {
            history
                .record_episode(cycle, "trade", "trade: [OK]", "success", "")
                .await;
        }

        let recent = history.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].cycle, 2);
        assert_eq!(recent[1].cycle, 3);
        assert_eq!(recent[1].outcome, "success");

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_corrupt_lines_skipped() {
        let path = temp_path();
        let history = JsonlHistory::new(&path);
        history.record_episode(1, "none", "no strategy executed", "success", "").await;
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(f, "garbage").unwrap();
        }
        history.record_episode(2, "none", "no strategy executed", "failure", "").await;

        let recent = history.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_write_failure_does_not_raise() {
        let dir = std::env::temp_dir().join(format!("agora_history_dir_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let history = JsonlHistory::new(&dir);
        history.record_episode(1, "none", "x", "success", "").await;
        let _ = std::fs::remove_dir_all(&dir);
    }
}
