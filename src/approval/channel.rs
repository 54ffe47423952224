//! Approval channels.
//!
//! A channel is "somewhere a human can answer". The gate picks one per
//! request through a [`ChannelSelector`] and then only deals with the
//! [`ApprovalChannel`] trait, so timeout, audit and shutdown handling are
//! the same whichever channel answers.

use async_trait::async_trait;
use std::io::{IsTerminal, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::registry::PendingApprovals;
use super::ApprovalRequest;

/// What a channel reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelVerdict {
    Approved,
    Denied,
    /// The channel broke before anyone answered (EOF, dropped slot).
    Closed(String),
}

#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Wait for the human's answer. May wait forever; the gate bounds it.
    async fn await_verdict(&self, request: &ApprovalRequest) -> ChannelVerdict;

    /// The gate stopped waiting for `request` (timeout or shutdown).
    async fn abandon(&self, request: &ApprovalRequest);
}

/// Chooses a channel at request creation time.
pub trait ChannelSelector: Send + Sync {
    fn select(&self) -> Arc<dyn ApprovalChannel>;
}

// ---------------------------------------------------------------------------
// Terminal
// ---------------------------------------------------------------------------

/// Interactive prompt on the controlling terminal.
///
/// One background task owns stdin and forwards each line. A prompt takes the
/// next line after it is shown; answers typed while nothing was pending are
/// discarded, so a late reply can never settle a later request.
pub struct TerminalChannel {
    lines: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl TerminalChannel {
    /// Start the stdin reader. Must be called inside a runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("stdin closed, terminal approvals unavailable");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        break;
                    }
                }
            }
        });
        Self::from_lines(rx)
    }

    /// A channel answered from an arbitrary line source.
    pub fn from_lines(lines: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            lines: Mutex::new(lines),
        }
    }

    /// `y` or `yes`, case-insensitive, approves. Anything else denies.
    pub fn is_affirmative(answer: &str) -> bool {
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }

    fn render(request: &ApprovalRequest) -> String {
        let mut out = String::new();
        out.push_str("\n================ APPROVAL REQUIRED ================\n");
        out.push_str(&format!("  Action : {}\n", request.category));
        out.push_str(&format!("  Title  : {}\n", request.title));
        out.push_str(&format!("  Risk   : {}\n", request.risk.as_str().to_uppercase()));
        for (key, value) in &request.details {
            out.push_str(&format!("  {key:<7}: {value}\n"));
        }
        out.push_str("===================================================\n");
        out.push_str("Approve? [y/N] ");
        out
    }
}

#[async_trait]
impl ApprovalChannel for TerminalChannel {
    fn name(&self) -> &'static str {
        "terminal"
    }

    async fn await_verdict(&self, request: &ApprovalRequest) -> ChannelVerdict {
        let mut lines = self.lines.lock().await;
        let mut stale = 0usize;
        while lines.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "Discarded input typed outside a prompt");
        }

        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(Self::render(request).as_bytes());
        let _ = stdout.flush();

        match lines.recv().await {
            Some(line) if Self::is_affirmative(&line) => ChannelVerdict::Approved,
            Some(_) => ChannelVerdict::Denied,
            None => ChannelVerdict::Closed("stdin closed".to_string()),
        }
    }

    async fn abandon(&self, request: &ApprovalRequest) {
        println!("\n(approval for \"{}\" no longer pending)", request.title);
    }
}

// ---------------------------------------------------------------------------
// Remote
// ---------------------------------------------------------------------------

/// Resolution through the pending registry, answered over HTTP.
pub struct RemoteChannel {
    registry: Arc<PendingApprovals>,
}

impl RemoteChannel {
    pub fn new(registry: Arc<PendingApprovals>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ApprovalChannel for RemoteChannel {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn await_verdict(&self, request: &ApprovalRequest) -> ChannelVerdict {
        let rx = self.registry.register(request.clone()).await;
        debug!(token = %request.token, title = %request.title, "Awaiting remote approval");
        match rx.await {
            Ok(true) => ChannelVerdict::Approved,
            Ok(false) => ChannelVerdict::Denied,
            Err(_) => ChannelVerdict::Closed("approval slot dropped".to_string()),
        }
    }

    async fn abandon(&self, request: &ApprovalRequest) {
        if self.registry.remove(&request.token).await {
            debug!(token = %request.token, "Pending approval removed");
        }
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Terminal when stdin is a TTY, remote otherwise. Checked on every request.
pub struct AutoSelector {
    terminal: Option<Arc<dyn ApprovalChannel>>,
    remote: Arc<dyn ApprovalChannel>,
}

impl AutoSelector {
    /// The stdin reader is only started when stdin is a TTY at startup.
    pub fn new(registry: Arc<PendingApprovals>) -> Self {
        let terminal = std::io::stdin()
            .is_terminal()
            .then(|| Arc::new(TerminalChannel::spawn()) as Arc<dyn ApprovalChannel>);
        Self {
            terminal,
            remote: Arc::new(RemoteChannel::new(registry)),
        }
    }
}

impl ChannelSelector for AutoSelector {
    fn select(&self) -> Arc<dyn ApprovalChannel> {
        match &self.terminal {
            Some(terminal) if std::io::stdin().is_terminal() => terminal.clone(),
            _ => self.remote.clone(),
        }
    }
}

/// Always the same channel.
pub struct FixedSelector(pub Arc<dyn ApprovalChannel>);

impl ChannelSelector for FixedSelector {
    fn select(&self) -> Arc<dyn ApprovalChannel> {
        self.0.clone()
    }
}

impl FixedSelector {
    pub fn remote(registry: Arc<PendingApprovals>) -> Self {
        Self(Arc::new(RemoteChannel::new(registry)))
    }
}

/// Log a channel failure in one place.
pub(crate) fn log_closed(channel: &str, token: &str, cause: &str) {
    warn!(channel, token, cause, "Approval channel closed before a verdict");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActionCategory, RiskTier};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn make_request() -> ApprovalRequest {
        let mut details = BTreeMap::new();
        details.insert("amount".to_string(), json!("5"));
        ApprovalRequest::new(ActionCategory::StrategyExecution, "Execute trade", details, RiskTier::High)
    }

    #[test]
    fn test_affirmative_tokens() {
        assert!(TerminalChannel::is_affirmative("y\n"));
        assert!(TerminalChannel::is_affirmative(" YES "));
        assert!(!TerminalChannel::is_affirmative("yep"));
        assert!(!TerminalChannel::is_affirmative(""));
        assert!(!TerminalChannel::is_affirmative("n"));
    }

    #[test]
    fn test_render_includes_request() {
        let text = TerminalChannel::render(&make_request());
        assert!(text.contains("strategy_execution"));
        assert!(text.contains("Execute trade"));
        assert!(text.contains("HIGH"));
        assert!(text.contains("amount"));
        assert!(text.ends_with("Approve? [y/N] "));
    }

    #[tokio::test]
    async fn test_terminal_reads_next_line() {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(TerminalChannel::from_lines(rx));

        let waiter = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.await_verdict(&make_request()).await })
        };
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        tx.send("yes".to_string()).unwrap();
        assert_eq!(waiter.await.unwrap(), ChannelVerdict::Approved);

        tx.send("n".to_string()).unwrap();
        let waiter = tokio::spawn(async move { channel.await_verdict(&make_request()).await });
        // "n" was typed before the prompt and is discarded; EOF follows.
        drop(tx);
        assert!(matches!(waiter.await.unwrap(), ChannelVerdict::Closed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_answer_does_not_settle_next_prompt() {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = TerminalChannel::from_lines(rx);

        // First prompt is abandoned by the gate's timeout.
        let first = tokio::time::timeout(Duration::from_secs(300), channel.await_verdict(&make_request())).await;
        assert!(first.is_err());

        // The operator answers the stale prompt, then stdin closes.
        tx.send("y".to_string()).unwrap();
        drop(tx);
        assert_eq!(
            channel.await_verdict(&make_request()).await,
            ChannelVerdict::Closed("stdin closed".to_string())
        );
    }

    #[tokio::test]
    async fn test_remote_channel_resolves_through_registry() {
        let registry = Arc::new(PendingApprovals::new());
        let channel = Arc::new(RemoteChannel::new(registry.clone()));
        let req = make_request();
        let token = req.token.clone();

        let waiter = {
            let channel = channel.clone();
            let req = req.clone();
            tokio::spawn(async move { channel.await_verdict(&req).await })
        };

        while registry.is_empty().await {
            tokio::task::yield_now().await;
        }
        assert!(registry.resolve(&token, true).await);
        assert_eq!(waiter.await.unwrap(), ChannelVerdict::Approved);
    }

    #[tokio::test]
    async fn test_remote_abandon_removes_pending() {
        let registry = Arc::new(PendingApprovals::new());
        let channel = RemoteChannel::new(registry.clone());
        let req = make_request();
        let _rx = registry.register(req.clone()).await;

        channel.abandon(&req).await;
        assert!(registry.is_empty().await);
        assert!(!registry.resolve(&req.token, true).await);
    }

    #[test]
    fn test_fixed_selector() {
        let registry = Arc::new(PendingApprovals::new());
        let selector = FixedSelector::remote(registry);
        assert_eq!(selector.select().name(), "remote");
    }
}
