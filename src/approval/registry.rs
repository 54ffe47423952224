//! Pending approval registry.
//!
//! The one piece of approval state shared between the cycle task (which
//! registers a request and waits) and the resolver surface (which lists and
//! resolves). Every map operation happens under the lock; waiting happens on
//! the returned receiver, outside it.

use std::collections::HashMap;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use super::ApprovalRequest;

struct Pending {
    request: ApprovalRequest,
    responder: oneshot::Sender<bool>,
}

/// Token-keyed map of requests awaiting an operator verdict.
#[derive(Default)]
pub struct PendingApprovals {
    pending: Mutex<HashMap<String, Pending>>,
}

impl PendingApprovals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a request and return the slot its verdict will arrive on.
    pub async fn register(&self, request: ApprovalRequest) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        let token = request.token.clone();
        self.pending.lock().await.insert(
            token.clone(),
            Pending {
                request,
                responder: tx,
            },
        );
        debug!(token = %token, "Approval registered");
        rx
    }

    /// Deliver a verdict. Returns `false` if the token is unknown or was
    /// already resolved; in that case nothing changes.
    pub async fn resolve(&self, token: &str, approved: bool) -> bool {
        let entry = self.pending.lock().await.remove(token);
        match entry {
            Some(pending) => {
                debug!(token, approved, "Approval resolved");
                // A dropped receiver means the waiter already gave up.
                pending.responder.send(approved).is_ok()
            }
            None => false,
        }
    }

    /// Drop a request without a verdict (timeout or shutdown).
    pub async fn remove(&self, token: &str) -> bool {
        self.pending.lock().await.remove(token).is_some()
    }

    /// Snapshot of everything still waiting, oldest first.
    pub async fn list(&self) -> Vec<ApprovalRequest> {
        let mut requests: Vec<ApprovalRequest> = self
            .pending
            .lock()
            .await
            .values()
            .map(|p| p.request.clone())
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        requests
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
