//! Process-wide shutdown signal.
//!
//! A `watch` channel carrying a single "stop" flag. The trigger side is held
//! by `main` (fed by ctrl-c); every long wait in the loop selects on
//! [`Shutdown::triggered`] so it can abort promptly.

use tokio::sync::watch;
use tracing::info;

/// Sending half. Dropping it without triggering never fires the signal.
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        if !*self.tx.borrow() {
            info!("Shutdown requested");
        }
        self.tx.send_replace(true);
    }
}

/// Receiving half, cheap to clone.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested. Pends forever if the
    /// trigger was dropped without firing.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Create a linked trigger/signal pair.
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}
