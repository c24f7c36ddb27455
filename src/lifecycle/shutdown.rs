//! Shutdown coordination for the proxy.

use std::sync::Arc;
use tokio::sync::watch;

/// Coordinator for process-wide shutdown.
///
/// Backed by a watch channel so cancellation is monotonic: once triggered it
/// stays triggered, and signals subscribed after the fact still observe it.
/// Only the lifecycle controller triggers; everything else holds a
/// [`ShutdownSignal`] observer.
#[derive(Clone, Debug)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger the shutdown signal. Idempotent: later triggers are no-ops.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer half of the shutdown signal, held by long-running tasks.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait until shutdown has been triggered.
    ///
    /// Resolves immediately when shutdown was triggered before the call.
    /// A dropped coordinator counts as cancellation.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }

    /// Whether shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}
