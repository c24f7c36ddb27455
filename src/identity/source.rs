//! Workload identity acquisition and background refresh.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::identity::document::{IdentityDocument, IdentityError};
use crate::lifecycle::ShutdownSignal;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Live view of the workload identity.
///
/// Every consumer reads the current document through the same handle; the
/// background refresh task is the only writer.
#[derive(Clone)]
pub struct IdentityHandle {
    inner: Arc<ArcSwap<IdentityDocument>>,
}

impl IdentityHandle {
    fn new(document: IdentityDocument) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(document)),
        }
    }

    /// The current identity document.
    pub fn document(&self) -> Arc<IdentityDocument> {
        self.inner.load_full()
    }

    fn replace(&self, document: IdentityDocument) {
        self.inner.store(Arc::new(document));
    }
}

impl fmt::Debug for IdentityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityHandle")
            .field("document", &self.document())
            .finish()
    }
}

/// The ambient workload-identity mechanism: an agent-managed directory of
/// PEM material (`tls.crt`, `tls.key`, `ca.crt`).
pub struct IdentitySource {
    dir: PathBuf,
}

impl IdentitySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Block until identity material is available, then start the background
    /// refresh task.
    ///
    /// Polls the identity directory until the material parses or the startup
    /// deadline passes; a missed deadline is fatal. Refresh failures after
    /// the first successful acquisition only log a warning — consumers keep
    /// the last good document.
    pub async fn acquire(
        &self,
        timeout: Duration,
        signal: ShutdownSignal,
    ) -> Result<IdentityHandle, IdentityError> {
        let deadline = Instant::now() + timeout;
        let document = loop {
            match IdentityDocument::load(&self.dir) {
                Ok(document) => break document,
                Err(err) => {
                    if Instant::now() >= deadline {
                        return Err(IdentityError::AcquireTimeout {
                            timeout,
                            source: Box::new(err),
                        });
                    }
                    tracing::debug!(error = %err, "Identity material not ready, retrying");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        };

        tracing::info!(
            identity = document.identity_uri.as_deref().unwrap_or("<none>"),
            not_after = ?document.not_after,
            "Workload identity acquired"
        );

        let handle = IdentityHandle::new(document);
        spawn_refresh(self.dir.clone(), handle.clone(), signal);
        Ok(handle)
    }
}

/// Watch the identity directory and swap refreshed documents into the handle.
fn spawn_refresh(dir: PathBuf, handle: IdentityHandle, mut signal: ShutdownSignal) {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                if event.kind.is_modify() || event.kind.is_create() {
                    let _ = tx.send(());
                }
            }
        },
        notify::Config::default().with_poll_interval(Duration::from_secs(2)),
    ) {
        Ok(watcher) => watcher,
        Err(err) => {
            tracing::warn!(error = %err, "Identity watcher unavailable, refresh disabled");
            return;
        }
    };

    if let Err(err) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
        tracing::warn!(error = %err, path = ?dir, "Identity watch failed, refresh disabled");
        return;
    }
    tracing::debug!(path = ?dir, "Identity refresh watcher started");

    tokio::spawn(async move {
        // Keep the watcher alive for the lifetime of the task.
        let _watcher = watcher;
        loop {
            tokio::select! {
                _ = signal.cancelled() => break,
                changed = rx.recv() => match changed {
                    Some(()) => match IdentityDocument::load(&dir) {
                        Ok(document) => {
                            tracing::info!(
                                identity = document.identity_uri.as_deref().unwrap_or("<none>"),
                                not_after = ?document.not_after,
                                "Identity document refreshed"
                            );
                            handle.replace(document);
                        }
                        Err(err) => tracing::warn!(
                            error = %err,
                            "Identity refresh failed, keeping current document"
                        ),
                    },
                    None => break,
                },
            }
        }
    });
}

impl fmt::Debug for IdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentitySource")
            .field("dir", &self.dir)
            .finish()
    }
}
