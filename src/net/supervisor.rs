//! Listener fleet supervision.
//!
//! # Responsibilities
//! - Bind every configured listen spec before any accept loop starts
//! - Fail startup when any bind fails or any listener dies during startup
//! - Fan listener failures into one fatal channel after startup
//!
//! # Design Decisions
//! - All-or-nothing startup: a partially listening proxy is treated as
//!   broken, never as degraded
//! - The supervisor only reports; shutdown is triggered by the lifecycle
//!   controller, keeping a single cancellation authority

use std::sync::Arc;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::lifecycle::ShutdownSignal;
use crate::server::ServerHandle;

use super::listener::{BoundListener, ListenerError};

/// Errors that abort listener startup.
#[derive(Debug, Error)]
pub enum SuperviseError {
    #[error("listener startup: {0}")]
    Startup(#[from] ListenerError),
}

/// Handles to the running accept loops.
pub struct ListenerSet {
    tasks: Vec<JoinHandle<()>>,
}

impl ListenerSet {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every accept loop to finish draining.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    tracing::warn!(error = %err, "Listener task panicked");
                }
            }
        }
    }
}

/// Binds and watches the whole listener fleet for one server.
pub struct ListenerSupervisor {
    server: Arc<ServerHandle>,
}

impl ListenerSupervisor {
    pub fn new(server: Arc<ServerHandle>) -> Self {
        Self { server }
    }

    /// Bind and start serving every listen spec.
    ///
    /// Returns once every listener is accepting. Failures after that point
    /// arrive on `fatal_tx`; the first one retires the fleet's claim to
    /// health and the lifecycle controller decides what to do with it.
    pub async fn start_all(
        &self,
        listen_on: &[Url],
        signal: ShutdownSignal,
        fatal_tx: mpsc::Sender<ListenerError>,
    ) -> Result<ListenerSet, SuperviseError> {
        let bound = bind_all(listen_on).await?;

        let mut tasks = Vec::with_capacity(bound.len());
        let mut receivers = Vec::with_capacity(bound.len());
        for listener in bound {
            let (errors_tx, errors_rx) = mpsc::channel(1);
            let server = self.server.clone();
            let signal = signal.clone();
            tasks.push(tokio::spawn(listener.serve(server, signal, errors_tx)));
            receivers.push(errors_rx);
            metrics::counter!("proxy_listeners_started_total").increment(1);
        }

        // A listener can die between spawn and here; surface that as a
        // startup failure rather than a post-startup fatal.
        for errors_rx in &mut receivers {
            if let Ok(err) = errors_rx.try_recv() {
                for task in &tasks {
                    task.abort();
                }
                return Err(SuperviseError::Startup(err));
            }
        }

        watch_errors(receivers, fatal_tx);
        Ok(ListenerSet { tasks })
    }
}

/// Bind every spec, attempting all of them so startup logs name every
/// misconfigured listener, then fail on the first error.
async fn bind_all(listen_on: &[Url]) -> Result<Vec<BoundListener>, SuperviseError> {
    let mut bound = Vec::with_capacity(listen_on.len());
    let mut first_failure = None;
    for spec in listen_on {
        match BoundListener::bind(spec).await {
            Ok(listener) => bound.push(listener),
            Err(err) => {
                metrics::counter!("proxy_listener_bind_failures_total").increment(1);
                tracing::error!(url = %spec, error = %err, "Listener bind failed");
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
            }
        }
    }
    match first_failure {
        Some(err) => Err(SuperviseError::Startup(err)),
        None => Ok(bound),
    }
}

/// Fan per-listener error channels into the single fatal channel. Only the
/// first failure matters; later ones are a consequence of shutdown.
fn watch_errors(
    receivers: Vec<mpsc::Receiver<ListenerError>>,
    fatal_tx: mpsc::Sender<ListenerError>,
) {
    tokio::spawn(async move {
        let mut pending: FuturesUnordered<_> = receivers
            .into_iter()
            .map(|mut errors_rx| async move { errors_rx.recv().await })
            .collect();
        while let Some(received) = pending.next().await {
            if let Some(err) = received {
                metrics::counter!("proxy_listener_failures_total").increment(1);
                let _ = fatal_tx.try_send(err);
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::server::ServerHandle;

    async fn server_handle() -> (Arc<ServerHandle>, crate::lifecycle::Shutdown, tempfile::TempDir)
    {
        let (credentials, shutdown, dir) = crate::testutil::credentials().await;
        let server = Arc::new(ServerHandle::assemble(&credentials));
        (server, shutdown, dir)
    }

    #[tokio::test]
    async fn test_bind_all_attempts_every_spec() {
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = occupied.local_addr().expect("addr").port();

        let listen_on = vec![
            Url::parse(&format!("tcp://127.0.0.1:{port}")).unwrap(),
            Url::parse("tcp://127.0.0.1:0").unwrap(),
            Url::parse("bogus://nowhere").unwrap(),
        ];
        let err = bind_all(&listen_on).await.unwrap_err();
        // First failure wins even though the later spec is also bad.
        assert!(matches!(
            err,
            SuperviseError::Startup(ListenerError::Bind { .. })
        ));
    }

    #[tokio::test]
    async fn test_bind_all_keeps_attempting_after_a_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket_path = dir.path().join("late.socket");
        std::fs::write(&socket_path, b"stale").expect("stale file");
        let listen_on = vec![
            Url::parse("bogus://nowhere").unwrap(),
            Url::parse(&format!("unix://{}", socket_path.display())).unwrap(),
        ];

        let err = bind_all(&listen_on).await.unwrap_err();
        assert!(matches!(
            err,
            SuperviseError::Startup(ListenerError::UnsupportedScheme(_))
        ));
        // The later spec was still attempted: its bind consumed the stale
        // file, and the dropped listener removed its own socket file.
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_start_all_fails_when_any_bind_fails() {
        let (server, shutdown, _dir) = server_handle().await;
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = occupied.local_addr().expect("addr").port();

        let listen_on = vec![
            Url::parse("tcp://127.0.0.1:0").unwrap(),
            Url::parse(&format!("tcp://127.0.0.1:{port}")).unwrap(),
        ];
        let (fatal_tx, _fatal_rx) = mpsc::channel(1);
        let supervisor = ListenerSupervisor::new(server);
        let result = supervisor
            .start_all(&listen_on, shutdown.subscribe(), fatal_tx)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_all_runs_every_listener() {
        let (server, shutdown, _dir) = server_handle().await;
        let listen_on = vec![
            Url::parse("tcp://127.0.0.1:0").unwrap(),
            Url::parse("tcp://127.0.0.1:0").unwrap(),
        ];
        let (fatal_tx, _fatal_rx) = mpsc::channel(1);
        let supervisor = ListenerSupervisor::new(server);
        let listeners = supervisor
            .start_all(&listen_on, shutdown.subscribe(), fatal_tx)
            .await
            .expect("start");
        assert_eq!(listeners.len(), 2);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), listeners.join())
            .await
            .expect("listeners drain");
    }

    #[tokio::test]
    async fn test_watch_errors_forwards_exactly_one_failure() {
        let (first_tx, first_rx) = mpsc::channel(1);
        let (second_tx, second_rx) = mpsc::channel(1);
        let (fatal_tx, mut fatal_rx) = mpsc::channel(1);
        watch_errors(vec![first_rx, second_rx], fatal_tx);

        first_tx
            .try_send(ListenerError::UnsupportedScheme("quic".into()))
            .expect("send");
        second_tx
            .try_send(ListenerError::UnsupportedScheme("sctp".into()))
            .expect("send");

        let forwarded = tokio::time::timeout(Duration::from_secs(5), fatal_rx.recv())
            .await
            .expect("timely")
            .expect("forwarded");
        assert!(matches!(forwarded, ListenerError::UnsupportedScheme(_)));

        // The watcher stops at the first failure; the second never lands.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fatal_rx.try_recv().is_err());
    }
}
