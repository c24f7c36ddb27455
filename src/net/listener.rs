//! Listener binding and per-connection serving.
//!
//! # Responsibilities
//! - Bind one socket per listen spec, tcp or unix
//! - Terminate mutual TLS and serve HTTP on every accepted connection
//! - Report accept-loop failures to the supervisor and clean up on close
//!
//! # Design Decisions
//! - Binding is separated from serving so the supervisor can fail startup
//!   before any accept loop runs
//! - A handshake failure drops one connection; an accept failure retires
//!   the whole listener
//! - Unix listeners carry the same TLS and HTTP stack as tcp ones, so one
//!   credential set governs every connection

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tower::ServiceBuilder;
use tower_http::map_request_body::MapRequestBodyLayer;
use url::Url;

use crate::lifecycle::ShutdownSignal;
use crate::server::ServerHandle;

/// Errors raised while binding or running a listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("unsupported listen scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid listen spec {url}: {reason}")]
    InvalidSpec { url: Url, reason: &'static str },

    #[error("bind {url}: {source}")]
    Bind { url: Url, source: io::Error },

    #[error("accept on {url}: {source}")]
    Accept { url: Url, source: io::Error },
}

#[derive(Debug)]
enum ListenSocket {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: PathBuf },
}

// Stale socket files otherwise outlive aborted serve tasks and listeners
// dropped on startup failure.
impl Drop for ListenSocket {
    fn drop(&mut self) {
        if let ListenSocket::Unix { path, .. } = self {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %err, "Socket file cleanup failed");
                }
            }
        }
    }
}

/// A socket bound to one listen spec, not yet serving.
#[derive(Debug)]
pub struct BoundListener {
    spec: Url,
    socket: ListenSocket,
}

impl BoundListener {
    /// Bind the socket named by `spec`. Stale unix socket files left by a
    /// previous run are removed before binding.
    pub async fn bind(spec: &Url) -> Result<Self, ListenerError> {
        let socket = match spec.scheme() {
            "tcp" => {
                let host = match spec.host_str() {
                    Some(host) if !host.is_empty() => host,
                    _ => "0.0.0.0",
                };
                let port = spec.port().ok_or_else(|| ListenerError::InvalidSpec {
                    url: spec.clone(),
                    reason: "tcp spec requires a port",
                })?;
                let listener = TcpListener::bind(format!("{host}:{port}"))
                    .await
                    .map_err(|source| ListenerError::Bind {
                        url: spec.clone(),
                        source,
                    })?;
                ListenSocket::Tcp(listener)
            }
            "unix" => {
                let path = PathBuf::from(spec.path());
                if path.as_os_str().is_empty() {
                    return Err(ListenerError::InvalidSpec {
                        url: spec.clone(),
                        reason: "unix spec requires a path",
                    });
                }
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(source) => {
                        return Err(ListenerError::Bind {
                            url: spec.clone(),
                            source,
                        })
                    }
                }
                let listener =
                    UnixListener::bind(&path).map_err(|source| ListenerError::Bind {
                        url: spec.clone(),
                        source,
                    })?;
                ListenSocket::Unix { listener, path }
            }
            other => return Err(ListenerError::UnsupportedScheme(other.to_string())),
        };

        tracing::info!(url = %spec, "Listener bound");
        Ok(Self {
            spec: spec.clone(),
            socket,
        })
    }

    pub fn spec(&self) -> &Url {
        &self.spec
    }

    /// Run the accept loop until cancellation or an accept failure.
    ///
    /// An accept failure is sent to `errors` and retires this listener;
    /// the caller decides whether that is fatal for the process.
    pub async fn serve(
        self,
        server: Arc<ServerHandle>,
        mut signal: ShutdownSignal,
        errors: mpsc::Sender<ListenerError>,
    ) {
        let acceptor = TlsAcceptor::from(server.tls_config());
        let BoundListener { spec, mut socket } = self;

        loop {
            tokio::select! {
                () = signal.cancelled() => {
                    tracing::info!(url = %spec, "Listener closed");
                    break;
                }
                accepted = accept(&mut socket) => match accepted {
                    Ok(stream) => {
                        metrics::counter!("proxy_connections_accepted_total").increment(1);
                        let acceptor = acceptor.clone();
                        let router = server.router();
                        let spec = spec.clone();
                        tokio::spawn(async move {
                            match stream {
                                AcceptedStream::Tcp(stream) => {
                                    serve_tls(stream, acceptor, router, &spec).await
                                }
                                AcceptedStream::Unix(stream) => {
                                    serve_tls(stream, acceptor, router, &spec).await
                                }
                            }
                        });
                    }
                    Err(source) => {
                        let err = ListenerError::Accept {
                            url: spec.clone(),
                            source,
                        };
                        tracing::error!(url = %spec, error = %err, "Listener failed");
                        // Supervisor may already have drained; the log above
                        // still records the failure.
                        let _ = errors.try_send(err);
                        break;
                    }
                },
            }
        }

        // Dropping the socket here removes any unix socket file.
    }
}

enum AcceptedStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

async fn accept(socket: &mut ListenSocket) -> io::Result<AcceptedStream> {
    match socket {
        ListenSocket::Tcp(listener) => {
            let (stream, _peer) = listener.accept().await?;
            Ok(AcceptedStream::Tcp(stream))
        }
        ListenSocket::Unix { listener, .. } => {
            let (stream, _peer) = listener.accept().await?;
            Ok(AcceptedStream::Unix(stream))
        }
    }
}

async fn serve_tls<IO>(stream: IO, acceptor: TlsAcceptor, router: Router, spec: &Url)
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let tls_stream = match acceptor.accept(stream).await {
        Ok(tls_stream) => tls_stream,
        Err(err) => {
            metrics::counter!("proxy_tls_handshake_failures_total").increment(1);
            tracing::warn!(url = %spec, error = %err, "TLS handshake failed");
            return;
        }
    };

    let service = hyper_service(router);
    if let Err(err) = auto::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(tls_stream), service)
        .await
    {
        tracing::debug!(url = %spec, error = %err, "Connection closed with error");
    }
}

fn hyper_service(
    router: Router,
) -> TowerToHyperService<
    tower_http::map_request_body::MapRequestBody<
        Router,
        fn(hyper::body::Incoming) -> axum::body::Body,
    >,
> {
    TowerToHyperService::new(
        ServiceBuilder::new()
            .layer(MapRequestBodyLayer::new(
                axum::body::Body::new as fn(hyper::body::Incoming) -> axum::body::Body,
            ))
            .service(router),
    )
}
