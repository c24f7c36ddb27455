//! Bootstrap sequencing and the single shutdown decision point.
//!
//! # Responsibilities
//! - Run the startup phases in order: validate, acquire identity, derive
//!   credentials, assemble the server, start listeners
//! - Hold the one place that reacts to fatal listener errors or signals
//! - Drain listeners before returning
//!
//! # Design Decisions
//! - Any startup-phase failure aborts the process; there is no partially
//!   started mode
//! - The controller is the only caller of `Shutdown::trigger` besides the
//!   signal handler, so cancellation has one authority

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::chain::{ChainOptions, DialOptions, PolicyAuthorizer, RegistryChain};
use crate::config::{Config, ConfigError};
use crate::credentials::{CredentialError, CredentialSet};
use crate::identity::{IdentityError, IdentitySource};
use crate::net::{publishable_url, ListenerError, ListenerSupervisor, SuperviseError};
use crate::server::ServerHandle;

use super::shutdown::Shutdown;

/// Errors that abort bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("credentials: {0}")]
    Credentials(#[from] CredentialError),

    #[error("listeners: {0}")]
    Listeners(#[from] SuperviseError),
}

/// Run the proxy until `shutdown` triggers or a listener dies.
///
/// Returns `Ok(())` after a clean drain; any startup failure returns the
/// error without serving.
pub async fn run(config: Config, shutdown: Shutdown) -> Result<(), BootstrapError> {
    let started = Instant::now();
    config.validate()?;
    tracing::info!(config = ?config, "Configuration loaded");

    let identity = IdentitySource::new(&config.identity_dir)
        .acquire(config.identity_acquire_timeout(), shutdown.subscribe())
        .await?;
    let credentials = CredentialSet::build(&identity, config.max_token_lifetime())?;

    let listen_url = publishable_url(&config.listen_on);
    tracing::info!(url = %listen_url, "Listening url");

    let mut server = ServerHandle::assemble(&credentials);
    let chain = RegistryChain::new(chain_options(&config, &credentials, listen_url));
    server.register(&chain);
    let server = Arc::new(server);

    // Capacity 1: only the first listener failure matters.
    let (fatal_tx, fatal_rx) = mpsc::channel(1);
    let supervisor = ListenerSupervisor::new(server);
    let listeners = supervisor
        .start_all(&config.listen_on, shutdown.subscribe(), fatal_tx)
        .await?;

    tracing::info!(
        listeners = listeners.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Startup completed"
    );

    await_shutdown_cause(fatal_rx, &shutdown).await;

    listeners.join().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Block until the first fatal listener error or external cancellation,
/// then make the single shutdown decision. Idempotent on re-trigger.
async fn await_shutdown_cause(mut fatal_rx: mpsc::Receiver<ListenerError>, shutdown: &Shutdown) {
    let mut signal = shutdown.subscribe();
    tokio::select! {
        fatal = fatal_rx.recv() => {
            if let Some(err) = fatal {
                tracing::error!(error = %err, "Listener failed, shutting down");
            }
        }
        () = signal.cancelled() => {}
    }
    shutdown.trigger();
}

fn chain_options(config: &Config, credentials: &CredentialSet, listen_on: url::Url) -> ChainOptions {
    let server_authorizer = Arc::new(PolicyAuthorizer::with_policies(
        config.registry_server_policies.iter().cloned(),
    ));
    let client_authorizer = Arc::new(PolicyAuthorizer::with_policies(
        config.registry_client_policies.iter().cloned(),
    ));
    ChainOptions {
        name: config.name.clone(),
        listen_on,
        registry_url: config.registry_url.clone(),
        registry_proxy_url: config.registry_proxy_url.clone(),
        map_ip_file_path: config.map_ip_file_path.clone(),
        dial_options: DialOptions {
            client_tls: credentials.client_tls.clone(),
            token_generator: credentials.token_generator.clone(),
        },
        authorize_nse_registry_server: server_authorizer.clone(),
        authorize_nse_registry_client: client_authorizer.clone(),
        authorize_ns_registry_server: server_authorizer,
        authorize_ns_registry_client: client_authorizer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::Parser;

    fn config_with_listen(listen: &str, identity_dir: &std::path::Path) -> Config {
        Config::try_parse_from([
            "mesh-proxy",
            "--listen-on",
            listen,
            "--identity-dir",
            &identity_dir.display().to_string(),
            "--identity-acquire-timeout-secs",
            "1",
        ])
        .expect("parse config")
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_config_before_identity() {
        let dir = tempfile::tempdir().expect("tempdir");
        // No identity material exists; validation must fail first.
        let config = config_with_listen("quic://0.0.0.0:5006", dir.path());
        let err = run(config, Shutdown::new()).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Config(_)));
    }

    #[tokio::test]
    async fn test_run_fails_without_identity_material() {
        crate::testutil::install_crypto();
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_with_listen("tcp://127.0.0.1:0", dir.path());
        let err = run(config, Shutdown::new()).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Identity(_)));
    }

    #[tokio::test]
    async fn test_fatal_listener_error_triggers_shutdown_once_and_drains() {
        let (credentials, shutdown, _dir) = crate::testutil::credentials().await;
        let server = Arc::new(ServerHandle::assemble(&credentials));

        let listen_on = vec![
            url::Url::parse("tcp://127.0.0.1:0").expect("url"),
            url::Url::parse("tcp://127.0.0.1:0").expect("url"),
        ];
        let (fatal_tx, fatal_rx) = mpsc::channel(1);
        let listeners = ListenerSupervisor::new(server)
            .start_all(&listen_on, shutdown.subscribe(), fatal_tx.clone())
            .await
            .expect("start");

        // One listener reports a fatal error while the other keeps serving.
        fatal_tx
            .try_send(ListenerError::UnsupportedScheme("quic".into()))
            .expect("send");
        await_shutdown_cause(fatal_rx, &shutdown).await;
        assert!(shutdown.is_triggered());

        // Re-trigger is a no-op and the survivor exits cooperatively.
        shutdown.trigger();
        tokio::time::timeout(std::time::Duration::from_secs(5), listeners.join())
            .await
            .expect("survivors drain");
    }

    #[tokio::test]
    async fn test_external_cancellation_resolves_shutdown_cause() {
        let shutdown = Shutdown::new();
        let (_fatal_tx, fatal_rx) = mpsc::channel::<ListenerError>(1);

        shutdown.trigger();
        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            await_shutdown_cause(fatal_rx, &shutdown),
        )
        .await
        .expect("resolves on cancellation");
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_chain_options_carry_config_values() {
        let (credentials, _shutdown, dir) = crate::testutil::credentials().await;
        let config = config_with_listen("tcp://127.0.0.1:5006", dir.path());
        let options = chain_options(
            &config,
            &credentials,
            url::Url::parse("tcp://10.0.0.5:5006").expect("url"),
        );
        assert_eq!(options.name, "mesh-proxy");
        assert_eq!(options.listen_on.as_str(), "tcp://10.0.0.5:5006");
    }
}
