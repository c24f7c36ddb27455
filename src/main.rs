use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use mesh_proxy::lifecycle::{self, spawn_signal_handler};
use mesh_proxy::{Config, Shutdown};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::error!("Crypto provider already installed");
        std::process::exit(1);
    }

    let shutdown = Shutdown::new();
    match spawn_signal_handler(shutdown.clone()) {
        Ok(_handle) => {}
        Err(err) => {
            tracing::error!(error = %err, "Signal handler installation failed");
            std::process::exit(1);
        }
    }

    if let Err(err) = lifecycle::run(config, shutdown).await {
        tracing::error!(error = %err, "Proxy exited with error");
        std::process::exit(1);
    }
}
