//! Process configuration.
//!
//! # Responsibilities
//! - Define every CLI flag and its `MESH_*` environment twin
//! - Validate the listen list before anything binds
//! - Convert second-granularity knobs into `Duration`s
//!
//! # Design Decisions
//! - Every option is both a flag and an environment variable, so container
//!   deployments and local runs share one surface
//! - Validation is separate from parsing: clap owns syntax, `validate`
//!   owns cross-field rules

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use url::Url;

/// Errors raised by cross-field configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("at least one listen spec is required")]
    NoListeners,

    #[error("unsupported listen scheme in {0}: only tcp and unix are served")]
    UnsupportedScheme(Url),

    #[error("tcp listen spec {0} is missing a port")]
    MissingPort(Url),

    #[error("unrecognized log level: {0}")]
    InvalidLogLevel(String),
}

#[derive(Debug, Clone, Parser)]
#[command(name = "mesh-proxy", about = "Interdomain registry proxy for the service mesh")]
pub struct Config {
    /// Display name of this proxy instance.
    #[arg(long, env = "MESH_NAME", default_value = "mesh-proxy")]
    pub name: String,

    /// Socket specs to listen on, comma-separated (tcp:// or unix://).
    #[arg(
        long,
        env = "MESH_LISTEN_ON",
        default_value = "unix:///listen.on.socket",
        value_delimiter = ','
    )]
    pub listen_on: Vec<Url>,

    /// Upper bound on issued bearer-token validity, in seconds.
    #[arg(long, env = "MESH_MAX_TOKEN_LIFETIME_SECS", default_value_t = 600)]
    pub max_token_lifetime_secs: u64,

    /// Policy sources for server-side registry authorization.
    #[arg(
        long,
        env = "MESH_REGISTRY_SERVER_POLICIES",
        default_value = "etc/mesh/policies/common/.*.rego,etc/mesh/policies/registry/.*.rego,etc/mesh/policies/server/.*.rego",
        value_delimiter = ','
    )]
    pub registry_server_policies: Vec<String>,

    /// Policy sources for client-side registry authorization.
    #[arg(
        long,
        env = "MESH_REGISTRY_CLIENT_POLICIES",
        default_value = "etc/mesh/policies/common/.*.rego,etc/mesh/policies/registry/.*.rego,etc/mesh/policies/client/.*.rego",
        value_delimiter = ','
    )]
    pub registry_client_policies: Vec<String>,

    /// File mapping internal to external IP addresses.
    #[arg(long, env = "MESH_MAP_IP_FILE_PATH", default_value = "map-ip.yaml")]
    pub map_ip_file_path: PathBuf,

    /// Registry handling local requests.
    #[arg(long, env = "MESH_REGISTRY_URL")]
    pub registry_url: Option<Url>,

    /// Registry proxy handling interdomain requests.
    #[arg(long, env = "MESH_REGISTRY_PROXY_URL")]
    pub registry_proxy_url: Option<Url>,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, env = "MESH_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Collector endpoint recorded for telemetry exporters.
    #[arg(
        long,
        env = "MESH_TELEMETRY_ENDPOINT",
        default_value = "otel-collector.observability.svc.cluster.local:4317"
    )]
    pub telemetry_endpoint: String,

    /// Directory the workload identity material is delivered into.
    #[arg(
        long,
        env = "MESH_IDENTITY_DIR",
        default_value = "/run/mesh-proxy/identity"
    )]
    pub identity_dir: PathBuf,

    /// How long startup waits for identity material, in seconds.
    #[arg(long, env = "MESH_IDENTITY_ACQUIRE_TIMEOUT_SECS", default_value_t = 15)]
    pub identity_acquire_timeout_secs: u64,
}

impl Config {
    /// Cross-field validation, run once before anything binds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_on.is_empty() {
            return Err(ConfigError::NoListeners);
        }
        for spec in &self.listen_on {
            match spec.scheme() {
                "tcp" => {
                    if spec.port().is_none() {
                        return Err(ConfigError::MissingPort(spec.clone()));
                    }
                }
                "unix" => {}
                _ => return Err(ConfigError::UnsupportedScheme(spec.clone())),
            }
        }
        let level = self.log_level.to_ascii_lowercase();
        if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }
        Ok(())
    }

    pub fn max_token_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_token_lifetime_secs)
    }

    pub fn identity_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.identity_acquire_timeout_secs)
    }
}
