//! External service-chain boundary.
//!
//! # Responsibilities
//! - Define the registration surface the external chain installs onto
//! - Carry the full construction option set as an explicit struct
//! - Hold the four authorization collaborator handles
//!
//! # Design Decisions
//! - Options are an enumerated struct, not variadic builders
//! - Authorization decisions belong to the policy engine; this core only
//!   supplies the configured collaborator handles

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::Router;
use url::Url;

use crate::credentials::TokenGenerator;

/// Outcome of a registry authorization decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// A registry operation up for authorization.
#[derive(Debug, Clone)]
pub struct RegistryRequest<'a> {
    pub operation: &'a str,
    pub peer_identity: Option<&'a str>,
}

/// Capability of the external policy collaborators: decide allow or deny
/// for one registry operation.
pub trait RegistryAuthorizer: Send + Sync + fmt::Debug {
    fn authorize(&self, request: &RegistryRequest<'_>) -> Decision;
}

/// Policy-file-backed authorizer handle.
///
/// Evaluation semantics live in the external policy engine; this core only
/// carries the configured policy sources and admits until one is plugged in
/// (transport trust has already vetted the peer).
#[derive(Debug, Clone)]
pub struct PolicyAuthorizer {
    policies: Vec<String>,
}

impl PolicyAuthorizer {
    pub fn with_policies(policies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            policies: policies.into_iter().map(Into::into).collect(),
        }
    }

    /// Configured policy file and directory sources.
    pub fn policies(&self) -> &[String] {
        &self.policies
    }
}

impl RegistryAuthorizer for PolicyAuthorizer {
    fn authorize(&self, _request: &RegistryRequest<'_>) -> Decision {
        Decision::Allow
    }
}

/// Client-side options the chain uses for outgoing registry calls.
///
/// Every outgoing call must attach a token minted by the generator at call
/// time — identity material rotates, so cached tokens go stale.
#[derive(Clone, Debug)]
pub struct DialOptions {
    pub client_tls: Arc<rustls::ClientConfig>,
    pub token_generator: TokenGenerator,
}

/// Construction options for the external registry-proxy chain.
pub struct ChainOptions {
    /// Display name of this proxy instance.
    pub name: String,
    /// The publishable address advertised to other mesh participants.
    pub listen_on: Url,
    /// Registry for local requests.
    pub registry_url: Option<Url>,
    /// Registry proxy for interdomain requests.
    pub registry_proxy_url: Option<Url>,
    /// File mapping internal to external IP addresses.
    pub map_ip_file_path: PathBuf,
    pub dial_options: DialOptions,
    pub authorize_nse_registry_server: Arc<dyn RegistryAuthorizer>,
    pub authorize_nse_registry_client: Arc<dyn RegistryAuthorizer>,
    pub authorize_ns_registry_server: Arc<dyn RegistryAuthorizer>,
    pub authorize_ns_registry_client: Arc<dyn RegistryAuthorizer>,
}

impl fmt::Debug for ChainOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainOptions")
            .field("name", &self.name)
            .field("listen_on", &self.listen_on.as_str())
            .field("registry_url", &self.registry_url)
            .field("registry_proxy_url", &self.registry_proxy_url)
            .field("map_ip_file_path", &self.map_ip_file_path)
            .finish_non_exhaustive()
    }
}

/// The external service chain registers its handlers through this seam.
pub trait ServiceChain {
    /// Install the chain's handlers onto the server's router.
    fn register(&self, router: Router) -> Router;
}

/// Boundary placeholder for the registry-proxy chain.
///
/// Holds the full option set and answers everything 501 until the real
/// chain installs its handlers.
pub struct RegistryChain {
    options: ChainOptions,
}

impl RegistryChain {
    pub fn new(options: ChainOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ChainOptions {
        &self.options
    }
}

impl ServiceChain for RegistryChain {
    fn register(&self, router: Router) -> Router {
        let name = self.options.name.clone();
        router.fallback(move || {
            let name = name.clone();
            async move {
                (
                    StatusCode::NOT_IMPLEMENTED,
                    format!("{name}: no registry chain handlers registered"),
                )
            }
        })
    }
}
