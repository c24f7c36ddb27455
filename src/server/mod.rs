//! Server assembly: one router plus one TLS config for the whole fleet.
//!
//! # Responsibilities
//! - Assemble the HTTP surface every listener serves
//! - Carry the server-side TLS config derived from the credential set
//! - Accept chain registrations before listeners start
//!
//! # Design Decisions
//! - One handle serves every listener; per-listener surfaces are not a
//!   thing in this proxy
//! - Registration happens before serving, so no locking on the hot path

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::chain::ServiceChain;
use crate::credentials::CredentialSet;

/// The assembled server: what every accept loop serves.
pub struct ServerHandle {
    router: Router,
    tls: Arc<rustls::ServerConfig>,
}

impl ServerHandle {
    /// Assemble an empty server over the credential set's server TLS.
    pub fn assemble(credentials: &CredentialSet) -> Self {
        Self {
            router: Router::new(),
            tls: credentials.server_tls.clone(),
        }
    }

    /// Let a service chain install its handlers.
    pub fn register(&mut self, chain: &dyn ServiceChain) {
        let router = std::mem::take(&mut self.router);
        self.router = chain.register(router);
    }

    /// Router snapshot for one connection, with request tracing applied on
    /// top of whatever the chains installed.
    pub(crate) fn router(&self) -> Router {
        self.router.clone().layer(TraceLayer::new_for_http())
    }

    pub(crate) fn tls_config(&self) -> Arc<rustls::ServerConfig> {
        self.tls.clone()
    }
}
