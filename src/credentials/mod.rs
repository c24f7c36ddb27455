//! Transport credential derivation and bearer-token generation.
//!
//! # Responsibilities
//! - Derive mutually authenticated server and client TLS configs from the
//!   live identity handle
//! - Enforce the TLS 1.2 protocol floor on both sides
//! - Mint fresh, lifetime-bounded bearer tokens for outgoing calls
//!
//! # Design Decisions
//! - Transport trust answers "is this a legitimate mesh participant"; any
//!   peer chaining to the trust bundle is accepted, and per-request
//!   authorization stays with the policy collaborators
//! - Certificate material resolves per handshake through the identity
//!   handle, so rotated documents need no config rebuild

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rustls::client::ResolvesClientCert;
use rustls::crypto::aws_lc_rs::sign::any_supported_type;
use rustls::server::{ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, RootCertStore, ServerConfig, SignatureScheme};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::identity::IdentityHandle;

/// TLS 1.2 is the floor; anything older is refused outright.
static TLS_VERSIONS: &[&rustls::SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];

/// Errors raised while deriving credentials or minting tokens.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("trust bundle rejected: {0}")]
    TrustBundle(String),

    #[error("client verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),

    #[error("tls config: {0}")]
    Tls(#[from] rustls::Error),

    #[error("identity document expired at {0:?}")]
    IdentityExpired(SystemTime),

    #[error("token serialization: {0}")]
    Token(#[from] serde_json::Error),
}

/// The full transport credential set: one server config governing every
/// accepted connection, one client config for outgoing dials, and the
/// per-call token generator.
#[derive(Clone)]
pub struct CredentialSet {
    pub server_tls: Arc<ServerConfig>,
    pub client_tls: Arc<ClientConfig>,
    pub token_generator: TokenGenerator,
}

impl CredentialSet {
    /// Derive the credential set from the live identity handle.
    ///
    /// Pure derivation: no I/O. The trust bundle is fixed at build time;
    /// leaf material rotates per handshake through the handle.
    pub fn build(
        identity: &IdentityHandle,
        max_token_lifetime: Duration,
    ) -> Result<Self, CredentialError> {
        let document = identity.document();

        let mut roots = RootCertStore::empty();
        for cert in &document.trust_bundle {
            roots
                .add(cert.clone())
                .map_err(|err| CredentialError::TrustBundle(err.to_string()))?;
        }
        let roots = Arc::new(roots);
        let resolver = Arc::new(RotatingCertResolver {
            identity: identity.clone(),
        });

        let verifier = WebPkiClientVerifier::builder(roots.clone()).build()?;
        let mut server_tls = ServerConfig::builder_with_protocol_versions(TLS_VERSIONS)
            .with_client_cert_verifier(verifier)
            .with_cert_resolver(resolver.clone());
        server_tls.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        let mut client_tls = ClientConfig::builder_with_protocol_versions(TLS_VERSIONS)
            .with_root_certificates(roots)
            .with_client_cert_resolver(resolver);
        client_tls.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        Ok(Self {
            server_tls: Arc::new(server_tls),
            client_tls: Arc::new(client_tls),
            token_generator: TokenGenerator::new(identity.clone(), max_token_lifetime),
        })
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("token_generator", &self.token_generator)
            .finish_non_exhaustive()
    }
}

/// Resolves certificate material from the live identity handle at every
/// handshake, so rotation takes effect without restarting listeners.
#[derive(Debug)]
struct RotatingCertResolver {
    identity: IdentityHandle,
}

impl RotatingCertResolver {
    fn certified_key(&self) -> Option<Arc<CertifiedKey>> {
        let document = self.identity.document();
        let key = any_supported_type(&document.key).ok()?;
        Some(Arc::new(CertifiedKey::new(
            document.cert_chain.clone(),
            key,
        )))
    }
}

impl ResolvesServerCert for RotatingCertResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.certified_key()
    }
}

impl ResolvesClientCert for RotatingCertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        self.certified_key()
    }

    fn has_certs(&self) -> bool {
        true
    }
}

#[derive(Debug, Serialize)]
struct TokenClaims<'a> {
    sub: &'a str,
    exp: u64,
    jti: Uuid,
}

/// A minted bearer token and its expiry.
#[derive(Debug, Clone)]
pub struct BearerToken {
    pub token: String,
    pub expires_at: SystemTime,
}

/// Mints bearer tokens bound to the live identity document.
///
/// Call [`TokenGenerator::generate`] per outgoing RPC — identity material
/// rotates, so cached tokens go stale.
#[derive(Clone, Debug)]
pub struct TokenGenerator {
    identity: IdentityHandle,
    max_lifetime: Duration,
}

impl TokenGenerator {
    fn new(identity: IdentityHandle, max_lifetime: Duration) -> Self {
        Self {
            identity,
            max_lifetime,
        }
    }

    /// Mint a fresh token, valid for at most the configured lifetime and
    /// never past the identity document's own expiry.
    pub fn generate(&self) -> Result<BearerToken, CredentialError> {
        let document = self.identity.document();
        let now = SystemTime::now();
        if document.is_expired(now) {
            return Err(CredentialError::IdentityExpired(document.not_after));
        }

        let expires_at = (now + self.max_lifetime).min(document.not_after);
        let exp = expires_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let claims = TokenClaims {
            sub: document.identity_uri.as_deref().unwrap_or("unknown"),
            exp,
            jti: Uuid::new_v4(),
        };

        Ok(BearerToken {
            token: serde_json::to_string(&claims)?,
            expires_at,
        })
    }

    /// Upper bound on issued token validity.
    pub fn max_lifetime(&self) -> Duration {
        self.max_lifetime
    }
}
