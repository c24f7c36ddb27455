//! Identity document loading and parsing.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;
use x509_parser::prelude::*;

/// Leaf certificate chain file inside the identity directory.
pub const CERT_FILE: &str = "tls.crt";
/// Private key file inside the identity directory.
pub const KEY_FILE: &str = "tls.key";
/// Trust bundle file inside the identity directory.
pub const BUNDLE_FILE: &str = "ca.crt";

/// Errors raised while acquiring or parsing identity material.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid PEM in {file}: {source}")]
    Pem {
        file: &'static str,
        source: std::io::Error,
    },

    #[error("no certificates in {0}")]
    EmptyChain(&'static str),

    #[error("no private key in {0}")]
    NoKey(&'static str),

    #[error("malformed leaf certificate: {0}")]
    Leaf(String),

    #[error("identity acquisition timed out after {timeout:?}: {source}")]
    AcquireTimeout {
        timeout: Duration,
        source: Box<IdentityError>,
    },
}

/// A short-lived workload identity: leaf chain, key and trust bundle, plus
/// the leaf metadata the rest of the proxy cares about.
pub struct IdentityDocument {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
    pub trust_bundle: Vec<CertificateDer<'static>>,
    /// SAN URI of the leaf, the workload's identity name.
    pub identity_uri: Option<String>,
    /// Expiry of the leaf certificate.
    pub not_after: SystemTime,
}

impl fmt::Debug for IdentityDocument {
    // Key material stays out of logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityDocument")
            .field("identity_uri", &self.identity_uri)
            .field("not_after", &self.not_after)
            .field("chain_len", &self.cert_chain.len())
            .field("bundle_len", &self.trust_bundle.len())
            .finish()
    }
}

impl IdentityDocument {
    /// Load and parse PEM material from the identity directory.
    pub fn load(dir: &Path) -> Result<Self, IdentityError> {
        let cert_chain = read_certs(&dir.join(CERT_FILE), CERT_FILE)?;
        let trust_bundle = read_certs(&dir.join(BUNDLE_FILE), BUNDLE_FILE)?;
        let key = read_key(&dir.join(KEY_FILE), KEY_FILE)?;
        let (identity_uri, not_after) = leaf_metadata(&cert_chain[0])?;

        Ok(Self {
            cert_chain,
            key,
            trust_bundle,
            identity_uri,
            not_after,
        })
    }

    /// Whether the leaf certificate has expired.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.not_after
    }
}

fn read_certs(
    path: &Path,
    file: &'static str,
) -> Result<Vec<CertificateDer<'static>>, IdentityError> {
    let data = fs::read(path).map_err(|source| IdentityError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let certs = rustls_pemfile::certs(&mut &data[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| IdentityError::Pem { file, source })?;
    if certs.is_empty() {
        return Err(IdentityError::EmptyChain(file));
    }
    Ok(certs)
}

fn read_key(path: &Path, file: &'static str) -> Result<PrivateKeyDer<'static>, IdentityError> {
    let data = fs::read(path).map_err(|source| IdentityError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    rustls_pemfile::private_key(&mut &data[..])
        .map_err(|source| IdentityError::Pem { file, source })?
        .ok_or(IdentityError::NoKey(file))
}

fn leaf_metadata(
    leaf: &CertificateDer<'_>,
) -> Result<(Option<String>, SystemTime), IdentityError> {
    let (_, cert) = X509Certificate::from_der(leaf.as_ref())
        .map_err(|err| IdentityError::Leaf(err.to_string()))?;

    let ts = cert.validity().not_after.timestamp();
    let not_after = if ts <= 0 {
        SystemTime::UNIX_EPOCH
    } else {
        SystemTime::UNIX_EPOCH + Duration::from_secs(ts as u64)
    };

    let identity_uri = cert
        .subject_alternative_name()
        .ok()
        .flatten()
        .and_then(|san| {
            san.value.general_names.iter().find_map(|name| match name {
                GeneralName::URI(uri) => Some(uri.to_string()),
                _ => None,
            })
        });

    Ok((identity_uri, not_after))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn test_load_parses_leaf_metadata() {
        let dir = testutil::write_identity_dir(::time::Duration::hours(12));
        let doc = IdentityDocument::load(dir.path()).expect("load identity");

        assert_eq!(
            doc.identity_uri.as_deref(),
            Some(testutil::TEST_IDENTITY_URI)
        );
        assert!(!doc.cert_chain.is_empty());
        assert!(!doc.trust_bundle.is_empty());
        assert!(!doc.is_expired(SystemTime::now()));
    }

    #[test]
    fn test_load_missing_directory_fails() {
        let err = IdentityDocument::load(Path::new("/nonexistent/identity")).unwrap_err();
        assert!(matches!(err, IdentityError::Read { .. }));
    }

    #[test]
    fn test_expired_leaf_is_reported_expired() {
        let dir = testutil::write_identity_dir(-::time::Duration::hours(1));
        let doc = IdentityDocument::load(dir.path()).expect("load identity");
        assert!(doc.is_expired(SystemTime::now()));
    }
}
