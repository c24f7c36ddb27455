//! Shared helpers for unit tests: identity material and wired subsystems.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rcgen::{BasicConstraints, CertificateParams, Ia5String, IsCa, KeyPair, SanType};
use tempfile::TempDir;

use crate::chain::{ChainOptions, DialOptions, PolicyAuthorizer};
use crate::credentials::CredentialSet;
use crate::identity::document::{BUNDLE_FILE, CERT_FILE, KEY_FILE};
use crate::identity::{IdentityHandle, IdentitySource};
use crate::lifecycle::Shutdown;

pub const TEST_IDENTITY_URI: &str = "spiffe://example.org/mesh-proxy";

pub fn install_crypto() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Mint a CA plus a leaf valid for `valid_for` into a fresh directory.
pub fn write_identity_dir(valid_for: time::Duration) -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    write_identity_into(dir.path(), valid_for);
    dir
}

pub fn write_identity_into(dir: &Path, valid_for: time::Duration) {
    let ca_key = KeyPair::generate().expect("ca key");
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).expect("ca params");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca_cert = ca_params.self_signed(&ca_key).expect("ca cert");

    let leaf_key = KeyPair::generate().expect("leaf key");
    let mut leaf_params =
        CertificateParams::new(vec!["mesh-proxy.test".to_string()]).expect("leaf params");
    leaf_params.subject_alt_names.push(SanType::URI(
        Ia5String::try_from(TEST_IDENTITY_URI.to_string()).expect("san uri"),
    ));
    let now = time::OffsetDateTime::now_utc();
    leaf_params.not_before = now - time::Duration::hours(24);
    leaf_params.not_after = now + valid_for;
    let leaf = leaf_params
        .signed_by(&leaf_key, &ca_cert, &ca_key)
        .expect("leaf cert");

    fs::write(dir.join(CERT_FILE), leaf.pem()).expect("write cert");
    fs::write(dir.join(KEY_FILE), leaf_key.serialize_pem()).expect("write key");
    fs::write(dir.join(BUNDLE_FILE), ca_cert.pem()).expect("write bundle");
}

/// Acquire an identity handle backed by freshly minted material.
pub async fn identity() -> (IdentityHandle, Shutdown, TempDir) {
    install_crypto();
    let dir = write_identity_dir(time::Duration::hours(12));
    let shutdown = Shutdown::new();
    let handle = IdentitySource::new(dir.path())
        .acquire(Duration::from_secs(1), shutdown.subscribe())
        .await
        .expect("acquire identity");
    (handle, shutdown, dir)
}

/// A full credential set over freshly minted material.
pub async fn credentials() -> (CredentialSet, Shutdown, TempDir) {
    let (handle, shutdown, dir) = identity().await;
    let credentials =
        CredentialSet::build(&handle, Duration::from_secs(600)).expect("build credentials");
    (credentials, shutdown, dir)
}

/// Chain options wired with test credentials.
pub async fn chain_options(name: &str) -> (ChainOptions, Shutdown, TempDir) {
    let (credentials, shutdown, dir) = credentials().await;
    let authorizer = Arc::new(PolicyAuthorizer::with_policies(Vec::<String>::new()));
    let options = ChainOptions {
        name: name.to_string(),
        listen_on: url::Url::parse("tcp://127.0.0.1:5006").expect("listen url"),
        registry_url: None,
        registry_proxy_url: None,
        map_ip_file_path: "map-ip.yaml".into(),
        dial_options: DialOptions {
            client_tls: credentials.client_tls.clone(),
            token_generator: credentials.token_generator.clone(),
        },
        authorize_nse_registry_server: authorizer.clone(),
        authorize_nse_registry_client: authorizer.clone(),
        authorize_ns_registry_server: authorizer.clone(),
        authorize_ns_registry_client: authorizer,
    };
    (options, shutdown, dir)
}
