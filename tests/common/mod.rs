//! Shared helpers for integration tests.

use std::fs;
use std::net::TcpListener;
use std::path::Path;

use rcgen::{BasicConstraints, CertificateParams, Ia5String, IsCa, KeyPair, SanType};
use tempfile::TempDir;

pub const TEST_IDENTITY_URI: &str = "spiffe://example.org/mesh-proxy";

pub fn install_crypto() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Mint a CA plus a 12h leaf into a fresh identity directory.
pub fn write_identity_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    write_identity_into(dir.path());
    dir
}

pub fn write_identity_into(dir: &Path) {
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
    leaf_params.not_after = now + time::Duration::hours(12);
    let leaf = leaf_params
        .signed_by(&leaf_key, &ca_cert, &ca_key)
        .expect("leaf cert");

    fs::write(dir.join("tls.crt"), leaf.pem()).expect("write cert");
    fs::write(dir.join("tls.key"), leaf_key.serialize_pem()).expect("write key");
    fs::write(dir.join("ca.crt"), ca_cert.pem()).expect("write bundle");
}

/// A port that was free a moment ago. Racy by nature, good enough for
/// single-process tests.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").port()
}
