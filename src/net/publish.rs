//! Publishable-address resolution.
//!
//! # Responsibilities
//! - Pick the representative listen spec (first tcp entry, else first entry)
//! - Rewrite wildcard/loopback hosts with a reachable interface address
//! - Fall back, with a warning, when interface enumeration fails
//!
//! # Design Decisions
//! - Resolution is a pure function of (specs, candidate addresses, ranker)
//! - Output is advisory: binding always uses the original specs
//! - Ranking is pluggable; the default deprioritizes loopback and link-local

use std::net::IpAddr;

use url::{Host, Url};

/// Ranking function choosing which interface address to publish.
pub type AddressRanker = fn(&[IpAddr]) -> Option<IpAddr>;

/// Default ranker: global addresses first, then private non-link-local,
/// then anything that is not loopback; loopback and link-local only when
/// nothing else exists.
pub fn prefer_reachable(candidates: &[IpAddr]) -> Option<IpAddr> {
    let routable = |ip: &&IpAddr| !ip.is_loopback() && !is_link_local(ip);
    candidates
        .iter()
        .find(|ip| routable(ip) && !is_private(ip))
        .or_else(|| candidates.iter().find(routable))
        .or_else(|| candidates.first())
        .copied()
}

fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private(),
        // Unique-local fc00::/7.
        IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

/// The spec reported to operators and the registry: the first tcp entry,
/// or unconditionally the first entry when no tcp spec exists, so
/// non-network transports are reported verbatim.
///
/// Panics on an empty list; config validation rejects those earlier.
pub fn representative(listen_on: &[Url]) -> &Url {
    listen_on
        .iter()
        .find(|url| url.scheme() == "tcp")
        .unwrap_or(&listen_on[0])
}

/// Resolve the publishable address from already-enumerated candidates.
pub fn resolve(listen_on: &[Url], candidates: &[IpAddr], rank: AddressRanker) -> Url {
    let spec = representative(listen_on);
    if spec.scheme() != "tcp" || !needs_rewrite(spec) {
        return spec.clone();
    }
    let Some(ip) = rank(candidates) else {
        return spec.clone();
    };
    let mut published = spec.clone();
    if published.set_ip_host(ip).is_err() {
        tracing::warn!(url = %spec, "Representative spec cannot carry a host, reporting it unmodified");
        return spec.clone();
    }
    published
}

fn needs_rewrite(spec: &Url) -> bool {
    match spec.host() {
        None => true,
        // Non-special schemes carry opaque hosts, so IP literals arrive as
        // domain strings.
        Some(Host::Domain(domain)) => match domain.parse::<IpAddr>() {
            Ok(ip) => ip.is_unspecified() || ip.is_loopback(),
            Err(_) => domain.is_empty() || domain.eq_ignore_ascii_case("localhost"),
        },
        Some(Host::Ipv4(ip)) => ip.is_unspecified() || ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_unspecified() || ip.is_loopback(),
    }
}

/// Compute the address to advertise, enumerating local interfaces.
///
/// Enumeration failure is degraded operation, not an error: the
/// representative spec is reported unmodified.
pub fn publishable_url(listen_on: &[Url]) -> Url {
    resolve_or_fallback(listen_on, local_addresses())
}

fn resolve_or_fallback(listen_on: &[Url], enumerated: std::io::Result<Vec<IpAddr>>) -> Url {
    match enumerated {
        Ok(candidates) => resolve(listen_on, &candidates, prefer_reachable),
        Err(err) => {
            tracing::warn!(
                error = %err,
                "Interface enumeration failed, publishing the representative spec unmodified"
            );
            representative(listen_on).clone()
        }
    }
}

fn local_addresses() -> std::io::Result<Vec<IpAddr>> {
    Ok(if_addrs::get_if_addrs()?
        .into_iter()
        .map(|interface| interface.ip())
        .collect())
}
