//! Bootstrap and lifecycle core of the interdomain registry proxy.
//!
//! The crate wires five subsystems into one supervised process:
//!
//! - [`identity`]: acquires workload identity material from disk and keeps
//!   a live handle fresh as it rotates.
//! - [`credentials`]: derives mutual-TLS server/client configs and a
//!   bearer-token generator from the identity handle.
//! - [`server`]: assembles the HTTP surface the external registry chain
//!   registers onto.
//! - [`net`]: binds every configured listener, serves TLS + HTTP on each,
//!   and resolves the publishable address.
//! - [`lifecycle`]: sequences startup and owns the single shutdown path
//!   for signals and fatal listener errors.

pub mod chain;
pub mod config;
pub mod credentials;
pub mod identity;
pub mod lifecycle;
pub mod net;
pub mod server;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::Config;
pub use credentials::CredentialSet;
pub use identity::{IdentityHandle, IdentitySource};
pub use lifecycle::{Shutdown, ShutdownSignal};
pub use server::ServerHandle;
