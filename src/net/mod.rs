//! Network subsystem: sockets, accept loops, and address publication.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     config listen specs → ListenerSupervisor::start_all
//!         → BoundListener::bind per spec (all-or-nothing)
//!         → accept loops serving TLS + HTTP via the ServerHandle
//!
//! Publication:
//!     config listen specs → publishable_url
//!         → representative spec, wildcard/loopback host rewritten from
//!           local interfaces
//!
//! Failure:
//!     accept error → per-listener channel → watch_errors fan-in
//!         → fatal channel → lifecycle controller
//! ```

pub mod listener;
pub mod publish;
pub mod supervisor;

pub use listener::{BoundListener, ListenerError};
pub use publish::{prefer_reachable, publishable_url, representative, resolve, AddressRanker};
pub use supervisor::{ListenerSet, ListenerSupervisor, SuperviseError};
