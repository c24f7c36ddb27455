//! Workload identity subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     IdentitySource::acquire → poll identity dir until material parses
//!         → IdentityHandle (live view) → credentials derivation
//!
//! Refresh:
//!     notify watcher on identity dir → reload document → swap into handle
//!     (all holders observe the update; the refresh task is the only writer)
//! ```
//!
//! # Design Decisions
//! - Acquisition failure is fatal at startup; refresh failure never is
//! - Consumers always read the live handle, not a startup-time snapshot
//! - Key material never appears in Debug output or logs

pub mod document;
pub mod source;

pub use document::{IdentityDocument, IdentityError};
pub use source::{IdentityHandle, IdentitySource};
