//! Process lifecycle: cancellation, signals, and bootstrap sequencing.
//!
//! # Data Flow
//! ```text
//! main → Shutdown::new → spawn_signal_handler
//!      → startup::run
//!          validate config → acquire identity → derive credentials
//!          → assemble server + register chain → start listeners
//!          → wait (fatal listener error | signal) → trigger → drain
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::spawn_signal_handler;
pub use startup::{run, BootstrapError};
