//! OS signal handling.
//!
//! # Responsibilities
//! - Register handlers for SIGINT, SIGHUP, SIGTERM and SIGQUIT
//! - Translate the first termination signal into the shutdown trigger
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Signal wiring lives in `main`, not inside `run`, so tests can drive
//!   shutdown from a fake source instead of process-global signal state

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

use crate::lifecycle::Shutdown;

/// Spawn the signal watcher task.
///
/// The first termination signal triggers shutdown; the task also exits once
/// shutdown is triggered from any other source.
pub fn spawn_signal_handler(shutdown: Shutdown) -> Result<JoinHandle<()>, std::io::Error> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut observed = shutdown.subscribe();

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => tracing::info!(signal = "SIGINT", "Termination signal received"),
            _ = hangup.recv() => tracing::info!(signal = "SIGHUP", "Termination signal received"),
            _ = terminate.recv() => tracing::info!(signal = "SIGTERM", "Termination signal received"),
            _ = quit.recv() => tracing::info!(signal = "SIGQUIT", "Termination signal received"),
            _ = observed.cancelled() => return,
        }
        shutdown.trigger();
    }))
}
