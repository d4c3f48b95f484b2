//! Signal handling for graceful shutdown
//!
//! Process signals are this host's message pump: SIGTERM arrives as an
//! ordinary shutdown query the coordinator may intercept, SIGINT as a
//! critical one that never blocks. Resolves once a query goes unhandled.

use std::sync::Arc;

use futures::stream::StreamExt;
use signal_hook_tokio::Signals;
use tracing::info;

use crate::{
    state::ShutdownCoordinator,
    system::{ENDSESSION_CRITICAL, INVALID_WINDOW, QUERY_END_SESSION},
};

/// Wait for a shutdown signal the coordinator does not intercept.
pub async fn shutdown_signal(coordinator: Arc<ShutdownCoordinator>) {
    let mut signals = Signals::new([
        signal_hook::consts::SIGTERM,
        signal_hook::consts::SIGINT,
    ])
    .expect("Failed to create signal handler");

    while let Some(signal) = signals.next().await {
        let critical = signal == signal_hook::consts::SIGINT;
        let lparam = if critical { ENDSESSION_CRITICAL } else { 0 };

        let (_, handled) =
            coordinator.process_message(INVALID_WINDOW, QUERY_END_SESSION, 0, lparam);

        if !handled {
            info!("Received signal {}; shutting down", signal);
            break;
        }
        info!(
            "Received signal {}; shutdown intercepted, waiting for the machine to go idle",
            signal
        );
    }
}
