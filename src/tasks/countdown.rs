//! Countdown event pump

use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::{idle::IdleEvent, state::ShutdownCoordinator};

/// Background task that marshals idle monitor events onto the coordinator.
///
/// The idle monitor publishes from its poll task; coordinator state is only
/// ever touched from here, in publication order, so every progress tick of a
/// cycle lands before its terminal elapsed event.
pub async fn countdown_task(coordinator: Arc<ShutdownCoordinator>) {
    info!("Starting countdown task");

    let mut events = coordinator.idle_events();

    loop {
        match events.recv().await {
            Ok(IdleEvent::Tick { remaining }) => {
                coordinator.on_countdown_tick(remaining);
            }
            Ok(IdleEvent::Elapsed { idle }) => {
                coordinator.on_idle_elapsed(idle).await;
            }
            Err(RecvError::Lagged(missed)) => {
                warn!("Countdown task lagged, {} events dropped", missed);
            }
            Err(RecvError::Closed) => {
                debug!("Idle event channel closed, countdown task exiting");
                break;
            }
        }
    }
}
