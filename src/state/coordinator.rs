//! Shutdown coordinator state machine

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::TimeDelta;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    config::CountdownPolicy,
    error::{Error, Result},
    idle::{IdleEvent, IdleMonitor},
    power::PowerRequirements,
    state::snapshot::{format_countdown, StateSnapshot},
    state::CountdownState,
    system::{
        PowerRequestKind, ShutdownBlock, SystemService, ENDSESSION_CRITICAL, INVALID_WINDOW,
        QUERY_END_SESSION, SHUTDOWN_PRIORITY_MAX,
    },
};

/// Coordinates the user-facing toggles, the OS shutdown-query hook, and the
/// native handles that must exist while blocking is armed.
///
/// Invariant: the shutdown-block registration is held exactly when
/// `suspend_shutdown && !cancel_shutdown`, and the idle countdown runs
/// exactly when that holds and a shutdown request has arrived.
pub struct ShutdownCoordinator {
    system: Arc<dyn SystemService>,
    idle: IdleMonitor,
    policy: CountdownPolicy,
    reason: String,
    restart: bool,
    inner: Mutex<CoordinatorState>,
    changes: broadcast::Sender<StateSnapshot>,
}

struct CoordinatorState {
    suspend_shutdown: bool,
    cancel_shutdown: bool,
    shutdown_requested: bool,
    stop_processing: bool,
    closed: bool,
    window: isize,
    block: Option<Box<dyn ShutdownBlock>>,
    power: PowerRequirements,
    countdown: TimeDelta,
    errors: Vec<String>,
}

impl CoordinatorState {
    fn should_block(&self) -> bool {
        self.suspend_shutdown && !self.cancel_shutdown
    }
}

impl ShutdownCoordinator {
    /// Create a coordinator around an injected system collaborator.
    pub fn new(
        system: Arc<dyn SystemService>,
        reason: impl Into<String>,
        restart: bool,
        policy: CountdownPolicy,
    ) -> Self {
        let idle = IdleMonitor::new(Arc::clone(&system));
        let (changes, _) = broadcast::channel(64);

        let reason = reason.into();
        let power = PowerRequirements::new(Arc::clone(&system), reason.clone());

        // Ask to be notified late in the shutdown sequence; losing this is
        // harmless, so the failure is only logged.
        if let Err(e) = system.set_shutdown_priority(SHUTDOWN_PRIORITY_MAX) {
            warn!("could not raise shutdown priority: {}", e);
        }

        let countdown = delta_of(idle.duration());
        Self {
            system,
            idle,
            policy,
            reason,
            restart,
            inner: Mutex::new(CoordinatorState {
                suspend_shutdown: false,
                cancel_shutdown: false,
                shutdown_requested: false,
                stop_processing: false,
                closed: false,
                window: INVALID_WINDOW,
                block: None,
                power,
                countdown,
                errors: Vec::new(),
            }),
            changes,
        }
    }

    /// Subscribe to state change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StateSnapshot> {
        self.changes.subscribe()
    }

    /// Subscribe to the underlying idle monitor's progress events.
    pub fn idle_events(&self) -> broadcast::Receiver<IdleEvent> {
        self.idle.subscribe()
    }

    /// Window the block registration is tied to, for hosts that have one.
    pub fn set_window(&self, window: isize) -> Result<()> {
        self.lock_open()?.window = window;
        Ok(())
    }

    /// Update the idle threshold; resets the countdown display when the
    /// countdown is not running.
    pub fn set_duration(&self, duration: TimeDelta) -> Result<StateSnapshot> {
        let mut state = self.lock_open()?;
        self.idle.set_duration(duration)?;

        let mut changed = false;
        if !self.idle.is_started() && state.countdown != duration {
            state.countdown = duration;
            changed = true;
        }
        let snapshot = self.snapshot_of(&state);
        drop(state);
        if changed {
            let _ = self.changes.send(snapshot.clone());
        }
        Ok(snapshot)
    }

    /// Set whether shutdown requests should be intercepted.
    pub fn set_suspend_shutdown(&self, value: bool) -> Result<StateSnapshot> {
        let mut state = self.lock_open()?;
        if state.suspend_shutdown == value {
            return Ok(self.snapshot_of(&state));
        }

        info!("setting suspend-shutdown to: {}", value);
        state.suspend_shutdown = value;
        self.apply_block_state(&mut state)?;

        let snapshot = self.snapshot_of(&state);
        drop(state);
        let _ = self.changes.send(snapshot.clone());
        Ok(snapshot)
    }

    /// Set whether an in-flight block should be released.
    pub fn set_cancel_shutdown(&self, value: bool) -> Result<StateSnapshot> {
        let mut state = self.lock_open()?;
        if state.cancel_shutdown == value {
            return Ok(self.snapshot_of(&state));
        }

        info!("setting cancel-shutdown to: {}", value);
        state.cancel_shutdown = value;
        if value && self.policy.reset_request_on_cancel {
            state.shutdown_requested = false;
        }
        self.apply_block_state(&mut state)?;

        let snapshot = self.snapshot_of(&state);
        drop(state);
        let _ = self.changes.send(snapshot.clone());
        Ok(snapshot)
    }

    /// Keep the display from turning off.
    pub fn set_display_required(&self, value: bool) -> Result<StateSnapshot> {
        self.set_power(PowerRequestKind::DisplayRequired, value)
    }

    /// Keep the system from sleeping.
    pub fn set_system_required(&self, value: bool) -> Result<StateSnapshot> {
        self.set_power(PowerRequestKind::SystemRequired, value)
    }

    /// Message-filter entry point for the host's message pump.
    ///
    /// Returns `(result, handled)`. A shutdown query is handled only while
    /// queries are still processed, its critical flag is absent, and
    /// interception is armed; handling latches `shutdown_requested` and
    /// starts the countdown if blocking is in effect and it is not already
    /// running.
    pub fn process_message(
        &self,
        _window: isize,
        message: u32,
        _wparam: isize,
        lparam: isize,
    ) -> (isize, bool) {
        let mut state = self.state();
        if state.closed || state.stop_processing || message != QUERY_END_SESSION {
            return (0, false);
        }
        if lparam & ENDSESSION_CRITICAL != 0 {
            // Critical session endings must never be blocked.
            debug!("critical shutdown query; not handled");
            return (0, false);
        }
        if !state.suspend_shutdown {
            return (0, false);
        }

        let newly_requested = !state.shutdown_requested;
        state.shutdown_requested = true;

        let mut started = false;
        if state.should_block() && !self.idle.is_started() {
            match self.idle.start() {
                Ok(()) => started = true,
                Err(e) => warn!("could not start idle countdown: {}", e),
            }
        }

        if newly_requested || started {
            info!("shutdown query intercepted; countdown {}", if started { "started" } else { "pending" });
            let snapshot = self.snapshot_of(&state);
            drop(state);
            let _ = self.changes.send(snapshot);
        }

        (0, true)
    }

    /// Countdown progress, marshaled in from the idle monitor's events.
    pub fn on_countdown_tick(&self, remaining: TimeDelta) {
        let mut state = self.state();
        if state.closed || state.countdown == remaining {
            return;
        }
        state.countdown = remaining;
        let snapshot = self.snapshot_of(&state);
        drop(state);
        let _ = self.changes.send(snapshot);
    }

    /// Terminal transition: the machine stayed idle through the countdown.
    ///
    /// Latches message processing shut and asks the host to perform the
    /// actual shutdown. A failure is recorded for client visibility; there
    /// is no retry.
    pub async fn on_idle_elapsed(&self, idle: Duration) {
        {
            let mut state = self.state();
            if state.closed || state.stop_processing {
                return;
            }
            state.stop_processing = true;
            let _ = self.idle.stop();
            state.countdown = delta_of(self.idle.duration());

            info!("machine idle for {:?}; letting shutdown proceed", idle);
            let snapshot = self.snapshot_of(&state);
            drop(state);
            let _ = self.changes.send(snapshot);
        }

        if let Err(e) = self.system.shutdown(self.restart).await {
            warn!("shutdown request failed: {}", e);
            let mut state = self.state();
            state.errors.push(format!("Shutdown failed: {}", e));
            let snapshot = self.snapshot_of(&state);
            drop(state);
            let _ = self.changes.send(snapshot);
        }
    }

    /// Current state snapshot.
    pub fn snapshot(&self) -> StateSnapshot {
        let state = self.state();
        self.snapshot_of(&state)
    }

    /// Countdown state for status reporting.
    pub fn countdown_state(&self) -> CountdownState {
        let state = self.state();
        if self.idle.is_started() {
            CountdownState::active(state.countdown.num_seconds().max(0) as u64)
        } else {
            CountdownState::new()
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Release the block registration and power request; terminal.
    pub fn close(&self) {
        let mut state = self.state();
        if state.closed {
            return;
        }
        state.block = None;
        state.power.close();
        state.closed = true;
        drop(state);
        self.idle.close();
        debug!("coordinator closed");
    }

    fn set_power(&self, kind: PowerRequestKind, value: bool) -> Result<StateSnapshot> {
        let mut state = self.lock_open()?;
        let changed = state.power.set(kind, value)?;

        let snapshot = self.snapshot_of(&state);
        drop(state);
        if changed {
            let _ = self.changes.send(snapshot.clone());
        }
        Ok(snapshot)
    }

    /// Re-evaluate the block registration and countdown after a toggle flip.
    fn apply_block_state(&self, state: &mut CoordinatorState) -> Result<()> {
        let should_block = state.should_block();

        if should_block {
            if state.block.is_none() {
                state.block = Some(self.system.block_shutdown(state.window, &self.reason)?);
            }
        } else {
            // Dropping the token unregisters the block reason.
            state.block = None;
        }

        if should_block && state.shutdown_requested {
            if !self.idle.is_started() {
                self.idle.start()?;
            }
        } else {
            self.idle.stop()?;
            state.countdown = delta_of(self.idle.duration());
        }
        Ok(())
    }

    fn snapshot_of(&self, state: &CoordinatorState) -> StateSnapshot {
        let should_block = state.should_block();
        let countdown_seconds = state.countdown.num_seconds().max(0) as u64;

        StateSnapshot {
            suspend_shutdown: state.suspend_shutdown,
            cancel_shutdown: state.cancel_shutdown,
            shutdown_requested: state.shutdown_requested,
            display_required: state.power.get(PowerRequestKind::DisplayRequired),
            system_required: state.power.get(PowerRequestKind::SystemRequired),
            should_block,
            shutdown_panel_visible: state.suspend_shutdown,
            waiting_visible: should_block && !state.shutdown_requested,
            countdown_visible: should_block
                && (state.shutdown_requested || !self.policy.countdown_requires_request),
            countdown_seconds,
            countdown: format_countdown(countdown_seconds),
            errors: state.errors.clone(),
        }
    }

    fn state(&self) -> MutexGuard<'_, CoordinatorState> {
        // A poisoned lock only means an observer panicked mid-read; the
        // state itself stays usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_open(&self) -> Result<MutexGuard<'_, CoordinatorState>> {
        let state = self.state();
        if state.closed {
            return Err(Error::Closed("shutdown coordinator"));
        }
        Ok(state)
    }
}

fn delta_of(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::FakeSystem;

    const QUERY: u32 = QUERY_END_SESSION;

    fn coordinator_with(system: &Arc<FakeSystem>) -> ShutdownCoordinator {
        coordinator_with_policy(system, CountdownPolicy::default())
    }

    fn coordinator_with_policy(
        system: &Arc<FakeSystem>,
        policy: CountdownPolicy,
    ) -> ShutdownCoordinator {
        ShutdownCoordinator::new(
            Arc::clone(system) as Arc<dyn SystemService>,
            "pending work",
            false,
            policy,
        )
    }

    #[tokio::test]
    async fn should_block_truth_table() {
        for (suspend, cancel, expected) in [
            (false, false, false),
            (false, true, false),
            (true, false, true),
            (true, true, false),
        ] {
            let system = Arc::new(FakeSystem::new());
            let coordinator = coordinator_with(&system);
            coordinator.set_suspend_shutdown(suspend).unwrap();
            let snapshot = coordinator.set_cancel_shutdown(cancel).unwrap();
            assert_eq!(snapshot.should_block, expected, "suspend={suspend} cancel={cancel}");
        }
    }

    #[tokio::test]
    async fn suspend_acquires_and_releases_the_block() {
        let system = Arc::new(FakeSystem::new());
        let coordinator = coordinator_with(&system);

        coordinator.set_suspend_shutdown(true).unwrap();
        assert_eq!(system.active_blocks(), 1);

        coordinator.set_suspend_shutdown(false).unwrap();
        assert_eq!(system.active_blocks(), 0);
        assert_eq!(system.blocks_created(), 1);
    }

    #[tokio::test]
    async fn cancel_releases_the_block_while_suspended() {
        let system = Arc::new(FakeSystem::new());
        let coordinator = coordinator_with(&system);

        coordinator.set_suspend_shutdown(true).unwrap();
        coordinator.set_cancel_shutdown(true).unwrap();
        assert_eq!(system.active_blocks(), 0);

        coordinator.set_cancel_shutdown(false).unwrap();
        assert_eq!(system.active_blocks(), 1);
        assert_eq!(system.blocks_created(), 2);
    }

    #[tokio::test]
    async fn unchanged_toggle_raises_nothing_and_calls_nothing() {
        let system = Arc::new(FakeSystem::new());
        let coordinator = coordinator_with(&system);
        coordinator.set_suspend_shutdown(true).unwrap();

        let mut changes = coordinator.subscribe();
        coordinator.set_suspend_shutdown(true).unwrap();
        coordinator.set_cancel_shutdown(false).unwrap();
        coordinator.set_display_required(false).unwrap();

        assert!(changes.try_recv().is_err());
        assert_eq!(system.blocks_created(), 1);
        assert_eq!(system.power_requests_created(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn non_critical_query_is_handled_and_starts_countdown_once() {
        let system = Arc::new(FakeSystem::new());
        let coordinator = coordinator_with(&system);
        coordinator.set_suspend_shutdown(true).unwrap();

        let (_, handled) = coordinator.process_message(0, QUERY, 0, 0);
        assert!(handled);
        assert!(coordinator.countdown_state().is_active());
        let snapshot = coordinator.snapshot();
        assert!(snapshot.shutdown_requested);

        // Repeated delivery stays handled without restarting the countdown.
        let (_, handled) = coordinator.process_message(0, QUERY, 0, 0);
        assert!(handled);
        assert!(coordinator.countdown_state().is_active());
    }

    #[tokio::test]
    async fn critical_query_is_never_handled() {
        let system = Arc::new(FakeSystem::new());
        let coordinator = coordinator_with(&system);
        coordinator.set_suspend_shutdown(true).unwrap();

        let (_, handled) = coordinator.process_message(0, QUERY, 0, ENDSESSION_CRITICAL);
        assert!(!handled);
        assert!(!coordinator.snapshot().shutdown_requested);
        assert!(!coordinator.countdown_state().is_active());
    }

    #[tokio::test]
    async fn query_without_suspend_is_not_handled() {
        let system = Arc::new(FakeSystem::new());
        let coordinator = coordinator_with(&system);

        let (_, handled) = coordinator.process_message(0, QUERY, 0, 0);
        assert!(!handled);

        // Unrelated messages pass through untouched as well.
        coordinator.set_suspend_shutdown(true).unwrap();
        let (_, handled) = coordinator.process_message(0, 0x0010, 0, 0);
        assert!(!handled);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_latches_processing_and_requests_shutdown() {
        let system = Arc::new(FakeSystem::new());
        let coordinator = coordinator_with(&system);
        coordinator.set_suspend_shutdown(true).unwrap();
        coordinator.process_message(0, QUERY, 0, 0);

        coordinator.on_idle_elapsed(Duration::from_secs(600)).await;

        assert_eq!(system.shutdown_calls(), vec![false]);
        let (_, handled) = coordinator.process_message(0, QUERY, 0, 0);
        assert!(!handled);

        // The terminal transition happens once.
        coordinator.on_idle_elapsed(Duration::from_secs(600)).await;
        assert_eq!(system.shutdown_calls(), vec![false]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_failure_is_recorded_for_clients() {
        let system = Arc::new(FakeSystem::new());
        let coordinator = coordinator_with(&system);
        coordinator.set_suspend_shutdown(true).unwrap();
        coordinator.process_message(0, QUERY, 0, 0);
        system.fail_shutdown(true);

        coordinator.on_idle_elapsed(Duration::from_secs(600)).await;

        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.errors.len(), 1);
        assert!(snapshot.errors[0].contains("Shutdown failed"));
        assert!(system.shutdown_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_tick_updates_the_snapshot() {
        let system = Arc::new(FakeSystem::new());
        let coordinator = coordinator_with(&system);
        let mut changes = coordinator.subscribe();

        coordinator.on_countdown_tick(TimeDelta::seconds(42));
        let snapshot = changes.try_recv().unwrap();
        assert_eq!(snapshot.countdown_seconds, 42);
        assert_eq!(snapshot.countdown, "00:00:42");

        // Overshoot clamps to zero for display.
        coordinator.on_countdown_tick(TimeDelta::seconds(-3));
        let snapshot = changes.try_recv().unwrap();
        assert_eq!(snapshot.countdown_seconds, 0);
    }

    #[tokio::test]
    async fn power_request_is_shared_and_lazy() {
        let system = Arc::new(FakeSystem::new());
        let coordinator = coordinator_with(&system);
        assert_eq!(system.power_requests_created(), 0);

        coordinator.set_display_required(true).unwrap();
        coordinator.set_system_required(true).unwrap();

        assert_eq!(system.power_requests_created(), 1);
        let snapshot = coordinator.snapshot();
        assert!(snapshot.display_required);
        assert!(snapshot.system_required);
    }

    #[tokio::test]
    async fn power_failure_surfaces_to_the_caller() {
        let system = Arc::new(FakeSystem::new());
        let coordinator = coordinator_with(&system);
        system.fail_power_calls(true);

        let err = coordinator.set_display_required(true).unwrap_err();
        assert!(matches!(err, Error::Native { .. }));
        assert!(!coordinator.snapshot().display_required);
    }

    #[tokio::test]
    async fn priority_is_raised_best_effort() {
        let system = Arc::new(FakeSystem::new());
        let _coordinator = coordinator_with(&system);
        assert_eq!(system.shutdown_priority(), Some(SHUTDOWN_PRIORITY_MAX));

        let failing = Arc::new(FakeSystem::new());
        failing.fail_priority(true);
        let coordinator = coordinator_with(&failing);
        assert_eq!(failing.shutdown_priority(), None);
        // Construction survived the failure; the coordinator works.
        coordinator.set_suspend_shutdown(true).unwrap();
    }

    #[tokio::test]
    async fn close_releases_each_native_handle_once() {
        let system = Arc::new(FakeSystem::new());
        let coordinator = coordinator_with(&system);

        coordinator.set_suspend_shutdown(true).unwrap();
        coordinator.set_display_required(true).unwrap();
        coordinator.set_system_required(true).unwrap();

        coordinator.close();
        coordinator.close();

        assert_eq!(system.active_blocks(), 0);
        assert_eq!(system.power_requests_released(), 1);

        assert!(matches!(
            coordinator.set_suspend_shutdown(false).unwrap_err(),
            Error::Closed(_)
        ));
        assert!(matches!(
            coordinator.set_display_required(false).unwrap_err(),
            Error::Closed(_)
        ));
        let (_, handled) = coordinator.process_message(0, QUERY, 0, 0);
        assert!(!handled);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_visibility_follows_the_policy() {
        let system = Arc::new(FakeSystem::new());
        let coordinator = coordinator_with(&system);

        let snapshot = coordinator.set_suspend_shutdown(true).unwrap();
        assert!(snapshot.shutdown_panel_visible);
        assert!(snapshot.waiting_visible);
        assert!(!snapshot.countdown_visible);

        coordinator.process_message(0, QUERY, 0, 0);
        let snapshot = coordinator.snapshot();
        assert!(!snapshot.waiting_visible);
        assert!(snapshot.countdown_visible);

        let eager = coordinator_with_policy(
            &system,
            CountdownPolicy {
                countdown_requires_request: false,
                reset_request_on_cancel: false,
            },
        );
        let snapshot = eager.set_suspend_shutdown(true).unwrap();
        assert!(snapshot.countdown_visible);
    }

    #[tokio::test(start_paused = true)]
    async fn request_latch_follows_the_policy() {
        let system = Arc::new(FakeSystem::new());

        // Default: the request is monotonic for the session.
        let coordinator = coordinator_with(&system);
        coordinator.set_suspend_shutdown(true).unwrap();
        coordinator.process_message(0, QUERY, 0, 0);
        coordinator.set_cancel_shutdown(true).unwrap();
        assert!(coordinator.snapshot().shutdown_requested);

        // Reset-on-cancel forgets it.
        let resetting = coordinator_with_policy(
            &system,
            CountdownPolicy {
                countdown_requires_request: true,
                reset_request_on_cancel: true,
            },
        );
        resetting.set_suspend_shutdown(true).unwrap();
        resetting.process_message(0, QUERY, 0, 0);
        resetting.set_cancel_shutdown(true).unwrap();
        assert!(!resetting.snapshot().shutdown_requested);
    }

    #[tokio::test]
    async fn set_duration_resets_the_idle_display() {
        let system = Arc::new(FakeSystem::new());
        let coordinator = coordinator_with(&system);

        let snapshot = coordinator.set_duration(TimeDelta::minutes(2)).unwrap();
        assert_eq!(snapshot.countdown_seconds, 120);

        let err = coordinator.set_duration(TimeDelta::seconds(-1)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(coordinator.snapshot().countdown_seconds, 120);
    }
}
