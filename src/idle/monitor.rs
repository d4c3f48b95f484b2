//! Idle monitor: periodic polling with a generation cookie

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::TimeDelta;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{Error, Result},
    system::SystemService,
};

/// Poll interval; progress events arrive at this rate.
const POLL_PERIOD: Duration = Duration::from_secs(1);

/// Default idle threshold.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(10 * 60);

/// Events published by the monitor, in order: any number of `Tick`s followed
/// by at most one `Elapsed` per started cycle.
#[derive(Debug, Clone)]
pub enum IdleEvent {
    /// Time left before the idle threshold. Negative values mean the
    /// threshold was overshot; consumers clamp for display.
    Tick { remaining: TimeDelta },
    /// The machine has been idle for the configured duration. The poll task
    /// tears itself down after publishing this.
    Elapsed { idle: Duration },
}

/// Detects when the machine has been idle for a configured duration.
///
/// Each `start` supersedes the previous polling cycle by bumping an atomic
/// generation cookie; a superseded cycle's callback observes the mismatch at
/// entry and becomes a no-op, so restarting never races a stale poll into
/// fresh state.
pub struct IdleMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    system: Arc<dyn SystemService>,
    duration: Mutex<Duration>,
    generation: AtomicU64,
    started: AtomicBool,
    closed: AtomicBool,
    events: broadcast::Sender<IdleEvent>,
    completed: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IdleMonitor {
    pub fn new(system: Arc<dyn SystemService>) -> Self {
        let (events, _) = broadcast::channel(64);
        let (completed, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                system,
                duration: Mutex::new(DEFAULT_DURATION),
                generation: AtomicU64::new(0),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                events,
                completed,
                task: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to progress and elapsed events.
    pub fn subscribe(&self) -> broadcast::Receiver<IdleEvent> {
        self.inner.events.subscribe()
    }

    pub fn duration(&self) -> Duration {
        *self.inner.duration.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Update the idle threshold. Does not restart an active cycle.
    pub fn set_duration(&self, duration: TimeDelta) -> Result<()> {
        self.ensure_open()?;

        let duration = duration
            .to_std()
            .map_err(|_| Error::InvalidArgument("duration must not be negative"))?;

        *self.inner.duration.lock().unwrap_or_else(|e| e.into_inner()) = duration;
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Arm the poll cycle, superseding any previous one.
    pub fn start(&self) -> Result<()> {
        self.ensure_open()?;

        // Invalidate the previous cycle before its task is even aborted; an
        // in-flight poll compares cookies at entry and bails out.
        let cookie = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(task) = self.inner.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }

        self.inner.completed.send_replace(false);
        self.inner.started.store(true, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(POLL_PERIOD);
            loop {
                interval.tick().await;
                if inner.generation.load(Ordering::SeqCst) != cookie {
                    return;
                }
                if !inner.poll().await {
                    return;
                }
            }
        });
        *self.inner.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);

        Ok(())
    }

    /// Tear down the poll cycle; idempotent when already stopped.
    pub fn stop(&self) -> Result<()> {
        self.ensure_open()?;
        self.teardown();
        Ok(())
    }

    /// Start (if not started) and wait until the idle threshold is reached.
    ///
    /// Cancellation aborts only the wait; the poll cycle keeps running.
    pub async fn wait(&self, cancel: CancellationToken) -> Result<()> {
        self.ensure_open()?;

        if !self.is_started() {
            self.start()?;
        }

        let mut completed = self.inner.completed.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Canceled),
            changed = completed.wait_for(|done| *done) => {
                changed.map(|_| ()).map_err(|_| Error::Closed("idle monitor"))
            }
        }
    }

    /// Terminal teardown; every later operation fails with [`Error::Closed`].
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.teardown();
        }
    }

    fn teardown(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.inner.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
        self.inner.started.store(false, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed("idle monitor"));
        }
        Ok(())
    }
}

impl Drop for IdleMonitor {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    /// One poll. Returns false when the cycle is finished.
    async fn poll(&self) -> bool {
        // A failed or not-yet-known input probe skips the tick entirely; a
        // single missed poll must not stall idle detection.
        let last_input = match self.system.last_input().await {
            Ok(0) => return true,
            Ok(tick) => tick,
            Err(e) => {
                debug!("input probe failed, skipping tick: {}", e);
                return true;
            }
        };

        let elapsed = Duration::from_millis(self.system.ticks().saturating_sub(last_input));
        let duration = *self.duration.lock().unwrap_or_else(|e| e.into_inner());

        let remaining =
            TimeDelta::milliseconds(duration.as_millis() as i64 - elapsed.as_millis() as i64);
        let _ = self.events.send(IdleEvent::Tick { remaining });

        if elapsed >= duration {
            let _ = self.events.send(IdleEvent::Elapsed { idle: elapsed });
            self.started.store(false, Ordering::SeqCst);
            self.completed.send_replace(true);
            return false;
        }

        true
    }
}
