//! Deterministic in-memory system collaborator
//!
//! Drives the idle monitor and coordinator in tests without touching the OS:
//! the tick clock is a scripted sequence, last-input is programmable, and
//! every native call is counted so tests can assert on acquire/release
//! pairing and failure propagation.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::{
    require_priority, require_reason, PowerRequestHandle, PowerRequestKind, ShutdownBlock,
    SystemService,
};

/// Scripted [`SystemService`] for tests.
pub struct FakeSystem {
    ticks: Mutex<VecDeque<u64>>,
    last_tick: Mutex<u64>,
    last_input: Mutex<u64>,
    input_fails: AtomicBool,
    priority: Mutex<Option<i32>>,
    priority_fails: AtomicBool,
    power_create_fails: AtomicBool,
    power_call_fails: Arc<AtomicBool>,
    requests_created: AtomicUsize,
    requests_released: Arc<AtomicUsize>,
    request_calls: Arc<Mutex<Vec<(PowerRequestKind, bool)>>>,
    blocks_created: AtomicUsize,
    blocks_released: Arc<AtomicUsize>,
    shutdown_fails: AtomicBool,
    shutdowns: Mutex<Vec<bool>>,
}

impl FakeSystem {
    pub fn new() -> Self {
        Self {
            ticks: Mutex::new(VecDeque::new()),
            last_tick: Mutex::new(0),
            last_input: Mutex::new(0),
            input_fails: AtomicBool::new(false),
            priority: Mutex::new(None),
            priority_fails: AtomicBool::new(false),
            power_create_fails: AtomicBool::new(false),
            power_call_fails: Arc::new(AtomicBool::new(false)),
            requests_created: AtomicUsize::new(0),
            requests_released: Arc::new(AtomicUsize::new(0)),
            request_calls: Arc::new(Mutex::new(Vec::new())),
            blocks_created: AtomicUsize::new(0),
            blocks_released: Arc::new(AtomicUsize::new(0)),
            shutdown_fails: AtomicBool::new(false),
            shutdowns: Mutex::new(Vec::new()),
        }
    }

    /// Queue tick values returned by successive `ticks()` calls; the last
    /// value repeats once the queue drains.
    pub fn push_ticks<I: IntoIterator<Item = u64>>(&self, values: I) {
        self.ticks.lock().unwrap().extend(values);
    }

    pub fn set_last_input(&self, tick: u64) {
        *self.last_input.lock().unwrap() = tick;
    }

    pub fn fail_last_input(&self, fail: bool) {
        self.input_fails.store(fail, Ordering::SeqCst);
    }

    pub fn fail_priority(&self, fail: bool) {
        self.priority_fails.store(fail, Ordering::SeqCst);
    }

    pub fn fail_power_create(&self, fail: bool) {
        self.power_create_fails.store(fail, Ordering::SeqCst);
    }

    pub fn fail_power_calls(&self, fail: bool) {
        self.power_call_fails.store(fail, Ordering::SeqCst);
    }

    pub fn fail_shutdown(&self, fail: bool) {
        self.shutdown_fails.store(fail, Ordering::SeqCst);
    }

    pub fn power_requests_created(&self) -> usize {
        self.requests_created.load(Ordering::SeqCst)
    }

    pub fn power_requests_released(&self) -> usize {
        self.requests_released.load(Ordering::SeqCst)
    }

    /// Set/clear calls issued against power requests, in order.
    pub fn power_request_calls(&self) -> Vec<(PowerRequestKind, bool)> {
        self.request_calls.lock().unwrap().clone()
    }

    pub fn blocks_created(&self) -> usize {
        self.blocks_created.load(Ordering::SeqCst)
    }

    pub fn blocks_released(&self) -> usize {
        self.blocks_released.load(Ordering::SeqCst)
    }

    /// Block registrations currently held.
    pub fn active_blocks(&self) -> usize {
        self.blocks_created() - self.blocks_released()
    }

    pub fn shutdown_priority(&self) -> Option<i32> {
        *self.priority.lock().unwrap()
    }

    /// Recorded `shutdown(restart)` calls.
    pub fn shutdown_calls(&self) -> Vec<bool> {
        self.shutdowns.lock().unwrap().clone()
    }
}

impl Default for FakeSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemService for FakeSystem {
    fn ticks(&self) -> u64 {
        let mut ticks = self.ticks.lock().unwrap();
        let mut last = self.last_tick.lock().unwrap();
        if let Some(next) = ticks.pop_front() {
            *last = next;
        }
        *last
    }

    async fn last_input(&self) -> Result<u64> {
        if self.input_fails.load(Ordering::SeqCst) {
            return Err(Error::native("last_input", 5));
        }
        Ok(*self.last_input.lock().unwrap())
    }

    fn create_power_request(&self, reason: &str) -> Result<Box<dyn PowerRequestHandle>> {
        require_reason(reason)?;

        if self.power_create_fails.load(Ordering::SeqCst) {
            return Err(Error::native("create_power_request", 31));
        }

        self.requests_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePowerRequest {
            calls: Arc::clone(&self.request_calls),
            fails: Arc::clone(&self.power_call_fails),
            released: Arc::clone(&self.requests_released),
        }))
    }

    fn block_shutdown(&self, _window: isize, reason: &str) -> Result<Box<dyn ShutdownBlock>> {
        require_reason(reason)?;

        self.blocks_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeBlock {
            released: Arc::clone(&self.blocks_released),
        }))
    }

    fn set_shutdown_priority(&self, priority: i32) -> Result<()> {
        require_priority(priority)?;

        if self.priority_fails.load(Ordering::SeqCst) {
            return Err(Error::native("set_shutdown_priority", 87));
        }

        *self.priority.lock().unwrap() = Some(priority);
        Ok(())
    }

    async fn shutdown(&self, restart: bool) -> Result<()> {
        if self.shutdown_fails.load(Ordering::SeqCst) {
            return Err(Error::native("shutdown", 1223));
        }
        self.shutdowns.lock().unwrap().push(restart);
        Ok(())
    }
}

struct FakePowerRequest {
    calls: Arc<Mutex<Vec<(PowerRequestKind, bool)>>>,
    fails: Arc<AtomicBool>,
    released: Arc<AtomicUsize>,
}

impl PowerRequestHandle for FakePowerRequest {
    fn set(&self, kind: PowerRequestKind) -> Result<()> {
        if self.fails.load(Ordering::SeqCst) {
            return Err(Error::native("power_set", 31));
        }
        self.calls.lock().unwrap().push((kind, true));
        Ok(())
    }

    fn clear(&self, kind: PowerRequestKind) -> Result<()> {
        if self.fails.load(Ordering::SeqCst) {
            return Err(Error::native("power_clear", 31));
        }
        self.calls.lock().unwrap().push((kind, false));
        Ok(())
    }
}

impl Drop for FakePowerRequest {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeBlock {
    released: Arc<AtomicUsize>,
}

impl ShutdownBlock for FakeBlock {}

impl Drop for FakeBlock {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
