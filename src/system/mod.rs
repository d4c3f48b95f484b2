//! System collaborator contract
//!
//! The coordinator and idle monitor never touch the OS directly; everything
//! they need from the host environment goes through [`SystemService`]. The
//! production adapter is [`HostSystem`]; tests inject [`FakeSystem`].

pub mod fake;
pub mod host;

use async_trait::async_trait;

use crate::error::{Error, Result};

pub use fake::FakeSystem;
pub use host::HostSystem;

/// Message identifier for an OS shutdown query delivered to
/// `ShutdownCoordinator::process_message`.
pub const QUERY_END_SESSION: u32 = 0x0011;

/// Flag set in a shutdown query's `lparam` when the session is ending for a
/// critical reason. Critical queries must never be blocked.
pub const ENDSESSION_CRITICAL: isize = 0x4000_0000;

/// Window handle value meaning "no window"; block registrations are skipped
/// for it.
pub const INVALID_WINDOW: isize = -1;

/// Inclusive lower bound for the process shutdown priority.
pub const SHUTDOWN_PRIORITY_MIN: i32 = 0x100;

/// Inclusive upper bound for the process shutdown priority.
pub const SHUTDOWN_PRIORITY_MAX: i32 = 0x3ff;

/// The two kinds of requirement a power request can assert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerRequestKind {
    /// Keep the display from turning off.
    DisplayRequired,
    /// Keep the system from sleeping.
    SystemRequired,
}

/// A native power request shared across requirement kinds.
///
/// Dropping the handle releases the underlying request regardless of which
/// kinds are still set.
pub trait PowerRequestHandle: Send + Sync {
    /// Assert a requirement kind on this request.
    fn set(&self, kind: PowerRequestKind) -> Result<()>;

    /// Withdraw a requirement kind from this request.
    fn clear(&self, kind: PowerRequestKind) -> Result<()>;
}

/// A registered shutdown-block reason.
///
/// Dropping the token unregisters the reason. Registration is a no-op on
/// hosts that do not support it.
pub trait ShutdownBlock: Send + Sync {}

/// Services the host environment must supply.
///
/// `ticks` and `last_input` share an arbitrary epoch and a millisecond unit;
/// `last_input() == 0` is the reserved "unknown" sentinel for systems where
/// no input has been observed yet.
#[async_trait]
pub trait SystemService: Send + Sync {
    /// Monotonically non-decreasing tick count in milliseconds.
    fn ticks(&self) -> u64;

    /// Tick count of the most recent user input, or `0` when unknown.
    async fn last_input(&self) -> Result<u64>;

    /// Create a power request with a user-visible reason.
    ///
    /// Fails with [`Error::InvalidArgument`] when `reason` is empty and
    /// [`Error::Native`] on OS failure.
    fn create_power_request(&self, reason: &str) -> Result<Box<dyn PowerRequestHandle>>;

    /// Register a shutdown-block reason against a window.
    ///
    /// Fails with [`Error::Native`] on OS failure; returns a no-op token on
    /// hosts without block support.
    fn block_shutdown(&self, window: isize, reason: &str) -> Result<Box<dyn ShutdownBlock>>;

    /// Raise this process's shutdown notification priority.
    ///
    /// Fails with [`Error::InvalidArgument`] outside
    /// [`SHUTDOWN_PRIORITY_MIN`]..=[`SHUTDOWN_PRIORITY_MAX`] and
    /// [`Error::Native`] on OS failure. Callers treat OS failure as
    /// best-effort.
    fn set_shutdown_priority(&self, priority: i32) -> Result<()>;

    /// Shut the system down, or restart it. Requires whatever privilege the
    /// host needs for session termination.
    async fn shutdown(&self, restart: bool) -> Result<()>;
}

pub(crate) fn require_reason(reason: &str) -> Result<()> {
    if reason.is_empty() {
        return Err(Error::InvalidArgument("reason must not be empty"));
    }
    Ok(())
}

pub(crate) fn require_priority(priority: i32) -> Result<()> {
    if !(SHUTDOWN_PRIORITY_MIN..=SHUTDOWN_PRIORITY_MAX).contains(&priority) {
        return Err(Error::InvalidArgument("shutdown priority out of range"));
    }
    Ok(())
}
