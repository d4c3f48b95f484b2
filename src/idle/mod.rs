//! Idle detection
//!
//! Polls the system collaborator for the time since the last user input and
//! reports progress toward a configurable idle threshold.

pub mod monitor;

pub use monitor::{IdleEvent, IdleMonitor, DEFAULT_DURATION};
