//! Unified error types for the library

use thiserror::Error;

/// Errors surfaced by the idle monitor, coordinator, and system collaborator.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller supplied a bad value (negative duration, empty reason,
    /// priority outside its documented range).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// An operation was attempted on an object that has been closed.
    #[error("{0} is closed")]
    Closed(&'static str),

    /// Waiting for idle completion was canceled. The underlying timer keeps
    /// running.
    #[error("wait canceled")]
    Canceled,

    /// A native system call failed with the given OS error code.
    #[error("{call} failed with os error {code}")]
    Native { call: &'static str, code: i32 },
}

impl Error {
    /// Wrap an OS failure from the named native call.
    pub fn native(call: &'static str, code: i32) -> Self {
        Self::Native { call, code }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
