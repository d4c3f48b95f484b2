//! Countdown state mirror for status reporting

/// Countdown state for tracking the idle-shutdown timer
#[derive(Debug, Clone)]
pub struct CountdownState {
    pub active: bool,
    pub remaining_seconds: Option<u64>,
}

impl CountdownState {
    /// Create a new inactive countdown state
    pub fn new() -> Self {
        Self {
            active: false,
            remaining_seconds: None,
        }
    }

    /// Create an active countdown state with remaining seconds
    pub fn active(remaining_seconds: u64) -> Self {
        Self {
            active: true,
            remaining_seconds: Some(remaining_seconds),
        }
    }

    /// Check if the countdown is running
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Get remaining seconds if the countdown is running
    pub fn remaining_seconds(&self) -> Option<u64> {
        if self.active {
            self.remaining_seconds
        } else {
            None
        }
    }
}

impl Default for CountdownState {
    fn default() -> Self {
        Self::new()
    }
}
