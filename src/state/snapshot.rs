//! Observer-facing view of the coordinator state

use serde::{Deserialize, Serialize};

/// Point-in-time view of the coordinator, broadcast on every actual change.
///
/// The `should_block` and `*_visible` fields are derived from the toggles on
/// every snapshot; they are never stored independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Shutdown requests should be intercepted.
    pub suspend_shutdown: bool,
    /// An in-flight block should be released.
    pub cancel_shutdown: bool,
    /// The OS actually asked to end the session.
    pub shutdown_requested: bool,
    pub display_required: bool,
    pub system_required: bool,
    pub should_block: bool,
    pub shutdown_panel_visible: bool,
    pub waiting_visible: bool,
    pub countdown_visible: bool,
    /// Remaining countdown, clamped to zero for display.
    pub countdown_seconds: u64,
    pub countdown: String,
    /// List of current errors for client visibility
    pub errors: Vec<String>,
}

/// Format a second count as `hh:mm:ss`.
pub fn format_countdown(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let seconds = seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_countdown_as_clock_time() {
        assert_eq!(format_countdown(0), "00:00:00");
        assert_eq!(format_countdown(59), "00:00:59");
        assert_eq!(format_countdown(600), "00:10:00");
        assert_eq!(format_countdown(3723), "01:02:03");
    }
}
