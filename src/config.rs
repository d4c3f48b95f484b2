//! Configuration and CLI argument handling

use chrono::TimeDelta;
use clap::Parser;

/// CLI argument parsing structure
#[derive(Parser)]
#[command(name = "last-call")]
#[command(about = "A state-managed HTTP server that holds off system shutdown until the machine is idle")]
#[command(version = "1.1.0")]
pub struct Config {
    /// Port to bind the server to
    #[arg(short, long, default_value = "20667")]
    pub port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Minutes the machine must be idle before a blocked shutdown proceeds
    #[arg(short, long, default_value = "10")]
    pub duration: u64,

    /// Reason shown to the user while shutdown is blocked or the machine is
    /// kept awake
    #[arg(long, default_value = "Waiting for the machine to become idle")]
    pub reason: String,

    /// Restart instead of powering off when the countdown elapses
    #[arg(long)]
    pub restart: bool,

    /// Show the countdown whenever blocking is armed instead of waiting for
    /// an actual shutdown request
    #[arg(long)]
    pub countdown_without_request: bool,

    /// Forget a pending shutdown request when cancel is switched on
    #[arg(long)]
    pub reset_request_on_cancel: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    /// Parse configuration from command line arguments
    pub fn parse() -> Self {
        Parser::parse()
    }

    /// Get the server address as a formatted string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the appropriate log level based on verbose flag
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Idle threshold as a time delta
    pub fn idle_duration(&self) -> TimeDelta {
        TimeDelta::minutes(self.duration as i64)
    }

    /// Countdown policy selected by the policy flags
    pub fn policy(&self) -> CountdownPolicy {
        CountdownPolicy {
            countdown_requires_request: !self.countdown_without_request,
            reset_request_on_cancel: self.reset_request_on_cancel,
        }
    }
}

/// Presentation and latching policy for the shutdown countdown.
///
/// Both knobs cover behaviors that differ between deployments: whether the
/// countdown is shown before a shutdown request actually arrives, and whether
/// a received request is forgotten again when cancel is switched on.
#[derive(Debug, Clone, Copy)]
pub struct CountdownPolicy {
    /// Show the countdown only once a shutdown query arrived.
    pub countdown_requires_request: bool,
    /// Clear `shutdown_requested` when cancel is enabled.
    pub reset_request_on_cancel: bool,
}

impl Default for CountdownPolicy {
    fn default() -> Self {
        Self {
            countdown_requires_request: true,
            reset_request_on_cancel: false,
        }
    }
}
