//! API response structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::StateSnapshot;

/// API response structure for toggle and query endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub state: StateSnapshot,
}

impl ApiResponse {
    /// Create a new API response
    pub fn new(status: String, message: String, state: StateSnapshot) -> Self {
        Self {
            status,
            message,
            timestamp: Utc::now(),
            state,
        }
    }

    /// Create an active response
    pub fn active(message: String, state: StateSnapshot) -> Self {
        Self::new("active".to_string(), message, state)
    }

    /// Create an inactive response
    pub fn inactive(message: String, state: StateSnapshot) -> Self {
        Self::new("inactive".to_string(), message, state)
    }
}

/// Body accepted by the synthetic shutdown-query endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Deliver the query with the critical flag set
    #[serde(default)]
    pub critical: bool,
}

/// Result of delivering a shutdown query through the message filter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub handled: bool,
    pub timestamp: DateTime<Utc>,
    pub state: StateSnapshot,
}

/// Status response with countdown information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: StateSnapshot,
    pub countdown_active: bool,
    pub countdown_remaining_seconds: Option<u64>,
    pub uptime: String,
    pub port: u16,
    pub host: String,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl HealthResponse {
    /// Create a new health response
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
