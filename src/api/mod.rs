//! HTTP API module
//!
//! This module contains all HTTP endpoint handlers and response structures.

pub mod handlers;
pub mod responses;

use std::{sync::Arc, time::Instant};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::ShutdownCoordinator;
use handlers::*;

/// Shared state handed to every endpoint handler.
pub struct AppContext {
    pub coordinator: Arc<ShutdownCoordinator>,
    pub start_time: Instant,
    pub port: u16,
    pub host: String,
}

impl AppContext {
    pub fn new(coordinator: Arc<ShutdownCoordinator>, port: u16, host: String) -> Self {
        Self {
            coordinator,
            start_time: Instant::now(),
            port,
            host,
        }
    }

    /// Calculate server uptime as a formatted string
    pub fn uptime(&self) -> String {
        let duration = self.start_time.elapsed();
        let hours = duration.as_secs() / 3600;
        let minutes = (duration.as_secs() % 3600) / 60;
        let seconds = duration.as_secs() % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }
}

/// Create the HTTP router with all endpoints
pub fn create_router(context: Arc<AppContext>) -> Router {
    Router::new()
        .route("/suspend-on", post(suspend_on_handler))
        .route("/suspend-off", post(suspend_off_handler))
        .route("/cancel-on", post(cancel_on_handler))
        .route("/cancel-off", post(cancel_off_handler))
        .route("/display-on", post(display_on_handler))
        .route("/display-off", post(display_off_handler))
        .route("/awake-on", post(awake_on_handler))
        .route("/awake-off", post(awake_off_handler))
        .route("/query", post(query_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}
