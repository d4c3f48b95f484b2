//! HTTP endpoint handlers

use std::sync::Arc;
use axum::{extract::State, http::StatusCode, response::Json};
use chrono::Utc;
use tracing::{error, info};

use crate::{
    error::Error,
    system::{ENDSESSION_CRITICAL, INVALID_WINDOW, QUERY_END_SESSION},
};
use super::{
    responses::{ApiResponse, HealthResponse, QueryRequest, QueryResponse, StatusResponse},
    AppContext,
};

fn status_of(error: &Error) -> StatusCode {
    match error {
        Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        Error::Closed(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Handle POST /suspend-on - Arm shutdown interception
pub async fn suspend_on_handler(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<ApiResponse>, StatusCode> {
    match ctx.coordinator.set_suspend_shutdown(true) {
        Ok(state) => {
            info!("Suspend-on endpoint called - shutdown interception armed");
            Ok(Json(ApiResponse::active(
                "Shutdown interception armed".to_string(),
                state,
            )))
        }
        Err(e) => {
            error!("Failed to arm shutdown interception: {}", e);
            Err(status_of(&e))
        }
    }
}

/// Handle POST /suspend-off - Disarm shutdown interception
pub async fn suspend_off_handler(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<ApiResponse>, StatusCode> {
    match ctx.coordinator.set_suspend_shutdown(false) {
        Ok(state) => {
            info!("Suspend-off endpoint called - shutdown interception disarmed");
            Ok(Json(ApiResponse::inactive(
                "Shutdown interception disarmed".to_string(),
                state,
            )))
        }
        Err(e) => {
            error!("Failed to disarm shutdown interception: {}", e);
            Err(status_of(&e))
        }
    }
}

/// Handle POST /cancel-on - Release an in-flight block
pub async fn cancel_on_handler(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<ApiResponse>, StatusCode> {
    match ctx.coordinator.set_cancel_shutdown(true) {
        Ok(state) => {
            info!("Cancel-on endpoint called - block released");
            Ok(Json(ApiResponse::active("Block released".to_string(), state)))
        }
        Err(e) => {
            error!("Failed to release block: {}", e);
            Err(status_of(&e))
        }
    }
}

/// Handle POST /cancel-off - Re-enable blocking
pub async fn cancel_off_handler(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<ApiResponse>, StatusCode> {
    match ctx.coordinator.set_cancel_shutdown(false) {
        Ok(state) => {
            info!("Cancel-off endpoint called - blocking re-enabled");
            Ok(Json(ApiResponse::inactive(
                "Blocking re-enabled".to_string(),
                state,
            )))
        }
        Err(e) => {
            error!("Failed to re-enable blocking: {}", e);
            Err(status_of(&e))
        }
    }
}

/// Handle POST /display-on - Keep the display on
pub async fn display_on_handler(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<ApiResponse>, StatusCode> {
    match ctx.coordinator.set_display_required(true) {
        Ok(state) => {
            info!("Display-on endpoint called - display kept on");
            Ok(Json(ApiResponse::active("Display kept on".to_string(), state)))
        }
        Err(e) => {
            error!("Failed to require the display: {}", e);
            Err(status_of(&e))
        }
    }
}

/// Handle POST /display-off - Let the display turn off again
pub async fn display_off_handler(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<ApiResponse>, StatusCode> {
    match ctx.coordinator.set_display_required(false) {
        Ok(state) => {
            info!("Display-off endpoint called - display requirement dropped");
            Ok(Json(ApiResponse::inactive(
                "Display requirement dropped".to_string(),
                state,
            )))
        }
        Err(e) => {
            error!("Failed to drop the display requirement: {}", e);
            Err(status_of(&e))
        }
    }
}

/// Handle POST /awake-on - Keep the system awake
pub async fn awake_on_handler(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<ApiResponse>, StatusCode> {
    match ctx.coordinator.set_system_required(true) {
        Ok(state) => {
            info!("Awake-on endpoint called - system kept awake");
            Ok(Json(ApiResponse::active("System kept awake".to_string(), state)))
        }
        Err(e) => {
            error!("Failed to require the system: {}", e);
            Err(status_of(&e))
        }
    }
}

/// Handle POST /awake-off - Let the system sleep again
pub async fn awake_off_handler(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<ApiResponse>, StatusCode> {
    match ctx.coordinator.set_system_required(false) {
        Ok(state) => {
            info!("Awake-off endpoint called - system requirement dropped");
            Ok(Json(ApiResponse::inactive(
                "System requirement dropped".to_string(),
                state,
            )))
        }
        Err(e) => {
            error!("Failed to drop the system requirement: {}", e);
            Err(status_of(&e))
        }
    }
}

/// Handle POST /query - Deliver a shutdown query through the message filter
pub async fn query_handler(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<QueryRequest>,
) -> Json<QueryResponse> {
    let lparam = if request.critical { ENDSESSION_CRITICAL } else { 0 };
    let (_, handled) =
        ctx.coordinator
            .process_message(INVALID_WINDOW, QUERY_END_SESSION, 0, lparam);

    info!(
        "Query endpoint called - critical={}, handled={}",
        request.critical, handled
    );
    Json(QueryResponse {
        handled,
        timestamp: Utc::now(),
        state: ctx.coordinator.snapshot(),
    })
}

/// Handle GET /status - Return current coordinator status
pub async fn status_handler(State(ctx): State<Arc<AppContext>>) -> Json<StatusResponse> {
    let countdown = ctx.coordinator.countdown_state();

    Json(StatusResponse {
        state: ctx.coordinator.snapshot(),
        countdown_active: countdown.is_active(),
        countdown_remaining_seconds: countdown.remaining_seconds(),
        uptime: ctx.uptime(),
        port: ctx.port,
        host: ctx.host.clone(),
    })
}

/// Handle GET /health - Health check endpoint
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}
