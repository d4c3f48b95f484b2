//! Last Call - A state-managed HTTP server that holds off system shutdown
//!
//! This is the main entry point for the last-call application.

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use last_call::{
    api::{create_router, AppContext},
    config::Config,
    state::ShutdownCoordinator,
    system::HostSystem,
    tasks::countdown_task,
    utils::shutdown_signal,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing with appropriate log level
    tracing_subscriber::fmt()
        .with_env_filter(format!("last_call={},tower_http=info", config.log_level()))
        .init();

    info!("Starting last-call server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration: host={}, port={}, idle duration={}min",
        config.host, config.port, config.duration
    );

    // Wire the coordinator to the host system collaborator
    let system = Arc::new(HostSystem::new());
    let coordinator = Arc::new(ShutdownCoordinator::new(
        system,
        config.reason.clone(),
        config.restart,
        config.policy(),
    ));
    coordinator.set_duration(config.idle_duration())?;

    // Marshal idle progress events onto the coordinator
    tokio::spawn(countdown_task(Arc::clone(&coordinator)));

    // Create HTTP router with all endpoints
    let context = Arc::new(AppContext::new(
        Arc::clone(&coordinator),
        config.port,
        config.host.clone(),
    ));
    let app = create_router(context);

    // Bind to the specified address
    let addr = config.address();
    let listener = TcpListener::bind(&addr).await?;

    info!("Server running on http://{}", addr);
    info!("Endpoints:");
    info!("  POST /suspend-on  - Intercept OS shutdown requests");
    info!("  POST /suspend-off - Stop intercepting shutdown requests");
    info!("  POST /cancel-on   - Release an in-flight block");
    info!("  POST /cancel-off  - Re-enable blocking");
    info!("  POST /display-on  - Keep the display on");
    info!("  POST /display-off - Let the display turn off");
    info!("  POST /awake-on    - Keep the system awake");
    info!("  POST /awake-off   - Let the system sleep");
    info!("  POST /query       - Deliver a shutdown query");
    info!("  GET  /status      - Check current status and countdown");
    info!("  GET  /health      - Health check");

    // Serve until a shutdown signal goes unintercepted
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = shutdown_signal(Arc::clone(&coordinator)) => {
            info!("Shutdown signal received");
        }
    }

    // Release the block registration and any power requests
    coordinator.close();

    info!("Server shutdown complete");
    Ok(())
}
