use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use channel_gateway::config::Settings;
use channel_gateway::membership::MembershipStore;
use channel_gateway::server::{create_app, serve_with_drain, AppState};
use channel_gateway::shutdown::GracefulShutdown;
use channel_gateway::tasks::HeartbeatTask;
use channel_gateway::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;
    let _telemetry = init_telemetry(&settings.otel, settings.server.json_logs)?;
    tracing::info!(server_id = %settings.membership.server_id, "Configuration loaded");

    let state = AppState::new(settings.clone())?;
    tracing::info!(backend = state.store.backend_type().as_str(), "Application state initialized");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Subscribe to the relay before accepting connections
    let relay_handle = state.relay_subscriber(shutdown_tx.subscribe()).start().await;

    let heartbeat_task = HeartbeatTask::new(
        settings.websocket.clone(),
        state.registry.clone(),
        state.store.clone(),
        shutdown_tx.subscribe(),
    );
    let heartbeat_handle = tokio::spawn(async move {
        heartbeat_task.run().await;
    });

    let graceful = GracefulShutdown::new(
        state.registry.clone(),
        state.channels.clone(),
        shutdown_tx.clone(),
    );

    let app = create_app(state);
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Channel gateway listening");

    serve_with_drain(listener, app, graceful, shutdown_signal()).await?;

    let _ = relay_handle.await;
    let _ = heartbeat_handle.await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            "interrupt"
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
            "terminate"
        }
    }
}
