//! Health check and server info endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub server_id: String,
    pub store: StoreHealthResponse,
    pub connections: ConnectionHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct StoreHealthResponse {
    pub backend: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_state: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionHealthResponse {
    pub total: usize,
    pub local_channels: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let reachable = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Membership store ping failed");
            false
        }
    };

    let (redis_status, circuit_state) = match state.redis_pool {
        Some(ref pool) => {
            let circuit = match pool.circuit_state() {
                crate::redis::CircuitState::Closed => "closed",
                crate::redis::CircuitState::Open => "open",
                crate::redis::CircuitState::HalfOpen => "half_open",
            };
            (
                Some(pool.health().status().as_str().to_string()),
                Some(circuit.to_string()),
            )
        }
        None => (None, None),
    };

    let status = if reachable { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        server_id: state.server_id().to_string(),
        store: StoreHealthResponse {
            backend: state.store.backend_type().as_str().to_string(),
            reachable,
            redis_status,
            circuit_state,
        },
        connections: ConnectionHealthResponse {
            total: state.registry.len(),
            local_channels: state.channels.local_channel_count(),
        },
    })
}

#[derive(Debug, Serialize)]
pub struct ServerInfoResponse {
    pub server_id: String,
    pub version: String,
    pub connections: usize,
}

/// Lets clients confirm which process a sticky session landed on
pub async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        server_id: state.server_id().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connections: state.registry.len(),
    })
}
