use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::handlers::{broadcast, channel_members, issue_token, send_message, set_session};
use super::health::{health, server_info};
use super::metrics::prometheus_metrics;

/// Unauthenticated endpoints at the root
pub fn operational_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/server-info", get(server_info))
        .route("/metrics", get(prometheus_metrics))
        .route("/socket/set-session/{value}", get(set_session))
}

/// Administrative endpoints, nested under `/api` behind the API key check
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/send-message", post(send_message))
        .route("/broadcast", post(broadcast))
        .route("/channels/{channel}/members", get(channel_members))
}

/// Token minting for local clients; never routed unless enabled
pub fn development_routes() -> Router<AppState> {
    Router::new().route("/token", get(issue_token))
}
