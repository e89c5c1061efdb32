//! HTTP surface next to the WebSocket endpoint
//!
//! - Operational: health, server info, Prometheus metrics, session pinning
//! - Administrative (`/api`): direct sends, channel broadcast, membership listing
//! - Development: `/token`, when enabled in configuration

mod handlers;
mod health;
mod metrics;
mod routes;

pub use handlers::{broadcast, channel_members, issue_token, send_message, set_session};
pub use health::{health, server_info};
pub use metrics::prometheus_metrics;
pub use routes::{admin_routes, development_routes, operational_routes};
