//! Prometheus metrics for the gateway.
//!
//! - Connection lifecycle (active, opened, closed, duration, auth rejections)
//! - Subscription outcomes per action
//! - Fanout (published, relayed, delivered, failed)
//! - Membership store errors, cleanup failures and Redis health

mod helpers;

pub use helpers::{
    encode_metrics, ConnectionMetrics, FanoutMetrics, StoreMetrics, SubscriptionMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "gateway";

lazy_static! {
    // ============================================================================
    // Connections
    // ============================================================================

    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of WebSocket connections held by this process"
    ).unwrap();

    pub static ref CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections accepted"
    ).unwrap();

    pub static ref CONNECTIONS_CLOSED: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed, by reason",
        &["reason"]
    ).unwrap();

    pub static ref CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_connection_duration_seconds", METRIC_PREFIX),
        "Lifetime of WebSocket connections",
        vec![1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0, 14400.0]
    ).unwrap();

    pub static ref AUTH_REJECTED: IntCounterVec = register_int_counter_vec!(
        format!("{}_auth_rejected_total", METRIC_PREFIX),
        "Upgrade requests rejected by the auth gate",
        &["reason"]
    ).unwrap();

    pub static ref SESSIONS_ISSUED: IntCounter = register_int_counter!(
        format!("{}_sessions_issued_total", METRIC_PREFIX),
        "Sticky session cookies minted"
    ).unwrap();

    // ============================================================================
    // Subscriptions
    // ============================================================================

    pub static ref SUBSCRIPTION_REQUESTS: IntCounterVec = register_int_counter_vec!(
        format!("{}_subscription_requests_total", METRIC_PREFIX),
        "Subscription requests by action and outcome",
        &["action", "outcome"]
    ).unwrap();

    // ============================================================================
    // Fanout
    // ============================================================================

    pub static ref MESSAGES_PUBLISHED: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_published_total", METRIC_PREFIX),
        "Messages entering local fanout, by source",
        &["source"]
    ).unwrap();

    pub static ref MESSAGES_DELIVERED: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Messages handed to connection writers"
    ).unwrap();

    pub static ref DELIVERY_FAILURES: IntCounter = register_int_counter!(
        format!("{}_delivery_failures_total", METRIC_PREFIX),
        "Deliveries that found a dead or saturated connection"
    ).unwrap();

    pub static ref RELAY_PUBLISH_FAILURES: IntCounter = register_int_counter!(
        format!("{}_relay_publish_failures_total", METRIC_PREFIX),
        "Publishes that could not be relayed to other processes"
    ).unwrap();

    // ============================================================================
    // Membership store
    // ============================================================================

    pub static ref STORE_ERRORS: IntCounterVec = register_int_counter_vec!(
        format!("{}_store_errors_total", METRIC_PREFIX),
        "Membership store failures by operation",
        &["operation"]
    ).unwrap();

    pub static ref CLEANUP_FAILURES: IntCounter = register_int_counter!(
        format!("{}_cleanup_failures_total", METRIC_PREFIX),
        "Close-time membership removals abandoned after retries"
    ).unwrap();

    pub static ref STORE_HEALTHY: IntGauge = register_int_gauge!(
        format!("{}_store_healthy", METRIC_PREFIX),
        "Membership store reachability (1 = reachable)"
    ).unwrap();

    pub static ref STORE_CIRCUIT_STATE: IntGauge = register_int_gauge!(
        format!("{}_store_circuit_state", METRIC_PREFIX),
        "Circuit breaker state (0 = closed, 1 = open, 2 = half-open)"
    ).unwrap();
}
