//! Thin recorders so call sites don't touch metric handles directly

use prometheus::{Encoder, TextEncoder};

use super::{
    AUTH_REJECTED, CLEANUP_FAILURES, CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED, CONNECTIONS_OPENED,
    CONNECTION_DURATION, DELIVERY_FAILURES, MESSAGES_DELIVERED, MESSAGES_PUBLISHED,
    RELAY_PUBLISH_FAILURES, SESSIONS_ISSUED, STORE_ERRORS, SUBSCRIPTION_REQUESTS,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        CONNECTIONS_OPENED.inc();
        CONNECTIONS_ACTIVE.inc();
    }

    pub fn record_closed(reason: &str, duration_secs: f64) {
        CONNECTIONS_CLOSED.with_label_values(&[reason]).inc();
        CONNECTIONS_ACTIVE.dec();
        CONNECTION_DURATION.observe(duration_secs);
    }

    pub fn record_auth_rejected(reason: &str) {
        AUTH_REJECTED.with_label_values(&[reason]).inc();
    }

    pub fn record_session_issued() {
        SESSIONS_ISSUED.inc();
    }
}

pub struct SubscriptionMetrics;

impl SubscriptionMetrics {
    pub fn record(action: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        SUBSCRIPTION_REQUESTS
            .with_label_values(&[action, outcome])
            .inc();
    }
}

pub struct FanoutMetrics;

impl FanoutMetrics {
    pub fn record_local_publish() {
        MESSAGES_PUBLISHED.with_label_values(&["local"]).inc();
    }

    pub fn record_relay_received() {
        MESSAGES_PUBLISHED.with_label_values(&["relay"]).inc();
    }

    pub fn record_delivered(count: usize) {
        MESSAGES_DELIVERED.inc_by(count as u64);
    }

    pub fn record_failed(count: usize) {
        DELIVERY_FAILURES.inc_by(count as u64);
    }

    pub fn record_relay_failure() {
        RELAY_PUBLISH_FAILURES.inc();
    }
}

pub struct StoreMetrics;

impl StoreMetrics {
    pub fn record_error(operation: &str) {
        STORE_ERRORS.with_label_values(&[operation]).inc();
    }

    pub fn record_cleanup_abandoned() {
        CLEANUP_FAILURES.inc();
    }
}
