use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::config::WebSocketConfig;
use crate::connection::ConnectionRegistry;
use crate::membership::MembershipStore;
use crate::metrics::STORE_HEALTHY;
use crate::websocket::OutboundMessage;

/// Background task for keepalive pings, idle connection sweeps and store
/// reachability checks
pub struct HeartbeatTask {
    config: WebSocketConfig,
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn MembershipStore>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn MembershipStore>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval.max(1));
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval.max(1));
        let connection_timeout = self.config.connection_timeout;

        let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);
        let mut cleanup_timer = tokio::time::interval(cleanup_interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;
        cleanup_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            cleanup_interval_secs = self.config.cleanup_interval,
            connection_timeout_secs = connection_timeout,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    self.send_heartbeats();
                    self.check_store().await;
                }
                _ = cleanup_timer.tick() => {
                    self.close_idle_connections(connection_timeout);
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    /// Queue a ping on every connection. A connection that cannot take it is
    /// closed, same as a failed fanout delivery.
    fn send_heartbeats(&self) -> usize {
        let connections = self.registry.all();
        if connections.is_empty() {
            return 0;
        }

        let start = Instant::now();
        let mut sent = 0;
        let mut failed = 0;

        for handle in connections {
            match handle.try_deliver(OutboundMessage::Ping) {
                Ok(()) => sent += 1,
                Err(e) => {
                    failed += 1;
                    tracing::debug!(
                        connection_id = %handle.id,
                        error = %e,
                        "Failed to queue heartbeat, closing connection"
                    );
                    handle.request_close();
                }
            }
        }

        tracing::debug!(
            sent,
            failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Heartbeat round completed"
        );
        sent
    }

    /// Ask connections idle longer than `timeout_secs` to close
    fn close_idle_connections(&self, timeout_secs: u64) -> usize {
        let mut closed = 0;

        for handle in self.registry.all() {
            if handle.idle_seconds() > timeout_secs as i64 {
                tracing::debug!(
                    connection_id = %handle.id,
                    last_activity = %handle.last_activity(),
                    "Closing idle connection"
                );
                handle.request_close();
                closed += 1;
            }
        }

        if closed > 0 {
            tracing::info!(closed, timeout_secs, "Closed idle connections");
        }
        closed
    }

    async fn check_store(&self) {
        match self.store.ping().await {
            Ok(()) => STORE_HEALTHY.set(1),
            Err(e) => {
                STORE_HEALTHY.set(0);
                tracing::warn!(error = %e, "Membership store unreachable");
            }
        }
    }
}
