//! Graceful shutdown for the gateway.
//!
//! 1. Ask every live connection to close, which runs its normal cleanup
//! 2. Wait (bounded) for the registry to drain
//! 3. Clean up any stragglers directly so the membership store is left tidy
//! 4. Signal background tasks to stop

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::channel::ChannelIndex;
use crate::connection::ConnectionRegistry;

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for connections to close on their own (default: 10 seconds)
    pub drain_timeout: Duration,
    /// Registry poll interval while draining
    pub poll_interval: Duration,
    /// Upper bound on the forced cleanup of a single straggler
    pub cleanup_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            cleanup_timeout: Duration::from_secs(5),
        }
    }
}

pub struct GracefulShutdown {
    registry: Arc<ConnectionRegistry>,
    channels: Arc<ChannelIndex>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        channels: Arc<ChannelIndex>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self::with_config(registry, channels, shutdown_tx, ShutdownConfig::default())
    }

    pub fn with_config(
        registry: Arc<ConnectionRegistry>,
        channels: Arc<ChannelIndex>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            registry,
            channels,
            shutdown_tx,
            config,
        }
    }

    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(total_connections = self.registry.len())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Closing connections");
        result.close_requested = self.request_close_all();

        tracing::info!("Phase 2: Waiting for connections to close");
        result.connections_closed = self.wait_for_connections_to_close().await;

        tracing::info!("Phase 3: Releasing remaining memberships");
        result.forced_cleanups = self.force_cleanup().await;

        tracing::info!("Phase 4: Signaling background tasks to stop");
        let _ = self.shutdown_tx.send(());

        result.duration = start.elapsed();

        tracing::info!(
            close_requested = result.close_requested,
            connections_closed = result.connections_closed,
            forced_cleanups = result.forced_cleanups,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }

    fn request_close_all(&self) -> usize {
        let connections = self.registry.all();
        for handle in &connections {
            handle.request_close();
        }
        connections.len()
    }

    async fn wait_for_connections_to_close(&self) -> usize {
        let initial = self.registry.len();
        if initial == 0 {
            return 0;
        }

        let registry = &self.registry;
        let poll_interval = self.config.poll_interval;
        let wait_future = async {
            while !registry.is_empty() {
                tokio::time::sleep(poll_interval).await;
            }
        };

        let _ = timeout(self.config.drain_timeout, wait_future).await;

        let remaining = self.registry.len();
        if remaining > 0 {
            tracing::warn!(
                remaining_connections = remaining,
                "Some connections did not close gracefully"
            );
        }

        initial.saturating_sub(remaining)
    }

    async fn force_cleanup(&self) -> usize {
        let stragglers = self.registry.all();
        for handle in &stragglers {
            match timeout(self.config.cleanup_timeout, self.channels.cleanup(handle)).await {
                Ok(report) => tracing::debug!(
                    connection_id = %handle.id,
                    channels = report.channels,
                    abandoned = report.abandoned,
                    "Forced connection cleanup"
                ),
                Err(_) => tracing::warn!(
                    connection_id = %handle.id,
                    timeout_ms = self.config.cleanup_timeout.as_millis() as u64,
                    "Forced cleanup timed out, memberships may remain in the store"
                ),
            }
            self.registry.remove(&handle.id);
        }
        stragglers.len()
    }
}

#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Connections asked to close
    pub close_requested: usize,
    /// Connections that closed on their own within the drain timeout
    pub connections_closed: usize,
    /// Connections cleaned up directly after the drain timeout
    pub forced_cleanups: usize,
    pub duration: Duration,
}
