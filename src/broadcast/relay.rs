//! Background task feeding relay messages from other processes into the
//! local broadcaster

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::membership::{with_timeout, MembershipStore, RelayStream, StoreError};
use crate::redis::{BackoffConfig, ExponentialBackoff};

use super::Broadcaster;

pub struct RelaySubscriber {
    broadcaster: Arc<Broadcaster>,
    store: Arc<dyn MembershipStore>,
    backoff: BackoffConfig,
    shutdown: broadcast::Receiver<()>,
}

impl RelaySubscriber {
    pub fn new(
        broadcaster: Arc<Broadcaster>,
        store: Arc<dyn MembershipStore>,
        backoff: BackoffConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            broadcaster,
            store,
            backoff,
            shutdown,
        }
    }

    /// Subscribe, then run the receive loop in the background. Once this
    /// returns, publishes from other processes are already being received
    /// unless the first subscribe attempt failed.
    pub async fn start(self) -> JoinHandle<()> {
        let initial = match self.subscribe().await {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!(error = %e, "Initial relay subscription failed, retrying in background");
                None
            }
        };

        tokio::spawn(self.run(initial))
    }

    async fn run(mut self, mut pending: Option<RelayStream>) {
        tracing::info!(
            server_id = %self.broadcaster.server_id(),
            backend = self.store.backend_type().as_str(),
            "Relay subscriber starting"
        );

        let mut backoff = ExponentialBackoff::with_config(self.backoff.clone());

        loop {
            let stream = match pending.take() {
                Some(stream) => Ok(stream),
                None => self.subscribe().await,
            };

            let outcome = match stream {
                Ok(stream) => {
                    backoff.reset();
                    self.consume(stream).await
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    tracing::info!("Relay subscriber stopped gracefully");
                    break;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::error!(
                        error = %e,
                        retry_delay_ms = delay.as_millis() as u64,
                        attempt = backoff.attempt(),
                        "Relay subscription lost, reconnecting"
                    );

                    tokio::select! {
                        _ = self.shutdown.recv() => {
                            tracing::info!("Shutdown requested during relay reconnect delay");
                            break;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn subscribe(&self) -> Result<RelayStream, StoreError> {
        let limit = self.broadcaster.store_timeout();
        with_timeout(limit, "relay_stream", self.store.relay_stream()).await
    }

    /// Ok on shutdown, Err when the stream ends underneath us
    async fn consume(&mut self, mut stream: RelayStream) -> Result<(), StoreError> {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.recv() => {
                    return Ok(());
                }

                message = stream.next() => {
                    match message {
                        Some(message) => {
                            self.broadcaster.handle_relay(message);
                        }
                        None => {
                            return Err(StoreError::Unavailable("relay stream ended".to_string()));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Claims, Principal};
    use crate::channel::{ChannelIndex, CleanupPolicy};
    use crate::connection::{ConnectionHandle, ConnectionId, ConnectionRegistry};
    use crate::membership::testing::HangingStore;
    use crate::membership::{MemoryMembershipStore, RelayMessage};
    use crate::websocket::OutboundMessage;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_remote_publish_is_delivered_and_shutdown_stops_task() {
        let store: Arc<dyn MembershipStore> = Arc::new(MemoryMembershipStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let channels = Arc::new(ChannelIndex::new(store.clone(), CleanupPolicy::default()));
        let broadcaster = Arc::new(Broadcaster::new(
            "gw-local",
            registry.clone(),
            channels.clone(),
            store.clone(),
        ));

        let (tx, mut rx) = mpsc::channel(8);
        let conn = Arc::new(ConnectionHandle::new(
            ConnectionId::generate(),
            Principal::from_claims(Claims::new("tester", i64::MAX)),
            "session".into(),
            tx,
        ));
        registry.register(conn.clone()).unwrap();
        channels.subscribe(&conn, "room1").await.unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = RelaySubscriber::new(broadcaster, store.clone(), BackoffConfig::default(), shutdown_rx)
            .start()
            .await;

        store
            .publish_relay(&RelayMessage::new("room1", json!("remote"), 1, "gw-remote"))
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(received, OutboundMessage::Serialized(_)));

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_hanging_subscribe_does_not_block_start_or_shutdown() {
        let store: Arc<dyn MembershipStore> = Arc::new(HangingStore);
        let policy = CleanupPolicy {
            store_timeout: Duration::from_millis(50),
            ..CleanupPolicy::default()
        };
        let channels = Arc::new(ChannelIndex::new(store.clone(), policy));
        let broadcaster = Arc::new(Broadcaster::new(
            "gw-local",
            Arc::new(ConnectionRegistry::new()),
            channels,
            store.clone(),
        ));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::time::timeout(
            Duration::from_secs(3),
            RelaySubscriber::new(broadcaster, store, BackoffConfig::default(), shutdown_rx).start(),
        )
        .await
        .expect("start must give up on a hanging store");

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .expect("relay task must stop on shutdown")
            .unwrap();
    }
}
