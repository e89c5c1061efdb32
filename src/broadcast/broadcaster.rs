use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use crate::channel::{is_valid_channel_name, ChannelIndex};
use crate::connection::{ConnectionId, ConnectionRegistry, DeliveryError};
use crate::membership::{with_timeout, MembershipStore, PresenceEvent, RelayMessage, RelayPayload};
use crate::metrics::FanoutMetrics;
use crate::redis::current_time_ms;
use crate::websocket::{OutboundMessage, ServerMessage};

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Connection {0} not found")]
    ConnectionNotFound(ConnectionId),

    #[error("Delivery to {connection_id} failed: {source}")]
    Delivery {
        connection_id: ConnectionId,
        source: DeliveryError,
    },

    #[error("Invalid channel name: {0}")]
    InvalidChannel(String),
}

/// Local delivery outcome for one message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Result of a publish
#[derive(Debug, Clone, Serialize)]
pub struct PublishResult {
    pub channel: String,
    pub timestamp: i64,
    #[serde(flatten)]
    pub local: DeliveryReport,
    /// Whether the message reached the relay for other processes
    pub relayed: bool,
}

/// Delivers channel messages to subscribed connections.
///
/// Local subscribers are written directly; the same message goes out on the
/// store relay so every other process delivers to its own subscribers.
pub struct Broadcaster {
    server_id: String,
    registry: Arc<ConnectionRegistry>,
    channels: Arc<ChannelIndex>,
    store: Arc<dyn MembershipStore>,
    presence_events: bool,
}

impl Broadcaster {
    pub fn new(
        server_id: impl Into<String>,
        registry: Arc<ConnectionRegistry>,
        channels: Arc<ChannelIndex>,
        store: Arc<dyn MembershipStore>,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            registry,
            channels,
            store,
            presence_events: true,
        }
    }

    pub fn with_presence_events(mut self, enabled: bool) -> Self {
        self.presence_events = enabled;
        self
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Upper bound on relay calls, shared with the channel index
    pub fn store_timeout(&self) -> std::time::Duration {
        self.channels.store_timeout()
    }

    #[instrument(skip(self, data), fields(server_id = %self.server_id))]
    pub async fn publish(&self, channel: &str, data: Value) -> Result<PublishResult, BroadcastError> {
        if !is_valid_channel_name(channel) {
            return Err(BroadcastError::InvalidChannel(channel.to_string()));
        }

        FanoutMetrics::record_local_publish();
        let timestamp = current_time_ms();
        let local = self.deliver_local(channel, data.clone(), timestamp);

        let relay = RelayMessage::new(channel, data, timestamp, self.server_id.as_str());
        let relayed = self.relay(&relay).await;

        tracing::debug!(
            delivered = local.delivered,
            failed = local.failed,
            relayed,
            "Published channel message"
        );

        Ok(PublishResult {
            channel: channel.to_string(),
            timestamp,
            local,
            relayed,
        })
    }

    /// Tell the channel's other members that `connection` joined or left.
    /// The connection itself is not notified.
    #[instrument(skip(self), fields(server_id = %self.server_id))]
    pub async fn publish_presence(
        &self,
        channel: &str,
        event: PresenceEvent,
        user_id: &str,
        connection: &ConnectionId,
    ) -> DeliveryReport {
        if !self.presence_events {
            return DeliveryReport::default();
        }

        let timestamp = current_time_ms();
        let envelope = ServerMessage::presence(channel, event, user_id, connection.as_str(), timestamp);
        let local = self.fanout(channel, &envelope, Some(connection));

        let relay = RelayMessage::presence(
            channel,
            event,
            user_id,
            connection.as_str(),
            timestamp,
            self.server_id.as_str(),
        );
        self.relay(&relay).await;

        local
    }

    async fn relay(&self, message: &RelayMessage) -> bool {
        let publish = self.store.publish_relay(message);
        match with_timeout(self.store_timeout(), "publish_relay", publish).await {
            Ok(()) => true,
            Err(e) => {
                FanoutMetrics::record_relay_failure();
                tracing::warn!(error = %e, "Relay publish failed, remote subscribers will miss this message");
                false
            }
        }
    }

    /// Deliver a message that arrived over the relay. Our own publishes are
    /// skipped since they were already delivered locally.
    pub fn handle_relay(&self, message: RelayMessage) -> DeliveryReport {
        if message.origin == self.server_id {
            return DeliveryReport::default();
        }

        FanoutMetrics::record_relay_received();
        let report = match message.payload {
            RelayPayload::Message { data } => {
                self.deliver_local(&message.channel, data, message.timestamp)
            }
            RelayPayload::Presence {
                event,
                user_id,
                connection_id,
            } => {
                let envelope = ServerMessage::presence(
                    message.channel.as_str(),
                    event,
                    user_id,
                    connection_id,
                    message.timestamp,
                );
                self.fanout(&message.channel, &envelope, None)
            }
        };

        tracing::debug!(
            origin = %message.origin,
            channel = %message.channel,
            delivered = report.delivered,
            "Handled relay message"
        );
        report
    }

    /// Write to every local subscriber without waiting on any of them. A
    /// connection that cannot take the message is closed.
    pub fn deliver_local(&self, channel: &str, data: Value, timestamp: i64) -> DeliveryReport {
        let envelope = ServerMessage::channel_message(channel, data, timestamp);
        self.fanout(channel, &envelope, None)
    }

    fn fanout(
        &self,
        channel: &str,
        envelope: &ServerMessage,
        exclude: Option<&ConnectionId>,
    ) -> DeliveryReport {
        let subscribers = self.channels.local_subscribers(channel);
        if subscribers.is_empty() {
            return DeliveryReport::default();
        }

        let outbound = match OutboundMessage::preserialize(envelope) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!(error = %e, channel = %channel, "Failed to serialize channel message");
                return DeliveryReport::default();
            }
        };

        let mut report = DeliveryReport::default();
        for id in subscribers {
            if exclude == Some(&id) {
                continue;
            }
            let Some(connection) = self.registry.lookup(&id) else {
                continue;
            };

            match connection.try_deliver(outbound.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::debug!(connection_id = %id, error = %e, "Delivery failed, closing connection");
                    connection.request_close();
                }
            }
        }

        FanoutMetrics::record_delivered(report.delivered);
        FanoutMetrics::record_failed(report.failed);
        report
    }

    /// Direct `message` envelope to one connection held by this process
    pub fn send_to_connection(&self, id: &ConnectionId, data: Value) -> Result<(), BroadcastError> {
        let connection = self
            .registry
            .lookup(id)
            .ok_or_else(|| BroadcastError::ConnectionNotFound(id.clone()))?;

        let message = ServerMessage::Message {
            data,
            timestamp: current_time_ms(),
        };

        connection
            .try_deliver(OutboundMessage::Envelope(message))
            .map_err(|source| {
                connection.request_close();
                BroadcastError::Delivery {
                    connection_id: id.clone(),
                    source,
                }
            })?;

        FanoutMetrics::record_delivered(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Claims, Principal};
    use crate::channel::CleanupPolicy;
    use crate::connection::ConnectionHandle;
    use crate::membership::testing::HangingStore;
    use crate::membership::MemoryMembershipStore;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        channels: Arc<ChannelIndex>,
        broadcaster: Broadcaster,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn MembershipStore> = Arc::new(MemoryMembershipStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let channels = Arc::new(ChannelIndex::new(store.clone(), CleanupPolicy::default()));
        let broadcaster = Broadcaster::new("gw-test", registry.clone(), channels.clone(), store);
        Fixture {
            registry,
            channels,
            broadcaster,
        }
    }

    fn connect(
        registry: &ConnectionRegistry,
        buffer: usize,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(buffer);
        let handle = Arc::new(ConnectionHandle::new(
            ConnectionId::generate(),
            Principal::from_claims(Claims::new("tester", i64::MAX)),
            "session".into(),
            tx,
        ));
        registry.register(handle.clone()).unwrap();
        (handle, rx)
    }

    fn text(message: OutboundMessage) -> Value {
        match message {
            OutboundMessage::Serialized(json) => serde_json::from_str(json.as_str()).unwrap(),
            OutboundMessage::Envelope(envelope) => serde_json::to_value(envelope).unwrap(),
            OutboundMessage::Ping => panic!("unexpected ping"),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers_only() {
        let f = fixture();
        let (alice, mut alice_rx) = connect(&f.registry, 8);
        let (_bob, mut bob_rx) = connect(&f.registry, 8);

        f.channels.subscribe(&alice, "room1").await.unwrap();

        let result = f.broadcaster.publish("room1", json!({"data": "hi"})).await.unwrap();
        assert_eq!(result.local, DeliveryReport { delivered: 1, failed: 0 });
        assert!(result.relayed);

        let received = text(alice_rx.recv().await.unwrap());
        assert_eq!(received["type"], "channel_message");
        assert_eq!(received["channelId"], "room1");
        assert_eq!(received["data"], json!({"data": "hi"}));
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_buffer_closes_connection() {
        let f = fixture();
        let (conn, _rx) = connect(&f.registry, 1);
        f.channels.subscribe(&conn, "room1").await.unwrap();

        f.broadcaster.publish("room1", json!(1)).await.unwrap();
        let result = f.broadcaster.publish("room1", json!(2)).await.unwrap();

        assert_eq!(result.local, DeliveryReport { delivered: 0, failed: 1 });
        assert!(conn.is_close_requested());
    }

    #[tokio::test]
    async fn test_own_relay_echo_is_ignored() {
        let f = fixture();
        let (conn, mut rx) = connect(&f.registry, 8);
        f.channels.subscribe(&conn, "room1").await.unwrap();

        let own = RelayMessage::new("room1", json!("x"), 1, "gw-test");
        assert_eq!(f.broadcaster.handle_relay(own), DeliveryReport::default());
        assert!(rx.try_recv().is_err());

        let remote = RelayMessage::new("room1", json!("y"), 2, "gw-other");
        assert_eq!(f.broadcaster.handle_relay(remote).delivered, 1);
        assert_eq!(text(rx.recv().await.unwrap())["data"], "y");
    }

    #[tokio::test]
    async fn test_send_to_connection() {
        let f = fixture();
        let (conn, mut rx) = connect(&f.registry, 8);

        f.broadcaster.send_to_connection(&conn.id, json!({"hello": 1})).unwrap();
        let received = text(rx.recv().await.unwrap());
        assert_eq!(received["type"], "message");
        assert_eq!(received["data"], json!({"hello": 1}));

        let missing = ConnectionId::from("conn_missing");
        assert!(matches!(
            f.broadcaster.send_to_connection(&missing, json!(null)),
            Err(BroadcastError::ConnectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_channel() {
        let f = fixture();
        assert!(matches!(
            f.broadcaster.publish("no spaces", json!(null)).await,
            Err(BroadcastError::InvalidChannel(_))
        ));
    }

    #[tokio::test]
    async fn test_presence_reaches_other_members_only() {
        let f = fixture();
        let (alice, mut alice_rx) = connect(&f.registry, 8);
        let (bob, mut bob_rx) = connect(&f.registry, 8);
        f.channels.subscribe(&alice, "room1").await.unwrap();
        f.channels.subscribe(&bob, "room1").await.unwrap();

        let report = f
            .broadcaster
            .publish_presence("room1", PresenceEvent::Joined, "bob", &bob.id)
            .await;
        assert_eq!(report, DeliveryReport { delivered: 1, failed: 0 });

        let received = text(alice_rx.recv().await.unwrap());
        assert_eq!(received["type"], "presence");
        assert_eq!(received["event"], "joined");
        assert_eq!(received["userId"], "bob");
        assert_eq!(received["connectionId"], bob.id.as_str());
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_presence_can_be_disabled() {
        let store: Arc<dyn MembershipStore> = Arc::new(MemoryMembershipStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let channels = Arc::new(ChannelIndex::new(store.clone(), CleanupPolicy::default()));
        let broadcaster = Broadcaster::new("gw-test", registry.clone(), channels.clone(), store)
            .with_presence_events(false);
        let (alice, mut alice_rx) = connect(&registry, 8);
        channels.subscribe(&alice, "room1").await.unwrap();

        let other = ConnectionId::generate();
        let report = broadcaster
            .publish_presence("room1", PresenceEvent::Left, "bob", &other)
            .await;
        assert_eq!(report, DeliveryReport::default());
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remote_presence_is_delivered() {
        let f = fixture();
        let (conn, mut rx) = connect(&f.registry, 8);
        f.channels.subscribe(&conn, "room1").await.unwrap();

        let remote = RelayMessage::presence("room1", PresenceEvent::Left, "carol", "conn_far", 3, "gw-other");
        assert_eq!(f.broadcaster.handle_relay(remote).delivered, 1);

        let received = text(rx.recv().await.unwrap());
        assert_eq!(received["type"], "presence");
        assert_eq!(received["event"], "left");
        assert_eq!(received["connectionId"], "conn_far");
        assert_eq!(received["timestamp"], 3);
    }

    #[tokio::test]
    async fn test_hanging_relay_does_not_stall_publish() {
        let store: Arc<dyn MembershipStore> = Arc::new(HangingStore);
        let registry = Arc::new(ConnectionRegistry::new());
        let policy = CleanupPolicy {
            store_timeout: Duration::from_millis(50),
            ..CleanupPolicy::default()
        };
        let channels = Arc::new(ChannelIndex::new(store.clone(), policy));
        let broadcaster = Broadcaster::new("gw-test", registry, channels, store);

        let result = tokio::time::timeout(Duration::from_secs(3), broadcaster.publish("room1", json!(1)))
            .await
            .expect("publish must not wait on a hanging relay")
            .unwrap();
        assert!(!result.relayed);
    }
}
