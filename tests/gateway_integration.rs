//! Gateway integration tests
//!
//! Drive connection lifecycles against in-memory stores without a socket.
//! Two `AppState`s sharing one store stand in for two gateway processes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

use channel_gateway::auth::{Claims, Principal};
use channel_gateway::config::Settings;
use channel_gateway::connection::{ConnectionHandle, ConnectionId};
use channel_gateway::membership::{
    MemoryMembershipStore, MembershipStore, RelayMessage, RelayStream, StoreBackend, StoreError,
};
use channel_gateway::server::AppState;
use channel_gateway::websocket::{
    CloseReason, ConnectionEvent, ConnectionLifecycle, Flow, InboundFrame, LifecycleState,
    OutboundMessage,
};

struct TestClient {
    lifecycle: ConnectionLifecycle,
    handle: Arc<ConnectionHandle>,
    rx: mpsc::Receiver<OutboundMessage>,
}

impl TestClient {
    fn new(state: &AppState, name: &str, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        let handle = Arc::new(ConnectionHandle::new(
            ConnectionId::generate(),
            Principal::from_claims(Claims::new(name, i64::MAX)),
            "session-1".to_string(),
            tx,
        ));
        let lifecycle = ConnectionLifecycle::new(
            handle.clone(),
            state.registry.clone(),
            state.channels.clone(),
            state.broadcaster.clone(),
        );
        Self { lifecycle, handle, rx }
    }

    async fn connect(state: &AppState) -> Self {
        Self::connect_as(state, "tester").await
    }

    async fn connect_as(state: &AppState, name: &str) -> Self {
        let mut client = Self::new(state, name, 32);
        assert_eq!(client.lifecycle.handle_event(ConnectionEvent::Connect).await, Flow::Continue);
        let welcome = client.next().await;
        assert_eq!(welcome["type"], "connection_success");
        assert_eq!(welcome["serverId"], state.server_id());
        client
    }

    async fn send_text(&mut self, text: &str) -> Flow {
        self.lifecycle
            .handle_event(ConnectionEvent::Message(InboundFrame::Text(text.to_string())))
            .await
    }

    async fn listen(&mut self, channel: &str) -> Value {
        self.send_text(&json!({"action": "listen", "channel": channel}).to_string())
            .await;
        self.next().await
    }

    async fn disconnect(&mut self) {
        self.lifecycle
            .handle_event(ConnectionEvent::Disconnect(CloseReason::ClientClosed))
            .await;
    }

    async fn next(&mut self) -> Value {
        let message = tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("connection channel closed");
        decode(message)
    }

    /// Next message that is not a presence announcement
    async fn next_data(&mut self) -> Value {
        loop {
            let message = self.next().await;
            if message["type"] != "presence" {
                return message;
            }
        }
    }

    async fn nothing_within(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.rx.recv()).await.is_err()
    }
}

fn decode(message: OutboundMessage) -> Value {
    match message {
        OutboundMessage::Envelope(envelope) => serde_json::to_value(envelope).unwrap(),
        OutboundMessage::Serialized(text) => serde_json::from_str(text.as_str()).unwrap(),
        OutboundMessage::Ping => json!({"type": "__ping"}),
    }
}

fn cluster_of_two() -> (AppState, AppState, Arc<MemoryMembershipStore>) {
    let store = Arc::new(MemoryMembershipStore::new());
    let a = AppState::with_store(Settings::local("secret"), store.clone());
    let b = AppState::with_store(Settings::local("secret"), store.clone());
    (a, b, store)
}

#[tokio::test]
async fn test_listen_then_publish_delivers_channel_message() {
    let (state, _, store) = cluster_of_two();
    let mut client = TestClient::connect(&state).await;

    let ack = client.listen("room1").await;
    assert_eq!(ack["type"], "subscription_success");
    assert_eq!(ack["channel"], "room1");
    assert_eq!(ack["connectionId"], client.handle.id.as_str());

    let members = store.channel_members("room1").await.unwrap();
    assert_eq!(members.get(&client.handle.id), ack["timestamp"].as_i64().as_ref());

    let result = state.broadcaster.publish("room1", json!({"data": "hi"})).await.unwrap();
    assert_eq!(result.local.delivered, 1);

    let message = client.next().await;
    assert_eq!(message["type"], "channel_message");
    assert_eq!(message["channelId"], "room1");
    assert_eq!(message["data"], json!({"data": "hi"}));
}

#[tokio::test]
async fn test_publish_reaches_subscribers_on_other_process() {
    let (a, b, _) = cluster_of_two();
    let (shutdown_tx, _) = broadcast::channel(1);
    let relay_a = a.relay_subscriber(shutdown_tx.subscribe()).start().await;
    let relay_b = b.relay_subscriber(shutdown_tx.subscribe()).start().await;

    let mut on_a = TestClient::connect(&a).await;
    let mut on_b = TestClient::connect(&b).await;
    on_a.listen("room1").await;
    on_b.listen("room1").await;

    // b's join reaches a over the relay before anything is published
    let joined = on_a.next().await;
    assert_eq!(joined["type"], "presence");
    assert_eq!(joined["connectionId"], on_b.handle.id.as_str());

    let result = a.broadcaster.publish("room1", json!({"n": 1})).await.unwrap();
    assert_eq!(result.local.delivered, 1);
    assert!(result.relayed);

    assert_eq!(on_a.next().await["data"], json!({"n": 1}));
    assert_eq!(on_b.next_data().await["data"], json!({"n": 1}));

    // The origin process must not deliver its own relay echo a second time
    assert!(on_a.nothing_within(Duration::from_millis(200)).await);

    shutdown_tx.send(()).unwrap();
    let _ = relay_a.await;
    let _ = relay_b.await;
}

#[tokio::test]
async fn test_presence_crosses_processes() {
    let (a, b, _) = cluster_of_two();
    let (shutdown_tx, _) = broadcast::channel(1);
    let relay_a = a.relay_subscriber(shutdown_tx.subscribe()).start().await;
    let relay_b = b.relay_subscriber(shutdown_tx.subscribe()).start().await;

    let mut watcher = TestClient::connect_as(&a, "watcher").await;
    watcher.listen("lobby").await;
    let mut mover = TestClient::connect_as(&b, "mover").await;

    mover.listen("lobby").await;
    let joined = watcher.next().await;
    assert_eq!(joined["type"], "presence");
    assert_eq!(joined["channelId"], "lobby");
    assert_eq!(joined["event"], "joined");
    assert_eq!(joined["userId"], "mover");
    assert!(joined["timestamp"].as_i64().unwrap() > 0);

    mover
        .send_text(r#"{"action":"unsubscribe","channel":"lobby"}"#)
        .await;
    // The watcher's own join may also have reached the mover by now
    assert_eq!(mover.next_data().await["type"], "unsubscribe_success");
    let left = watcher.next().await;
    assert_eq!(left["event"], "left");
    assert_eq!(left["connectionId"], mover.handle.id.as_str());

    // Closing the connection does not announce anything further
    mover.disconnect().await;
    assert!(watcher.nothing_within(Duration::from_millis(200)).await);

    shutdown_tx.send(()).unwrap();
    let _ = relay_a.await;
    let _ = relay_b.await;
}

#[tokio::test]
async fn test_disconnect_removes_every_membership() {
    let (state, _, store) = cluster_of_two();
    let mut client = TestClient::connect(&state).await;
    client.listen("room1").await;
    client.listen("room2").await;
    assert_eq!(store.connection_channels(&client.handle.id).await.unwrap().len(), 2);

    client.disconnect().await;

    assert_eq!(client.lifecycle.state(), LifecycleState::Closed);
    assert!(state.registry.lookup(&client.handle.id).is_none());
    assert!(store.channel_members("room1").await.unwrap().is_empty());
    assert!(store.channel_members("room2").await.unwrap().is_empty());
    assert!(store.connection_channels(&client.handle.id).await.unwrap().is_empty());
    assert!(state.channels.local_subscribers("room1").is_empty());

    // A second disconnect is a no-op
    client.disconnect().await;
    assert_eq!(client.lifecycle.state(), LifecycleState::Closed);
}

#[tokio::test]
async fn test_repeated_listen_and_unsubscribe_are_idempotent() {
    let (state, _, store) = cluster_of_two();
    let mut client = TestClient::connect(&state).await;

    assert_eq!(client.listen("room1").await["type"], "subscription_success");
    assert_eq!(client.listen("room1").await["type"], "subscription_success");
    assert_eq!(store.channel_members("room1").await.unwrap().len(), 1);

    for _ in 0..2 {
        client
            .send_text(r#"{"action":"unsubscribe","channel":"room1"}"#)
            .await;
        let reply = client.next().await;
        assert_eq!(reply["type"], "unsubscribe_success");
        assert_eq!(reply["channel"], "room1");
    }
    assert!(store.channel_members("room1").await.unwrap().is_empty());

    let result = state.broadcaster.publish("room1", json!("late")).await.unwrap();
    assert_eq!(result.local.delivered, 0);
    assert!(client.nothing_within(Duration::from_millis(100)).await);
}

#[tokio::test]
async fn test_bad_input_keeps_connection_open() {
    let (state, _, _) = cluster_of_two();
    let mut client = TestClient::connect(&state).await;

    assert_eq!(client.send_text("not json").await, Flow::Continue);
    let reply = client.next().await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["connectionId"], client.handle.id.as_str());

    assert_eq!(client.send_text(r#"{"action":"listen"}"#).await, Flow::Continue);
    assert_eq!(client.next().await["type"], "error");

    let reply = client.listen("bad channel!").await;
    assert_eq!(reply["type"], "error");

    assert_eq!(client.send_text(r#"{"action":"ping"}"#).await, Flow::Continue);
    assert_eq!(client.next().await["type"], "pong");

    assert_eq!(client.lifecycle.state(), LifecycleState::Open);
}

#[tokio::test]
async fn test_direct_send_reaches_only_target() {
    let (state, _, _) = cluster_of_two();
    let mut target = TestClient::connect(&state).await;
    let mut other = TestClient::connect(&state).await;

    state
        .broadcaster
        .send_to_connection(&target.handle.id, json!({"hello": "you"}))
        .unwrap();

    let message = target.next().await;
    assert_eq!(message["type"], "message");
    assert_eq!(message["data"], json!({"hello": "you"}));
    assert!(other.nothing_within(Duration::from_millis(100)).await);

    let missing = ConnectionId::from("conn_missing");
    assert!(state.broadcaster.send_to_connection(&missing, json!(1)).is_err());
}

/// Store whose every operation fails
struct UnavailableStore;

fn unavailable() -> StoreError {
    StoreError::Unavailable("store offline".to_string())
}

#[async_trait]
impl MembershipStore for UnavailableStore {
    fn backend_type(&self) -> StoreBackend {
        StoreBackend::Redis
    }

    async fn add_channel_member(&self, _: &str, _: &ConnectionId, _: i64) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn remove_channel_member(&self, _: &str, _: &ConnectionId) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn channel_members(&self, _: &str) -> Result<HashMap<ConnectionId, i64>, StoreError> {
        Err(unavailable())
    }

    async fn add_connection_channel(&self, _: &ConnectionId, _: &str) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn remove_connection_channel(&self, _: &ConnectionId, _: &str) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn connection_channels(&self, _: &ConnectionId) -> Result<HashSet<String>, StoreError> {
        Err(unavailable())
    }

    async fn delete_connection(&self, _: &ConnectionId) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn publish_relay(&self, _: &RelayMessage) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn relay_stream(&self) -> Result<RelayStream, StoreError> {
        Err(unavailable())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(unavailable())
    }
}

#[tokio::test]
async fn test_store_outage_surfaces_as_error_envelope() {
    let mut settings = Settings::local("secret");
    settings.membership.cleanup_max_attempts = 2;
    settings.membership.cleanup_backoff_ms = 1;
    let state = AppState::with_store(settings, Arc::new(UnavailableStore));
    let mut client = TestClient::connect(&state).await;

    let reply = client.listen("room1").await;
    assert_eq!(reply["type"], "error");
    assert!(reply["message"].as_str().unwrap().contains("membership store unavailable"));
    assert!(state.channels.local_subscribers("room1").is_empty());
    assert_eq!(client.lifecycle.state(), LifecycleState::Open);

    // Relay failure does not stop local delivery
    let result = state.broadcaster.publish("room1", json!(1)).await.unwrap();
    assert!(!result.relayed);

    // Cleanup is best effort; the connection still leaves the registry
    client.disconnect().await;
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn test_close_request_with_stalled_reader_still_cleans_up() {
    let (state, _, store) = cluster_of_two();
    // One slot, filled by the welcome that nobody reads
    let mut client = TestClient::new(&state, "stalled", 1);
    assert_eq!(client.lifecycle.handle_event(ConnectionEvent::Connect).await, Flow::Continue);
    client.handle.request_close();

    let flow = tokio::time::timeout(
        Duration::from_secs(2),
        client.send_text(r#"{"action":"listen","channel":"room1"}"#),
    )
    .await
    .expect("a closing connection must not block on its own buffer");

    assert_eq!(flow, Flow::Close);
    assert!(state.registry.lookup(&client.handle.id).is_none());
    assert!(store.channel_members("room1").await.unwrap().is_empty());
    assert!(store.connection_channels(&client.handle.id).await.unwrap().is_empty());
}
