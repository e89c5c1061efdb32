use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, MutexGuard, Notify};

use crate::auth::Principal;
use crate::websocket::{OutboundMessage, ServerMessage};

use super::ConnectionId;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection writer has gone away")]
    Closed,

    #[error("outbound buffer is full")]
    Full,
}

/// A connection's channel set plus its closed marker. Both live under one
/// lock so a subscribe can never land after close-time cleanup has run.
#[derive(Debug, Default)]
pub struct Subscriptions {
    channels: HashSet<String>,
    closed: bool,
}

impl Subscriptions {
    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }

    pub fn insert(&mut self, channel: &str) -> bool {
        self.channels.insert(channel.to_string())
    }

    pub fn remove(&mut self, channel: &str) -> bool {
        self.channels.remove(channel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Marks the connection closed and hands back every channel it held
    pub fn close(&mut self) -> Vec<String> {
        self.closed = true;
        self.channels.drain().collect()
    }

    pub fn channels(&self) -> impl Iterator<Item = &String> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Handle for a single WebSocket connection
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub principal: Principal,
    pub session_id: String,
    sender: mpsc::Sender<OutboundMessage>,
    pub connected_at: DateTime<Utc>,
    /// Unix seconds, lock-free so every inbound frame can touch it
    last_activity: AtomicI64,
    subscriptions: Mutex<Subscriptions>,
    close_requested: AtomicBool,
    close_signal: Notify,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        principal: Principal,
        session_id: String,
        sender: mpsc::Sender<OutboundMessage>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            principal,
            session_id,
            sender,
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp()),
            subscriptions: Mutex::new(Subscriptions::default()),
            close_requested: AtomicBool::new(false),
            close_signal: Notify::new(),
        }
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    pub fn idle_seconds(&self) -> i64 {
        Utc::now().timestamp() - self.last_activity.load(Ordering::Relaxed)
    }

    /// Queue an envelope for the writer task, waiting for buffer space
    pub async fn send(&self, message: ServerMessage) -> Result<(), DeliveryError> {
        self.sender
            .send(OutboundMessage::Envelope(message))
            .await
            .map_err(|_| DeliveryError::Closed)
    }

    /// Non-blocking enqueue used by fanout; a full buffer counts as failure
    pub fn try_deliver(&self, message: OutboundMessage) -> Result<(), DeliveryError> {
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Ask the owning task to close this connection. Safe to call from any task.
    pub fn request_close(&self) {
        if !self.close_requested.swap(true, Ordering::AcqRel) {
            self.close_signal.notify_waiters();
        }
    }

    pub fn is_close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }

    /// Resolves once `request_close` has been called. Any number of tasks
    /// may wait at once.
    pub async fn close_requested(&self) {
        // A `Notified` sees `notify_waiters` from the moment it is created
        let notified = self.close_signal.notified();
        if self.is_close_requested() {
            return;
        }
        notified.await;
    }

    /// Serializes all membership changes for this connection
    pub async fn lock_subscriptions(&self) -> MutexGuard<'_, Subscriptions> {
        self.subscriptions.lock().await
    }

    pub async fn subscribed_channels(&self) -> Vec<String> {
        self.subscriptions.lock().await.channels().cloned().collect()
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("principal", &self.principal.name())
            .field("session_id", &self.session_id)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}
