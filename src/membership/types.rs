//! Membership store types

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::redis::PoolError;

/// Error type for membership store operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Store unreachable, timed out, or circuit open
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Run a store operation, giving up as unavailable once `limit` elapses
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Unavailable(format!(
            "{} timed out after {}ms",
            operation,
            limit.as_millis()
        ))),
    }
}

/// Backend type for the membership store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Redis => "redis",
            StoreBackend::Memory => "memory",
        }
    }
}

/// Membership change announced to the other members of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceEvent {
    Joined,
    Left,
}

impl PresenceEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceEvent::Joined => "joined",
            PresenceEvent::Left => "left",
        }
    }
}

/// What a relay message carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayPayload {
    /// Application publish, delivered as a `channel_message`
    Message { data: Value },
    Presence {
        event: PresenceEvent,
        user_id: String,
        connection_id: String,
    },
}

/// A publish forwarded to every gateway process through the relay channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub id: String,
    pub channel: String,
    #[serde(flatten)]
    pub payload: RelayPayload,
    /// Unix milliseconds at the originating process
    pub timestamp: i64,
    /// Server id of the publishing process
    pub origin: String,
}

impl RelayMessage {
    pub fn new(channel: impl Into<String>, data: Value, timestamp: i64, origin: impl Into<String>) -> Self {
        Self::with_payload(channel, RelayPayload::Message { data }, timestamp, origin)
    }

    pub fn presence(
        channel: impl Into<String>,
        event: PresenceEvent,
        user_id: impl Into<String>,
        connection_id: impl Into<String>,
        timestamp: i64,
        origin: impl Into<String>,
    ) -> Self {
        let payload = RelayPayload::Presence {
            event,
            user_id: user_id.into(),
            connection_id: connection_id.into(),
        };
        Self::with_payload(channel, payload, timestamp, origin)
    }

    fn with_payload(
        channel: impl Into<String>,
        payload: RelayPayload,
        timestamp: i64,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel: channel.into(),
            payload,
            timestamp,
            origin: origin.into(),
        }
    }
}
