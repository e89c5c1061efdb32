use axum::extract::ws::Utf8Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection::ConnectionId;
use crate::membership::PresenceEvent;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    Listen { channel: String },
    Unsubscribe { channel: String },
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionSuccess {
        message: String,
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
        /// Gateway process holding the connection
        #[serde(rename = "serverId")]
        server_id: String,
    },
    SubscriptionSuccess {
        channel: String,
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
        timestamp: i64,
    },
    UnsubscribeSuccess {
        channel: String,
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
    },
    Error {
        message: String,
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
    },
    ChannelMessage {
        #[serde(rename = "channelId")]
        channel_id: String,
        data: Value,
        timestamp: i64,
    },
    /// Another member joined or left a channel this connection listens on
    Presence {
        #[serde(rename = "channelId")]
        channel_id: String,
        event: PresenceEvent,
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "connectionId")]
        connection_id: String,
        timestamp: i64,
    },
    /// Direct administrative delivery to one connection
    Message { data: Value, timestamp: i64 },
    Pong,
}

impl ServerMessage {
    pub fn connection_success(connection_id: &ConnectionId, principal: &str, server_id: &str) -> Self {
        Self::ConnectionSuccess {
            message: format!("Welcome {}!", principal),
            connection_id: connection_id.clone(),
            server_id: server_id.to_string(),
        }
    }

    pub fn subscribed(channel: impl Into<String>, connection_id: &ConnectionId, timestamp: i64) -> Self {
        Self::SubscriptionSuccess {
            channel: channel.into(),
            connection_id: connection_id.clone(),
            timestamp,
        }
    }

    pub fn unsubscribed(channel: impl Into<String>, connection_id: &ConnectionId) -> Self {
        Self::UnsubscribeSuccess {
            channel: channel.into(),
            connection_id: connection_id.clone(),
        }
    }

    pub fn error(message: impl Into<String>, connection_id: &ConnectionId) -> Self {
        Self::Error {
            message: message.into(),
            connection_id: connection_id.clone(),
        }
    }

    pub fn channel_message(channel: impl Into<String>, data: Value, timestamp: i64) -> Self {
        Self::ChannelMessage {
            channel_id: channel.into(),
            data,
            timestamp,
        }
    }

    pub fn presence(
        channel: impl Into<String>,
        event: PresenceEvent,
        user_id: impl Into<String>,
        connection_id: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self::Presence {
            channel_id: channel.into(),
            event,
            user_id: user_id.into(),
            connection_id: connection_id.into(),
            timestamp,
        }
    }
}

/// A frame queued for a connection's writer task
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Envelope(ServerMessage),
    /// Serialized once and shared by every recipient of a fanout. Cloning
    /// only bumps a reference count.
    Serialized(Utf8Bytes),
    /// Transport-level keepalive
    Ping,
}

impl OutboundMessage {
    pub fn preserialize(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        Ok(Self::Serialized(Utf8Bytes::from(serde_json::to_string(message)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_listen() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"action":"listen","channel":"room1"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Listen { channel: "room1".into() });
    }

    #[test]
    fn test_parse_rejects_missing_channel_and_unknown_action() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"action":"listen"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"action":"join","channel":"a"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn test_envelope_shapes() {
        let id = ConnectionId::from("conn_1");

        let value = serde_json::to_value(ServerMessage::subscribed("room1", &id, 42)).unwrap();
        assert_eq!(
            value,
            json!({"type": "subscription_success", "channel": "room1", "connectionId": "conn_1", "timestamp": 42})
        );

        let value = serde_json::to_value(ServerMessage::unsubscribed("room1", &id)).unwrap();
        assert_eq!(
            value,
            json!({"type": "unsubscribe_success", "channel": "room1", "connectionId": "conn_1"})
        );

        let value = serde_json::to_value(ServerMessage::error("boom", &id)).unwrap();
        assert_eq!(value, json!({"type": "error", "message": "boom", "connectionId": "conn_1"}));

        let value =
            serde_json::to_value(ServerMessage::channel_message("room1", json!({"data": "hi"}), 7)).unwrap();
        assert_eq!(
            value,
            json!({"type": "channel_message", "channelId": "room1", "data": {"data": "hi"}, "timestamp": 7})
        );

        let value =
            serde_json::to_value(ServerMessage::connection_success(&id, "alice", "gw-1")).unwrap();
        assert_eq!(value["type"], "connection_success");
        assert_eq!(value["connectionId"], "conn_1");
        assert_eq!(value["message"], "Welcome alice!");
        assert_eq!(value["serverId"], "gw-1");

        let value = serde_json::to_value(ServerMessage::presence(
            "room1",
            PresenceEvent::Joined,
            "alice",
            "conn_1",
            9,
        ))
        .unwrap();
        assert_eq!(
            value,
            json!({"type": "presence", "channelId": "room1", "event": "joined", "userId": "alice", "connectionId": "conn_1", "timestamp": 9})
        );
    }

    #[test]
    fn test_preserialized_frame_is_shared_text() {
        let outbound = OutboundMessage::preserialize(&ServerMessage::Pong).unwrap();
        let OutboundMessage::Serialized(text) = outbound.clone() else {
            panic!("expected a serialized frame");
        };
        assert_eq!(text.as_str(), r#"{"type":"pong"}"#);
    }
}
