//! Per-connection state machine
//!
//! The socket task turns frames and signals into [`ConnectionEvent`]s and
//! feeds them here; every membership change and the close path run through
//! [`ConnectionLifecycle::handle_event`].

use std::sync::Arc;
use std::time::Instant;

use tracing::instrument;

use crate::broadcast::Broadcaster;
use crate::channel::{ChannelError, ChannelIndex};
use crate::connection::{ConnectionHandle, ConnectionRegistry};
use crate::membership::PresenceEvent;
use crate::metrics::{ConnectionMetrics, SubscriptionMetrics};

use super::message::{ClientMessage, ServerMessage};

/// Inbound frame as seen by the lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary,
    /// Ping/pong; only refreshes activity
    Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Close frame or end of stream from the client
    ClientClosed,
    /// Administrative close, idle sweep, shutdown or failed fanout delivery
    CloseRequested,
    /// The writer task could not reach the socket
    WriterClosed,
    TransportError,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ClientClosed => "client_closed",
            CloseReason::CloseRequested => "close_requested",
            CloseReason::WriterClosed => "writer_closed",
            CloseReason::TransportError => "transport_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect,
    Message(InboundFrame),
    Disconnect(CloseReason),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct ConnectionLifecycle {
    state: LifecycleState,
    handle: Arc<ConnectionHandle>,
    registry: Arc<ConnectionRegistry>,
    channels: Arc<ChannelIndex>,
    broadcaster: Arc<Broadcaster>,
    opened_at: Instant,
}

impl ConnectionLifecycle {
    pub fn new(
        handle: Arc<ConnectionHandle>,
        registry: Arc<ConnectionRegistry>,
        channels: Arc<ChannelIndex>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            state: LifecycleState::Connecting,
            handle,
            registry,
            channels,
            broadcaster,
            opened_at: Instant::now(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub async fn handle_event(&mut self, event: ConnectionEvent) -> Flow {
        match (self.state, event) {
            (LifecycleState::Connecting, ConnectionEvent::Connect) => self.open().await,
            (LifecycleState::Connecting, ConnectionEvent::Message(_)) => {
                tracing::warn!(connection_id = %self.handle.id, "Frame before connect, ignoring");
                Flow::Continue
            }
            (LifecycleState::Connecting, ConnectionEvent::Disconnect(_))
            | (LifecycleState::Connecting, ConnectionEvent::Error(_)) => {
                self.state = LifecycleState::Closed;
                Flow::Close
            }

            (LifecycleState::Open, ConnectionEvent::Connect) => {
                tracing::warn!(connection_id = %self.handle.id, "Duplicate connect event");
                Flow::Continue
            }
            (LifecycleState::Open, ConnectionEvent::Message(frame)) => self.on_frame(frame).await,
            (LifecycleState::Open, ConnectionEvent::Disconnect(reason)) => {
                self.close(reason).await;
                Flow::Close
            }
            (LifecycleState::Open, ConnectionEvent::Error(error)) => {
                tracing::warn!(connection_id = %self.handle.id, error = %error, "WebSocket error");
                self.close(CloseReason::TransportError).await;
                Flow::Close
            }

            (LifecycleState::Closed, _) => Flow::Close,
        }
    }

    async fn open(&mut self) -> Flow {
        if let Err(e) = self.registry.register(self.handle.clone()) {
            tracing::error!(error = %e, "Connection id collision, dropping socket");
            self.state = LifecycleState::Closed;
            return Flow::Close;
        }

        self.state = LifecycleState::Open;
        self.opened_at = Instant::now();
        ConnectionMetrics::record_opened();

        tracing::info!(
            connection_id = %self.handle.id,
            principal = %self.handle.principal.name(),
            session = %self.handle.session_id,
            "WebSocket connection established"
        );

        let welcome = ServerMessage::connection_success(
            &self.handle.id,
            self.handle.principal.name(),
            self.broadcaster.server_id(),
        );
        self.reply(welcome).await
    }

    async fn on_frame(&mut self, frame: InboundFrame) -> Flow {
        self.handle.update_activity();

        match frame {
            InboundFrame::Text(text) => {
                let message = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::debug!(connection_id = %self.handle.id, error = %e, "Malformed client message");
                        let error = ServerMessage::error(format!("Invalid message: {}", e), &self.handle.id);
                        return self.reply(error).await;
                    }
                };
                self.on_client_message(message).await
            }
            InboundFrame::Binary => {
                let error = ServerMessage::error("Binary messages are not supported", &self.handle.id);
                self.reply(error).await
            }
            InboundFrame::Control => Flow::Continue,
        }
    }

    #[instrument(
        name = "ws.message",
        skip(self),
        fields(connection_id = %self.handle.id)
    )]
    async fn on_client_message(&mut self, message: ClientMessage) -> Flow {
        match message {
            ClientMessage::Listen { channel } => match self.channels.subscribe(&self.handle, &channel).await {
                Ok(joined_at) => {
                    SubscriptionMetrics::record("listen", true);
                    tracing::info!(connection_id = %self.handle.id, channel = %channel, "Listening on channel");
                    let flow = self
                        .reply(ServerMessage::subscribed(channel.as_str(), &self.handle.id, joined_at))
                        .await;
                    if flow == Flow::Continue {
                        self.announce(&channel, PresenceEvent::Joined).await;
                    }
                    flow
                }
                Err(e) => {
                    SubscriptionMetrics::record("listen", false);
                    self.reply(ServerMessage::error(subscription_failure("listen", &e), &self.handle.id))
                        .await
                }
            },
            ClientMessage::Unsubscribe { channel } => {
                match self.channels.unsubscribe(&self.handle, &channel).await {
                    Ok(was_member) => {
                        SubscriptionMetrics::record("unsubscribe", true);
                        let flow = self
                            .reply(ServerMessage::unsubscribed(channel.as_str(), &self.handle.id))
                            .await;
                        if was_member {
                            self.announce(&channel, PresenceEvent::Left).await;
                        }
                        flow
                    }
                    Err(e) => {
                        SubscriptionMetrics::record("unsubscribe", false);
                        let error = ServerMessage::error(subscription_failure("unsubscribe", &e), &self.handle.id);
                        self.reply(error).await
                    }
                }
            }
            ClientMessage::Ping => self.reply(ServerMessage::Pong).await,
        }
    }

    async fn announce(&self, channel: &str, event: PresenceEvent) {
        self.broadcaster
            .publish_presence(channel, event, self.handle.principal.name(), &self.handle.id)
            .await;
    }

    /// Queue a reply, waiting for buffer space unless a close is requested
    /// first. A connection that stops reading must still reach cleanup.
    async fn reply(&mut self, message: ServerMessage) -> Flow {
        let handle = self.handle.clone();
        let sent = tokio::select! {
            biased;

            _ = handle.close_requested() => None,
            sent = handle.send(message) => Some(sent),
        };

        match sent {
            Some(Ok(())) => Flow::Continue,
            Some(Err(e)) => {
                tracing::debug!(connection_id = %self.handle.id, error = %e, "Reply failed");
                self.close(CloseReason::WriterClosed).await;
                Flow::Close
            }
            None => {
                tracing::debug!(connection_id = %self.handle.id, "Close requested while replying");
                self.close(CloseReason::CloseRequested).await;
                Flow::Close
            }
        }
    }

    /// Membership cleanup, then registry removal. Runs at most once.
    async fn close(&mut self, reason: CloseReason) {
        if self.state == LifecycleState::Closed {
            return;
        }
        self.state = LifecycleState::Closed;

        let report = self.channels.cleanup(&self.handle).await;
        self.registry.remove(&self.handle.id);

        let duration = self.opened_at.elapsed().as_secs_f64();
        ConnectionMetrics::record_closed(reason.as_str(), duration);

        tracing::info!(
            connection_id = %self.handle.id,
            reason = reason.as_str(),
            channels = report.channels,
            abandoned = report.abandoned,
            duration_secs = duration,
            "WebSocket connection closed"
        );
    }
}

fn subscription_failure(action: &str, error: &ChannelError) -> String {
    match error {
        ChannelError::InvalidChannel(name) => format!("Invalid channel name: {}", name),
        ChannelError::Store(_) => format!("Failed to {}: membership store unavailable", action),
        ChannelError::ConnectionClosed => "Connection is closing".to_string(),
    }
}
