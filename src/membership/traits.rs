//! Membership store trait definition

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::connection::ConnectionId;

use super::types::{RelayMessage, StoreBackend, StoreError};

/// Relay messages as they arrive. The stream ends when the underlying
/// subscription is lost.
pub type RelayStream = BoxStream<'static, RelayMessage>;

/// Shared membership state visible to every gateway process.
///
/// Every primitive is idempotent so a call with an ambiguous outcome can be
/// retried without corrupting state.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    fn backend_type(&self) -> StoreBackend;

    /// Set `connection` in the channel's member map, valued with its join time
    async fn add_channel_member(
        &self,
        channel: &str,
        connection: &ConnectionId,
        joined_at: i64,
    ) -> Result<(), StoreError>;

    async fn remove_channel_member(
        &self,
        channel: &str,
        connection: &ConnectionId,
    ) -> Result<(), StoreError>;

    /// Connection id to join timestamp (Unix ms)
    async fn channel_members(
        &self,
        channel: &str,
    ) -> Result<HashMap<ConnectionId, i64>, StoreError>;

    async fn add_connection_channel(
        &self,
        connection: &ConnectionId,
        channel: &str,
    ) -> Result<(), StoreError>;

    async fn remove_connection_channel(
        &self,
        connection: &ConnectionId,
        channel: &str,
    ) -> Result<(), StoreError>;

    async fn connection_channels(
        &self,
        connection: &ConnectionId,
    ) -> Result<HashSet<String>, StoreError>;

    /// Drop the connection's whole channel set
    async fn delete_connection(&self, connection: &ConnectionId) -> Result<(), StoreError>;

    /// Record both directions of a subscription
    async fn join(
        &self,
        channel: &str,
        connection: &ConnectionId,
        joined_at: i64,
    ) -> Result<(), StoreError> {
        self.add_channel_member(channel, connection, joined_at).await?;
        self.add_connection_channel(connection, channel).await
    }

    /// Remove both directions of a subscription
    async fn leave(&self, channel: &str, connection: &ConnectionId) -> Result<(), StoreError> {
        self.remove_channel_member(channel, connection).await?;
        self.remove_connection_channel(connection, channel).await
    }

    /// Send a publish to every process
    async fn publish_relay(&self, message: &RelayMessage) -> Result<(), StoreError>;

    /// Subscribe to the relay channel
    async fn relay_stream(&self) -> Result<RelayStream, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
