//! In-process membership store
//!
//! Used for single-process deployments and tests. Several gateway instances
//! sharing one `Arc<MemoryMembershipStore>` behave like a cluster on one
//! shared store, relay included.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::connection::ConnectionId;

use super::traits::{MembershipStore, RelayStream};
use super::types::{RelayMessage, StoreBackend, StoreError};

const RELAY_CAPACITY: usize = 1024;

pub struct MemoryMembershipStore {
    channels: DashMap<String, HashMap<ConnectionId, i64>>,
    connections: DashMap<ConnectionId, HashSet<String>>,
    relay: broadcast::Sender<RelayMessage>,
}

impl MemoryMembershipStore {
    pub fn new() -> Self {
        let (relay, _) = broadcast::channel(RELAY_CAPACITY);
        Self {
            channels: DashMap::new(),
            connections: DashMap::new(),
            relay,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for MemoryMembershipStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MembershipStore for MemoryMembershipStore {
    fn backend_type(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    async fn add_channel_member(
        &self,
        channel: &str,
        connection: &ConnectionId,
        joined_at: i64,
    ) -> Result<(), StoreError> {
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(connection.clone(), joined_at);
        Ok(())
    }

    async fn remove_channel_member(
        &self,
        channel: &str,
        connection: &ConnectionId,
    ) -> Result<(), StoreError> {
        if let Some(mut members) = self.channels.get_mut(channel) {
            members.remove(connection);
        }
        // Redis drops empty hashes on its own
        self.channels.remove_if(channel, |_, members| members.is_empty());
        Ok(())
    }

    async fn channel_members(
        &self,
        channel: &str,
    ) -> Result<HashMap<ConnectionId, i64>, StoreError> {
        Ok(self
            .channels
            .get(channel)
            .map(|members| members.value().clone())
            .unwrap_or_default())
    }

    async fn add_connection_channel(
        &self,
        connection: &ConnectionId,
        channel: &str,
    ) -> Result<(), StoreError> {
        self.connections
            .entry(connection.clone())
            .or_default()
            .insert(channel.to_string());
        Ok(())
    }

    async fn remove_connection_channel(
        &self,
        connection: &ConnectionId,
        channel: &str,
    ) -> Result<(), StoreError> {
        if let Some(mut channels) = self.connections.get_mut(connection) {
            channels.remove(channel);
        }
        self.connections
            .remove_if(connection, |_, channels| channels.is_empty());
        Ok(())
    }

    async fn connection_channels(
        &self,
        connection: &ConnectionId,
    ) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .connections
            .get(connection)
            .map(|channels| channels.value().clone())
            .unwrap_or_default())
    }

    async fn delete_connection(&self, connection: &ConnectionId) -> Result<(), StoreError> {
        self.connections.remove(connection);
        Ok(())
    }

    async fn publish_relay(&self, message: &RelayMessage) -> Result<(), StoreError> {
        // No subscribers is not an error, same as PUBLISH returning 0
        let _ = self.relay.send(message.clone());
        Ok(())
    }

    async fn relay_stream(&self) -> Result<RelayStream, StoreError> {
        let stream = BroadcastStream::new(self.relay.subscribe()).filter_map(|item| async move {
            match item {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!(error = %e, "Relay subscriber lagged");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
