//! Store doubles for unit tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::connection::ConnectionId;

use super::{
    MembershipStore, MemoryMembershipStore, RelayMessage, RelayStream, StoreBackend, StoreError,
};

/// Store whose every call waits forever
pub struct HangingStore;

#[async_trait]
impl MembershipStore for HangingStore {
    fn backend_type(&self) -> StoreBackend {
        StoreBackend::Redis
    }

    async fn add_channel_member(&self, _: &str, _: &ConnectionId, _: i64) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn remove_channel_member(&self, _: &str, _: &ConnectionId) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn channel_members(&self, _: &str) -> Result<HashMap<ConnectionId, i64>, StoreError> {
        std::future::pending().await
    }

    async fn add_connection_channel(&self, _: &ConnectionId, _: &str) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn remove_connection_channel(&self, _: &ConnectionId, _: &str) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn connection_channels(&self, _: &ConnectionId) -> Result<HashSet<String>, StoreError> {
        std::future::pending().await
    }

    async fn delete_connection(&self, _: &ConnectionId) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn publish_relay(&self, _: &RelayMessage) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn relay_stream(&self) -> Result<RelayStream, StoreError> {
        std::future::pending().await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        std::future::pending().await
    }
}

/// Memory store that fails the next `failures` channel-member removals
pub struct FlakyStore {
    inner: MemoryMembershipStore,
    failures: AtomicUsize,
    pub removal_attempts: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryMembershipStore::new(),
            failures: AtomicUsize::new(0),
            removal_attempts: AtomicUsize::new(0),
        }
    }

    pub fn fail_next(&self, failures: usize) {
        self.failures.store(failures, Ordering::SeqCst);
    }
}

#[async_trait]
impl MembershipStore for FlakyStore {
    fn backend_type(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    async fn add_channel_member(
        &self,
        channel: &str,
        connection: &ConnectionId,
        joined_at: i64,
    ) -> Result<(), StoreError> {
        self.inner.add_channel_member(channel, connection, joined_at).await
    }

    async fn remove_channel_member(
        &self,
        channel: &str,
        connection: &ConnectionId,
    ) -> Result<(), StoreError> {
        self.removal_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("flaky".into()));
        }
        self.inner.remove_channel_member(channel, connection).await
    }

    async fn channel_members(&self, channel: &str) -> Result<HashMap<ConnectionId, i64>, StoreError> {
        self.inner.channel_members(channel).await
    }

    async fn add_connection_channel(
        &self,
        connection: &ConnectionId,
        channel: &str,
    ) -> Result<(), StoreError> {
        self.inner.add_connection_channel(connection, channel).await
    }

    async fn remove_connection_channel(
        &self,
        connection: &ConnectionId,
        channel: &str,
    ) -> Result<(), StoreError> {
        self.inner.remove_connection_channel(connection, channel).await
    }

    async fn connection_channels(&self, connection: &ConnectionId) -> Result<HashSet<String>, StoreError> {
        self.inner.connection_channels(connection).await
    }

    async fn delete_connection(&self, connection: &ConnectionId) -> Result<(), StoreError> {
        self.inner.delete_connection(connection).await
    }

    async fn publish_relay(&self, message: &RelayMessage) -> Result<(), StoreError> {
        self.inner.publish_relay(message).await
    }

    async fn relay_stream(&self) -> Result<RelayStream, StoreError> {
        self.inner.relay_stream().await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}
