use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tracing::instrument;

use crate::config::MembershipConfig;
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::membership::{with_timeout, MembershipStore, StoreError};
use crate::metrics::StoreMetrics;
use crate::redis::{current_time_ms, BackoffConfig, ExponentialBackoff};

const MAX_CHANNEL_NAME_LEN: usize = 128;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Invalid channel name: {0}")]
    InvalidChannel(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Connection is closed")]
    ConnectionClosed,
}

/// Time and retry budget for store calls. Every call is bounded by
/// `store_timeout`; close-time removals are retried up to `max_attempts`.
#[derive(Debug, Clone)]
pub struct CleanupPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
    pub store_timeout: Duration,
}

impl From<&MembershipConfig> for CleanupPolicy {
    fn from(config: &MembershipConfig) -> Self {
        Self {
            max_attempts: config.cleanup_max_attempts.max(1),
            backoff: BackoffConfig {
                initial_delay_ms: config.cleanup_backoff_ms,
                max_delay_ms: config.cleanup_backoff_ms.saturating_mul(8),
                ..BackoffConfig::default()
            },
            store_timeout: Duration::from_millis(config.store_timeout_ms.max(1)),
        }
    }
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self::from(&MembershipConfig::default())
    }
}

/// Outcome of close-time cleanup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Channels the connection held when it closed
    pub channels: usize,
    /// Store removals abandoned after exhausting retries
    pub abandoned: usize,
}

/// Channel membership in both directions.
///
/// The store holds channel -> connections and connection -> channels for the
/// whole cluster. Locally, each connection's own set lives on its handle and
/// this index keeps channel -> local connection ids for fanout.
pub struct ChannelIndex {
    store: Arc<dyn MembershipStore>,
    local: DashMap<String, HashSet<ConnectionId>>,
    cleanup_policy: CleanupPolicy,
}

impl ChannelIndex {
    pub fn new(store: Arc<dyn MembershipStore>, cleanup_policy: CleanupPolicy) -> Self {
        Self {
            store,
            local: DashMap::new(),
            cleanup_policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn MembershipStore> {
        &self.store
    }

    /// Upper bound applied to every store call made through the index
    pub fn store_timeout(&self) -> Duration {
        self.cleanup_policy.store_timeout
    }

    /// Join `channel`. Returns the join timestamp recorded in the store.
    ///
    /// The local set only changes once the store write has succeeded.
    #[instrument(skip(self, connection), fields(connection_id = %connection.id))]
    pub async fn subscribe(
        &self,
        connection: &ConnectionHandle,
        channel: &str,
    ) -> Result<i64, ChannelError> {
        if !is_valid_channel_name(channel) {
            return Err(ChannelError::InvalidChannel(channel.to_string()));
        }

        let mut subscriptions = connection.lock_subscriptions().await;
        if subscriptions.is_closed() || connection.is_close_requested() {
            return Err(ChannelError::ConnectionClosed);
        }

        let joined_at = current_time_ms();
        let join = self.store.join(channel, &connection.id, joined_at);
        if let Err(e) = with_timeout(self.store_timeout(), "join", join).await {
            StoreMetrics::record_error("join");
            tracing::warn!(error = %e, "Store rejected subscribe");
            return Err(e.into());
        }

        subscriptions.insert(channel);
        self.local
            .entry(channel.to_string())
            .or_default()
            .insert(connection.id.clone());

        tracing::debug!("Subscribed to channel");
        Ok(joined_at)
    }

    /// Leave `channel`. Returns false when the connection was not a member.
    ///
    /// On store failure the local entry stays so close-time cleanup retries it.
    #[instrument(skip(self, connection), fields(connection_id = %connection.id))]
    pub async fn unsubscribe(
        &self,
        connection: &ConnectionHandle,
        channel: &str,
    ) -> Result<bool, ChannelError> {
        if !is_valid_channel_name(channel) {
            return Err(ChannelError::InvalidChannel(channel.to_string()));
        }

        let mut subscriptions = connection.lock_subscriptions().await;
        if !subscriptions.contains(channel) {
            return Ok(false);
        }

        let leave = self.store.leave(channel, &connection.id);
        if let Err(e) = with_timeout(self.store_timeout(), "leave", leave).await {
            StoreMetrics::record_error("leave");
            tracing::warn!(error = %e, "Store rejected unsubscribe");
            return Err(e.into());
        }

        subscriptions.remove(channel);
        self.remove_local(channel, &connection.id);

        tracing::debug!("Unsubscribed from channel");
        Ok(true)
    }

    /// Remove every membership the connection holds and mark it closed.
    ///
    /// Best effort: each store removal is bounded by the store timeout,
    /// retried with backoff, then logged and skipped. Never returns an error.
    #[instrument(skip(self, connection), fields(connection_id = %connection.id))]
    pub async fn cleanup(&self, connection: &ConnectionHandle) -> CleanupReport {
        let channels = {
            let mut subscriptions = connection.lock_subscriptions().await;
            if subscriptions.is_closed() {
                return CleanupReport::default();
            }
            subscriptions.close()
        };

        // Stop local fanout before the slower store round-trips
        for channel in &channels {
            self.remove_local(channel, &connection.id);
        }

        let mut report = CleanupReport {
            channels: channels.len(),
            abandoned: 0,
        };

        for channel in &channels {
            let removed = self
                .with_retry("leave", || self.store.leave(channel, &connection.id))
                .await;
            if !removed {
                report.abandoned += 1;
                tracing::warn!(channel = %channel, "Abandoned membership removal");
            }
        }

        if !self
            .with_retry("delete_connection", || self.store.delete_connection(&connection.id))
            .await
        {
            report.abandoned += 1;
        }

        tracing::debug!(
            channels = report.channels,
            abandoned = report.abandoned,
            "Membership cleanup finished"
        );
        report
    }

    async fn with_retry<F, Fut>(&self, operation: &str, mut call: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<(), StoreError>>,
    {
        let mut backoff = ExponentialBackoff::with_config(self.cleanup_policy.backoff.clone());

        for attempt in 1..=self.cleanup_policy.max_attempts {
            match with_timeout(self.store_timeout(), operation, call()).await {
                Ok(()) => return true,
                Err(e) => {
                    StoreMetrics::record_error(operation);
                    if attempt == self.cleanup_policy.max_attempts {
                        tracing::warn!(operation, attempt, error = %e, "Cleanup step failed, giving up");
                        StoreMetrics::record_cleanup_abandoned();
                        return false;
                    }
                    let delay = backoff.next_delay();
                    tracing::debug!(
                        operation,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Cleanup step failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        false
    }

    fn remove_local(&self, channel: &str, connection: &ConnectionId) {
        if let Some(mut ids) = self.local.get_mut(channel) {
            ids.remove(connection);
        }
        self.local.remove_if(channel, |_, ids| ids.is_empty());
    }

    /// Connections on this process subscribed to `channel`
    pub fn local_subscribers(&self, channel: &str) -> Vec<ConnectionId> {
        self.local
            .get(channel)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn local_channel_count(&self) -> usize {
        self.local.len()
    }

    /// Cluster-wide membership of `channel` from the store
    pub async fn members(&self, channel: &str) -> Result<HashMap<ConnectionId, i64>, ChannelError> {
        if !is_valid_channel_name(channel) {
            return Err(ChannelError::InvalidChannel(channel.to_string()));
        }
        let members = self.store.channel_members(channel);
        Ok(with_timeout(self.store_timeout(), "channel_members", members).await?)
    }
}

/// 1 to 128 characters from `[A-Za-z0-9_.:-]`
pub fn is_valid_channel_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_CHANNEL_NAME_LEN {
        return false;
    }

    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}
