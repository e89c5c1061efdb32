//! Redis-backed membership store
//!
//! Layout:
//! - `<prefix>:channel:<name>` hash, field = connection id, value = join time
//! - `<prefix>:connection:<id>` set of channel names
//!
//! Cross-process relay uses PUBLISH/SUBSCRIBE on a dedicated channel.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use redis::{AsyncCommands, RedisError};

use crate::config::MembershipConfig;
use crate::connection::ConnectionId;
use crate::redis::RedisPool;

use super::traits::{MembershipStore, RelayStream};
use super::types::{RelayMessage, StoreBackend, StoreError};

pub struct RedisMembershipStore {
    pool: Arc<RedisPool>,
    key_prefix: String,
    relay_channel: String,
}

impl RedisMembershipStore {
    pub fn new(pool: Arc<RedisPool>, config: &MembershipConfig) -> Self {
        Self {
            pool,
            key_prefix: config.key_prefix.clone(),
            relay_channel: config.relay_channel.clone(),
        }
    }

    fn channel_key(&self, channel: &str) -> String {
        format!("{}:channel:{}", self.key_prefix, channel)
    }

    fn connection_key(&self, connection: &ConnectionId) -> String {
        format!("{}:connection:{}", self.key_prefix, connection)
    }
}

#[async_trait]
impl MembershipStore for RedisMembershipStore {
    fn backend_type(&self) -> StoreBackend {
        StoreBackend::Redis
    }

    async fn add_channel_member(
        &self,
        channel: &str,
        connection: &ConnectionId,
        joined_at: i64,
    ) -> Result<(), StoreError> {
        let key = self.channel_key(channel);
        let field = connection.to_string();

        self.pool
            .execute(move |mut conn| async move {
                let _: () = conn.hset(&key, &field, joined_at).await?;
                Ok::<_, RedisError>(())
            })
            .await?;
        Ok(())
    }

    async fn remove_channel_member(
        &self,
        channel: &str,
        connection: &ConnectionId,
    ) -> Result<(), StoreError> {
        let key = self.channel_key(channel);
        let field = connection.to_string();

        self.pool
            .execute(move |mut conn| async move {
                let _: () = conn.hdel(&key, &field).await?;
                Ok::<_, RedisError>(())
            })
            .await?;
        Ok(())
    }

    async fn channel_members(
        &self,
        channel: &str,
    ) -> Result<HashMap<ConnectionId, i64>, StoreError> {
        let key = self.channel_key(channel);

        let raw = self
            .pool
            .execute(move |mut conn| async move {
                let members: HashMap<String, i64> = conn.hgetall(&key).await?;
                Ok::<_, RedisError>(members)
            })
            .await?;

        Ok(raw
            .into_iter()
            .map(|(id, joined_at)| (ConnectionId::from(id), joined_at))
            .collect())
    }

    async fn add_connection_channel(
        &self,
        connection: &ConnectionId,
        channel: &str,
    ) -> Result<(), StoreError> {
        let key = self.connection_key(connection);
        let member = channel.to_string();

        self.pool
            .execute(move |mut conn| async move {
                let _: () = conn.sadd(&key, &member).await?;
                Ok::<_, RedisError>(())
            })
            .await?;
        Ok(())
    }

    async fn remove_connection_channel(
        &self,
        connection: &ConnectionId,
        channel: &str,
    ) -> Result<(), StoreError> {
        let key = self.connection_key(connection);
        let member = channel.to_string();

        self.pool
            .execute(move |mut conn| async move {
                let _: () = conn.srem(&key, &member).await?;
                Ok::<_, RedisError>(())
            })
            .await?;
        Ok(())
    }

    async fn connection_channels(
        &self,
        connection: &ConnectionId,
    ) -> Result<HashSet<String>, StoreError> {
        let key = self.connection_key(connection);

        let channels = self
            .pool
            .execute(move |mut conn| async move {
                let channels: HashSet<String> = conn.smembers(&key).await?;
                Ok::<_, RedisError>(channels)
            })
            .await?;
        Ok(channels)
    }

    async fn delete_connection(&self, connection: &ConnectionId) -> Result<(), StoreError> {
        let key = self.connection_key(connection);

        self.pool
            .execute(move |mut conn| async move {
                let _: () = conn.del(&key).await?;
                Ok::<_, RedisError>(())
            })
            .await?;
        Ok(())
    }

    async fn join(
        &self,
        channel: &str,
        connection: &ConnectionId,
        joined_at: i64,
    ) -> Result<(), StoreError> {
        let channel_key = self.channel_key(channel);
        let connection_key = self.connection_key(connection);
        let field = connection.to_string();
        let member = channel.to_string();

        // Both directions in one MULTI/EXEC
        self.pool
            .execute(move |mut conn| async move {
                let _: () = redis::pipe()
                    .atomic()
                    .hset(&channel_key, &field, joined_at)
                    .ignore()
                    .sadd(&connection_key, &member)
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                Ok::<_, RedisError>(())
            })
            .await?;
        Ok(())
    }

    async fn leave(&self, channel: &str, connection: &ConnectionId) -> Result<(), StoreError> {
        let channel_key = self.channel_key(channel);
        let connection_key = self.connection_key(connection);
        let field = connection.to_string();
        let member = channel.to_string();

        self.pool
            .execute(move |mut conn| async move {
                let _: () = redis::pipe()
                    .atomic()
                    .hdel(&channel_key, &field)
                    .ignore()
                    .srem(&connection_key, &member)
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                Ok::<_, RedisError>(())
            })
            .await?;
        Ok(())
    }

    async fn publish_relay(&self, message: &RelayMessage) -> Result<(), StoreError> {
        let payload = serde_json::to_string(message)?;
        let channel = self.relay_channel.clone();

        self.pool
            .execute(move |mut conn| async move {
                let _: () = conn.publish(&channel, &payload).await?;
                Ok::<_, RedisError>(())
            })
            .await?;
        Ok(())
    }

    async fn relay_stream(&self) -> Result<RelayStream, StoreError> {
        let limit = self.pool.command_timeout();
        let pubsub = tokio::time::timeout(limit, async {
            let mut pubsub = self.pool.client().get_async_pubsub().await?;
            pubsub.subscribe(&self.relay_channel).await?;
            Ok::<_, RedisError>(pubsub)
        })
        .await
        .map_err(|_| {
            StoreError::Unavailable(format!(
                "relay subscribe timed out after {}ms",
                limit.as_millis()
            ))
        })??;

        tracing::info!(channel = %self.relay_channel, "Subscribed to relay channel");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read relay payload");
                    return None;
                }
            };

            match serde_json::from_str::<RelayMessage>(&payload) {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed relay message");
                    None
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.pool.ping().await?;
        Ok(())
    }
}
