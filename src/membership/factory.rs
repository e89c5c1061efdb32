//! Factory function for creating membership stores

use std::sync::Arc;

use crate::config::MembershipConfig;
use crate::redis::RedisPool;

use super::memory_store::MemoryMembershipStore;
use super::redis_store::RedisMembershipStore;
use super::traits::MembershipStore;

/// Create a membership store based on configuration
pub fn create_membership_store(
    config: &MembershipConfig,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn MembershipStore> {
    match config.backend.to_lowercase().as_str() {
        "redis" => {
            if let Some(pool) = redis_pool {
                tracing::info!(
                    server_id = %config.server_id,
                    key_prefix = %config.key_prefix,
                    relay_channel = %config.relay_channel,
                    "Using Redis membership store"
                );
                Arc::new(RedisMembershipStore::new(pool, config))
            } else {
                tracing::warn!(
                    "Redis membership backend requested but Redis pool not available, falling back to memory"
                );
                Arc::new(MemoryMembershipStore::new())
            }
        }
        "memory" => {
            tracing::info!("Using in-memory membership store, cross-process fanout disabled");
            Arc::new(MemoryMembershipStore::new())
        }
        other => {
            tracing::warn!(backend = %other, "Unknown membership backend, using memory");
            Arc::new(MemoryMembershipStore::new())
        }
    }
}
