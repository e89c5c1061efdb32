//! Shared channel membership
//!
//! - `MembershipStore`: trait over the store every process can reach
//! - `RedisMembershipStore`: hashes and sets in Redis, relay over pub/sub
//! - `MemoryMembershipStore`: in-process store for single-node runs and tests

mod factory;
mod memory_store;
mod redis_store;
#[cfg(test)]
pub(crate) mod testing;
mod traits;
mod types;

pub use factory::create_membership_store;
pub use memory_store::MemoryMembershipStore;
pub use redis_store::RedisMembershipStore;
pub use traits::{MembershipStore, RelayStream};
pub use types::{with_timeout, PresenceEvent, RelayMessage, RelayPayload, StoreBackend, StoreError};
