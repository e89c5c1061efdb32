use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use super::{ConnectionHandle, ConnectionId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    Duplicate(ConnectionId),
}

/// Live connections held by this process. Guards never outlive a call, so
/// nothing here is held across a socket write.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: Arc<ConnectionHandle>) -> Result<(), RegistryError> {
        match self.connections.entry(handle.id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::Duplicate(handle.id.clone())),
            Entry::Vacant(slot) => {
                tracing::info!(
                    connection_id = %handle.id,
                    principal = %handle.principal.name(),
                    "Connection registered"
                );
                slot.insert(handle);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    /// Idempotent; returns the handle only on the first call
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let removed = self.connections.remove(id).map(|(_, handle)| handle);
        if removed.is_some() {
            tracing::info!(connection_id = %id, "Connection unregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of every handle; safe to iterate while connections come and go
    pub fn all(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }
}
