//! Process-local connection tracking

mod handle;
mod id;
mod registry;

pub use handle::{ConnectionHandle, DeliveryError};
pub use id::ConnectionId;
pub use registry::{ConnectionRegistry, RegistryError};
