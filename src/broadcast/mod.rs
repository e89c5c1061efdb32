//! Channel fanout, local and cross-process

mod broadcaster;
mod relay;

pub use broadcaster::{BroadcastError, Broadcaster, DeliveryReport, PublishResult};
pub use relay::RelaySubscriber;
