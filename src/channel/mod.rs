//! Bidirectional channel membership

mod index;

pub use index::{is_valid_channel_name, ChannelError, ChannelIndex, CleanupPolicy, CleanupReport};
