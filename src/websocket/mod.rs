mod handler;
mod lifecycle;
mod message;

pub use handler::ws_handler;
pub use lifecycle::{
    CloseReason, ConnectionEvent, ConnectionLifecycle, Flow, InboundFrame, LifecycleState,
};
pub use message::{ClientMessage, OutboundMessage, ServerMessage};
