//! Load-balancer affinity cookie

mod sticky;

pub use sticky::{generate_session_value, is_valid_session_value, SessionAssignment, StickySessionAssigner};
