//! Redis plumbing for the membership store
//!
//! - `RedisPool`: shared multiplexed connection for commands
//! - `CircuitBreaker`: fails fast while Redis is unavailable
//! - `ExponentialBackoff`: retry delays for relay reconnects and cleanup
//! - `RedisHealth`: connection status reported by `/health` and `/metrics`

mod backoff;
mod circuit_breaker;
mod health;
pub mod pool;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use health::{RedisHealth, RedisHealthStatus};
pub use pool::{PoolError, RedisPool};

/// Milliseconds since the Unix epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
