//! Infrastructure layer modules
//!
//! Shared components used by every domain module:
//! - `config`: layered application settings
//! - `error`: HTTP-facing error type
//! - `metrics`: Prometheus registry and recorders
//! - `redis`: connection pool, circuit breaker, backoff and health

pub mod config;
pub mod error;
pub mod metrics;
pub mod redis;
