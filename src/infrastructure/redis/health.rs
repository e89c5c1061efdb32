//! Redis connection health tracking

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};

use serde::Serialize;

use super::current_time_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RedisHealthStatus {
    Healthy = 0,
    Reconnecting = 1,
    CircuitOpen = 2,
}

impl RedisHealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedisHealthStatus::Healthy => "healthy",
            RedisHealthStatus::Reconnecting => "reconnecting",
            RedisHealthStatus::CircuitOpen => "circuit_open",
        }
    }
}

pub struct RedisHealth {
    status: AtomicU8,
    last_connected_ms: AtomicI64,
    reconnect_attempts: AtomicU32,
}

impl RedisHealth {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(RedisHealthStatus::Reconnecting as u8),
            last_connected_ms: AtomicI64::new(0),
            reconnect_attempts: AtomicU32::new(0),
        }
    }

    pub fn set_connected(&self) {
        self.status
            .store(RedisHealthStatus::Healthy as u8, Ordering::Release);
        self.last_connected_ms
            .store(current_time_ms(), Ordering::Release);
        self.reconnect_attempts.store(0, Ordering::Release);
    }

    pub fn set_reconnecting(&self) {
        self.status
            .store(RedisHealthStatus::Reconnecting as u8, Ordering::Release);
        self.reconnect_attempts.fetch_add(1, Ordering::AcqRel);
    }

    pub fn set_circuit_open(&self) {
        self.status
            .store(RedisHealthStatus::CircuitOpen as u8, Ordering::Release);
    }

    pub fn status(&self) -> RedisHealthStatus {
        match self.status.load(Ordering::Acquire) {
            0 => RedisHealthStatus::Healthy,
            2 => RedisHealthStatus::CircuitOpen,
            _ => RedisHealthStatus::Reconnecting,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == RedisHealthStatus::Healthy
    }

    pub fn last_connected_ms(&self) -> i64 {
        self.last_connected_ms.load(Ordering::Acquire)
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Acquire)
    }
}

impl Default for RedisHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        let health = RedisHealth::new();
        assert!(!health.is_healthy());

        health.set_reconnecting();
        health.set_reconnecting();
        assert_eq!(health.reconnect_attempts(), 2);

        health.set_connected();
        assert!(health.is_healthy());
        assert_eq!(health.reconnect_attempts(), 0);
        assert!(health.last_connected_ms() > 0);

        health.set_circuit_open();
        assert_eq!(health.status().as_str(), "circuit_open");
    }
}
