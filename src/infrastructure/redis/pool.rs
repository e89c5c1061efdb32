//! Shared Redis connection for membership commands.
//!
//! Commands go over one multiplexed connection guarded by the circuit
//! breaker. Relay subscriptions need a dedicated pub/sub connection and
//! open their own through [`RedisPool::client`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, RedisResult};
use tokio::sync::RwLock;

use crate::config::RedisConfig;

use super::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RedisHealth};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("Redis command timed out after {0}ms")]
    Timeout(u64),
}

pub struct RedisPool {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    circuit_breaker: Arc<CircuitBreaker>,
    health: Arc<RedisHealth>,
    url: String,
    command_timeout: Duration,
}

impl RedisPool {
    /// Create a pool. No network traffic happens until the first command.
    pub fn new(config: &RedisConfig) -> Result<Self, PoolError> {
        let circuit_breaker = Arc::new(CircuitBreaker::with_config(
            CircuitBreakerConfig::from(config),
        ));
        Self::with_parts(config, circuit_breaker, Arc::new(RedisHealth::new()))
    }

    pub fn with_parts(
        config: &RedisConfig,
        circuit_breaker: Arc<CircuitBreaker>,
        health: Arc<RedisHealth>,
    ) -> Result<Self, PoolError> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            circuit_breaker,
            health,
            url: config.url.clone(),
            command_timeout: Duration::from_millis(config.command_timeout_ms.max(1)),
        })
    }

    /// Client for opening dedicated connections (pub/sub)
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn health(&self) -> &RedisHealth {
        &self.health
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub async fn get_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        if !self.circuit_breaker.allow_request() {
            self.health.set_circuit_open();
            return Err(PoolError::CircuitOpen);
        }

        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        self.connect().await
    }

    async fn connect(&self) -> Result<MultiplexedConnection, PoolError> {
        let mut guard = self.connection.write().await;

        // Another task may have connected while we waited for the lock
        if let Some(ref c) = *guard {
            return Ok(c.clone());
        }

        self.health.set_reconnecting();

        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                *guard = Some(conn.clone());
                self.circuit_breaker.record_success();
                self.health.set_connected();
                tracing::info!(url = %self.url, "Redis connection established");
                Ok(conn)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                tracing::error!(error = %e, "Failed to connect to Redis");
                Err(PoolError::Redis(e))
            }
        }
    }

    /// Run a command with circuit breaker bookkeeping. Dropped connections
    /// are discarded so the next call reconnects.
    ///
    /// Connecting and the command together are bounded by the configured
    /// command timeout. A timeout counts as a failure and drops the cached
    /// connection.
    pub async fn execute<F, T, Fut>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let outcome = tokio::time::timeout(self.command_timeout, async {
            let conn = self.get_connection().await?;
            Ok::<_, PoolError>(f(conn).await)
        })
        .await;

        match outcome {
            Ok(Ok(Ok(result))) => {
                self.circuit_breaker.record_success();
                Ok(result)
            }
            Ok(Ok(Err(e))) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    self.discard_connection().await;
                }
                self.circuit_breaker.record_failure();
                Err(PoolError::Redis(e))
            }
            // Connect failures are already recorded by `connect`
            Ok(Err(e)) => Err(e),
            Err(_) => {
                let timeout_ms = self.command_timeout.as_millis() as u64;
                tracing::warn!(timeout_ms, "Redis command timed out");
                self.discard_connection().await;
                self.circuit_breaker.record_failure();
                Err(PoolError::Timeout(timeout_ms))
            }
        }
    }

    async fn discard_connection(&self) {
        *self.connection.write().await = None;
        self.health.set_reconnecting();
    }

    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy() && self.circuit_breaker.state() == CircuitState::Closed
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn ping(&self) -> Result<(), PoolError> {
        self.execute(|mut conn| async move {
            let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, RedisError>(())
        })
        .await
    }
}
