use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub membership: MembershipConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Emit logs as JSON lines instead of human-readable text
    #[serde(default)]
    pub json_logs: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_cb_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    /// Half-open successes required before the circuit closes again
    #[serde(default = "default_cb_success_threshold")]
    pub circuit_breaker_success_threshold: u32,
    #[serde(default = "default_cb_reset_timeout")]
    pub circuit_breaker_reset_timeout_seconds: u64,
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_delay_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_delay_ms: u64,
    /// Upper bound on a single command, connection setup included
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
}

/// Where channel membership lives and how it is shared between processes.
#[derive(Debug, Clone, Deserialize)]
pub struct MembershipConfig {
    /// "redis" or "memory"
    #[serde(default = "default_membership_backend")]
    pub backend: String,
    /// Unique identifier for this gateway process
    #[serde(default = "default_server_id")]
    pub server_id: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Pub/sub channel every process listens on for cross-process fanout
    #[serde(default = "default_relay_channel")]
    pub relay_channel: String,
    /// Store attempts per channel during close-time cleanup
    #[serde(default = "default_cleanup_attempts")]
    pub cleanup_max_attempts: u32,
    #[serde(default = "default_cleanup_backoff")]
    pub cleanup_backoff_ms: u64,
    /// Upper bound on any store operation issued by the gateway
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,
    /// Announce joins and leaves to the other members of a channel
    #[serde(default = "default_true")]
    pub presence_events: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_true")]
    pub http_only: bool,
    /// "strict", "lax" or "none"
    #[serde(default = "default_same_site")]
    pub same_site: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Heartbeat interval in seconds (server sends ping)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Connection timeout in seconds (disconnect if no activity)
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Idle sweep interval in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Outbound frames buffered per connection before it counts as dead
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub key: Option<String>,
    /// Serve `GET /token` for development clients. Never enable in production.
    #[serde(default)]
    pub token_endpoint: bool,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_cb_failure_threshold() -> u32 {
    5
}

fn default_cb_success_threshold() -> u32 {
    2
}

fn default_cb_reset_timeout() -> u64 {
    30
}

fn default_backoff_initial() -> u64 {
    100
}

fn default_backoff_max() -> u64 {
    30_000
}

fn default_command_timeout() -> u64 {
    2_000
}

fn default_membership_backend() -> String {
    "redis".to_string()
}

fn default_server_id() -> String {
    format!("gw-{}", Uuid::new_v4().simple())
}

fn default_key_prefix() -> String {
    "gateway".to_string()
}

fn default_relay_channel() -> String {
    "gateway:relay".to_string()
}

fn default_cleanup_attempts() -> u32 {
    3
}

fn default_cleanup_backoff() -> u64 {
    100
}

fn default_store_timeout() -> u64 {
    3_000
}

fn default_cookie_name() -> String {
    "CALBCOOK".to_string()
}

fn default_true() -> bool {
    true
}

fn default_same_site() -> String {
    "lax".to_string()
}

fn default_heartbeat_interval() -> u64 {
    25
}

fn default_connection_timeout() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    30
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_token_ttl() -> u64 {
    3_600
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "channel-gateway".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("redis.url", default_redis_url())?
            .set_default("membership.backend", default_membership_backend())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER_PORT, JWT_SECRET, REDIS_URL, MEMBERSHIP_BACKEND, ...
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    /// Settings suitable for tests and single-process runs: in-memory
    /// membership and the given signing secret.
    pub fn local(secret: impl Into<String>) -> Self {
        Self {
            server: ServerConfig::default(),
            jwt: JwtConfig {
                secret: secret.into(),
                issuer: None,
                audience: None,
            },
            redis: RedisConfig::default(),
            membership: MembershipConfig {
                backend: "memory".to_string(),
                ..MembershipConfig::default()
            },
            session: SessionConfig::default(),
            websocket: WebSocketConfig::default(),
            api: ApiConfig::default(),
            otel: OtelConfig::default(),
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            json_logs: false,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            circuit_breaker_failure_threshold: default_cb_failure_threshold(),
            circuit_breaker_success_threshold: default_cb_success_threshold(),
            circuit_breaker_reset_timeout_seconds: default_cb_reset_timeout(),
            backoff_initial_delay_ms: default_backoff_initial(),
            backoff_max_delay_ms: default_backoff_max(),
            command_timeout_ms: default_command_timeout(),
        }
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            backend: default_membership_backend(),
            server_id: default_server_id(),
            key_prefix: default_key_prefix(),
            relay_channel: default_relay_channel(),
            cleanup_max_attempts: default_cleanup_attempts(),
            cleanup_backoff_ms: default_cleanup_backoff(),
            store_timeout_ms: default_store_timeout(),
            presence_events: true,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            secure: false,
            http_only: true,
            same_site: default_same_site(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            connection_timeout: default_connection_timeout(),
            cleanup_interval: default_cleanup_interval(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            key: None,
            token_endpoint: false,
            token_ttl_secs: default_token_ttl(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
