mod settings;

pub use settings::{
    ApiConfig, JwtConfig, MembershipConfig, OtelConfig, RedisConfig, ServerConfig, SessionConfig,
    Settings, WebSocketConfig,
};
