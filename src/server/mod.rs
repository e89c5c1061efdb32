mod app;
mod middleware;
mod serve;
mod state;

pub use app::create_app;
pub use middleware::api_key_auth;
pub use serve::serve_with_drain;
pub use state::AppState;
