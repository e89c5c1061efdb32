use axum::{middleware, routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::api::{admin_routes, development_routes, operational_routes};
use crate::websocket::ws_handler;

use super::{middleware::api_key_auth, AppState};

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let admin = admin_routes().route_layer(middleware::from_fn_with_state(
        state.clone(),
        api_key_auth,
    ));

    let mut router = Router::new()
        .route("/ws", get(ws_handler))
        .merge(operational_routes())
        .nest("/api", admin);

    if state.settings.api.token_endpoint {
        tracing::warn!("Development token endpoint enabled at /token");
        router = router.merge(development_routes());
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
