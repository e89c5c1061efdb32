use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::error::AppError;

use super::AppState;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Guards the administrative API with the configured `api.key`. With no key
/// configured the API is open, which is only meant for local runs.
pub async fn api_key_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.settings.api.key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let presented = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match presented {
        Some(key) if key == expected => Ok(next.run(req).await),
        Some(_) => {
            tracing::warn!(path = %req.uri().path(), "Rejected admin request with wrong API key");
            Err(AppError::Unauthorized("Invalid API key".to_string()))
        }
        None => {
            tracing::warn!(path = %req.uri().path(), "Rejected admin request without API key");
            Err(AppError::Unauthorized(format!("Missing {} header", API_KEY_HEADER)))
        }
    }
}
