use axum::http::{header, HeaderMap};
use thiserror::Error;

use crate::config::JwtConfig;

use super::{JwtValidator, Principal};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("No token provided")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    Expired,
}

impl AuthError {
    /// Plain-text body returned with the 401 response
    pub fn rejection_body(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "Unauthorized: No token provided",
            AuthError::InvalidToken(_) => "Unauthorized: Invalid token",
            AuthError::Expired => "Unauthorized: Token expired",
        }
    }

    /// Short label for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing",
            AuthError::InvalidToken(_) => "invalid",
            AuthError::Expired => "expired",
        }
    }
}

/// Admits or rejects WebSocket upgrades. Pure CPU work, never suspends.
pub struct AuthGate {
    validator: JwtValidator,
}

impl AuthGate {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            validator: JwtValidator::new(config),
        }
    }

    pub fn authenticate(&self, token: Option<&str>) -> Result<Principal, AuthError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let claims = self.validator.validate(token)?;
        Ok(Principal::from_claims(claims))
    }
}

/// Token from the `token` query parameter, falling back to a bearer header
pub fn extract_token<'a>(query_token: Option<&'a str>, headers: &'a HeaderMap) -> Option<&'a str> {
    if let Some(token) = query_token {
        return Some(token);
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "gate-secret";

    fn gate() -> AuthGate {
        AuthGate::new(&JwtConfig {
            secret: SECRET.to_string(),
            issuer: None,
            audience: None,
        })
    }

    fn token_for(subject: &str) -> String {
        let claims = Claims::new(subject, chrono::Utc::now().timestamp() + 600);
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    #[test]
    fn test_missing_token() {
        assert_eq!(gate().authenticate(None).unwrap_err(), AuthError::MissingToken);
        assert_eq!(gate().authenticate(Some("  ")).unwrap_err(), AuthError::MissingToken);
    }

    #[test]
    fn test_valid_token_yields_principal() {
        let principal = gate().authenticate(Some(&token_for("alice"))).unwrap();
        assert_eq!(principal.name(), "alice");
    }

    #[test]
    fn test_rejection_bodies() {
        let err = gate().authenticate(Some("nope")).unwrap_err();
        assert_eq!(err.rejection_body(), "Unauthorized: Invalid token");
        assert_eq!(AuthError::MissingToken.rejection_body(), "Unauthorized: No token provided");
    }

    #[test]
    fn test_query_token_wins_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));

        assert_eq!(extract_token(Some("from-query"), &headers), Some("from-query"));
        assert_eq!(extract_token(None, &headers), Some("from-header"));
        assert_eq!(extract_token(None, &HeaderMap::new()), None);
    }
}
