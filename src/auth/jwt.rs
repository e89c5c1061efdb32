use std::collections::HashMap;

use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde_json::Value;

use crate::config::JwtConfig;

use super::{AuthError, Claims};

pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(config: &JwtConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::default();

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        }

        Self {
            decoding_key,
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }
}

/// Mints HS256 tokens the gateway itself accepts, for development clients
pub struct JwtSigner {
    encoding_key: EncodingKey,
    issuer: Option<String>,
    audience: Option<String>,
}

impl JwtSigner {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
        }
    }

    /// Token carrying `username`, valid for `ttl_secs` from now
    pub fn issue(&self, username: &str, ttl_secs: u64) -> Result<String, JwtError> {
        let now = chrono::Utc::now().timestamp();
        let mut extra = HashMap::new();
        if let Some(ref issuer) = self.issuer {
            extra.insert("iss".to_string(), Value::String(issuer.clone()));
        }
        if let Some(ref audience) = self.audience {
            extra.insert("aud".to_string(), Value::String(audience.clone()));
        }

        let claims = Claims {
            sub: None,
            username: Some(username.to_string()),
            exp: now.saturating_add(i64::try_from(ttl_secs).unwrap_or(i64::MAX)),
            iat: Some(now),
            extra,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-key-for-testing".to_string(),
            issuer: None,
            audience: None,
        }
    }

    fn sign(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token() {
        let config = create_test_config();
        let validator = JwtValidator::new(&config);

        let claims = Claims::new("user-123", chrono::Utc::now().timestamp() + 3600);
        let token = sign(&claims, &config.secret);

        let validated = validator.validate(&token).unwrap();
        assert_eq!(validated.sub.as_deref(), Some("user-123"));
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let validator = JwtValidator::new(&create_test_config());
        let claims = Claims::new("user-123", chrono::Utc::now().timestamp() + 3600);
        let token = sign(&claims, "another-secret");

        assert!(matches!(validator.validate(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_expired_token() {
        let config = create_test_config();
        let validator = JwtValidator::new(&config);
        // Well past the default 60s leeway
        let claims = Claims::new("user-123", chrono::Utc::now().timestamp() - 3600);
        let token = sign(&claims, &config.secret);

        assert!(matches!(validator.validate(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn test_garbage_token() {
        let validator = JwtValidator::new(&create_test_config());
        assert!(validator.validate("invalid-token").is_err());
    }

    #[test]
    fn test_issuer_is_enforced() {
        let config = JwtConfig {
            issuer: Some("gateway-auth".to_string()),
            ..create_test_config()
        };
        let validator = JwtValidator::new(&config);
        let claims = Claims::new("user-123", chrono::Utc::now().timestamp() + 3600);
        let token = sign(&claims, &config.secret);

        assert!(validator.validate(&token).is_err());
    }

    #[test]
    fn test_issued_token_passes_validation() {
        let config = JwtConfig {
            secret: "signing-secret".to_string(),
            issuer: Some("gateway".to_string()),
            audience: Some("clients".to_string()),
        };
        let token = JwtSigner::new(&config).issue("john_doe", 60).unwrap();

        let claims = JwtValidator::new(&config).validate(&token).unwrap();
        assert_eq!(claims.username.as_deref(), Some("john_doe"));
        assert!(claims.sub.is_none());
        assert!(!claims.is_expired());

        let other = JwtConfig {
            audience: Some("someone-else".to_string()),
            ..config
        };
        assert!(JwtValidator::new(&other).validate(&token).is_err());
    }
}
