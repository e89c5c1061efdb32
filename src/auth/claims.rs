use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Decoded token payload. Tokens in the wild carry `sub`, or `username`,
/// or an `{id, email, name}` triple, so everything but `exp` is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Claims {
    pub fn new(subject: impl Into<String>, exp: i64) -> Self {
        Self {
            sub: Some(subject.into()),
            username: None,
            exp,
            iat: Some(chrono::Utc::now().timestamp()),
            extra: HashMap::new(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.exp < chrono::Utc::now().timestamp()
    }
}

/// The authenticated identity attached to a connection.
#[derive(Debug, Clone)]
pub struct Principal {
    name: String,
    claims: Claims,
}

impl Principal {
    pub fn from_claims(claims: Claims) -> Self {
        let name = claims
            .sub
            .clone()
            .or_else(|| claims.username.clone())
            .or_else(|| claims.extra.get("id").map(claim_to_string))
            .or_else(|| claims.extra.get("email").map(claim_to_string))
            .unwrap_or_else(|| "anonymous".to_string());

        Self { name, claims }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }
}

fn claim_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
