use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use rand::distr::Alphanumeric;
use rand::Rng;

use crate::config::SessionConfig;

const SESSION_VALUE_LEN: usize = 32;
const MAX_PRESENTED_LEN: usize = 128;

/// Session bound to a connection at upgrade time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAssignment {
    /// The client presented a usable cookie; it is trusted as-is
    Continued(String),
    /// Fresh value, the response must set the cookie
    Issued(String),
}

impl SessionAssignment {
    pub fn value(&self) -> &str {
        match self {
            SessionAssignment::Continued(v) | SessionAssignment::Issued(v) => v,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, SessionAssignment::Issued(_))
    }
}

/// Reads or issues the affinity cookie a load balancer uses to pin a client
/// to this process. Presented values are never checked against live
/// connections; a stale one simply continues under the same routing key.
pub struct StickySessionAssigner {
    cookie_name: String,
    secure: bool,
    http_only: bool,
    same_site: SameSite,
}

impl StickySessionAssigner {
    pub fn new(config: &SessionConfig) -> Self {
        let same_site = match config.same_site.to_lowercase().as_str() {
            "strict" => SameSite::Strict,
            "none" => SameSite::None,
            _ => SameSite::Lax,
        };

        if same_site == SameSite::None && !config.secure {
            tracing::warn!("SameSite=None without Secure, browsers will drop the session cookie");
        }

        Self {
            cookie_name: config.cookie_name.clone(),
            secure: config.secure,
            http_only: config.http_only,
            same_site,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn assign(&self, jar: &CookieJar) -> SessionAssignment {
        match jar.get(&self.cookie_name).map(Cookie::value) {
            Some(value) if is_valid_session_value(value) => {
                SessionAssignment::Continued(value.to_string())
            }
            Some(value) => {
                tracing::debug!(length = value.len(), "Replacing malformed session cookie");
                SessionAssignment::Issued(generate_session_value())
            }
            None => SessionAssignment::Issued(generate_session_value()),
        }
    }

    /// Cookie carrying `value`, with the configured attributes
    pub fn session_cookie(&self, value: impl Into<String>) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), value.into()))
            .path("/")
            .http_only(self.http_only)
            .secure(self.secure)
            .same_site(self.same_site)
            .build()
    }
}

pub fn generate_session_value() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_VALUE_LEN)
        .map(char::from)
        .collect()
}

pub fn is_valid_session_value(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_PRESENTED_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
