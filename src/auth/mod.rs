//! Upgrade-time authentication

mod claims;
mod gate;
mod jwt;

pub use claims::{Claims, Principal};
pub use gate::{extract_token, AuthError, AuthGate};
pub use jwt::{JwtSigner, JwtValidator};
