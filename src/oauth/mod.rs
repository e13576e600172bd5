//! Access-value refresh against the identity provider.
//!
//! A refresh exchanges the stored refresh token for a new access value and
//! an ID token. The ID token is verified against the issuer's published keys
//! and its `sub` claim names the subject whose record gets updated.

mod exchange;
mod id_token;

pub use exchange::GoogleTokenRefresher;
pub use id_token::{IdTokenVerifier, DEFAULT_ISSUERS, DEFAULT_JWKS_URL};

use crate::credentials::OAuthCredential;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Google's OAuth token endpoint.
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Outcome of a successful refresh.
#[derive(Clone, Debug, PartialEq)]
pub struct RefreshedToken {
    pub access_value: String,
    pub expires_at: Option<DateTime<Utc>>,
    /// Subject taken from the verified ID token
    pub subject_id: String,
}

/// Exchanges a refresh token for a fresh access value.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Any error (exchange, transport, verification) fails the whole refresh.
    async fn refresh(&self, credential: &OAuthCredential) -> Result<RefreshedToken>;
}
