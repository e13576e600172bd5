//! Two-step confirmation for irreversible operations.
//!
//! The first call for a resource returns a token instead of acting. Repeating
//! the call with that token, for the same resource and within the validity
//! window, performs the action. Nothing is stored server side: the token
//! itself carries the resource id and issue time.
//!
//! Token format (base64, standard alphabet):
//!
//! ```text
//! plain:  "{resource_id}:{unix_seconds}"
//! signed: "{resource_id}:{unix_seconds}:{hex hmac-sha256}"
//! ```
//!
//! Without a signing key tokens are forgeable by anyone who can read one;
//! they only guard against accidental deletion.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::future::Future;


type HmacSha256 = Hmac<Sha256>;

/// Default validity window in seconds.
pub const DEFAULT_VALIDITY_SECONDS: i64 = 300;

/// Tokens issued further than this in the future are rejected.
const FUTURE_TOLERANCE_SECONDS: i64 = 30;

/// Why a provided confirmation token was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationError {
    /// Not decodable, or signature missing/wrong
    InvalidToken,
    ExpiredToken,
    /// Token was issued for a different resource
    ResourceMismatch {
        token_resource: String,
        requested_resource: String,
    },
}

impl std::fmt::Display for ConfirmationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfirmationError::InvalidToken => write!(f, "Invalid confirmation token."),
            ConfirmationError::ExpiredToken => write!(
                f,
                "Confirmation token has expired. Please request a new token."
            ),
            ConfirmationError::ResourceMismatch { .. } => write!(
                f,
                "Invalid confirmation token. Parameters do not match, please request a new token."
            ),
        }
    }
}

impl std::error::Error for ConfirmationError {}

/// Returned instead of acting when no token was provided.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmationRequired {
    pub message: String,
    pub confirmation_token: String,
    pub action: &'static str,
}

/// Result of [`ConfirmationGuard::request_or_execute`].
#[derive(Debug, PartialEq)]
pub enum Confirmation<T> {
    Required(ConfirmationRequired),
    Executed(T),
}

/// Issues and checks confirmation tokens.
#[derive(Clone)]
pub struct ConfirmationGuard {
    validity: Duration,
    signing_key: Option<Vec<u8>>,
}

impl Default for ConfirmationGuard {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_VALIDITY_SECONDS), None)
    }
}

impl ConfirmationGuard {
    pub fn new(validity: Duration, signing_key: Option<Vec<u8>>) -> Self {
        Self {
            validity,
            signing_key: signing_key.filter(|k| !k.is_empty()),
        }
    }

    /// Mints a token for `resource_id` at `now`.
    pub fn issue(&self, resource_id: &str, now: DateTime<Utc>) -> String {
        let payload = format!("{}:{}", resource_id, now.timestamp());
        let payload = match self.tag(&payload) {
            Some(tag) => format!("{}:{}", payload, tag),
            None => payload,
        };
        BASE64.encode(payload)
    }

    /// Checks a provided token against the requested resource.
    ///
    /// Checks run in a fixed order: decoding, expiry, then resource match.
    pub fn verify(
        &self,
        token: &str,
        resource_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ConfirmationError> {
        let (token_resource, issued_at) = self.decode(token)?;

        if issued_at > now.timestamp() + FUTURE_TOLERANCE_SECONDS {
            return Err(ConfirmationError::InvalidToken);
        }

        if now.timestamp() - issued_at > self.validity.num_seconds() {
            return Err(ConfirmationError::ExpiredToken);
        }

        if token_resource != resource_id {
            return Err(ConfirmationError::ResourceMismatch {
                token_resource,
                requested_resource: resource_id.to_string(),
            });
        }

        Ok(())
    }

    /// Runs `action` only when `provided` is a valid token for `resource_id`.
    ///
    /// Without a token, returns [`Confirmation::Required`] carrying a fresh
    /// one and does not touch `action`. `resource_kind` only shapes the
    /// prompt ("draft", "label").
    pub async fn request_or_execute<T, F, Fut>(
        &self,
        resource_kind: &str,
        resource_id: &str,
        provided: Option<&str>,
        now: DateTime<Utc>,
        action: F,
    ) -> Result<Confirmation<T>, ConfirmationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match provided.filter(|t| !t.is_empty()) {
            None => {
                let confirmation_token = self.issue(resource_id, now);
                tracing::info!(resource_kind, resource_id, "Issued confirmation token");
                Ok(Confirmation::Required(ConfirmationRequired {
                    message: format!(
                        "Confirmation required to delete {} with ID '{}'. Confirm the deletion with the user and repeat the request with the given confirmation_token.",
                        resource_kind, resource_id
                    ),
                    confirmation_token,
                    action: "confirm_deletion",
                }))
            }
            Some(token) => {
                if let Err(e) = self.verify(token, resource_id, now) {
                    tracing::warn!(resource_kind, resource_id, error = %e, "Confirmation refused");
                    return Err(e);
                }
                Ok(Confirmation::Executed(action().await))
            }
        }
    }

    fn decode(&self, token: &str) -> Result<(String, i64), ConfirmationError> {
        let bytes = BASE64
            .decode(token.trim())
            .map_err(|_| ConfirmationError::InvalidToken)?;
        let text = String::from_utf8(bytes).map_err(|_| ConfirmationError::InvalidToken)?;

        let payload = match &self.signing_key {
            Some(_) => {
                let (payload, tag) = text
                    .rsplit_once(':')
                    .ok_or(ConfirmationError::InvalidToken)?;
                self.check_tag(payload, tag)?;
                payload
            }
            None => text.as_str(),
        };

        let (resource_id, issued_at) = payload
            .rsplit_once(':')
            .ok_or(ConfirmationError::InvalidToken)?;
        let issued_at = issued_at
            .parse::<i64>()
            .map_err(|_| ConfirmationError::InvalidToken)?;

        Ok((resource_id.to_string(), issued_at))
    }

    fn mac(&self) -> Option<HmacSha256> {
        let key = self.signing_key.as_deref()?;
        HmacSha256::new_from_slice(key).ok()
    }

    fn tag(&self, payload: &str) -> Option<String> {
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    fn check_tag(&self, payload: &str, tag: &str) -> Result<(), ConfirmationError> {
        let expected = hex::decode(tag).map_err(|_| ConfirmationError::InvalidToken)?;
        let mut mac = self.mac().ok_or(ConfirmationError::InvalidToken)?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| ConfirmationError::InvalidToken)
    }
}
