//! Delegated mailbox credentials and their storage.
//!
//! A credential record binds an opaque access key (what callers send in the
//! `X-Access-Token` header) to the OAuth material needed to call the mailbox
//! API on a user's behalf.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialBackend (trait)          │
//! │  - get by access key                     │
//! │  - upsert access value by subject        │
//! └─────────────────────────────────────────┘
//!          ↓                    ↓
//! ┌──────────────────┐  ┌──────────────────┐
//! │ CredentialStore  │  │ MemoryCredential │
//! │ SQLite + AES-GCM │  │ Store (DashMap)  │
//! └──────────────────┘  └──────────────────┘
//! ```
//!
//! Backends hand back the decrypted payload text untouched. Turning it into
//! an [`OAuthCredential`] is the session guard's job, so a corrupted record
//! surfaces as a parse failure for that one request instead of a store error.
//!
//! # Usage
//!
//! ```no_run
//! use mailgate::credentials::{CredentialBackend, CredentialStore, OAuthCredential};
//!
//! # fn main() -> anyhow::Result<()> {
//! let encryption_key = std::env::var("MAILGATE_ENCRYPTION_KEY")?;
//! let store = CredentialStore::new("credentials.db", &encryption_key)?;
//!
//! let credential = OAuthCredential {
//!     token: Some("ya29.access".to_string()),
//!     refresh_token: Some("1//refresh".to_string()),
//!     token_uri: None,
//!     client_id: "client-id".to_string(),
//!     client_secret: "client-secret".to_string(),
//!     scopes: vec!["https://mail.google.com/".to_string()],
//!     expiry: None,
//! };
//! let access_key = store.insert("subject-123", &credential)?;
//!
//! if let Some(stored) = store.get(&access_key)? {
//!     println!("credential for {}", stored.subject_id);
//! }
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

mod encryption;
mod memory;
mod storage;

pub use encryption::{validate_key, PayloadCipher, Sealed};
pub use memory::MemoryCredentialStore;
pub use storage::CredentialStore;

/// Credentials are treated as expired this long before their stated expiry.
pub const EXPIRY_SKEW_SECONDS: i64 = 10;

/// OAuth material for one authorized user.
///
/// Serialized as the record payload. `refresh_token`, `client_id` and
/// `client_secret` must survive every refresh; only `token` and `expiry`
/// are rewritten.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OAuthCredential {
    /// Current OAuth access value sent to the mailbox API
    #[serde(default)]
    pub token: Option<String>,

    /// Long-lived refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Token endpoint this credential refreshes against
    #[serde(default)]
    pub token_uri: Option<String>,

    pub client_id: String,

    pub client_secret: String,

    #[serde(default)]
    pub scopes: Vec<String>,

    /// When the access value expires (UTC)
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl OAuthCredential {
    /// Parses a stored payload.
    pub fn parse(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).context("Malformed credential payload")
    }

    pub fn to_payload(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize credential payload")
    }

    /// Access value, if present and non-empty.
    pub fn access_value(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    /// True when an expiry is set and falls within the skew window of `now`.
    ///
    /// A credential without expiry never counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry <= now + Duration::seconds(EXPIRY_SKEW_SECONDS),
            None => false,
        }
    }

    /// Usable as-is: has an access value and is not expired.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.access_value().is_some() && !self.is_expired(now)
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|t| !t.is_empty())
    }
}

/// A record as returned by a backend: identity plus the raw payload.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredCredential {
    pub subject_id: String,
    pub access_key: String,
    pub payload: String,
}

/// Durable keyed storage of credential records.
///
/// Implementations must allow concurrent reads and make
/// [`upsert_by_subject`](CredentialBackend::upsert_by_subject) atomic per
/// subject. Concurrent refreshes of the same subject resolve last-write-wins.
pub trait CredentialBackend: Send + Sync {
    /// Stores a credential for `subject_id` and returns a freshly minted
    /// access key. Re-authorizing a subject replaces its record and key.
    fn insert(&self, subject_id: &str, credential: &OAuthCredential) -> Result<String>;

    /// Looks up a record by access key. `Ok(None)` means not found.
    fn get(&self, access_key: &str) -> Result<Option<StoredCredential>>;

    /// Rewrites the access value and expiry of the subject's record, keeping
    /// every other field. Fails if the subject has no record.
    fn upsert_by_subject(
        &self,
        subject_id: &str,
        access_value: &str,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Removes the record matching both key and subject.
    ///
    /// Returns `Ok(false)` when nothing matched.
    fn delete(&self, access_key: &str, subject_id: &str) -> Result<bool>;
}

/// Applies a refreshed access value to a payload, leaving unknown fields intact.
pub(crate) fn rewrite_access_value(
    payload: &str,
    access_value: &str,
    expiry: Option<DateTime<Utc>>,
) -> Result<String> {
    let mut value: serde_json::Value =
        serde_json::from_str(payload).context("Stored credential payload is not JSON")?;

    let object = value
        .as_object_mut()
        .context("Stored credential payload is not a JSON object")?;

    object.insert("token".to_string(), serde_json::Value::from(access_value));
    object.insert(
        "expiry".to_string(),
        match expiry {
            Some(at) => serde_json::Value::from(at.to_rfc3339()),
            None => serde_json::Value::Null,
        },
    );

    serde_json::to_string(&value).context("Failed to serialize credential payload")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential() -> OAuthCredential {
        OAuthCredential {
            token: Some("ya29.access".to_string()),
            refresh_token: Some("1//refresh".to_string()),
            token_uri: Some("https://oauth2.googleapis.com/token".to_string()),
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            scopes: vec!["https://mail.google.com/".to_string()],
            expiry: None,
        }
    }

    #[test]
    fn test_parse_minimal_payload() {
        let parsed =
            OAuthCredential::parse(r#"{"client_id":"id","client_secret":"secret"}"#).unwrap();

        assert_eq!(parsed.client_id, "id");
        assert!(parsed.token.is_none());
        assert!(parsed.scopes.is_empty());
    }

    #[test]
    fn test_parse_rejects_missing_client() {
        assert!(OAuthCredential::parse(r#"{"token":"abc"}"#).is_err());
        assert!(OAuthCredential::parse("not json").is_err());
    }

    #[test]
    fn test_expiry_rules() {
        let now = Utc::now();
        let mut cred = credential();

        assert!(!cred.is_expired(now));
        assert!(cred.is_valid(now));

        cred.expiry = Some(now + Duration::hours(1));
        assert!(cred.is_valid(now));

        cred.expiry = Some(now + Duration::seconds(EXPIRY_SKEW_SECONDS - 1));
        assert!(cred.is_expired(now));

        cred.expiry = Some(now - Duration::minutes(5));
        assert!(cred.is_expired(now));
        assert!(!cred.is_valid(now));
    }

    #[test]
    fn test_empty_access_value_is_not_valid() {
        let now = Utc::now();
        let mut cred = credential();
        cred.token = Some(String::new());

        assert!(cred.access_value().is_none());
        assert!(!cred.is_valid(now));
    }

    #[test]
    fn test_rewrite_keeps_refresh_material() {
        let payload = credential().to_payload().unwrap();
        let expiry = Utc::now() + Duration::hours(1);

        let rewritten = rewrite_access_value(&payload, "ya29.new", Some(expiry)).unwrap();
        let parsed = OAuthCredential::parse(&rewritten).unwrap();

        assert_eq!(parsed.token.as_deref(), Some("ya29.new"));
        assert_eq!(parsed.refresh_token.as_deref(), Some("1//refresh"));
        assert_eq!(parsed.client_id, "client-id");
        assert_eq!(parsed.client_secret, "client-secret");
        assert_eq!(parsed.scopes, vec!["https://mail.google.com/".to_string()]);
        assert_eq!(parsed.expiry.map(|e| e.timestamp()), Some(expiry.timestamp()));
    }

    #[test]
    fn test_rewrite_keeps_unknown_fields() {
        let payload = r#"{"client_id":"id","client_secret":"s","universe_domain":"googleapis.com"}"#;

        let rewritten = rewrite_access_value(payload, "tok", None).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rewritten).unwrap();

        assert_eq!(value["universe_domain"], "googleapis.com");
        assert_eq!(value["token"], "tok");
        assert!(value["expiry"].is_null());
    }
}
