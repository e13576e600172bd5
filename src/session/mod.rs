//! Per-request credential resolution.
//!
//! Every request runs through [`SessionGuard::resolve`] once. The guard never
//! rejects a request: whatever goes wrong ends in an unauthenticated
//! [`RequestAuthContext`] carrying a message for the first operation that
//! needs the mailbox.
//!
//! # Flow
//! 1. No access-token header: `NoTokenHeader`, the store is not contacted
//! 2. Store lookup: `StoreLookupFailed` on error, `CredentialMissing` if absent
//! 3. Payload parse: `ParseFailed` on malformed data
//! 4. Usable as-is: `Valid`
//! 5. Expired with a refresh token: refresh, verify, persist by subject
//!    (`Refreshed`), or `RefreshFailed`
//! 6. Anything else: `InvalidUnrefreshable`

use crate::auth::extract_access_token;
use crate::credentials::{CredentialBackend, OAuthCredential, StoredCredential};
use crate::gmail::{MailboxApi, MailboxFactory};
use crate::oauth::TokenRefresher;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};


/// Terminal state of one resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    NoTokenHeader,
    StoreLookupFailed,
    CredentialMissing,
    ParseFailed,
    Valid,
    /// Valid after a successful refresh
    Refreshed,
    RefreshFailed,
    InvalidUnrefreshable,
}

impl AuthOutcome {
    pub fn is_authenticated(self) -> bool {
        matches!(self, AuthOutcome::Valid | AuthOutcome::Refreshed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthOutcome::NoTokenHeader => "no_token_header",
            AuthOutcome::StoreLookupFailed => "store_lookup_failed",
            AuthOutcome::CredentialMissing => "credential_missing",
            AuthOutcome::ParseFailed => "parse_failed",
            AuthOutcome::Valid => "valid",
            AuthOutcome::Refreshed => "refreshed",
            AuthOutcome::RefreshFailed => "refresh_failed",
            AuthOutcome::InvalidUnrefreshable => "invalid_unrefreshable",
        }
    }
}

/// Who the request acts for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub subject_id: String,
}

/// Returned by [`RequestAuthContext::require`] for unauthenticated requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthRequired(pub String);

impl std::fmt::Display for AuthRequired {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for AuthRequired {}

/// Authentication state of one in-flight request.
///
/// Lives in the request's extensions and is dropped with it.
#[derive(Clone)]
pub struct RequestAuthContext {
    pub outcome: AuthOutcome,
    pub identity: Option<Identity>,
    pub error_message: Option<String>,
    mailbox: Option<Arc<dyn MailboxApi>>,
}

impl std::fmt::Debug for RequestAuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestAuthContext")
            .field("outcome", &self.outcome)
            .field("identity", &self.identity)
            .field("error_message", &self.error_message)
            .finish_non_exhaustive()
    }
}

impl RequestAuthContext {
    fn denied(outcome: AuthOutcome, message: String) -> Self {
        Self {
            outcome,
            identity: None,
            error_message: Some(message),
            mailbox: None,
        }
    }

    fn granted(outcome: AuthOutcome, subject_id: String, mailbox: Arc<dyn MailboxApi>) -> Self {
        Self {
            outcome,
            identity: Some(Identity { subject_id }),
            error_message: None,
            mailbox: Some(mailbox),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.outcome.is_authenticated()
    }

    /// Identity and mailbox handle, or the message explaining why not.
    pub fn require(&self) -> Result<(&Identity, Arc<dyn MailboxApi>), AuthRequired> {
        match (&self.identity, &self.mailbox) {
            (Some(identity), Some(mailbox)) => Ok((identity, Arc::clone(mailbox))),
            _ => {
                warn!(outcome = self.outcome.as_str(), "User is not authenticated");
                Err(AuthRequired(self.error_message.clone().unwrap_or_else(|| {
                    "User is not authenticated.".to_string()
                })))
            }
        }
    }
}

/// Resolves the caller's credential for each request.
pub struct SessionGuard {
    store: Arc<dyn CredentialBackend>,
    refresher: Arc<dyn TokenRefresher>,
    mailbox_factory: Arc<dyn MailboxFactory>,
    login_url: String,
}

impl SessionGuard {
    /// # Arguments
    /// * `app_host` - Public base URL; users are sent to `{app_host}/auth/login`
    pub fn new(
        store: Arc<dyn CredentialBackend>,
        refresher: Arc<dyn TokenRefresher>,
        mailbox_factory: Arc<dyn MailboxFactory>,
        app_host: &str,
    ) -> Self {
        Self {
            store,
            refresher,
            mailbox_factory,
            login_url: format!("{}/auth/login", app_host.trim_end_matches('/')),
        }
    }

    pub async fn resolve(&self, headers: &HeaderMap, now: DateTime<Utc>) -> RequestAuthContext {
        let context = self.run(headers, now).await;
        match context.outcome {
            AuthOutcome::Valid | AuthOutcome::Refreshed => debug!(
                outcome = context.outcome.as_str(),
                subject_id = context.identity.as_ref().map(|i| i.subject_id.as_str()),
                "Request authenticated"
            ),
            AuthOutcome::NoTokenHeader => debug!(outcome = context.outcome.as_str(), "Anonymous request"),
            _ => warn!(outcome = context.outcome.as_str(), "Request not authenticated"),
        }
        context
    }

    async fn run(&self, headers: &HeaderMap, now: DateTime<Utc>) -> RequestAuthContext {
        let access_key = match extract_access_token(headers) {
            Ok(key) => key,
            Err(e) => {
                debug!(reason = %e, "No usable access token header");
                return RequestAuthContext::denied(
                    AuthOutcome::NoTokenHeader,
                    format!(
                        "X-Access-Token is a required header parameter. Please go to {} to get the required parameters.",
                        self.login_url
                    ),
                );
            }
        };

        let stored = match self.store.get(&access_key) {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                return RequestAuthContext::denied(
                    AuthOutcome::CredentialMissing,
                    self.reauthenticate_message(),
                )
            }
            Err(e) => {
                warn!(error = %e, "Credential lookup failed");
                return RequestAuthContext::denied(
                    AuthOutcome::StoreLookupFailed,
                    self.reauthenticate_message(),
                );
            }
        };

        let credential = match OAuthCredential::parse(&stored.payload) {
            Ok(credential) => credential,
            Err(e) => {
                warn!(subject_id = %stored.subject_id, error = %e, "Stored credential is malformed");
                return RequestAuthContext::denied(
                    AuthOutcome::ParseFailed,
                    self.reauthenticate_message(),
                );
            }
        };

        if let Some(access_value) = credential.access_value().filter(|_| credential.is_valid(now))
        {
            return RequestAuthContext::granted(
                AuthOutcome::Valid,
                stored.subject_id,
                self.mailbox_factory.connect(access_value),
            );
        }

        if credential.is_expired(now) && credential.has_refresh_token() {
            return self.refresh(&stored, &credential).await;
        }

        RequestAuthContext::denied(
            AuthOutcome::InvalidUnrefreshable,
            format!(
                "There has been an error with authenticating, please deauthenticate the app and go to {}",
                self.login_url
            ),
        )
    }

    async fn refresh(
        &self,
        stored: &StoredCredential,
        credential: &OAuthCredential,
    ) -> RequestAuthContext {
        info!(subject_id = %stored.subject_id, "Refreshing expired credentials");

        let refreshed = match self.refresher.refresh(credential).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!(subject_id = %stored.subject_id, error = %e, "Credential refresh failed");
                return RequestAuthContext::denied(
                    AuthOutcome::RefreshFailed,
                    self.reauthenticate_message(),
                );
            }
        };

        if refreshed.subject_id != stored.subject_id {
            warn!(
                stored_subject = %stored.subject_id,
                token_subject = %refreshed.subject_id,
                "ID token subject differs from stored record"
            );
        }

        if let Err(e) = self.store.upsert_by_subject(
            &refreshed.subject_id,
            &refreshed.access_value,
            refreshed.expires_at,
        ) {
            warn!(subject_id = %refreshed.subject_id, error = %e, "Failed to persist refreshed credentials");
            return RequestAuthContext::denied(
                AuthOutcome::RefreshFailed,
                self.reauthenticate_message(),
            );
        }

        info!(subject_id = %refreshed.subject_id, "Stored refreshed access value");

        let mailbox = self.mailbox_factory.connect(&refreshed.access_value);
        RequestAuthContext::granted(AuthOutcome::Refreshed, refreshed.subject_id, mailbox)
    }

    fn reauthenticate_message(&self) -> String {
        format!(
            "There has been an error with authenticating, please go to {} and authenticate again",
            self.login_url
        )
    }
}

/// Resolves the session and stores the context in request extensions.
///
/// Install with `axum::middleware::from_fn_with_state(guard, session_middleware)`.
pub async fn session_middleware(
    State(guard): State<Arc<SessionGuard>>,
    mut request: Request,
    next: Next,
) -> Response {
    let context = guard.resolve(request.headers(), Utc::now()).await;
    request.extensions_mut().insert(context);
    next.run(request).await
}
