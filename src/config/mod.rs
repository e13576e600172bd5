//! Service configuration.
//!
//! Loaded from the TOML file named by `MAILGATE_CONFIG` (defaults when
//! unset), then overridden by environment variables.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Complete mailgate configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailgateConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub gmail: GmailConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Public base URL, used to build the login link in auth errors
    #[serde(default = "default_app_host")]
    pub app_host: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_app_host() -> String {
    "http://localhost:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            app_host: default_app_host(),
        }
    }
}

/// Where credential records live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackendKind {
    Sqlite,
    /// Lost on restart
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_backend")]
    pub backend: CredentialBackendKind,
    #[serde(default = "default_credentials_db")]
    pub db_path: String,
}

fn default_backend() -> CredentialBackendKind {
    CredentialBackendKind::Sqlite
}

fn default_credentials_db() -> String {
    "credentials.db".to_string()
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            db_path: default_credentials_db(),
        }
    }
}

/// Token refresh and ID token verification
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// Used when a stored credential names no endpoint
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    #[serde(default = "default_jwks_url")]
    pub jwks_url: String,
    #[serde(default = "default_issuers")]
    pub issuers: Vec<String>,
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_token_endpoint() -> String {
    crate::oauth::DEFAULT_TOKEN_ENDPOINT.to_string()
}

fn default_jwks_url() -> String {
    crate::oauth::DEFAULT_JWKS_URL.to_string()
}

fn default_issuers() -> Vec<String> {
    crate::oauth::DEFAULT_ISSUERS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_algorithms() -> Vec<String> {
    vec!["RS256".to_string()]
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            token_endpoint: default_token_endpoint(),
            jwks_url: default_jwks_url(),
            issuers: default_issuers(),
            algorithms: default_algorithms(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Mailbox API access
#[derive(Debug, Clone, Deserialize)]
pub struct GmailConfig {
    #[serde(default = "default_gmail_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Metadata fetches in flight per list request
    #[serde(default = "default_metadata_concurrency")]
    pub metadata_concurrency: usize,
}

fn default_gmail_base_url() -> String {
    crate::gmail::DEFAULT_BASE_URL.to_string()
}

fn default_metadata_concurrency() -> usize {
    10
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            base_url: default_gmail_base_url(),
            timeout_seconds: default_timeout_seconds(),
            metadata_concurrency: default_metadata_concurrency(),
        }
    }
}

/// Confirmation tokens for destructive operations
#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmationConfig {
    #[serde(default = "default_validity_seconds")]
    pub validity_seconds: i64,
    /// When set, tokens carry an HMAC-SHA256 tag
    #[serde(default)]
    pub signing_key: Option<String>,
}

fn default_validity_seconds() -> i64 {
    crate::confirmation::DEFAULT_VALIDITY_SECONDS
}

impl ConfirmationConfig {
    /// Validity window as a duration; must be positive.
    pub fn validity(&self) -> Result<chrono::Duration> {
        if self.validity_seconds <= 0 {
            bail!(
                "confirmation.validity_seconds must be positive, got {}",
                self.validity_seconds
            );
        }
        chrono::Duration::try_seconds(self.validity_seconds).with_context(|| {
            format!(
                "confirmation.validity_seconds out of range: {}",
                self.validity_seconds
            )
        })
    }
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            validity_seconds: default_validity_seconds(),
            signing_key: None,
        }
    }
}

impl MailgateConfig {
    /// Loads the file named by `MAILGATE_CONFIG` if set, then applies
    /// environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("MAILGATE_CONFIG") {
            Ok(path) => load_config(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that parse but cannot be used.
    pub fn validate(&self) -> Result<()> {
        self.confirmation.validity()?;
        Ok(())
    }

    /// Overrides selected fields from `lookup` (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("MAILGATE_BIND_ADDR") {
            self.server.bind_addr = value;
        }
        if let Some(value) = lookup("MAILGATE_APP_HOST") {
            self.server.app_host = value;
        }
        if let Some(value) = lookup("MAILGATE_CREDENTIALS_DB") {
            self.credentials.db_path = value;
        }
        if let Some(value) = lookup("MAILGATE_GMAIL_BASE_URL") {
            self.gmail.base_url = value;
        }
        if let Some(value) = lookup("MAILGATE_CONFIRMATION_SIGNING_KEY") {
            self.confirmation.signing_key = Some(value).filter(|v| !v.is_empty());
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<MailgateConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: MailgateConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file {}", path))?;
    Ok(config)
}
