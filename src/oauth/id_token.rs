//! ID token verification against the issuer's JWKS.

use anyhow::{anyhow, bail, Context, Result};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Google's published signing keys.
pub const DEFAULT_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";

/// Accepted `iss` values for Google ID tokens.
pub const DEFAULT_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

const JWKS_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct JwksCacheEntry {
    fetched_at: Instant,
    jwks: Arc<JwkSet>,
}

#[derive(Deserialize)]
struct IdClaims {
    sub: String,
}

/// Verifies ID tokens and extracts their subject.
///
/// Keys are cached for a minute. A token signed with a key id missing from
/// the cached set forces one refetch, so key rotation is picked up without
/// waiting for the cache to expire.
pub struct IdTokenVerifier {
    http_client: reqwest::Client,
    jwks_url: String,
    issuers: Vec<String>,
    algorithms: Vec<Algorithm>,
    timeout: Duration,
    cache: Mutex<Option<JwksCacheEntry>>,
}

impl IdTokenVerifier {
    pub fn new(
        http_client: reqwest::Client,
        jwks_url: String,
        issuers: Vec<String>,
        algorithms: &[String],
        timeout: Duration,
    ) -> Result<Self> {
        let algorithms = algorithms
            .iter()
            .map(|name| {
                name.parse::<Algorithm>()
                    .map_err(|_| anyhow!("Unsupported ID token algorithm: {}", name))
            })
            .collect::<Result<Vec<_>>>()?;

        if algorithms.is_empty() {
            bail!("At least one ID token algorithm must be configured");
        }

        Ok(Self {
            http_client,
            jwks_url,
            issuers,
            algorithms,
            timeout,
            cache: Mutex::new(None),
        })
    }

    /// Verifies signature, expiry, issuer and audience, and returns `sub`.
    pub async fn verify(&self, id_token: &str, audience: &str) -> Result<String> {
        let header = jsonwebtoken::decode_header(id_token).context("Malformed ID token header")?;
        // jsonwebtoken refuses algorithm lists mixing key families; validate
        // against the token's own algorithm once it is known to be allowed.
        if !self.algorithms.contains(&header.alg) {
            bail!("ID token algorithm {:?} is not accepted", header.alg);
        }
        let key = self.decoding_key(header.kid.as_deref()).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[audience]);
        validation.set_issuer(&self.issuers);

        let data = jsonwebtoken::decode::<IdClaims>(id_token, &key, &validation)
            .context("ID token verification failed")?;

        if data.claims.sub.is_empty() {
            bail!("ID token has an empty subject");
        }
        Ok(data.claims.sub)
    }

    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey> {
        let jwks = self.fetch_jwks(false).await?;
        let jwk = match kid {
            Some(kid) => match jwks.find(kid) {
                Some(jwk) => jwk.clone(),
                None => {
                    debug!(kid, "Key id not in cached JWKS, refetching");
                    self.fetch_jwks(true)
                        .await?
                        .find(kid)
                        .cloned()
                        .ok_or_else(|| anyhow!("No signing key with id {}", kid))?
                }
            },
            None => jwks
                .keys
                .first()
                .cloned()
                .ok_or_else(|| anyhow!("JWKS contains no keys"))?,
        };

        DecodingKey::from_jwk(&jwk).context("Unusable signing key")
    }

    async fn fetch_jwks(&self, force: bool) -> Result<Arc<JwkSet>> {
        if !force {
            let cached = self
                .cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(entry) = cached {
                if entry.fetched_at.elapsed() < JWKS_CACHE_TTL {
                    return Ok(entry.jwks);
                }
            }
        }

        let response = self
            .http_client
            .get(&self.jwks_url)
            .timeout(self.timeout)
            .send()
            .await
            .context("Failed to fetch JWKS")?;

        if !response.status().is_success() {
            bail!("JWKS fetch failed with status {}", response.status());
        }

        let jwks: JwkSet = response.json().await.context("Failed to parse JWKS")?;
        let jwks = Arc::new(jwks);

        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(JwksCacheEntry {
            fetched_at: Instant::now(),
            jwks: Arc::clone(&jwks),
        });

        Ok(jwks)
    }
}
