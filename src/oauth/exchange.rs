//! Refresh-token grant.

use super::{IdTokenVerifier, RefreshedToken, TokenRefresher};
use crate::credentials::OAuthCredential;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration as StdDuration;

/// Token endpoint response to a refresh grant
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    id_token: Option<String>,
}

/// Refreshes Google OAuth credentials and verifies the returned ID token.
pub struct GoogleTokenRefresher {
    http_client: reqwest::Client,
    default_token_endpoint: String,
    verifier: IdTokenVerifier,
    timeout: StdDuration,
}

impl GoogleTokenRefresher {
    /// # Arguments
    /// * `default_token_endpoint` - Used when a credential names no endpoint of its own
    /// * `verifier` - Checks the ID token returned with the new access value
    pub fn new(
        http_client: reqwest::Client,
        default_token_endpoint: String,
        verifier: IdTokenVerifier,
        timeout: StdDuration,
    ) -> Self {
        Self {
            http_client,
            default_token_endpoint,
            verifier,
            timeout,
        }
    }
}

#[async_trait]
impl TokenRefresher for GoogleTokenRefresher {
    async fn refresh(&self, credential: &OAuthCredential) -> Result<RefreshedToken> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow!("Credential has no refresh token"))?;

        let token_url = credential
            .token_uri
            .as_deref()
            .unwrap_or(&self.default_token_endpoint);

        let mut form_data = HashMap::new();
        form_data.insert("grant_type", "refresh_token");
        form_data.insert("refresh_token", refresh_token);
        form_data.insert("client_id", credential.client_id.as_str());
        form_data.insert("client_secret", credential.client_secret.as_str());

        tracing::debug!("Refreshing access value at {}", token_url);

        let response = self
            .http_client
            .post(token_url)
            .header("Accept", "application/json")
            .form(&form_data)
            .timeout(self.timeout)
            .send()
            .await
            .context("Failed to send token refresh request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Token refresh failed with status {}: {}",
                status,
                body
            ));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;

        let id_token = token_response
            .id_token
            .as_deref()
            .ok_or_else(|| anyhow!("Token response did not include an ID token"))?;

        let subject_id = self
            .verifier
            .verify(id_token, &credential.client_id)
            .await?;

        let expires_at = token_response
            .expires_in
            .map(|seconds| Utc::now() + Duration::seconds(seconds));

        Ok(RefreshedToken {
            access_value: token_response.access_token,
            expires_at,
            subject_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::id_token::test_support::{id_token, jwks_body, KID};
    use crate::oauth::DEFAULT_ISSUERS;
    use mockito::{Matcher, Server};

    fn credential(token_uri: Option<String>) -> OAuthCredential {
        OAuthCredential {
            token: Some("ya29.old".to_string()),
            refresh_token: Some("1//refresh".to_string()),
            token_uri,
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            scopes: vec![],
            expiry: Some(Utc::now() - Duration::minutes(5)),
        }
    }

    fn refresher(server: &Server) -> GoogleTokenRefresher {
        let http = reqwest::Client::new();
        let verifier = IdTokenVerifier::new(
            http.clone(),
            format!("{}/certs", server.url()),
            DEFAULT_ISSUERS.iter().map(|s| s.to_string()).collect(),
            &["HS256".to_string()],
            StdDuration::from_secs(5),
        )
        .unwrap();

        GoogleTokenRefresher::new(
            http,
            format!("{}/token", server.url()),
            verifier,
            StdDuration::from_secs(5),
        )
    }

    async fn mock_jwks(server: &mut Server) -> mockito::Mock {
        server
            .mock("GET", "/certs")
            .with_status(200)
            .with_body(jwks_body())
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_refresh_success() {
        let mut server = Server::new_async().await;
        let _jwks = mock_jwks(&mut server).await;
        let token = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "1//refresh".into()),
                Matcher::UrlEncoded("client_id".into(), "client-id".into()),
            ]))
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "access_token": "ya29.new",
                    "expires_in": 3599,
                    "id_token": id_token("subject-7", "client-id", KID),
                })
                .to_string(),
            )
            .create_async()
            .await;

        let refreshed = refresher(&server).refresh(&credential(None)).await.unwrap();

        assert_eq!(refreshed.access_value, "ya29.new");
        assert_eq!(refreshed.subject_id, "subject-7");
        assert!(refreshed.expires_at.unwrap() > Utc::now());
        token.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_uses_credential_endpoint() {
        let mut server = Server::new_async().await;
        let _jwks = mock_jwks(&mut server).await;
        let custom = server
            .mock("POST", "/custom-token")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "access_token": "ya29.custom",
                    "id_token": id_token("subject-7", "client-id", KID),
                })
                .to_string(),
            )
            .create_async()
            .await;

        let cred = credential(Some(format!("{}/custom-token", server.url())));
        let refreshed = refresher(&server).refresh(&cred).await.unwrap();

        assert_eq!(refreshed.access_value, "ya29.custom");
        assert!(refreshed.expires_at.is_none());
        custom.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_grant() {
        let mut server = Server::new_async().await;
        let _token = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error": "invalid_grant"}"#)
            .create_async()
            .await;

        let err = refresher(&server)
            .refresh(&credential(None))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("400"));
    }

    #[tokio::test]
    async fn test_missing_id_token() {
        let mut server = Server::new_async().await;
        let _token = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token": "ya29.new", "expires_in": 3600}"#)
            .create_async()
            .await;

        assert!(refresher(&server).refresh(&credential(None)).await.is_err());
    }

    #[tokio::test]
    async fn test_no_refresh_token() {
        let server = Server::new_async().await;
        let mut cred = credential(None);
        cred.refresh_token = None;

        assert!(refresher(&server).refresh(&cred).await.is_err());
    }

    #[test]
    fn test_token_response_minimal() {
        let json = r#"{"access_token": "token_12345"}"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "token_12345");
        assert_eq!(response.expires_in, None);
        assert_eq!(response.id_token, None);
    }
}
