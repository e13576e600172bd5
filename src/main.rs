use anyhow::{Context, Result};
use mailgate::api::{create_router, ToolsAppState};
use mailgate::config::{CredentialBackendKind, MailgateConfig};
use mailgate::confirmation::ConfirmationGuard;
use mailgate::credentials::{CredentialBackend, CredentialStore, MemoryCredentialStore};
use mailgate::gmail::GmailFactory;
use mailgate::oauth::{GoogleTokenRefresher, IdTokenVerifier};
use mailgate::session::SessionGuard;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailgate=info".into()),
        )
        .init();

    info!("Mailgate starting...");

    let config = MailgateConfig::from_env().context("Failed to load configuration")?;

    info!(
        bind_addr = %config.server.bind_addr,
        app_host = %config.server.app_host,
        credentials_backend = ?config.credentials.backend,
        signed_confirmations = config.confirmation.signing_key.is_some(),
        "Configuration loaded"
    );

    let store: Arc<dyn CredentialBackend> = match config.credentials.backend {
        CredentialBackendKind::Sqlite => {
            let encryption_key = std::env::var("MAILGATE_ENCRYPTION_KEY")
                .context("MAILGATE_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;
            Arc::new(
                CredentialStore::new(&config.credentials.db_path, &encryption_key)
                    .context("Failed to initialize credential store")?,
            )
        }
        CredentialBackendKind::Memory => {
            warn!("Using in-memory credential store; credentials are lost on restart");
            Arc::new(MemoryCredentialStore::new())
        }
    };
    info!("Credential store initialized");

    let http_client = reqwest::Client::new();
    let oauth_timeout = Duration::from_secs(config.oauth.timeout_seconds);

    let verifier = IdTokenVerifier::new(
        http_client.clone(),
        config.oauth.jwks_url.clone(),
        config.oauth.issuers.clone(),
        &config.oauth.algorithms,
        oauth_timeout,
    )
    .context("Invalid ID token verification settings")?;

    let refresher = Arc::new(GoogleTokenRefresher::new(
        http_client,
        config.oauth.token_endpoint.clone(),
        verifier,
        oauth_timeout,
    ));

    let mailbox_factory = Arc::new(GmailFactory::new(
        config.gmail.base_url.clone(),
        Duration::from_secs(config.gmail.timeout_seconds),
    ));

    let guard = Arc::new(SessionGuard::new(
        store,
        refresher,
        mailbox_factory,
        &config.server.app_host,
    ));

    let state = ToolsAppState {
        confirmation: ConfirmationGuard::new(
            config.confirmation.validity()?,
            config
                .confirmation
                .signing_key
                .as_ref()
                .map(|key| key.as_bytes().to_vec()),
        ),
        metadata_concurrency: config.gmail.metadata_concurrency,
    };

    let router = create_router(state, guard);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(bind_addr = %config.server.bind_addr, "Mailgate listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Mailgate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl_c signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
