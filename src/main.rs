use anyhow::{Context, Result};
use mailalias::api::{create_background_router, Background, BackgroundAppState};
use mailalias::config::MailaliasConfig;
use mailalias::remote::{AliasGenerator, HttpAliasClient};
use mailalias::session::SessionAuthority;
use mailalias::storage::SecretStore;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailalias=info".into()),
        )
        .init();

    info!("Mailalias background service starting...");

    let config = MailaliasConfig::from_env().context("Failed to load configuration")?;

    info!(
        bind = %config.background.bind_address(),
        storage = %config.storage.path.display(),
        api_base_url = %config.remote.base_url,
        auth = config.background.auth_token.is_some(),
        "Configuration loaded"
    );
    if config.background.auth_token.is_none() {
        warn!("No auth token configured; /api/message accepts any local client");
    }

    // Initialize Secret Store
    let store = SecretStore::open_sqlite(&config.storage.path)
        .context("Failed to open secret store")?;
    info!("Secret store initialized");

    // Session key starts empty on every start
    let session = Arc::new(SessionAuthority::new(store));

    let api = Arc::new(
        HttpAliasClient::with_base_url(config.remote.base_url.clone())
            .context("Failed to initialize alias API client")?,
    );

    let generator = match &config.generator.dictionary_path {
        Some(path) => match AliasGenerator::load(path) {
            Ok(generator) => generator,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Failed to load dictionary, using built-in list");
                AliasGenerator::builtin()
            }
        },
        None => AliasGenerator::builtin(),
    };

    let background = Arc::new(
        Background::new(session, api)
            .with_generator(generator)
            .with_page_size(config.remote.page_size),
    );

    // Start HTTP server
    let router = create_background_router(BackgroundAppState {
        background,
        auth_token: config.background.auth_token.clone(),
    });
    let listener = tokio::net::TcpListener::bind(config.background.bind_address())
        .await
        .context("Failed to bind background service address")?;
    info!(address = %config.background.bind_address(), "Background service listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Background service error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Background service stopped");

    Ok(())
}
