use anyhow::{Context, Result};
use mailalias::api::HttpMessenger;
use mailalias::config::MailaliasConfig;
use mailalias::lock::KeyManager;
use mailalias::remote::HttpAliasClient;
use mailalias::storage::SecretStore;
use clap::Parser;
use mailalias_ctl::{Cli, Ctl};
use std::sync::Arc;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailalias_ctl=warn".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = MailaliasConfig::from_env().context("Failed to load configuration")?;
    debug!(
        background = %config.background.base_url(),
        storage = %config.storage.path.display(),
        "Configuration loaded"
    );

    let store = SecretStore::open_sqlite(&config.storage.path)
        .context("Failed to open secret store")?;
    let messenger = Arc::new(
        HttpMessenger::new(
            config.background.base_url(),
            config.background.auth_token.clone(),
        )
        .context("Failed to initialize background messenger")?,
    );
    let api = Arc::new(
        HttpAliasClient::with_base_url(config.remote.base_url.clone())
            .context("Failed to initialize alias API client")?,
    );

    let keys = KeyManager::new(store, messenger.clone(), config.crypto.kdf_iterations)
        .with_alias_api(api.clone());
    let ctl = Ctl::new(keys, messenger, api);

    let stdin = std::io::stdin();
    let output = ctl.run(cli.command, &mut stdin.lock()).await?;
    println!("{}", output);

    Ok(())
}
