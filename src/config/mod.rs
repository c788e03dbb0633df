use crate::credentials::DEFAULT_KDF_ITERATIONS;
use crate::remote::{DEFAULT_BASE_URL, DEFAULT_PAGE_LIMIT};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;

/// Env var naming the TOML config file
pub const CONFIG_PATH_ENV: &str = "MAILALIAS_CONFIG";

/// Complete mailalias configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailaliasConfig {
    #[serde(default)]
    pub background: BackgroundConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub crypto: CryptoConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

/// Background service listener
#[derive(Debug, Clone, Deserialize)]
pub struct BackgroundConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token shared with UI contexts. None = no check.
    #[serde(default)]
    pub auth_token: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8731
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_token: None,
        }
    }
}

impl BackgroundConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL UI contexts use to reach the service.
    pub fn base_url(&self) -> String {
        let host = match self.host.as_str() {
            "0.0.0.0" => "127.0.0.1",
            "::" => "[::1]",
            other => other,
        };
        format!("http://{}:{}", host, self.port)
    }
}

/// Secret Store location
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("mailalias.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CryptoConfig {
    /// PBKDF2 rounds for new payloads. Existing payloads keep their own count.
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
}

fn default_kdf_iterations() -> u32 {
    DEFAULT_KDF_ITERATIONS
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: default_kdf_iterations(),
        }
    }
}

/// Remote alias service
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Page size used when walking alias and activity lists
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_LIMIT
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeneratorConfig {
    /// JSON array of words. Built-in list when unset.
    #[serde(default)]
    pub dictionary_path: Option<PathBuf>,
}

impl MailaliasConfig {
    /// Load from `MAILALIAS_CONFIG` when set, else defaults; then apply env overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => load_config(&path)?,
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Override fields from `MAILALIAS_*` env vars.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Override fields from any variable lookup. Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MAILALIAS_HOST") {
            self.background.host = v;
        }
        if let Some(v) = lookup("MAILALIAS_PORT") {
            match v.parse::<u16>() {
                Ok(port) => self.background.port = port,
                Err(_) => warn!(value = %v, "Ignoring invalid MAILALIAS_PORT"),
            }
        }
        if let Some(v) = lookup("MAILALIAS_AUTH_TOKEN") {
            self.background.auth_token = if v.is_empty() { None } else { Some(v) };
        }
        if let Some(v) = lookup("MAILALIAS_STORAGE_PATH") {
            self.storage.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("MAILALIAS_KDF_ITERATIONS") {
            match v.parse::<u32>() {
                Ok(n) if n > 0 => self.crypto.kdf_iterations = n,
                _ => warn!(value = %v, "Ignoring invalid MAILALIAS_KDF_ITERATIONS"),
            }
        }
        if let Some(v) = lookup("MAILALIAS_API_BASE_URL") {
            self.remote.base_url = v;
        }
        if let Some(v) = lookup("MAILALIAS_DICTIONARY") {
            self.generator.dictionary_path = if v.is_empty() {
                None
            } else {
                Some(PathBuf::from(v))
            };
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<MailaliasConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: MailaliasConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}
