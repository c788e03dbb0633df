//! Persistent Secret Store.
//!
//! A key-value store shared by the background service and every UI context.
//! Credential slots:
//!
//! | key                | value                         | absent reads as |
//! |--------------------|-------------------------------|-----------------|
//! | `apiKey`           | plaintext key (legacy mode)   | `""`            |
//! | `apiKeyEncPayload` | [`EncryptedKeyPayload`]       | `None`          |
//! | `locked`           | bool                          | `false`         |
//!
//! plus non-sensitive preferences (`domainsCache`, `lastDomain`,
//! `defaultDomain`, `uiMode`).
//!
//! Writes are atomic per key only. Flows that touch several slots must
//! order their writes so an interruption never loses the key.

mod memory;
mod sqlite;


pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use crate::credentials::{normalize_api_key, CredentialError, EncryptedKeyPayload};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

pub const KEY_API_KEY: &str = "apiKey";
pub const KEY_API_KEY_ENC: &str = "apiKeyEncPayload";
pub const KEY_LOCKED: &str = "locked";
pub const KEY_DOMAINS_CACHE: &str = "domainsCache";
pub const KEY_LAST_DOMAIN: &str = "lastDomain";
pub const KEY_DEFAULT_DOMAIN: &str = "defaultDomain";
pub const KEY_UI_MODE: &str = "uiMode";

/// How long a cached domain list is considered fresh.
pub const DOMAINS_CACHE_TTL_HOURS: i64 = 24;

/// Raw asynchronous key-value storage.
///
/// Reading an absent key is `Ok(None)`, never an error.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Removes every listed key; missing keys are ignored.
    async fn remove(&self, keys: &[&str]) -> Result<()>;
}

/// How alias-creation controls are injected next to email fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiMode {
    Buttons,
    #[default]
    Icon,
}

/// Cached domain list with the time it was fetched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainsCache {
    /// Fetch time in milliseconds since the Unix epoch
    pub ts: i64,
    pub items: Vec<String>,
}

impl DomainsCache {
    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.ts)
    }

    /// True when fetched less than [`DOMAINS_CACHE_TTL_HOURS`] before `now`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        match self.fetched_at() {
            Some(ts) => now - ts < Duration::hours(DOMAINS_CACHE_TTL_HOURS),
            None => false,
        }
    }
}

fn storage_err(e: anyhow::Error) -> CredentialError {
    CredentialError::Storage(format!("{:#}", e))
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().to_lowercase()
}

/// Typed view over a [`StorageBackend`].
///
/// Cheap to clone; every clone talks to the same backend.
#[derive(Clone)]
pub struct SecretStore {
    backend: Arc<dyn StorageBackend>,
}

impl SecretStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by a fresh [`MemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Store backed by SQLite at `path`.
    pub fn open_sqlite<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Arc::new(SqliteBackend::new(path)?)))
    }

    async fn get_string(&self, key: &str) -> Result<String, CredentialError> {
        let value = self.backend.get(key).await.map_err(storage_err)?;
        Ok(match value {
            Some(Value::String(s)) => s,
            _ => String::new(),
        })
    }

    async fn set_value(&self, key: &str, value: Value) -> Result<(), CredentialError> {
        self.backend.set(key, value).await.map_err(storage_err)
    }

    async fn remove(&self, keys: &[&str]) -> Result<(), CredentialError> {
        self.backend.remove(keys).await.map_err(storage_err)
    }

    // ---------- credentials ----------

    /// Plaintext key as stored (legacy mode); empty when absent.
    pub async fn api_key(&self) -> Result<String, CredentialError> {
        self.get_string(KEY_API_KEY).await
    }

    pub async fn set_api_key(&self, api_key: &str) -> Result<(), CredentialError> {
        self.set_value(KEY_API_KEY, json!(normalize_api_key(api_key)))
            .await
    }

    /// Removes only the plaintext key.
    pub async fn remove_api_key(&self) -> Result<(), CredentialError> {
        self.remove(&[KEY_API_KEY]).await
    }

    /// Encrypted payload, `None` when absent or unreadable.
    pub async fn api_key_enc_payload(
        &self,
    ) -> Result<Option<EncryptedKeyPayload>, CredentialError> {
        let value = self
            .backend
            .get(KEY_API_KEY_ENC)
            .await
            .map_err(storage_err)?;

        Ok(match value {
            None | Some(Value::Null) => None,
            Some(v) => match serde_json::from_value(v) {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!(error = %e, "Ignoring unreadable encrypted key payload");
                    None
                }
            },
        })
    }

    pub async fn set_api_key_enc_payload(
        &self,
        payload: &EncryptedKeyPayload,
    ) -> Result<(), CredentialError> {
        let value = serde_json::to_value(payload)
            .map_err(|e| CredentialError::Storage(format!("Failed to encode payload: {}", e)))?;
        self.set_value(KEY_API_KEY_ENC, value).await
    }

    pub async fn clear_api_key_enc_payload(&self) -> Result<(), CredentialError> {
        self.remove(&[KEY_API_KEY_ENC]).await
    }

    /// Lock flag, read as truthy: absent, `null`, `false`, `0` and `""` are
    /// unlocked, any other stored value locks.
    pub async fn is_locked(&self) -> Result<bool, CredentialError> {
        let value = self.backend.get(KEY_LOCKED).await.map_err(storage_err)?;
        Ok(match value {
            None | Some(Value::Null) => false,
            Some(Value::Bool(locked)) => locked,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(_)) | Some(Value::Object(_)) => true,
        })
    }

    pub async fn set_locked(&self, locked: bool) -> Result<(), CredentialError> {
        self.set_value(KEY_LOCKED, json!(locked)).await
    }

    /// Removes plaintext key, encrypted payload and lock flag together.
    pub async fn clear_credentials(&self) -> Result<(), CredentialError> {
        self.remove(&[KEY_API_KEY, KEY_API_KEY_ENC, KEY_LOCKED]).await
    }

    // ---------- preferences ----------

    pub async fn domains_cache(&self) -> Result<Option<DomainsCache>, CredentialError> {
        let value = self
            .backend
            .get(KEY_DOMAINS_CACHE)
            .await
            .map_err(storage_err)?;
        Ok(value.and_then(|v| serde_json::from_value(v).ok()))
    }

    /// Caches `items` stamped with the current time.
    pub async fn set_domains_cache(&self, items: &[String]) -> Result<(), CredentialError> {
        let cache = DomainsCache {
            ts: Utc::now().timestamp_millis(),
            items: items.to_vec(),
        };
        self.set_value(KEY_DOMAINS_CACHE, json!(cache)).await
    }

    pub async fn clear_domains_cache(&self) -> Result<(), CredentialError> {
        self.remove(&[KEY_DOMAINS_CACHE]).await
    }

    pub async fn last_domain(&self) -> Result<String, CredentialError> {
        self.get_string(KEY_LAST_DOMAIN).await
    }

    pub async fn set_last_domain(&self, domain: &str) -> Result<(), CredentialError> {
        self.set_value(KEY_LAST_DOMAIN, json!(normalize_domain(domain)))
            .await
    }

    pub async fn clear_last_domain(&self) -> Result<(), CredentialError> {
        self.remove(&[KEY_LAST_DOMAIN]).await
    }

    pub async fn default_domain(&self) -> Result<String, CredentialError> {
        self.get_string(KEY_DEFAULT_DOMAIN).await
    }

    pub async fn set_default_domain(&self, domain: &str) -> Result<(), CredentialError> {
        self.set_value(KEY_DEFAULT_DOMAIN, json!(normalize_domain(domain)))
            .await
    }

    pub async fn clear_default_domain(&self) -> Result<(), CredentialError> {
        self.remove(&[KEY_DEFAULT_DOMAIN]).await
    }

    pub async fn ui_mode(&self) -> Result<UiMode, CredentialError> {
        let value = self.backend.get(KEY_UI_MODE).await.map_err(storage_err)?;
        Ok(value
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default())
    }

    pub async fn set_ui_mode(&self, mode: UiMode) -> Result<(), CredentialError> {
        self.set_value(KEY_UI_MODE, json!(mode)).await
    }
}
