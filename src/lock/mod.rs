//! Lock/unlock orchestration, run from a UI context.
//!
//! The [`KeyManager`] moves the credential between its four states:
//!
//! ```text
//! NoCredentials            ──save_api_key / connect──▶ LegacyUnlocked
//! LegacyUnlocked           ──enable_lock────────────▶ SessionUnlocked
//! SessionUnlocked          ──lock_now───────────────▶ Locked
//! Locked                   ──unlock─────────────────▶ SessionUnlocked
//! Locked / SessionUnlocked ──disable_lock───────────▶ LegacyUnlocked
//! any                      ──disconnect─────────────▶ NoCredentials
//! ```
//!
//! Cheap validation always runs before any crypto, and the store is only
//! written after the crypto step it depends on has succeeded. Every flow
//! that leaves a usable key behind pushes it to the background service.
//! That push happens after the storage commit, so its failure is reported
//! as a [`SessionSync`] next to a successful transition, not as an error.

use crate::api::client::Messenger;
use crate::api::protocol::Message;
use crate::credentials::{
    decrypt_async, encrypt_async, is_likely_api_key, normalize_api_key, CredentialError,
};
use crate::remote::AliasApi;
use crate::storage::SecretStore;
use std::sync::Arc;
use tracing::{info, warn};

#[cfg(test)]
mod tests;

/// Minimum length for a new lock password.
pub const MIN_NEW_PASSWORD_LEN: usize = 8;

/// Minimum length accepted when unlocking or disabling the lock.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Where the credential currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// Nothing usable stored.
    NoCredentials,
    /// Plaintext key stored, no lock.
    LegacyUnlocked,
    /// Lock enabled and the background service has no session key.
    Locked,
    /// Lock enabled and the background service holds the key.
    SessionUnlocked,
}

impl CredentialState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialState::NoCredentials => "no credentials",
            CredentialState::LegacyUnlocked => "unlocked (no lock)",
            CredentialState::Locked => "locked",
            CredentialState::SessionUnlocked => "unlocked (session)",
        }
    }
}

impl std::fmt::Display for CredentialState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the background service took the key after a committed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSync {
    Delivered,
    /// Storage holds the new state; the background service was not updated.
    Failed(CredentialError),
}

impl SessionSync {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SessionSync::Delivered)
    }

    pub fn error(&self) -> Option<&CredentialError> {
        match self {
            SessionSync::Delivered => None,
            SessionSync::Failed(e) => Some(e),
        }
    }
}

/// Runs the lock flows against the Secret Store and the background service.
pub struct KeyManager {
    store: SecretStore,
    messenger: Arc<dyn Messenger>,
    kdf_iterations: u32,
    api: Option<Arc<dyn AliasApi>>,
}

impl KeyManager {
    pub fn new(store: SecretStore, messenger: Arc<dyn Messenger>, kdf_iterations: u32) -> Self {
        Self {
            store,
            messenger,
            kdf_iterations,
            api: None,
        }
    }

    /// Enables [`connect`](Self::connect), which checks a key remotely before saving it.
    pub fn with_alias_api(mut self, api: Arc<dyn AliasApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn store(&self) -> &SecretStore {
        &self.store
    }

    pub async fn state(&self) -> Result<CredentialState, CredentialError> {
        if self.store.is_locked().await? {
            let reply = self.messenger.request(Message::SessionStatus).await?;
            let has_session_key = reply.field::<Option<bool>>("hasSessionKey")?.unwrap_or(false);
            return Ok(if has_session_key {
                CredentialState::SessionUnlocked
            } else {
                CredentialState::Locked
            });
        }

        let api_key = normalize_api_key(&self.store.api_key().await?);
        Ok(if is_likely_api_key(&api_key) {
            CredentialState::LegacyUnlocked
        } else {
            CredentialState::NoCredentials
        })
    }

    /// Stores `api_key` in plaintext and hands it to the background service.
    pub async fn save_api_key(&self, api_key: &str) -> Result<SessionSync, CredentialError> {
        let api_key = self.checked_new_key(api_key).await?;
        self.persist_plaintext(&api_key).await
    }

    /// Like [`save_api_key`](Self::save_api_key), but only after the key
    /// authenticates against the remote service.
    pub async fn connect(&self, api_key: &str) -> Result<SessionSync, CredentialError> {
        let api_key = self.checked_new_key(api_key).await?;
        let api = self
            .api
            .as_ref()
            .ok_or_else(|| CredentialError::Remote("Alias API not configured.".to_string()))?;

        api.list_aliases(&api_key, 1, 0).await?;
        info!("API key verified");
        self.persist_plaintext(&api_key).await
    }

    pub async fn enable_lock(
        &self,
        password: &str,
        confirmation: &str,
    ) -> Result<SessionSync, CredentialError> {
        if password.chars().count() < MIN_NEW_PASSWORD_LEN {
            return Err(CredentialError::validation(
                "Password must be at least 8 characters.",
            ));
        }
        if password != confirmation {
            return Err(CredentialError::validation("Passwords do not match."));
        }

        let api_key = normalize_api_key(&self.store.api_key().await?);
        if api_key.is_empty() {
            return Err(CredentialError::validation(
                "Set the API-Key before enabling the lock.",
            ));
        }
        if !is_likely_api_key(&api_key) {
            return Err(CredentialError::validation(
                "Invalid API-Key in storage (legacy mode).",
            ));
        }

        let payload =
            encrypt_async(api_key.clone(), password.to_string(), self.kdf_iterations).await?;

        // Payload must be durable before the plaintext goes away.
        self.store.set_api_key_enc_payload(&payload).await?;
        self.store.set_locked(true).await?;
        self.store.remove_api_key().await?;
        info!(kdf_iterations = payload.kdf_iterations, "Lock enabled");

        Ok(self.sync_session_key(&api_key).await)
    }

    /// Decrypts the stored key and hands it to the background service.
    /// Storage is left untouched.
    pub async fn unlock(&self, password: &str) -> Result<(), CredentialError> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(CredentialError::validation("Password too short."));
        }

        let payload = self
            .store
            .api_key_enc_payload()
            .await?
            .ok_or_else(|| CredentialError::validation("No encrypted key found."))?;

        let api_key = normalize_api_key(&decrypt_async(payload, password.to_string()).await?);
        if !is_likely_api_key(&api_key) {
            return Err(CredentialError::validation("Invalid API-Key after decrypt."));
        }

        self.push_session_key(&api_key).await?;
        info!("Session unlocked");
        Ok(())
    }

    /// Drops the session key in the background service. No storage writes.
    pub async fn lock_now(&self) -> Result<(), CredentialError> {
        self.messenger.request(Message::ClearSessionKey).await?;
        info!("Session locked");
        Ok(())
    }

    /// Returns to plaintext storage after proving the password.
    pub async fn disable_lock(&self, password: &str) -> Result<SessionSync, CredentialError> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(CredentialError::validation("Password too short."));
        }

        let payload = self
            .store
            .api_key_enc_payload()
            .await?
            .ok_or_else(|| CredentialError::validation("No encrypted key found."))?;

        let api_key = normalize_api_key(&decrypt_async(payload, password.to_string()).await?);
        if !is_likely_api_key(&api_key) {
            return Err(CredentialError::Decryption);
        }

        self.store.set_api_key(&api_key).await?;
        self.store.clear_api_key_enc_payload().await?;
        self.store.set_locked(false).await?;
        info!("Lock disabled");

        Ok(self.sync_session_key(&api_key).await)
    }

    /// Forgets the credential everywhere, from any state.
    ///
    /// Storage is wiped even when the background service cannot be reached;
    /// the messenger error is returned after the wipe.
    pub async fn disconnect(&self) -> Result<(), CredentialError> {
        let cleared = self.messenger.request(Message::ClearSessionKey).await;

        self.store.clear_credentials().await?;
        self.store.clear_last_domain().await?;
        info!("Credentials removed");

        if let Err(e) = cleared {
            warn!(error = %e, "Background service did not clear its session key");
            return Err(e);
        }
        Ok(())
    }

    async fn checked_new_key(&self, api_key: &str) -> Result<String, CredentialError> {
        if self.store.is_locked().await? {
            return Err(CredentialError::validation(
                "Lock enabled: disable the lock before changing the key.",
            ));
        }

        let api_key = normalize_api_key(api_key);
        if api_key.is_empty() {
            return Err(CredentialError::validation("API-Key is empty."));
        }
        if !is_likely_api_key(&api_key) {
            return Err(CredentialError::validation(
                "Invalid API-Key (expected 64 chars a-z0-9).",
            ));
        }
        Ok(api_key)
    }

    async fn persist_plaintext(&self, api_key: &str) -> Result<SessionSync, CredentialError> {
        self.store.set_api_key(api_key).await?;
        info!("API key saved");
        Ok(self.sync_session_key(api_key).await)
    }

    async fn sync_session_key(&self, api_key: &str) -> SessionSync {
        match self.push_session_key(api_key).await {
            Ok(()) => SessionSync::Delivered,
            Err(e) => {
                warn!(error = %e, "Background service not updated with the session key");
                SessionSync::Failed(e)
            }
        }
    }

    async fn push_session_key(&self, api_key: &str) -> Result<(), CredentialError> {
        self.messenger
            .request(Message::SetSessionKey {
                api_key: api_key.to_string(),
            })
            .await?;
        Ok(())
    }
}
