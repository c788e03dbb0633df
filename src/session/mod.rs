//! In-memory session key owned by the background service.
//!
//! The session key is the plaintext API key for the lifetime of one
//! background-service process. It is never persisted: a restart always
//! starts empty, which is what locking buys the user.

use crate::credentials::{normalize_api_key, CredentialError};
use crate::storage::SecretStore;
use std::sync::Mutex;
use tracing::{debug, info};
use zeroize::Zeroizing;


/// Holder of the session key and the policy for picking the operational key.
///
/// Create one per process and share it behind an `Arc`. The key can only be
/// changed through [`set_session_key`](Self::set_session_key) and
/// [`clear_session_key`](Self::clear_session_key), and only read through
/// [`resolve_operational_key`](Self::resolve_operational_key).
pub struct SessionAuthority {
    store: SecretStore,
    session_key: Mutex<Zeroizing<String>>,
}

impl SessionAuthority {
    pub fn new(store: SecretStore) -> Self {
        Self {
            store,
            session_key: Mutex::new(Zeroizing::new(String::new())),
        }
    }

    fn lock_key(&self) -> std::sync::MutexGuard<'_, Zeroizing<String>> {
        // The guarded value is a plain string; a panic elsewhere cannot leave it torn.
        self.session_key
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores the normalized key. No format validation happens here.
    pub fn set_session_key(&self, key: &str) {
        let normalized = Zeroizing::new(normalize_api_key(key));
        *self.lock_key() = normalized;
        info!("Session key set");
    }

    /// Forgets the session key. Idempotent.
    pub fn clear_session_key(&self) {
        *self.lock_key() = Zeroizing::new(String::new());
        info!("Session key cleared");
    }

    pub fn has_session_key(&self) -> bool {
        !self.lock_key().is_empty()
    }

    /// Returns the key operation logic must use right now.
    ///
    /// - locked: the session key, or [`CredentialError::Locked`] when empty
    /// - unlocked: the stored plaintext key, or [`CredentialError::MissingKey`]
    ///
    /// Storage and remote failures are returned as-is.
    pub async fn resolve_operational_key(&self) -> Result<String, CredentialError> {
        if self.store.is_locked().await? {
            let key = self.lock_key();
            if key.is_empty() {
                debug!("Operational key requested while locked");
                return Err(CredentialError::Locked);
            }
            return Ok(key.as_str().to_string());
        }

        let key = normalize_api_key(&self.store.api_key().await?);
        if key.is_empty() {
            return Err(CredentialError::MissingKey);
        }
        Ok(key)
    }
}
