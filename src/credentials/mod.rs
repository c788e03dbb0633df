//! API key handling and password-based protection of the key at rest.
//!
//! The API key is the sole bearer credential for the remote alias account.
//! It is either stored in plaintext (legacy mode) or sealed into an
//! [`EncryptedKeyPayload`] under a user password (locked mode).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       KeyManager (UI context)            │
//! │  - enable / disable lock                 │
//! │  - unlock with password                  │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Encryption Module                  │
//! │  - PBKDF2-HMAC-SHA256 (310k iterations)  │
//! │  - AES-256-GCM, fresh salt + IV per call │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SecretStore                        │
//! │  - apiKey / apiKeyEncPayload / locked    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use mailalias::credentials::{decrypt, encrypt, DEFAULT_KDF_ITERATIONS};
//!
//! # fn main() -> Result<(), mailalias::credentials::CredentialError> {
//! let payload = encrypt(&"a".repeat(64), "longenough1", DEFAULT_KDF_ITERATIONS)?;
//! let key = decrypt(&payload, "longenough1")?;
//! assert_eq!(key, "a".repeat(64));
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! - Salt and IV are freshly random on every encryption
//! - Payload is self-describing: only the payload and the password are needed
//! - A wrong password and a corrupted payload produce the same error

mod encryption;

pub use encryption::{
    decrypt, decrypt_async, encrypt, encrypt_async, EncryptedKeyPayload, CIPHER_NAME,
    DEFAULT_KDF_ITERATIONS, KDF_NAME, PAYLOAD_VERSION,
};

use thiserror::Error;

/// Length of a well-formed API key.
pub const API_KEY_LEN: usize = 64;

/// Credential-flow failures.
///
/// Every credential operation fails with exactly one of these kinds; the
/// `Display` text is what crosses the UI-context boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// Malformed input caught before any I/O (password policy, key format).
    #[error("{0}")]
    Validation(String),

    /// Locked and no session key present in the background service.
    #[error("Locked. Open the extension and unlock first.")]
    Locked,

    /// Legacy mode with no stored key.
    #[error("API-Key not set.")]
    MissingKey,

    /// Wrong password or corrupted payload; the two are not told apart.
    #[error("Incorrect password or invalid payload.")]
    Decryption,

    /// Underlying Secret Store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Transport or remote-API failure, message surfaced verbatim.
    #[error("{0}")]
    Remote(String),

    /// The background service could not be reached or answered `ok: false`.
    #[error("{0}")]
    Background(String),
}

impl CredentialError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CredentialError::Validation(msg.into())
    }
}

/// Trim and lowercase a candidate API key.
pub fn normalize_api_key(key: &str) -> String {
    key.trim().to_lowercase()
}

/// Syntactic check only: 64 characters of `[a-z0-9]` after trimming.
///
/// A key that passes may still be rejected by the remote API.
pub fn is_likely_api_key(key: &str) -> bool {
    let key = key.trim();
    key.len() == API_KEY_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}
