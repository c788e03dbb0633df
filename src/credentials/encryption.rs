//! Password-based AES-256-GCM encryption for the API key.
//!
//! A 256-bit key is derived from the password with PBKDF2-HMAC-SHA256 over a
//! fresh 16-byte salt; the plaintext is sealed with AES-256-GCM under a fresh
//! 12-byte IV. Salt, IV and iteration count travel inside the payload.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

use super::CredentialError;

/// Size of the derived key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the KDF salt in bytes
const SALT_SIZE: usize = 16;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Default PBKDF2 cost factor.
pub const DEFAULT_KDF_ITERATIONS: u32 = 310_000;

/// Current payload format version.
pub const PAYLOAD_VERSION: u32 = 1;

pub const KDF_NAME: &str = "PBKDF2-SHA256";
pub const CIPHER_NAME: &str = "AES-256-GCM";

/// Persisted form of a password-protected API key.
///
/// Field names match the JSON layout stored under `apiKeyEncPayload`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKeyPayload {
    /// Format version (currently 1)
    #[serde(rename = "v")]
    pub version: u32,

    /// Key-derivation algorithm name
    pub kdf: String,

    /// PBKDF2 iteration count
    #[serde(rename = "kdfIter")]
    pub kdf_iterations: u32,

    /// Base64-encoded salt
    #[serde(rename = "kdfSaltB64")]
    pub salt: String,

    /// Cipher algorithm name (with key length)
    #[serde(rename = "aes")]
    pub cipher: String,

    /// Base64-encoded IV
    #[serde(rename = "aesIvB64")]
    pub iv: String,

    /// Base64-encoded ciphertext with the GCM tag appended
    #[serde(rename = "ctB64")]
    pub ciphertext: String,
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut *key);
    key
}

/// Encrypts `plaintext` under `password`.
///
/// # Arguments
/// * `plaintext` - Secret to protect (may be empty)
/// * `password` - User password; no length policy is applied here
/// * `iterations` - PBKDF2 cost factor, must be non-zero
///
/// # Security
/// - Salt and IV come from the OS CSPRNG and are never reused
/// - Authenticated encryption (tampering detected on decrypt)
pub fn encrypt(
    plaintext: &str,
    password: &str,
    iterations: u32,
) -> Result<EncryptedKeyPayload, CredentialError> {
    if iterations == 0 {
        return Err(CredentialError::validation(
            "KDF iteration count must be greater than zero.",
        ));
    }

    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    let mut iv = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut iv);

    let key = derive_key(password, &salt, iterations);
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| CredentialError::validation(format!("Failed to create cipher: {}", e)))?;

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
        .map_err(|e| CredentialError::validation(format!("Encryption failed: {}", e)))?;

    Ok(EncryptedKeyPayload {
        version: PAYLOAD_VERSION,
        kdf: KDF_NAME.to_string(),
        kdf_iterations: iterations,
        salt: BASE64.encode(salt),
        cipher: CIPHER_NAME.to_string(),
        iv: BASE64.encode(iv),
        ciphertext: BASE64.encode(ciphertext),
    })
}

/// Decrypts a payload produced by [`encrypt`].
///
/// Every failure (wrong password, tampered or malformed payload) returns
/// [`CredentialError::Decryption`].
pub fn decrypt(payload: &EncryptedKeyPayload, password: &str) -> Result<String, CredentialError> {
    if payload.version != PAYLOAD_VERSION
        || payload.kdf != KDF_NAME
        || payload.cipher != CIPHER_NAME
        || payload.kdf_iterations == 0
    {
        debug!(
            version = payload.version,
            kdf = %payload.kdf,
            cipher = %payload.cipher,
            "Unsupported key payload parameters"
        );
        return Err(CredentialError::Decryption);
    }

    let salt = BASE64
        .decode(&payload.salt)
        .map_err(|_| CredentialError::Decryption)?;
    let iv = BASE64
        .decode(&payload.iv)
        .map_err(|_| CredentialError::Decryption)?;
    let ciphertext = BASE64
        .decode(&payload.ciphertext)
        .map_err(|_| CredentialError::Decryption)?;

    if iv.len() != NONCE_SIZE || salt.is_empty() {
        return Err(CredentialError::Decryption);
    }

    let key = derive_key(password, &salt, payload.kdf_iterations);
    let cipher =
        Aes256Gcm::new_from_slice(&key[..]).map_err(|_| CredentialError::Decryption)?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
        .map_err(|_| CredentialError::Decryption)?;

    String::from_utf8(plaintext).map_err(|_| CredentialError::Decryption)
}

/// [`encrypt`] on the blocking pool; the KDF takes hundreds of milliseconds.
pub async fn encrypt_async(
    plaintext: String,
    password: String,
    iterations: u32,
) -> Result<EncryptedKeyPayload, CredentialError> {
    let password = Zeroizing::new(password);
    let plaintext = Zeroizing::new(plaintext);
    tokio::task::spawn_blocking(move || encrypt(&plaintext, &password, iterations))
        .await
        .unwrap_or_else(|e| {
            Err(CredentialError::validation(format!(
                "Encryption task failed: {}",
                e
            )))
        })
}

/// [`decrypt`] on the blocking pool.
pub async fn decrypt_async(
    payload: EncryptedKeyPayload,
    password: String,
) -> Result<String, CredentialError> {
    let password = Zeroizing::new(password);
    tokio::task::spawn_blocking(move || decrypt(&payload, &password))
        .await
        .unwrap_or(Err(CredentialError::Decryption))
}
