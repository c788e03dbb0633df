use super::*;
use crate::api::background::Background;
use crate::api::client::LocalMessenger;
use crate::api::protocol::Reply;
use crate::remote::HttpAliasClient;
use crate::session::SessionAuthority;
use crate::storage::{MemoryBackend, StorageBackend, KEY_API_KEY, KEY_API_KEY_ENC, KEY_LOCKED};
use async_trait::async_trait;
use mockito::Server;
use serde_json::Value;
use std::sync::Mutex;

const TEST_ITERATIONS: u32 = 1_000;
const PASSWORD: &str = "longenough1";

fn key(c: char) -> String {
    c.to_string().repeat(64)
}

struct Harness {
    manager: KeyManager,
    session: Arc<SessionAuthority>,
    store: SecretStore,
}

fn create_harness_with_api(base_url: &str) -> Harness {
    create_harness_on(SecretStore::in_memory(), base_url)
}

fn create_harness_on(store: SecretStore, base_url: &str) -> Harness {
    let session = Arc::new(SessionAuthority::new(store.clone()));
    let api: Arc<dyn AliasApi> = Arc::new(HttpAliasClient::with_base_url(base_url).unwrap());
    let background = Arc::new(Background::new(Arc::clone(&session), Arc::clone(&api)));
    let manager = KeyManager::new(
        store.clone(),
        Arc::new(LocalMessenger::new(background)),
        TEST_ITERATIONS,
    )
    .with_alias_api(api);

    Harness {
        manager,
        session,
        store,
    }
}

fn create_harness() -> Harness {
    create_harness_with_api("http://127.0.0.1:9")
}

/// Messenger whose background service never answers.
struct DownMessenger;

#[async_trait]
impl Messenger for DownMessenger {
    async fn send(&self, _message: Message) -> Result<Reply, CredentialError> {
        Err(background_down())
    }
}

fn background_down() -> CredentialError {
    CredentialError::Background("Background service unreachable".to_string())
}

fn offline_manager(store: &SecretStore) -> KeyManager {
    KeyManager::new(store.clone(), Arc::new(DownMessenger), TEST_ITERATIONS)
}

/// Backend that logs every write and refuses the write numbered `fail_at`.
struct RecordingBackend {
    inner: MemoryBackend,
    writes: Mutex<Vec<String>>,
    fail_at: Option<usize>,
}

impl RecordingBackend {
    fn new(inner: MemoryBackend, fail_at: Option<usize>) -> Self {
        Self {
            inner,
            writes: Mutex::new(Vec::new()),
            fail_at,
        }
    }

    fn record(&self, entry: String) -> anyhow::Result<()> {
        let mut writes = self.writes.lock().unwrap();
        writes.push(entry);
        if Some(writes.len()) == self.fail_at {
            anyhow::bail!("disk full");
        }
        Ok(())
    }

    fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageBackend for RecordingBackend {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.record(format!("set {}", key))?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, keys: &[&str]) -> anyhow::Result<()> {
        self.record(format!("remove {}", keys.join(",")))?;
        self.inner.remove(keys).await
    }
}

/// Memory store holding a plaintext key, written outside any recording.
async fn seeded_backend() -> MemoryBackend {
    let inner = MemoryBackend::new();
    SecretStore::new(Arc::new(inner.clone()))
        .set_api_key(&key('k'))
        .await
        .unwrap();
    inner
}

fn recording_store(
    inner: &MemoryBackend,
    fail_at: Option<usize>,
) -> (SecretStore, Arc<RecordingBackend>) {
    let backend = Arc::new(RecordingBackend::new(inner.clone(), fail_at));
    (SecretStore::new(backend.clone()), backend)
}

async fn operational_key(h: &Harness) -> Result<String, CredentialError> {
    h.session.resolve_operational_key().await
}

#[tokio::test]
async fn test_empty_store_has_no_credentials() {
    let h = create_harness();
    assert_eq!(h.manager.state().await.unwrap(), CredentialState::NoCredentials);
}

#[tokio::test]
async fn test_invalid_plaintext_counts_as_no_credentials() {
    let h = create_harness();
    h.store.set_api_key("short").await.unwrap();
    assert_eq!(h.manager.state().await.unwrap(), CredentialState::NoCredentials);
}

#[tokio::test]
async fn test_save_api_key() {
    let h = create_harness();

    h.manager
        .save_api_key(&format!(" {} ", "A".repeat(64)))
        .await
        .unwrap();

    assert_eq!(h.store.api_key().await.unwrap(), key('a'));
    assert!(h.session.has_session_key());
    assert_eq!(h.manager.state().await.unwrap(), CredentialState::LegacyUnlocked);
}

#[tokio::test]
async fn test_save_api_key_validation() {
    let h = create_harness();

    assert_eq!(
        h.manager.save_api_key("   ").await,
        Err(CredentialError::validation("API-Key is empty."))
    );
    assert_eq!(
        h.manager.save_api_key("not-a-key").await,
        Err(CredentialError::validation(
            "Invalid API-Key (expected 64 chars a-z0-9)."
        ))
    );
    assert_eq!(h.store.api_key().await.unwrap(), "");
}

#[tokio::test]
async fn test_save_api_key_rejected_while_locked() {
    let h = create_harness();
    h.manager.save_api_key(&key('a')).await.unwrap();
    h.manager.enable_lock(PASSWORD, PASSWORD).await.unwrap();

    let result = h.manager.save_api_key(&key('b')).await;
    assert_eq!(
        result,
        Err(CredentialError::validation(
            "Lock enabled: disable the lock before changing the key."
        ))
    );
    assert_eq!(h.store.api_key().await.unwrap(), "");
}

#[tokio::test]
async fn test_connect_verifies_key_first() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/alias/list?limit=1&offset=0")
        .match_header("X-API-Key", key('c').as_str())
        .with_status(200)
        .with_body(r#"{"items": [], "pagination": {"total": 0}}"#)
        .create_async()
        .await;

    let h = create_harness_with_api(&server.url());
    h.manager.connect(&key('c')).await.unwrap();

    mock.assert_async().await;
    assert_eq!(h.store.api_key().await.unwrap(), key('c'));
}

#[tokio::test]
async fn test_connect_with_rejected_key_stores_nothing() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/alias/list?limit=1&offset=0")
        .with_status(401)
        .with_body(r#"{"error": "invalid_api_key"}"#)
        .create_async()
        .await;

    let h = create_harness_with_api(&server.url());
    let result = h.manager.connect(&key('c')).await;

    assert_eq!(
        result,
        Err(CredentialError::Remote("invalid_api_key".to_string()))
    );
    assert_eq!(h.store.api_key().await.unwrap(), "");
    assert!(!h.session.has_session_key());
}

#[tokio::test]
async fn test_enable_lock_moves_key_into_payload() {
    let h = create_harness();
    h.manager.save_api_key(&key('k')).await.unwrap();
    h.session.clear_session_key();

    h.manager.enable_lock(PASSWORD, PASSWORD).await.unwrap();

    assert!(h.store.api_key_enc_payload().await.unwrap().is_some());
    assert_eq!(h.store.api_key().await.unwrap(), "");
    assert!(h.store.is_locked().await.unwrap());
    assert_eq!(operational_key(&h).await.unwrap(), key('k'));
    assert_eq!(
        h.manager.state().await.unwrap(),
        CredentialState::SessionUnlocked
    );
}

#[tokio::test]
async fn test_enable_lock_validation_leaves_store_untouched() {
    let h = create_harness();

    assert_eq!(
        h.manager.enable_lock("short", "short").await,
        Err(CredentialError::validation(
            "Password must be at least 8 characters."
        ))
    );
    assert_eq!(
        h.manager.enable_lock(PASSWORD, "longenough2").await,
        Err(CredentialError::validation("Passwords do not match."))
    );
    assert_eq!(
        h.manager.enable_lock(PASSWORD, PASSWORD).await,
        Err(CredentialError::validation(
            "Set the API-Key before enabling the lock."
        ))
    );

    h.store.set_api_key("not-a-valid-key").await.unwrap();
    assert_eq!(
        h.manager.enable_lock(PASSWORD, PASSWORD).await,
        Err(CredentialError::validation(
            "Invalid API-Key in storage (legacy mode)."
        ))
    );

    assert_eq!(h.store.api_key_enc_payload().await.unwrap(), None);
    assert!(!h.store.is_locked().await.unwrap());
    assert_eq!(h.store.api_key().await.unwrap(), "not-a-valid-key");
}

#[tokio::test]
async fn test_lock_now_and_unlock() {
    let h = create_harness();
    h.manager.save_api_key(&key('k')).await.unwrap();
    h.manager.enable_lock(PASSWORD, PASSWORD).await.unwrap();

    h.manager.lock_now().await.unwrap();
    assert_eq!(h.manager.state().await.unwrap(), CredentialState::Locked);
    assert_eq!(operational_key(&h).await, Err(CredentialError::Locked));

    h.manager.unlock(PASSWORD).await.unwrap();
    assert_eq!(operational_key(&h).await.unwrap(), key('k'));
    assert!(h.store.is_locked().await.unwrap());
    assert_eq!(h.store.api_key().await.unwrap(), "");
}

#[tokio::test]
async fn test_unlock_wrong_password_keeps_session_empty() {
    let h = create_harness();
    h.manager.save_api_key(&key('k')).await.unwrap();
    h.manager.enable_lock(PASSWORD, PASSWORD).await.unwrap();
    h.manager.lock_now().await.unwrap();

    assert_eq!(
        h.manager.unlock("wrongpassword").await,
        Err(CredentialError::Decryption)
    );
    assert!(!h.session.has_session_key());
    assert_eq!(h.manager.state().await.unwrap(), CredentialState::Locked);
}

#[tokio::test]
async fn test_unlock_validation() {
    let h = create_harness();

    assert_eq!(
        h.manager.unlock("12345").await,
        Err(CredentialError::validation("Password too short."))
    );
    assert_eq!(
        h.manager.unlock("123456").await,
        Err(CredentialError::validation("No encrypted key found."))
    );
}

#[tokio::test]
async fn test_disable_lock_restores_plaintext() {
    let h = create_harness();
    h.manager.save_api_key(&key('k')).await.unwrap();
    h.manager.enable_lock(PASSWORD, PASSWORD).await.unwrap();
    h.manager.lock_now().await.unwrap();

    h.manager.disable_lock(PASSWORD).await.unwrap();

    assert_eq!(h.store.api_key().await.unwrap(), key('k'));
    assert_eq!(h.store.api_key_enc_payload().await.unwrap(), None);
    assert!(!h.store.is_locked().await.unwrap());
    assert!(h.session.has_session_key());
    assert_eq!(h.manager.state().await.unwrap(), CredentialState::LegacyUnlocked);
}

#[tokio::test]
async fn test_disable_lock_wrong_password_changes_nothing() {
    let h = create_harness();
    h.manager.save_api_key(&key('k')).await.unwrap();
    h.manager.enable_lock(PASSWORD, PASSWORD).await.unwrap();
    let payload = h.store.api_key_enc_payload().await.unwrap();

    assert_eq!(
        h.manager.disable_lock("not-the-password").await,
        Err(CredentialError::Decryption)
    );
    assert_eq!(
        h.manager.disable_lock("short").await,
        Err(CredentialError::validation("Password too short."))
    );

    assert_eq!(h.store.api_key_enc_payload().await.unwrap(), payload);
    assert!(h.store.is_locked().await.unwrap());
    assert_eq!(h.store.api_key().await.unwrap(), "");
}

#[tokio::test]
async fn test_disconnect_clears_everything() {
    let h = create_harness();
    h.manager.save_api_key(&key('k')).await.unwrap();
    h.manager.enable_lock(PASSWORD, PASSWORD).await.unwrap();
    h.store.set_last_domain("example.com").await.unwrap();
    h.store.set_default_domain("example.org").await.unwrap();

    h.manager.disconnect().await.unwrap();

    assert!(!h.session.has_session_key());
    assert_eq!(h.store.api_key().await.unwrap(), "");
    assert_eq!(h.store.api_key_enc_payload().await.unwrap(), None);
    assert!(!h.store.is_locked().await.unwrap());
    assert_eq!(h.store.last_domain().await.unwrap(), "");
    assert_eq!(h.store.default_domain().await.unwrap(), "example.org");
    assert_eq!(h.manager.state().await.unwrap(), CredentialState::NoCredentials);
    assert_eq!(operational_key(&h).await, Err(CredentialError::MissingKey));
}

#[test]
fn test_state_display() {
    assert_eq!(CredentialState::Locked.to_string(), "locked");
    assert_eq!(
        CredentialState::SessionUnlocked.to_string(),
        "unlocked (session)"
    );
}

#[tokio::test]
async fn test_save_api_key_reports_failed_push() {
    let store = SecretStore::in_memory();

    let sync = offline_manager(&store).save_api_key(&key('k')).await.unwrap();

    assert_eq!(sync, SessionSync::Failed(background_down()));
    assert_eq!(store.api_key().await.unwrap(), key('k'));
}

#[tokio::test]
async fn test_enable_lock_commits_when_background_is_down() {
    let store = SecretStore::in_memory();
    store.set_api_key(&key('k')).await.unwrap();

    let sync = offline_manager(&store)
        .enable_lock(PASSWORD, PASSWORD)
        .await
        .unwrap();

    assert!(!sync.is_delivered());
    assert_eq!(sync.error(), Some(&background_down()));
    assert!(locked(&store).await);
    assert!(store.api_key_enc_payload().await.unwrap().is_some());
    assert_eq!(store.api_key().await.unwrap(), "");

    // Once the service is back, a plain unlock finishes the job.
    let h = create_harness_on(store.clone(), "http://127.0.0.1:9");
    assert_eq!(h.manager.state().await.unwrap(), CredentialState::Locked);
    h.manager.unlock(PASSWORD).await.unwrap();
    assert_eq!(operational_key(&h).await.unwrap(), key('k'));
}

#[tokio::test]
async fn test_disable_lock_commits_when_background_is_down() {
    let h = create_harness();
    h.manager.save_api_key(&key('k')).await.unwrap();
    h.manager.enable_lock(PASSWORD, PASSWORD).await.unwrap();

    let sync = offline_manager(&h.store)
        .disable_lock(PASSWORD)
        .await
        .unwrap();

    assert_eq!(sync, SessionSync::Failed(background_down()));
    assert_eq!(h.store.api_key().await.unwrap(), key('k'));
    assert_eq!(h.store.api_key_enc_payload().await.unwrap(), None);
    assert!(!locked(&h.store).await);
    assert_eq!(h.manager.state().await.unwrap(), CredentialState::LegacyUnlocked);
}

#[tokio::test]
async fn test_disconnect_wipes_store_when_background_is_down() {
    let store = SecretStore::in_memory();
    store.set_api_key(&key('k')).await.unwrap();
    store.set_last_domain("example.com").await.unwrap();

    let result = offline_manager(&store).disconnect().await;

    assert_eq!(result, Err(background_down()));
    assert_eq!(store.api_key().await.unwrap(), "");
    assert_eq!(store.last_domain().await.unwrap(), "");
    assert_eq!(
        offline_manager(&store).state().await.unwrap(),
        CredentialState::NoCredentials
    );
}

#[tokio::test]
async fn test_enable_lock_write_order() {
    let inner = seeded_backend().await;
    let (store, backend) = recording_store(&inner, None);
    let h = create_harness_on(store, "http://127.0.0.1:9");

    h.manager.enable_lock(PASSWORD, PASSWORD).await.unwrap();

    assert_eq!(
        backend.writes(),
        vec![
            format!("set {}", KEY_API_KEY_ENC),
            format!("set {}", KEY_LOCKED),
            format!("remove {}", KEY_API_KEY),
        ]
    );
}

#[tokio::test]
async fn test_disable_lock_write_order() {
    let inner = seeded_backend().await;
    let setup = create_harness_on(
        SecretStore::new(Arc::new(inner.clone())),
        "http://127.0.0.1:9",
    );
    setup.manager.enable_lock(PASSWORD, PASSWORD).await.unwrap();

    let (store, backend) = recording_store(&inner, None);
    let h = create_harness_on(store, "http://127.0.0.1:9");
    h.manager.disable_lock(PASSWORD).await.unwrap();

    assert_eq!(
        backend.writes(),
        vec![
            format!("set {}", KEY_API_KEY),
            format!("remove {}", KEY_API_KEY_ENC),
            format!("set {}", KEY_LOCKED),
        ]
    );
}

#[tokio::test]
async fn test_interrupted_enable_lock_keeps_key_recoverable() {
    for fail_at in 1..=3 {
        let inner = seeded_backend().await;
        let (store, _backend) = recording_store(&inner, Some(fail_at));
        let h = create_harness_on(store, "http://127.0.0.1:9");

        assert_eq!(
            h.manager.enable_lock(PASSWORD, PASSWORD).await,
            Err(CredentialError::Storage("disk full".to_string())),
            "write {}",
            fail_at
        );

        // The plaintext removal is the last write, so it never happened.
        let plain = SecretStore::new(Arc::new(inner.clone()));
        assert_eq!(plain.api_key().await.unwrap(), key('k'), "write {}", fail_at);

        let payload = plain.api_key_enc_payload().await.unwrap();
        assert_eq!(payload.is_some(), fail_at > 1, "write {}", fail_at);
        if let Some(payload) = payload {
            assert_eq!(
                decrypt_async(payload, PASSWORD.to_string()).await.unwrap(),
                key('k')
            );
        }
        assert_eq!(locked(&plain).await, fail_at == 3, "write {}", fail_at);
    }
}

#[tokio::test]
async fn test_interrupted_disable_lock_keeps_payload() {
    let inner = seeded_backend().await;
    let setup = create_harness_on(
        SecretStore::new(Arc::new(inner.clone())),
        "http://127.0.0.1:9",
    );
    setup.manager.enable_lock(PASSWORD, PASSWORD).await.unwrap();

    let (store, _backend) = recording_store(&inner, Some(2));
    let h = create_harness_on(store, "http://127.0.0.1:9");
    assert_eq!(
        h.manager.disable_lock(PASSWORD).await,
        Err(CredentialError::Storage("disk full".to_string()))
    );

    assert_eq!(setup.store.api_key().await.unwrap(), key('k'));
    assert!(setup.store.api_key_enc_payload().await.unwrap().is_some());
    assert!(locked(&setup.store).await);
}

async fn locked(store: &SecretStore) -> bool {
    store.is_locked().await.unwrap()
}
