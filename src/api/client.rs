//! Senders used by UI contexts to reach the background service.

use crate::api::background::Background;
use crate::api::protocol::{Message, Reply};
use crate::credentials::CredentialError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tracing::debug;

/// Delivers messages to the background service.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send one message and return the raw reply, `ok: false` included.
    async fn send(&self, message: Message) -> Result<Reply, CredentialError>;

    /// Send one message; an `ok: false` reply becomes an error.
    async fn request(&self, message: Message) -> Result<Reply, CredentialError> {
        self.send(message).await?.into_result()
    }
}

/// Messenger for a background service running as a separate process.
pub struct HttpMessenger {
    http_client: Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl HttpMessenger {
    /// `base_url` is the service root, e.g. `http://127.0.0.1:8731`.
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(concat!("mailalias/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        let base_url = base_url.into();

        Ok(Self {
            http_client,
            endpoint: format!("{}/api/message", base_url.trim_end_matches('/')),
            auth_token: auth_token.filter(|t| !t.is_empty()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Messenger for HttpMessenger {
    async fn send(&self, message: Message) -> Result<Reply, CredentialError> {
        debug!(message = message.kind(), "Sending message to background");

        let mut request = self.http_client.post(&self.endpoint).json(&message);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            CredentialError::Background(format!("Background service unreachable: {}", e))
        })?;
        let status = response.status();

        // Rejections still carry a Reply body.
        match response.json::<Reply>().await {
            Ok(reply) => Ok(reply),
            Err(_) => Err(CredentialError::Background(format!(
                "Background service returned HTTP {}",
                status.as_u16()
            ))),
        }
    }
}

/// Messenger that calls an in-process background handler directly.
#[derive(Clone)]
pub struct LocalMessenger {
    background: Arc<Background>,
}

impl LocalMessenger {
    pub fn new(background: Arc<Background>) -> Self {
        Self { background }
    }
}

#[async_trait]
impl Messenger for LocalMessenger {
    async fn send(&self, message: Message) -> Result<Reply, CredentialError> {
        Ok(self.background.handle(message).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[tokio::test]
    async fn test_http_messenger_posts_message_with_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/message")
            .match_header("authorization", "Bearer local-token")
            .match_body(Matcher::Json(json!({"type": "SESSION_STATUS"})))
            .with_status(200)
            .with_body(r#"{"ok": true, "hasSessionKey": true}"#)
            .create_async()
            .await;

        let messenger =
            HttpMessenger::new(format!("{}/", server.url()), Some("local-token".to_string()))
                .unwrap();
        let reply = messenger.request(Message::SessionStatus).await.unwrap();

        mock.assert_async().await;
        assert!(reply.field::<bool>("hasSessionKey").unwrap());
    }

    #[tokio::test]
    async fn test_http_messenger_maps_error_reply() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/message")
            .with_status(200)
            .with_body(r#"{"ok": false, "error": "Locked. Open the extension and unlock first."}"#)
            .create_async()
            .await;

        let messenger = HttpMessenger::new(server.url(), None).unwrap();

        let raw = messenger.send(Message::ListAliases).await.unwrap();
        assert!(!raw.ok);

        let result = messenger.request(Message::ListAliases).await;
        assert_eq!(result, Err(CredentialError::Locked));
    }

    #[tokio::test]
    async fn test_http_messenger_reads_unauthorized_reply() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/message")
            .with_status(401)
            .with_body(r#"{"ok": false, "error": "Unauthorized"}"#)
            .create_async()
            .await;

        let messenger = HttpMessenger::new(server.url(), None).unwrap();
        let result = messenger.request(Message::ClearSessionKey).await;
        assert_eq!(
            result,
            Err(CredentialError::Background("Unauthorized".to_string()))
        );
    }

    #[tokio::test]
    async fn test_http_messenger_non_reply_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/message")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let messenger = HttpMessenger::new(server.url(), None).unwrap();
        let result = messenger.send(Message::SessionStatus).await;
        assert_eq!(
            result,
            Err(CredentialError::Background(
                "Background service returned HTTP 502".to_string()
            ))
        );
    }
}
