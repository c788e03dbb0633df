//! The background service: message handler and its HTTP surface.
//!
//! All operations that use the API key run here. UI contexts send a
//! [`Message`] and get a [`Reply`]; they never read the key themselves
//! while locked.

use crate::api::protocol::{Message, Reply, INVALID_MESSAGE};
use crate::auth::authorize;
use crate::credentials::CredentialError;
use crate::remote::{AliasApi, AliasGenerator, DEFAULT_PAGE_LIMIT};
use crate::session::SessionAuthority;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tracing::{debug, info, warn};


/// Message handler for one background-service process.
pub struct Background {
    session: Arc<SessionAuthority>,
    api: Arc<dyn AliasApi>,
    generator: AliasGenerator,
    page_size: u32,
}

impl Background {
    pub fn new(session: Arc<SessionAuthority>, api: Arc<dyn AliasApi>) -> Self {
        Self {
            session,
            api,
            generator: AliasGenerator::builtin(),
            page_size: DEFAULT_PAGE_LIMIT,
        }
    }

    pub fn with_generator(mut self, generator: AliasGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn session(&self) -> &Arc<SessionAuthority> {
        &self.session
    }

    /// Handle one message; failures become `{ok: false, error}`.
    pub async fn handle(&self, message: Message) -> Reply {
        let kind = message.kind();
        debug!(message = kind, "Handling message");

        match self.dispatch(message).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(message = kind, error = %e, "Message failed");
                Reply::err(e.to_string())
            }
        }
    }

    /// Handle an untyped request body.
    pub async fn handle_value(&self, value: serde_json::Value) -> Reply {
        match Message::from_value(value) {
            Ok(message) => self.handle(message).await,
            Err(error) => Reply::err(error),
        }
    }

    async fn dispatch(&self, message: Message) -> Result<Reply, CredentialError> {
        // ---------- session control ----------
        match &message {
            Message::SetSessionKey { api_key } => {
                self.session.set_session_key(api_key);
                return Ok(Reply::ok());
            }
            Message::ClearSessionKey => {
                self.session.clear_session_key();
                return Ok(Reply::ok());
            }
            Message::SessionStatus => {
                return Ok(Reply::ok().with("hasSessionKey", self.session.has_session_key()));
            }
            _ => {}
        }

        // ---------- operations (need key) ----------
        let api_key = self.session.resolve_operational_key().await?;

        match message {
            Message::GenerateRandomAlias => {
                let email = self.generator.generate(self.api.as_ref(), &api_key).await?;
                info!(alias = %email, "Random alias created");
                Ok(Reply::ok().with("email", email))
            }
            Message::ListAliases => {
                let items = self.api.list_all_aliases(&api_key, self.page_size).await?;
                Ok(Reply::ok().with("items", items))
            }
            Message::GetDomains => {
                let items = self.api.get_domains().await?;
                Ok(Reply::ok().with("items", items))
            }
            Message::CreateAlias { handle, domain } => {
                let handle = handle.trim().to_lowercase();
                let domain = domain.trim().to_lowercase();
                if handle.is_empty() || domain.is_empty() {
                    return Err(CredentialError::validation("Enter handle and domain."));
                }

                let created = self.api.create_alias(&api_key, &handle, &domain).await?;
                let address = created
                    .reported_address()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}@{}", handle, domain));
                info!(alias = %address, "Alias created");
                Ok(Reply::ok().with("address", address))
            }
            Message::DeleteAlias { address } => {
                let address = address.trim().to_lowercase();
                if address.is_empty() {
                    return Err(CredentialError::validation("Enter the alias to delete."));
                }

                self.api.delete_alias(&api_key, &address).await?;
                info!(alias = %address, "Alias deleted");
                Ok(Reply::ok())
            }
            Message::AliasStats => {
                let stats = self.api.alias_stats(&api_key).await?;
                Ok(Reply::ok().with("stats", stats))
            }
            Message::ListActivity => {
                let items = self.api.list_all_activity(&api_key, self.page_size).await?;
                Ok(Reply::ok().with("items", items))
            }
            Message::SetSessionKey { .. } | Message::ClearSessionKey | Message::SessionStatus => {
                Ok(Reply::ok())
            }
        }
    }
}

/// Shared state for the background HTTP surface.
#[derive(Clone)]
pub struct BackgroundAppState {
    pub background: Arc<Background>,
    /// Required bearer token for `/api/message`. None = open (local dev).
    pub auth_token: Option<String>,
}

/// Create the background service router
pub fn create_background_router(state: BackgroundAppState) -> Router {
    Router::new()
        .route("/api/message", post(handle_message))
        .route("/health", get(health))
        .with_state(Arc::new(state))
}

/// POST /api/message - Deliver one message to the background service
async fn handle_message(
    State(state): State<Arc<BackgroundAppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(e) = authorize(&headers, state.auth_token.as_deref()) {
        warn!(error = %e, "Rejected message");
        return (StatusCode::UNAUTHORIZED, Json(Reply::err(e.to_string()))).into_response();
    }

    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, Json(Reply::err(INVALID_MESSAGE))).into_response();
        }
    };

    Json(state.background.handle_value(value).await).into_response()
}

/// GET /health
async fn health() -> Json<Reply> {
    Json(Reply::ok())
}
