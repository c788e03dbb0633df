//! Messages exchanged between UI contexts and the background service.
//!
//! Requests are JSON objects tagged by `type`:
//!
//! ```json
//! {"type": "SET_SESSION_KEY", "apiKey": "..."}
//! {"type": "CREATE_ALIAS", "handle": "blue.fox", "domain": "example.com"}
//! ```
//!
//! Every reply is either `{"ok": true, ...data}` or `{"ok": false, "error": "..."}`.

use crate::credentials::CredentialError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Every `type` the background service understands.
pub const MESSAGE_TYPES: &[&str] = &[
    "SET_SESSION_KEY",
    "CLEAR_SESSION_KEY",
    "SESSION_STATUS",
    "GENERATE_RANDOM_ALIAS",
    "LIST_ALIASES",
    "GET_DOMAINS",
    "CREATE_ALIAS",
    "DELETE_ALIAS",
    "ALIAS_STATS",
    "LIST_ACTIVITY",
];

pub const INVALID_MESSAGE: &str = "Invalid message";
pub const UNKNOWN_MESSAGE_TYPE: &str = "Unknown message type";
const BACKGROUND_ERROR: &str = "Background error";

/// Closed set of requests a UI context can make.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Hand the plaintext key to the session authority.
    SetSessionKey {
        #[serde(rename = "apiKey", default)]
        api_key: String,
    },
    /// Lock now.
    ClearSessionKey,
    /// Whether a session key is present (never the key itself).
    SessionStatus,
    GenerateRandomAlias,
    ListAliases,
    GetDomains,
    CreateAlias {
        #[serde(default)]
        handle: String,
        #[serde(default)]
        domain: String,
    },
    DeleteAlias {
        #[serde(default)]
        address: String,
    },
    AliasStats,
    ListActivity,
}

impl Message {
    /// Wire name of the message, safe to log.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::SetSessionKey { .. } => "SET_SESSION_KEY",
            Message::ClearSessionKey => "CLEAR_SESSION_KEY",
            Message::SessionStatus => "SESSION_STATUS",
            Message::GenerateRandomAlias => "GENERATE_RANDOM_ALIAS",
            Message::ListAliases => "LIST_ALIASES",
            Message::GetDomains => "GET_DOMAINS",
            Message::CreateAlias { .. } => "CREATE_ALIAS",
            Message::DeleteAlias { .. } => "DELETE_ALIAS",
            Message::AliasStats => "ALIAS_STATS",
            Message::ListActivity => "LIST_ACTIVITY",
        }
    }

    /// Session-control messages never need the operational key.
    pub fn is_session_control(&self) -> bool {
        matches!(
            self,
            Message::SetSessionKey { .. } | Message::ClearSessionKey | Message::SessionStatus
        )
    }

    /// Parse an untyped request, mapping failures to the wire error text.
    pub fn from_value(value: Value) -> Result<Self, &'static str> {
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return Err(INVALID_MESSAGE);
        };
        if !MESSAGE_TYPES.contains(&kind) {
            return Err(UNKNOWN_MESSAGE_TYPE);
        }
        serde_json::from_value(value).map_err(|_| INVALID_MESSAGE)
    }
}

// Hand-written so the session key never reaches a log line.
impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::SetSessionKey { .. } => f
                .debug_struct("SetSessionKey")
                .field("api_key", &"<redacted>")
                .finish(),
            Message::CreateAlias { handle, domain } => f
                .debug_struct("CreateAlias")
                .field("handle", handle)
                .field("domain", domain)
                .finish(),
            Message::DeleteAlias { address } => f
                .debug_struct("DeleteAlias")
                .field("address", address)
                .finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// Tagged outcome of one message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
            data: Map::new(),
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            data: Map::new(),
        }
    }

    /// Adds a data field to a successful reply.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.data.insert(key.to_string(), value);
        self
    }

    /// `Ok(self)` for `ok: true`, otherwise the carried error.
    ///
    /// The lock and missing-key messages map back to their typed kinds so
    /// callers can react to them.
    pub fn into_result(self) -> Result<Self, CredentialError> {
        if self.ok {
            return Ok(self);
        }
        let error = self
            .error
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| BACKGROUND_ERROR.to_string());

        Err(if error == CredentialError::Locked.to_string() {
            CredentialError::Locked
        } else if error == CredentialError::MissingKey.to_string() {
            CredentialError::MissingKey
        } else {
            CredentialError::Background(error)
        })
    }

    /// Decode one data field.
    pub fn field<T: DeserializeOwned>(&self, key: &str) -> Result<T, CredentialError> {
        let value = self.data.get(key).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            CredentialError::Background(format!("Malformed reply field '{}': {}", key, e))
        })
    }
}

impl From<Result<Reply, CredentialError>> for Reply {
    fn from(result: Result<Reply, CredentialError>) -> Self {
        result.unwrap_or_else(|e| Reply::err(e.to_string()))
    }
}
