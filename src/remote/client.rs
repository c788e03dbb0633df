use super::{
    ActivityItem, ActivityPage, AliasApi, AliasItem, AliasPage, AliasStats, CreatedAlias,
    CredentialsRequest, DeletedAlias, Pagination, RemoteError,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

/// Production alias service.
pub const DEFAULT_BASE_URL: &str = "https://mail.haltman.io";

const API_KEY_HEADER: &str = "X-API-Key";

/// Valid range for requested credential lifetime (days)
const CREDENTIAL_DAYS: std::ops::RangeInclusive<u32> = 1..=90;

/// HTTP client for the alias REST API.
pub struct HttpAliasClient {
    http_client: Client,
    base_url: String,
}

impl HttpAliasClient {
    /// Create a client against the production service.
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create a client with a custom base URL (self-hosted or mock server).
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(concat!("mailalias/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        // Non-JSON bodies are tolerated; they only lose the error code
        let data: Value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::Null)
        };

        if !status.is_success() {
            let code = data
                .get("error")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("http_{}", status.as_u16()));
            debug!(status = status.as_u16(), code = %code, "Alias API request failed");
            return Err(RemoteError::Api {
                status: status.as_u16(),
                code,
            });
        }

        Ok(data)
    }
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, RemoteError> {
    serde_json::from_value(value)
        .map_err(|e| RemoteError::InvalidResponse(format!("{}: {}", what, e)))
}

fn items_of<T: DeserializeOwned>(data: &Value, what: &str) -> Result<Vec<T>, RemoteError> {
    match data.get("items") {
        Some(items @ Value::Array(_)) => decode(items.clone(), what),
        _ => Ok(Vec::new()),
    }
}

fn pagination_of(data: &Value, limit: u32, offset: u32) -> Pagination {
    data.get("pagination")
        .and_then(|p| serde_json::from_value(p.clone()).ok())
        .unwrap_or(Pagination {
            total: None,
            limit,
            offset,
        })
}

#[async_trait]
impl AliasApi for HttpAliasClient {
    async fn get_domains(&self) -> Result<Vec<String>, RemoteError> {
        let data = self.send(self.http_client.get(self.url("/domains"))).await?;

        let Value::Array(items) = data else {
            return Ok(Vec::new());
        };

        Ok(items
            .iter()
            .map(|d| match d {
                Value::String(s) => s.trim().to_lowercase(),
                other => other.to_string().trim().to_lowercase(),
            })
            .filter(|d| !d.is_empty())
            .collect())
    }

    async fn create_credentials(
        &self,
        email: &str,
        days: u32,
    ) -> Result<CredentialsRequest, RemoteError> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(RemoteError::InvalidInput("Invalid email address.".to_string()));
        }
        if !CREDENTIAL_DAYS.contains(&days) {
            return Err(RemoteError::InvalidInput(format!(
                "Days must be between {} and {}.",
                CREDENTIAL_DAYS.start(),
                CREDENTIAL_DAYS.end()
            )));
        }

        let data = self
            .send(
                self.http_client
                    .post(self.url("/api/credentials/create"))
                    .json(&json!({ "email": email, "days": days })),
            )
            .await?;
        decode(data, "credentials response")
    }

    async fn list_aliases(
        &self,
        api_key: &str,
        limit: u32,
        offset: u32,
    ) -> Result<AliasPage, RemoteError> {
        let data = self
            .send(
                self.http_client
                    .get(self.url("/api/alias/list"))
                    .header(API_KEY_HEADER, api_key)
                    .query(&[("limit", limit), ("offset", offset)]),
            )
            .await?;

        let items: Vec<AliasItem> = items_of(&data, "alias list")?;
        Ok(AliasPage {
            items,
            pagination: pagination_of(&data, limit, offset),
        })
    }

    async fn alias_stats(&self, api_key: &str) -> Result<AliasStats, RemoteError> {
        let data = self
            .send(
                self.http_client
                    .get(self.url("/api/alias/stats"))
                    .header(API_KEY_HEADER, api_key),
            )
            .await?;
        decode(data, "alias stats")
    }

    async fn create_alias(
        &self,
        api_key: &str,
        handle: &str,
        domain: &str,
    ) -> Result<CreatedAlias, RemoteError> {
        let data = self
            .send(
                self.http_client
                    .post(self.url("/api/alias/create"))
                    .header(API_KEY_HEADER, api_key)
                    .json(&json!({ "alias_handle": handle, "alias_domain": domain })),
            )
            .await?;

        if data.is_null() {
            return Ok(CreatedAlias::default());
        }
        decode(data, "create alias response")
    }

    async fn delete_alias(&self, api_key: &str, alias: &str) -> Result<DeletedAlias, RemoteError> {
        let data = self
            .send(
                self.http_client
                    .post(self.url("/api/alias/delete"))
                    .header(API_KEY_HEADER, api_key)
                    .json(&json!({ "alias": alias })),
            )
            .await?;

        if data.is_null() {
            return Ok(DeletedAlias::default());
        }
        decode(data, "delete alias response")
    }

    async fn activity(
        &self,
        api_key: &str,
        limit: u32,
        offset: u32,
    ) -> Result<ActivityPage, RemoteError> {
        let data = self
            .send(
                self.http_client
                    .get(self.url("/api/activity"))
                    .header(API_KEY_HEADER, api_key)
                    .query(&[("limit", limit), ("offset", offset)]),
            )
            .await?;

        let items: Vec<ActivityItem> = items_of(&data, "activity")?;
        Ok(ActivityPage {
            items,
            pagination: pagination_of(&data, limit, offset),
        })
    }
}
