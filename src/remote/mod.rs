//! Client side of the remote alias-management REST API.
//!
//! The service itself is a black box; this module only models its
//! request/response contract. Authenticated endpoints take the API key in
//! the `X-API-Key` header.

mod client;
pub mod generator;

pub use client::{HttpAliasClient, DEFAULT_BASE_URL};
pub use generator::AliasGenerator;

use crate::credentials::CredentialError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default page size for paginated endpoints
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Remote API failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Non-2xx response; `code` is the body's `error` field or `http_<status>`.
    #[error("{code}")]
    Api { status: u16, code: String },

    /// The request never produced a response.
    #[error("{0}")]
    Transport(String),

    /// 2xx response whose body did not match the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Rejected locally before sending.
    #[error("{0}")]
    InvalidInput(String),
}

impl From<RemoteError> for CredentialError {
    fn from(e: RemoteError) -> Self {
        CredentialError::Remote(e.to_string())
    }
}

/// A forwarding alias owned by the account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AliasItem {
    #[serde(default)]
    pub id: Option<u64>,
    pub address: String,
    #[serde(default)]
    pub goto: String,
    #[serde(default)]
    pub active: Option<i64>,
    #[serde(default)]
    pub domain_id: Option<u64>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AliasPage {
    pub items: Vec<AliasItem>,
    pub pagination: Pagination,
}

/// Per-domain alias counters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainStats {
    pub domain: String,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub active: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AliasStats {
    #[serde(default)]
    pub totals: u64,
    #[serde(default)]
    pub active: u64,
    #[serde(default)]
    pub created_last_7d: u64,
    #[serde(default)]
    pub modified_last_24h: u64,
    #[serde(default)]
    pub by_domain: Vec<DomainStats>,
}

/// Body returned by `POST /api/alias/create`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CreatedAlias {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub created: bool,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub goto: Option<String>,
}

impl CreatedAlias {
    /// Address reported by the server, if any.
    pub fn reported_address(&self) -> Option<&str> {
        self.alias
            .as_deref()
            .or(self.address.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// Body returned by `POST /api/alias/delete`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeletedAlias {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationInfo {
    #[serde(default)]
    pub sent: bool,
    #[serde(default)]
    pub ttl_minutes: u64,
}

/// Body returned by `POST /api/credentials/create`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub days: u32,
    #[serde(default)]
    pub confirmation: ConfirmationInfo,
}

/// One account activity event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub occurred_at: String,
    #[serde(default)]
    pub route: String,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityPage {
    pub items: Vec<ActivityItem>,
    pub pagination: Pagination,
}

/// The remote alias service.
#[async_trait]
pub trait AliasApi: Send + Sync {
    /// Public list of domains aliases can be created under.
    async fn get_domains(&self) -> Result<Vec<String>, RemoteError>;

    /// Requests a new API key; the server mails a confirmation link.
    async fn create_credentials(
        &self,
        email: &str,
        days: u32,
    ) -> Result<CredentialsRequest, RemoteError>;

    async fn list_aliases(
        &self,
        api_key: &str,
        limit: u32,
        offset: u32,
    ) -> Result<AliasPage, RemoteError>;

    async fn alias_stats(&self, api_key: &str) -> Result<AliasStats, RemoteError>;

    async fn create_alias(
        &self,
        api_key: &str,
        handle: &str,
        domain: &str,
    ) -> Result<CreatedAlias, RemoteError>;

    async fn delete_alias(&self, api_key: &str, alias: &str) -> Result<DeletedAlias, RemoteError>;

    async fn activity(
        &self,
        api_key: &str,
        limit: u32,
        offset: u32,
    ) -> Result<ActivityPage, RemoteError>;

    /// Walks every alias page until a short page or the reported total.
    async fn list_all_aliases(
        &self,
        api_key: &str,
        page_size: u32,
    ) -> Result<Vec<AliasItem>, RemoteError> {
        let page_size = page_size.max(1);
        let mut all = Vec::new();
        let mut offset = 0;

        loop {
            let page = self.list_aliases(api_key, page_size, offset).await?;
            let fetched = page.items.len();
            all.extend(page.items);
            let total = page.pagination.total.unwrap_or(all.len() as u64);

            if fetched < page_size as usize || all.len() as u64 >= total {
                break;
            }
            offset += page_size;
        }

        Ok(all)
    }

    /// Walks every activity page until a short page.
    async fn list_all_activity(
        &self,
        api_key: &str,
        page_size: u32,
    ) -> Result<Vec<ActivityItem>, RemoteError> {
        let page_size = page_size.max(1);
        let mut all = Vec::new();
        let mut offset = 0;

        loop {
            let page = self.activity(api_key, page_size, offset).await?;
            let fetched = page.items.len();
            all.extend(page.items);

            if fetched < page_size as usize {
                break;
            }
            offset += page_size;
        }

        Ok(all)
    }
}
