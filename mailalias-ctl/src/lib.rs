//! Command-line UI context for the mailalias background service.
//!
//! Configuration and the lock flows touch the Secret Store directly. Every
//! use of the API key goes through the background service.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use mailalias::api::{Message, Messenger};
use mailalias::lock::{KeyManager, SessionSync};
use mailalias::remote::{AliasApi, AliasItem, AliasStats, ActivityItem};
use mailalias::storage::SecretStore;
use std::io::BufRead;
use std::sync::Arc;
use tracing::debug;

/// Days requested for a new API key when none are given.
pub const DEFAULT_CREDENTIAL_DAYS: u32 = 30;

#[derive(Parser, Debug)]
#[command(name = "mailalias-ctl", version)]
#[command(about = "Manage the mailalias API key and aliases through the background service")]
#[command(after_help = "Passwords are read from standard input, one per line.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show credential state
    Status,
    /// Store an API key (no lock)
    SetKey { key: String },
    /// Verify an API key remotely, then store it
    Connect { key: String },
    /// Request a new API key by email
    RequestKey {
        email: String,
        /// Key lifetime in days (1-90)
        #[arg(default_value_t = DEFAULT_CREDENTIAL_DAYS)]
        days: u32,
    },
    /// Encrypt the stored key with a password
    EnableLock,
    /// Unlock the session with the password
    Unlock,
    /// Forget the session key now
    Lock,
    /// Store the key in plaintext again
    DisableLock,
    /// Remove all credentials
    Logout,
    /// List available domains
    Domains,
    /// List aliases
    List,
    /// Create an alias
    Create {
        handle: String,
        domain: Option<String>,
    },
    /// Delete an alias
    Delete { address: String },
    /// Create a random alias
    Generate,
    /// Show alias statistics
    Stats,
    /// Show recent account activity
    Activity,
    /// Show, set or clear the default domain
    DefaultDomain {
        domain: Option<String>,
        #[arg(long, conflicts_with = "domain")]
        clear: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DefaultDomainAction {
    Show,
    Set(String),
    Clear,
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().to_lowercase()
}

/// Read one password line, without its line ending.
fn read_password(input: &mut dyn BufRead) -> Result<String> {
    let mut line = String::new();
    let read = input
        .read_line(&mut line)
        .context("Failed to read password")?;
    if read == 0 {
        bail!("No password given on standard input");
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// One UI context: direct store access plus a messenger to the background.
pub struct Ctl {
    keys: KeyManager,
    messenger: Arc<dyn Messenger>,
    api: Arc<dyn AliasApi>,
}

impl Ctl {
    pub fn new(keys: KeyManager, messenger: Arc<dyn Messenger>, api: Arc<dyn AliasApi>) -> Self {
        Self {
            keys,
            messenger,
            api,
        }
    }

    fn store(&self) -> &SecretStore {
        self.keys.store()
    }

    /// Run one command and return what to print.
    pub async fn run(&self, command: Command, input: &mut dyn BufRead) -> Result<String> {
        let output = match command {
            Command::Status => {
                let state = self.keys.state().await?;
                let default_domain = self.store().default_domain().await?;
                let mut out = format!("State: {}", state);
                if !default_domain.is_empty() {
                    out.push_str(&format!("\nDefault domain: {}", default_domain));
                }
                out
            }
            Command::SetKey { key } => {
                let sync = self.keys.save_api_key(&key).await?;
                with_sync_notice("API-Key saved.", &sync, None)
            }
            Command::Connect { key } => {
                let sync = self.keys.connect(&key).await?;
                with_sync_notice("Connected. API-Key saved.", &sync, None)
            }
            Command::RequestKey { email, days } => {
                let request = self.api.create_credentials(&email, days).await?;
                if request.confirmation.sent {
                    format!(
                        "Confirmation sent to {}. The link is valid for {} minutes.",
                        email.trim(),
                        request.confirmation.ttl_minutes
                    )
                } else {
                    format!("Request accepted for {}.", email.trim())
                }
            }
            Command::EnableLock => {
                let password = read_password(input)?;
                let confirmation = read_password(input)?;
                let sync = self.keys.enable_lock(&password, &confirmation).await?;
                with_sync_notice(
                    "Lock enabled. The key is no longer stored in plaintext.",
                    &sync,
                    Some("Run 'unlock' once it is reachable."),
                )
            }
            Command::Unlock => {
                let password = read_password(input)?;
                self.keys.unlock(&password).await?;
                "Unlocked.".to_string()
            }
            Command::Lock => {
                self.keys.lock_now().await?;
                "Session locked. Run 'unlock' to proceed.".to_string()
            }
            Command::DisableLock => {
                let password = read_password(input)?;
                let sync = self.keys.disable_lock(&password).await?;
                with_sync_notice(
                    "Lock disabled. The API-Key is stored in plaintext in storage again.",
                    &sync,
                    None,
                )
            }
            Command::Logout => {
                self.keys.disconnect().await?;
                "Data removed.".to_string()
            }
            Command::Domains => self.domains().await?.join("\n"),
            Command::List => {
                let reply = self.messenger.request(Message::ListAliases).await?;
                let items: Vec<AliasItem> = reply.field("items")?;
                render_aliases(&items)
            }
            Command::Create { handle, domain } => {
                let domain = self.pick_domain(domain.as_deref()).await?;
                let reply = self
                    .messenger
                    .request(Message::CreateAlias {
                        handle,
                        domain: domain.clone(),
                    })
                    .await?;
                let address: String = reply.field("address")?;
                self.store().set_last_domain(&domain).await?;
                format!("Created: {}", address)
            }
            Command::Delete { address } => {
                let address = address.trim().to_lowercase();
                self.messenger
                    .request(Message::DeleteAlias {
                        address: address.clone(),
                    })
                    .await?;
                format!("Deleted: {}", address)
            }
            Command::Generate => {
                let reply = self.messenger.request(Message::GenerateRandomAlias).await?;
                let email: Option<String> = reply.field("email")?;
                match email {
                    Some(email) => format!("Created: {}", email),
                    None => "Generated.".to_string(),
                }
            }
            Command::Stats => {
                let reply = self.messenger.request(Message::AliasStats).await?;
                let stats: AliasStats = reply.field("stats")?;
                render_stats(&stats)
            }
            Command::Activity => {
                let reply = self.messenger.request(Message::ListActivity).await?;
                let items: Vec<ActivityItem> = reply.field("items")?;
                render_activity(&items)
            }
            Command::DefaultDomain { domain, clear } => {
                let action = match (domain, clear) {
                    (_, true) => DefaultDomainAction::Clear,
                    (Some(domain), false) => DefaultDomainAction::Set(domain),
                    (None, false) => DefaultDomainAction::Show,
                };
                self.default_domain(action).await?
            }
        };

        Ok(output)
    }

    /// Domains from the cache while fresh, else from the background service.
    pub async fn domains(&self) -> Result<Vec<String>> {
        if let Some(cache) = self.store().domains_cache().await? {
            if cache.is_fresh_at(Utc::now()) {
                debug!(count = cache.items.len(), "Domains served from cache");
                return Ok(cache.items);
            }
        }

        let reply = self.messenger.request(Message::GetDomains).await?;
        let items: Option<Vec<String>> = reply.field("items")?;
        let domains: Vec<String> = items
            .unwrap_or_default()
            .iter()
            .map(|d| normalize_domain(d))
            .filter(|d| !d.is_empty())
            .collect();

        self.store().set_domains_cache(&domains).await?;
        Ok(domains)
    }

    /// Explicit domain, else the default, else the last used one.
    async fn pick_domain(&self, requested: Option<&str>) -> Result<String> {
        let domains = self.domains().await?;
        if domains.is_empty() {
            bail!("Domains not loaded. Run 'domains' to refresh.");
        }

        if let Some(requested) = requested {
            let requested = normalize_domain(requested);
            if !domains.contains(&requested) {
                bail!("Domain not allowed. Use the list.");
            }
            return Ok(requested);
        }

        let preferred = normalize_domain(&self.store().default_domain().await?);
        let last = normalize_domain(&self.store().last_domain().await?);
        [preferred, last]
            .into_iter()
            .find(|d| !d.is_empty() && domains.contains(d))
            .ok_or_else(|| anyhow!("Select a domain: pass one, or set a default domain."))
    }

    async fn default_domain(&self, action: DefaultDomainAction) -> Result<String> {
        match action {
            DefaultDomainAction::Show => {
                let domain = self.store().default_domain().await?;
                Ok(if domain.is_empty() {
                    "No default domain.".to_string()
                } else {
                    domain
                })
            }
            DefaultDomainAction::Clear => {
                self.store().clear_default_domain().await?;
                Ok("Default domain cleared.".to_string())
            }
            DefaultDomainAction::Set(domain) => {
                let domain = normalize_domain(&domain);
                if domain.is_empty() {
                    self.store().clear_default_domain().await?;
                    return Ok("Default domain cleared.".to_string());
                }
                self.store().set_default_domain(&domain).await?;
                Ok("Default domain saved.".to_string())
            }
        }
    }
}

/// Appends a notice when the background service missed the new key.
fn with_sync_notice(message: &str, sync: &SessionSync, hint: Option<&str>) -> String {
    let Some(e) = sync.error() else {
        return message.to_string();
    };
    let mut out = format!("{}\nBackground service not updated: {}.", message, e);
    if let Some(hint) = hint {
        out.push(' ');
        out.push_str(hint);
    }
    out
}

fn render_aliases(items: &[AliasItem]) -> String {
    if items.is_empty() {
        return "No aliases found.".to_string();
    }
    let mut lines: Vec<String> = items
        .iter()
        .map(|item| {
            if item.goto.is_empty() {
                item.address.clone()
            } else {
                format!("{} -> {}", item.address, item.goto)
            }
        })
        .collect();
    lines.push(format!("{} item(s)", items.len()));
    lines.join("\n")
}

fn render_stats(stats: &AliasStats) -> String {
    let mut lines = vec![
        format!("Total: {}", stats.totals),
        format!("Active: {}", stats.active),
        format!("Created (7d): {}", stats.created_last_7d),
        format!("Modified (24h): {}", stats.modified_last_24h),
    ];
    for domain in &stats.by_domain {
        lines.push(format!(
            "  {}: {} total, {} active",
            domain.domain, domain.total, domain.active
        ));
    }
    lines.join("\n")
}

fn render_activity(items: &[ActivityItem]) -> String {
    if items.is_empty() {
        return "No activity.".to_string();
    }
    items
        .iter()
        .map(|item| {
            let mut line = format!("{}  {}", item.occurred_at, item.kind);
            if let Some(alias) = &item.alias {
                line.push_str(&format!("  {}", alias));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}
