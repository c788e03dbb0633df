//! Durable key-value storage using SQLite.
//!
//! Values are JSON documents stored as text, one row per logical key.

use super::StorageBackend;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Key-value backend backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE kv (
///     key TEXT PRIMARY KEY,
///     value TEXT NOT NULL,        -- JSON document
///     updated_at TEXT NOT NULL    -- ISO 8601 timestamp
/// );
/// ```
///
/// # Atomicity
/// - Each `set` is a single upsert statement
/// - `remove` of several keys runs in one transaction
/// - There is no cross-call transaction; callers order their writes
///
/// # Thread Safety
/// - Connection is wrapped in a Mutex and only touched on the blocking pool
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Creates or opens a store at `db_path` (`":memory:"` for a throwaway one).
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create kv table")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| anyhow!("Storage connection lock poisoned"))?;
            f(&mut conn)
        })
        .await
        .context("Storage task failed")?
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let raw: Option<String> = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()
                .context("Failed to read value")?;

            raw.map(|s| serde_json::from_str(&s).context("Stored value is not valid JSON"))
                .transpose()
        })
        .await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let key = key.to_string();
        let encoded = serde_json::to_string(&value).context("Failed to encode value")?;
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO kv (key, value, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
                params![key, encoded, Utc::now().to_rfc3339()],
            )
            .context("Failed to store value")?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        self.with_conn(move |conn| {
            let tx = conn.transaction().context("Failed to begin transaction")?;
            for key in &keys {
                tx.execute("DELETE FROM kv WHERE key = ?1", params![key])
                    .context("Failed to remove value")?;
            }
            tx.commit().context("Failed to commit removal")?;
            Ok(())
        })
        .await
    }
}
