//! SQLite database bootstrap shared by every store.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tokio::sync::Mutex;

use crate::error::StoreError;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS models (
        id                  TEXT PRIMARY KEY,
        domain              TEXT NOT NULL,
        version             TEXT NOT NULL,
        size_bytes          INTEGER NOT NULL,
        original_size_bytes INTEGER NOT NULL,
        last_used           INTEGER NOT NULL,
        cached_at           INTEGER NOT NULL,
        compressed          INTEGER NOT NULL,
        accuracy            REAL NULL,
        capabilities        TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_models_domain ON models (domain)",
    "CREATE INDEX IF NOT EXISTS idx_models_version ON models (version)",
    "CREATE INDEX IF NOT EXISTS idx_models_last_used ON models (last_used)",
    r#"
    CREATE TABLE IF NOT EXISTS model_data (
        model_id   TEXT PRIMARY KEY,
        bytes      BLOB NOT NULL,
        size_bytes INTEGER NOT NULL,
        compressed INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_model_data_size ON model_data (size_bytes)",
    "CREATE INDEX IF NOT EXISTS idx_model_data_compressed ON model_data (compressed)",
    r#"
    CREATE TABLE IF NOT EXISTS inference_cache (
        content_hash      TEXT PRIMARY KEY,
        model_id          TEXT NOT NULL,
        input_echo        TEXT NOT NULL,
        result            TEXT NOT NULL,
        created_at        INTEGER NOT NULL,
        inference_time_ms INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_inference_cache_created_at ON inference_cache (created_at)",
    "CREATE INDEX IF NOT EXISTS idx_inference_cache_model_id ON inference_cache (model_id)",
    r#"
    CREATE TABLE IF NOT EXISTS sync_queue (
        seq         INTEGER PRIMARY KEY AUTOINCREMENT,
        id          TEXT NOT NULL UNIQUE,
        update_type TEXT NOT NULL,
        payload     TEXT NOT NULL,
        enqueued_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS responses (
        cache_name   TEXT NOT NULL,
        url          TEXT NOT NULL,
        status       INTEGER NOT NULL,
        content_type TEXT NULL,
        body         BLOB NOT NULL,
        cached_at    INTEGER NOT NULL,
        PRIMARY KEY (cache_name, url)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS client_state (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
];

/// Lazily opened SQLite database.
///
/// Cloning shares the same pool. The schema is created on first use.
#[derive(Debug, Clone)]
pub struct Database {
    url: String,
    pool: Arc<Mutex<Option<SqlitePool>>>,
}

impl Database {
    /// Database at an explicit sqlx URL (`sqlite://...` or `sqlite::memory:`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool: Arc::new(Mutex::new(None)),
        }
    }

    /// Private in-memory database (tests, ephemeral workers).
    pub fn in_memory() -> Self {
        Self::new("sqlite::memory:")
    }

    pub fn at_path(path: &Path) -> Self {
        Self::new(format!("sqlite://{}", path.to_string_lossy()))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn is_memory(&self) -> bool {
        self.url.contains(":memory:")
    }

    /// Get the pool, opening the database and creating the schema if necessary.
    pub async fn pool(&self) -> Result<SqlitePool, StoreError> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }

        let pool = self
            .open()
            .await
            .map_err(|err| StoreError::Unavailable(format!("{err:#}")))?;
        *guard = Some(pool.clone());
        Ok(pool)
    }

    async fn open(&self) -> anyhow::Result<SqlitePool> {
        let mut options = SqliteConnectOptions::from_str(&self.url)
            .with_context(|| format!("invalid database url {}", self.url))?
            .create_if_missing(true);

        let connected = if self.is_memory() {
            // Every connection to `:memory:` is a separate database, so keep exactly one alive.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
        } else {
            if let Some(parent) = Path::new(options.get_filename()).parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create database directory at {:?}", parent))?;
            }
            options = options.journal_mode(SqliteJournalMode::Wal);
            SqlitePoolOptions::new().connect_with(options).await
        };
        let pool = connected.with_context(|| format!("failed to open SQLite database at {}", self.url))?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .context("failed to create schema")?;
        }

        tracing::debug!(url = %self.url, "database opened");
        Ok(pool)
    }

    /// Close the pool; the next call to [`Database::pool`] reopens it.
    pub async fn close(&self) {
        if let Some(pool) = self.pool.lock().await.take() {
            pool.close().await;
        }
    }
}

/// Resolve the default database path: `{app_data_dir}/auditai/models.db`.
pub fn default_db_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;

    let mut path = base;
    path.push("auditai");
    path.push("models.db");
    Ok(path)
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {millis}")))
}
