//! Small key/value table for per-installation state.

use std::str::FromStr;

use auditai_core::ClientId;

use crate::db::Database;
use crate::error::StoreError;

const CLIENT_ID_KEY: &str = "client_id";
const ACTIVE_VERSION_KEY: &str = "active_version";

#[derive(Debug, Clone)]
pub struct ClientState {
    db: Database,
}

impl ClientState {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let pool = self.db.pool().await?;
        let value: Option<(String,)> = sqlx::query_as("SELECT value FROM client_state WHERE key = ?1")
            .bind(key)
            .fetch_optional(&pool)
            .await?;
        Ok(value.map(|(v,)| v))
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let pool = self.db.pool().await?;
        sqlx::query(
            "INSERT INTO client_state (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&pool)
        .await?;
        Ok(())
    }

    /// The installation's client identity, created on first call and reused afterwards.
    pub async fn client_id(&self) -> Result<ClientId, StoreError> {
        let pool = self.db.pool().await?;
        sqlx::query("INSERT OR IGNORE INTO client_state (key, value) VALUES (?1, ?2)")
            .bind(CLIENT_ID_KEY)
            .bind(ClientId::new().to_string())
            .execute(&pool)
            .await?;

        let value = self
            .get(CLIENT_ID_KEY)
            .await?
            .ok_or_else(|| StoreError::Corrupt("client id missing after insert".to_string()))?;
        ClientId::from_str(&value).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    /// Version of the worker that last activated against this database.
    pub async fn active_version(&self) -> Result<Option<String>, StoreError> {
        self.get(ACTIVE_VERSION_KEY).await
    }

    pub async fn set_active_version(&self, version: &str) -> Result<(), StoreError> {
        self.set(ACTIVE_VERSION_KEY, version).await
    }
}
