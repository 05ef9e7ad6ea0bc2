//! Durable FIFO of outbound federated-learning updates.
//!
//! Rows are ordered by an autoincrement sequence, not by timestamp, so FIFO
//! holds even when the clock does not advance. A batch is only deleted once
//! the server acknowledged it; until then it stays at the head of the queue.

use std::str::FromStr;

use auditai_core::{SharedClock, SystemClock, UpdateId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::db::{Database, from_millis, to_millis};
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederatedUpdate {
    pub id: UpdateId,
    #[serde(rename = "type")]
    pub update_type: String,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SyncQueue {
    db: Database,
    clock: SharedClock,
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueue").field("db", &self.db.url()).finish()
    }
}

impl SyncQueue {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            clock: SystemClock::shared(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Append an update at the tail.
    pub async fn enqueue(
        &self,
        update_type: impl Into<String>,
        payload: Value,
    ) -> Result<FederatedUpdate, StoreError> {
        let update = FederatedUpdate {
            id: UpdateId::new(),
            update_type: update_type.into(),
            payload,
            enqueued_at: self.clock.now(),
        };

        let pool = self.db.pool().await?;
        sqlx::query("INSERT INTO sync_queue (id, update_type, payload, enqueued_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(update.id.to_string())
            .bind(&update.update_type)
            .bind(serde_json::to_string(&update.payload)?)
            .bind(to_millis(update.enqueued_at))
            .execute(&pool)
            .await?;

        tracing::debug!(update_id = %update.id, update_type = %update.update_type, "federated update queued");
        Ok(update)
    }

    /// The oldest `limit` updates, without removing them.
    pub async fn peek_batch(&self, limit: u32) -> Result<Vec<FederatedUpdate>, StoreError> {
        let pool = self.db.pool().await?;
        let rows = sqlx::query("SELECT id, update_type, payload, enqueued_at FROM sync_queue ORDER BY seq ASC LIMIT ?1")
            .bind(i64::from(limit))
            .fetch_all(&pool)
            .await?;
        rows.iter().map(row_to_update).collect()
    }

    /// Remove acknowledged updates. Returns how many rows were deleted.
    pub async fn ack(&self, ids: &[UpdateId]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let pool = self.db.pool().await?;
        let mut tx = pool.begin().await?;
        let mut removed = 0;
        for id in ids {
            removed += sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    pub async fn len(&self) -> Result<u64, StoreError> {
        let pool = self.db.pool().await?;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(&pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }
}

fn row_to_update(row: &SqliteRow) -> Result<FederatedUpdate, StoreError> {
    let id: String = row.try_get("id")?;
    let payload: String = row.try_get("payload")?;
    let enqueued_at: i64 = row.try_get("enqueued_at")?;

    Ok(FederatedUpdate {
        id: UpdateId::from_str(&id).map_err(|e| StoreError::Corrupt(e.to_string()))?,
        update_type: row.try_get("update_type")?,
        payload: serde_json::from_str(&payload)?,
        enqueued_at: from_millis(enqueued_at)?,
    })
}
