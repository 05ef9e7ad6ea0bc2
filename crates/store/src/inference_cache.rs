//! Content-addressed memoization of inference results.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use auditai_core::{ModelId, SharedClock, SystemClock};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::db::{Database, from_millis, to_millis};
use crate::error::StoreError;

const NEVER: i64 = i64::MIN;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceCacheEntry {
    pub content_hash: String,
    pub model_id: ModelId,
    pub input_echo: Value,
    pub result: Value,
    pub created_at: DateTime<Utc>,
    pub inference_time_ms: u64,
}

/// Cache key for `(model_id, input)`.
///
/// SHA-256 over the model id, a NUL separator and the input serialized with
/// object keys sorted, so key order in the caller's JSON does not matter.
pub fn content_hash(model_id: &ModelId, input: &Value) -> String {
    let canonical = canonicalize(input).to_string();
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Inference results keyed by [`content_hash`], valid for `ttl` after creation.
#[derive(Clone)]
pub struct InferenceCache {
    db: Database,
    clock: SharedClock,
    ttl: Duration,
    sweep_every: Duration,
    last_sweep: Arc<AtomicI64>,
}

impl std::fmt::Debug for InferenceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceCache")
            .field("db", &self.db.url())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl InferenceCache {
    pub fn new(db: Database, ttl: Duration) -> Self {
        Self {
            db,
            clock: SystemClock::shared(),
            ttl,
            sweep_every: Duration::seconds(60),
            last_sweep: Arc::new(AtomicI64::new(NEVER)),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Minimum clock time between opportunistic sweeps run by `lookup`.
    pub fn with_sweep_interval(mut self, every: Duration) -> Self {
        self.sweep_every = every;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached result for `(model_id, input)` if it has not expired.
    pub async fn lookup(
        &self,
        model_id: &ModelId,
        input: &Value,
    ) -> Result<Option<InferenceCacheEntry>, StoreError> {
        let now = self.clock.now();
        self.maybe_sweep(now).await;

        let hash = content_hash(model_id, input);
        let pool = self.db.pool().await?;
        let row = sqlx::query("SELECT * FROM inference_cache WHERE content_hash = ?1 AND created_at > ?2")
            .bind(&hash)
            .bind(self.cutoff(now))
            .fetch_optional(&pool)
            .await?;

        let entry = row.as_ref().map(row_to_entry).transpose()?;
        tracing::debug!(model_id = %model_id, content_hash = %hash, hit = entry.is_some(), "inference cache lookup");
        Ok(entry)
    }

    /// Write (or overwrite) the entry for `(model_id, input)`.
    pub async fn store(
        &self,
        model_id: &ModelId,
        input: &Value,
        result: &Value,
        duration: std::time::Duration,
    ) -> Result<InferenceCacheEntry, StoreError> {
        let entry = InferenceCacheEntry {
            content_hash: content_hash(model_id, input),
            model_id: model_id.clone(),
            input_echo: input.clone(),
            result: result.clone(),
            created_at: self.clock.now(),
            inference_time_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        };

        let pool = self.db.pool().await?;
        sqlx::query(
            r#"
            INSERT INTO inference_cache (content_hash, model_id, input_echo, result, created_at, inference_time_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(content_hash) DO UPDATE SET
                model_id = excluded.model_id,
                input_echo = excluded.input_echo,
                result = excluded.result,
                created_at = excluded.created_at,
                inference_time_ms = excluded.inference_time_ms
            "#,
        )
        .bind(&entry.content_hash)
        .bind(entry.model_id.as_str())
        .bind(serde_json::to_string(&entry.input_echo)?)
        .bind(serde_json::to_string(&entry.result)?)
        .bind(to_millis(entry.created_at))
        .bind(entry.inference_time_ms.min(i64::MAX as u64) as i64)
        .execute(&pool)
        .await?;

        Ok(entry)
    }

    /// Delete every entry with `now - created_at >= ttl`. Returns the number removed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let pool = self.db.pool().await?;
        let result = sqlx::query("DELETE FROM inference_cache WHERE created_at <= ?1")
            .bind(self.cutoff(now))
            .execute(&pool)
            .await?;
        self.last_sweep.store(to_millis(now), Ordering::Relaxed);

        let removed = result.rows_affected();
        if removed > 0 {
            tracing::debug!(removed, "expired inference cache entries swept");
        }
        Ok(removed)
    }

    /// Drop every entry computed against `model_id`.
    pub async fn invalidate_model(&self, model_id: &ModelId) -> Result<u64, StoreError> {
        let pool = self.db.pool().await?;
        let result = sqlx::query("DELETE FROM inference_cache WHERE model_id = ?1")
            .bind(model_id.as_str())
            .execute(&pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        let pool = self.db.pool().await?;
        sqlx::query("DELETE FROM inference_cache").execute(&pool).await?;
        Ok(())
    }

    /// Number of stored entries, expired or not.
    pub async fn len(&self) -> Result<u64, StoreError> {
        let pool = self.db.pool().await?;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM inference_cache")
            .fetch_one(&pool)
            .await?;
        Ok(count as u64)
    }

    /// Creation time at or before which an entry is expired, in millis.
    ///
    /// Saturates at the earliest representable time for very long TTLs.
    fn cutoff(&self, now: DateTime<Utc>) -> i64 {
        to_millis(now.checked_sub_signed(self.ttl).unwrap_or(DateTime::<Utc>::MIN_UTC))
    }

    async fn maybe_sweep(&self, now: DateTime<Utc>) {
        let last = self.last_sweep.load(Ordering::Relaxed);
        if last != NEVER && to_millis(now) - last < self.sweep_every.num_milliseconds() {
            return;
        }
        if let Err(err) = self.sweep(now).await {
            tracing::warn!(error = %err, "opportunistic inference cache sweep failed");
        }
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<InferenceCacheEntry, StoreError> {
    let model_id: String = row.try_get("model_id")?;
    let input_echo: String = row.try_get("input_echo")?;
    let result: String = row.try_get("result")?;
    let created_at: i64 = row.try_get("created_at")?;
    let inference_time_ms: i64 = row.try_get("inference_time_ms")?;

    Ok(InferenceCacheEntry {
        content_hash: row.try_get("content_hash")?,
        model_id: ModelId::new(model_id).map_err(|e| StoreError::Corrupt(e.to_string()))?,
        input_echo: serde_json::from_str(&input_echo)?,
        result: serde_json::from_str(&result)?,
        created_at: from_millis(created_at)?,
        inference_time_ms: inference_time_ms.max(0) as u64,
    })
}
