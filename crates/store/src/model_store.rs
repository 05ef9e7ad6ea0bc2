//! Quota-bounded model store with strict LRU eviction.
//!
//! Metadata (`models`) and binaries (`model_data`) live in separate tables so
//! that listing and quota scans never load blobs.
//!
//! Concurrency: a single writer gate serializes `put`, `remove` and eviction,
//! and the quota check runs inside the same transaction as the write. Readers
//! hold the shared side of the gate while they load and decompress, so a model
//! is never evicted out from under a reader.

use std::sync::Arc;

use auditai_core::{CompressionLevel, ModelId, SharedClock, SystemClock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tokio::sync::RwLock;

use crate::codec::{Codec, DeflateCodec};
use crate::db::{Database, from_millis, to_millis};
use crate::error::StoreError;

/// Metadata supplied by the caller when caching a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub domain: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub compression_level: CompressionLevel,
}

fn default_version() -> String {
    "1".to_string()
}

impl ModelMetadata {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            version: default_version(),
            accuracy: None,
            capabilities: Vec::new(),
            compression_level: CompressionLevel::default(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_compression(mut self, level: CompressionLevel) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }
}

/// Persisted description of a cached model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: ModelId,
    pub domain: String,
    pub version: String,
    /// Stored size (after compression); this is what counts against the quota.
    pub size_bytes: u64,
    pub original_size_bytes: u64,
    pub last_used: DateTime<Utc>,
    pub cached_at: DateTime<Utc>,
    pub compressed: bool,
    pub accuracy: Option<f64>,
    pub capabilities: Vec<String>,
    /// Set on a returned record when the blob failed to decompress. Never persisted.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub corrupted: bool,
}

/// Stored binary for a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelBlob {
    pub model_id: ModelId,
    pub bytes: Vec<u8>,
    pub size_bytes: u64,
    pub compressed: bool,
}

/// A model read back from the store.
///
/// `bytes` are decompressed unless `record.corrupted` is set, in which case
/// they are the raw stored bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedModel {
    pub record: ModelRecord,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreUsage {
    pub models: u64,
    pub total_bytes: u64,
    pub quota_bytes: u64,
}

#[derive(Clone)]
pub struct ModelStore {
    db: Database,
    codec: Arc<dyn Codec>,
    clock: SharedClock,
    quota_max: u64,
    gate: Arc<RwLock<()>>,
}

impl std::fmt::Debug for ModelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelStore")
            .field("db", &self.db.url())
            .field("codec", &self.codec.name())
            .field("quota_max", &self.quota_max)
            .finish()
    }
}

impl ModelStore {
    pub fn new(db: Database, quota_max: u64) -> Self {
        Self {
            db,
            codec: Arc::new(DeflateCodec),
            clock: SystemClock::shared(),
            quota_max,
            gate: Arc::new(RwLock::new(())),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn quota_max(&self) -> u64 {
        self.quota_max
    }

    /// Cache a model, then evict least-recently-used models until the quota holds.
    ///
    /// Returns the ids evicted by this call. If the model alone exceeds the
    /// quota it is evicted as well (and appears in the returned list).
    pub async fn put(
        &self,
        model_id: &ModelId,
        bytes: Vec<u8>,
        metadata: ModelMetadata,
    ) -> Result<Vec<ModelId>, StoreError> {
        let original_size = bytes.len() as u64;
        let (stored, compressed) = self.encode(bytes, metadata.compression_level).await;
        let size = stored.len() as u64;
        let capabilities = serde_json::to_string(&metadata.capabilities)?;

        let pool = self.db.pool().await?;
        let _writer = self.gate.write().await;
        let now = to_millis(self.clock.now());

        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO models (
                id, domain, version, size_bytes, original_size_bytes,
                last_used, cached_at, compressed, accuracy, capabilities
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                domain = excluded.domain,
                version = excluded.version,
                size_bytes = excluded.size_bytes,
                original_size_bytes = excluded.original_size_bytes,
                last_used = excluded.last_used,
                cached_at = excluded.cached_at,
                compressed = excluded.compressed,
                accuracy = excluded.accuracy,
                capabilities = excluded.capabilities
            "#,
        )
        .bind(model_id.as_str())
        .bind(&metadata.domain)
        .bind(&metadata.version)
        .bind(size as i64)
        .bind(original_size as i64)
        .bind(now)
        .bind(compressed)
        .bind(metadata.accuracy)
        .bind(&capabilities)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO model_data (model_id, bytes, size_bytes, compressed)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(model_id) DO UPDATE SET
                bytes = excluded.bytes,
                size_bytes = excluded.size_bytes,
                compressed = excluded.compressed
            "#,
        )
        .bind(model_id.as_str())
        .bind(&stored)
        .bind(size as i64)
        .bind(compressed)
        .execute(&mut *tx)
        .await?;

        let evicted = evict_lru(&mut tx, self.quota_max).await?;
        tx.commit().await?;

        if evicted.contains(model_id) {
            tracing::warn!(
                model_id = %model_id,
                size_bytes = size,
                quota_bytes = self.quota_max,
                "model exceeds the storage quota on its own; evicted immediately"
            );
        }
        tracing::info!(
            model_id = %model_id,
            domain = %metadata.domain,
            level = metadata.compression_level.as_str(),
            size_bytes = size,
            original_size_bytes = original_size,
            compressed,
            evicted = evicted.len(),
            "model cached"
        );

        Ok(evicted)
    }

    /// Load a model and mark it used. `Ok(None)` on a miss.
    pub async fn get(&self, model_id: &ModelId) -> Result<Option<LoadedModel>, StoreError> {
        let pool = self.db.pool().await?;
        let _reader = self.gate.read().await;

        let row = sqlx::query(
            r#"
            SELECT m.*, d.bytes AS blob, d.compressed AS blob_compressed
            FROM models m
            JOIN model_data d ON d.model_id = m.id
            WHERE m.id = ?1
            "#,
        )
        .bind(model_id.as_str())
        .fetch_optional(&pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut record = row_to_record(&row)?;
        let blob: Vec<u8> = row.try_get("blob")?;
        let blob_compressed: bool = row.try_get("blob_compressed")?;

        let now = self.clock.now();
        sqlx::query("UPDATE models SET last_used = ?2 WHERE id = ?1")
            .bind(model_id.as_str())
            .bind(to_millis(now))
            .execute(&pool)
            .await?;
        record.last_used = now;

        let bytes = if blob_compressed {
            match self.decode(blob).await {
                Ok(bytes) => bytes,
                Err(raw) => {
                    tracing::error!(model_id = %model_id, codec = self.codec.name(), "model blob failed to decompress; returning it marked corrupted");
                    record.corrupted = true;
                    raw
                }
            }
        } else {
            blob
        };

        Ok(Some(LoadedModel { record, bytes }))
    }

    /// Metadata only; does not touch `last_used`.
    pub async fn metadata(&self, model_id: &ModelId) -> Result<Option<ModelRecord>, StoreError> {
        let pool = self.db.pool().await?;
        let row = sqlx::query("SELECT * FROM models WHERE id = ?1")
            .bind(model_id.as_str())
            .fetch_optional(&pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    pub async fn contains(&self, model_id: &ModelId) -> Result<bool, StoreError> {
        Ok(self.metadata(model_id).await?.is_some())
    }

    /// All cached models, most recently used first.
    pub async fn list(&self) -> Result<Vec<ModelRecord>, StoreError> {
        let pool = self.db.pool().await?;
        let rows = sqlx::query("SELECT * FROM models ORDER BY last_used DESC, id ASC")
            .fetch_all(&pool)
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    /// Raw stored blob (no decompression, no touch).
    pub async fn blob(&self, model_id: &ModelId) -> Result<Option<ModelBlob>, StoreError> {
        let pool = self.db.pool().await?;
        let row = sqlx::query("SELECT bytes, size_bytes, compressed FROM model_data WHERE model_id = ?1")
            .bind(model_id.as_str())
            .fetch_optional(&pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let size: i64 = row.try_get("size_bytes")?;
        Ok(Some(ModelBlob {
            model_id: model_id.clone(),
            bytes: row.try_get("bytes")?,
            size_bytes: size as u64,
            compressed: row.try_get("compressed")?,
        }))
    }

    pub async fn total_size(&self) -> Result<u64, StoreError> {
        let pool = self.db.pool().await?;
        let (total,): (i64,) = sqlx::query_as("SELECT COALESCE(SUM(size_bytes), 0) FROM models")
            .fetch_one(&pool)
            .await?;
        Ok(total as u64)
    }

    pub async fn usage(&self) -> Result<StoreUsage, StoreError> {
        let pool = self.db.pool().await?;
        let (models, total): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM models")
                .fetch_one(&pool)
                .await?;
        Ok(StoreUsage {
            models: models as u64,
            total_bytes: total as u64,
            quota_bytes: self.quota_max,
        })
    }

    /// Delete one model. Returns whether it existed.
    pub async fn remove(&self, model_id: &ModelId) -> Result<bool, StoreError> {
        let pool = self.db.pool().await?;
        let _writer = self.gate.write().await;
        let mut tx = pool.begin().await?;
        delete_model(&mut tx, model_id.as_str()).await?;
        let removed = sqlx::query("SELECT changes()")
            .fetch_one(&mut *tx)
            .await?
            .try_get::<i64, _>(0)?;
        tx.commit().await?;
        Ok(removed > 0)
    }

    /// Delete every cached model.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let pool = self.db.pool().await?;
        let _writer = self.gate.write().await;
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM model_data").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM models").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Evict least-recently-used models until the quota holds. Idempotent.
    pub async fn evict_to_quota(&self) -> Result<Vec<ModelId>, StoreError> {
        let pool = self.db.pool().await?;
        let _writer = self.gate.write().await;
        let mut tx = pool.begin().await?;
        let evicted = evict_lru(&mut tx, self.quota_max).await?;
        tx.commit().await?;

        if !evicted.is_empty() {
            tracing::info!(evicted = ?evicted, quota_bytes = self.quota_max, "evicted models to quota");
        }
        Ok(evicted)
    }

    /// Compress on the blocking pool; any failure keeps the bytes uncompressed.
    async fn encode(&self, bytes: Vec<u8>, level: CompressionLevel) -> (Vec<u8>, bool) {
        if level == CompressionLevel::None {
            return (bytes, false);
        }

        let shared = Arc::new(bytes);
        let input = shared.clone();
        let codec = self.codec.clone();
        let joined = tokio::task::spawn_blocking(move || codec.compress(&input, level)).await;

        let packed = match joined {
            Ok(Ok(packed)) => Some(packed),
            Ok(Err(err)) => {
                tracing::warn!(codec = self.codec.name(), error = %err, "compression failed; storing uncompressed");
                None
            }
            Err(err) => {
                tracing::warn!(codec = self.codec.name(), error = %err, "compression task failed; storing uncompressed");
                None
            }
        };

        match packed {
            Some(packed) => (packed, true),
            None => (Arc::try_unwrap(shared).unwrap_or_else(|arc| (*arc).clone()), false),
        }
    }

    /// Decompress on the blocking pool; on failure the raw bytes come back as `Err`.
    async fn decode(&self, blob: Vec<u8>) -> Result<Vec<u8>, Vec<u8>> {
        let shared = Arc::new(blob);
        let input = shared.clone();
        let codec = self.codec.clone();
        let joined = tokio::task::spawn_blocking(move || codec.decompress(&input)).await;

        match joined {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "decompression failed");
                Err(Arc::try_unwrap(shared).unwrap_or_else(|arc| (*arc).clone()))
            }
            Err(err) => {
                tracing::debug!(error = %err, "decompression task failed");
                Err(Arc::try_unwrap(shared).unwrap_or_else(|arc| (*arc).clone()))
            }
        }
    }
}

/// Remove LRU models (by `last_used`, ties by insertion time then id) until
/// the total stored size fits `quota_max`.
async fn evict_lru(conn: &mut SqliteConnection, quota_max: u64) -> Result<Vec<ModelId>, StoreError> {
    let rows = sqlx::query("SELECT id, size_bytes FROM models ORDER BY last_used ASC, cached_at ASC, id ASC")
        .fetch_all(&mut *conn)
        .await?;

    let mut sizes = Vec::with_capacity(rows.len());
    for row in &rows {
        let id: String = row.try_get("id")?;
        let size: i64 = row.try_get("size_bytes")?;
        sizes.push((id, size.max(0) as u64));
    }

    let mut total: u64 = sizes.iter().map(|(_, size)| size).sum();
    let mut evicted = Vec::new();
    for (id, size) in sizes {
        if total <= quota_max {
            break;
        }
        delete_model(conn, &id).await?;
        total -= size;
        evicted.push(ModelId::new(id).map_err(|e| StoreError::Corrupt(e.to_string()))?);
    }

    Ok(evicted)
}

async fn delete_model(conn: &mut SqliteConnection, id: &str) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM model_data WHERE model_id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM models WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn row_to_record(row: &SqliteRow) -> Result<ModelRecord, StoreError> {
    let id: String = row.try_get("id")?;
    let size: i64 = row.try_get("size_bytes")?;
    let original: i64 = row.try_get("original_size_bytes")?;
    let last_used: i64 = row.try_get("last_used")?;
    let cached_at: i64 = row.try_get("cached_at")?;
    let capabilities: String = row.try_get("capabilities")?;

    Ok(ModelRecord {
        id: ModelId::new(id).map_err(|e| StoreError::Corrupt(e.to_string()))?,
        domain: row.try_get("domain")?,
        version: row.try_get("version")?,
        size_bytes: size.max(0) as u64,
        original_size_bytes: original.max(0) as u64,
        last_used: from_millis(last_used)?,
        cached_at: from_millis(cached_at)?,
        compressed: row.try_get("compressed")?,
        accuracy: row.try_get("accuracy")?,
        capabilities: serde_json::from_str(&capabilities)?,
        corrupted: false,
    })
}
