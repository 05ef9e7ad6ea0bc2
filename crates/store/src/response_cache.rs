//! Named caches of intercepted responses for the static-asset route.

use auditai_core::{SharedClock, SystemClock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::db::{Database, from_millis, to_millis};
use crate::error::StoreError;

/// Precached assets, written during install.
pub const STATIC_CACHE: &str = "static";
/// Responses captured opportunistically at runtime.
pub const DYNAMIC_CACHE: &str = "dynamic";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub cache_name: String,
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub cached_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ResponseCache {
    db: Database,
    clock: SharedClock,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache").field("db", &self.db.url()).finish()
    }
}

impl ResponseCache {
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

    pub async fn put(
        &self,
        cache_name: &str,
        url: &str,
        status: u16,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<CachedResponse, StoreError> {
        let response = CachedResponse {
            cache_name: cache_name.to_string(),
            url: url.to_string(),
            status,
            content_type: content_type.map(str::to_string),
            body: body.to_vec(),
            cached_at: self.clock.now(),
        };

        let pool = self.db.pool().await?;
        sqlx::query(
            r#"
            INSERT INTO responses (cache_name, url, status, content_type, body, cached_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(cache_name, url) DO UPDATE SET
                status = excluded.status,
                content_type = excluded.content_type,
                body = excluded.body,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(&response.cache_name)
        .bind(&response.url)
        .bind(i64::from(response.status))
        .bind(response.content_type.as_deref())
        .bind(&response.body)
        .bind(to_millis(response.cached_at))
        .execute(&pool)
        .await?;

        Ok(response)
    }

    pub async fn get(&self, cache_name: &str, url: &str) -> Result<Option<CachedResponse>, StoreError> {
        let pool = self.db.pool().await?;
        let row = sqlx::query("SELECT * FROM responses WHERE cache_name = ?1 AND url = ?2")
            .bind(cache_name)
            .bind(url)
            .fetch_optional(&pool)
            .await?;
        row.as_ref().map(row_to_response).transpose()
    }

    /// First hit for `url`, searching `cache_names` in order.
    pub async fn match_any(&self, cache_names: &[&str], url: &str) -> Result<Option<CachedResponse>, StoreError> {
        for name in cache_names {
            if let Some(found) = self.get(name, url).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    pub async fn cache_names(&self) -> Result<Vec<String>, StoreError> {
        let pool = self.db.pool().await?;
        let rows = sqlx::query("SELECT DISTINCT cache_name FROM responses ORDER BY cache_name")
            .fetch_all(&pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("cache_name").map_err(StoreError::from))
            .collect()
    }

    /// Drop one named cache.
    pub async fn clear(&self, cache_name: &str) -> Result<u64, StoreError> {
        let pool = self.db.pool().await?;
        let result = sqlx::query("DELETE FROM responses WHERE cache_name = ?1")
            .bind(cache_name)
            .execute(&pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn clear_all(&self) -> Result<u64, StoreError> {
        let pool = self.db.pool().await?;
        let result = sqlx::query("DELETE FROM responses").execute(&pool).await?;
        Ok(result.rows_affected())
    }
}

fn row_to_response(row: &SqliteRow) -> Result<CachedResponse, StoreError> {
    let status: i64 = row.try_get("status")?;
    let cached_at: i64 = row.try_get("cached_at")?;
    Ok(CachedResponse {
        cache_name: row.try_get("cache_name")?,
        url: row.try_get("url")?,
        status: u16::try_from(status).map_err(|_| StoreError::Corrupt(format!("status out of range: {status}")))?,
        content_type: row.try_get("content_type")?,
        body: row.try_get("body")?,
        cached_at: from_millis(cached_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_cache_is_searched_before_dynamic() {
        let cache = ResponseCache::new(Database::in_memory());
        cache.put(DYNAMIC_CACHE, "/app.js", 200, Some("text/javascript"), b"dynamic").await.unwrap();
        cache.put(STATIC_CACHE, "/app.js", 200, Some("text/javascript"), b"static").await.unwrap();

        let hit = cache
            .match_any(&[STATIC_CACHE, DYNAMIC_CACHE], "/app.js")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.body, b"static");
        assert!(cache.match_any(&[STATIC_CACHE, DYNAMIC_CACHE], "/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites_and_clear_is_per_cache() {
        let cache = ResponseCache::new(Database::in_memory());
        cache.put(DYNAMIC_CACHE, "/a", 200, None, b"v1").await.unwrap();
        cache.put(DYNAMIC_CACHE, "/a", 200, None, b"v2").await.unwrap();
        cache.put(STATIC_CACHE, "/b", 200, None, b"b").await.unwrap();

        assert_eq!(cache.get(DYNAMIC_CACHE, "/a").await.unwrap().unwrap().body, b"v2");
        assert_eq!(cache.cache_names().await.unwrap(), vec!["dynamic", "static"]);

        assert_eq!(cache.clear(DYNAMIC_CACHE).await.unwrap(), 1);
        assert!(cache.get(DYNAMIC_CACHE, "/a").await.unwrap().is_none());
        assert!(cache.get(STATIC_CACHE, "/b").await.unwrap().is_some());
    }
}
