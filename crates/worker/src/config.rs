//! Worker configuration: defaults overridden by `AUDITAI_*` environment variables.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

const MB: u64 = 1024 * 1024;

/// Path prefixes the router intercepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutePrefixes {
    pub inference: String,
    pub models: String,
    pub federated: String,
}

impl Default for RoutePrefixes {
    fn default() -> Self {
        Self {
            inference: "/api/ai/inference".to_string(),
            models: "/api/ai/models/".to_string(),
            federated: "/api/ai/federated".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Origin of the backend, e.g. `http://localhost:8080`.
    pub api_url: String,
    /// Path under the origin where the AI endpoints live.
    pub api_prefix: String,
    /// Opaque session/CSRF credential forwarded on every backend call.
    pub token: Option<String>,
    /// sqlx URL of the local database; `None` means the per-user data directory.
    pub database_url: Option<String>,
    pub quota_bytes: u64,
    pub cache_ttl_secs: u64,
    pub sync_batch_size: u32,
    pub sync_interval_secs: u64,
    pub cache_sweep_interval_secs: u64,
    pub routes: RoutePrefixes,
    /// Static assets fetched into the static cache during install.
    pub precache: Vec<String>,
    /// Version reported to the host; a change triggers an update-available notification.
    pub version: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            api_prefix: "/api/ai".to_string(),
            token: None,
            database_url: None,
            quota_bytes: 256 * MB,
            cache_ttl_secs: 60 * 60,
            sync_batch_size: 10,
            sync_interval_secs: 60,
            cache_sweep_interval_secs: 60 * 60,
            routes: RoutePrefixes::default(),
            precache: Vec::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl WorkerConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup` (used by `from_env`; injectable for tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("AUDITAI_API_URL") {
            config.api_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("AUDITAI_API_PREFIX") {
            config.api_prefix = v;
        }
        if let Some(v) = lookup("AUDITAI_AUTH_TOKEN").filter(|v| !v.is_empty()) {
            config.token = Some(v);
        }
        if let Some(v) = lookup("AUDITAI_DATABASE_URL") {
            config.database_url = Some(v);
        }
        if let Some(v) = lookup("AUDITAI_QUOTA_BYTES") {
            config.quota_bytes = v.parse().context("AUDITAI_QUOTA_BYTES must be an integer")?;
        }
        if let Some(v) = lookup("AUDITAI_CACHE_TTL_SECS") {
            config.cache_ttl_secs = v.parse().context("AUDITAI_CACHE_TTL_SECS must be an integer")?;
        }
        if let Some(v) = lookup("AUDITAI_SYNC_BATCH_SIZE") {
            config.sync_batch_size = v.parse().context("AUDITAI_SYNC_BATCH_SIZE must be an integer")?;
        }
        if let Some(v) = lookup("AUDITAI_SYNC_INTERVAL_SECS") {
            config.sync_interval_secs = v.parse().context("AUDITAI_SYNC_INTERVAL_SECS must be an integer")?;
        }
        if let Some(v) = lookup("AUDITAI_CACHE_SWEEP_INTERVAL_SECS") {
            config.cache_sweep_interval_secs = v
                .parse()
                .context("AUDITAI_CACHE_SWEEP_INTERVAL_SECS must be an integer")?;
        }
        if let Some(v) = lookup("AUDITAI_PRECACHE") {
            config.precache = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("AUDITAI_VERSION") {
            config.version = v;
        }

        if config.sync_batch_size == 0 {
            anyhow::bail!("AUDITAI_SYNC_BATCH_SIZE must be at least 1");
        }
        Ok(config)
    }

    /// Base URL of the AI endpoints (`{api_url}{api_prefix}`).
    pub fn api_base(&self) -> String {
        format!("{}{}", self.api_url, self.api_prefix)
    }

    /// Inference cache TTL, clamped to the longest duration chrono represents.
    pub fn cache_ttl(&self) -> chrono::Duration {
        let secs = i64::try_from(self.cache_ttl_secs).unwrap_or(i64::MAX).min(i64::MAX / 1000);
        chrono::Duration::seconds(secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = WorkerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, WorkerConfig::default());
        assert_eq!(config.api_base(), "http://localhost:8080/api/ai");
        assert_eq!(config.routes.models, "/api/ai/models/");
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("AUDITAI_API_URL", "https://audit.example/"),
            ("AUDITAI_AUTH_TOKEN", "csrf-123"),
            ("AUDITAI_QUOTA_BYTES", "1048576"),
            ("AUDITAI_PRECACHE", "/index.html, /app.js,,"),
            ("AUDITAI_DATABASE_URL", "sqlite:///tmp/auditai/models.db"),
        ]))
        .unwrap();

        assert_eq!(config.api_url, "https://audit.example");
        assert_eq!(config.token.as_deref(), Some("csrf-123"));
        assert_eq!(config.quota_bytes, 1_048_576);
        assert_eq!(config.precache, vec!["/index.html", "/app.js"]);
        assert_eq!(config.database_url.as_deref(), Some("sqlite:///tmp/auditai/models.db"));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = WorkerConfig::from_lookup(lookup(&[("AUDITAI_QUOTA_BYTES", "lots")])).unwrap_err();
        assert!(err.to_string().contains("AUDITAI_QUOTA_BYTES"));
        assert!(WorkerConfig::from_lookup(lookup(&[("AUDITAI_SYNC_BATCH_SIZE", "0")])).is_err());
    }

    #[test]
    fn huge_cache_ttl_is_clamped() {
        let config = WorkerConfig::from_lookup(lookup(&[("AUDITAI_CACHE_TTL_SECS", "18446744073709551615")])).unwrap();
        assert_eq!(config.cache_ttl(), chrono::Duration::seconds(i64::MAX / 1000));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: WorkerConfig = serde_json::from_str(r#"{"quota_bytes": 10}"#).unwrap();
        assert_eq!(config.quota_bytes, 10);
        assert_eq!(config.sync_batch_size, 10);
    }
}
