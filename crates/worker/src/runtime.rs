//! Cache-first inference over locally stored models.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use auditai_core::ModelId;
use auditai_device::{OptimizationStrategy, Throttle};
use auditai_predict::{Prediction, PredictorRegistry};
use auditai_store::{InferenceCache, ModelStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::error::RuntimeError;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub model_id: ModelId,
    pub prediction: Prediction,
    pub from_cache: bool,
    pub inference_time_ms: u64,
}

/// Per-model sliding one-minute admission window.
///
/// Callers over the limit wait until the oldest admission leaves the window;
/// nothing is ever rejected.
#[derive(Debug, Default)]
pub struct Throttler {
    windows: Mutex<HashMap<ModelId, VecDeque<Instant>>>,
}

impl Throttler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend until `model_id` may run under `throttle`. Returns the time spent waiting.
    pub async fn admit(&self, model_id: &ModelId, throttle: Throttle) -> Duration {
        if !throttle.enabled || throttle.max_per_minute == 0 {
            return Duration::ZERO;
        }

        let started = Instant::now();
        loop {
            let wait = {
                let mut windows = self.windows.lock().await;
                let now = Instant::now();
                windows.retain(|_, window| {
                    while window.front().is_some_and(|t| now.duration_since(*t) >= WINDOW) {
                        window.pop_front();
                    }
                    !window.is_empty()
                });
                let window = windows.entry(model_id.clone()).or_default();

                match window.front() {
                    Some(oldest) if window.len() >= throttle.max_per_minute as usize => {
                        WINDOW.saturating_sub(now.duration_since(*oldest))
                    }
                    _ => {
                        window.push_back(now);
                        return started.elapsed();
                    }
                }
            };

            tracing::debug!(model_id = %model_id, wait_ms = wait.as_millis() as u64, "inference throttled");
            tokio::time::sleep(wait).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct InferenceRuntime {
    store: ModelStore,
    cache: InferenceCache,
    registry: Arc<PredictorRegistry>,
    strategy: Arc<RwLock<OptimizationStrategy>>,
    throttler: Arc<Throttler>,
}

impl InferenceRuntime {
    pub fn new(store: ModelStore, cache: InferenceCache, registry: Arc<PredictorRegistry>) -> Self {
        Self {
            store,
            cache,
            registry,
            strategy: Arc::new(RwLock::new(OptimizationStrategy::default())),
            throttler: Arc::new(Throttler::new()),
        }
    }

    pub async fn strategy(&self) -> OptimizationStrategy {
        self.strategy.read().await.clone()
    }

    pub async fn set_strategy(&self, strategy: OptimizationStrategy) {
        tracing::info!(strategy = %strategy.name, "optimization strategy applied");
        *self.strategy.write().await = strategy;
    }

    /// Run `model_id` on `input`, serving from the inference cache when possible.
    pub async fn predict(&self, model_id: &ModelId, input: &Value) -> Result<InferenceResult, RuntimeError> {
        let throttle = self.strategy.read().await.throttle;
        self.throttler.admit(model_id, throttle).await;

        match self.cache.lookup(model_id, input).await {
            Ok(Some(entry)) => match serde_json::from_value::<Prediction>(entry.result) {
                Ok(prediction) => {
                    return Ok(InferenceResult {
                        model_id: model_id.clone(),
                        prediction,
                        from_cache: true,
                        inference_time_ms: entry.inference_time_ms,
                    });
                }
                Err(err) => {
                    tracing::warn!(model_id = %model_id, error = %err, "unreadable cached inference; recomputing");
                }
            },
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(model_id = %model_id, error = %err, "inference cache unavailable; computing without it");
            }
        }

        let loaded = self
            .store
            .get(model_id)
            .await?
            .ok_or_else(|| RuntimeError::ModelNotFound(model_id.clone()))?;
        if loaded.record.corrupted {
            return Err(RuntimeError::ModelCorrupted(model_id.clone()));
        }

        let started = std::time::Instant::now();
        let prediction = self.registry.predict(&loaded.record.domain, input);
        let elapsed = started.elapsed();

        match serde_json::to_value(&prediction) {
            Ok(result) => {
                if let Err(err) = self.cache.store(model_id, input, &result, elapsed).await {
                    tracing::warn!(model_id = %model_id, error = %err, "failed to cache inference result");
                }
            }
            Err(err) => {
                tracing::warn!(model_id = %model_id, error = %err, "prediction not serializable; not cached");
            }
        }

        tracing::debug!(
            model_id = %model_id,
            domain = %loaded.record.domain,
            elapsed_ms = elapsed.as_millis() as u64,
            "inference computed"
        );

        Ok(InferenceResult {
            model_id: model_id.clone(),
            prediction,
            from_cache: false,
            inference_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        })
    }
}
