//! Background maintenance: periodic flush, quota enforcement and cache sweeps.

use std::sync::Arc;
use std::time::Duration;

use auditai_core::SharedClock;
use auditai_store::{InferenceCache, ModelStore};
use tokio::time::{Instant, MissedTickBehavior};

use crate::connectivity::{Connectivity, ConnectivityState};
use crate::context::WorkerContext;
use crate::error::SyncError;
use crate::sync::SyncManager;

const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Background worker that keeps the local stores tidy and drains the sync queue.
pub struct MaintenanceWorker {
    sync: SyncManager,
    store: ModelStore,
    cache: InferenceCache,
    connectivity: Connectivity,
    clock: SharedClock,
    sync_interval: Duration,
    sweep_interval: Duration,
    shutdown: Arc<tokio::sync::Notify>,
}

impl MaintenanceWorker {
    pub fn new(ctx: &WorkerContext) -> Self {
        Self {
            sync: ctx.sync.clone(),
            store: ctx.store.clone(),
            cache: ctx.cache.clone(),
            connectivity: ctx.connectivity.clone(),
            clock: ctx.clock.clone(),
            sync_interval: ctx.config.sync_interval(),
            sweep_interval: ctx.config.cache_sweep_interval(),
            shutdown: Arc::new(tokio::sync::Notify::new()),
        }
    }

    pub fn with_intervals(mut self, sync: Duration, sweep: Duration) -> Self {
        self.sync_interval = sync;
        self.sweep_interval = sweep;
        self
    }

    /// Handle for requesting shutdown after the worker has been moved into [`start`](Self::start).
    pub fn shutdown_handle(&self) -> Arc<tokio::sync::Notify> {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Spawn the worker loop.
    ///
    /// - flushes the sync queue and enforces the model quota every sync interval
    /// - sweeps expired inference results every sweep interval
    /// - flushes as soon as connectivity comes back
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                sync_interval = ?self.sync_interval,
                sweep_interval = ?self.sweep_interval,
                "maintenance worker started"
            );

            let mut sync_tick = tokio::time::interval_at(Instant::now() + self.sync_interval, self.sync_interval);
            sync_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut sweep_tick = tokio::time::interval_at(Instant::now() + self.sweep_interval, self.sweep_interval);
            sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut connectivity = self.connectivity.subscribe();

            let mut backoff = Backoff::default();

            loop {
                tokio::select! {
                    _ = self.shutdown.notified() => {
                        tracing::info!("maintenance worker received shutdown signal");
                        break;
                    }
                    _ = sync_tick.tick() => {
                        if backoff.ready(Instant::now()) {
                            self.flush(&mut backoff).await;
                        } else {
                            tracing::debug!(failures = backoff.failures, "sync backing off");
                        }
                        if let Err(err) = self.store.evict_to_quota().await {
                            tracing::warn!(error = %err, "quota enforcement failed");
                        }
                    }
                    _ = sweep_tick.tick() => {
                        match self.cache.sweep(self.clock.now()).await {
                            Ok(0) => {}
                            Ok(removed) => tracing::debug!(removed, "expired inference results swept"),
                            Err(err) => tracing::warn!(error = %err, "inference cache sweep failed"),
                        }
                    }
                    Ok(()) = connectivity.changed() => {
                        let state = *connectivity.borrow_and_update();
                        if state == ConnectivityState::Online {
                            backoff.reset();
                            self.flush(&mut backoff).await;
                        }
                    }
                }
            }

            tracing::info!("maintenance worker stopped");
        })
    }

    async fn flush(&self, backoff: &mut Backoff) {
        if !self.connectivity.is_online() {
            tracing::debug!("skipping sync while offline");
            return;
        }
        match self.sync.flush().await {
            Ok(outcome) => {
                if outcome.sent > 0 || outcome.applied > 0 {
                    tracing::info!(sent = outcome.sent, applied = outcome.applied, "periodic sync completed");
                }
                backoff.reset();
            }
            Err(SyncError::Offline) => tracing::debug!("sync skipped; client went offline"),
            Err(err) => {
                let delay = backoff.fail(Instant::now());
                tracing::warn!(
                    error = %err,
                    failures = backoff.failures,
                    retry_in = ?delay,
                    "periodic sync failed"
                );
            }
        }
    }
}

/// Exponential backoff between failed periodic flushes, capped at five minutes.
#[derive(Debug, Default)]
struct Backoff {
    failures: u32,
    not_before: Option<Instant>,
}

impl Backoff {
    fn ready(&self, now: Instant) -> bool {
        self.not_before.is_none_or(|at| now >= at)
    }

    fn fail(&mut self, now: Instant) -> Duration {
        self.failures += 1;
        let delay = std::cmp::min(Duration::from_secs(1) * (1 << self.failures.min(9)), MAX_BACKOFF);
        self.not_before = Some(now + delay);
        delay
    }

    fn reset(&mut self) {
        self.failures = 0;
        self.not_before = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::request::{WorkerRequest, WorkerResponse};
    use crate::transport::{ModelDownload, SyncRequest, SyncResponse, Transport, TransportError};
    use async_trait::async_trait;
    use auditai_core::{ManualClock, ModelId};
    use serde_json::{Value, json};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        synced: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn download_model(&self, _model_id: &ModelId) -> Result<ModelDownload, TransportError> {
            Err(TransportError::Network("unused".into()))
        }

        async fn infer(&self, _model_id: &ModelId, _input: &Value) -> Result<Value, TransportError> {
            Err(TransportError::Network("unused".into()))
        }

        async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse, TransportError> {
            self.synced.lock().unwrap().push(request.updates.len());
            Ok(SyncResponse::default())
        }

        async fn fetch(&self, _request: &WorkerRequest) -> Result<WorkerResponse, TransportError> {
            Ok(WorkerResponse::new(404, None, Vec::new()))
        }
    }

    fn context(transport: Arc<RecordingTransport>, clock: Arc<ManualClock>) -> WorkerContext {
        let config = WorkerConfig {
            database_url: Some("sqlite::memory:".into()),
            ..WorkerConfig::default()
        };
        WorkerContext::build(config, transport, clock).unwrap()
    }

    async fn wait_until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn sweeps_expired_inference_results() {
        let clock = Arc::new(ManualClock::at_millis(1_000_000));
        let ctx = context(Arc::new(RecordingTransport::default()), clock.clone());
        let id = ModelId::new("m1").unwrap();
        ctx.cache
            .store(&id, &json!({"a": 1}), &json!({"score": 0.1}), Duration::from_millis(3))
            .await
            .unwrap();
        clock.advance(ctx.config.cache_ttl() + chrono::Duration::seconds(1));

        let worker = MaintenanceWorker::new(&ctx).with_intervals(Duration::from_secs(3600), Duration::from_millis(10));
        let handle = worker.shutdown_handle();
        let task = worker.start();

        let cache = ctx.cache.clone();
        wait_until(|| {
            let cache = cache.clone();
            async move { cache.len().await.unwrap() == 0 }
        })
        .await;

        handle.notify_one();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn reconnecting_flushes_the_queue() {
        let transport = Arc::new(RecordingTransport::default());
        let clock = Arc::new(ManualClock::at_millis(1_000_000));
        let ctx = context(transport.clone(), clock);
        ctx.connectivity.set_offline();
        ctx.sync.enqueue("gradient", json!({"w": [1]})).await.unwrap();
        ctx.sync.enqueue("gradient", json!({"w": [2]})).await.unwrap();

        let worker = MaintenanceWorker::new(&ctx).with_intervals(Duration::from_secs(3600), Duration::from_secs(3600));
        let handle = worker.shutdown_handle();
        let task = worker.start();

        ctx.connectivity.set_online();
        let queue = ctx.sync.queue().clone();
        wait_until(|| {
            let queue = queue.clone();
            async move { queue.is_empty().await.unwrap() }
        })
        .await;
        assert_eq!(transport.synced.lock().unwrap().as_slice(), &[2]);

        handle.notify_one();
        task.await.unwrap();
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let now = Instant::now();
        let mut backoff = Backoff::default();
        assert!(backoff.ready(now));
        assert_eq!(backoff.fail(now), Duration::from_secs(2));
        assert_eq!(backoff.fail(now), Duration::from_secs(4));
        assert!(!backoff.ready(now + Duration::from_secs(3)));
        assert!(backoff.ready(now + Duration::from_secs(4)));
        for _ in 0..10 {
            backoff.fail(now);
        }
        assert_eq!(backoff.fail(now), MAX_BACKOFF);
        backoff.reset();
        assert!(backoff.ready(now));
    }
}
