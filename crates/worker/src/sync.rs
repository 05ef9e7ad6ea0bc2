//! Federated-sync flush: ship queued updates in order, apply what the server pushes back.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use auditai_core::ModelId;
use auditai_store::{ClientState, FederatedUpdate, InferenceCache, ModelMetadata, ModelStore, StoreError, SyncQueue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::connectivity::Connectivity;
use crate::error::SyncError;
use crate::notify::{Notification, Notifier};
use crate::transport::{ServerUpdate, SyncRequest, Transport, TransportError};

pub const MODEL_UPDATE: &str = "model_update";

/// Applies one kind of server-pushed update.
#[async_trait]
pub trait UpdateHandler: Send + Sync + 'static {
    async fn apply(&self, payload: &Value) -> anyhow::Result<()>;
}

/// Payload of a `model_update` server update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelUpdatePayload {
    pub model_id: ModelId,
    pub model_data: Vec<u8>,
    pub metadata: ModelMetadata,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushOutcome {
    /// Updates acknowledged by the server.
    pub sent: usize,
    /// Server updates applied locally.
    pub applied: usize,
    /// Another flush was already running.
    pub skipped: bool,
}

#[derive(Clone)]
pub struct SyncManager {
    queue: SyncQueue,
    client_state: ClientState,
    store: ModelStore,
    cache: InferenceCache,
    transport: Arc<dyn Transport>,
    connectivity: Connectivity,
    notifier: Notifier,
    handlers: Arc<RwLock<HashMap<String, Arc<dyn UpdateHandler>>>>,
    batch_size: u32,
    flush_lock: Arc<Mutex<()>>,
    /// Set by every flush request; the flush holding the lock keeps draining while it is set.
    dirty: Arc<AtomicBool>,
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("queue", &self.queue)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl SyncManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: SyncQueue,
        client_state: ClientState,
        store: ModelStore,
        cache: InferenceCache,
        transport: Arc<dyn Transport>,
        connectivity: Connectivity,
        notifier: Notifier,
        batch_size: u32,
    ) -> Self {
        Self {
            queue,
            client_state,
            store,
            cache,
            transport,
            connectivity,
            notifier,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            batch_size: batch_size.max(1),
            flush_lock: Arc::new(Mutex::new(())),
            dirty: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register the handler for server updates of `update_type`. Shared by every clone.
    pub async fn register_handler(&self, update_type: impl Into<String>, handler: Arc<dyn UpdateHandler>) {
        let update_type = update_type.into();
        tracing::debug!(update_type = %update_type, "update handler registered");
        self.handlers.write().await.insert(update_type, handler);
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// Queue an update; when online, kick off a background flush.
    pub async fn enqueue(&self, update_type: impl Into<String>, payload: Value) -> Result<FederatedUpdate, StoreError> {
        let update = self.queue.enqueue(update_type, payload).await?;
        if self.connectivity.is_online() {
            self.trigger_flush();
        }
        Ok(update)
    }

    /// Fire-and-forget flush. Runs to completion on its own; nothing awaits or cancels it.
    pub fn trigger_flush(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            match this.flush().await {
                Ok(outcome) if outcome.skipped => tracing::debug!("flush already running; trigger skipped"),
                Ok(_) => {}
                Err(SyncError::Offline) => tracing::debug!("flush skipped while offline"),
                Err(err) => tracing::warn!(error = %err, "background flush failed; batch stays queued"),
            }
        });
    }

    /// Drain the queue batch by batch, oldest first.
    ///
    /// Only one flush runs at a time. A request that arrives while another
    /// flush holds the lock returns `skipped` and the running flush picks its
    /// updates up before returning. The first failed batch stops the flush and
    /// stays at the head of the queue.
    pub async fn flush(&self) -> Result<FlushOutcome, SyncError> {
        self.dirty.store(true, Ordering::SeqCst);
        let mut total = FlushOutcome::default();
        let mut first = true;

        loop {
            let Ok(guard) = self.flush_lock.try_lock() else {
                total.skipped = first;
                return Ok(total);
            };
            first = false;

            while self.dirty.swap(false, Ordering::SeqCst) {
                loop {
                    let outcome = self.flush_batch().await?;
                    total.sent += outcome.sent;
                    total.applied += outcome.applied;
                    if outcome.sent < self.batch_size as usize {
                        break;
                    }
                }
            }
            drop(guard);

            // A request may have landed between the last check and the unlock.
            if !self.dirty.load(Ordering::SeqCst) {
                return Ok(total);
            }
        }
    }

    /// Send one batch of at most `batch_size` updates.
    async fn flush_batch(&self) -> Result<FlushOutcome, SyncError> {
        if !self.connectivity.is_online() {
            return Err(SyncError::Offline);
        }

        let batch = self.queue.peek_batch(self.batch_size).await?;
        if batch.is_empty() {
            return Ok(FlushOutcome::default());
        }

        let request = SyncRequest {
            client_id: self.client_state.client_id().await?,
            updates: batch,
        };
        tracing::info!(updates = request.updates.len(), client_id = %request.client_id, "flushing federated updates");

        let response = match self.transport.sync(&request).await {
            Ok(response) => response,
            Err(err) => {
                if matches!(err, TransportError::Network(_)) && self.connectivity.set_offline() {
                    self.notifier.publish(Notification::Offline);
                }
                tracing::warn!(error = %err, updates = request.updates.len(), "federated sync failed; batch kept at head of queue");
                return Err(err.into());
            }
        };

        let ids: Vec<_> = request.updates.iter().map(|u| u.id).collect();
        self.queue.ack(&ids).await?;

        let applied = self.apply_server_updates(response.server_updates).await;
        let sent = ids.len();
        tracing::info!(sent, applied, "federated sync completed");
        self.notifier.publish(Notification::SyncCompleted { sent, applied });

        Ok(FlushOutcome {
            sent,
            applied,
            skipped: false,
        })
    }

    async fn apply_server_updates(&self, updates: Vec<ServerUpdate>) -> usize {
        let mut applied = 0;
        for update in updates {
            let result = if update.update_type == MODEL_UPDATE {
                self.apply_model_update(&update.payload).await
            } else {
                let handler = self.handlers.read().await.get(&update.update_type).cloned();
                match handler {
                    Some(handler) => handler.apply(&update.payload).await,
                    None => {
                        tracing::warn!(update_type = %update.update_type, "no handler for server update; dropped");
                        continue;
                    }
                }
            };

            match result {
                Ok(()) => applied += 1,
                Err(err) => {
                    tracing::warn!(update_type = %update.update_type, error = %err, "server update could not be applied")
                }
            }
        }
        applied
    }

    async fn apply_model_update(&self, payload: &Value) -> anyhow::Result<()> {
        let update: ModelUpdatePayload = serde_json::from_value(payload.clone())?;
        self.store
            .put(&update.model_id, update.model_data, update.metadata)
            .await?;
        let dropped = self.cache.invalidate_model(&update.model_id).await?;
        tracing::info!(model_id = %update.model_id, dropped_cached_results = dropped, "model replaced by server update");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{WorkerRequest, WorkerResponse};
    use crate::transport::{ModelDownload, SyncResponse};
    use auditai_store::Database;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ScriptedTransport {
        fail: std::sync::atomic::AtomicBool,
        seen: std::sync::Mutex<Vec<Vec<Value>>>,
        server_updates: std::sync::Mutex<Vec<ServerUpdate>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn download_model(&self, _model_id: &ModelId) -> Result<ModelDownload, TransportError> {
            Err(TransportError::Network("unused".into()))
        }

        async fn infer(&self, _model_id: &ModelId, _input: &Value) -> Result<Value, TransportError> {
            Err(TransportError::Network("unused".into()))
        }

        async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse, TransportError> {
            let payloads = request.updates.iter().map(|u| u.payload.clone()).collect();
            self.seen.lock().unwrap().push(payloads);
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::Network("connection reset".into()));
            }
            Ok(SyncResponse {
                server_updates: std::mem::take(&mut *self.server_updates.lock().unwrap()),
            })
        }

        async fn fetch(&self, _request: &WorkerRequest) -> Result<WorkerResponse, TransportError> {
            Err(TransportError::Network("unused".into()))
        }
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl UpdateHandler for Counting {
        async fn apply(&self, _payload: &Value) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager(db: &Database, transport: Arc<ScriptedTransport>, batch_size: u32) -> SyncManager {
        SyncManager::new(
            SyncQueue::new(db.clone()),
            ClientState::new(db.clone()),
            ModelStore::new(db.clone(), 1 << 20),
            InferenceCache::new(db.clone(), chrono::Duration::hours(1)),
            transport,
            Connectivity::default(),
            Notifier::default(),
            batch_size,
        )
    }

    #[tokio::test]
    async fn failed_batch_is_resent_before_later_updates() {
        let db = Database::in_memory();
        let transport = Arc::new(ScriptedTransport::default());
        let sync = manager(&db, transport.clone(), 2);

        for n in 1..=3 {
            sync.queue().enqueue("gradient", json!(n)).await.unwrap();
        }

        transport.fail.store(true, Ordering::SeqCst);
        assert!(matches!(sync.flush().await, Err(SyncError::Network(_))));
        assert_eq!(sync.queue().len().await.unwrap(), 3);

        transport.fail.store(false, Ordering::SeqCst);
        sync.connectivity.set_online();
        assert_eq!(sync.flush().await.unwrap().sent, 3);
        assert!(sync.queue().is_empty().await.unwrap());

        let seen = transport.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![vec![json!(1), json!(2)], vec![json!(1), json!(2)], vec![json!(3)]]);
    }

    #[tokio::test]
    async fn network_failure_marks_offline_and_offline_flush_is_refused() {
        let db = Database::in_memory();
        let transport = Arc::new(ScriptedTransport::default());
        let sync = manager(&db, transport.clone(), 10);
        sync.queue().enqueue("gradient", json!(1)).await.unwrap();

        transport.fail.store(true, Ordering::SeqCst);
        let _ = sync.flush().await;
        assert!(!sync.connectivity.is_online());
        assert!(matches!(sync.flush().await, Err(SyncError::Offline)));
    }

    #[tokio::test]
    async fn server_updates_are_routed_by_type() {
        let db = Database::in_memory();
        let transport = Arc::new(ScriptedTransport::default());
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let sync = manager(&db, transport.clone(), 10);
        sync.register_handler("policy_update", counter.clone()).await;
        let mut notifications = sync.notifier.subscribe();

        let cache = InferenceCache::new(db.clone(), chrono::Duration::hours(1));
        let model = ModelId::new("m1").unwrap();
        cache.store(&model, &json!(1), &json!(1), std::time::Duration::ZERO).await.unwrap();

        *transport.server_updates.lock().unwrap() = vec![
            ServerUpdate {
                update_type: MODEL_UPDATE.into(),
                payload: json!({"model_id": "m1", "model_data": [1, 2, 3], "metadata": {"domain": "risk_assessment"}}),
            },
            ServerUpdate { update_type: "policy_update".into(), payload: json!({}) },
            ServerUpdate { update_type: "mystery".into(), payload: json!({}) },
        ];
        sync.queue().enqueue("gradient", json!(1)).await.unwrap();

        let outcome = sync.flush().await.unwrap();
        assert_eq!(outcome, FlushOutcome { sent: 1, applied: 2, skipped: false });
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(sync.store.contains(&model).await.unwrap());
        assert_eq!(cache.len().await.unwrap(), 0);
        assert_eq!(
            notifications.recv().await.unwrap(),
            Notification::SyncCompleted { sent: 1, applied: 2 }
        );
    }

    /// Blocks inside the first `sync` call until released.
    #[derive(Default)]
    struct GatedTransport {
        calls: AtomicUsize,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
        seen: std::sync::Mutex<Vec<Vec<Value>>>,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn download_model(&self, _model_id: &ModelId) -> Result<ModelDownload, TransportError> {
            Err(TransportError::Network("unused".into()))
        }

        async fn infer(&self, _model_id: &ModelId, _input: &Value) -> Result<Value, TransportError> {
            Err(TransportError::Network("unused".into()))
        }

        async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse, TransportError> {
            let payloads = request.updates.iter().map(|u| u.payload.clone()).collect();
            self.seen.lock().unwrap().push(payloads);
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(SyncResponse::default())
        }

        async fn fetch(&self, _request: &WorkerRequest) -> Result<WorkerResponse, TransportError> {
            Err(TransportError::Network("unused".into()))
        }
    }

    #[tokio::test]
    async fn update_enqueued_during_a_flush_is_sent_by_that_flush() {
        let db = Database::in_memory();
        let transport = Arc::new(GatedTransport::default());
        let sync = SyncManager::new(
            SyncQueue::new(db.clone()),
            ClientState::new(db.clone()),
            ModelStore::new(db.clone(), 1 << 20),
            InferenceCache::new(db.clone(), chrono::Duration::hours(1)),
            transport.clone(),
            Connectivity::default(),
            Notifier::default(),
            10,
        );

        sync.enqueue("gradient", json!(1)).await.unwrap();
        transport.entered.notified().await;

        sync.enqueue("gradient", json!(2)).await.unwrap();
        assert!(sync.flush().await.unwrap().skipped);

        transport.release.notify_one();
        for _ in 0..100 {
            if sync.queue().is_empty().await.unwrap() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert!(sync.queue().is_empty().await.unwrap());
        let seen = transport.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![vec![json!(1)], vec![json!(2)]]);
    }

    #[tokio::test]
    async fn one_flush_drains_more_than_a_batch() {
        let db = Database::in_memory();
        let transport = Arc::new(ScriptedTransport::default());
        let sync = manager(&db, transport.clone(), 2);
        sync.connectivity.set_offline();
        for n in 1..=5 {
            sync.queue().enqueue("gradient", json!(n)).await.unwrap();
        }
        sync.connectivity.set_online();

        assert_eq!(sync.flush().await.unwrap().sent, 5);
        let seen = transport.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![vec![json!(1), json!(2)], vec![json!(3), json!(4)], vec![json!(5)]]
        );
    }

    #[tokio::test]
    async fn concurrent_flush_is_skipped() {
        let db = Database::in_memory();
        let sync = manager(&db, Arc::new(ScriptedTransport::default()), 10);
        let _held = sync.flush_lock.lock().await;
        assert!(sync.flush().await.unwrap().skipped);
    }

    #[tokio::test]
    async fn empty_queue_flush_sends_nothing() {
        let db = Database::in_memory();
        let transport = Arc::new(ScriptedTransport::default());
        let sync = manager(&db, transport.clone(), 10);
        assert_eq!(sync.flush().await.unwrap(), FlushOutcome::default());
        assert!(transport.seen.lock().unwrap().is_empty());
    }
}
