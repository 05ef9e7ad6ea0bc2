use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use auditai_core::{CompressionLevel, ModelId, SystemClock};
use auditai_store::{DYNAMIC_CACHE, ModelMetadata, STATIC_CACHE};
use auditai_worker::{
    LifecycleManager, ModelDownload, SyncError, SyncRequest, SyncResponse, Transport, TransportError, WorkerConfig,
    WorkerContext, WorkerRequest, WorkerResponse,
};
use serde_json::{Value, json};

/// In-process stand-in for the AuditAI API.
#[derive(Default)]
struct TestBackend {
    down: AtomicBool,
    models: Mutex<HashMap<String, ModelDownload>>,
    synced: Mutex<Vec<Vec<Value>>>,
    fetches: AtomicUsize,
}

impl TestBackend {
    fn check_up(&self) -> Result<(), TransportError> {
        if self.down.load(Ordering::SeqCst) {
            Err(TransportError::Network("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for TestBackend {
    async fn download_model(&self, model_id: &ModelId) -> Result<ModelDownload, TransportError> {
        self.check_up()?;
        self.models
            .lock()
            .unwrap()
            .get(model_id.as_str())
            .cloned()
            .ok_or_else(|| TransportError::Api(404, "no such model".into()))
    }

    async fn infer(&self, _model_id: &ModelId, _input: &Value) -> Result<Value, TransportError> {
        self.check_up()?;
        Ok(json!({"score": 0.5, "confidence": 0.9}))
    }

    async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse, TransportError> {
        self.check_up()?;
        let payloads = request.updates.iter().map(|u| u.payload.clone()).collect();
        self.synced.lock().unwrap().push(payloads);
        Ok(SyncResponse::default())
    }

    async fn fetch(&self, request: &WorkerRequest) -> Result<WorkerResponse, TransportError> {
        self.check_up()?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match request.route_path() {
            "/app.js" => Ok(WorkerResponse::new(
                200,
                Some("application/javascript".into()),
                b"console.log(1)".to_vec(),
            )),
            "/index.html" => Ok(WorkerResponse::new(200, Some("text/html".into()), b"<html/>".to_vec())),
            _ => Ok(WorkerResponse::new(404, None, Vec::new())),
        }
    }
}

async fn started_worker(backend: Arc<TestBackend>, batch: u32) -> WorkerContext {
    let config = WorkerConfig {
        database_url: Some("sqlite::memory:".into()),
        sync_batch_size: batch,
        precache: vec!["/index.html".into()],
        ..WorkerConfig::default()
    };
    let ctx = WorkerContext::build(config, backend, SystemClock::shared()).unwrap();
    LifecycleManager::new(ctx.clone()).start().await;
    ctx
}

fn model_id(raw: &str) -> ModelId {
    ModelId::new(raw).unwrap()
}

#[tokio::test]
async fn cached_model_serves_inference_twice_from_memo() {
    let ctx = started_worker(Arc::new(TestBackend::default()), 10).await;
    let id = model_id("m1");
    let bytes: Vec<u8> = (0..10_000u32).map(|i| (i % 7) as u8).collect();
    ctx.store
        .put(
            &id,
            bytes.clone(),
            ModelMetadata::new("fraud_detection").with_compression(CompressionLevel::High),
        )
        .await
        .unwrap();

    let record = ctx.store.metadata(&id).await.unwrap().unwrap();
    assert!(record.compressed);
    assert!(record.size_bytes < record.original_size_bytes);
    assert_eq!(ctx.store.get(&id).await.unwrap().unwrap().bytes, bytes);

    let input = json!({"amount": 500});
    let first = ctx.runtime.predict(&id, &input).await.unwrap();
    let second = ctx.runtime.predict(&id, &input).await.unwrap();
    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.prediction, second.prediction);
}

#[tokio::test]
async fn queued_updates_survive_a_failed_flush_in_order() {
    let backend = Arc::new(TestBackend::default());
    let ctx = started_worker(backend.clone(), 2).await;

    ctx.connectivity.set_offline();
    for n in 1..=3 {
        ctx.sync.enqueue("gradient", json!({"n": n})).await.unwrap();
    }

    ctx.connectivity.set_online();
    backend.down.store(true, Ordering::SeqCst);
    let err = ctx.sync.flush().await.unwrap_err();
    assert!(matches!(err, SyncError::Network(_)));
    assert!(!ctx.connectivity.is_online());
    assert_eq!(ctx.sync.queue().len().await.unwrap(), 3);

    backend.down.store(false, Ordering::SeqCst);
    ctx.connectivity.set_online();
    assert_eq!(ctx.sync.flush().await.unwrap().sent, 3);
    assert!(ctx.sync.queue().is_empty().await.unwrap());

    let synced = backend.synced.lock().unwrap().clone();
    assert_eq!(synced, vec![vec![json!({"n": 1}), json!({"n": 2})], vec![json!({"n": 3})]]);
}

#[tokio::test]
async fn offline_inference_for_unknown_model_returns_envelope() {
    let ctx = started_worker(Arc::new(TestBackend::default()), 10).await;
    ctx.connectivity.set_offline();

    let response = ctx
        .router
        .handle(WorkerRequest::post(
            "/api/ai/inference",
            json!({"model_id": "missing", "input_data": {"amount": 1}}),
        ))
        .await;
    assert_eq!(response.status, 200);
    let body = response.json_body().unwrap();
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["offline"], json!(true));
    assert!(body["error"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn online_inference_miss_falls_back_to_network() {
    let ctx = started_worker(Arc::new(TestBackend::default()), 10).await;

    let response = ctx
        .router
        .handle(WorkerRequest::post(
            "/api/ai/inference",
            json!({"model_id": "remote-only", "input": {"amount": 1}}),
        ))
        .await;
    let body = response.json_body().unwrap();
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["source"], json!("network"));
}

#[tokio::test]
async fn model_download_is_cached_then_served_locally() {
    let backend = Arc::new(TestBackend::default());
    backend.models.lock().unwrap().insert(
        "risk-v2".into(),
        ModelDownload {
            model_data: vec![1; 2_048],
            metadata: ModelMetadata::new("risk_assessment").with_version("2"),
        },
    );
    let ctx = started_worker(backend.clone(), 10).await;

    let first = ctx.router.handle(WorkerRequest::get("/api/ai/models/risk-v2")).await;
    let body = first.json_body().unwrap();
    assert_eq!(body["downloaded"], json!(true));
    assert_eq!(body["cached"], json!(true));
    assert!(ctx.store.contains(&model_id("risk-v2")).await.unwrap());

    backend.down.store(true, Ordering::SeqCst);
    ctx.connectivity.set_offline();
    let second = ctx.router.handle(WorkerRequest::get("/api/ai/models/risk-v2")).await;
    let body = second.json_body().unwrap();
    assert_eq!(second.status, 200);
    assert_eq!(body["cached"], json!(true));
    assert_eq!(body["downloaded"], json!(false));
    assert_eq!(body["model"]["version"], json!("2"));

    let missing = ctx.router.handle(WorkerRequest::get("/api/ai/models/other")).await;
    assert_eq!(missing.status, 503);
    assert_eq!(missing.json_body().unwrap()["offline"], json!(true));
}

#[tokio::test]
async fn federated_post_is_queued() {
    let ctx = started_worker(Arc::new(TestBackend::default()), 10).await;
    ctx.connectivity.set_offline();

    let response = ctx
        .router
        .handle(WorkerRequest::post(
            "/api/ai/federated",
            json!({"type": "gradient", "payload": {"w": [0.1]}}),
        ))
        .await;
    let body = response.json_body().unwrap();
    assert_eq!(body["queued"], json!(true));
    assert_eq!(body["will_sync"], json!(false));
    assert_eq!(ctx.sync.queue().len().await.unwrap(), 1);

    let bad = ctx
        .router
        .handle(WorkerRequest::post("/api/ai/federated", json!({"payload": 1})))
        .await;
    assert_eq!(bad.status, 400);
}

#[tokio::test]
async fn static_requests_are_cache_first() {
    let backend = Arc::new(TestBackend::default());
    let ctx = started_worker(backend.clone(), 10).await;
    assert!(ctx.responses.get(STATIC_CACHE, "/index.html").await.unwrap().is_some());
    let after_install = backend.fetches.load(Ordering::SeqCst);

    let precached = ctx.router.handle(WorkerRequest::get("/index.html")).await;
    assert_eq!(precached.body, b"<html/>".to_vec());
    assert_eq!(backend.fetches.load(Ordering::SeqCst), after_install);

    let fetched = ctx.router.handle(WorkerRequest::get("/app.js")).await;
    assert_eq!(fetched.status, 200);
    assert!(ctx.responses.get(DYNAMIC_CACHE, "/app.js").await.unwrap().is_some());

    ctx.connectivity.set_offline();
    let offline = ctx.router.handle(WorkerRequest::get("/app.js")).await;
    assert_eq!(offline.body, b"console.log(1)".to_vec());

    let unknown = ctx.router.handle(WorkerRequest::get("/never-seen.css")).await;
    assert_eq!(unknown.status, 503);
}

#[tokio::test]
async fn uninitialized_router_passes_through_or_fails_offline() {
    let backend = Arc::new(TestBackend::default());
    let config = WorkerConfig {
        database_url: Some("sqlite::memory:".into()),
        ..WorkerConfig::default()
    };
    let ctx = WorkerContext::build(config, backend.clone(), SystemClock::shared()).unwrap();

    let passed = ctx.router.handle(WorkerRequest::get("/app.js")).await;
    assert_eq!(passed.status, 200);
    assert!(ctx.responses.get(DYNAMIC_CACHE, "/app.js").await.unwrap().is_none());

    ctx.connectivity.set_offline();
    let refused = ctx.router.handle(WorkerRequest::get("/app.js")).await;
    assert_eq!(refused.status, 503);
}
