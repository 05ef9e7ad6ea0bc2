//! Request interception: classify each request and serve it cache-first.
//!
//! Every handler returns a [`WorkerResponse`]; internal failures become JSON
//! envelopes, never errors or panics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use auditai_core::ModelId;
use auditai_store::{DYNAMIC_CACHE, ModelStore, ResponseCache, STATIC_CACHE};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::RoutePrefixes;
use crate::connectivity::Connectivity;
use crate::request::{Method, WorkerRequest, WorkerResponse};
use crate::runtime::InferenceRuntime;
use crate::sync::SyncManager;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterState {
    Uninitialized,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
    Inference,
    ModelDownload,
    FederatedSync,
    Static,
}

#[derive(Debug, Deserialize)]
struct InferenceRequest {
    model_id: String,
    #[serde(default, alias = "input")]
    input_data: Value,
}

#[derive(Debug, Deserialize)]
struct EnqueueRequest {
    #[serde(rename = "type", alias = "update_type")]
    update_type: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Clone)]
pub struct RequestRouter {
    state: Arc<AtomicU8>,
    routes: RoutePrefixes,
    runtime: InferenceRuntime,
    store: ModelStore,
    responses: ResponseCache,
    sync: SyncManager,
    transport: Arc<dyn Transport>,
    connectivity: Connectivity,
}

impl std::fmt::Debug for RequestRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRouter")
            .field("state", &self.state())
            .field("routes", &self.routes)
            .finish()
    }
}

const UNINITIALIZED: u8 = 0;
const READY: u8 = 1;

impl RequestRouter {
    pub fn new(
        routes: RoutePrefixes,
        runtime: InferenceRuntime,
        store: ModelStore,
        responses: ResponseCache,
        sync: SyncManager,
        transport: Arc<dyn Transport>,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(UNINITIALIZED)),
            routes,
            runtime,
            store,
            responses,
            sync,
            transport,
            connectivity,
        }
    }

    pub fn state(&self) -> RouterState {
        match self.state.load(Ordering::Acquire) {
            READY => RouterState::Ready,
            _ => RouterState::Uninitialized,
        }
    }

    pub fn set_ready(&self) {
        if self.state.swap(READY, Ordering::AcqRel) != READY {
            tracing::info!("request router ready");
        }
    }

    pub fn classify(&self, request: &WorkerRequest) -> RouteClass {
        let path = request.route_path();
        if path.starts_with(&self.routes.inference) {
            RouteClass::Inference
        } else if path.starts_with(&self.routes.models) {
            RouteClass::ModelDownload
        } else if path.starts_with(&self.routes.federated) {
            RouteClass::FederatedSync
        } else {
            RouteClass::Static
        }
    }

    pub async fn handle(&self, request: WorkerRequest) -> WorkerResponse {
        if self.state() == RouterState::Uninitialized {
            return self.pass_through(&request, "worker is not ready").await;
        }

        let class = self.classify(&request);
        tracing::debug!(method = request.method.as_str(), path = %request.path, class = ?class, "routing request");
        match class {
            RouteClass::Inference => self.handle_inference(&request).await,
            RouteClass::ModelDownload => self.handle_model_download(&request).await,
            RouteClass::FederatedSync => self.handle_federated(&request).await,
            RouteClass::Static => self.handle_static(&request).await,
        }
    }

    async fn handle_inference(&self, request: &WorkerRequest) -> WorkerResponse {
        let online = self.connectivity.is_online();
        let parsed = request
            .body
            .clone()
            .ok_or_else(|| "missing request body".to_string())
            .and_then(|body| serde_json::from_value::<InferenceRequest>(body).map_err(|e| e.to_string()))
            .and_then(|req| {
                ModelId::new(req.model_id)
                    .map(|id| (id, req.input_data))
                    .map_err(|e| e.to_string())
            });
        let (model_id, input) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => return inference_failure(format!("invalid inference request: {err}"), !online),
        };

        let local_miss = match self.runtime.predict(&model_id, &input).await {
            Ok(result) => {
                return WorkerResponse::json(
                    200,
                    &json!({ "success": true, "result": result, "offline": !online }),
                );
            }
            Err(err) if err.is_local_miss() => err,
            Err(err) => return inference_failure(err.to_string(), !online),
        };

        if !online {
            tracing::info!(model_id = %model_id, reason = %local_miss, "model unavailable offline");
            return inference_failure(format!("{local_miss}; not available offline"), true);
        }

        match self.transport.infer(&model_id, &input).await {
            Ok(result) => WorkerResponse::json(
                200,
                &json!({ "success": true, "result": result, "offline": false, "source": "network" }),
            ),
            Err(err) => {
                tracing::warn!(model_id = %model_id, error = %err, "network inference fallback failed");
                inference_failure(err.to_string(), !self.connectivity.is_online())
            }
        }
    }

    async fn handle_model_download(&self, request: &WorkerRequest) -> WorkerResponse {
        let raw_id = request
            .route_path()
            .strip_prefix(&self.routes.models)
            .unwrap_or_default()
            .trim_end_matches('/');
        let model_id = match ModelId::new(raw_id) {
            Ok(id) => id,
            Err(err) => {
                return WorkerResponse::json(400, &json!({ "success": false, "error": err.to_string() }));
            }
        };

        match self.store.metadata(&model_id).await {
            Ok(Some(record)) => {
                return WorkerResponse::json(
                    200,
                    &json!({ "success": true, "cached": true, "downloaded": false, "model": record }),
                );
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(model_id = %model_id, error = %err, "model store unavailable; trying network"),
        }

        if !self.connectivity.is_online() {
            return offline_unavailable("model is not cached and the network is offline");
        }

        let download = match self.transport.download_model(&model_id).await {
            Ok(download) => download,
            Err(err) => {
                tracing::warn!(model_id = %model_id, error = %err, "model download failed");
                return WorkerResponse::json(
                    503,
                    &json!({ "success": false, "offline": !self.connectivity.is_online(), "error": err.to_string() }),
                );
            }
        };

        let strategy = self.runtime.strategy().await;
        let size = download.model_data.len() as u64;
        if !strategy.admits_model(size) {
            tracing::info!(
                model_id = %model_id,
                size_bytes = size,
                max_model_size_bytes = strategy.max_model_size_bytes,
                strategy = %strategy.name,
                "model too large for the active strategy; not cached"
            );
            return WorkerResponse::json(
                200,
                &json!({ "success": true, "cached": false, "downloaded": true, "model": download.metadata }),
            );
        }

        let mut metadata = download.metadata.clone();
        metadata.compression_level = strategy.compression_level;
        if let Err(err) = self.store.put(&model_id, download.model_data, metadata).await {
            tracing::warn!(model_id = %model_id, error = %err, "downloaded model could not be cached");
            return WorkerResponse::json(
                200,
                &json!({ "success": true, "cached": false, "downloaded": true, "model": download.metadata }),
            );
        }

        let record = self.store.metadata(&model_id).await.ok().flatten();
        WorkerResponse::json(
            200,
            &json!({
                "success": true,
                "cached": record.is_some(),
                "downloaded": true,
                "model": record.map(|r| json!(r)).unwrap_or_else(|| json!(download.metadata)),
            }),
        )
    }

    async fn handle_federated(&self, request: &WorkerRequest) -> WorkerResponse {
        if request.method != Method::Post {
            return self.pass_through(request, "federated endpoint requires the network").await;
        }

        let parsed = request
            .body
            .clone()
            .ok_or_else(|| "missing request body".to_string())
            .and_then(|body| serde_json::from_value::<EnqueueRequest>(body).map_err(|e| e.to_string()));
        let update = match parsed {
            Ok(update) => update,
            Err(err) => {
                return WorkerResponse::json(
                    400,
                    &json!({ "success": false, "queued": false, "error": format!("invalid update: {err}") }),
                );
            }
        };

        match self.sync.enqueue(update.update_type, update.payload).await {
            Ok(queued) => WorkerResponse::json(
                200,
                &json!({
                    "success": true,
                    "queued": true,
                    "will_sync": self.connectivity.is_online(),
                    "id": queued.id,
                }),
            ),
            Err(err) => {
                tracing::error!(error = %err, "failed to queue federated update");
                WorkerResponse::json(503, &json!({ "success": false, "queued": false, "error": err.to_string() }))
            }
        }
    }

    async fn handle_static(&self, request: &WorkerRequest) -> WorkerResponse {
        if request.method != Method::Get {
            return self.pass_through(request, "resource not available offline").await;
        }

        let url = request.path.as_str();
        match self.responses.match_any(&[STATIC_CACHE, DYNAMIC_CACHE], url).await {
            Ok(Some(hit)) => return WorkerResponse::new(hit.status, hit.content_type, hit.body),
            Ok(None) => {}
            Err(err) => tracing::warn!(url, error = %err, "response cache unavailable"),
        }

        if !self.connectivity.is_online() {
            return offline_unavailable("resource not available offline");
        }

        match self.transport.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    if let Err(err) = self
                        .responses
                        .put(DYNAMIC_CACHE, url, response.status, response.content_type.as_deref(), &response.body)
                        .await
                    {
                        tracing::warn!(url, error = %err, "failed to populate dynamic cache");
                    }
                }
                response
            }
            Err(err) => {
                tracing::warn!(url, error = %err, "static fetch failed");
                offline_unavailable("resource not available offline")
            }
        }
    }

    async fn pass_through(&self, request: &WorkerRequest, offline_reason: &str) -> WorkerResponse {
        if !self.connectivity.is_online() {
            return offline_unavailable(offline_reason);
        }
        match self.transport.fetch(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(path = %request.path, error = %err, "pass-through request failed");
                WorkerResponse::json(
                    503,
                    &json!({ "success": false, "offline": !self.connectivity.is_online(), "error": err.to_string() }),
                )
            }
        }
    }
}

fn inference_failure(error: String, offline: bool) -> WorkerResponse {
    WorkerResponse::json(200, &json!({ "success": false, "error": error, "offline": offline }))
}

fn offline_unavailable(error: &str) -> WorkerResponse {
    WorkerResponse::json(503, &json!({ "success": false, "offline": true, "error": error }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::context::WorkerContext;
    use crate::transport::{ModelDownload, SyncRequest, SyncResponse, TransportError};
    use async_trait::async_trait;
    use auditai_core::SystemClock;
    use auditai_device::OptimizationStrategy;
    use auditai_store::ModelMetadata;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeApi {
        fetched: Mutex<Vec<(Method, String)>>,
    }

    #[async_trait]
    impl Transport for FakeApi {
        async fn download_model(&self, _model_id: &ModelId) -> Result<ModelDownload, TransportError> {
            Ok(ModelDownload {
                model_data: vec![3; 4_096],
                metadata: ModelMetadata::new("fraud_detection").with_version("7"),
            })
        }

        async fn infer(&self, _model_id: &ModelId, _input: &Value) -> Result<Value, TransportError> {
            Err(TransportError::Network("unused".into()))
        }

        async fn sync(&self, _request: &SyncRequest) -> Result<SyncResponse, TransportError> {
            Ok(SyncResponse::default())
        }

        async fn fetch(&self, request: &WorkerRequest) -> Result<WorkerResponse, TransportError> {
            self.fetched.lock().unwrap().push((request.method, request.path.clone()));
            Ok(WorkerResponse::json(200, &json!({ "rounds": [] })))
        }
    }

    fn ready_context(api: Arc<FakeApi>) -> WorkerContext {
        let config = WorkerConfig {
            database_url: Some("sqlite::memory:".into()),
            ..WorkerConfig::default()
        };
        let ctx = WorkerContext::build(config, api, SystemClock::shared()).unwrap();
        ctx.router.set_ready();
        ctx
    }

    #[test]
    fn classifies_by_path_prefix_ignoring_query() {
        let ctx = ready_context(Arc::new(FakeApi::default()));
        let router = &ctx.router;
        let cases = [
            (WorkerRequest::post("/api/ai/inference", json!({})), RouteClass::Inference),
            (WorkerRequest::post("/api/ai/inference?trace=1", json!({})), RouteClass::Inference),
            (WorkerRequest::get("/api/ai/models/fraud-v3"), RouteClass::ModelDownload),
            (WorkerRequest::get("/api/ai/models/fraud-v3?fresh=1"), RouteClass::ModelDownload),
            (WorkerRequest::get("/api/ai/federated"), RouteClass::FederatedSync),
            (WorkerRequest::get("/api/ai/federated?round=4"), RouteClass::FederatedSync),
            (WorkerRequest::get("/index.html"), RouteClass::Static),
            (WorkerRequest::get("/app.js?x=/api/ai/inference"), RouteClass::Static),
            (WorkerRequest::get("/api/ai/models"), RouteClass::Static),
        ];
        for (request, expected) in cases {
            assert_eq!(router.classify(&request), expected, "{}", request.path);
        }
    }

    #[tokio::test]
    async fn oversized_download_is_returned_but_not_cached() {
        let ctx = ready_context(Arc::new(FakeApi::default()));
        ctx.runtime
            .set_strategy(OptimizationStrategy {
                max_model_size_bytes: 1_024,
                ..OptimizationStrategy::default()
            })
            .await;

        let response = ctx.router.handle(WorkerRequest::get("/api/ai/models/big-one")).await;
        assert_eq!(response.status, 200);
        let body = response.json_body().unwrap();
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["cached"], json!(false));
        assert_eq!(body["downloaded"], json!(true));
        assert_eq!(body["model"]["version"], json!("7"));
        assert!(!ctx.store.contains(&ModelId::new("big-one").unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn federated_get_passes_through_when_online() {
        let api = Arc::new(FakeApi::default());
        let ctx = ready_context(api.clone());

        let response = ctx.router.handle(WorkerRequest::get("/api/ai/federated?round=4")).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.json_body().unwrap(), json!({ "rounds": [] }));
        assert_eq!(
            api.fetched.lock().unwrap().as_slice(),
            &[(Method::Get, "/api/ai/federated?round=4".to_string())]
        );
        assert!(ctx.sync.queue().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn federated_get_is_unavailable_offline() {
        let api = Arc::new(FakeApi::default());
        let ctx = ready_context(api.clone());
        ctx.connectivity.set_offline();

        let response = ctx.router.handle(WorkerRequest::get("/api/ai/federated")).await;
        assert_eq!(response.status, 503);
        assert_eq!(response.json_body().unwrap()["offline"], json!(true));
        assert!(api.fetched.lock().unwrap().is_empty());
        assert!(ctx.sync.queue().is_empty().await.unwrap());
    }
}
