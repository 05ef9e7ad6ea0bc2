//! Backend access: model download, fallback inference, federated sync, pass-through.

use async_trait::async_trait;
use auditai_core::{ClientId, ModelId};
use auditai_store::{FederatedUpdate, ModelMetadata};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::request::{Method, WorkerRequest, WorkerResponse};

pub const CSRF_HEADER: &str = "X-CSRF-Token";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("API error ({0}): {1}")]
    Api(u16, String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Response of `GET {api}/models/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDownload {
    pub model_data: Vec<u8>,
    pub metadata: ModelMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub updates: Vec<FederatedUpdate>,
    pub client_id: ClientId,
}

/// An update pushed by the server in a sync response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerUpdate {
    #[serde(rename = "type")]
    pub update_type: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    #[serde(default)]
    pub server_updates: Vec<ServerUpdate>,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn download_model(&self, model_id: &ModelId) -> Result<ModelDownload, TransportError>;

    async fn infer(&self, model_id: &ModelId, input: &Value) -> Result<Value, TransportError>;

    async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse, TransportError>;

    /// Forward an arbitrary request to the origin.
    async fn fetch(&self, request: &WorkerRequest) -> Result<WorkerResponse, TransportError>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    origin: String,
    api_base: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(origin: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            origin: origin.into(),
            api_base: api_base.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token).header(CSRF_HEADER, token),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, TransportError> {
        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Api(status, body));
        }
        Ok(resp)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn download_model(&self, model_id: &ModelId) -> Result<ModelDownload, TransportError> {
        let url = format!("{}/models/{}", self.api_base, model_id);
        let resp = self.send(self.client.get(&url)).await?;
        resp.json()
            .await
            .map_err(|e| TransportError::Parse(format!("failed to parse model download: {e}")))
    }

    async fn infer(&self, model_id: &ModelId, input: &Value) -> Result<Value, TransportError> {
        let url = format!("{}/inference", self.api_base);
        let body = json!({ "model_id": model_id, "input_data": input });
        let resp = self.send(self.client.post(&url).json(&body)).await?;
        let value: Value = resp
            .json()
            .await
            .map_err(|e| TransportError::Parse(format!("failed to parse inference result: {e}")))?;
        Ok(value.get("result").cloned().unwrap_or(value))
    }

    async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse, TransportError> {
        let url = format!("{}/federated/sync", self.api_base);
        let resp = self.send(self.client.post(&url).json(request)).await?;
        resp.json()
            .await
            .map_err(|e| TransportError::Parse(format!("failed to parse sync response: {e}")))
    }

    async fn fetch(&self, request: &WorkerRequest) -> Result<WorkerResponse, TransportError> {
        let url = format!("{}{}", self.origin, request.path);
        let mut req = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Patch => self.client.patch(&url),
            Method::Delete => self.client.delete(&url),
        };
        if let Some(body) = &request.body {
            req = req.json(body);
        }

        // Pass-through keeps non-2xx responses; only transport failures are errors.
        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(WorkerResponse::new(status, content_type, body.to_vec()))
    }
}
