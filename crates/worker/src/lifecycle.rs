//! Install/activate lifecycle and the host message channel.

use std::sync::Arc;

use anyhow::Context;
use auditai_device::{BatteryStatus, DeviceCapabilities, OptimizationStrategy, classify, needs_revision};
use auditai_store::{DYNAMIC_CACHE, STATIC_CACHE};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::connectivity::ConnectivityState;
use crate::context::WorkerContext;
use crate::notify::Notification;
use crate::request::WorkerRequest;
use crate::router::RouterState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Installing,
    /// Installed over a different active version; waits for `SkipWaiting`.
    Waiting,
    Active,
}

/// Messages the host sends to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum HostMessage {
    GetCapabilities,
    /// Host-measured profile; replaces the worker's own benchmark.
    SetCapabilities(DeviceCapabilities),
    UpdateBattery(BatteryStatus),
    SetConnectivity(bool),
    SkipWaiting,
    ClearCaches,
    GetStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub version: String,
    pub phase: Phase,
    pub router: RouterState,
    pub connectivity: ConnectivityState,
    pub strategy: String,
    pub models: u64,
    pub total_bytes: u64,
    pub quota_bytes: u64,
    pub queued_updates: u64,
    pub cached_inferences: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostReply {
    Capabilities {
        capabilities: DeviceCapabilities,
        strategy: OptimizationStrategy,
    },
    Status(WorkerStatus),
    Ack,
    Error {
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct LifecycleManager {
    ctx: WorkerContext,
    phase: Arc<RwLock<Phase>>,
    capabilities: Arc<RwLock<Option<DeviceCapabilities>>>,
}

impl LifecycleManager {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx,
            phase: Arc::new(RwLock::new(Phase::Installing)),
            capabilities: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn phase(&self) -> Phase {
        *self.phase.read().await
    }

    /// Install, then activate unless another version is active and this one must wait.
    ///
    /// A database that cannot be opened is logged and the worker continues network-only.
    pub async fn start(&self) -> Phase {
        if let Err(err) = self.install().await {
            tracing::error!(error = %format!("{err:#}"), "install incomplete; continuing without local storage");
        }
        if self.phase().await != Phase::Waiting {
            self.activate().await;
        }
        self.phase().await
    }

    /// Open the database, establish the client identity and precache static assets.
    pub async fn install(&self) -> anyhow::Result<()> {
        *self.phase.write().await = Phase::Installing;
        tracing::info!(version = %self.ctx.config.version, "installing worker");

        let client_id = self
            .ctx
            .client_state
            .client_id()
            .await
            .context("failed to open the local database")?;
        tracing::info!(client_id = %client_id, "client identity ready");

        self.precache().await;

        let previous = self
            .ctx
            .client_state
            .active_version()
            .await
            .context("failed to read the active worker version")?;
        if let Some(previous) = previous.filter(|v| *v != self.ctx.config.version) {
            tracing::info!(previous = %previous, version = %self.ctx.config.version, "new worker version waiting to activate");
            *self.phase.write().await = Phase::Waiting;
            self.ctx.notifier.publish(Notification::UpdateAvailable {
                version: self.ctx.config.version.clone(),
            });
        }
        Ok(())
    }

    async fn precache(&self) {
        for path in &self.ctx.config.precache {
            match self.ctx.transport.fetch(&WorkerRequest::get(path.clone())).await {
                Ok(response) if response.is_success() => {
                    if let Err(err) = self
                        .ctx
                        .responses
                        .put(STATIC_CACHE, path, response.status, response.content_type.as_deref(), &response.body)
                        .await
                    {
                        tracing::warn!(path = %path, error = %err, "failed to store precached asset");
                    }
                }
                Ok(response) => tracing::warn!(path = %path, status = response.status, "precache fetch returned an error status"),
                Err(err) => tracing::warn!(path = %path, error = %err, "precache fetch failed"),
            }
        }
    }

    /// Clean up stale state, start intercepting requests and tell the host.
    pub async fn activate(&self) {
        match self.ctx.cache.sweep(self.ctx.clock.now()).await {
            Ok(removed) => tracing::debug!(removed, "inference cache swept on activation"),
            Err(err) => tracing::warn!(error = %err, "inference cache sweep failed on activation"),
        }
        if let Err(err) = self.ctx.store.evict_to_quota().await {
            tracing::warn!(error = %err, "quota enforcement failed on activation");
        }
        if let Err(err) = self.ctx.client_state.set_active_version(&self.ctx.config.version).await {
            tracing::warn!(error = %err, "failed to record the active worker version");
        }

        self.ctx.router.set_ready();
        *self.phase.write().await = Phase::Active;
        tracing::info!(version = %self.ctx.config.version, "worker activated");
        self.ctx.notifier.publish(Notification::Activated);
    }

    pub async fn handle_message(&self, message: HostMessage) -> HostReply {
        tracing::debug!(message = ?message, "host message");
        match message {
            HostMessage::GetCapabilities => {
                let capabilities = self.current_capabilities().await;
                self.apply_capabilities(capabilities).await
            }
            HostMessage::SetCapabilities(mut capabilities) => {
                capabilities.tier = classify(&capabilities);
                self.apply_capabilities(capabilities).await
            }
            HostMessage::UpdateBattery(battery) => {
                let current = self.current_capabilities().await;
                if needs_revision(current.battery, Some(battery)) {
                    let mut revised = current;
                    revised.battery = Some(battery);
                    self.apply_capabilities(revised).await
                } else {
                    let strategy = self.ctx.runtime.strategy().await;
                    HostReply::Capabilities {
                        capabilities: current,
                        strategy,
                    }
                }
            }
            HostMessage::SetConnectivity(online) => {
                set_connectivity(&self.ctx, online);
                HostReply::Ack
            }
            HostMessage::SkipWaiting => {
                if self.phase().await == Phase::Waiting {
                    self.activate().await;
                }
                HostReply::Ack
            }
            HostMessage::ClearCaches => match self.clear_caches().await {
                Ok(()) => HostReply::Ack,
                Err(err) => HostReply::Error { message: err.to_string() },
            },
            HostMessage::GetStatus => match self.status().await {
                Ok(status) => HostReply::Status(status),
                Err(err) => HostReply::Error { message: err.to_string() },
            },
        }
    }

    /// Last known capabilities, profiling the host on first use.
    async fn current_capabilities(&self) -> DeviceCapabilities {
        let known = self.capabilities.read().await.clone();
        match known {
            Some(caps) => caps,
            None => self.ctx.profiler.profile().await,
        }
    }

    async fn apply_capabilities(&self, capabilities: DeviceCapabilities) -> HostReply {
        let strategy = self.ctx.policy.select_strategy(&capabilities);
        self.ctx.runtime.set_strategy(strategy.clone()).await;
        *self.capabilities.write().await = Some(capabilities.clone());
        HostReply::Capabilities {
            capabilities,
            strategy,
        }
    }

    async fn clear_caches(&self) -> Result<(), auditai_store::StoreError> {
        self.ctx.cache.clear().await?;
        let removed = self.ctx.responses.clear(DYNAMIC_CACHE).await?;
        tracing::info!(dynamic_responses = removed, "caches cleared at host request");
        Ok(())
    }

    pub async fn status(&self) -> Result<WorkerStatus, auditai_store::StoreError> {
        let usage = self.ctx.store.usage().await?;
        Ok(WorkerStatus {
            version: self.ctx.config.version.clone(),
            phase: self.phase().await,
            router: self.ctx.router.state(),
            connectivity: self.ctx.connectivity.state(),
            strategy: self.ctx.runtime.strategy().await.name,
            models: usage.models,
            total_bytes: usage.total_bytes,
            quota_bytes: usage.quota_bytes,
            queued_updates: self.ctx.sync.queue().len().await?,
            cached_inferences: self.ctx.cache.len().await?,
        })
    }
}

/// Apply a connectivity report; going online triggers a flush of queued updates.
pub fn set_connectivity(ctx: &WorkerContext, online: bool) {
    let state = if online {
        ConnectivityState::Online
    } else {
        ConnectivityState::Offline
    };
    if !ctx.connectivity.set(state) {
        return;
    }
    if online {
        ctx.notifier.publish(Notification::Online);
        ctx.sync.trigger_flush();
    } else {
        ctx.notifier.publish(Notification::Offline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::request::WorkerResponse;
    use crate::transport::{ModelDownload, SyncRequest, SyncResponse, Transport, TransportError};
    use async_trait::async_trait;
    use auditai_core::{ModelId, SystemClock};
    use auditai_device::{GpuInfo, NetworkClass, Tier};
    use serde_json::{Value, json};

    struct AssetsOnly;

    #[async_trait]
    impl Transport for AssetsOnly {
        async fn download_model(&self, _model_id: &ModelId) -> Result<ModelDownload, TransportError> {
            Err(TransportError::Network("down".into()))
        }

        async fn infer(&self, _model_id: &ModelId, _input: &Value) -> Result<Value, TransportError> {
            Err(TransportError::Network("down".into()))
        }

        async fn sync(&self, _request: &SyncRequest) -> Result<SyncResponse, TransportError> {
            Ok(SyncResponse::default())
        }

        async fn fetch(&self, request: &WorkerRequest) -> Result<WorkerResponse, TransportError> {
            match request.path.as_str() {
                "/index.html" => Ok(WorkerResponse::new(200, Some("text/html".into()), b"<html/>".to_vec())),
                _ => Ok(WorkerResponse::new(404, None, Vec::new())),
            }
        }
    }

    fn context(db_url: &str, version: &str) -> WorkerContext {
        let config = WorkerConfig {
            database_url: Some(db_url.to_string()),
            precache: vec!["/index.html".into(), "/missing.css".into()],
            version: version.to_string(),
            ..WorkerConfig::default()
        };
        WorkerContext::build(config, Arc::new(AssetsOnly), SystemClock::shared()).unwrap()
    }

    fn high_end(battery: Option<BatteryStatus>) -> DeviceCapabilities {
        DeviceCapabilities {
            cores: 8,
            memory_gb: 16.0,
            gpu: GpuInfo {
                supported: true,
                webgl2: true,
                max_texture_size: 8192,
            },
            cpu_score: 60.0,
            mem_throughput_mbps: 0.0,
            network_class: NetworkClass::FourG,
            battery,
            storage: None,
            tier: Tier::LowEnd,
        }
    }

    #[tokio::test]
    async fn fresh_install_activates_and_precaches() {
        let ctx = context("sqlite::memory:", "1.0.0");
        let lifecycle = LifecycleManager::new(ctx.clone());
        let mut notifications = ctx.notifier.subscribe();

        assert_eq!(lifecycle.start().await, Phase::Active);
        assert_eq!(ctx.router.state(), RouterState::Ready);
        assert_eq!(notifications.recv().await.unwrap(), Notification::Activated);

        assert!(ctx.responses.get(STATIC_CACHE, "/index.html").await.unwrap().is_some());
        assert!(ctx.responses.get(STATIC_CACHE, "/missing.css").await.unwrap().is_none());
        assert_eq!(ctx.client_state.active_version().await.unwrap().as_deref(), Some("1.0.0"));
    }

    #[tokio::test]
    async fn new_version_waits_for_skip_waiting() {
        let path = std::env::temp_dir().join(format!("auditai-lifecycle-{}.db", unique_suffix()));
        let url = format!("sqlite://{}", path.display());

        let first = context(&url, "1.0.0");
        LifecycleManager::new(first.clone()).start().await;
        first.db.close().await;

        let second = context(&url, "1.1.0");
        let lifecycle = LifecycleManager::new(second.clone());
        let mut notifications = second.notifier.subscribe();

        assert_eq!(lifecycle.start().await, Phase::Waiting);
        assert_eq!(second.router.state(), RouterState::Uninitialized);
        assert_eq!(
            notifications.recv().await.unwrap(),
            Notification::UpdateAvailable { version: "1.1.0".into() }
        );

        assert_eq!(lifecycle.handle_message(HostMessage::SkipWaiting).await, HostReply::Ack);
        assert_eq!(lifecycle.phase().await, Phase::Active);
        assert_eq!(second.router.state(), RouterState::Ready);

        second.db.close().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn host_capabilities_drive_strategy_and_battery_revision() {
        let ctx = context("sqlite::memory:", "1.0.0");
        let lifecycle = LifecycleManager::new(ctx.clone());

        let reply = lifecycle.handle_message(HostMessage::SetCapabilities(high_end(None))).await;
        let HostReply::Capabilities { capabilities, strategy } = reply else {
            panic!("unexpected reply: {reply:?}");
        };
        assert_eq!(capabilities.tier, Tier::HighEnd);
        assert_eq!(strategy.name, "high-end");
        assert_eq!(ctx.runtime.strategy().await.name, "high-end");

        let low = BatteryStatus { level: 0.1, charging: false };
        let reply = lifecycle.handle_message(HostMessage::UpdateBattery(low)).await;
        let HostReply::Capabilities { strategy, .. } = reply else {
            panic!("unexpected reply: {reply:?}");
        };
        assert_eq!(strategy.name, "battery-saver");

        // A 5-point change does not revise the strategy.
        let slightly = BatteryStatus { level: 0.15, charging: false };
        let reply = lifecycle.handle_message(HostMessage::UpdateBattery(slightly)).await;
        let HostReply::Capabilities { capabilities, .. } = reply else {
            panic!("unexpected reply: {reply:?}");
        };
        assert_eq!(capabilities.battery, Some(low));
    }

    #[tokio::test]
    async fn connectivity_messages_publish_transitions() {
        let ctx = context("sqlite::memory:", "1.0.0");
        let lifecycle = LifecycleManager::new(ctx.clone());
        let mut notifications = ctx.notifier.subscribe();

        lifecycle.handle_message(HostMessage::SetConnectivity(true)).await;
        lifecycle.handle_message(HostMessage::SetConnectivity(false)).await;
        lifecycle.handle_message(HostMessage::SetConnectivity(true)).await;

        assert_eq!(notifications.recv().await.unwrap(), Notification::Offline);
        assert_eq!(notifications.recv().await.unwrap(), Notification::Online);
        assert!(ctx.connectivity.is_online());
    }

    #[tokio::test]
    async fn status_and_clear_caches() {
        let ctx = context("sqlite::memory:", "1.0.0");
        let lifecycle = LifecycleManager::new(ctx.clone());
        lifecycle.start().await;
        ctx.responses.put(DYNAMIC_CACHE, "/x", 200, None, b"x").await.unwrap();

        assert_eq!(lifecycle.handle_message(HostMessage::ClearCaches).await, HostReply::Ack);
        assert!(ctx.responses.get(DYNAMIC_CACHE, "/x").await.unwrap().is_none());

        let HostReply::Status(status) = lifecycle.handle_message(HostMessage::GetStatus).await else {
            panic!("expected status");
        };
        assert_eq!(status.phase, Phase::Active);
        assert_eq!(status.router, RouterState::Ready);
        assert_eq!(status.models, 0);
        assert_eq!(status.strategy, "low-end");
    }

    #[test]
    fn host_messages_use_type_and_payload() {
        let msg: HostMessage = serde_json::from_value(json!({"type": "set_connectivity", "payload": false})).unwrap();
        assert_eq!(msg, HostMessage::SetConnectivity(false));
        let msg: HostMessage = serde_json::from_value(json!({"type": "get_status"})).unwrap();
        assert_eq!(msg, HostMessage::GetStatus);
    }

    fn unique_suffix() -> String {
        format!(
            "{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default()
        )
    }
}
