//! Owns and wires every service of one worker instance.

use std::sync::Arc;

use anyhow::Context;
use auditai_core::SharedClock;
use auditai_device::{DeviceProfiler, OptimizationPolicy};
use auditai_predict::PredictorRegistry;
use auditai_store::{
    ClientState, Database, InferenceCache, ModelStore, ResponseCache, SyncQueue, default_db_path,
};

use crate::config::WorkerConfig;
use crate::connectivity::Connectivity;
use crate::notify::Notifier;
use crate::router::RequestRouter;
use crate::runtime::InferenceRuntime;
use crate::sync::SyncManager;
use crate::transport::Transport;

/// Shared application state, passed by reference to the lifecycle manager,
/// the background worker and the binary.
#[derive(Clone)]
pub struct WorkerContext {
    pub config: WorkerConfig,
    pub clock: SharedClock,
    pub db: Database,
    pub store: ModelStore,
    pub cache: InferenceCache,
    pub responses: ResponseCache,
    pub client_state: ClientState,
    pub runtime: InferenceRuntime,
    pub sync: SyncManager,
    pub router: RequestRouter,
    pub transport: Arc<dyn Transport>,
    pub connectivity: Connectivity,
    pub notifier: Notifier,
    pub policy: OptimizationPolicy,
    pub profiler: Arc<DeviceProfiler>,
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("config", &self.config)
            .field("db", &self.db.url())
            .finish()
    }
}

impl WorkerContext {
    /// Build with the default predictors.
    pub fn build(config: WorkerConfig, transport: Arc<dyn Transport>, clock: SharedClock) -> anyhow::Result<Self> {
        Self::build_with_registry(config, transport, clock, PredictorRegistry::with_defaults())
    }

    /// Build with a custom predictor registry.
    ///
    /// The database is not opened here; the first store operation opens it.
    pub fn build_with_registry(
        config: WorkerConfig,
        transport: Arc<dyn Transport>,
        clock: SharedClock,
        registry: PredictorRegistry,
    ) -> anyhow::Result<Self> {
        let db = match &config.database_url {
            Some(url) => Database::new(url.clone()),
            None => Database::at_path(&default_db_path().context("no location for the local model database")?),
        };

        let store = ModelStore::new(db.clone(), config.quota_bytes).with_clock(clock.clone());
        let cache = InferenceCache::new(db.clone(), config.cache_ttl()).with_clock(clock.clone());
        let responses = ResponseCache::new(db.clone()).with_clock(clock.clone());
        let queue = SyncQueue::new(db.clone()).with_clock(clock.clone());
        let client_state = ClientState::new(db.clone());
        let connectivity = Connectivity::default();
        let notifier = Notifier::default();

        let runtime = InferenceRuntime::new(store.clone(), cache.clone(), Arc::new(registry));
        let sync = SyncManager::new(
            queue,
            client_state.clone(),
            store.clone(),
            cache.clone(),
            transport.clone(),
            connectivity.clone(),
            notifier.clone(),
            config.sync_batch_size,
        );
        let router = RequestRouter::new(
            config.routes.clone(),
            runtime.clone(),
            store.clone(),
            responses.clone(),
            sync.clone(),
            transport.clone(),
            connectivity.clone(),
        );

        tracing::debug!(db = %db.url(), quota_bytes = config.quota_bytes, "worker context built");

        Ok(Self {
            config,
            clock,
            db,
            store,
            cache,
            responses,
            client_state,
            runtime,
            sync,
            router,
            transport,
            connectivity,
            notifier,
            policy: OptimizationPolicy::new(),
            profiler: Arc::new(DeviceProfiler::default()),
        })
    }
}
