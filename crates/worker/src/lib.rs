//! `auditai-worker`
//!
//! **Responsibility:** the offline inference worker that sits between the
//! host application and the AuditAI API.
//!
//! This crate provides:
//! - Cache-first request interception ([`RequestRouter`])
//! - Local inference with memoization and per-model throttling ([`InferenceRuntime`])
//! - Ordered, at-least-once federated sync ([`SyncManager`])
//! - Install/activate lifecycle and the host message channel ([`LifecycleManager`])
//! - Background flush, quota enforcement and cache sweeps ([`MaintenanceWorker`])
//!
//! The API remains the authority; the worker only serves what it has cached
//! and queues what it cannot send.

pub mod config;
pub mod connectivity;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod request;
pub mod router;
pub mod runtime;
pub mod sync;
pub mod transport;
pub mod worker;

pub use config::{RoutePrefixes, WorkerConfig};
pub use connectivity::{Connectivity, ConnectivityState};
pub use context::WorkerContext;
pub use error::{RuntimeError, SyncError};
pub use lifecycle::{HostMessage, HostReply, LifecycleManager, Phase, WorkerStatus, set_connectivity};
pub use notify::{Notification, Notifier};
pub use request::{Method, WorkerRequest, WorkerResponse};
pub use router::{RequestRouter, RouteClass, RouterState};
pub use runtime::{InferenceResult, InferenceRuntime, Throttler};
pub use sync::{FlushOutcome, MODEL_UPDATE, ModelUpdatePayload, SyncManager, UpdateHandler};
pub use transport::{HttpTransport, ModelDownload, ServerUpdate, SyncRequest, SyncResponse, Transport, TransportError};
pub use worker::MaintenanceWorker;
