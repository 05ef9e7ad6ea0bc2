//! `auditai-store`
//!
//! **Responsibility:** durable local state of the offline AI runtime.
//!
//! Everything lives in one SQLite database (see [`Database`]):
//! - [`ModelStore`]: quota-bounded model binaries + metadata with strict LRU eviction
//! - [`InferenceCache`]: content-addressed memoization of inference results with TTL expiry
//! - [`SyncQueue`]: ordered outbound federated-learning updates
//! - [`ResponseCache`]: static/dynamic response caches for intercepted asset requests
//! - [`ClientState`]: installation identity and the active worker version
//!
//! Handles are cheap to clone and share one lazily opened connection pool.

pub mod client_state;
pub mod codec;
pub mod db;
pub mod error;
pub mod inference_cache;
pub mod model_store;
pub mod response_cache;
pub mod sync_queue;

pub use client_state::ClientState;
pub use codec::{Codec, CodecError, DeflateCodec, UnavailableCodec};
pub use db::{Database, default_db_path};
pub use error::{StoreError, StoreResult};
pub use inference_cache::{InferenceCache, InferenceCacheEntry, content_hash};
pub use model_store::{LoadedModel, ModelBlob, ModelMetadata, ModelRecord, ModelStore, StoreUsage};
pub use response_cache::{CachedResponse, DYNAMIC_CACHE, ResponseCache, STATIC_CACHE};
pub use sync_queue::{FederatedUpdate, SyncQueue};
