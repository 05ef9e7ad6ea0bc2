//! Worker error types.

use auditai_core::ModelId;
use auditai_store::StoreError;
use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("model not found: {0}")]
    ModelNotFound(ModelId),

    /// The stored blob could not be decompressed.
    #[error("model is corrupted: {0}")]
    ModelCorrupted(ModelId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RuntimeError {
    /// Whether the model is unusable locally, so the network may serve the request instead.
    pub fn is_local_miss(&self) -> bool {
        matches!(
            self,
            RuntimeError::ModelNotFound(_) | RuntimeError::ModelCorrupted(_) | RuntimeError::Store(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("client is offline")]
    Offline,
    #[error("network error: {0}")]
    Network(String),
    #[error("API error ({0}): {1}")]
    Api(u16, String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(msg) => SyncError::Network(msg),
            TransportError::Api(status, body) => SyncError::Api(status, body),
            TransportError::Parse(msg) => SyncError::Parse(msg),
        }
    }
}
