use serde_json::Value;

use crate::prediction::{PredictError, Prediction};

/// A domain-specific model execution unit.
///
/// Implementations must be deterministic for a given input: results are
/// memoized by content hash, so two calls with the same input are expected to
/// be interchangeable. Implementations must not perform IO.
pub trait Predictor: Send + Sync + 'static {
    /// Model domain handled by this predictor (matches `ModelRecord.domain`).
    fn domain(&self) -> &str;

    /// Execute inference on `input`.
    fn predict(&self, input: &Value) -> Result<Prediction, PredictError>;
}
