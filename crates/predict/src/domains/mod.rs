//! Built-in audit-domain predictors.

mod anomaly;
mod compliance;
mod fraud;
mod risk;

pub use anomaly::AnomalyDetectionPredictor;
pub use compliance::CompliancePredictor;
pub use fraud::FraudDetectionPredictor;
pub use risk::RiskAssessmentPredictor;

use serde_json::Value;

use crate::prediction::PredictError;

/// Read a required numeric field from a JSON object.
fn require_f64(input: &Value, field: &str) -> Result<f64, PredictError> {
    input
        .get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| PredictError::InvalidInput(format!("'{field}' must be a number")))
}
