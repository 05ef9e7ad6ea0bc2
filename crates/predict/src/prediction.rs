use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Output of a single model execution.
///
/// This is what gets memoized in the inference cache and returned to the host
/// page inside the router's response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Primary score (domain-specific meaning, usually in \[0, 1\]).
    pub score: f64,

    /// Confidence in \[0, 1\] (recommended convention; not enforced).
    pub confidence: f64,

    /// Optional categorical outcome (`"suspicious"`, `"high"`, ...).
    pub label: Option<String>,

    /// Optional human-readable explanation.
    pub explanation: Option<String>,

    /// Free-form metadata (domain, feature values, thresholds).
    pub metadata: JsonValue,
}

impl Prediction {
    pub fn new(score: f64, confidence: f64) -> Self {
        Self {
            score,
            confidence,
            label: None,
            explanation: None,
            metadata: JsonValue::Null,
        }
    }

    /// Result returned when no predictor can handle the request.
    pub fn low_confidence(reason: impl Into<String>) -> Self {
        Self::new(0.5, 0.1)
            .with_label("unknown")
            .with_explanation(reason)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("prediction failed: {0}")]
    Failed(String),
}
