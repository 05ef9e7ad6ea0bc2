use serde_json::{Value, json};

use super::require_f64;
use crate::prediction::{PredictError, Prediction};
use crate::predictor::Predictor;

/// Transaction fraud scoring.
///
/// Input: `{ "amount": number, "new_vendor"?: bool, "off_hours"?: bool }`.
///
/// Model:
/// - amount contributes linearly up to `amount_ceiling`,
/// - round amounts (multiples of 1000) and vendor/timing flags add fixed weights,
/// - `score >= threshold` is labelled `suspicious`.
#[derive(Debug, Clone)]
pub struct FraudDetectionPredictor {
    amount_ceiling: f64,
    threshold: f64,
}

impl Default for FraudDetectionPredictor {
    fn default() -> Self {
        Self {
            amount_ceiling: 10_000.0,
            threshold: 0.5,
        }
    }
}

impl FraudDetectionPredictor {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }
}

impl Predictor for FraudDetectionPredictor {
    fn domain(&self) -> &str {
        "fraud_detection"
    }

    fn predict(&self, input: &Value) -> Result<Prediction, PredictError> {
        let amount = require_f64(input, "amount")?;
        if !amount.is_finite() || amount < 0.0 {
            return Err(PredictError::InvalidInput(
                "'amount' must be a finite non-negative number".to_string(),
            ));
        }

        let new_vendor = input.get("new_vendor").and_then(Value::as_bool).unwrap_or(false);
        let off_hours = input.get("off_hours").and_then(Value::as_bool).unwrap_or(false);
        let round_amount = amount >= 1_000.0 && amount % 1_000.0 == 0.0;

        let mut score = (amount / self.amount_ceiling).min(1.0) * 0.6;
        if round_amount {
            score += 0.15;
        }
        if new_vendor {
            score += 0.15;
        }
        if off_hours {
            score += 0.1;
        }
        let score = score.min(1.0);

        let label = if score >= self.threshold { "suspicious" } else { "normal" };
        // Confidence grows with distance from the decision boundary.
        let confidence = (0.6 + (score - self.threshold).abs() * 0.8).min(0.99);

        Ok(Prediction::new(score, confidence)
            .with_label(label)
            .with_explanation(format!(
                "amount={amount:.2}, round_amount={round_amount}, new_vendor={new_vendor}, off_hours={off_hours}"
            ))
            .with_metadata(json!({
                "domain": self.domain(),
                "threshold": self.threshold,
            })))
    }
}
