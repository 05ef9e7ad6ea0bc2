use serde_json::{Value, json};

use super::require_f64;
use crate::prediction::{PredictError, Prediction};
use crate::predictor::Predictor;

/// Likelihood x impact risk rating on the usual 5x5 audit matrix.
///
/// Input: `{ "likelihood": 1..=5, "impact": 1..=5 }`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskAssessmentPredictor;

fn rating(product: f64) -> &'static str {
    match product {
        p if p >= 20.0 => "critical",
        p if p >= 12.0 => "high",
        p if p >= 6.0 => "medium",
        _ => "low",
    }
}

impl Predictor for RiskAssessmentPredictor {
    fn domain(&self) -> &str {
        "risk_assessment"
    }

    fn predict(&self, input: &Value) -> Result<Prediction, PredictError> {
        let likelihood = require_f64(input, "likelihood")?;
        let impact = require_f64(input, "impact")?;

        for (name, v) in [("likelihood", likelihood), ("impact", impact)] {
            if !(1.0..=5.0).contains(&v) {
                return Err(PredictError::InvalidInput(format!(
                    "'{name}' must be between 1 and 5, got {v}"
                )));
            }
        }

        let product = likelihood * impact;
        Ok(Prediction::new(product / 25.0, 0.85)
            .with_label(rating(product))
            .with_explanation(format!("likelihood {likelihood} x impact {impact} = {product}"))
            .with_metadata(json!({
                "domain": self.domain(),
                "inherent_risk": product,
            })))
    }
}
