use serde_json::{Value, json};

use crate::prediction::{PredictError, Prediction};
use crate::predictor::Predictor;

/// Rolling z-score anomaly detection over a numeric series.
///
/// Input: `{ "values": [number, ...] }`.
///
/// Model:
/// - Convert the series into deltas.
/// - Compare the most recent delta against a rolling window of previous deltas.
/// - Flag if the z-score exceeds `z_threshold`.
#[derive(Debug, Clone)]
pub struct AnomalyDetectionPredictor {
    /// Rolling window size for baseline deltas (must be >= 2 to compute stddev).
    window: usize,
    z_threshold: f64,
}

impl Default for AnomalyDetectionPredictor {
    fn default() -> Self {
        Self {
            window: 10,
            z_threshold: 3.0,
        }
    }
}

impl AnomalyDetectionPredictor {
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn with_z_threshold(mut self, z_threshold: f64) -> Self {
        self.z_threshold = z_threshold;
        self
    }
}

impl Predictor for AnomalyDetectionPredictor {
    fn domain(&self) -> &str {
        "anomaly_detection"
    }

    fn predict(&self, input: &Value) -> Result<Prediction, PredictError> {
        if self.window < 2 {
            return Err(PredictError::InvalidInput(
                "window must be >= 2 to compute standard deviation".to_string(),
            ));
        }

        let values: Vec<f64> = input
            .get("values")
            .and_then(Value::as_array)
            .ok_or_else(|| PredictError::InvalidInput("'values' must be an array".to_string()))?
            .iter()
            .filter_map(Value::as_f64)
            .collect();

        // Baseline deltas count = window; total points needed = window + 2.
        if values.len() < 3 {
            return Ok(Prediction::new(0.0, 0.2)
                .with_label("insufficient_data")
                .with_metadata(json!({ "domain": self.domain(), "points": values.len() })));
        }

        let deltas: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
        let last_delta = *deltas.last().unwrap_or(&0.0);

        let end = deltas.len() - 1;
        let start = end.saturating_sub(self.window);
        let baseline = &deltas[start..end];

        let mean = mean(baseline);
        let std = stddev_sample(baseline, mean);

        let (z, anomalous) = if std <= f64::EPSILON {
            // Constant baseline: any deviation is anomalous.
            let deviates = (last_delta - mean).abs() > 0.0;
            (if deviates { f64::INFINITY } else { 0.0 }, deviates)
        } else {
            let z = (last_delta - mean) / std;
            (z, z.abs() >= self.z_threshold)
        };

        // Severity scales with how far beyond threshold we are (>= 1.0 means at threshold).
        let severity = if z.is_finite() { z.abs() / self.z_threshold } else { 1.0 };
        let confidence = if baseline.len() >= self.window { 0.8 } else { 0.5 };

        Ok(Prediction::new(severity.min(1.0), confidence)
            .with_label(if anomalous { "anomaly" } else { "normal" })
            .with_explanation(format!(
                "last delta {last_delta:.2}; baseline mean={mean:.2}, std={std:.2} over {} deltas",
                baseline.len()
            ))
            .with_metadata(json!({
                "domain": self.domain(),
                "window": self.window,
                "z_threshold": self.z_threshold,
                "z": if z.is_finite() { json!(z) } else { Value::Null },
            })))
    }
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / (xs.len() as f64)
}

/// Sample standard deviation (n-1), deterministic.
fn stddev_sample(xs: &[f64], mean: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let var = xs
        .iter()
        .map(|x| {
            let d = x - mean;
            d * d
        })
        .sum::<f64>()
        / ((xs.len() - 1) as f64);
    var.sqrt()
}
