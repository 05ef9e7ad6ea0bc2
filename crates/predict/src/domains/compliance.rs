use serde_json::{Value, json};

use crate::prediction::{PredictError, Prediction};
use crate::predictor::Predictor;

/// Compliance checklist completeness.
///
/// Input: `{ "checklist": [ { "item": string, "completed": bool, "critical"?: bool }, ... ] }`.
/// Any open critical item makes the outcome `non_compliant` regardless of ratio.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompliancePredictor;

impl Predictor for CompliancePredictor {
    fn domain(&self) -> &str {
        "compliance_check"
    }

    fn predict(&self, input: &Value) -> Result<Prediction, PredictError> {
        let items = input
            .get("checklist")
            .and_then(Value::as_array)
            .ok_or_else(|| PredictError::InvalidInput("'checklist' must be an array".to_string()))?;

        if items.is_empty() {
            return Ok(Prediction::new(0.0, 0.3)
                .with_label("empty")
                .with_metadata(json!({ "domain": self.domain() })));
        }

        let mut completed = 0usize;
        let mut open_critical = Vec::new();
        for item in items {
            let done = item.get("completed").and_then(Value::as_bool).unwrap_or(false);
            if done {
                completed += 1;
            } else if item.get("critical").and_then(Value::as_bool).unwrap_or(false) {
                let name = item.get("item").and_then(Value::as_str).unwrap_or("<unnamed>");
                open_critical.push(name.to_string());
            }
        }

        let ratio = completed as f64 / items.len() as f64;
        let label = if !open_critical.is_empty() || ratio < 0.5 {
            "non_compliant"
        } else if ratio < 1.0 {
            "partially_compliant"
        } else {
            "compliant"
        };

        Ok(Prediction::new(ratio, 0.9)
            .with_label(label)
            .with_explanation(format!("{completed}/{} checklist items completed", items.len()))
            .with_metadata(json!({
                "domain": self.domain(),
                "open_critical": open_critical,
            })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_critical_item_fails_the_check() {
        let p = CompliancePredictor
            .predict(&json!({
                "checklist": [
                    { "item": "segregation of duties", "completed": true },
                    { "item": "bank reconciliation", "completed": true },
                    { "item": "access review", "completed": false, "critical": true },
                ]
            }))
            .unwrap();
        assert_eq!(p.label.as_deref(), Some("non_compliant"));
        assert_eq!(p.metadata["open_critical"][0], "access review");
    }

    #[test]
    fn fully_completed_checklist_is_compliant() {
        let p = CompliancePredictor
            .predict(&json!({ "checklist": [ { "item": "a", "completed": true } ] }))
            .unwrap();
        assert_eq!(p.label.as_deref(), Some("compliant"));
        assert_eq!(p.score, 1.0);
    }
}
