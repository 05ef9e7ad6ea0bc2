use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::domains::{
    AnomalyDetectionPredictor, CompliancePredictor, FraudDetectionPredictor, RiskAssessmentPredictor,
};
use crate::prediction::Prediction;
use crate::predictor::Predictor;

/// Lookup table from model domain to predictor.
///
/// Dispatch never fails: an unknown domain or a predictor error yields
/// [`Prediction::low_confidence`] so that the calling layer always has a
/// result to return.
#[derive(Clone, Default)]
pub struct PredictorRegistry {
    predictors: HashMap<String, Arc<dyn Predictor>>,
}

impl PredictorRegistry {
    /// Empty registry; every domain resolves to the default result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in audit-domain predictors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(FraudDetectionPredictor::default());
        registry.register(RiskAssessmentPredictor);
        registry.register(AnomalyDetectionPredictor::default());
        registry.register(CompliancePredictor);
        registry
    }

    /// Register (or replace) the predictor for its domain.
    pub fn register<P: Predictor>(&mut self, predictor: P) {
        self.predictors
            .insert(predictor.domain().to_string(), Arc::new(predictor));
    }

    pub fn get(&self, domain: &str) -> Option<Arc<dyn Predictor>> {
        self.predictors.get(domain).cloned()
    }

    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.predictors.keys().cloned().collect();
        domains.sort();
        domains
    }

    /// Run the predictor registered for `domain` on `input`.
    pub fn predict(&self, domain: &str, input: &Value) -> Prediction {
        let Some(predictor) = self.get(domain) else {
            tracing::debug!(domain, "no predictor registered; returning default result");
            return Prediction::low_confidence(format!("no predictor registered for domain '{domain}'"))
                .with_metadata(json!({ "domain": domain }));
        };

        match predictor.predict(input) {
            Ok(prediction) => prediction,
            Err(err) => {
                tracing::warn!(domain, error = %err, "predictor failed; returning default result");
                Prediction::low_confidence(err.to_string()).with_metadata(json!({ "domain": domain }))
            }
        }
    }
}

impl std::fmt::Debug for PredictorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictorRegistry")
            .field("domains", &self.domains())
            .finish()
    }
}
