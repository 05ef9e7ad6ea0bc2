//! `auditai-predict`
//!
//! **Responsibility:** the model-execution boundary of the offline runtime.
//!
//! A [`Predictor`] turns a JSON input into a [`Prediction`] for one model
//! domain (`fraud_detection`, `risk_assessment`, ...). Predictors are looked up
//! by domain in a [`PredictorRegistry`]. The shipped predictors are
//! deterministic heuristics standing in for real model execution; a production
//! backend registers its own predictors without touching cache or routing code.
//!
//! This crate has no IO and no knowledge of how models are stored.

pub mod domains;
pub mod prediction;
pub mod predictor;
pub mod registry;

pub use prediction::{PredictError, Prediction};
pub use predictor::Predictor;
pub use registry::PredictorRegistry;
