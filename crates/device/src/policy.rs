//! Tier → optimization strategy mapping.

use std::collections::HashMap;

use auditai_core::CompressionLevel;
use serde::{Deserialize, Serialize};

use crate::capabilities::{DeviceCapabilities, Tier};

pub const BATTERY_SAVER: &str = "battery-saver";

const MB: u64 = 1024 * 1024;

/// Numeric precision models are prepared at.
///
/// Carried as metadata: model preparation does not rewrite weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantization {
    Float32,
    Float16,
    Int8,
}

/// How eagerly results and models are kept around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    Aggressive,
    Balanced,
    Conservative,
    Minimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Throttle {
    pub enabled: bool,
    pub max_per_minute: u32,
}

impl Throttle {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_per_minute: 0,
        }
    }

    pub fn per_minute(max_per_minute: u32) -> Self {
        Self {
            enabled: true,
            max_per_minute,
        }
    }
}

/// Fixed optimization settings for a class of device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStrategy {
    pub name: String,
    pub compression_level: CompressionLevel,
    pub quantization: Quantization,
    pub batch_size: u32,
    pub cache_strategy: CacheStrategy,
    pub parallel_inference: bool,
    pub max_model_size_bytes: u64,
    pub preload_count: u32,
    pub throttle: Throttle,
}

impl OptimizationStrategy {
    pub fn high_end() -> Self {
        Self {
            name: Tier::HighEnd.as_str().to_string(),
            compression_level: CompressionLevel::Low,
            quantization: Quantization::Float32,
            batch_size: 32,
            cache_strategy: CacheStrategy::Aggressive,
            parallel_inference: true,
            max_model_size_bytes: 100 * MB,
            preload_count: 5,
            throttle: Throttle::disabled(),
        }
    }

    pub fn mid_range() -> Self {
        Self {
            name: Tier::MidRange.as_str().to_string(),
            compression_level: CompressionLevel::Medium,
            quantization: Quantization::Float16,
            batch_size: 16,
            cache_strategy: CacheStrategy::Balanced,
            parallel_inference: true,
            max_model_size_bytes: 50 * MB,
            preload_count: 3,
            throttle: Throttle::per_minute(120),
        }
    }

    pub fn low_end() -> Self {
        Self {
            name: Tier::LowEnd.as_str().to_string(),
            compression_level: CompressionLevel::High,
            quantization: Quantization::Int8,
            batch_size: 4,
            cache_strategy: CacheStrategy::Conservative,
            parallel_inference: false,
            max_model_size_bytes: 10 * MB,
            preload_count: 1,
            throttle: Throttle::per_minute(30),
        }
    }

    pub fn battery_saver() -> Self {
        Self {
            name: BATTERY_SAVER.to_string(),
            compression_level: CompressionLevel::High,
            quantization: Quantization::Int8,
            batch_size: 1,
            cache_strategy: CacheStrategy::Minimal,
            parallel_inference: false,
            max_model_size_bytes: 5 * MB,
            preload_count: 0,
            throttle: Throttle::per_minute(10),
        }
    }

    /// Whether a model of `size_bytes` may be cached under this strategy.
    pub fn admits_model(&self, size_bytes: u64) -> bool {
        size_bytes <= self.max_model_size_bytes
    }
}

impl Default for OptimizationStrategy {
    fn default() -> Self {
        Self::low_end()
    }
}

/// Strategy table keyed by name (tier names plus `battery-saver`).
#[derive(Debug, Clone)]
pub struct OptimizationPolicy {
    strategies: HashMap<String, OptimizationStrategy>,
}

impl Default for OptimizationPolicy {
    fn default() -> Self {
        let mut strategies = HashMap::new();
        for s in [
            OptimizationStrategy::high_end(),
            OptimizationStrategy::mid_range(),
            OptimizationStrategy::low_end(),
            OptimizationStrategy::battery_saver(),
        ] {
            strategies.insert(s.name.clone(), s);
        }
        Self { strategies }
    }
}

impl OptimizationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace one entry of the table.
    pub fn with_strategy(mut self, strategy: OptimizationStrategy) -> Self {
        self.strategies.insert(strategy.name.clone(), strategy);
        self
    }

    /// Look a strategy up by name; unknown names get the `low-end` strategy.
    pub fn strategy_for_name(&self, name: &str) -> OptimizationStrategy {
        self.strategies
            .get(name)
            .or_else(|| self.strategies.get(Tier::LowEnd.as_str()))
            .cloned()
            .unwrap_or_else(OptimizationStrategy::low_end)
    }

    pub fn strategy_for(&self, tier: Tier) -> OptimizationStrategy {
        self.strategy_for_name(tier.as_str())
    }

    /// Battery-saver wins over the tier whenever the battery is low and not charging.
    pub fn select_strategy(&self, caps: &DeviceCapabilities) -> OptimizationStrategy {
        if caps.battery.is_some_and(|b| b.is_saver()) {
            tracing::info!(tier = %caps.tier, "battery low and discharging; selecting battery-saver strategy");
            return self.strategy_for_name(BATTERY_SAVER);
        }
        self.strategy_for(caps.tier)
    }
}
