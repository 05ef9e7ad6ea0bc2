//! Host capability snapshot.

use serde::{Deserialize, Serialize};

/// Coarse device classification driving strategy selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    HighEnd,
    MidRange,
    #[default]
    LowEnd,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::HighEnd => "high-end",
            Tier::MidRange => "mid-range",
            Tier::LowEnd => "low-end",
        }
    }
}

impl core::fmt::Display for Tier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effective connection type as reported by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkClass {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuInfo {
    pub supported: bool,
    pub webgl2: bool,
    pub max_texture_size: u32,
}

/// Battery state; `level` is in \[0, 1\].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryStatus {
    pub level: f64,
    pub charging: bool,
}

impl BatteryStatus {
    /// Low and draining: the battery-saver strategy applies.
    pub fn is_saver(&self) -> bool {
        self.level < 0.2 && !self.charging
    }
}

/// Storage quota reported by the host, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEstimate {
    pub quota: u64,
    pub used: u64,
}

impl StorageEstimate {
    pub fn available(&self) -> u64 {
        self.quota.saturating_sub(self.used)
    }
}

/// Snapshot of the host, computed once per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub cores: u32,
    pub memory_gb: f64,
    #[serde(default)]
    pub gpu: GpuInfo,
    /// CPU micro-benchmark score in \[0, 100\].
    pub cpu_score: f64,
    #[serde(default)]
    pub mem_throughput_mbps: f64,
    #[serde(default, rename = "network")]
    pub network_class: NetworkClass,
    #[serde(default)]
    pub battery: Option<BatteryStatus>,
    #[serde(default)]
    pub storage: Option<StorageEstimate>,
    #[serde(default)]
    pub tier: Tier,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_supplied_json_uses_web_names() {
        let caps: DeviceCapabilities = serde_json::from_value(serde_json::json!({
            "cores": 4,
            "memory_gb": 8.0,
            "cpu_score": 40.0,
            "network": "3g",
            "battery": { "level": 0.5, "charging": true },
            "tier": "mid-range",
        }))
        .unwrap();

        assert_eq!(caps.network_class, NetworkClass::ThreeG);
        assert_eq!(caps.tier, Tier::MidRange);
        assert!(!caps.gpu.supported);
    }

    #[test]
    fn saver_requires_low_and_not_charging() {
        assert!(BatteryStatus { level: 0.1, charging: false }.is_saver());
        assert!(!BatteryStatus { level: 0.1, charging: true }.is_saver());
        assert!(!BatteryStatus { level: 0.2, charging: false }.is_saver());
    }
}
