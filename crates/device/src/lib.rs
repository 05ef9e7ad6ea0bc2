//! `auditai-device`
//!
//! **Responsibility:** decide how aggressively the runtime should optimize for
//! the host it runs on.
//!
//! - [`DeviceProfiler`] benchmarks the host and classifies it into a [`Tier`].
//! - [`OptimizationPolicy`] maps a tier (or the battery-saver override) to a
//!   fixed [`OptimizationStrategy`].
//!
//! Both are plain services: nothing here is global.

pub mod capabilities;
pub mod policy;
pub mod profiler;

pub use capabilities::{
    BatteryStatus, DeviceCapabilities, GpuInfo, NetworkClass, StorageEstimate, Tier,
};
pub use policy::{
    BATTERY_SAVER, CacheStrategy, OptimizationPolicy, OptimizationStrategy, Quantization, Throttle,
};
pub use profiler::{
    DefaultHostProbe, DeviceProfiler, FixedHostProbe, HostProbe, classify, needs_revision, score,
};
