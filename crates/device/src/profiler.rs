//! Host benchmarking and tier classification.

use std::hint::black_box;
use std::time::{Duration, Instant};

use crate::capabilities::{
    BatteryStatus, DeviceCapabilities, GpuInfo, NetworkClass, StorageEstimate, Tier,
};

/// Candidates checked by the CPU benchmark when it is not cut short.
const CPU_ITERATION_BUDGET: u64 = 100_000;
/// Throughput (candidates per ms) that scores 50.
const CPU_REFERENCE_THROUGHPUT: f64 = 5_000.0;
const MEM_CHUNK_BYTES: usize = 1024 * 1024;
const MEM_LIMIT_BYTES: usize = 50 * MEM_CHUNK_BYTES;
/// Fallbacks when the host does not report hardware details.
const DEFAULT_CORES: u32 = 2;
const DEFAULT_MEMORY_GB: f64 = 4.0;

/// Source of host facts that cannot be benchmarked.
///
/// Every method is optional so that a host without a given API degrades to
/// the defaults instead of failing the profile.
pub trait HostProbe: Send + Sync {
    fn cores(&self) -> Option<u32>;
    fn memory_gb(&self) -> Option<f64>;
    fn gpu(&self) -> GpuInfo;
    fn network_class(&self) -> NetworkClass;
    fn battery(&self) -> Option<BatteryStatus>;
    fn storage(&self) -> Option<StorageEstimate>;
}

/// Probe for a plain OS process: only the core count is discoverable.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHostProbe;

impl HostProbe for DefaultHostProbe {
    fn cores(&self) -> Option<u32> {
        std::thread::available_parallelism()
            .ok()
            .map(|n| n.get() as u32)
    }

    fn memory_gb(&self) -> Option<f64> {
        None
    }

    fn gpu(&self) -> GpuInfo {
        GpuInfo::default()
    }

    fn network_class(&self) -> NetworkClass {
        NetworkClass::Unknown
    }

    fn battery(&self) -> Option<BatteryStatus> {
        None
    }

    fn storage(&self) -> Option<StorageEstimate> {
        None
    }
}

/// Probe with fixed answers (host-reported values, tests).
#[derive(Debug, Default, Clone)]
pub struct FixedHostProbe {
    pub cores: Option<u32>,
    pub memory_gb: Option<f64>,
    pub gpu: GpuInfo,
    pub network_class: NetworkClass,
    pub battery: Option<BatteryStatus>,
    pub storage: Option<StorageEstimate>,
}

impl HostProbe for FixedHostProbe {
    fn cores(&self) -> Option<u32> {
        self.cores
    }

    fn memory_gb(&self) -> Option<f64> {
        self.memory_gb
    }

    fn gpu(&self) -> GpuInfo {
        self.gpu
    }

    fn network_class(&self) -> NetworkClass {
        self.network_class
    }

    fn battery(&self) -> Option<BatteryStatus> {
        self.battery
    }

    fn storage(&self) -> Option<StorageEstimate> {
        self.storage
    }
}

/// Benchmarks the host and builds a [`DeviceCapabilities`] snapshot.
#[derive(Debug, Clone)]
pub struct DeviceProfiler<P = DefaultHostProbe> {
    probe: P,
    cpu_budget: Duration,
    total_budget: Duration,
}

impl Default for DeviceProfiler<DefaultHostProbe> {
    fn default() -> Self {
        Self::new(DefaultHostProbe)
    }
}

impl<P: HostProbe> DeviceProfiler<P> {
    pub fn new(probe: P) -> Self {
        Self {
            probe,
            cpu_budget: Duration::from_millis(200),
            total_budget: Duration::from_secs(1),
        }
    }

    /// Override the time budgets (the CPU budget is capped by the total).
    pub fn with_budgets(mut self, cpu: Duration, total: Duration) -> Self {
        self.cpu_budget = cpu.min(total);
        self.total_budget = total;
        self
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Run the benchmarks and probe the host.
    ///
    /// Benchmarks run on the blocking pool; the whole profile stays within the
    /// configured total budget (about one second by default).
    pub async fn profile(&self) -> DeviceCapabilities {
        let started = Instant::now();
        let cpu_budget = self.cpu_budget;
        let total_budget = self.total_budget;

        let (cpu_score, mem_throughput_mbps) = tokio::task::spawn_blocking(move || {
            let cpu = cpu_benchmark(cpu_budget);
            let remaining = total_budget.saturating_sub(started.elapsed());
            let mem = memory_benchmark(remaining, MEM_LIMIT_BYTES);
            (cpu, mem)
        })
        .await
        .unwrap_or_else(|err| {
            tracing::warn!(error = %err, "device benchmark task failed; assuming low scores");
            (0.0, 0.0)
        });

        let mut caps = DeviceCapabilities {
            cores: self.probe.cores().unwrap_or(DEFAULT_CORES),
            memory_gb: self.probe.memory_gb().unwrap_or(DEFAULT_MEMORY_GB),
            gpu: self.probe.gpu(),
            cpu_score,
            mem_throughput_mbps,
            network_class: self.probe.network_class(),
            battery: self.probe.battery(),
            storage: self.probe.storage(),
            tier: Tier::LowEnd,
        };
        caps.tier = classify(&caps);

        tracing::info!(
            tier = %caps.tier,
            cpu_score = caps.cpu_score,
            mem_throughput_mbps = caps.mem_throughput_mbps,
            cores = caps.cores,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "device profiled"
        );

        caps
    }

    /// Re-read the battery and report whether strategy selection must be revisited.
    ///
    /// Updates `caps.battery` in place when it changed.
    pub fn refresh_battery(&self, caps: &mut DeviceCapabilities) -> bool {
        let current = self.probe.battery();
        let revise = needs_revision(caps.battery, current);
        if revise {
            caps.battery = current;
        }
        revise
    }
}

/// A battery change of 10 percentage points, a charging toggle, or the
/// battery appearing/disappearing requires a new strategy.
pub fn needs_revision(previous: Option<BatteryStatus>, current: Option<BatteryStatus>) -> bool {
    match (previous, current) {
        (Some(prev), Some(cur)) => {
            (prev.level - cur.level).abs() >= 0.1 - f64::EPSILON || prev.charging != cur.charging
        }
        (None, None) => false,
        _ => true,
    }
}

/// Weighted capability score in \[0, 100\].
///
/// CPU 0–30, memory 0–25, GPU 0–20, core count 0–15, network 0–10.
pub fn score(caps: &DeviceCapabilities) -> f64 {
    let cpu = (caps.cpu_score / 2.0).clamp(0.0, 30.0);

    let memory = match caps.memory_gb {
        m if m >= 8.0 => 25.0,
        m if m >= 4.0 => 18.0,
        m if m >= 2.0 => 10.0,
        _ => 5.0,
    };

    let mut gpu = 0.0;
    if caps.gpu.supported {
        gpu += 10.0;
        if caps.gpu.webgl2 {
            gpu += 5.0;
        }
        if caps.gpu.max_texture_size >= 8192 {
            gpu += 5.0;
        }
    }

    let cores = match caps.cores {
        c if c >= 8 => 15.0,
        c if c >= 4 => 10.0,
        c if c >= 2 => 5.0,
        _ => 2.0,
    };

    let network = match caps.network_class {
        NetworkClass::FourG => 10.0,
        NetworkClass::ThreeG => 6.0,
        NetworkClass::TwoG => 3.0,
        NetworkClass::Slow2g => 1.0,
        NetworkClass::Unknown => 5.0,
    };

    cpu + memory + gpu + cores + network
}

/// `score >= 80` is high-end, `>= 50` mid-range, anything else low-end.
pub fn classify(caps: &DeviceCapabilities) -> Tier {
    match score(caps) {
        s if s >= 80.0 => Tier::HighEnd,
        s if s >= 50.0 => Tier::MidRange,
        _ => Tier::LowEnd,
    }
}

/// Prime-counting micro-benchmark.
///
/// Checks up to [`CPU_ITERATION_BUDGET`] candidates or until `budget` elapses,
/// and scores throughput relative to a reference machine (capped at 100).
fn cpu_benchmark(budget: Duration) -> f64 {
    let started = Instant::now();
    let mut checked = 0u64;
    let mut primes = 0u64;

    for n in 2..(CPU_ITERATION_BUDGET + 2) {
        if is_prime(n) {
            primes += 1;
        }
        checked += 1;
        if checked % 1_000 == 0 && started.elapsed() >= budget {
            break;
        }
    }
    black_box(primes);

    let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
    let throughput = checked as f64 / elapsed_ms.max(0.001);
    (50.0 * throughput / CPU_REFERENCE_THROUGHPUT).min(100.0)
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

/// Allocate and touch 1 MB chunks until `limit` bytes or `budget` elapses.
///
/// Returns throughput in MB/s.
fn memory_benchmark(budget: Duration, limit: usize) -> f64 {
    let started = Instant::now();
    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut allocated = 0usize;

    while allocated < limit && started.elapsed() < budget {
        let chunk = vec![(chunks.len() % 251) as u8; MEM_CHUNK_BYTES];
        allocated += chunk.len();
        chunks.push(black_box(chunk));
    }

    let secs = started.elapsed().as_secs_f64().max(1e-6);
    let mb = allocated as f64 / MEM_CHUNK_BYTES as f64;
    drop(chunks);
    mb / secs
}
