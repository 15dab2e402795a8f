use serde::{Deserialize, Serialize};

/// The knobs the spec leaves as constants, gathered into one
/// `serde`-loadable config so a binary can ship a TOML file instead of
/// hard-coding them. `KernelConfig::default()` reproduces the spec's
/// literal defaults, so `Kernel::new` works with zero configuration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Rows per chunk in the chunked column store (§3, typical 1024).
    pub chunk_capacity: usize,
    /// Number of pre-warmed replicas the SoD provider's pool holds.
    pub sod_pool_size: usize,
    /// How long `SodProvider::acquire_view` spins/blocks before
    /// returning `PoolExhausted`.
    pub sod_acquire_deadline_ms: u64,
    /// Spare replicas the Shared provider keeps ready between ticks.
    pub shared_spare_pool_size: usize,
    /// Worker threads in the `rayon` pool backing `FrameSynced`/
    /// `Asynchronous` module dispatch.
    pub worker_threads: usize,
    /// The simulation's own tick rate, used to turn a module's
    /// `target_hz` into a dispatch period.
    pub sim_hz: u32,
    /// Fixed timestep handed to systems and modules each tick.
    pub fixed_dt_secs: f64,
    /// Default circuit-breaker failure threshold for modules that
    /// don't override it in their own `ExecutionPolicy`.
    pub default_failure_threshold: u32,
    /// Default circuit-breaker reset timeout, in milliseconds.
    pub default_reset_timeout_ms: u64,
    /// Default soft runtime budget for a module tick, in milliseconds.
    pub default_max_runtime_ms: u64,
    /// Frames a lifecycle construction/destruction quorum may stay
    /// pending before the coordinator forces destruction.
    pub lifecycle_timeout_frames: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            chunk_capacity: 1024,
            sod_pool_size: 4,
            sod_acquire_deadline_ms: 5,
            shared_spare_pool_size: 2,
            worker_threads: 4,
            sim_hz: 60,
            fixed_dt_secs: 1.0 / 60.0,
            default_failure_threshold: 3,
            default_reset_timeout_ms: 1000,
            default_max_runtime_ms: 16,
            lifecycle_timeout_frames: 300,
        }
    }
}

impl KernelConfig {
    /// Parses a `KernelConfig` from a TOML document, falling back to
    /// `Default` for any field the document omits.
    pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    pub fn sod_acquire_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sod_acquire_deadline_ms)
    }

    /// Builds an `ExecutionPolicy` for `mode`/`strategy` using this
    /// config's default circuit-breaker and runtime-budget values, for
    /// modules that have no reason to pick their own.
    pub fn default_policy(&self, mode: kernel_scheduler::Mode, strategy: kernel_scheduler::Strategy) -> kernel_scheduler::ExecutionPolicy {
        kernel_scheduler::ExecutionPolicy {
            mode,
            strategy,
            target_hz: 0,
            max_runtime_ms: self.default_max_runtime_ms,
            failure_threshold: self.default_failure_threshold,
            reset_timeout_ms: self.default_reset_timeout_ms,
        }
    }
}
