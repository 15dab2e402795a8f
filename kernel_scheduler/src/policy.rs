use crate::error::{SchedulerError, SchedulerResult};
use std::time::Duration;

/// How a module is dispatched relative to the main thread's barrier.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    /// Runs inline on the main thread, before the barrier closes.
    Synchronous,
    /// Runs on a worker; the barrier blocks until it completes.
    FrameSynced,
    /// Runs on a worker; the barrier does not wait for it.
    Asynchronous,
}

/// Which snapshot provider a module reads through.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Strategy {
    /// Reads the live repository directly. Only valid with `Synchronous`.
    Direct,
    Gdb,
    Sod,
    Shared,
}

/// A module's declared execution contract.
#[derive(Copy, Clone, Debug)]
pub struct ExecutionPolicy {
    pub mode: Mode,
    pub strategy: Strategy,
    /// Desired dispatch frequency in Hz; 0 means every tick.
    pub target_hz: u32,
    pub max_runtime_ms: u64,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl ExecutionPolicy {
    pub fn synchronous() -> Self {
        ExecutionPolicy {
            mode: Mode::Synchronous,
            strategy: Strategy::Direct,
            target_hz: 0,
            max_runtime_ms: 16,
            failure_threshold: 3,
            reset_timeout_ms: 1000,
        }
    }

    pub fn max_runtime(&self) -> Duration {
        Duration::from_millis(self.max_runtime_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// Tick period in simulation ticks; 0 `target_hz` runs every tick.
    /// Requires the simulation's own tick rate to compute a period, so
    /// the module scheduler passes `sim_hz` at dispatch time.
    pub fn period_ticks(&self, sim_hz: u32) -> u64 {
        if self.target_hz == 0 || sim_hz == 0 || self.target_hz >= sim_hz {
            1
        } else {
            (sim_hz / self.target_hz) as u64
        }
    }

    /// Validates the mode/strategy combination per the module contract:
    /// `Synchronous` requires `Direct`; background modes forbid `Direct`.
    pub fn validate(&self, module: &'static str) -> SchedulerResult<()> {
        match (self.mode, self.strategy) {
            (Mode::Synchronous, Strategy::Direct) => {}
            (Mode::Synchronous, _) => {
                return Err(SchedulerError::PolicyInvalid {
                    module,
                    reason: "Synchronous mode requires the Direct strategy",
                })
            }
            (_, Strategy::Direct) => {
                return Err(SchedulerError::PolicyInvalid {
                    module,
                    reason: "background modes cannot use the Direct strategy",
                })
            }
            _ => {}
        }
        if self.target_hz > 60 {
            return Err(SchedulerError::PolicyInvalid {
                module,
                reason: "target_hz must be in [0, 60]",
            });
        }
        Ok(())
    }
}
