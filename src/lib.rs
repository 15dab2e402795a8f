//! `module-host`: a concurrency and data-propagation engine for a
//! real-time entity/component simulation. `kernel-core` owns the data
//! (chunked storage, schema, event bus, command buffer, snapshot
//! providers); `kernel-scheduler` owns the control flow that runs on
//! top of it (execution policy, circuit breaker, module scheduler,
//! system scheduler, lifecycle coordinator). This crate re-exports
//! both behind [`prelude`] and adds [`Kernel`], the façade that owns
//! one world and drives it through a tick.

pub mod config;
pub mod kernel;
pub mod prelude;

pub use config::KernelConfig;
pub use kernel::Kernel;
