use crate::error::SchedulerResult;
use crate::policy::ExecutionPolicy;
use crate::system_scheduler::SystemScheduler;
use kernel_core::mask::ComponentMask;
use kernel_core::schema::{ComponentId, EventId};
use kernel_core::view::View;

/// A heavier background worker scheduled across ticks, as opposed to
/// a `System` which runs inline within one. Implementations provide
/// `name`, `policy`, optional `register_systems`, optional reactive
/// triggers (`watch_components`/`watch_events`), `required_components`
/// and `tick` (§6).
pub trait Module: Send + Sync {
    fn name(&self) -> &'static str;

    fn policy(&self) -> ExecutionPolicy;

    /// Registers any `System`s this module owns into the tick's
    /// system scheduler. Most modules that only need a background
    /// view leave this as a no-op.
    fn register_systems(&self, _registry: &mut SystemScheduler) {}

    /// Component ids that, if unchanged since this module's last run,
    /// let the scheduler skip this tick's dispatch. An empty slice
    /// means the module is always eligible to run (subject to its
    /// frequency and circuit breaker).
    fn watch_components(&self) -> &[ComponentId] {
        &[]
    }

    fn watch_events(&self) -> &[EventId] {
        &[]
    }

    /// Components this module actually reads. The `Sod`/`Shared`
    /// snapshot strategies union every registered module's declared
    /// set to build the mask their replica is synced against.
    fn required_components(&self) -> ComponentMask {
        ComponentMask::new()
    }

    /// Runs one tick of this module against `view`. Errors feed the
    /// module's circuit breaker; they never abort the simulation.
    fn tick(&self, view: &View, dt: f64) -> SchedulerResult<()>;
}
