use kernel_core::error::CoreError;
use std::time::Duration;

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors raised while registering modules/systems or dispatching a
/// tick. Structural errors (`PolicyInvalid`, `CircularDependency`,
/// `DuplicateRegistration`) are fatal at construction; the rest feed a
/// module's circuit breaker rather than stopping the simulation.
#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    #[error("module '{module}' has an inconsistent policy: {reason}")]
    PolicyInvalid { module: &'static str, reason: &'static str },

    #[error("circular dependency among systems {members:?} in phase {phase}")]
    CircularDependency { phase: &'static str, members: Vec<&'static str> },

    #[error("module '{0}' is already registered")]
    DuplicateRegistration(&'static str),

    #[error("module '{module}' exceeded its {limit:?} runtime budget")]
    ModuleTimeout { module: &'static str, limit: Duration },

    #[error("module '{module}' panicked or returned an error: {message}")]
    ModuleException { module: &'static str, message: String },

    #[error(transparent)]
    Core(#[from] CoreError),
}
