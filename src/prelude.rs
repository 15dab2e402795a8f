//! Single import for the common kernel-core/kernel-scheduler/module-host
//! surface: `use module_host::prelude::*;`.

pub use kernel_core::{
    CommandBuffer, Component, ComponentId, ComponentMask, CoreError, CoreResult, Entity, EntityRegistry, Event,
    EventBus, EventId, GdbProvider, LifecycleState, ManagedComponent, Query, QueryBuilder, Repository, Schema,
    SharedProvider, SnapshotKind, SnapshotProvider, SodProvider, Target, View,
};
pub use kernel_scheduler::{
    BreakerState, CircuitBreaker, ConstructionAck, ConstructionOrder, DestructionAck, DestructionOrder,
    ExecutionPolicy, LifecycleCoordinator, Mode, Module, ModuleScheduler, ParticipantId, Phase, ProfileWindow,
    SchedulerError, SchedulerResult, Strategy, System, SystemScheduler,
};

pub use crate::{Kernel, KernelConfig};
