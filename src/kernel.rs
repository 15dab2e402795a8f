use crate::config::KernelConfig;
use kernel_core::entity::{Entity, LifecycleState};
use kernel_core::error::CoreResult;
use kernel_core::repository::Repository;
use kernel_core::schema::{Component, Event, Schema};
use kernel_core::snapshot::{GdbProvider, SharedProvider, SodProvider};
use kernel_core::view::View;
use kernel_scheduler::circuit_breaker::BreakerState;
use kernel_scheduler::error::SchedulerResult;
use kernel_scheduler::lifecycle::{LifecycleCoordinator, ParticipantId};
use kernel_scheduler::module::Module;
use kernel_scheduler::module_scheduler::ModuleScheduler;
use kernel_scheduler::system::System;
use kernel_scheduler::system_scheduler::SystemScheduler;
use std::sync::Arc;
use tracing::info_span;

/// Owns one world's worth of state and drives it through the per-tick
/// control flow from spec §2: play back last tick's recorded commands,
/// run phase-ordered systems against the live world, close the
/// end-of-tick barrier (swap events, run the lifecycle coordinator,
/// sync the GDB replica, clear dirty bits), then dispatch every
/// registered module under its execution policy.
///
/// `Kernel` is the only thing in this crate that owns a mutable handle
/// on the live repository; everything it hands out — to systems, to
/// modules, to callers polling lifecycle/circuit-breaker state — is
/// read-only. All of `Kernel`'s own methods are main-thread-only,
/// matching the repository's own threading contract (§4.7).
pub struct Kernel {
    live: Arc<Repository>,
    gdb: Arc<GdbProvider>,
    sod: Arc<SodProvider>,
    shared: Arc<SharedProvider>,
    modules: ModuleScheduler,
    systems: SystemScheduler,
    lifecycle: LifecycleCoordinator,
    config: KernelConfig,
    tick: u64,
    time: f64,
}

impl Kernel {
    /// Builds a kernel from an already-registered `schema` (component
    /// and event types, including any lifecycle events the caller
    /// wants `begin_construction`/`begin_destruction` to use — see
    /// `kernel_scheduler::lifecycle::register_events`).
    pub fn new(schema: Schema, config: KernelConfig) -> Self {
        let _span = info_span!("kernel", chunk_capacity = config.chunk_capacity, sim_hz = config.sim_hz).entered();

        let live_repo = Repository::new(schema, config.chunk_capacity);
        let schema = Arc::clone(live_repo.schema());
        let live_commands = live_repo.command_buffer_handle();
        let live = Arc::new(live_repo);

        let gdb = Arc::new(GdbProvider::new(Arc::clone(&schema), config.chunk_capacity, Arc::clone(&live_commands)));
        let sod = Arc::new(SodProvider::new(
            Arc::clone(&schema),
            config.chunk_capacity,
            config.sod_pool_size,
            config.sod_acquire_deadline(),
            Arc::clone(&live_commands),
        ));
        let shared = Arc::new(SharedProvider::new(
            Arc::clone(&schema),
            config.chunk_capacity,
            config.shared_spare_pool_size,
            live_commands,
        ));

        let modules = ModuleScheduler::new(Arc::clone(&gdb), Arc::clone(&sod), Arc::clone(&shared), config.worker_threads, config.sim_hz);
        let lifecycle = LifecycleCoordinator::new(config.lifecycle_timeout_frames);

        Kernel {
            live,
            gdb,
            sod,
            shared,
            modules,
            systems: SystemScheduler::new(),
            lifecycle,
            config,
            tick: 0,
            time: 0.0,
        }
    }

    /// Registers a module, widening the relevant snapshot provider's
    /// declared mask and letting the module register any systems it
    /// owns into this tick's system scheduler.
    pub fn register_module(&mut self, module: Arc<dyn Module>) -> SchedulerResult<()> {
        module.register_systems(&mut self.systems);
        self.modules.register(module)
    }

    pub fn register_system(&mut self, system: Box<dyn System>) {
        self.systems.register(system);
    }

    /// Topologically sorts every phase's systems. Must run once, after
    /// every module/system is registered, before the first `tick`.
    pub fn compile_systems(&mut self) -> SchedulerResult<()> {
        self.systems.compile()
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn current_time(&self) -> f64 {
        self.time
    }

    pub fn live(&self) -> &Repository {
        &self.live
    }

    pub fn breaker_state(&self, module_name: &str) -> Option<BreakerState> {
        self.modules.breaker_state(module_name)
    }

    pub fn pending_lifecycle_count(&self) -> usize {
        self.lifecycle.pending_count()
    }

    pub fn lifecycle_timeout_count(&self) -> u64 {
        self.lifecycle.timeout_count()
    }

    fn live_mut(&mut self) -> &mut Repository {
        Arc::get_mut(&mut self.live)
            .expect("Kernel is the sole owner of its live repository between ticks")
    }

    pub fn create_entity(&mut self) -> Entity {
        self.live_mut().create_entity()
    }

    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        self.live_mut().destroy_entity(entity)
    }

    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> CoreResult<()> {
        self.live_mut().add_component(entity, value)
    }

    pub fn set_component<T: Component>(&mut self, entity: Entity, value: T) -> CoreResult<()> {
        self.live_mut().set_component(entity, value)
    }

    pub fn publish_event<T: Event>(&mut self, value: T) -> CoreResult<()> {
        self.live_mut().publish_event(value)
    }

    pub fn set_singleton<T: 'static + Send + Sync>(&mut self, value: T) {
        self.live_mut().set_singleton(value)
    }

    /// Begins a distributed construction for `entity`, waiting on ACKs
    /// from `participants` (see `LifecycleCoordinator::begin_construction`).
    pub fn begin_construction(
        &mut self,
        entity: Entity,
        type_id: u32,
        participants: impl IntoIterator<Item = ParticipantId>,
    ) {
        let tick = self.tick;
        let (lifecycle, live) = (&mut self.lifecycle, Arc::get_mut(&mut self.live).expect("sole owner between ticks"));
        lifecycle.begin_construction(live, entity, type_id, participants, tick);
    }

    pub fn begin_destruction(&mut self, entity: Entity, participants: impl IntoIterator<Item = ParticipantId>) {
        let tick = self.tick;
        let (lifecycle, live) = (&mut self.lifecycle, Arc::get_mut(&mut self.live).expect("sole owner between ticks"));
        lifecycle.begin_destruction(live, entity, participants, tick);
    }

    pub fn lifecycle_state(&self, entity: Entity) -> Option<LifecycleState> {
        self.live.lifecycle_state(entity)
    }

    /// Advances the simulation by one fixed tick (§2's per-tick control
    /// flow): replays last tick's recorded commands, runs every
    /// phase-ordered system against the live world, closes the barrier
    /// (event swap, lifecycle processing, GDB sync, dirty clear), and
    /// dispatches every registered module per its execution policy.
    pub fn tick(&mut self) {
        let dt = self.config.fixed_dt_secs;
        let tick = self.tick;
        let time = self.time;

        self.live_mut()
            .playback_own_commands()
            .expect("schema mismatch during command playback indicates a programming error");

        let view = View::new(Arc::clone(&self.live), self.live.command_buffer_handle(), tick, time);
        self.systems.execute(&view, dt);
        drop(view);

        {
            let live = self.live_mut();
            live.swap_event_buffers();
            self.lifecycle.process(live, tick);
        }
        self.gdb.update(&self.live, tick, time);
        self.live_mut().clear_all_dirty();

        self.modules.dispatch_tick(&self.live, tick, time);

        self.tick += 1;
        self.time += dt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_core::schema::Schema;

    #[derive(Copy, Clone, Debug, PartialEq)]
    struct Pos {
        x: f32,
    }

    #[test]
    fn tick_advances_counters() {
        let schema = Schema::new();
        let mut kernel = Kernel::new(schema, KernelConfig::default());
        kernel.compile_systems().unwrap();
        assert_eq!(kernel.current_tick(), 0);
        kernel.tick();
        assert_eq!(kernel.current_tick(), 1);
        assert!(kernel.current_time() > 0.0);
    }

    #[test]
    fn direct_mutation_api_round_trips() {
        let mut schema = Schema::new();
        schema.register_component::<Pos>().unwrap();
        let mut kernel = Kernel::new(schema, KernelConfig::default());
        kernel.compile_systems().unwrap();

        let e = kernel.create_entity();
        kernel.add_component(e, Pos { x: 3.0 }).unwrap();
        assert_eq!(kernel.live().get_ro::<Pos>(e).unwrap(), Some(&Pos { x: 3.0 }));

        kernel.destroy_entity(e);
        assert!(!kernel.live().is_alive(e));
    }

    #[test]
    fn lifecycle_helpers_delegate_to_coordinator() {
        let mut schema = Schema::new();
        kernel_scheduler::lifecycle::register_events(&mut schema).unwrap();
        let mut kernel = Kernel::new(schema, KernelConfig::default());
        kernel.compile_systems().unwrap();

        let e = kernel.create_entity();
        kernel.begin_construction(e, 1, []);
        assert_eq!(kernel.lifecycle_state(e), Some(LifecycleState::Active));
        assert_eq!(kernel.pending_lifecycle_count(), 0);
    }
}
