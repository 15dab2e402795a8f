use module_host::prelude::*;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq)]
struct Health {
    hp: f32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
struct Pos {
    x: f32,
    y: f32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
struct Vel {
    #[allow(dead_code)]
    dx: f32,
    #[allow(dead_code)]
    dy: f32,
}

/// A command recorded against an entity destroyed before the next
/// barrier plays back as a silent no-op: the entity stays dead and
/// nothing else is disturbed.
#[test]
fn command_playback_ignores_dead_entity() {
    let mut schema = Schema::new();
    schema.register_component::<Health>().unwrap();
    let mut kernel = Kernel::new(schema, KernelConfig::default());

    let e1 = kernel.create_entity();
    kernel.add_component(e1, Health { hp: 100.0 }).unwrap();
    kernel.destroy_entity(e1);

    // Recorded as if a module had emitted it before this tick's barrier
    // played commands back; e1 is already dead by then.
    kernel.live().command_buffer_handle().set_component(e1, Health { hp: 50.0 });
    kernel.compile_systems().unwrap();
    kernel.tick();

    assert!(!kernel.live().is_alive(e1));
}

struct ReadPosModule {
    observed: Arc<std::sync::Mutex<Vec<f32>>>,
    target: Entity,
}

impl Module for ReadPosModule {
    fn name(&self) -> &'static str {
        "read-pos"
    }
    fn policy(&self) -> ExecutionPolicy {
        ExecutionPolicy {
            mode: Mode::FrameSynced,
            strategy: Strategy::Gdb,
            ..ExecutionPolicy::synchronous()
        }
    }
    fn tick(&self, view: &View, _dt: f64) -> SchedulerResult<()> {
        if let Ok(Some(pos)) = view.get_ro::<Pos>(self.target) {
            self.observed.lock().unwrap().push(pos.x);
        }
        Ok(())
    }
}

/// A FrameSynced/Gdb module reads through the replica the end-of-tick
/// barrier just synced, so a write made before a given `tick()` call is
/// visible to every module dispatched within that same call.
#[test]
fn gdb_replica_reflects_writes_synced_this_tick() {
    let mut schema = Schema::new();
    schema.register_component::<Pos>().unwrap();
    let mut kernel = Kernel::new(schema, KernelConfig::default());

    let e = kernel.create_entity();
    kernel.add_component(e, Pos { x: 0.0, y: 0.0 }).unwrap();

    let observed = Arc::new(std::sync::Mutex::new(Vec::new()));
    let module = Arc::new(ReadPosModule { observed: Arc::clone(&observed), target: e });
    kernel.register_module(module).unwrap();
    kernel.compile_systems().unwrap();

    kernel.tick(); // barrier syncs x=0, module reads x=0
    kernel.set_component(e, Pos { x: 1.0, y: 0.0 }).unwrap();
    kernel.tick(); // barrier syncs x=1, module reads x=1
    kernel.set_component(e, Pos { x: 2.0, y: 0.0 }).unwrap();
    kernel.tick(); // barrier syncs x=2, module reads x=2

    let readings = observed.lock().unwrap().clone();
    assert_eq!(readings, vec![0.0, 1.0, 2.0]);
}

struct RequiresPosModule {
    target: Entity,
    mask: ComponentMask,
    saw_vel: Arc<std::sync::Mutex<bool>>,
}

impl Module for RequiresPosModule {
    fn name(&self) -> &'static str {
        "requires-pos"
    }
    fn policy(&self) -> ExecutionPolicy {
        ExecutionPolicy {
            mode: Mode::FrameSynced,
            strategy: Strategy::Sod,
            ..ExecutionPolicy::synchronous()
        }
    }
    fn required_components(&self) -> ComponentMask {
        self.mask.clone()
    }
    fn tick(&self, view: &View, _dt: f64) -> SchedulerResult<()> {
        assert!(view.has_component::<Pos>(self.target).unwrap());
        *self.saw_vel.lock().unwrap() = view.has_component::<Vel>(self.target).unwrap();
        Ok(())
    }
}

/// A module that only declares `Pos` as required never sees `Vel`
/// through its SoD-filtered view, even though the live world has it.
#[test]
fn sod_view_hides_components_outside_required_set() {
    let mut schema = Schema::new();
    schema.register_component::<Pos>().unwrap();
    schema.register_component::<Vel>().unwrap();
    let mask = ComponentMask::new().with::<Pos>(&schema).unwrap();
    let mut kernel = Kernel::new(schema, KernelConfig::default());

    let e = kernel.create_entity();
    kernel.add_component(e, Pos { x: 0.0, y: 0.0 }).unwrap();
    kernel.add_component(e, Vel { dx: 1.0, dy: 0.0 }).unwrap();

    let saw_vel = Arc::new(std::sync::Mutex::new(true));
    let module = Arc::new(RequiresPosModule { target: e, mask, saw_vel: Arc::clone(&saw_vel) });
    kernel.register_module(module).unwrap();
    kernel.compile_systems().unwrap();

    kernel.tick();
    kernel.tick();

    assert!(!*saw_vel.lock().unwrap());
}

/// A construction quorum of three participants transitions the entity
/// to `Active` only once every participant has ACKed; a participant
/// that never ACKs by the timeout destroys the entity and bumps the
/// timeout counter.
#[test]
fn lifecycle_quorum_activates_then_times_out_on_missing_ack() {
    let mut schema = Schema::new();
    kernel_scheduler::lifecycle::register_events(&mut schema).unwrap();
    let config = KernelConfig {
        lifecycle_timeout_frames: 5,
        ..KernelConfig::default()
    };
    let mut kernel = Kernel::new(schema, config);
    kernel.compile_systems().unwrap();

    let activated = kernel.create_entity();
    kernel.begin_construction(activated, 1, [1, 2, 3]);
    kernel.live().command_buffer_handle().publish(ConstructionAck { entity: activated, participant: 1, success: true });
    kernel.live().command_buffer_handle().publish(ConstructionAck { entity: activated, participant: 2, success: true });
    kernel.live().command_buffer_handle().publish(ConstructionAck { entity: activated, participant: 3, success: true });
    kernel.tick();
    assert_eq!(kernel.lifecycle_state(activated), Some(LifecycleState::Active));

    let stuck = kernel.create_entity();
    kernel.begin_construction(stuck, 1, [1, 2, 3]);
    kernel.live().command_buffer_handle().publish(ConstructionAck { entity: stuck, participant: 1, success: true });
    for _ in 0..8 {
        kernel.tick();
    }
    assert!(!kernel.live().is_alive(stuck));
    assert_eq!(kernel.lifecycle_timeout_count(), 1);
}
