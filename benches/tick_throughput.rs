use criterion::{criterion_group, criterion_main, Criterion};
use module_host::{Kernel, KernelConfig};

// `cargo test` also runs the benchmark setup code, so keep it cheap in
// debug builds and only stretch out under a real release profile.
#[cfg(not(debug_assertions))]
const ENTITY_COUNT: u32 = 10_000;
#[cfg(debug_assertions)]
const ENTITY_COUNT: u32 = 10;

criterion_group!(benches, empty_tick, populated_tick, dirty_sync_tick);
criterion_main!(benches);

#[derive(Copy, Clone, Debug)]
struct Pos {
    x: f32,
    y: f32,
}

#[derive(Copy, Clone, Debug)]
struct Vel {
    dx: f32,
    dy: f32,
}

fn populated_kernel(entity_count: u32) -> (Kernel, Vec<kernel_core::entity::Entity>) {
    let mut schema = kernel_core::schema::Schema::new();
    schema.register_component::<Pos>().unwrap();
    schema.register_component::<Vel>().unwrap();
    let mut kernel = Kernel::new(schema, KernelConfig::default());
    kernel.compile_systems().unwrap();
    let mut entities = Vec::with_capacity(entity_count as usize);
    for i in 0..entity_count {
        let e = kernel.create_entity();
        kernel.add_component(e, Pos { x: i as f32, y: 0.0 }).unwrap();
        kernel.add_component(e, Vel { dx: 1.0, dy: 0.0 }).unwrap();
        entities.push(e);
    }
    (kernel, entities)
}

/// Baseline cost of a tick on an empty world: command playback, the
/// barrier, and a dispatch pass with nothing registered.
fn empty_tick(c: &mut Criterion) {
    c.bench_function("empty_tick", |b| {
        let (mut kernel, _entities) = populated_kernel(0);
        b.iter(|| kernel.tick());
    });
}

/// Same tick, but with `ENTITY_COUNT` entities sitting in the live
/// world untouched — exercises the barrier's archetype walk without
/// any dirty chunks to actually copy.
fn populated_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("populated_tick");
    group.throughput(criterion::Throughput::Elements(ENTITY_COUNT as u64));
    group.bench_function("tick", |b| {
        let (mut kernel, _entities) = populated_kernel(ENTITY_COUNT);
        b.iter(|| kernel.tick());
    });
}

/// Every entity's `Pos` is rewritten every tick, so every chunk is
/// dirty going into the barrier's GDB sync.
fn dirty_sync_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("dirty_sync_tick");
    group.throughput(criterion::Throughput::Elements(ENTITY_COUNT as u64));
    group.bench_function("tick", |b| {
        let (mut kernel, entities) = populated_kernel(ENTITY_COUNT);
        b.iter(|| {
            for (i, &e) in entities.iter().enumerate() {
                kernel.set_component(e, Pos { x: i as f32, y: 1.0 }).unwrap();
            }
            kernel.tick();
        });
    });
}
