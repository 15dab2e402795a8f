use crate::command::CommandBuffer;
use crate::error::CoreResult;
use crate::repository::Repository;
use crate::schema::Schema;
use crate::snapshot::{SnapshotKind, SnapshotProvider};
use crate::view::View;
use parking_lot::Mutex;
use std::sync::Arc;

/// Double-buffered snapshot provider. Owns one persistent replica;
/// `update()` brings it in step with the live repository once per tick
/// via `Arc::make_mut`, which clones only if a reader from the previous
/// generation is still holding the old `Arc` — otherwise it mutates in
/// place. `acquire_view` is a zero-copy `Arc` bump and `release_view` is
/// a no-op: any number of readers can hold the replica concurrently
/// because it never changes between barriers.
pub struct GdbProvider {
    state: Mutex<(Arc<Repository>, u64, f64)>,
    live_commands: Arc<CommandBuffer>,
}

impl GdbProvider {
    pub fn new(schema: Arc<Schema>, chunk_capacity: usize, live_commands: Arc<CommandBuffer>) -> Self {
        let replica = Arc::new(Repository::new_replica(schema, chunk_capacity));
        GdbProvider {
            state: Mutex::new((replica, 0, 0.0)),
            live_commands,
        }
    }
}

impl SnapshotProvider for GdbProvider {
    fn acquire_view(&self, _live: &Repository, _tick: u64, _time: f64) -> CoreResult<View> {
        let guard = self.state.lock();
        Ok(View::new(
            Arc::clone(&guard.0),
            Arc::clone(&self.live_commands),
            guard.1,
            guard.2,
        ))
    }

    fn release_view(&self, _view: View) {}

    fn update(&self, live: &Repository, tick: u64, time: f64) {
        let mut guard = self.state.lock();
        Arc::make_mut(&mut guard.0).sync_from(live);
        guard.1 = tick;
        guard.2 = time;
    }

    fn kind(&self) -> SnapshotKind {
        SnapshotKind::Gdb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, PartialEq)]
    struct Pos {
        x: f32,
    }

    #[test]
    fn update_then_acquire_sees_latest_tick() {
        let mut schema = Schema::new();
        schema.register_component::<Pos>().unwrap();
        let schema = Arc::new(schema);
        let mut live = Repository::new_replica(Arc::clone(&schema), 16);
        let commands = live.command_buffer_handle();
        let provider = GdbProvider::new(Arc::clone(&schema), 16, commands);

        let e = live.create_entity();
        live.add_component(e, Pos { x: 1.0 }).unwrap();
        provider.update(&live, 1, 0.016);

        let view = provider.acquire_view(&live, 1, 0.016).unwrap();
        assert_eq!(view.get_ro::<Pos>(e).unwrap(), Some(&Pos { x: 1.0 }));
        assert_eq!(view.tick(), 1);
    }

    #[test]
    fn concurrent_acquires_see_same_generation_until_next_update() {
        let mut schema = Schema::new();
        schema.register_component::<Pos>().unwrap();
        let schema = Arc::new(schema);
        let mut live = Repository::new_replica(Arc::clone(&schema), 16);
        let commands = live.command_buffer_handle();
        let provider = GdbProvider::new(Arc::clone(&schema), 16, commands);

        let first = provider.acquire_view(&live, 0, 0.0).unwrap();
        let e = live.create_entity();
        live.add_component(e, Pos { x: 2.0 }).unwrap();
        provider.update(&live, 1, 0.016);
        let second = provider.acquire_view(&live, 1, 0.016).unwrap();

        assert!(first.get_ro::<Pos>(e).unwrap().is_none());
        assert_eq!(second.get_ro::<Pos>(e).unwrap(), Some(&Pos { x: 2.0 }));
    }
}
