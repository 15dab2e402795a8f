use crate::command::CommandBuffer;
use crate::error::{CoreError, CoreResult};
use crate::mask::ComponentMask;
use crate::repository::Repository;
use crate::schema::Schema;
use crate::snapshot::{SnapshotKind, SnapshotProvider};
use crate::view::View;
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// On-demand pooled snapshot provider. Owns a lock-free, fixed-capacity
/// stack of pre-warmed replicas; `acquire_view` pops one, syncs it
/// against `live` filtered to the union of every requester's declared
/// `ComponentMask` (see `required_components` on the module contract),
/// and hands out a view over it. `release_view` soft-clears the
/// replica and pushes it back.
///
/// The pool bounds concurrency: with `pool_size` replicas, at most
/// `pool_size` modules can hold a view from this provider at once.
/// `acquire_view` spins briefly and then blocks until `acquire_deadline`
/// elapses, returning `PoolExhausted` if the pool is still empty.
pub struct SodProvider {
    schema: Arc<Schema>,
    chunk_capacity: usize,
    pool: ArrayQueue<Repository>,
    mask: Mutex<ComponentMask>,
    live_commands: Arc<CommandBuffer>,
    acquire_deadline: Duration,
}

impl SodProvider {
    pub fn new(
        schema: Arc<Schema>,
        chunk_capacity: usize,
        pool_size: usize,
        acquire_deadline: Duration,
        live_commands: Arc<CommandBuffer>,
    ) -> Self {
        let pool = ArrayQueue::new(pool_size.max(1));
        for _ in 0..pool_size {
            let _ = pool.push(Repository::new_replica(Arc::clone(&schema), chunk_capacity));
        }
        SodProvider {
            schema,
            chunk_capacity,
            pool,
            mask: Mutex::new(ComponentMask::new()),
            live_commands,
            acquire_deadline,
        }
    }

    /// Widens the provider's declared mask to also cover `mask`. Called
    /// once per module at registration time (the module scheduler does
    /// this for every module configured with the `Sod` strategy), so
    /// by the first tick the mask already reflects every requester.
    pub fn widen_mask(&self, mask: &ComponentMask) {
        self.mask.lock().union_with(mask);
    }

    fn take_from_pool(&self, deadline: Instant) -> CoreResult<Repository> {
        loop {
            if let Ok(replica) = self.pool.pop() {
                return Ok(replica);
            }
            if Instant::now() >= deadline {
                return Err(CoreError::PoolExhausted);
            }
            std::thread::yield_now();
        }
    }
}

impl SnapshotProvider for SodProvider {
    fn acquire_view(&self, live: &Repository, tick: u64, time: f64) -> CoreResult<View> {
        let deadline = Instant::now() + self.acquire_deadline;
        let mut replica = self.take_from_pool(deadline)?;
        let mask = self.mask.lock().clone();
        replica.sync_from_filtered(live, &mask);
        Ok(View::new_filtered(
            Arc::new(replica),
            Arc::clone(&self.live_commands),
            tick,
            time,
            Arc::new(mask),
        ))
    }

    /// Reclaims the replica behind `view` and pushes it back onto the
    /// pool, soft-cleared and ready for the next acquire. If some other
    /// clone of `view` is still alive (callers should not retain a
    /// `View` past `release_view`), a fresh empty replica of the same
    /// schema is pushed instead so the pool's conserved size invariant
    /// still holds.
    fn release_view(&self, view: View) {
        let data = view.into_data();
        let mut replica = match Arc::try_unwrap(data) {
            Ok(repo) => repo,
            Err(_) => Repository::new_replica(Arc::clone(&self.schema), self.chunk_capacity),
        };
        replica.soft_clear();
        let _ = self.pool.push(replica);
    }

    /// No-op: SoD syncs lazily at acquire time rather than once per
    /// tick at the barrier.
    fn update(&self, _live: &Repository, _tick: u64, _time: f64) {}

    fn kind(&self) -> SnapshotKind {
        SnapshotKind::Sod
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, PartialEq)]
    struct Pos {
        x: f32,
    }

    #[derive(Copy, Clone, Debug, PartialEq)]
    struct Vel {
        #[allow(dead_code)]
        dx: f32,
    }

    fn schema_with_pos_vel() -> Arc<Schema> {
        let mut schema = Schema::new();
        schema.register_component::<Pos>().unwrap();
        schema.register_component::<Vel>().unwrap();
        Arc::new(schema)
    }

    #[test]
    fn acquire_then_release_conserves_pool_size() {
        let schema = schema_with_pos_vel();
        let mut live = Repository::new_replica(Arc::clone(&schema), 16);
        let commands = live.command_buffer_handle();
        let provider = SodProvider::new(Arc::clone(&schema), 16, 2, Duration::from_millis(50), commands);

        let view = provider.acquire_view(&live, 0, 0.0).unwrap();
        provider.release_view(view);

        let e = live.create_entity();
        live.add_component(e, Pos { x: 1.0 }).unwrap();
        let view = provider.acquire_view(&live, 1, 0.016).unwrap();
        assert_eq!(view.tick(), 1);
        provider.release_view(view);
    }

    #[test]
    fn pool_exhausted_after_deadline() {
        let schema = schema_with_pos_vel();
        let live = Repository::new_replica(Arc::clone(&schema), 16);
        let commands = live.command_buffer_handle();
        let provider = SodProvider::new(Arc::clone(&schema), 16, 1, Duration::from_millis(20), commands);

        let first = provider.acquire_view(&live, 0, 0.0).unwrap();
        let second = provider.acquire_view(&live, 0, 0.0);
        assert!(matches!(second, Err(CoreError::PoolExhausted)));
        provider.release_view(first);
    }

    #[test]
    fn sync_filters_to_declared_mask() {
        let schema = schema_with_pos_vel();
        let mut live = Repository::new_replica(Arc::clone(&schema), 16);
        let commands = live.command_buffer_handle();
        let provider = SodProvider::new(Arc::clone(&schema), 16, 1, Duration::from_millis(50), commands);
        provider.widen_mask(&ComponentMask::new().with::<Pos>(&schema).unwrap());

        let e = live.create_entity();
        live.add_component(e, Pos { x: 1.0 }).unwrap();
        live.add_component(e, Vel { dx: 2.0 }).unwrap();

        let view = provider.acquire_view(&live, 0, 0.0).unwrap();
        assert!(view.has_component::<Pos>(e).unwrap());
        assert!(!view.has_component::<Vel>(e).unwrap());
        provider.release_view(view);
    }
}
