use crate::command::CommandBuffer;
use crate::error::CoreResult;
use crate::mask::ComponentMask;
use crate::repository::Repository;
use crate::schema::Schema;
use crate::snapshot::{SnapshotKind, SnapshotProvider};
use crate::view::View;
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

/// The one replica a `SharedProvider` currently hands out, plus which
/// tick it was synced for.
struct Current {
    data: Arc<Repository>,
    tick: i64,
}

/// A single replica shared by reference count across every concurrent
/// acquirer (the "convoy"): the first `acquire_view` in a tick pays
/// for the sync, every subsequent acquirer in the same tick gets the
/// same `Arc` for free. `release_view` decrements the count; the
/// acquirer that brings it to zero reclaims the replica under a short
/// mutex and returns it to a small spare pool so the next tick's first
/// acquire doesn't need to allocate.
///
/// This assumes acquire/release pairs for one tick's shared view are
/// not interleaved with the next tick's first acquire — true for the
/// barrier-driven dispatch model in `kernel-scheduler`, where a tick's
/// asynchronous modules release their views before the next barrier
/// calls `update`/`acquire_view` again.
pub struct SharedProvider {
    schema: Arc<Schema>,
    chunk_capacity: usize,
    live_commands: Arc<CommandBuffer>,
    mask: Mutex<ComponentMask>,
    current: Mutex<Option<Current>>,
    spares: ArrayQueue<Repository>,
    synced_tick: AtomicI64,
    refcount: AtomicUsize,
}

impl SharedProvider {
    pub fn new(
        schema: Arc<Schema>,
        chunk_capacity: usize,
        spare_pool_size: usize,
        live_commands: Arc<CommandBuffer>,
    ) -> Self {
        SharedProvider {
            schema,
            chunk_capacity,
            live_commands,
            mask: Mutex::new(ComponentMask::new()),
            current: Mutex::new(None),
            spares: ArrayQueue::new(spare_pool_size.max(1)),
            synced_tick: AtomicI64::new(-1),
            refcount: AtomicUsize::new(0),
        }
    }

    /// Widens the provider's declared mask to also cover `mask`. See
    /// `SodProvider::widen_mask` — same "union of every requester"
    /// contract.
    pub fn widen_mask(&self, mask: &ComponentMask) {
        self.mask.lock().union_with(mask);
    }

    /// Number of views currently acquired and not yet released.
    pub fn active_count(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }
}

impl SnapshotProvider for SharedProvider {
    fn acquire_view(&self, live: &Repository, tick: u64, time: f64) -> CoreResult<View> {
        let tick_signed = tick as i64;
        let mut guard = self.current.lock();
        if self.synced_tick.load(Ordering::Acquire) != tick_signed || guard.is_none() {
            let mut replica = guard
                .take()
                .and_then(|cur| Arc::try_unwrap(cur.data).ok())
                .or_else(|| self.spares.pop().ok())
                .unwrap_or_else(|| Repository::new_replica(Arc::clone(&self.schema), self.chunk_capacity));
            let mask = self.mask.lock().clone();
            replica.sync_from_filtered(live, &mask);
            *guard = Some(Current {
                data: Arc::new(replica),
                tick: tick_signed,
            });
            self.synced_tick.store(tick_signed, Ordering::Release);
        }

        let data = Arc::clone(&guard.as_ref().expect("just populated").data);
        self.refcount.fetch_add(1, Ordering::AcqRel);
        let mask = Arc::new(self.mask.lock().clone());
        Ok(View::new_filtered(data, Arc::clone(&self.live_commands), tick, time, mask))
    }

    /// Decrements the refcount; the release that brings it to zero
    /// reclaims the replica (if no other clone of the view is keeping
    /// it alive) and stashes it in the spare pool, soft-cleared.
    fn release_view(&self, view: View) {
        let data = view.into_data();
        drop(data);
        if self.refcount.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let mut guard = self.current.lock();
        if let Some(cur) = guard.take() {
            match Arc::try_unwrap(cur.data) {
                Ok(mut repo) => {
                    repo.soft_clear();
                    let _ = self.spares.push(repo);
                }
                Err(data) => {
                    // A new acquire raced ahead of us and is already
                    // using this generation again; put it back.
                    *guard = Some(Current {
                        data,
                        tick: cur.tick,
                    });
                }
            }
        }
    }

    /// No-op: Shared syncs lazily on the first acquire of each tick.
    fn update(&self, _live: &Repository, _tick: u64, _time: f64) {}

    fn kind(&self) -> SnapshotKind {
        SnapshotKind::Shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, PartialEq)]
    struct Pos {
        x: f32,
    }

    fn schema_with_pos() -> Arc<Schema> {
        let mut schema = Schema::new();
        schema.register_component::<Pos>().unwrap();
        Arc::new(schema)
    }

    #[test]
    fn same_tick_acquires_share_one_sync() {
        let schema = schema_with_pos();
        let mut live = Repository::new_replica(Arc::clone(&schema), 16);
        let commands = live.command_buffer_handle();
        let provider = SharedProvider::new(Arc::clone(&schema), 16, 1, commands);
        provider.widen_mask(&ComponentMask::new().with::<Pos>(&schema).unwrap());

        let e = live.create_entity();
        live.add_component(e, Pos { x: 1.0 }).unwrap();

        let a = provider.acquire_view(&live, 5, 0.0).unwrap();
        let b = provider.acquire_view(&live, 5, 0.0).unwrap();
        assert_eq!(provider.active_count(), 2);
        assert_eq!(a.get_ro::<Pos>(e).unwrap(), Some(&Pos { x: 1.0 }));
        assert_eq!(b.get_ro::<Pos>(e).unwrap(), Some(&Pos { x: 1.0 }));

        provider.release_view(a);
        assert_eq!(provider.active_count(), 1);
        provider.release_view(b);
        assert_eq!(provider.active_count(), 0);
    }

    #[test]
    fn refcount_returns_to_zero_after_every_release() {
        let schema = schema_with_pos();
        let live = Repository::new_replica(Arc::clone(&schema), 16);
        let commands = live.command_buffer_handle();
        let provider = SharedProvider::new(Arc::clone(&schema), 16, 1, commands);

        for tick in 0..3u64 {
            let v1 = provider.acquire_view(&live, tick, 0.0).unwrap();
            let v2 = provider.acquire_view(&live, tick, 0.0).unwrap();
            provider.release_view(v1);
            provider.release_view(v2);
            assert_eq!(provider.active_count(), 0);
        }
    }

    #[test]
    fn next_tick_resyncs() {
        let schema = schema_with_pos();
        let mut live = Repository::new_replica(Arc::clone(&schema), 16);
        let commands = live.command_buffer_handle();
        let provider = SharedProvider::new(Arc::clone(&schema), 16, 1, commands);
        provider.widen_mask(&ComponentMask::new().with::<Pos>(&schema).unwrap());

        let e = live.create_entity();
        live.add_component(e, Pos { x: 0.0 }).unwrap();
        let first = provider.acquire_view(&live, 0, 0.0).unwrap();
        assert_eq!(first.get_ro::<Pos>(e).unwrap(), Some(&Pos { x: 0.0 }));
        provider.release_view(first);

        live.set_component(e, Pos { x: 1.0 }).unwrap();
        let second = provider.acquire_view(&live, 1, 0.016).unwrap();
        assert_eq!(second.get_ro::<Pos>(e).unwrap(), Some(&Pos { x: 1.0 }));
        provider.release_view(second);
    }
}
