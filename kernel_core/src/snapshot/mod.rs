//! Snapshot providers: the three strategies a module's execution policy
//! can pick between for getting a `View` onto repository data.

pub mod gdb;
pub mod shared;
pub mod sod;

pub use gdb::GdbProvider;
pub use shared::SharedProvider;
pub use sod::SodProvider;

use crate::error::CoreResult;
use crate::repository::Repository;
use crate::view::View;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SnapshotKind {
    Gdb,
    Sod,
    Shared,
}

/// Common contract implemented by all three snapshot strategies. The
/// kernel calls `update` once per tick (at the end-of-tick barrier) on
/// every provider it owns; modules call `acquire_view`/`release_view`
/// around their own work.
pub trait SnapshotProvider: Send + Sync {
    /// Acquires a view. For GDB this is a cheap read of whatever the
    /// last `update()` produced; for SoD and Shared it may itself
    /// perform (or join) a sync against `live`.
    fn acquire_view(&self, live: &Repository, tick: u64, time: f64) -> CoreResult<View>;

    fn release_view(&self, view: View);

    /// Brings this provider's backing data up to date with `live`.
    /// Called once per tick, on the main thread, at the end-of-tick
    /// barrier. GDB does its real sync here; SoD and Shared treat this
    /// as a no-op since they sync lazily at acquire time instead.
    fn update(&self, live: &Repository, tick: u64, time: f64);

    fn kind(&self) -> SnapshotKind;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn providers_are_send_and_sync() {
        static_assertions::assert_impl_all!(GdbProvider: Send, Sync);
        static_assertions::assert_impl_all!(SodProvider: Send, Sync);
        static_assertions::assert_impl_all!(SharedProvider: Send, Sync);
    }
}
