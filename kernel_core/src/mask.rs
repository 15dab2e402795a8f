use crate::error::CoreResult;
use crate::schema::{require_component, Component, ComponentId, Schema};
use bit_set::BitSet;

/// A set of component ids a consumer has declared it actually reads.
///
/// The SoD and Shared snapshot providers use this to skip syncing and
/// to hide data for columns nobody asked for: a replica still mirrors
/// the live archetype layout one-for-one (so dirty-chunk alignment
/// keeps working), but `View` consults the mask before ever touching
/// storage, so an unmasked component reads as absent regardless of
/// what the replica physically holds (see `sync_from_filtered` on
/// `Repository`).
#[derive(Clone, Debug, Default)]
pub struct ComponentMask(BitSet);

impl ComponentMask {
    pub fn new() -> Self {
        ComponentMask(BitSet::new())
    }

    /// Builder-style: adds `T` to the mask, failing if `T` was never
    /// registered on `schema`.
    pub fn with<T: Component>(mut self, schema: &Schema) -> CoreResult<Self> {
        let id = require_component::<T>(schema)?;
        self.0.insert(id as usize);
        Ok(self)
    }

    pub(crate) fn insert_id(&mut self, id: ComponentId) {
        self.0.insert(id as usize);
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.0.contains(id as usize)
    }

    /// Widens this mask to also cover everything in `other` — used to
    /// build the union of every requester's declared components.
    pub fn union_with(&mut self, other: &ComponentMask) {
        self.0.union_with(&other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
