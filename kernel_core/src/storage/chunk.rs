use crate::entity::Entity;
use crate::mask::ComponentMask;
use crate::schema::{ComponentId, ComponentKind, Schema};
use crate::storage::column::{Column, ManagedColumn, TypedColumn};
use fxhash::FxHashMap;

/// A fixed-capacity, single-archetype block of rows. Rows are SoA: one
/// `Column` per component the archetype carries, all indexed the same
/// way as `entities`.
///
/// A chunk is dirty iff at least one of its rows has changed since its
/// last sync — see `Chunk::sync_from`.
#[derive(Debug)]
pub struct Chunk {
    capacity: usize,
    entities: Vec<Entity>,
    columns: FxHashMap<ComponentId, Box<dyn Column>>,
    dirty: bool,
}

impl Clone for Chunk {
    fn clone(&self) -> Self {
        Chunk {
            capacity: self.capacity,
            entities: self.entities.clone(),
            columns: self
                .columns
                .iter()
                .map(|(&id, column)| (id, column.clone_box()))
                .collect(),
            dirty: self.dirty,
        }
    }
}

impl Chunk {
    pub(crate) fn new(capacity: usize, component_ids: &[ComponentId], schema: &Schema) -> Self {
        let columns = component_ids
            .iter()
            .map(|&id| (id, schema.component_meta(id).new_column()))
            .collect();
        Chunk {
            capacity,
            entities: Vec::with_capacity(capacity),
            columns,
            dirty: false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.entities.len() >= self.capacity
    }

    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    #[inline]
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn has_column(&self, id: ComponentId) -> bool {
        self.columns.contains_key(&id)
    }

    /// Appends `entity` to the end of the chunk. The caller must follow
    /// up by pushing a value onto every column for the new row.
    pub(crate) fn push_entity(&mut self, entity: Entity) -> usize {
        let row = self.entities.len();
        self.entities.push(entity);
        self.mark_dirty();
        row
    }

    pub(crate) fn push_unmanaged<T: 'static + Copy + Send + Sync + std::fmt::Debug>(
        &mut self,
        id: ComponentId,
        value: T,
    ) {
        let column = self
            .columns
            .get_mut(&id)
            .expect("archetype does not carry this component")
            .as_any_mut()
            .downcast_mut::<TypedColumn<T>>()
            .expect("component type mismatch for column");
        column.push(value);
    }

    pub(crate) fn push_managed(
        &mut self,
        id: ComponentId,
        value: std::sync::Arc<dyn std::any::Any + Send + Sync>,
    ) {
        let column = self
            .columns
            .get_mut(&id)
            .expect("archetype does not carry this component")
            .as_any_mut()
            .downcast_mut::<ManagedColumn>()
            .expect("component type mismatch for column");
        column.push(value);
    }

    pub fn get<T: 'static + Copy + Send + Sync + std::fmt::Debug>(
        &self,
        id: ComponentId,
        row: usize,
    ) -> Option<&T> {
        self.columns
            .get(&id)?
            .as_any()
            .downcast_ref::<TypedColumn<T>>()
            .and_then(|c| c.get(row))
    }

    pub fn get_mut<T: 'static + Copy + Send + Sync + std::fmt::Debug>(
        &mut self,
        id: ComponentId,
        row: usize,
    ) -> Option<&mut T> {
        self.columns
            .get_mut(&id)?
            .as_any_mut()
            .downcast_mut::<TypedColumn<T>>()
            .and_then(|c| c.get_mut(row))
    }

    pub fn set<T: 'static + Copy + Send + Sync + std::fmt::Debug>(
        &mut self,
        id: ComponentId,
        row: usize,
        value: T,
    ) {
        if let Some(slot) = self.get_mut::<T>(id, row) {
            *slot = value;
        }
        self.mark_dirty();
    }

    pub fn get_managed(
        &self,
        id: ComponentId,
        row: usize,
    ) -> Option<&std::sync::Arc<dyn std::any::Any + Send + Sync>> {
        self.columns
            .get(&id)?
            .as_any()
            .downcast_ref::<ManagedColumn>()
            .and_then(|c| c.get(row))
    }

    /// Removes `row`, swapping the last row into its place. Returns the
    /// entity that moved (if any), so the repository can update its
    /// `entity -> location` index.
    pub(crate) fn swap_remove(&mut self, row: usize) -> Option<Entity> {
        let last = self.entities.len() - 1;
        self.entities.swap_remove(row);
        for column in self.columns.values_mut() {
            column.swap_remove_erased(row);
        }
        self.mark_dirty();
        if row != last {
            Some(self.entities[row])
        } else {
            None
        }
    }

    pub(crate) fn component_ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.columns.keys().copied()
    }

    pub fn set_managed(
        &mut self,
        id: ComponentId,
        row: usize,
        value: std::sync::Arc<dyn std::any::Any + Send + Sync>,
    ) {
        if let Some(column) = self
            .columns
            .get_mut(&id)
            .and_then(|c| c.as_any_mut().downcast_mut::<ManagedColumn>())
        {
            column.set(row, value);
        }
        self.mark_dirty();
    }

    /// Copies `row`'s value out of every column into a standalone,
    /// single-row bundle that can later be pushed into a different
    /// chunk's matching columns via `column_dyn_mut`. Used when moving
    /// an entity to a new archetype, where the source and destination
    /// chunk cannot both be borrowed mutably at once.
    pub(crate) fn extract_row(&self, row: usize) -> FxHashMap<ComponentId, Box<dyn Column>> {
        self.columns
            .iter()
            .map(|(&id, column)| {
                let mut single = column.clone_empty();
                single.copy_row_from(column.as_ref(), row);
                (id, single)
            })
            .collect()
    }

    pub(crate) fn column_dyn_mut(&mut self, id: ComponentId) -> Option<&mut Box<dyn Column>> {
        self.columns.get_mut(&id)
    }

    /// Overwrites this chunk's contents with a full copy of `other`'s
    /// rows and dirty bit. Used by `Archetype::sync_dirty_from` to bring
    /// a replica chunk in step with a dirty live chunk.
    pub(crate) fn sync_from(&mut self, other: &Chunk) {
        self.entities.clear();
        self.entities.extend_from_slice(&other.entities);
        for (id, src_column) in &other.columns {
            let dst = self
                .columns
                .entry(*id)
                .or_insert_with(|| src_column.clone_empty());
            dst.clear();
            for row in 0..src_column.len() {
                dst.copy_row_from(src_column.as_ref(), row);
            }
        }
        self.dirty = other.dirty;
    }

    /// As `sync_from`, but skips copying any column whose id is not in
    /// `mask`. Skipped columns are left stale rather than cleared: it
    /// is the caller's job (`View`'s mask check) to never surface them,
    /// so there is no need to pay for zeroing data nobody will read.
    pub(crate) fn sync_from_filtered(&mut self, other: &Chunk, mask: &ComponentMask) {
        self.entities.clear();
        self.entities.extend_from_slice(&other.entities);
        for (id, src_column) in &other.columns {
            if !mask.contains(*id) {
                continue;
            }
            let dst = self
                .columns
                .entry(*id)
                .or_insert_with(|| src_column.clone_empty());
            dst.clear();
            for row in 0..src_column.len() {
                dst.copy_row_from(src_column.as_ref(), row);
            }
        }
        self.dirty = other.dirty;
    }

    /// Resets logical state (rows, dirty bit) while retaining allocated
    /// columns, so a pool can hand this chunk back out without
    /// reallocating.
    pub(crate) fn soft_clear(&mut self) {
        self.entities.clear();
        for column in self.columns.values_mut() {
            column.clear();
        }
        self.dirty = false;
    }

    pub(crate) fn component_kind(schema: &Schema, id: ComponentId) -> ComponentKind {
        schema.component_meta(id).kind
    }
}
