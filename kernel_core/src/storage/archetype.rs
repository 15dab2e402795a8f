use crate::entity::Entity;
use crate::mask::ComponentMask;
use crate::schema::{ComponentId, Schema};
use crate::storage::chunk::Chunk;
use bit_set::BitSet;
use smallvec::SmallVec;

/// A location within an archetype: which chunk, and which row in it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChunkLocation {
    pub chunk_index: usize,
    pub row: usize,
}

/// All entities sharing one exact set of components live in the same
/// archetype, split across fixed-capacity chunks. New chunks are
/// allocated lazily as existing ones fill up; chunks are never merged,
/// so a long-lived archetype can end up with internal fragmentation
/// after heavy churn — callers that care can call `compact`.
#[derive(Debug, Clone)]
pub struct Archetype {
    mask: BitSet,
    component_ids: SmallVec<[ComponentId; 8]>,
    chunk_capacity: usize,
    chunks: Vec<Chunk>,
}

impl Archetype {
    pub fn new(component_ids: &[ComponentId], chunk_capacity: usize) -> Self {
        let mut mask = BitSet::new();
        for &id in component_ids {
            mask.insert(id as usize);
        }
        Archetype {
            mask,
            component_ids: component_ids.iter().copied().collect(),
            chunk_capacity,
            chunks: Vec::new(),
        }
    }

    #[inline]
    pub fn mask(&self) -> &BitSet {
        &self.mask
    }

    #[inline]
    pub fn component_ids(&self) -> &[ComponentId] {
        &self.component_ids
    }

    #[inline]
    pub fn has_component(&self, id: ComponentId) -> bool {
        self.mask.contains(id as usize)
    }

    /// True if this archetype carries every component in `with` and
    /// none of the components in `without`.
    pub fn matches(&self, with: &BitSet, without: &BitSet) -> bool {
        with.is_subset(&self.mask) && self.mask.is_disjoint(without)
    }

    pub fn chunk(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    pub fn chunk_mut(&mut self, index: usize) -> Option<&mut Chunk> {
        self.chunks.get_mut(index)
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    pub fn chunks_mut(&mut self) -> impl Iterator<Item = &mut Chunk> {
        self.chunks.iter_mut()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }

    /// Finds (or allocates) a chunk with room for one more row and
    /// reserves it for `entity`, returning where the row landed.
    pub(crate) fn insert_entity(&mut self, entity: Entity, schema: &Schema) -> ChunkLocation {
        if let Some((i, chunk)) = self
            .chunks
            .iter_mut()
            .enumerate()
            .find(|(_, c)| !c.is_full())
        {
            let row = chunk.push_entity(entity);
            return ChunkLocation {
                chunk_index: i,
                row,
            };
        }
        let mut chunk = Chunk::new(self.chunk_capacity, &self.component_ids, schema);
        let row = chunk.push_entity(entity);
        self.chunks.push(chunk);
        ChunkLocation {
            chunk_index: self.chunks.len() - 1,
            row,
        }
    }

    /// Brings every dirty chunk in `source` into step with the matching
    /// (index-aligned) chunk here, allocating new chunks as needed.
    /// Clean chunks in `source` are left untouched in `self`, since an
    /// unmodified chunk is already consistent with its last sync.
    pub(crate) fn sync_dirty_from(&mut self, source: &Archetype, schema: &Schema) {
        for (i, src_chunk) in source.chunks.iter().enumerate() {
            if !src_chunk.is_dirty() {
                continue;
            }
            if i >= self.chunks.len() {
                self.chunks
                    .push(Chunk::new(self.chunk_capacity, &self.component_ids, schema));
            }
            self.chunks[i].sync_from(src_chunk);
        }
        // drop any trailing chunks this replica has that the source no
        // longer does (entities were removed down to fewer chunks).
        self.chunks.truncate(source.chunks.len());
    }

    /// As `sync_dirty_from`, but only copies column data for components
    /// in `mask` — used by the SoD and Shared providers to skip work
    /// for columns their acquirers never declared interest in.
    pub(crate) fn sync_dirty_from_filtered(
        &mut self,
        source: &Archetype,
        schema: &Schema,
        mask: &ComponentMask,
    ) {
        for (i, src_chunk) in source.chunks.iter().enumerate() {
            if !src_chunk.is_dirty() {
                continue;
            }
            if i >= self.chunks.len() {
                self.chunks
                    .push(Chunk::new(self.chunk_capacity, &self.component_ids, schema));
            }
            self.chunks[i].sync_from_filtered(src_chunk, mask);
        }
        self.chunks.truncate(source.chunks.len());
    }

    /// Clears every chunk's dirty bit without touching row data. Called
    /// on the live repository immediately after a sync has consumed the
    /// dirty set.
    pub(crate) fn clear_all_dirty(&mut self) {
        for chunk in &mut self.chunks {
            chunk.clear_dirty();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRegistry;

    #[derive(Copy, Clone, Debug)]
    struct Pos {
        #[allow(dead_code)]
        x: f32,
    }

    fn schema_with_pos() -> (Schema, ComponentId) {
        let mut schema = Schema::new();
        let id = schema.register_component::<Pos>().unwrap();
        (schema, id)
    }

    #[test]
    fn insert_allocates_new_chunk_when_full() {
        let (schema, id) = schema_with_pos();
        let mut arch = Archetype::new(&[id], 2);
        let mut reg = EntityRegistry::new();

        let locs: Vec<_> = (0..3)
            .map(|_| arch.insert_entity(reg.create_entity(), &schema))
            .collect();

        assert_eq!(locs[0].chunk_index, 0);
        assert_eq!(locs[1].chunk_index, 0);
        assert_eq!(locs[2].chunk_index, 1);
        assert_eq!(arch.chunk_count(), 2);
        assert_eq!(arch.len(), 3);
    }

    #[test]
    fn matches_respects_with_and_without() {
        let (_, id) = schema_with_pos();
        let arch = Archetype::new(&[id], 16);

        let mut with = BitSet::new();
        with.insert(id as usize);
        let without = BitSet::new();
        assert!(arch.matches(&with, &without));

        let mut without_id = BitSet::new();
        without_id.insert(id as usize);
        assert!(!arch.matches(&BitSet::new(), &without_id));
    }

    #[test]
    fn sync_dirty_from_skips_clean_chunks() {
        let (schema, id) = schema_with_pos();
        let mut live = Archetype::new(&[id], 2);
        let mut reg = EntityRegistry::new();
        live.insert_entity(reg.create_entity(), &schema);

        let mut replica = Archetype::new(&[id], 2);
        replica.sync_dirty_from(&live, &schema);
        assert_eq!(replica.len(), 1);

        live.clear_all_dirty();
        replica.sync_dirty_from(&live, &schema);
        assert_eq!(replica.len(), 1); // unchanged, no new dirty chunk to copy
    }
}
