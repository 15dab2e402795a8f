use crate::command::CommandBuffer;
use crate::entity::{Entity, EntityRegistry, LifecycleState};
use crate::error::{CoreError, CoreResult};
use crate::event::EventBus;
use crate::mask::ComponentMask;
use crate::schema::{require_component, Component, ComponentId, Event, ManagedComponent, Schema};
use crate::storage::{Archetype, ChunkLocation};
use fxhash::FxHashMap;
use smallvec::SmallVec;
use std::any::{Any, TypeId};
use std::sync::Arc;

type ArchetypeKey = SmallVec<[ComponentId; 8]>;

fn sorted_key(ids: &[ComponentId]) -> ArchetypeKey {
    let mut key: ArchetypeKey = ids.iter().copied().collect();
    key.sort_unstable();
    key
}

#[derive(Copy, Clone, Debug)]
struct Location {
    archetype: usize,
    chunk: ChunkLocation,
}

/// Owns one world's worth of entity/component state: the chunked
/// store (archetypes of chunks), the entity registry, the event bus,
/// a command buffer, lifecycle state, and small named singletons.
///
/// The live repository is the only one that mutates directly; every
/// other instance (GDB replica, SoD/Shared pool members) is brought up
/// to date strictly through `sync_from`.
pub struct Repository {
    schema: Arc<Schema>,
    registry: EntityRegistry,
    archetypes: Vec<Archetype>,
    archetype_index: FxHashMap<ArchetypeKey, usize>,
    locations: FxHashMap<Entity, Location>,
    lifecycle: FxHashMap<Entity, LifecycleState>,
    events: EventBus,
    command_buffer: Arc<CommandBuffer>,
    singletons: FxHashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    chunk_capacity: usize,
}

impl Clone for Repository {
    /// Deep-clones world data (archetypes, registry, events, lifecycle,
    /// singletons) but keeps sharing the *same* command buffer — a
    /// clone is a new data snapshot, never a new place to record
    /// commands. Used by the GDB provider's `Arc::make_mut`, which
    /// clones only when a prior generation's `Arc` still has readers.
    fn clone(&self) -> Self {
        Repository {
            schema: Arc::clone(&self.schema),
            registry: self.registry.clone(),
            archetypes: self.archetypes.clone(),
            archetype_index: self.archetype_index.clone(),
            locations: self.locations.clone(),
            lifecycle: self.lifecycle.clone(),
            events: self.events.clone(),
            command_buffer: Arc::clone(&self.command_buffer),
            singletons: self.singletons.clone(),
            chunk_capacity: self.chunk_capacity,
        }
    }
}

impl Repository {
    /// Creates the live repository, taking ownership of `schema`.
    pub fn new(schema: Schema, chunk_capacity: usize) -> Self {
        Self::from_shared_schema(Arc::new(schema), chunk_capacity)
    }

    /// Creates a replica sharing `schema` with the repository it will
    /// be synced from. Replicas never own their own schema.
    pub fn new_replica(schema: Arc<Schema>, chunk_capacity: usize) -> Self {
        Self::from_shared_schema(schema, chunk_capacity)
    }

    fn from_shared_schema(schema: Arc<Schema>, chunk_capacity: usize) -> Self {
        let events = EventBus::new(&schema);
        Repository {
            schema,
            registry: EntityRegistry::new(),
            archetypes: Vec::new(),
            archetype_index: FxHashMap::default(),
            locations: FxHashMap::default(),
            lifecycle: FxHashMap::default(),
            events,
            command_buffer: Arc::new(CommandBuffer::new()),
            singletons: FxHashMap::default(),
            chunk_capacity,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn entity_count(&self) -> usize {
        self.locations.len()
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.registry.is_alive(entity) && self.locations.contains_key(&entity)
    }

    pub fn lifecycle_state(&self, entity: Entity) -> Option<LifecycleState> {
        self.lifecycle.get(&entity).copied()
    }

    pub fn set_lifecycle_state(&mut self, entity: Entity, state: LifecycleState) {
        self.lifecycle.insert(entity, state);
    }

    /// Creates an entity with no components, in `Active` state. Callers
    /// that need distributed construction should set `Constructing`
    /// immediately afterward (see `kernel_scheduler::lifecycle`).
    pub fn create_entity(&mut self) -> Entity {
        let entity = self.registry.create_entity();
        let archetype = self.ensure_archetype(&[]);
        let loc = self.archetypes[archetype].insert_entity(entity, &self.schema);
        self.locations.insert(
            entity,
            Location {
                archetype,
                chunk: loc,
            },
        );
        self.lifecycle.insert(entity, LifecycleState::Active);
        entity
    }

    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        if !self.registry.destroy_entity(entity) {
            return false;
        }
        if let Some(loc) = self.locations.remove(&entity) {
            let chunk = self.archetypes[loc.archetype]
                .chunk_mut(loc.chunk.chunk_index)
                .expect("location referenced a chunk that no longer exists");
            if let Some(moved) = chunk.swap_remove(loc.chunk.row) {
                self.locations.insert(
                    moved,
                    Location {
                        archetype: loc.archetype,
                        chunk: loc.chunk,
                    },
                );
            }
        }
        self.lifecycle.insert(entity, LifecycleState::Dead);
        true
    }

    pub fn has_component(&self, entity: Entity, id: ComponentId) -> bool {
        self.locations
            .get(&entity)
            .map_or(false, |loc| self.archetypes[loc.archetype].has_component(id))
    }

    pub fn get_ro<T: Component>(&self, entity: Entity) -> CoreResult<Option<&T>> {
        let id = require_component::<T>(&self.schema)?;
        if !self.is_alive(entity) {
            return Err(CoreError::DeadEntity(entity));
        }
        let loc = match self.locations.get(&entity) {
            Some(loc) => loc,
            None => return Ok(None),
        };
        let chunk = self.archetypes[loc.archetype]
            .chunk(loc.chunk.chunk_index)
            .expect("dangling location");
        Ok(chunk.get::<T>(id, loc.chunk.row))
    }

    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> CoreResult<Option<&mut T>> {
        let id = require_component::<T>(&self.schema)?;
        if !self.is_alive(entity) {
            return Err(CoreError::DeadEntity(entity));
        }
        let loc = match self.locations.get(&entity) {
            Some(loc) => *loc,
            None => return Ok(None),
        };
        let chunk = self.archetypes[loc.archetype]
            .chunk_mut(loc.chunk.chunk_index)
            .expect("dangling location");
        Ok(chunk.get_mut::<T>(id, loc.chunk.row))
    }

    pub fn set_component<T: Component>(&mut self, entity: Entity, value: T) -> CoreResult<()> {
        let id = require_component::<T>(&self.schema)?;
        if !self.is_alive(entity) {
            return Err(CoreError::DeadEntity(entity));
        }
        if !self.has_component(entity, id) {
            return Err(CoreError::UnknownComponent(std::any::type_name::<T>()));
        }
        let loc = self.locations[&entity];
        self.archetypes[loc.archetype]
            .chunk_mut(loc.chunk.chunk_index)
            .expect("dangling location")
            .set::<T>(id, loc.chunk.row, value);
        Ok(())
    }

    /// Idempotent-by-value: adding a component an entity already has
    /// simply overwrites it in place, with no archetype move.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> CoreResult<()> {
        let id = require_component::<T>(&self.schema)?;
        if !self.is_alive(entity) {
            return Err(CoreError::DeadEntity(entity));
        }
        if self.has_component(entity, id) {
            return self.set_component(entity, value);
        }
        let new_loc = self.move_entity(entity, &[id])?;
        self.archetypes[new_loc.archetype]
            .chunk_mut(new_loc.chunk.chunk_index)
            .expect("just inserted")
            .push_unmanaged(id, value);
        Ok(())
    }

    pub fn add_managed<T: ManagedComponent>(&mut self, entity: Entity, value: Arc<T>) -> CoreResult<()> {
        let id = self
            .schema
            .component_id::<T>()
            .ok_or(CoreError::UnknownComponent(std::any::type_name::<T>()))?;
        if !self.is_alive(entity) {
            return Err(CoreError::DeadEntity(entity));
        }
        let erased: Arc<dyn Any + Send + Sync> = value;
        if self.has_component(entity, id) {
            let loc = self.locations[&entity];
            self.archetypes[loc.archetype]
                .chunk_mut(loc.chunk.chunk_index)
                .expect("dangling location")
                .set_managed(id, loc.chunk.row, erased);
            return Ok(());
        }
        let new_loc = self.move_entity(entity, &[id])?;
        self.archetypes[new_loc.archetype]
            .chunk_mut(new_loc.chunk.chunk_index)
            .expect("just inserted")
            .push_managed(id, erased);
        Ok(())
    }

    pub fn get_managed<T: ManagedComponent>(&self, entity: Entity) -> CoreResult<Option<Arc<T>>> {
        let id = self
            .schema
            .component_id::<T>()
            .ok_or(CoreError::UnknownComponent(std::any::type_name::<T>()))?;
        if !self.is_alive(entity) {
            return Err(CoreError::DeadEntity(entity));
        }
        let loc = match self.locations.get(&entity) {
            Some(loc) => loc,
            None => return Ok(None),
        };
        let chunk = self.archetypes[loc.archetype]
            .chunk(loc.chunk.chunk_index)
            .expect("dangling location");
        Ok(chunk
            .get_managed(id, loc.chunk.row)
            .and_then(|arc| arc.clone().downcast::<T>().ok()))
    }

    /// No-op if the entity does not carry the component; an error if
    /// the entity is dead, distinguishing "lacks this component" from
    /// "isn't there to have components at all".
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> CoreResult<()> {
        let id = require_component::<T>(&self.schema)?;
        if !self.is_alive(entity) {
            return Err(CoreError::DeadEntity(entity));
        }
        if !self.has_component(entity, id) {
            return Ok(());
        }
        let old_loc = self.locations[&entity];
        let remaining: Vec<ComponentId> = self.archetypes[old_loc.archetype]
            .component_ids()
            .iter()
            .copied()
            .filter(|&c| c != id)
            .collect();
        self.move_entity(entity, &remaining)?;
        Ok(())
    }

    /// Moves `entity` into the archetype carrying its old component set
    /// plus `added`, copying over every column shared between the old
    /// and new archetype. The source row's values are first extracted
    /// into a standalone bundle, since the source and destination chunk
    /// may be the same `Vec<Chunk>` slot and can't both be borrowed
    /// mutably at once.
    fn move_entity(&mut self, entity: Entity, added: &[ComponentId]) -> CoreResult<Location> {
        let old_loc = self.locations.get(&entity).copied();
        let mut target_ids: Vec<ComponentId> = match old_loc {
            Some(loc) => self.archetypes[loc.archetype].component_ids().to_vec(),
            None => Vec::new(),
        };
        for &id in added {
            if !target_ids.contains(&id) {
                target_ids.push(id);
            }
        }

        let extracted = old_loc.map(|loc| {
            self.archetypes[loc.archetype]
                .chunk(loc.chunk.chunk_index)
                .expect("dangling old location")
                .extract_row(loc.chunk.row)
        });

        let new_archetype = self.ensure_archetype(&target_ids);
        let new_loc = self.archetypes[new_archetype].insert_entity(entity, &self.schema);

        if let Some(extracted) = &extracted {
            let dst_chunk = self.archetypes[new_archetype]
                .chunk_mut(new_loc.chunk_index)
                .expect("just inserted");
            for (id, column) in extracted {
                if let Some(dst_column) = dst_chunk.column_dyn_mut(*id) {
                    dst_column.copy_row_from(column.as_ref(), 0);
                }
            }
        }

        if let Some(old) = old_loc {
            if let Some(moved) = self.archetypes[old.archetype]
                .chunk_mut(old.chunk.chunk_index)
                .expect("dangling old location")
                .swap_remove(old.chunk.row)
            {
                self.locations.insert(
                    moved,
                    Location {
                        archetype: old.archetype,
                        chunk: old.chunk,
                    },
                );
            }
        }

        let location = Location {
            archetype: new_archetype,
            chunk: new_loc,
        };
        self.locations.insert(entity, location);
        Ok(location)
    }

    fn ensure_archetype(&mut self, ids: &[ComponentId]) -> usize {
        let key = sorted_key(ids);
        if let Some(&idx) = self.archetype_index.get(&key) {
            return idx;
        }
        let idx = self.archetypes.len();
        self.archetypes.push(Archetype::new(ids, self.chunk_capacity));
        self.archetype_index.insert(key, idx);
        idx
    }

    pub(crate) fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub fn publish_event<T: Event>(&mut self, value: T) -> CoreResult<()> {
        self.events.publish(&self.schema, value)
    }

    pub fn consume_events<T: Event>(&self) -> CoreResult<&[T]> {
        self.events.consume_events(&self.schema)
    }

    /// Swaps the live event bus's publish/consume buffers. Called once
    /// per tick, from the owning thread, at the end-of-tick barrier.
    pub fn swap_event_buffers(&mut self) {
        self.events.swap_buffers();
    }

    /// The shared handle modules record structural edits and events
    /// into. Every view acquired from any snapshot provider carries a
    /// clone of this same handle, so playback always lands on the live
    /// repository regardless of which replica a module actually read.
    pub fn command_buffer_handle(&self) -> Arc<CommandBuffer> {
        Arc::clone(&self.command_buffer)
    }

    pub fn get_command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    /// Plays this repository's own command buffer back against itself.
    /// Only meaningful on the live repository.
    pub fn playback_own_commands(&mut self) -> CoreResult<()> {
        let buffer = Arc::clone(&self.command_buffer);
        buffer.playback(self)
    }

    pub fn set_singleton<T: 'static + Send + Sync>(&mut self, value: T) {
        self.singletons.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn singleton<T: 'static + Send + Sync>(&self) -> CoreResult<&T> {
        self.singletons
            .get(&TypeId::of::<T>())
            .and_then(|arc| arc.downcast_ref::<T>())
            .ok_or(CoreError::MissingSingleton(std::any::type_name::<T>()))
    }

    /// Only succeeds while this repository's `Arc` is the sole owner of
    /// the singleton's value — true except transiently right after a
    /// clone that hasn't diverged yet. Replicas should not need this;
    /// it exists for the live repository's own bookkeeping (e.g.
    /// advancing `GlobalTime`).
    pub fn singleton_mut<T: 'static + Send + Sync>(&mut self) -> CoreResult<&mut T> {
        let arc = self
            .singletons
            .get_mut(&TypeId::of::<T>())
            .ok_or(CoreError::MissingSingleton(std::any::type_name::<T>()))?;
        Arc::get_mut(arc)
            .and_then(|any| any.downcast_mut::<T>())
            .ok_or(CoreError::MissingSingleton(std::any::type_name::<T>()))
    }

    pub fn has_singleton<T: 'static + Send + Sync>(&self) -> bool {
        self.singletons.contains_key(&TypeId::of::<T>())
    }

    /// Structural and data sync from `live` into `self`. Allocates or
    /// reuses archetypes to match `live`'s, copies every chunk `live`
    /// flagged dirty, and drops chunks `self` has that `live` no longer
    /// does. Also refreshes `self`'s entity registry generations and its
    /// event-consume projection.
    pub fn sync_from(&mut self, live: &Repository) {
        self.registry.load_generations(live.registry.snapshot_generations());
        self.events.sync_schema(&self.schema);
        self.events.project_consume_from(&live.events);

        for (key, &live_idx) in live.archetype_index.iter() {
            let live_arch = &live.archetypes[live_idx];
            let self_idx = self.ensure_archetype(live_arch.component_ids());
            let _ = key;
            self.archetypes[self_idx].sync_dirty_from(live_arch, &self.schema);
        }

        self.locations.clear();
        for (idx, arch) in self.archetypes.iter().enumerate() {
            for (chunk_idx, chunk) in arch.chunks().enumerate() {
                for (row, &entity) in chunk.entities().iter().enumerate() {
                    self.locations.insert(
                        entity,
                        Location {
                            archetype: idx,
                            chunk: ChunkLocation {
                                chunk_index: chunk_idx,
                                row,
                            },
                        },
                    );
                }
            }
        }

        self.lifecycle = live.lifecycle.clone();
    }

    /// As `sync_from`, but restricts column data movement to `mask`'s
    /// components — the rest of the replica's structure (archetypes,
    /// entity registry, lifecycle, event projection) stays fully in
    /// step with `live`, only the per-column data copy is skipped for
    /// unmasked components.
    pub fn sync_from_filtered(&mut self, live: &Repository, mask: &ComponentMask) {
        self.registry.load_generations(live.registry.snapshot_generations());
        self.events.sync_schema(&self.schema);
        self.events.project_consume_from(&live.events);

        for &live_idx in live.archetype_index.values() {
            let live_arch = &live.archetypes[live_idx];
            let self_idx = self.ensure_archetype(live_arch.component_ids());
            self.archetypes[self_idx].sync_dirty_from_filtered(live_arch, &self.schema, mask);
        }

        self.locations.clear();
        for (idx, arch) in self.archetypes.iter().enumerate() {
            for (chunk_idx, chunk) in arch.chunks().enumerate() {
                for (row, &entity) in chunk.entities().iter().enumerate() {
                    self.locations.insert(
                        entity,
                        Location {
                            archetype: idx,
                            chunk: ChunkLocation {
                                chunk_index: chunk_idx,
                                row,
                            },
                        },
                    );
                }
            }
        }

        self.lifecycle = live.lifecycle.clone();
    }

    /// Whether any archetype carrying component `id` has a dirty chunk
    /// right now. Used by the module scheduler's `watch_components`
    /// reactive-skip check; does not itself clear anything.
    pub fn any_dirty_for_component(&self, id: ComponentId) -> bool {
        self.archetypes
            .iter()
            .filter(|arch| arch.has_component(id))
            .any(|arch| arch.chunks().any(|chunk| chunk.is_dirty()))
    }

    /// Whether any event of `id` fired and is currently visible to
    /// readers. Used by the module scheduler's `watch_events` check.
    pub fn has_pending_event(&self, id: crate::schema::EventId) -> bool {
        self.events.has_pending(id)
    }

    /// Clears every archetype's dirty bits. Called on the live
    /// repository right after every provider that needed this tick's
    /// changes has synced from it.
    pub fn clear_all_dirty(&mut self) {
        for archetype in &mut self.archetypes {
            archetype.clear_all_dirty();
        }
    }

    /// Resets to an empty, reusable state while keeping allocated
    /// chunks and columns — used when returning a pooled replica.
    pub fn soft_clear(&mut self) {
        for archetype in &mut self.archetypes {
            for chunk in archetype.chunks_mut() {
                chunk.soft_clear();
            }
        }
        self.locations.clear();
        self.lifecycle.clear();
    }
}
