use std::num::Wrapping;

pub type EntityIndex = u32;
pub type EntityGeneration = Wrapping<u32>;

/// A handle identifying a row in some repository: a dense index plus a
/// generation that increments every time the slot is reused.
///
/// A handle only ever resolves to the row it was created for. Once the
/// entity behind it is destroyed, the handle is permanently dead: the
/// slot may be recycled, but only under a strictly larger generation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Entity {
    index: EntityIndex,
    generation: EntityGeneration,
}

impl Entity {
    pub fn new(index: EntityIndex, generation: EntityGeneration) -> Self {
        Entity { index, generation }
    }

    #[inline]
    pub fn index(&self) -> EntityIndex {
        self.index
    }

    #[inline]
    pub fn generation(&self) -> EntityGeneration {
        self.generation
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}#{}", self.index, self.generation.0)
    }
}

/// Where an entity sits in the distributed construction/destruction
/// protocol. Only `Active` entities are visible to ordinary queries;
/// `Constructing`/`Destroying` are visible only to lifecycle
/// participants (see `kernel_scheduler::lifecycle`).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum LifecycleState {
    Constructing,
    Active,
    Destroying,
    Dead,
}

/// Index+generation registry backing a single repository. Owns the
/// free-list and is the sole authority on whether a handle is alive.
///
/// Unlike a shared allocator serving many worlds at once, a registry
/// belongs to exactly one repository and is only ever touched from that
/// repository's owning thread.
#[derive(Debug, Default, Clone)]
pub struct EntityRegistry {
    generations: Vec<EntityGeneration>,
    free: Vec<EntityIndex>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh entity, preferring a recycled slot from the
    /// free-list over growing the registry.
    pub fn create_entity(&mut self) -> Entity {
        if let Some(index) = self.free.pop() {
            let generation = self.generations[index as usize];
            Entity::new(index, generation)
        } else {
            let index = self.generations.len() as EntityIndex;
            self.generations.push(Wrapping(1));
            Entity::new(index, Wrapping(1))
        }
    }

    /// Bumps the generation at `entity`'s slot and returns it to the
    /// free-list. Returns `false` (no-op) if `entity` was already dead.
    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let slot = &mut self.generations[entity.index() as usize];
        *slot += Wrapping(1);
        self.free.push(entity.index());
        true
    }

    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.generations
            .get(entity.index() as usize)
            .map_or(false, |gen| *gen == entity.generation())
    }

    /// Reconstructs the current handle for a raw index, e.g. when an
    /// external collaborator (spatial hash, navigation graph) only
    /// tracked the index.
    pub fn resolve(&self, index: EntityIndex) -> Option<Entity> {
        self.generations
            .get(index as usize)
            .map(|gen| Entity::new(index, *gen))
    }

    pub fn capacity(&self) -> usize {
        self.generations.len()
    }

    /// A copy of the current generation table, used to bring a
    /// replica's registry in step with the live one without giving the
    /// replica its own free-list (replicas never create or destroy
    /// entities directly).
    pub(crate) fn snapshot_generations(&self) -> Vec<EntityGeneration> {
        self.generations.clone()
    }

    pub(crate) fn load_generations(&mut self, generations: Vec<EntityGeneration>) {
        self.generations = generations;
    }
}
