use crate::entity::{Entity, LifecycleState};
use crate::error::CoreResult;
use crate::repository::Repository;
use crate::schema::{Component, Event, ManagedComponent};
use crossbeam_queue::SegQueue;
use fxhash::FxHashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A reference to an entity recorded into a command buffer: either a
/// real handle, or a placeholder standing in for an entity created
/// earlier in the *same* recording (not yet resolved to a real handle
/// until playback runs).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Target {
    Entity(Entity),
    Placeholder(u32),
}

impl From<Entity> for Target {
    fn from(e: Entity) -> Self {
        Target::Entity(e)
    }
}

type ComponentWrite = Box<dyn FnOnce(&mut Repository, Entity) -> CoreResult<()> + Send>;
type ComponentRemove = Box<dyn FnOnce(&mut Repository, Entity) -> CoreResult<()> + Send>;
type EventPublish = Box<dyn FnOnce(&mut Repository) -> CoreResult<()> + Send>;

enum Entry {
    CreateEntity(u32),
    DestroyEntity(Target),
    AddComponent(Target, ComponentWrite),
    SetComponent(Target, ComponentWrite),
    RemoveComponent(Target, ComponentRemove),
    PublishEvent(EventPublish),
    SetLifecycleState(Target, LifecycleState),
}

/// Lock-free, per-producer FIFO of deferred structural edits and event
/// publications. Any number of modules may record into their own
/// command buffer concurrently; only the main thread ever plays one
/// back, strictly in recorded order.
#[derive(Default)]
pub struct CommandBuffer {
    entries: SegQueue<Entry>,
    next_placeholder: AtomicU32,
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("CommandBuffer").finish()
    }
}

impl CommandBuffer {
    pub fn new() -> Self {
        CommandBuffer {
            entries: SegQueue::new(),
            next_placeholder: AtomicU32::new(0),
        }
    }

    /// Records a creation. Returns a `Target::Placeholder` that can be
    /// used immediately by further calls on this same buffer, resolved
    /// to a real `Entity` only once playback runs.
    pub fn create_entity(&self) -> Target {
        let id = self.next_placeholder.fetch_add(1, Ordering::Relaxed);
        self.entries.push(Entry::CreateEntity(id));
        Target::Placeholder(id)
    }

    pub fn destroy_entity(&self, target: impl Into<Target>) {
        self.entries.push(Entry::DestroyEntity(target.into()));
    }

    pub fn add_component<T: Component>(&self, target: impl Into<Target>, value: T) {
        let target = target.into();
        self.entries.push(Entry::AddComponent(
            target,
            Box::new(move |repo, entity| repo.add_component(entity, value)),
        ));
    }

    pub fn set_component<T: Component>(&self, target: impl Into<Target>, value: T) {
        let target = target.into();
        self.entries.push(Entry::SetComponent(
            target,
            Box::new(move |repo, entity| repo.set_component(entity, value)),
        ));
    }

    pub fn add_managed<T: ManagedComponent>(&self, target: impl Into<Target>, value: Arc<T>) {
        let target = target.into();
        self.entries.push(Entry::AddComponent(
            target,
            Box::new(move |repo, entity| repo.add_managed(entity, value)),
        ));
    }

    pub fn remove_component<T: Component>(&self, target: impl Into<Target>) {
        let target = target.into();
        self.entries.push(Entry::RemoveComponent(
            target,
            Box::new(move |repo, entity| repo.remove_component::<T>(entity)),
        ));
    }

    pub fn publish<T: Event>(&self, value: T) {
        self.entries.push(Entry::PublishEvent(Box::new(
            move |repo| repo.publish_event(value),
        )));
    }

    pub fn set_lifecycle_state(&self, target: impl Into<Target>, state: LifecycleState) {
        self.entries
            .push(Entry::SetLifecycleState(target.into(), state));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Plays every recorded entry back against `repo`, in FIFO order,
    /// on `repo`'s owning thread. Entries targeting a dead (or
    /// never-resolved, e.g. aborted-construction) entity are silently
    /// skipped. The first entry that hits a schema mismatch
    /// (`UnknownComponent`/`UnknownEvent`) aborts playback and returns
    /// the error — that always indicates a programming error, never a
    /// normal runtime condition.
    pub fn playback(&self, repo: &mut Repository) -> CoreResult<()> {
        let mut placeholders: FxHashMap<u32, Entity> = FxHashMap::default();
        while let Some(entry) = self.entries.pop() {
            match entry {
                Entry::CreateEntity(placeholder) => {
                    let entity = repo.create_entity();
                    placeholders.insert(placeholder, entity);
                }
                Entry::DestroyEntity(target) => {
                    if let Some(entity) = resolve(target, &placeholders, repo) {
                        repo.destroy_entity(entity);
                    }
                }
                Entry::AddComponent(target, apply) | Entry::SetComponent(target, apply) => {
                    if let Some(entity) = resolve(target, &placeholders, repo) {
                        apply(repo, entity)?;
                    }
                }
                Entry::RemoveComponent(target, apply) => {
                    if let Some(entity) = resolve(target, &placeholders, repo) {
                        apply(repo, entity)?;
                    }
                }
                Entry::PublishEvent(apply) => apply(repo)?,
                Entry::SetLifecycleState(target, state) => {
                    if let Some(entity) = resolve(target, &placeholders, repo) {
                        repo.set_lifecycle_state(entity, state);
                    }
                }
            }
        }
        Ok(())
    }
}

fn resolve(
    target: Target,
    placeholders: &FxHashMap<u32, Entity>,
    repo: &Repository,
) -> Option<Entity> {
    let entity = match target {
        Target::Entity(e) => e,
        Target::Placeholder(id) => *placeholders.get(&id)?,
    };
    if repo.is_alive(entity) {
        Some(entity)
    } else {
        None
    }
}
