use crate::command::CommandBuffer;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::mask::ComponentMask;
use crate::query::QueryBuilder;
use crate::repository::Repository;
use crate::schema::{require_component, Component, Event, ManagedComponent};
use std::sync::Arc;

/// A read-only handle on some repository's data as of a particular
/// acquire, plus write access to the command buffer that ultimately
/// lands on the *live* repository.
///
/// All three snapshot strategies (see `crate::snapshot`) hand out a
/// `View`; the caller cannot tell which strategy backed any given view
/// from its type, only from `SnapshotKind` on the provider that
/// produced it. Cloning a `View` is O(1) — it is two `Arc` bumps and a
/// pair of scalars.
///
/// A `View` produced by the SoD or Shared provider additionally carries
/// a `ComponentMask`: component reads outside that mask report as
/// absent even if the backing replica happens to hold the data,
/// regardless of how aggressively that replica's sync actually skipped
/// copying it (see `Repository::sync_from_filtered`).
#[derive(Clone)]
pub struct View {
    data: Arc<Repository>,
    commands: Arc<CommandBuffer>,
    tick: u64,
    time: f64,
    mask: Option<Arc<ComponentMask>>,
}

impl View {
    pub(crate) fn new(data: Arc<Repository>, commands: Arc<CommandBuffer>, tick: u64, time: f64) -> Self {
        View {
            data,
            commands,
            tick,
            time,
            mask: None,
        }
    }

    /// As `new`, but restricts component visibility to `mask` — used by
    /// the SoD and Shared providers.
    pub(crate) fn new_filtered(
        data: Arc<Repository>,
        commands: Arc<CommandBuffer>,
        tick: u64,
        time: f64,
        mask: Arc<ComponentMask>,
    ) -> Self {
        View {
            data,
            commands,
            tick,
            time,
            mask: Some(mask),
        }
    }

    #[inline]
    fn id_visible(&self, id: crate::schema::ComponentId) -> bool {
        self.mask.as_ref().map_or(true, |mask| mask.contains(id))
    }

    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(&self.data)
    }

    pub fn get_ro<T: Component>(&self, entity: Entity) -> CoreResult<Option<&T>> {
        let id = require_component::<T>(self.data.schema())?;
        if !self.id_visible(id) {
            return Ok(None);
        }
        self.data.get_ro(entity)
    }

    pub fn get_managed<T: ManagedComponent>(&self, entity: Entity) -> CoreResult<Option<Arc<T>>> {
        let id = self
            .data
            .schema()
            .component_id::<T>()
            .ok_or(CoreError::UnknownComponent(std::any::type_name::<T>()))?;
        if !self.id_visible(id) {
            return Ok(None);
        }
        self.data.get_managed(entity)
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> CoreResult<bool> {
        let id = require_component::<T>(self.data.schema())?;
        Ok(self.id_visible(id) && self.data.has_component(entity, id))
    }

    pub fn has_component_id(&self, entity: Entity, id: crate::schema::ComponentId) -> bool {
        self.id_visible(id) && self.data.has_component(entity, id)
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.data.is_alive(entity)
    }

    pub fn consume_events<T: Event>(&self) -> CoreResult<&[T]> {
        self.data.consume_events()
    }

    pub fn singleton<T: 'static + Send + Sync>(&self) -> CoreResult<&T> {
        self.data.singleton()
    }

    /// The simulation tick this view was acquired at.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Wall/simulation time this view was acquired at, in seconds.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn get_command_buffer(&self) -> &CommandBuffer {
        &self.commands
    }

    /// Unwraps the underlying data handle. Used by snapshot providers'
    /// `release_view` to inspect/reclaim the backing replica; not
    /// exposed outside the crate.
    pub(crate) fn into_data(self) -> Arc<Repository> {
        self.data
    }
}
