use crate::error::{CoreError, CoreResult};
use crate::storage::column::{Column, TypedColumn};
use fxhash::FxHashMap;
use std::any::TypeId;

pub type ComponentId = u16;
pub type EventId = u16;

/// An unmanaged component: fixed-size, trivially copyable, stored
/// directly in the chunked column store.
pub trait Component: 'static + Copy + Send + Sync + std::fmt::Debug {}
impl<T: 'static + Copy + Send + Sync + std::fmt::Debug> Component for T {}

/// A managed component: an opaque, deep-immutable reference value
/// stored in the managed-component table. Deep immutability is the
/// caller's responsibility — see the invariant in `crate::storage`.
pub trait ManagedComponent: 'static + Send + Sync + std::fmt::Debug {}
impl<T: 'static + Send + Sync + std::fmt::Debug> ManagedComponent for T {}

/// An event type publishable through the event bus.
pub trait Event: 'static + Clone + Send + Sync + std::fmt::Debug {}
impl<T: 'static + Clone + Send + Sync + std::fmt::Debug> Event for T {}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ComponentKind {
    Unmanaged,
    Managed,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct ComponentMeta {
    pub id: ComponentId,
    pub name: &'static str,
    pub kind: ComponentKind,
    make_column: fn() -> Box<dyn Column>,
}

impl ComponentMeta {
    pub fn new_column(&self) -> Box<dyn Column> {
        (self.make_column)()
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct EventMeta {
    pub id: EventId,
    pub name: &'static str,
    make_queue: fn() -> Box<dyn crate::event::EventQueue>,
}

impl EventMeta {
    pub fn new_queue(&self) -> Box<dyn crate::event::EventQueue> {
        (self.make_queue)()
    }
}

fn managed_column_ctor() -> Box<dyn Column> {
    Box::new(crate::storage::column::ManagedColumn::new())
}

/// Ordered, append-only registry of component and event types. Every
/// repository and every replica of it shares a single `Schema`
/// (replicas never own their own copy — see the ownership rules in
/// `SPEC_FULL.md` §3), so type ids are stable across the whole kernel.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    components_by_type: FxHashMap<TypeId, ComponentId>,
    components: Vec<ComponentMeta>,
    events_by_type: FxHashMap<TypeId, EventId>,
    events: Vec<EventMeta>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an unmanaged component type. Must happen exactly once
    /// per repository, before any entity uses the component.
    pub fn register_component<T: Component>(&mut self) -> CoreResult<ComponentId> {
        self.register_component_inner::<T>(ComponentKind::Unmanaged, || {
            Box::new(TypedColumn::<T>::new())
        })
    }

    /// Registers a managed (reference-typed, deep-immutable) component.
    pub fn register_managed<T: ManagedComponent>(&mut self) -> CoreResult<ComponentId> {
        self.register_component_inner::<T>(ComponentKind::Managed, managed_column_ctor)
    }

    fn register_component_inner<T: 'static>(
        &mut self,
        kind: ComponentKind,
        make_column: fn() -> Box<dyn Column>,
    ) -> CoreResult<ComponentId> {
        let type_id = TypeId::of::<T>();
        if self.components_by_type.contains_key(&type_id) {
            return Err(CoreError::DuplicateRegistration(std::any::type_name::<T>()));
        }
        let id = self.components.len() as ComponentId;
        self.components.push(ComponentMeta {
            id,
            name: std::any::type_name::<T>(),
            kind,
            make_column,
        });
        self.components_by_type.insert(type_id, id);
        Ok(id)
    }

    pub fn register_event<T: Event>(&mut self) -> CoreResult<EventId> {
        let type_id = TypeId::of::<T>();
        if self.events_by_type.contains_key(&type_id) {
            return Err(CoreError::DuplicateRegistration(std::any::type_name::<T>()));
        }
        let id = self.events.len() as EventId;
        self.events.push(EventMeta {
            id,
            name: std::any::type_name::<T>(),
            make_queue: crate::event::make_queue::<T>,
        });
        self.events_by_type.insert(type_id, id);
        Ok(id)
    }

    pub fn component_id<T: 'static>(&self) -> Option<ComponentId> {
        self.components_by_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn event_id<T: 'static>(&self) -> Option<EventId> {
        self.events_by_type.get(&TypeId::of::<T>()).copied()
    }

    pub(crate) fn component_meta(&self, id: ComponentId) -> &ComponentMeta {
        &self.components[id as usize]
    }

    pub(crate) fn event_meta(&self, id: EventId) -> &EventMeta {
        &self.events[id as usize]
    }

    pub(crate) fn component_count(&self) -> usize {
        self.components.len()
    }

    pub(crate) fn event_count(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn components(&self) -> impl Iterator<Item = &ComponentMeta> {
        self.components.iter()
    }

    pub(crate) fn events(&self) -> impl Iterator<Item = &EventMeta> {
        self.events.iter()
    }
}

/// Helper used by command-buffer playback and direct API calls to turn
/// a missing registration into the fatal `UnknownComponent` error.
pub(crate) fn require_component<T: 'static>(schema: &Schema) -> CoreResult<ComponentId> {
    schema
        .component_id::<T>()
        .ok_or_else(|| CoreError::UnknownComponent(std::any::type_name::<T>()))
}

pub(crate) fn require_event<T: 'static>(schema: &Schema) -> CoreResult<EventId> {
    schema
        .event_id::<T>()
        .ok_or_else(|| CoreError::UnknownEvent(std::any::type_name::<T>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug)]
    struct Pos {
        #[allow(dead_code)]
        x: f32,
        #[allow(dead_code)]
        y: f32,
    }

    #[derive(Clone, Debug)]
    struct Dmg {
        #[allow(dead_code)]
        amt: f32,
    }

    #[test]
    fn register_component_assigns_stable_ids() {
        let mut schema = Schema::new();
        let id = schema.register_component::<Pos>().unwrap();
        assert_eq!(id, 0);
        assert_eq!(schema.component_id::<Pos>(), Some(0));
    }

    #[test]
    fn duplicate_registration_is_fatal() {
        let mut schema = Schema::new();
        schema.register_component::<Pos>().unwrap();
        assert!(matches!(
            schema.register_component::<Pos>(),
            Err(CoreError::DuplicateRegistration(_))
        ));
    }

    #[test]
    fn register_event_assigns_stable_ids() {
        let mut schema = Schema::new();
        let id = schema.register_event::<Dmg>().unwrap();
        assert_eq!(id, 0);
        assert_eq!(schema.event_id::<Dmg>(), Some(0));
    }

    #[test]
    fn unknown_component_is_unregistered() {
        let schema = Schema::new();
        assert_eq!(schema.component_id::<Pos>(), None);
    }
}
