use crate::error::{CoreError, CoreResult};
use crate::schema::{require_event, Event, EventId, Schema};
use downcast_rs::{impl_downcast, Downcast};

/// Type-erased double-buffered stream for a single event type.
///
/// `publish` accepts writes for the tick in progress; `consume` is the
/// buffer visible to readers until the next `swap_buffers`. A replica or
/// snapshot never publishes — it only ever receives a read-only
/// projection of `consume` via `project_consume_from`.
pub trait EventQueue: Downcast + Send + Sync + std::fmt::Debug {
    fn swap_buffers(&mut self);
    fn clone_empty(&self) -> Box<dyn EventQueue>;
    fn project_consume_from(&mut self, src: &dyn EventQueue);
    /// Deep-clones both buffers. Used when cloning a whole repository
    /// (the GDB provider's `Arc::make_mut` path).
    fn clone_deep(&self) -> Box<dyn EventQueue>;
    /// Number of events currently visible to readers. Lets a caller
    /// check "did this event fire last tick" without knowing `T`.
    fn consume_len(&self) -> usize;
}
impl_downcast!(EventQueue);

#[derive(Debug, Default)]
pub(crate) struct TypedEventQueue<T: Event> {
    publish: Vec<T>,
    consume: Vec<T>,
}

impl<T: Event> TypedEventQueue<T> {
    fn new() -> Self {
        TypedEventQueue {
            publish: Vec::new(),
            consume: Vec::new(),
        }
    }
}

impl<T: Event> EventQueue for TypedEventQueue<T> {
    fn swap_buffers(&mut self) {
        std::mem::swap(&mut self.publish, &mut self.consume);
        self.publish.clear();
    }

    fn clone_empty(&self) -> Box<dyn EventQueue> {
        Box::new(TypedEventQueue::<T>::new())
    }

    fn project_consume_from(&mut self, src: &dyn EventQueue) {
        let src = src
            .as_any()
            .downcast_ref::<TypedEventQueue<T>>()
            .expect("project_consume_from called across mismatched event types");
        self.consume.clear();
        self.consume.extend_from_slice(&src.consume);
    }

    fn clone_deep(&self) -> Box<dyn EventQueue> {
        Box::new(TypedEventQueue {
            publish: self.publish.clone(),
            consume: self.consume.clone(),
        })
    }

    fn consume_len(&self) -> usize {
        self.consume.len()
    }
}

pub(crate) fn make_queue<T: Event>() -> Box<dyn EventQueue> {
    Box::new(TypedEventQueue::<T>::new())
}

/// Owns one double-buffered queue per registered event type.
#[derive(Debug, Default)]
pub struct EventBus {
    queues: Vec<Box<dyn EventQueue>>,
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        EventBus {
            queues: self.queues.iter().map(|q| q.clone_deep()).collect(),
        }
    }
}

impl EventBus {
    pub fn new(schema: &Schema) -> Self {
        let queues = schema.events().map(|meta| meta.new_queue()).collect();
        EventBus { queues }
    }

    /// Grows to match a schema that has had new event types registered
    /// since this bus was created (schema registration only ever
    /// appends).
    pub(crate) fn sync_schema(&mut self, schema: &Schema) {
        while self.queues.len() < schema.event_count() {
            let id = self.queues.len() as EventId;
            self.queues.push(schema.event_meta(id).new_queue());
        }
    }

    pub fn publish<T: Event>(&mut self, schema: &Schema, value: T) -> CoreResult<()> {
        let id = require_event::<T>(schema)?;
        let queue = self.queues[id as usize]
            .as_any_mut()
            .downcast_mut::<TypedEventQueue<T>>()
            .expect("event queue type mismatch");
        queue.publish.push(value);
        Ok(())
    }

    /// Swaps every queue's publish/consume buffers. Called once, from
    /// the main thread, at the end-of-tick barrier.
    pub fn swap_buffers(&mut self) {
        for queue in &mut self.queues {
            queue.swap_buffers();
        }
    }

    /// Whether any event of `id` is currently visible to readers,
    /// without needing to know its Rust type. Used by the module
    /// scheduler's `watch_events` reactive-skip check.
    pub fn has_pending(&self, id: EventId) -> bool {
        self.queues.get(id as usize).map_or(false, |q| q.consume_len() > 0)
    }

    pub fn consume_events<T: Event>(&self, schema: &Schema) -> CoreResult<&[T]> {
        let id = require_event::<T>(schema)?;
        let queue = self.queues[id as usize]
            .as_any()
            .downcast_ref::<TypedEventQueue<T>>()
            .expect("event queue type mismatch");
        Ok(&queue.consume)
    }

    /// Copies `other`'s consume buffers into `self`, used by
    /// `Repository::sync_from` to hand replicas and snapshots the same
    /// events that live modules would see in the same tick.
    pub(crate) fn project_consume_from(&mut self, other: &EventBus) {
        for (dst, src) in self.queues.iter_mut().zip(other.queues.iter()) {
            dst.project_consume_from(src.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Dmg {
        amt: f32,
    }

    #[test]
    fn publish_not_visible_until_swap() {
        let mut schema = Schema::new();
        schema.register_event::<Dmg>().unwrap();
        let mut bus = EventBus::new(&schema);

        bus.publish(&schema, Dmg { amt: 10.0 }).unwrap();
        assert!(bus.consume_events::<Dmg>(&schema).unwrap().is_empty());

        bus.swap_buffers();
        assert_eq!(bus.consume_events::<Dmg>(&schema).unwrap().len(), 1);
    }

    #[test]
    fn swap_clears_stale_consume() {
        let mut schema = Schema::new();
        schema.register_event::<Dmg>().unwrap();
        let mut bus = EventBus::new(&schema);

        bus.publish(&schema, Dmg { amt: 1.0 }).unwrap();
        bus.swap_buffers();
        assert_eq!(bus.consume_events::<Dmg>(&schema).unwrap().len(), 1);

        // nothing published this tick: next swap clears the view
        bus.swap_buffers();
        assert!(bus.consume_events::<Dmg>(&schema).unwrap().is_empty());
    }

    #[test]
    fn unknown_event_is_an_error() {
        let schema = Schema::new();
        let bus = EventBus::new(&schema);
        assert!(matches!(
            bus.consume_events::<Dmg>(&schema),
            Err(CoreError::UnknownEvent(_))
        ));
    }

    #[test]
    fn project_consume_from_copies_snapshot() {
        let mut schema = Schema::new();
        schema.register_event::<Dmg>().unwrap();
        let mut live = EventBus::new(&schema);
        live.publish(&schema, Dmg { amt: 5.0 }).unwrap();
        live.swap_buffers();

        let mut replica = EventBus::new(&schema);
        replica.project_consume_from(&live);
        assert_eq!(
            replica.consume_events::<Dmg>(&schema).unwrap(),
            live.consume_events::<Dmg>(&schema).unwrap()
        );
    }
}
