//! Chunked, archetype-organized entity/component storage plus the
//! snapshot-provider layer background modules read through.
//!
//! This crate is the data half of the module host: entities, the
//! component schema, chunked and managed storage, the query engine,
//! the event bus, the per-producer command buffer, the repository that
//! composes all of it into a live world, and the three snapshot
//! provider strategies (`gdb`, `sod`, `shared`) that hand read-only
//! `View`s of that world to background modules. The module scheduler,
//! system scheduler, execution policy, circuit breaker and lifecycle
//! coordinator that drive modules against these views live one layer
//! up, in `kernel-scheduler`.

pub mod command;
pub mod entity;
pub mod error;
pub mod event;
pub mod mask;
pub mod query;
pub mod repository;
pub mod schema;
pub mod snapshot;
pub mod storage;
pub mod view;

pub use command::{CommandBuffer, Target};
pub use entity::{Entity, EntityRegistry, LifecycleState};
pub use error::{CoreError, CoreResult};
pub use event::EventBus;
pub use mask::ComponentMask;
pub use query::{Query, QueryBuilder};
pub use repository::Repository;
pub use schema::{Component, ComponentId, Event, EventId, ManagedComponent, Schema};
pub use snapshot::{GdbProvider, SharedProvider, SnapshotKind, SnapshotProvider, SodProvider};
pub use view::View;
