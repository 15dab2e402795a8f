//! Chunked, archetype-organized entity/component storage.
//!
//! # Managed-component immutability invariant
//!
//! Managed components are stored as `Arc<dyn Any + Send + Sync>` so that
//! syncing a dirty row between repositories is a refcount bump rather
//! than a deep clone. That is only sound because nothing ever mutates
//! the value behind the `Arc` in place: a "write" to a managed component
//! always replaces the `Arc` in its column slot with a new one rather
//! than mutating through it. Code that reaches for `Arc::get_mut` on a
//! managed component's payload is violating this invariant.

pub mod archetype;
pub mod chunk;
pub mod column;

pub use archetype::{Archetype, ChunkLocation};
pub use chunk::Chunk;
pub use column::{Column, ManagedColumn, TypedColumn};
