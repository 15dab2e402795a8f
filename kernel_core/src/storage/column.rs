use downcast_rs::{impl_downcast, Downcast};
use std::any::Any;
use std::sync::Arc;

/// Type-erased per-archetype column of unmanaged component values.
///
/// A chunk holds one `Column` per unmanaged component in its archetype.
/// All row-indexed operations on a chunk go through this trait so the
/// chunk itself never needs to know the concrete component type.
pub trait Column: Downcast + Send + Sync + std::fmt::Debug {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Removes `row`, moving the last element into its place (the
    /// caller is responsible for recording the resulting relocation).
    fn swap_remove_erased(&mut self, row: usize);
    fn clear(&mut self);
    /// Builds a new, empty column of the same concrete type.
    fn clone_empty(&self) -> Box<dyn Column>;
    /// Appends a copy of `src_row` from `src` (which must be the same
    /// concrete type) onto the end of `self`.
    fn copy_row_from(&mut self, src: &dyn Column, src_row: usize);

    /// Deep-clones this column, row data included. Used to give a
    /// double-buffered snapshot provider a fully independent copy to
    /// mutate via `Arc::make_mut` without disturbing views already
    /// reading the previous generation.
    fn clone_box(&self) -> Box<dyn Column> {
        let mut cloned = self.clone_empty();
        for row in 0..self.len() {
            cloned.copy_row_from(self, row);
        }
        cloned
    }
}
impl_downcast!(Column);

/// A dense, SoA column of `Copy` component values.
#[derive(Debug, Default)]
pub struct TypedColumn<T: 'static + Copy + Send + Sync + std::fmt::Debug> {
    data: Vec<T>,
}

impl<T: 'static + Copy + Send + Sync + std::fmt::Debug> TypedColumn<T> {
    pub fn new() -> Self {
        TypedColumn { data: Vec::new() }
    }

    #[inline]
    pub fn get(&self, row: usize) -> Option<&T> {
        self.data.get(row)
    }

    #[inline]
    pub fn get_mut(&mut self, row: usize) -> Option<&mut T> {
        self.data.get_mut(row)
    }

    #[inline]
    pub fn push(&mut self, value: T) {
        self.data.push(value);
    }

    #[inline]
    pub fn set(&mut self, row: usize, value: T) {
        self.data[row] = value;
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

impl<T: 'static + Copy + Send + Sync + std::fmt::Debug> Column for TypedColumn<T> {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn swap_remove_erased(&mut self, row: usize) {
        self.data.swap_remove(row);
    }

    fn clear(&mut self) {
        self.data.clear();
    }

    fn clone_empty(&self) -> Box<dyn Column> {
        Box::new(TypedColumn::<T>::new())
    }

    fn copy_row_from(&mut self, src: &dyn Column, src_row: usize) {
        let src = src
            .as_any()
            .downcast_ref::<TypedColumn<T>>()
            .expect("copy_row_from called across mismatched column types");
        self.data.push(src.data[src_row]);
    }
}

/// Column of opaque, deep-immutable managed (reference-typed)
/// components. Values are stored behind `Arc` so that a sync between
/// repositories can perform a shallow, atomic reference copy instead of
/// a deep clone — sound only because managed values are never mutated
/// in place (see the managed-immutability invariant in the module-level
/// docs of `crate::storage`).
#[derive(Debug, Default)]
pub struct ManagedColumn {
    data: Vec<Arc<dyn Any + Send + Sync>>,
}

impl ManagedColumn {
    pub fn new() -> Self {
        ManagedColumn { data: Vec::new() }
    }

    pub fn get(&self, row: usize) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.data.get(row)
    }

    pub fn push(&mut self, value: Arc<dyn Any + Send + Sync>) {
        self.data.push(value);
    }

    pub fn set(&mut self, row: usize, value: Arc<dyn Any + Send + Sync>) {
        self.data[row] = value;
    }
}

impl Column for ManagedColumn {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn swap_remove_erased(&mut self, row: usize) {
        self.data.swap_remove(row);
    }

    fn clear(&mut self) {
        self.data.clear();
    }

    fn clone_empty(&self) -> Box<dyn Column> {
        Box::new(ManagedColumn::new())
    }

    fn copy_row_from(&mut self, src: &dyn Column, src_row: usize) {
        let src = src
            .as_any()
            .downcast_ref::<ManagedColumn>()
            .expect("copy_row_from called across mismatched column types");
        self.data.push(Arc::clone(&src.data[src_row]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_column_push_get_swap_remove() {
        let mut col = TypedColumn::<u32>::new();
        col.push(1);
        col.push(2);
        col.push(3);
        assert_eq!(col.get(1), Some(&2));
        col.swap_remove_erased(0);
        assert_eq!(col.as_slice(), &[3, 2]);
    }

    #[test]
    fn typed_column_copy_row_from() {
        let mut src = TypedColumn::<u32>::new();
        src.push(42);
        src.push(7);
        let mut dst = TypedColumn::<u32>::new();
        dst.copy_row_from(&src, 1);
        assert_eq!(dst.as_slice(), &[7]);
    }

    #[test]
    fn managed_column_shares_reference() {
        let mut src = ManagedColumn::new();
        let value: Arc<dyn Any + Send + Sync> = Arc::new(String::from("hello"));
        src.push(Arc::clone(&value));
        let mut dst = ManagedColumn::new();
        dst.copy_row_from(&src, 0);
        assert_eq!(Arc::strong_count(&value), 3); // src, dst, local
    }
}
