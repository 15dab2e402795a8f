use crate::entity::Entity;
use crate::error::CoreError;
use crate::repository::Repository;
use crate::schema::{require_component, Component};
use bit_set::BitSet;

/// Builds a query from positive/negative component predicates, compiled
/// into a pair of bitmasks tested against every archetype's own mask.
pub struct QueryBuilder<'a> {
    repo: &'a Repository,
    with: BitSet,
    without: BitSet,
    error: Option<CoreError>,
}

impl<'a> QueryBuilder<'a> {
    pub(crate) fn new(repo: &'a Repository) -> Self {
        QueryBuilder {
            repo,
            with: BitSet::new(),
            without: BitSet::new(),
            error: None,
        }
    }

    pub fn with_component<T: Component>(mut self) -> Self {
        match require_component::<T>(self.repo.schema()) {
            Ok(id) => {
                self.with.insert(id as usize);
            }
            Err(err) => self.error.get_or_insert(err),
        };
        self
    }

    pub fn without_component<T: Component>(mut self) -> Self {
        match require_component::<T>(self.repo.schema()) {
            Ok(id) => {
                self.without.insert(id as usize);
            }
            Err(err) => self.error.get_or_insert(err),
        };
        self
    }

    pub fn build(self) -> Result<Query<'a>, CoreError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(Query {
            repo: self.repo,
            with: self.with,
            without: self.without,
        })
    }
}

/// A compiled query over one repository's archetypes. Iteration yields
/// handles only, in chunk order — readers call `View::get_ro` on the
/// yielded handle, rather than the query handing back component data
/// directly.
pub struct Query<'a> {
    repo: &'a Repository,
    with: BitSet,
    without: BitSet,
}

impl<'a> Query<'a> {
    /// Sequential, chunk-order iteration. Stable for a fixed archetype
    /// layout.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.repo
            .archetypes()
            .iter()
            .filter(move |archetype| archetype.matches(&self.with, &self.without))
            .flat_map(|archetype| archetype.chunks())
            .flat_map(|chunk| chunk.entities().iter().copied())
    }

    pub fn count(&self) -> usize {
        self.repo
            .archetypes()
            .iter()
            .filter(|archetype| archetype.matches(&self.with, &self.without))
            .map(|archetype| archetype.len())
            .sum()
    }

    /// Partitions matching chunks across the worker pool. `f` must be
    /// safe to call concurrently from any worker thread — callers are
    /// expected to only read through the view inside `f`, never record
    /// structural edits directly (those go through a command buffer,
    /// whose recording is itself lock-free per producer).
    #[cfg(feature = "par-iter")]
    pub fn for_each_parallel<F>(&self, f: F)
    where
        F: Fn(Entity) + Send + Sync,
    {
        use rayon::prelude::*;

        let chunks: Vec<_> = self
            .repo
            .archetypes()
            .iter()
            .filter(|archetype| archetype.matches(&self.with, &self.without))
            .flat_map(|archetype| archetype.chunks())
            .collect();

        chunks.par_iter().for_each(|chunk| {
            for &entity in chunk.entities() {
                f(entity);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    #[derive(Copy, Clone, Debug)]
    struct Pos {
        #[allow(dead_code)]
        x: f32,
    }

    #[derive(Copy, Clone, Debug)]
    struct Vel {
        #[allow(dead_code)]
        dx: f32,
    }

    #[test]
    fn query_filters_by_with_and_without() {
        let mut schema = Schema::new();
        schema.register_component::<Pos>().unwrap();
        schema.register_component::<Vel>().unwrap();
        let mut repo = Repository::new(schema, 16);

        let moving = repo.create_entity();
        repo.add_component(moving, Pos { x: 0.0 }).unwrap();
        repo.add_component(moving, Vel { dx: 1.0 }).unwrap();

        let still = repo.create_entity();
        repo.add_component(still, Pos { x: 0.0 }).unwrap();

        let query = QueryBuilder::new(&repo)
            .with_component::<Pos>()
            .without_component::<Vel>()
            .build()
            .unwrap();

        let results: Vec<_> = query.iter().collect();
        assert_eq!(results, vec![still]);
    }

    #[test]
    fn unregistered_component_fails_build() {
        let schema = Schema::new();
        let repo = Repository::new(schema, 16);
        let result = QueryBuilder::new(&repo).with_component::<Pos>().build();
        assert!(result.is_err());
    }
}
