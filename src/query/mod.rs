// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Queries: declarative terms compiled to a cached match plan
//!
//! A [`Query`] owns its compiled plan and survives across frames; every call
//! to [`Query::view`] refreshes the cached archetype/table sets through the
//! graph's collect cursors and returns a fresh, non-restartable iterator.

pub mod fetch;
pub mod node;
pub mod term;

use std::marker::PhantomData;

use smallvec::SmallVec;

pub use fetch::QueryData;
pub use node::{QueryCursor, QueryPlan};
pub use term::{Access, QueryTerm, QueryTerms, MAX_TARGETS};

use crate::archetype::ArchetypeId;
use crate::entity::Entity;
use crate::error::Result;
use crate::world::World;

/// One match of a raw view: the entities bound to each target
#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub entities: SmallVec<[Entity; MAX_TARGETS]>,
    pub archetypes: [ArchetypeId; MAX_TARGETS],
    pub rows: [usize; MAX_TARGETS],
}

impl QueryMatch {
    pub fn entity(&self, target: usize) -> Entity {
        self.entities[target]
    }
}

/// Term-level query without a typed accessor tuple
pub struct RawQuery {
    terms: QueryTerms,
    plan: QueryPlan,
}

impl RawQuery {
    pub fn new(world: &World, terms: QueryTerms) -> Result<Self> {
        terms.validate(world.types())?;
        Ok(Self {
            plan: QueryPlan::compile(&terms),
            terms,
        })
    }

    pub fn terms(&self) -> &QueryTerms {
        &self.terms
    }

    /// Refresh cached matches without starting an iteration
    pub fn update(&mut self, world: &World) {
        self.plan.update(world);
    }

    /// Iterate matches
    pub fn view<'w, 'q>(&'q mut self, world: &'w World) -> RawView<'w, 'q> {
        self.begin(world, &[])
    }

    /// Iterate matches with `target` bound to `entity`
    pub fn view_pinned<'w, 'q>(
        &'q mut self,
        world: &'w World,
        target: usize,
        entity: Entity,
    ) -> RawView<'w, 'q> {
        self.begin(world, &[(target, entity)])
    }

    fn begin<'w, 'q>(&'q mut self, world: &'w World, pins: &[(usize, Entity)]) -> RawView<'w, 'q> {
        self.plan.update(world);

        // Acquiring a view with write terms counts as a write: bump the
        // matched columns so change detection sees it.
        for (target, column) in QueryPlan::write_columns(&self.terms) {
            for &archetype in self.plan.matched_archetypes(target) {
                if let Some(ptr) = world.dense_tables().table_ptr(archetype) {
                    // SAFETY: bumping a version counter; the scheduler keeps
                    // conflicting systems out of this stage.
                    unsafe { (*ptr.as_ptr()).touch_column(column) };
                }
            }
        }

        let mut mask = 0u8;
        let mut bindings: SmallVec<[(usize, ArchetypeId, usize); 2]> = SmallVec::new();
        for &(target, entity) in pins {
            let bound = world
                .archetype_of(entity)
                .filter(|_| world.is_alive(entity))
                .and_then(|archetype| {
                    let table = world.dense_tables().get(archetype)?;
                    let row = table.row_of(entity.index)?;
                    Some((archetype, row))
                });
            match bound {
                Some((archetype, row)) => {
                    mask |= 1 << target;
                    bindings.push((target, archetype, row));
                }
                None => {
                    // A dead pin matches nothing.
                    return RawView {
                        world,
                        plan: &self.plan,
                        cursor: None,
                        targets: self.plan.target_count(),
                    };
                }
            }
        }

        let mut cursor = self.plan.cursor(mask);
        for (target, archetype, row) in bindings {
            cursor.archetypes[target] = archetype;
            cursor.rows[target] = row;
        }

        RawView {
            world,
            plan: &self.plan,
            cursor: Some(cursor),
            targets: self.plan.target_count(),
        }
    }
}

/// Lazy, non-restartable sequence of matches
pub struct RawView<'w, 'q> {
    pub(crate) world: &'w World,
    plan: &'q QueryPlan,
    cursor: Option<QueryCursor>,
    targets: usize,
}

impl Iterator for RawView<'_, '_> {
    type Item = QueryMatch;

    fn next(&mut self) -> Option<QueryMatch> {
        let cursor = self.cursor.as_mut()?;
        if !self.plan.next(self.world, cursor) {
            self.cursor = None;
            return None;
        }

        let mut entities = SmallVec::new();
        for target in 0..self.targets {
            let table = self.world.dense_tables().get(cursor.archetypes[target])?;
            let index = table.entity(cursor.rows[target]);
            entities.push(self.world.pool().entity_of_index(index));
        }
        Some(QueryMatch {
            entities,
            archetypes: cursor.archetypes,
            rows: cursor.rows,
        })
    }
}

/// Typed query yielding accessor tuples for target 0
pub struct Query<D: QueryData> {
    raw: RawQuery,
    _marker: PhantomData<fn() -> D>,
}

impl<D: QueryData> Query<D> {
    /// Compile a query from the accessor tuple alone
    ///
    /// # Panics
    /// Panics when an accessor names an unregistered type; queries are
    /// compiled at system construction, where that is a programmer error.
    pub fn new(world: &World) -> Self {
        Self::builder(world).build()
    }

    pub fn builder(world: &World) -> QueryBuilder<'_, D> {
        let mut terms = QueryTerms::new();
        D::append_terms(world, &mut terms);
        QueryBuilder {
            world,
            terms,
            _marker: PhantomData,
        }
    }

    /// Refresh cached matches
    pub fn update(&mut self, world: &World) {
        self.raw.update(world);
    }

    pub fn terms(&self) -> &QueryTerms {
        self.raw.terms()
    }

    /// Iterate, yielding one accessor tuple per match
    pub fn view<'w, 'q>(&'q mut self, world: &'w World) -> View<'w, 'q, D> {
        View {
            raw: self.raw.view(world),
            _marker: PhantomData,
        }
    }

    /// Iterate with a target bound to a specific entity
    pub fn view_pinned<'w, 'q>(
        &'q mut self,
        world: &'w World,
        target: usize,
        entity: Entity,
    ) -> View<'w, 'q, D> {
        View {
            raw: self.raw.view_pinned(world, target, entity),
            _marker: PhantomData,
        }
    }

    /// Raw view over the same terms, yielding per-target entities
    pub fn view_raw<'w, 'q>(&'q mut self, world: &'w World) -> RawView<'w, 'q> {
        self.raw.view(world)
    }
}

/// Iterator returned by [`Query::view`]
pub struct View<'w, 'q, D: QueryData> {
    raw: RawView<'w, 'q>,
    _marker: PhantomData<fn() -> D>,
}

impl<'w, D: QueryData> Iterator for View<'w, '_, D> {
    type Item = D::Item<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        let world = self.raw.world;
        let matched = self.raw.next()?;
        // SAFETY: the match came from this plan against this world.
        Some(unsafe { D::fetch(world, matched.archetypes[0], matched.rows[0], matched.entities[0]) })
    }
}

/// Builder adding filters and relation traversals to a typed query
pub struct QueryBuilder<'w, D: QueryData> {
    world: &'w World,
    terms: QueryTerms,
    _marker: PhantomData<fn() -> D>,
}

impl<'w, D: QueryData> QueryBuilder<'w, D> {
    /// Require a component on target 0 without accessing it
    pub fn with<T: crate::reflect::Reflect>(self) -> Self {
        self.with_at::<T>(0)
    }

    pub fn with_at<T: crate::reflect::Reflect>(mut self, target: usize) -> Self {
        self.terms.with(self.world.component_id::<T>(), target);
        self
    }

    /// Reject matches where target 0 holds the component
    pub fn without<T: crate::reflect::Reflect>(self) -> Self {
        self.without_at::<T>(0)
    }

    pub fn without_at<T: crate::reflect::Reflect>(mut self, target: usize) -> Self {
        self.terms.without(self.world.component_id::<T>(), target);
        self
    }

    /// Restrict to rows whose `T` column changed since the last view
    pub fn changed<T: crate::reflect::Reflect>(mut self) -> Self {
        let data_type = self.world.component_id::<T>();
        for term in &mut self.terms.terms {
            if let QueryTerm::Component {
                data_type: existing,
                target: 0,
                changed,
                ..
            } = term
            {
                if *existing == data_type {
                    *changed = true;
                    return self;
                }
            }
        }
        self.terms.push(QueryTerm::Component {
            data_type,
            target: 0,
            access: Access::Read,
            optional: false,
            changed: true,
        });
        self
    }

    /// Require a direct relation edge between two targets
    pub fn related<T: crate::reflect::Reflect>(mut self, from: usize, to: usize) -> Self {
        self.terms.related(self.world.relation_id::<T>(), from, to, 0, 0);
        self
    }

    /// Require a relation path of any length between two targets
    pub fn related_deep<T: crate::reflect::Reflect>(mut self, from: usize, to: usize) -> Self {
        self.terms
            .related(self.world.relation_id::<T>(), from, to, 0, u32::MAX);
        self
    }

    /// Require a relation path within a depth-bucket range
    pub fn related_range<T: crate::reflect::Reflect>(
        mut self,
        from: usize,
        to: usize,
        min_depth: u32,
        max_depth: u32,
    ) -> Self {
        self.terms
            .related(self.world.relation_id::<T>(), from, to, min_depth, max_depth);
        self
    }

    pub fn build(self) -> Query<D> {
        match self.try_build() {
            Ok(query) => query,
            Err(e) => panic!("{e}"),
        }
    }

    pub fn try_build(self) -> Result<Query<D>> {
        Ok(Query {
            raw: RawQuery::new(self.world, self.terms)?,
            _marker: PhantomData,
        })
    }
}

impl World {
    /// Compile a typed query; systems keep theirs across frames so its
    /// cached matches stay warm
    pub fn query<D: QueryData>(&self) -> Query<D> {
        Query::new(self)
    }
}
