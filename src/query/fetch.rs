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

//! Typed accessors a query view yields per match
//!
//! Accessor types contribute terms on target 0 and read their data straight
//! out of the matched dense row. Mutable accessors rely on the scheduler's
//! access analysis: a system only receives a view for data it declared.

use crate::archetype::{ArchetypeId, ColumnId};
use crate::entity::Entity;
use crate::query::term::{QueryTerm, QueryTerms};
use crate::reflect::Reflect;
use crate::world::World;

/// A tuple of accessors fetched per query match
pub trait QueryData {
    type Item<'w>;

    /// Contribute this accessor's terms
    fn append_terms(world: &World, terms: &mut QueryTerms);

    /// Read the accessor out of a matched row
    ///
    /// # Safety
    /// `archetype`/`row` must come from a plan match against `world`, and
    /// mutable accessors must be covered by the calling system's access set.
    unsafe fn fetch<'w>(
        world: &'w World,
        archetype: ArchetypeId,
        row: usize,
        entity: Entity,
    ) -> Self::Item<'w>;
}

impl QueryData for Entity {
    type Item<'w> = Entity;

    fn append_terms(_world: &World, _terms: &mut QueryTerms) {}

    unsafe fn fetch<'w>(
        _world: &'w World,
        _archetype: ArchetypeId,
        _row: usize,
        entity: Entity,
    ) -> Entity {
        entity
    }
}

impl<'a, T: Reflect> QueryData for &'a T {
    type Item<'w> = &'w T;

    fn append_terms(world: &World, terms: &mut QueryTerms) {
        terms.read(world.component_id::<T>(), 0);
    }

    unsafe fn fetch<'w>(
        world: &'w World,
        archetype: ArchetypeId,
        row: usize,
        _entity: Entity,
    ) -> &'w T {
        let column = ColumnId::base(world.component_id::<T>());
        let table = world.dense_tables().get(archetype).expect("matched archetype");
        let values = table.column(column).expect("required column");
        &*(values.at(row) as *const T)
    }
}

impl<'a, T: Reflect> QueryData for &'a mut T {
    type Item<'w> = &'w mut T;

    fn append_terms(world: &World, terms: &mut QueryTerms) {
        terms.write(world.component_id::<T>(), 0);
    }

    unsafe fn fetch<'w>(
        world: &'w World,
        archetype: ArchetypeId,
        row: usize,
        _entity: Entity,
    ) -> &'w mut T {
        let column = ColumnId::base(world.component_id::<T>());
        // SAFETY: the scheduler never runs two systems with conflicting
        // access in the same group, so this row is not aliased.
        let table = world.dense_tables().get(archetype).expect("matched archetype");
        let values = table.column(column).expect("required column");
        &mut *(values.at(row) as *mut T)
    }
}

impl<'a, T: Reflect> QueryData for Option<&'a T> {
    type Item<'w> = Option<&'w T>;

    fn append_terms(world: &World, terms: &mut QueryTerms) {
        terms.push(QueryTerm::Component {
            data_type: world.component_id::<T>(),
            target: 0,
            access: crate::query::term::Access::Read,
            optional: true,
            changed: false,
        });
    }

    unsafe fn fetch<'w>(
        world: &'w World,
        archetype: ArchetypeId,
        row: usize,
        _entity: Entity,
    ) -> Option<&'w T> {
        let column = ColumnId::base(world.component_id::<T>());
        let table = world.dense_tables().get(archetype)?;
        let values = table.column(column)?;
        Some(&*(values.at(row) as *const T))
    }
}

impl<'a, T: Reflect> QueryData for Option<&'a mut T> {
    type Item<'w> = Option<&'w mut T>;

    fn append_terms(world: &World, terms: &mut QueryTerms) {
        terms.push(QueryTerm::Component {
            data_type: world.component_id::<T>(),
            target: 0,
            access: crate::query::term::Access::Write,
            optional: true,
            changed: false,
        });
    }

    unsafe fn fetch<'w>(
        world: &'w World,
        archetype: ArchetypeId,
        row: usize,
        _entity: Entity,
    ) -> Option<&'w mut T> {
        let column = ColumnId::base(world.component_id::<T>());
        // SAFETY: as for `&mut T`.
        let table = world.dense_tables().get(archetype)?;
        let values = table.column(column)?;
        Some(&mut *(values.at(row) as *mut T))
    }
}

macro_rules! impl_query_data_tuple {
    ($($name:ident),*) => {
        impl<$($name: QueryData),*> QueryData for ($($name,)*) {
            type Item<'w> = ($($name::Item<'w>,)*);

            fn append_terms(world: &World, terms: &mut QueryTerms) {
                $($name::append_terms(world, terms);)*
            }

            unsafe fn fetch<'w>(
                world: &'w World,
                archetype: ArchetypeId,
                row: usize,
                entity: Entity,
            ) -> Self::Item<'w> {
                ($($name::fetch(world, archetype, row, entity),)*)
            }
        }
    };
}

impl_query_data_tuple!(A);
impl_query_data_tuple!(A, B);
impl_query_data_tuple!(A, B, C);
impl_query_data_tuple!(A, B, C, D);
impl_query_data_tuple!(A, B, C, D, E);
impl_query_data_tuple!(A, B, C, D, E, F);
