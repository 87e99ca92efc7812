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

//! The world: owner of every piece of ECS state
//!
//! Holds the type registry, entity pool, archetype graph, dense and sparse
//! tables, resources, observers and the deferred command buffer. Structural
//! operations route through the archetype graph: compute the target node,
//! move the dense row, re-home sparse relation rows, then fire observers.

use std::marker::PhantomData;

use ahash::AHashMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::any_vec::{AnyValue, AnyVec};
use crate::archetype::{ArchetypeGraph, ArchetypeId, ColumnId};
use crate::blueprint::Blueprint;
use crate::command::{CommandBuffer, Op};
use crate::entity::{Entity, EntityPool};
use crate::error::{EcsError, Result};
use crate::event::EventPipe;
use crate::observer::{ObserverId, ObserverKind, ObserverRegistry};
use crate::reflect::Reflect;
use crate::table::{DenseTableRegistry, SparseRelationTableId, SparseRelationTableRegistry};
use crate::types::{DataTypeId, RelationFlags, TypeKind, Types};

/// Bound on observer-triggered structural recursion
pub const MAX_OBSERVER_DEPTH: usize = 16;

/// Bound on commit rounds fed by observer-deferred commands
pub const MAX_COMMIT_ROUNDS: usize = 16;

type PendingEvent = (ObserverKind, DataTypeId, Entity);

/// Shared borrow of a resource
pub struct Res<'a, T> {
    guard: RwLockReadGuard<'a, AnyValue>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::ops::Deref for Res<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the cell was created from a value of T, checked by the
        // typed resource accessors.
        unsafe { &*(self.guard.as_ptr() as *const T) }
    }
}

/// Exclusive borrow of a resource
pub struct ResMut<'a, T> {
    guard: RwLockWriteGuard<'a, AnyValue>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::ops::Deref for ResMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: as for `Res`.
        unsafe { &*(self.guard.as_ptr() as *const T) }
    }
}

impl<T> std::ops::DerefMut for ResMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as for `Res`, and the write guard is exclusive.
        unsafe { &mut *(self.guard.as_ptr() as *mut T) }
    }
}

/// Central ECS state
pub struct World {
    types: Types,
    pool: EntityPool,
    graph: ArchetypeGraph,
    dense: DenseTableRegistry,
    sparse: SparseRelationTableRegistry,
    resources: AHashMap<DataTypeId, RwLock<AnyValue>>,
    observers: ObserverRegistry,
    deferred: CommandBuffer,
    observer_trail: Vec<String>,
    prune_hooks: Vec<fn(&World)>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        let mut world = Self {
            types: Types::new(),
            pool: EntityPool::new(),
            graph: ArchetypeGraph::new(),
            dense: DenseTableRegistry::new(),
            sparse: SparseRelationTableRegistry::new(),
            resources: AHashMap::new(),
            observers: ObserverRegistry::new(),
            deferred: CommandBuffer::new(),
            observer_trail: Vec::new(),
            prune_hooks: Vec::new(),
        };
        world.ensure_table(ArchetypeId::EMPTY);
        world
    }

    // ========== Type registration ==========

    /// Register `T` as a component type
    ///
    /// # Panics
    /// Panics on re-registration or when `T`'s descriptor lacks the
    /// construction trait.
    pub fn register_component<T: Reflect>(&mut self) -> DataTypeId {
        self.types
            .register_rust::<T>(TypeKind::Component)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Register `T` as a relation type
    ///
    /// Symmetric/tree behavior is read off the descriptor's marker traits.
    pub fn register_relation<T: Reflect>(&mut self) -> DataTypeId {
        self.types
            .register_rust::<T>(TypeKind::Relation(RelationFlags::default()))
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Register `T` as a resource type without storing a value yet
    pub fn register_resource<T: Reflect>(&mut self) -> DataTypeId {
        self.types
            .register_rust::<T>(TypeKind::Resource)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Register a component type from a descriptor alone, for loaders
    /// working without compile-time types
    pub fn register_component_type(&mut self, ty: crate::reflect::Type) -> Result<DataTypeId> {
        self.types.register(ty, TypeKind::Component)
    }

    /// Register a relation type from a descriptor alone
    pub fn register_relation_type(&mut self, ty: crate::reflect::Type) -> Result<DataTypeId> {
        self.types
            .register(ty, TypeKind::Relation(RelationFlags::default()))
    }

    /// Register a resource type from a descriptor alone
    pub fn register_resource_type(&mut self, ty: crate::reflect::Type) -> Result<DataTypeId> {
        self.types.register(ty, TypeKind::Resource)
    }

    /// Store a resource value, registering its type on first use
    pub fn insert_resource<T: Reflect>(&mut self, value: T) -> DataTypeId {
        let id = match self.types.id_of::<T>() {
            Some(id) => {
                self.types
                    .expect_kind(id, TypeKind::Resource)
                    .unwrap_or_else(|e| panic!("{e}"));
                id
            }
            None => self.register_resource::<T>(),
        };
        let elem = self.types.constructible(id).clone();
        self.resources
            .insert(id, RwLock::new(AnyValue::of(elem, value)));
        id
    }

    /// Register the event pipe for `T` as a resource
    ///
    /// Registration is idempotent; the existing pipe is kept.
    pub fn register_event<T: Send + Sync + 'static>(&mut self) -> DataTypeId {
        if let Some(id) = self.types.id_of::<EventPipe<T>>() {
            return id;
        }
        let id = self.insert_resource(EventPipe::<T>::new());
        self.prune_hooks.push(prune_pipe::<T>);
        id
    }

    /// Drop events every registered reader has passed, for every pipe
    pub fn prune_events(&self) {
        for hook in &self.prune_hooks {
            hook(self);
        }
    }

    pub fn types(&self) -> &Types {
        &self.types
    }

    pub(crate) fn component_id<T: Reflect>(&self) -> DataTypeId {
        self.known_id::<T>(TypeKind::Component)
    }

    pub(crate) fn relation_id<T: Reflect>(&self) -> DataTypeId {
        self.known_id::<T>(TypeKind::Relation(RelationFlags::default()))
    }

    fn known_id<T: Reflect>(&self, kind: TypeKind) -> DataTypeId {
        let Some(id) = self.types.id_of::<T>() else {
            panic!("type `{}` is not registered", std::any::type_name::<T>());
        };
        self.types
            .expect_kind(id, kind)
            .unwrap_or_else(|e| panic!("{e}"));
        id
    }

    // ========== Entity lifecycle ==========

    /// Create an alive entity in the empty archetype
    pub fn create(&mut self) -> Entity {
        let entity = self.pool.create(ArchetypeId::EMPTY);
        self.ensure_table(ArchetypeId::EMPTY);
        self.dense
            .get_mut(ArchetypeId::EMPTY)
            .expect("empty table")
            .push_row(entity.index, |_, _| {});
        tracing::trace!(%entity, "created entity");
        entity
    }

    /// Reserve a valid-but-not-alive entity, committed later
    pub fn reserve_entity(&self) -> Entity {
        self.pool.reserve(ArchetypeId::EMPTY)
    }

    /// Destroy an entity, dropping its columns and severing its relations
    ///
    /// Stale handles are tolerated and return false.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        let mut events = Vec::new();
        let ok = self.destroy_internal(entity, &mut events);
        self.fire_all(events);
        ok
    }

    pub fn is_valid(&self, entity: Entity) -> bool {
        self.pool.is_valid(entity)
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.pool.is_alive(entity)
    }

    /// Archetype of an alive entity
    pub fn archetype_of(&self, entity: Entity) -> Option<ArchetypeId> {
        self.pool.is_valid(entity).then(|| self.pool.archetype(entity))
    }

    /// Names of the column types held by an entity
    pub fn columns_of(&self, entity: Entity) -> Vec<&str> {
        match self.archetype_of(entity) {
            Some(archetype) => self
                .graph
                .ids(archetype)
                .into_iter()
                .map(|col| self.types.name(col.data_type()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Append alive entities whose archetype is a superset of `base`,
    /// starting at `cursor`. Returns the cursor to resume from.
    pub fn iter_superset(
        &self,
        base: ArchetypeId,
        cursor: u32,
        out: &mut Vec<Entity>,
    ) -> u32 {
        let required = self.graph.ids(base);
        let graph = &self.graph;
        self.pool.scan(
            cursor,
            |archetype| required.iter().all(|&col| graph.contains(archetype, col)),
            out,
        )
    }

    // ========== Component operations ==========

    /// Add a component, moving the entity along an archetype graph edge
    ///
    /// An already-present component is overwritten in place. Returns false
    /// on a stale handle.
    pub fn add<T: Reflect>(&mut self, entity: Entity, value: T) -> bool {
        let data_type = self.component_id::<T>();
        let elem = self.types.constructible(data_type).clone();
        self.add_dynamic(entity, data_type, AnyValue::of(elem, value))
    }

    /// Type-erased variant of [`add`](Self::add), for loaders
    pub fn add_dynamic(&mut self, entity: Entity, data_type: DataTypeId, value: AnyValue) -> bool {
        let mut events = Vec::new();
        let ok = self.add_internal(entity, data_type, value, &mut events);
        self.fire_all(events);
        ok
    }

    /// Remove a component; false when absent or the handle is stale
    pub fn remove<T: Reflect>(&mut self, entity: Entity) -> bool {
        let data_type = self.component_id::<T>();
        self.remove_dynamic(entity, data_type)
    }

    pub fn remove_dynamic(&mut self, entity: Entity, data_type: DataTypeId) -> bool {
        let mut events = Vec::new();
        let ok = self.remove_internal(entity, data_type, &mut events);
        self.fire_all(events);
        ok
    }

    pub fn has<T: Reflect>(&self, entity: Entity) -> bool {
        let data_type = self.component_id::<T>();
        self.pool.is_alive(entity)
            && self
                .graph
                .contains(self.pool.archetype(entity), ColumnId::base(data_type))
    }

    pub fn get<T: Reflect>(&self, entity: Entity) -> Option<&T> {
        let data_type = self.component_id::<T>();
        let ptr = self.component_ptr(entity, data_type)?;
        // SAFETY: the column stores values of T, checked by the registry.
        Some(unsafe { &*(ptr as *const T) })
    }

    /// Mutable component access; bumps the column's version
    pub fn get_mut<T: Reflect>(&mut self, entity: Entity) -> Option<&mut T> {
        let data_type = self.component_id::<T>();
        if !self.pool.is_alive(entity) {
            return None;
        }
        let archetype = self.pool.archetype(entity);
        let table = self.dense.get_mut(archetype)?;
        let row = table.row_of(entity.index)?;
        let column = table.column_mut(ColumnId::base(data_type))?;
        // SAFETY: as for `get`; the borrow is tied to &mut self.
        Some(unsafe { &mut *(column.at(row) as *mut T) })
    }

    fn component_ptr(&self, entity: Entity, data_type: DataTypeId) -> Option<*mut u8> {
        if !self.pool.is_alive(entity) {
            return None;
        }
        let archetype = self.pool.archetype(entity);
        let table = self.dense.get(archetype)?;
        let row = table.row_of(entity.index)?;
        let column = table.column(ColumnId::base(data_type))?;
        Some(column.at(row))
    }

    // ========== Relation operations ==========

    /// Relate two entities
    ///
    /// Tree relations replace an existing outgoing edge of `from` and reject
    /// self-edges and cycles; symmetric relations also store the mirrored
    /// row. Returns false on stale handles or a rejected tree edge.
    pub fn relate<T: Reflect>(&mut self, from: Entity, to: Entity, value: T) -> bool {
        let data_type = self.relation_id::<T>();
        let elem = self.types.constructible(data_type).clone();
        self.relate_dynamic(from, to, data_type, AnyValue::of(elem, value))
    }

    pub fn relate_dynamic(
        &mut self,
        from: Entity,
        to: Entity,
        data_type: DataTypeId,
        value: AnyValue,
    ) -> bool {
        let mut events = Vec::new();
        let ok = self.relate_internal(from, to, data_type, value, &mut events);
        self.fire_all(events);
        ok
    }

    /// Remove the relation between two entities; false when absent
    pub fn unrelate<T: Reflect>(&mut self, from: Entity, to: Entity) -> bool {
        let data_type = self.relation_id::<T>();
        self.unrelate_dynamic(from, to, data_type)
    }

    pub fn unrelate_dynamic(&mut self, from: Entity, to: Entity, data_type: DataTypeId) -> bool {
        let mut events = Vec::new();
        let ok = self.unrelate_internal(from, to, data_type, &mut events);
        self.fire_all(events);
        ok
    }

    /// Whether a direct edge `from -> to` exists
    pub fn related<T: Reflect>(&self, from: Entity, to: Entity) -> bool {
        let data_type = self.relation_id::<T>();
        self.relation_row(from, to, data_type).is_some()
    }

    /// Value of the direct edge `from -> to`
    pub fn relation<T: Reflect>(&self, from: Entity, to: Entity) -> Option<&T> {
        let data_type = self.relation_id::<T>();
        let (slot, row) = self.relation_row(from, to, data_type)?;
        let ptr = self.sparse.table(slot).value_at(row);
        // SAFETY: the table stores values of T, checked by the registry.
        Some(unsafe { &*(ptr as *const T) })
    }

    fn relation_row(
        &self,
        from: Entity,
        to: Entity,
        data_type: DataTypeId,
    ) -> Option<(usize, usize)> {
        if !self.pool.is_alive(from) || !self.pool.is_alive(to) {
            return None;
        }
        let id = SparseRelationTableId::new(
            data_type,
            self.pool.archetype(from),
            self.pool.archetype(to),
            0,
        );
        let slot = self.sparse.slot_of(id)?;
        let row = self.sparse.table(slot).row_of(from.index, to.index)?;
        Some((slot, row))
    }

    // ========== Resource operations ==========

    pub fn contains_resource<T: Reflect>(&self) -> bool {
        self.types
            .id_of::<T>()
            .is_some_and(|id| self.resources.contains_key(&id))
    }

    /// Shared access to a resource
    ///
    /// # Panics
    /// Panics when the resource was never stored; that is a programmer
    /// error, not a recoverable condition.
    pub fn read_resource<T: Reflect>(&self) -> Res<'_, T> {
        self.try_read_resource::<T>().unwrap_or_else(|| {
            panic!("resource `{}` is not stored", std::any::type_name::<T>())
        })
    }

    pub fn try_read_resource<T: Reflect>(&self) -> Option<Res<'_, T>> {
        let id = self.types.id_of::<T>()?;
        let cell = self.resources.get(&id)?;
        Some(Res {
            guard: cell.read(),
            _marker: PhantomData,
        })
    }

    /// Exclusive access to a resource
    ///
    /// # Panics
    /// Panics when the resource was never stored.
    pub fn write_resource<T: Reflect>(&self) -> ResMut<'_, T> {
        self.try_write_resource::<T>().unwrap_or_else(|| {
            panic!("resource `{}` is not stored", std::any::type_name::<T>())
        })
    }

    pub fn try_write_resource<T: Reflect>(&self) -> Option<ResMut<'_, T>> {
        let id = self.types.id_of::<T>()?;
        let cell = self.resources.get(&id)?;
        Some(ResMut {
            guard: cell.write(),
            _marker: PhantomData,
        })
    }

    // ========== Observers ==========

    /// Register an observer for `(kind, data_type)`
    pub fn observe(
        &mut self,
        kind: ObserverKind,
        data_type: DataTypeId,
        name: impl Into<String>,
        callback: impl Fn(&mut World, Entity) + Send + Sync + 'static,
    ) -> ObserverId {
        self.observers
            .register(kind, data_type, name, Box::new(callback))
    }

    pub fn observe_add<T: Reflect>(
        &mut self,
        name: impl Into<String>,
        callback: impl Fn(&mut World, Entity) + Send + Sync + 'static,
    ) -> ObserverId {
        let id = self.component_id::<T>();
        self.observe(ObserverKind::Add, id, name, callback)
    }

    pub fn observe_remove<T: Reflect>(
        &mut self,
        name: impl Into<String>,
        callback: impl Fn(&mut World, Entity) + Send + Sync + 'static,
    ) -> ObserverId {
        let id = self.component_id::<T>();
        self.observe(ObserverKind::Remove, id, name, callback)
    }

    pub fn observe_relate<T: Reflect>(
        &mut self,
        name: impl Into<String>,
        callback: impl Fn(&mut World, Entity) + Send + Sync + 'static,
    ) -> ObserverId {
        let id = self.relation_id::<T>();
        self.observe(ObserverKind::Relate, id, name, callback)
    }

    pub fn observe_unrelate<T: Reflect>(
        &mut self,
        name: impl Into<String>,
        callback: impl Fn(&mut World, Entity) + Send + Sync + 'static,
    ) -> ObserverId {
        let id = self.relation_id::<T>();
        self.observe(ObserverKind::Unrelate, id, name, callback)
    }

    /// Commands deferred from inside observers, applied by the running
    /// commit cycle (or the next one)
    pub fn deferred(&self) -> crate::command::Commands<'_> {
        crate::command::Commands::new(self, &self.deferred)
    }

    // ========== Blueprints ==========

    /// Spawn a blueprint, mapping its names to the created entities
    ///
    /// Entities land in creation order; add/relate observers run once each
    /// after the whole batch is in place.
    pub fn spawn_blueprint(&mut self, blueprint: &Blueprint) -> Result<AHashMap<String, Entity>> {
        let mut events = Vec::new();
        let spawned = self.spawn_blueprint_internal(blueprint, &mut events)?;
        self.fire_all(events);
        Ok(spawned)
    }

    fn spawn_blueprint_internal(
        &mut self,
        blueprint: &Blueprint,
        events: &mut Vec<PendingEvent>,
    ) -> Result<AHashMap<String, Entity>> {
        // Resolve every type first so a bad blueprint changes nothing.
        let mut component_ids = Vec::with_capacity(blueprint.components.len());
        for component in &blueprint.components {
            let id = self
                .types
                .id_of_name(&component.type_name)
                .ok_or_else(|| EcsError::UnknownType(component.type_name.clone()))?;
            self.types.expect_kind(id, TypeKind::Component)?;
            component_ids.push(id);
        }
        let mut relation_ids = Vec::with_capacity(blueprint.relations.len());
        for relation in &blueprint.relations {
            let id = self
                .types
                .id_of_name(&relation.type_name)
                .ok_or_else(|| EcsError::UnknownType(relation.type_name.clone()))?;
            self.types
                .expect_kind(id, TypeKind::Relation(RelationFlags::default()))?;
            relation_ids.push(id);
        }

        let entities: Vec<Entity> = blueprint.names().iter().map(|_| self.create()).collect();

        for (component, &id) in blueprint.components.iter().zip(&component_ids) {
            self.add_internal(
                entities[component.entity as usize],
                id,
                component.value.duplicate(),
                events,
            );
        }
        for (relation, &id) in blueprint.relations.iter().zip(&relation_ids) {
            self.relate_internal(
                entities[relation.from as usize],
                entities[relation.to as usize],
                id,
                relation.value.duplicate(),
                events,
            );
        }

        Ok(blueprint
            .names()
            .iter()
            .cloned()
            .zip(entities)
            .collect())
    }

    // ========== Command buffer ==========

    /// Apply every queued mutation, then run observers
    ///
    /// Commands deferred by observers are applied in further rounds of the
    /// same commit, bounded by [`MAX_COMMIT_ROUNDS`].
    pub fn commit(&mut self, buffer: &CommandBuffer) -> Result<()> {
        let mut ops = buffer.take();
        let mut rounds = 0usize;

        while !ops.is_empty() {
            rounds += 1;
            if rounds > MAX_COMMIT_ROUNDS {
                return Err(EcsError::ObserverOverflow {
                    rounds,
                    trail: self.observer_trail.join(" -> "),
                });
            }

            let mut removes = Vec::new();
            let mut destroys = Vec::new();
            let mut creates = Vec::new();
            let mut adds = Vec::new();
            let mut spawns = Vec::new();
            let mut links = Vec::new();
            for op in ops {
                match op {
                    Op::Remove { entity, data_type } => removes.push((entity, data_type)),
                    Op::Destroy(entity) => destroys.push(entity),
                    Op::Create(entity) => creates.push(entity),
                    Op::Add {
                        entity,
                        data_type,
                        value,
                    } => adds.push((entity, data_type, value)),
                    Op::Spawn(blueprint) => spawns.push(blueprint),
                    link => links.push(link),
                }
            }

            let mut events = Vec::new();

            // 1. Component removals, grouped by entity.
            for (entity, data_type) in group_pairs(removes) {
                self.remove_internal(entity, data_type, &mut events);
            }

            // 2. Entity destructions.
            for entity in destroys {
                self.destroy_internal(entity, &mut events);
            }

            // 3. Reserved entities become alive.
            for entity in creates {
                if self.pool.is_valid(entity) {
                    self.activate_reserved(entity);
                }
            }

            // 4. Component insertions, grouped by entity.
            for (entity, data_type, value) in group_triples(adds) {
                self.add_internal(entity, data_type, value, &mut events);
            }

            // 5. Blueprints, in submission order.
            for blueprint in spawns {
                self.spawn_blueprint_internal(&blueprint, &mut events)?;
            }

            // 6. Relation changes, in submission order.
            for link in links {
                match link {
                    Op::Relate {
                        from,
                        to,
                        data_type,
                        value,
                    } => {
                        self.relate_internal(from, to, data_type, value, &mut events);
                    }
                    Op::Unrelate {
                        from,
                        to,
                        data_type,
                    } => {
                        self.unrelate_internal(from, to, data_type, &mut events);
                    }
                    _ => unreachable!("partitioned above"),
                }
            }

            // 7. Observers; whatever they defer feeds the next round.
            self.fire_all(events);
            ops = self.deferred.take();
        }

        Ok(())
    }

    /// Discard a buffer, releasing the entities it reserved
    pub fn abort(&mut self, buffer: &CommandBuffer) {
        for op in buffer.take() {
            if let Op::Create(entity) = op {
                self.pool.destroy(entity);
            }
        }
    }

    // ========== Internals ==========

    fn ensure_table(&mut self, archetype: ArchetypeId) {
        if self.dense.contains(archetype) {
            return;
        }
        let ids = self.graph.ids(archetype);
        let types = &self.types;
        self.dense.create(archetype, || {
            ids.iter()
                .map(|&col| (col, types.constructible(col.data_type()).clone()))
                .collect()
        });
    }

    fn activate_reserved(&mut self, entity: Entity) {
        self.pool.activate(entity);
        self.ensure_table(ArchetypeId::EMPTY);
        self.dense
            .get_mut(ArchetypeId::EMPTY)
            .expect("empty table")
            .push_row(entity.index, |_, _| {});
    }

    fn add_internal(
        &mut self,
        entity: Entity,
        data_type: DataTypeId,
        value: AnyValue,
        events: &mut Vec<PendingEvent>,
    ) -> bool {
        if !self.pool.is_alive(entity) {
            tracing::warn!(%entity, "add on stale handle");
            return false;
        }
        self.types
            .expect_kind(data_type, TypeKind::Component)
            .unwrap_or_else(|e| panic!("{e}"));

        let column = ColumnId::base(data_type);
        let source = self.pool.archetype(entity);

        if self.graph.contains(source, column) {
            // Overwrite in place.
            let table = self.dense.get_mut(source).expect("populated archetype");
            let row = table.row_of(entity.index).expect("entity row");
            let values = table.column_mut(column).expect("column");
            let slot = values.at(row);
            let elem = values.element().clone();
            unsafe { elem.destruct(slot) };
            value.consume(|ptr| unsafe { elem.move_construct(slot, ptr) });
        } else {
            let target = self.graph.with(source, column);
            self.move_dense_row(entity, source, target, Some((column, value)));
        }

        events.push((ObserverKind::Add, data_type, entity));
        true
    }

    fn remove_internal(
        &mut self,
        entity: Entity,
        data_type: DataTypeId,
        events: &mut Vec<PendingEvent>,
    ) -> bool {
        if !self.pool.is_alive(entity) {
            tracing::warn!(%entity, "remove on stale handle");
            return false;
        }
        let column = ColumnId::base(data_type);
        let source = self.pool.archetype(entity);
        if !self.graph.contains(source, column) {
            return false;
        }

        let target = self.graph.without(source, column);
        self.move_dense_row(entity, source, target, None);
        events.push((ObserverKind::Remove, data_type, entity));
        true
    }

    /// Move an entity's dense row along one archetype graph edge
    ///
    /// `inserted` carries the value of the single column the target has and
    /// the source lacks, when adding.
    fn move_dense_row(
        &mut self,
        entity: Entity,
        source: ArchetypeId,
        target: ArchetypeId,
        inserted: Option<(ColumnId, AnyValue)>,
    ) {
        self.ensure_table(target);
        let index = entity.index;
        let (src, dst) = self.dense.pair_mut(source, target);
        let src_row = src.row_of(index).expect("entity missing from its table");

        let mut inserted = inserted;
        dst.push_row(index, |column, values| {
            if let Some(src_column) = src.column(column) {
                // Surviving column: move the bytes across tables.
                unsafe { values.push_move(src_column.at(src_row)) };
            } else {
                let (expected, value) = inserted.take().expect("missing value for new column");
                debug_assert_eq!(expected, column);
                value.consume(|ptr| unsafe { values.push_move(ptr) });
            }
        });

        src.swap_erase_with(src_row, |column, values, row| {
            if dst.has_column(column) {
                // Moved out above; close the hole without dropping.
                unsafe { values.swap_remove_forget(row) };
            } else {
                values.swap_remove_drop(row);
            }
        });

        self.pool.set_archetype(entity, target);
        self.sparse.move_entity(source, target, index);
    }

    fn destroy_internal(&mut self, entity: Entity, events: &mut Vec<PendingEvent>) -> bool {
        if !self.pool.is_valid(entity) {
            tracing::warn!(%entity, "destroy on stale handle");
            return false;
        }
        let index = entity.index;
        let was_alive = self.pool.is_alive(entity);

        // Sever tree relations edge by edge, so closure rows crossing this
        // entity are stripped with them.
        let tree_types: Vec<DataTypeId> = self
            .types
            .relations()
            .filter(|&ty| self.types.relation_flags(ty).is_some_and(|f| f.tree))
            .collect();
        for ty in tree_types {
            if let Some(parent) = self.tree_parent(ty, index) {
                self.tree_unlink(ty, index, parent);
                events.push((ObserverKind::Unrelate, ty, entity));
            }
            for child in self.tree_children(ty, index) {
                let child_entity = self.pool.entity_of_index(child);
                self.tree_unlink(ty, child, index);
                events.push((ObserverKind::Unrelate, ty, child_entity));
            }
        }

        let archetype = self.pool.archetype(entity);

        // Remaining direct relations; symmetric mirrors collapse to one event.
        let mut severed: Vec<(DataTypeId, u32, u32)> = Vec::new();
        if was_alive {
            for ty in self.types.relations().collect::<Vec<_>>() {
                let symmetric = self
                    .types
                    .relation_flags(ty)
                    .is_some_and(|f| f.symmetric);
                let Some(type_index) = self.sparse.type_index(ty) else {
                    continue;
                };
                let mut slots = type_index.from(archetype).to_vec();
                for &slot in type_index.to(archetype) {
                    if !slots.contains(&slot) {
                        slots.push(slot);
                    }
                }
                for slot in slots {
                    if self.sparse.id_of_slot(slot).depth != 0 {
                        continue;
                    }
                    let table = self.sparse.table(slot);
                    for row in 0..table.len() {
                        let (from, to) = (table.from(row), table.to(row));
                        if from != index && to != index {
                            continue;
                        }
                        if symmetric
                            && severed
                                .iter()
                                .any(|&(t, f, tto)| t == ty && f == to && tto == from)
                        {
                            continue;
                        }
                        severed.push((ty, from, to));
                    }
                }
            }
        }
        for &(ty, from, _) in &severed {
            let observed = if from == index {
                entity
            } else {
                self.pool.entity_of_index(from)
            };
            events.push((ObserverKind::Unrelate, ty, observed));
        }
        self.sparse.erase_entity(archetype, index);

        // Drop the dense row, noting a removal event per column.
        if was_alive {
            if let Some(table) = self.dense.get_mut(archetype) {
                if let Some(row) = table.row_of(index) {
                    let columns: Vec<ColumnId> = table.column_ids().collect();
                    table.swap_erase(row);
                    for column in columns {
                        events.push((ObserverKind::Remove, column.data_type(), entity));
                    }
                }
            }
        }

        self.pool.destroy(entity);
        tracing::debug!(%entity, "destroyed entity");
        true
    }

    fn relate_internal(
        &mut self,
        from: Entity,
        to: Entity,
        data_type: DataTypeId,
        value: AnyValue,
        events: &mut Vec<PendingEvent>,
    ) -> bool {
        if !self.pool.is_alive(from) || !self.pool.is_alive(to) {
            tracing::warn!(%from, %to, "relate on stale handle");
            return false;
        }
        let flags = match self.types.kind(data_type) {
            TypeKind::Relation(flags) => flags,
            _ => panic!("type `{}` is not a relation", self.types.name(data_type)),
        };
        let (fi, ti) = (from.index, to.index);

        if flags.tree {
            if fi == ti {
                tracing::warn!(%from, "tree relation self-edge rejected");
                return false;
            }
            if self.tree_ancestors(data_type, ti).iter().any(|&(a, _)| a == fi) {
                tracing::warn!(%from, %to, "tree relation cycle rejected");
                return false;
            }

            if let Some(old) = self.tree_parent(data_type, fi) {
                self.tree_unlink(data_type, fi, old);
                events.push((ObserverKind::Unrelate, data_type, from));
            }

            // Distances: seed entries are the endpoints themselves.
            let mut lower = vec![(fi, 0u32)];
            lower.extend(
                self.tree_descendants(data_type, fi)
                    .into_iter()
                    .map(|(d, bucket)| (d, bucket + 1)),
            );
            let mut upper = vec![(ti, 0u32)];
            upper.extend(
                self.tree_ancestors(data_type, ti)
                    .into_iter()
                    .map(|(a, bucket)| (a, bucket + 1)),
            );

            // Synthesized rows copy the value; the direct row consumes it.
            for &(d, dd) in &lower {
                for &(a, da) in &upper {
                    if d == fi && a == ti {
                        continue;
                    }
                    let slot = self.relation_slot(data_type, d, a, dd + da);
                    unsafe {
                        self.sparse.table_mut(slot).insert_copy(d, a, value.as_ptr());
                    }
                }
            }
            let slot = self.relation_slot(data_type, fi, ti, 0);
            let table = self.sparse.table_mut(slot);
            value.consume(|ptr| unsafe {
                table.insert_move(fi, ti, ptr);
            });
        } else if flags.symmetric {
            let mirror = self.relation_slot(data_type, ti, fi, 0);
            unsafe {
                self.sparse.table_mut(mirror).insert_copy(ti, fi, value.as_ptr());
            }
            let slot = self.relation_slot(data_type, fi, ti, 0);
            let table = self.sparse.table_mut(slot);
            value.consume(|ptr| unsafe {
                table.insert_move(fi, ti, ptr);
            });
        } else {
            let slot = self.relation_slot(data_type, fi, ti, 0);
            let table = self.sparse.table_mut(slot);
            value.consume(|ptr| unsafe {
                table.insert_move(fi, ti, ptr);
            });
        }

        events.push((ObserverKind::Relate, data_type, from));
        true
    }

    fn unrelate_internal(
        &mut self,
        from: Entity,
        to: Entity,
        data_type: DataTypeId,
        events: &mut Vec<PendingEvent>,
    ) -> bool {
        if !self.pool.is_valid(from) || !self.pool.is_valid(to) {
            return false;
        }
        let flags = match self.types.kind(data_type) {
            TypeKind::Relation(flags) => flags,
            _ => panic!("type `{}` is not a relation", self.types.name(data_type)),
        };
        let (fi, ti) = (from.index, to.index);

        let removed = if flags.tree {
            if self.tree_parent(data_type, fi) == Some(ti) {
                self.tree_unlink(data_type, fi, ti);
                true
            } else {
                false
            }
        } else if flags.symmetric {
            let direct = self.erase_direct(data_type, fi, ti);
            let mirror = self.erase_direct(data_type, ti, fi);
            direct || mirror
        } else {
            self.erase_direct(data_type, fi, ti)
        };

        if removed {
            events.push((ObserverKind::Unrelate, data_type, from));
        }
        removed
    }

    fn relation_slot(&mut self, data_type: DataTypeId, from: u32, to: u32, depth: u32) -> usize {
        let id = SparseRelationTableId::new(
            data_type,
            self.pool.archetype_of_index(from),
            self.pool.archetype_of_index(to),
            depth,
        );
        let elem = self.types.constructible(data_type).clone();
        self.sparse.create(id, || AnyVec::new(elem))
    }

    fn erase_direct(&mut self, data_type: DataTypeId, from: u32, to: u32) -> bool {
        let id = SparseRelationTableId::new(
            data_type,
            self.pool.archetype_of_index(from),
            self.pool.archetype_of_index(to),
            0,
        );
        match self.sparse.slot_of(id) {
            Some(slot) => self.sparse.table_mut(slot).erase(from, to),
            None => false,
        }
    }

    /// Direct parent of `index` under a tree relation
    fn tree_parent(&self, data_type: DataTypeId, index: u32) -> Option<u32> {
        let archetype = self.pool.archetype_of_index(index);
        let type_index = self.sparse.type_index(data_type)?;
        for &slot in type_index.from(archetype) {
            if self.sparse.id_of_slot(slot).depth != 0 {
                continue;
            }
            let table = self.sparse.table(slot);
            for row in 0..table.len() {
                if table.from(row) == index {
                    return Some(table.to(row));
                }
            }
        }
        None
    }

    /// Direct children of `index` under a tree relation
    fn tree_children(&self, data_type: DataTypeId, index: u32) -> Vec<u32> {
        let archetype = self.pool.archetype_of_index(index);
        let mut children = Vec::new();
        if let Some(type_index) = self.sparse.type_index(data_type) {
            for &slot in type_index.to(archetype) {
                if self.sparse.id_of_slot(slot).depth != 0 {
                    continue;
                }
                let table = self.sparse.table(slot);
                for row in 0..table.len() {
                    if table.to(row) == index {
                        children.push(table.from(row));
                    }
                }
            }
        }
        children
    }

    /// All `(ancestor, depth bucket)` rows leaving `index`
    fn tree_ancestors(&self, data_type: DataTypeId, index: u32) -> Vec<(u32, u32)> {
        let archetype = self.pool.archetype_of_index(index);
        let mut ancestors = Vec::new();
        if let Some(type_index) = self.sparse.type_index(data_type) {
            for &slot in type_index.from(archetype) {
                let depth = self.sparse.id_of_slot(slot).depth;
                let table = self.sparse.table(slot);
                for row in 0..table.len() {
                    if table.from(row) == index {
                        ancestors.push((table.to(row), depth));
                    }
                }
            }
        }
        ancestors
    }

    /// All `(descendant, depth bucket)` rows arriving at `index`
    fn tree_descendants(&self, data_type: DataTypeId, index: u32) -> Vec<(u32, u32)> {
        let archetype = self.pool.archetype_of_index(index);
        let mut descendants = Vec::new();
        if let Some(type_index) = self.sparse.type_index(data_type) {
            for &slot in type_index.to(archetype) {
                let depth = self.sparse.id_of_slot(slot).depth;
                let table = self.sparse.table(slot);
                for row in 0..table.len() {
                    if table.to(row) == index {
                        descendants.push((table.from(row), depth));
                    }
                }
            }
        }
        descendants
    }

    /// Erase every closure row between the subtree of `from` and the
    /// ancestor chain of `to`, including the direct edge.
    fn tree_unlink(&mut self, data_type: DataTypeId, from: u32, to: u32) {
        let mut lower = vec![from];
        lower.extend(self.tree_descendants(data_type, from).into_iter().map(|(d, _)| d));
        let mut upper = vec![to];
        upper.extend(self.tree_ancestors(data_type, to).into_iter().map(|(a, _)| a));

        for &d in &lower {
            let archetype = self.pool.archetype_of_index(d);
            let slots: Vec<usize> = self
                .sparse
                .type_index(data_type)
                .map(|ti| ti.from(archetype).to_vec())
                .unwrap_or_default();
            for &a in &upper {
                for &slot in &slots {
                    self.sparse.table_mut(slot).erase(d, a);
                }
            }
        }
    }

    fn fire(&mut self, kind: ObserverKind, data_type: DataTypeId, entity: Entity) {
        let hooks = self.observers.matching(kind, data_type);
        if hooks.is_empty() {
            return;
        }
        self.observer_trail
            .push(format!("{}({})", kind.label(), self.types.name(data_type)));
        if self.observer_trail.len() > MAX_OBSERVER_DEPTH {
            let trail = self.observer_trail.join(" -> ");
            panic!("observer recursion exceeded {MAX_OBSERVER_DEPTH} levels: {trail}");
        }
        for hook in hooks {
            (hook.callback)(self, entity);
        }
        self.observer_trail.pop();
    }

    fn fire_all(&mut self, events: Vec<PendingEvent>) {
        for (kind, data_type, entity) in events {
            self.fire(kind, data_type, entity);
        }
    }

    // ========== Accessors for queries and the executor ==========

    pub fn archetype_graph(&self) -> &ArchetypeGraph {
        &self.graph
    }

    pub(crate) fn dense_tables(&self) -> &DenseTableRegistry {
        &self.dense
    }

    pub(crate) fn sparse_tables(&self) -> &SparseRelationTableRegistry {
        &self.sparse
    }

    pub(crate) fn pool(&self) -> &EntityPool {
        &self.pool
    }

    pub(crate) fn column_version(&self, archetype: ArchetypeId, column: ColumnId) -> u64 {
        self.dense
            .get(archetype)
            .map_or(0, |table| table.column_version(column))
    }
}

/// Group `(entity, value)` pairs by entity, preserving first-seen entity
/// order and per-entity submission order.
fn group_pairs<V>(pairs: Vec<(Entity, V)>) -> Vec<(Entity, V)> {
    let mut order: Vec<Entity> = Vec::new();
    let mut grouped: AHashMap<Entity, Vec<V>> = AHashMap::new();
    for (entity, value) in pairs {
        grouped
            .entry(entity)
            .or_insert_with(|| {
                order.push(entity);
                Vec::new()
            })
            .push(value);
    }
    let mut out = Vec::new();
    for entity in order {
        for value in grouped.remove(&entity).unwrap_or_default() {
            out.push((entity, value));
        }
    }
    out
}

fn group_triples<V>(triples: Vec<(Entity, DataTypeId, V)>) -> Vec<(Entity, DataTypeId, V)> {
    let paired: Vec<(Entity, (DataTypeId, V))> = triples
        .into_iter()
        .map(|(e, t, v)| (e, (t, v)))
        .collect();
    group_pairs(paired)
        .into_iter()
        .map(|(e, (t, v))| (e, t, v))
        .collect()
}

fn prune_pipe<T: Send + Sync + 'static>(world: &World) {
    if let Some(pipe) = world.try_read_resource::<EventPipe<T>>() {
        pipe.prune();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impl_reflect;
    use crate::reflect::{ConstructibleTrait, SymmetricTrait, TreeTrait, Type};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default, Debug, PartialEq)]
    struct Pos {
        x: f32,
        y: f32,
        z: f32,
    }
    impl_reflect!(Pos, "Pos", fields: [x, y, z]);

    #[derive(Clone, Default, Debug, PartialEq)]
    struct Name(String);
    impl_reflect!(Name, "Name");

    #[derive(Clone, Default)]
    struct ChildOf;

    impl Reflect for ChildOf {
        fn reflect() -> Type {
            Type::new("ChildOf")
                .with(
                    ConstructibleTrait::typed::<ChildOf>()
                        .with_default()
                        .with_copy()
                        .build(),
                )
                .with(TreeTrait)
        }
    }

    #[derive(Clone, Default)]
    struct Neighbor;

    impl Reflect for Neighbor {
        fn reflect() -> Type {
            Type::new("Neighbor")
                .with(
                    ConstructibleTrait::typed::<Neighbor>()
                        .with_default()
                        .with_copy()
                        .build(),
                )
                .with(SymmetricTrait)
        }
    }

    #[test]
    fn component_lifecycle() {
        let mut world = World::new();
        let pos = world.register_component::<Pos>();
        let entity = world.create();

        assert!(world.add(entity, Pos { x: 1.0, y: 2.0, z: 3.0 }));
        assert_eq!(
            world.get::<Pos>(entity),
            Some(&Pos { x: 1.0, y: 2.0, z: 3.0 })
        );
        assert_eq!(
            world.archetype_of(entity),
            Some(world.archetype_graph().with(ArchetypeId::EMPTY, ColumnId::base(pos)))
        );

        assert!(world.remove::<Pos>(entity));
        assert_eq!(world.archetype_of(entity), Some(ArchetypeId::EMPTY));
        assert_eq!(world.get::<Pos>(entity), None);

        assert!(world.destroy(entity));
        assert!(!world.is_valid(entity));
        assert!(!world.add(entity, Pos::default()));
    }

    #[test]
    fn add_overwrites_in_place() {
        let mut world = World::new();
        world.register_component::<Name>();
        let entity = world.create();
        world.add(entity, Name("a".into()));
        let archetype = world.archetype_of(entity);
        world.add(entity, Name("b".into()));
        assert_eq!(world.archetype_of(entity), archetype);
        assert_eq!(world.get::<Name>(entity), Some(&Name("b".into())));
    }

    #[test]
    fn surviving_columns_move_with_the_entity() {
        let mut world = World::new();
        world.register_component::<Pos>();
        world.register_component::<Name>();
        let entity = world.create();
        world.add(entity, Name("keep".into()));
        world.add(entity, Pos { x: 1.0, ..Pos::default() });
        world.remove::<Pos>(entity);
        assert_eq!(world.get::<Name>(entity), Some(&Name("keep".into())));
    }

    #[test]
    fn symmetric_relations_mirror() {
        let mut world = World::new();
        world.register_relation::<Neighbor>();
        let a = world.create();
        let b = world.create();

        assert!(world.relate(a, b, Neighbor));
        assert!(world.related::<Neighbor>(a, b));
        assert!(world.related::<Neighbor>(b, a));

        assert!(world.unrelate::<Neighbor>(b, a));
        assert!(!world.related::<Neighbor>(a, b));
        assert!(!world.related::<Neighbor>(b, a));
    }

    #[test]
    fn tree_relations_replace_the_parent() {
        let mut world = World::new();
        world.register_relation::<ChildOf>();
        let child = world.create();
        let first = world.create();
        let second = world.create();

        assert!(world.relate(child, first, ChildOf));
        assert!(world.relate(child, second, ChildOf));
        assert!(!world.related::<ChildOf>(child, first));
        assert!(world.related::<ChildOf>(child, second));
    }

    #[test]
    fn tree_relations_reject_cycles() {
        let mut world = World::new();
        world.register_relation::<ChildOf>();
        let a = world.create();
        let b = world.create();
        let c = world.create();

        assert!(world.relate(b, a, ChildOf));
        assert!(world.relate(c, b, ChildOf));
        assert!(!world.relate(a, c, ChildOf));
        assert!(!world.relate(a, a, ChildOf));
    }

    #[test]
    fn relations_survive_archetype_moves() {
        let mut world = World::new();
        world.register_component::<Pos>();
        world.register_relation::<Neighbor>();
        let a = world.create();
        let b = world.create();
        world.relate(a, b, Neighbor);

        world.add(a, Pos::default());
        assert!(world.related::<Neighbor>(a, b));
        assert!(world.related::<Neighbor>(b, a));
    }

    #[test]
    fn destroy_severs_relations() {
        let mut world = World::new();
        world.register_relation::<ChildOf>();
        let root = world.create();
        let mid = world.create();
        let leaf = world.create();
        world.relate(mid, root, ChildOf);
        world.relate(leaf, mid, ChildOf);

        world.destroy(mid);
        assert!(!world.related::<ChildOf>(leaf, mid));
        // The closure row through the destroyed entity is gone too.
        assert!(world.tree_ancestors(world.relation_id::<ChildOf>(), leaf.index).is_empty());
    }

    #[test]
    fn observers_fire_in_registration_order() {
        let mut world = World::new();
        world.register_component::<Pos>();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let first = log.clone();
        world.observe_add::<Pos>("first", move |_, _| first.lock().push(1));
        let second = log.clone();
        world.observe_add::<Pos>("second", move |_, _| second.lock().push(2));

        let entity = world.create();
        world.add(entity, Pos::default());
        assert_eq!(*log.lock(), vec![1, 2]);
    }

    #[test]
    fn remove_observers_fire_on_destroy() {
        let mut world = World::new();
        world.register_component::<Pos>();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        world.observe_remove::<Pos>("count", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let entity = world.create();
        world.add(entity, Pos::default());
        world.destroy(entity);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resources_lock_and_deref() {
        let mut world = World::new();
        world.insert_resource(Name("config".into()));
        {
            let mut name = world.write_resource::<Name>();
            name.0.push_str("!");
        }
        assert_eq!(world.read_resource::<Name>().0, "config!");
    }

    #[test]
    fn blueprint_spawn_lands_in_creation_order() {
        let mut world = World::new();
        world.register_component::<Name>();
        world.register_relation::<ChildOf>();

        let mut bp = Blueprint::new();
        let root = bp.create("root");
        let limb = bp.create("limb");
        bp.add(root, Name("root".into()));
        bp.add(limb, Name("limb".into()));
        bp.relate(limb, root, ChildOf);

        let spawned = world.spawn_blueprint(&bp).unwrap();
        let root = spawned["root"];
        let limb = spawned["limb"];
        assert!(root.index < limb.index);
        assert!(world.related::<ChildOf>(limb, root));
        assert_eq!(world.get::<Name>(root), Some(&Name("root".into())));
    }
}
