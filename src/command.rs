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

//! Deferred, thread-safe structural mutations
//!
//! Systems queue mutations here instead of touching the world; a commit
//! barrier applies them in a fixed order (removals, destructions, creations,
//! insertions, blueprints, relations) and then fires observers. Until the
//! commit runs, the world sees nothing except the reserved entity handles,
//! which are valid but not alive.

use parking_lot::Mutex;

use crate::any_vec::AnyValue;
use crate::blueprint::Blueprint;
use crate::entity::Entity;
use crate::reflect::Reflect;
use crate::types::DataTypeId;
use crate::world::World;

pub(crate) enum Op {
    Create(Entity),
    Destroy(Entity),
    Add {
        entity: Entity,
        data_type: DataTypeId,
        value: AnyValue,
    },
    Remove {
        entity: Entity,
        data_type: DataTypeId,
    },
    Relate {
        from: Entity,
        to: Entity,
        data_type: DataTypeId,
        value: AnyValue,
    },
    Unrelate {
        from: Entity,
        to: Entity,
        data_type: DataTypeId,
    },
    Spawn(Blueprint),
}

/// Buffer of pending world mutations
#[derive(Default)]
pub struct CommandBuffer {
    ops: Mutex<Vec<Op>>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }

    /// Discard every queued mutation without applying it
    ///
    /// Entities reserved through this buffer are released by
    /// [`World::abort`], which calls this.
    pub fn clear(&self) {
        self.ops.lock().clear();
    }

    pub(crate) fn push(&self, op: Op) {
        self.ops.lock().push(op);
    }

    pub(crate) fn take(&self) -> Vec<Op> {
        std::mem::take(&mut *self.ops.lock())
    }

    /// Move every op of `other` to the back of this buffer
    pub fn append(&self, other: &CommandBuffer) {
        let mut drained = other.take();
        self.ops.lock().append(&mut drained);
    }
}

/// Handle systems use to queue mutations
///
/// Wraps the world (for entity reservation and type lookup) together with a
/// command buffer. All methods are usable from parallel systems.
#[derive(Clone, Copy)]
pub struct Commands<'w> {
    world: &'w World,
    buffer: &'w CommandBuffer,
}

impl<'w> Commands<'w> {
    pub fn new(world: &'w World, buffer: &'w CommandBuffer) -> Self {
        Self { world, buffer }
    }

    /// Reserve an entity, to be committed at the next barrier
    ///
    /// The handle is valid immediately, so it can be referenced by further
    /// commands, but the entity is not alive until the commit runs.
    pub fn create(&self) -> Entity {
        let entity = self.world.reserve_entity();
        self.buffer.push(Op::Create(entity));
        entity
    }

    pub fn destroy(&self, entity: Entity) {
        self.buffer.push(Op::Destroy(entity));
    }

    pub fn add<T: Reflect>(&self, entity: Entity, value: T) {
        let data_type = self.world.component_id::<T>();
        let elem = self.world.types().constructible(data_type).clone();
        self.buffer.push(Op::Add {
            entity,
            data_type,
            value: AnyValue::of(elem, value),
        });
    }

    pub fn remove<T: Reflect>(&self, entity: Entity) {
        let data_type = self.world.component_id::<T>();
        self.buffer.push(Op::Remove { entity, data_type });
    }

    pub fn relate<T: Reflect>(&self, from: Entity, to: Entity, value: T) {
        let data_type = self.world.relation_id::<T>();
        let elem = self.world.types().constructible(data_type).clone();
        self.buffer.push(Op::Relate {
            from,
            to,
            data_type,
            value: AnyValue::of(elem, value),
        });
    }

    pub fn unrelate<T: Reflect>(&self, from: Entity, to: Entity) {
        let data_type = self.world.relation_id::<T>();
        self.buffer.push(Op::Unrelate {
            from,
            to,
            data_type,
        });
    }

    /// Queue spawning a copy of `blueprint`
    pub fn spawn(&self, blueprint: &Blueprint) {
        self.buffer.push(Op::Spawn(blueprint.clone()));
    }

    pub fn world(&self) -> &'w World {
        self.world
    }
}
