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

//! Entity handles and the generational pool behind them

use std::collections::VecDeque;

use parking_lot::RwLock;

use crate::archetype::ArchetypeId;

/// Handle to an entity: 32-bit index plus 32-bit generation
///
/// Indices are reused after destruction; the generation is bumped on destroy
/// so stale handles fail validity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    pub index: u32,
    pub generation: u32,
}

impl Entity {
    /// The null handle
    pub const NULL: Entity = Entity {
        index: 0,
        generation: u32::MAX,
    };

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "{}#{}", self.index, self.generation)
        }
    }
}

#[derive(Clone, Copy)]
struct Slot {
    generation: u32,
    archetype: ArchetypeId,
    alive: bool,
}

struct PoolInner {
    slots: Vec<Slot>,
    free: VecDeque<u32>,
}

/// Allocator of entity indices with free-list reuse
///
/// Interior-locked so handles can be reserved from shared references (the
/// command buffer reserves entities while systems run in parallel). Reserved
/// entities are valid but not alive until activated.
pub struct EntityPool {
    inner: RwLock<PoolInner>,
}

impl Default for EntityPool {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityPool {
    pub fn new() -> Self {
        // Slot 0 is never handed out so the null handle cannot alias a live
        // entity.
        Self {
            inner: RwLock::new(PoolInner {
                slots: vec![Slot {
                    generation: 0,
                    archetype: ArchetypeId::EMPTY,
                    alive: false,
                }],
                free: VecDeque::new(),
            }),
        }
    }

    /// Allocate an alive entity in the given archetype
    pub fn create(&self, archetype: ArchetypeId) -> Entity {
        self.allocate(archetype, true)
    }

    /// Allocate a valid-but-not-alive entity in the given archetype
    pub fn reserve(&self, archetype: ArchetypeId) -> Entity {
        self.allocate(archetype, false)
    }

    fn allocate(&self, archetype: ArchetypeId, alive: bool) -> Entity {
        let mut inner = self.inner.write();
        let index = match inner.free.pop_front() {
            Some(index) => index,
            None => {
                let index = inner.slots.len() as u32;
                inner.slots.push(Slot {
                    generation: 0,
                    archetype: ArchetypeId::EMPTY,
                    alive: false,
                });
                index
            }
        };

        let slot = &mut inner.slots[index as usize];
        slot.archetype = archetype;
        slot.alive = alive;
        Entity {
            index,
            generation: slot.generation,
        }
    }

    /// Set the alive flag of a reserved entity
    pub fn activate(&self, entity: Entity) {
        let mut inner = self.inner.write();
        let slot = &mut inner.slots[entity.index as usize];
        debug_assert_eq!(slot.generation, entity.generation);
        slot.alive = true;
    }

    /// Return an entity to the free list, bumping its generation
    ///
    /// Returns false for handles which are not valid.
    pub fn destroy(&self, entity: Entity) -> bool {
        let mut inner = self.inner.write();
        if !valid(&inner, entity) {
            return false;
        }

        let slot = &mut inner.slots[entity.index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        slot.archetype = ArchetypeId::EMPTY;
        slot.alive = false;
        inner.free.push_back(entity.index);
        true
    }

    /// Update the archetype of a valid entity
    ///
    /// # Panics
    /// Panics on an invalid handle; callers validate first.
    pub fn set_archetype(&self, entity: Entity, archetype: ArchetypeId) {
        let mut inner = self.inner.write();
        assert!(valid(&inner, entity), "set_archetype on invalid {entity}");
        inner.slots[entity.index as usize].archetype = archetype;
    }

    /// Archetype of a valid entity
    ///
    /// # Panics
    /// Panics on an invalid handle; callers validate first.
    pub fn archetype(&self, entity: Entity) -> ArchetypeId {
        let inner = self.inner.read();
        assert!(valid(&inner, entity), "archetype of invalid {entity}");
        inner.slots[entity.index as usize].archetype
    }

    /// Archetype of a live index, regardless of generation
    pub fn archetype_of_index(&self, index: u32) -> ArchetypeId {
        self.inner.read().slots[index as usize].archetype
    }

    /// Rebuild the full handle of a live index
    pub fn entity_of_index(&self, index: u32) -> Entity {
        let inner = self.inner.read();
        Entity {
            index,
            generation: inner.slots[index as usize].generation,
        }
    }

    /// Index in range and generation matching
    pub fn is_valid(&self, entity: Entity) -> bool {
        valid(&self.inner.read(), entity)
    }

    /// Valid and committed
    pub fn is_alive(&self, entity: Entity) -> bool {
        let inner = self.inner.read();
        valid(&inner, entity) && inner.slots[entity.index as usize].alive
    }

    /// Number of slots handed out and not yet destroyed
    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner.slots.len() - inner.free.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append alive entities whose archetype passes `filter`, starting at
    /// `cursor`. Returns the cursor to resume from.
    pub fn scan(
        &self,
        cursor: u32,
        mut filter: impl FnMut(ArchetypeId) -> bool,
        out: &mut Vec<Entity>,
    ) -> u32 {
        let inner = self.inner.read();
        let end = inner.slots.len() as u32;
        for index in cursor.max(1)..end {
            let slot = &inner.slots[index as usize];
            if slot.alive && filter(slot.archetype) {
                out.push(Entity {
                    index,
                    generation: slot.generation,
                });
            }
        }
        end
    }
}

fn valid(inner: &PoolInner, entity: Entity) -> bool {
    entity.index != 0
        && (entity.index as usize) < inner.slots.len()
        && inner.slots[entity.index as usize].generation == entity.generation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_destroy_reuse() {
        let pool = EntityPool::new();
        let a = pool.create(ArchetypeId::EMPTY);
        assert!(pool.is_valid(a));
        assert!(pool.is_alive(a));

        assert!(pool.destroy(a));
        assert!(!pool.is_valid(a));
        assert!(!pool.destroy(a));

        let b = pool.create(ArchetypeId::EMPTY);
        assert_eq!(b.index, a.index);
        assert_ne!(b.generation, a.generation);
        assert!(pool.is_valid(b));
    }

    #[test]
    fn stale_handles_never_revalidate() {
        let pool = EntityPool::new();
        let a = pool.create(ArchetypeId::EMPTY);
        pool.destroy(a);
        for _ in 0..8 {
            let e = pool.create(ArchetypeId::EMPTY);
            assert!(!pool.is_valid(a));
            pool.destroy(e);
        }
    }

    #[test]
    fn reserved_is_valid_not_alive() {
        let pool = EntityPool::new();
        let e = pool.reserve(ArchetypeId::EMPTY);
        assert!(pool.is_valid(e));
        assert!(!pool.is_alive(e));
        pool.activate(e);
        assert!(pool.is_alive(e));
    }

    #[test]
    fn null_is_never_valid() {
        let pool = EntityPool::new();
        assert!(!pool.is_valid(Entity::NULL));
        assert!(!pool.is_alive(Entity::NULL));
    }

    #[test]
    fn scan_resumes_from_cursor() {
        let pool = EntityPool::new();
        let a = pool.create(ArchetypeId(3));
        let _b = pool.create(ArchetypeId(4));

        let mut out = Vec::new();
        let cursor = pool.scan(0, |arch| arch == ArchetypeId(3), &mut out);
        assert_eq!(out, vec![a]);

        let c = pool.create(ArchetypeId(3));
        let mut out = Vec::new();
        pool.scan(cursor, |arch| arch == ArchetypeId(3), &mut out);
        assert_eq!(out, vec![c]);
    }
}
