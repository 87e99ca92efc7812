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

//! Spawn templates: a detached mini-world
//!
//! A blueprint holds named proto-entities with component and relation
//! buffers, no observers and no stable indices. Spawning it creates real
//! entities in creation order and runs add/relate observers once, after the
//! whole batch has landed. Types are recorded by registry name so a
//! blueprint built far from a world still resolves against it at spawn time.

use ahash::AHashMap;

use crate::any_vec::AnyValue;
use crate::reflect::{ConstructibleTrait, Reflect};

/// Handle to a proto-entity inside a blueprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlueprintEntity(pub(crate) u32);

pub(crate) struct BlueprintComponent {
    pub entity: u32,
    pub type_name: String,
    pub value: AnyValue,
}

pub(crate) struct BlueprintRelation {
    pub from: u32,
    pub to: u32,
    pub type_name: String,
    pub value: AnyValue,
}

/// A reusable batch of proto-entities
pub struct Blueprint {
    names: Vec<String>,
    by_name: AHashMap<String, u32>,
    pub(crate) components: Vec<BlueprintComponent>,
    pub(crate) relations: Vec<BlueprintRelation>,
}

impl Default for Blueprint {
    fn default() -> Self {
        Self::new()
    }
}

impl Blueprint {
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            by_name: AHashMap::new(),
            components: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Create a named proto-entity
    ///
    /// # Panics
    /// Panics if the name is taken; blueprint names are unique keys.
    pub fn create(&mut self, name: impl Into<String>) -> BlueprintEntity {
        let name = name.into();
        assert!(
            !self.by_name.contains_key(&name),
            "blueprint already has an entity named `{name}`"
        );
        let id = self.names.len() as u32;
        self.by_name.insert(name.clone(), id);
        self.names.push(name);
        BlueprintEntity(id)
    }

    /// Look up a proto-entity by name
    pub fn entity(&self, name: &str) -> Option<BlueprintEntity> {
        self.by_name.get(name).copied().map(BlueprintEntity)
    }

    pub fn name_of(&self, entity: BlueprintEntity) -> &str {
        &self.names[entity.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub(crate) fn names(&self) -> &[String] {
        &self.names
    }

    /// Attach a component value to a proto-entity
    ///
    /// A second value of the same type overwrites the first at spawn time.
    ///
    /// # Panics
    /// Panics if the type does not advertise copy support; blueprints are
    /// reusable and must be able to duplicate their values.
    pub fn add<T: Reflect>(&mut self, entity: BlueprintEntity, value: T) -> &mut Self {
        let ty = T::reflect();
        let elem = require_copy(&ty);
        self.components.push(BlueprintComponent {
            entity: entity.0,
            type_name: ty.name().to_string(),
            value: AnyValue::of(elem, value),
        });
        self
    }

    /// Relate two proto-entities
    pub fn relate<T: Reflect>(
        &mut self,
        from: BlueprintEntity,
        to: BlueprintEntity,
        value: T,
    ) -> &mut Self {
        let ty = T::reflect();
        let elem = require_copy(&ty);
        self.relations.push(BlueprintRelation {
            from: from.0,
            to: to.0,
            type_name: ty.name().to_string(),
            value: AnyValue::of(elem, value),
        });
        self
    }

    /// Append `other`, renaming its entities to `"prefix.name"`
    pub fn merge(&mut self, prefix: &str, other: &Blueprint) -> &mut Self {
        let offset = self.names.len() as u32;
        for name in &other.names {
            self.create(format!("{prefix}.{name}"));
        }
        for component in &other.components {
            self.components.push(BlueprintComponent {
                entity: component.entity + offset,
                type_name: component.type_name.clone(),
                value: component.value.duplicate(),
            });
        }
        for relation in &other.relations {
            self.relations.push(BlueprintRelation {
                from: relation.from + offset,
                to: relation.to + offset,
                type_name: relation.type_name.clone(),
                value: relation.value.duplicate(),
            });
        }
        self
    }
}

impl Clone for Blueprint {
    fn clone(&self) -> Self {
        Self {
            names: self.names.clone(),
            by_name: self.by_name.clone(),
            components: self
                .components
                .iter()
                .map(|c| BlueprintComponent {
                    entity: c.entity,
                    type_name: c.type_name.clone(),
                    value: c.value.duplicate(),
                })
                .collect(),
            relations: self
                .relations
                .iter()
                .map(|r| BlueprintRelation {
                    from: r.from,
                    to: r.to,
                    type_name: r.type_name.clone(),
                    value: r.value.duplicate(),
                })
                .collect(),
        }
    }
}

fn require_copy(ty: &crate::reflect::Type) -> ConstructibleTrait {
    let elem = ty.get::<ConstructibleTrait>();
    assert!(
        elem.has_copy(),
        "blueprint values must be copyable, `{}` is not",
        ty.name()
    );
    elem.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impl_reflect;

    #[derive(Clone, Default, PartialEq, Debug)]
    struct Health {
        points: i32,
    }
    impl_reflect!(Health, "Health", fields: [points]);

    #[test]
    fn named_entities() {
        let mut bp = Blueprint::new();
        let boss = bp.create("boss");
        bp.add(boss, Health { points: 100 });

        assert_eq!(bp.entity("boss"), Some(boss));
        assert_eq!(bp.name_of(boss), "boss");
        assert_eq!(bp.len(), 1);
    }

    #[test]
    #[should_panic(expected = "already has an entity named")]
    fn duplicate_name_panics() {
        let mut bp = Blueprint::new();
        bp.create("x");
        bp.create("x");
    }

    #[test]
    fn merge_prefixes_names() {
        let mut arm = Blueprint::new();
        let hand = arm.create("hand");
        arm.add(hand, Health { points: 5 });

        let mut body = Blueprint::new();
        body.create("torso");
        body.merge("left", &arm);

        assert!(body.entity("left.hand").is_some());
        assert_eq!(body.components.len(), 1);
        assert_eq!(body.components[0].entity, 1);
    }
}
