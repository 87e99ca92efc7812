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

//! Registry of the data types a world can store
//!
//! Maps names and Rust type identities to dense [`DataTypeId`]s and records
//! whether each type is a component, a relation or a resource. Registration
//! rejects types without construction support; relation flags are read off
//! the descriptor's [`SymmetricTrait`]/[`TreeTrait`] markers.

use std::any::TypeId;
use std::sync::Arc;

use ahash::AHashMap;

use crate::error::{EcsError, Result};
use crate::reflect::{ConstructibleTrait, Reflect, SymmetricTrait, TreeTrait, Type};

/// Index of a registered data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataTypeId(pub u32);

/// Behavior flags of a relation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelationFlags {
    pub symmetric: bool,
    pub tree: bool,
}

/// What a registered type is used as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Component,
    Relation(RelationFlags),
    Resource,
}

impl TypeKind {
    fn describe(self) -> &'static str {
        match self {
            TypeKind::Component => "component",
            TypeKind::Relation(_) => "relation",
            TypeKind::Resource => "resource",
        }
    }
}

struct Entry {
    ty: Arc<Type>,
    kind: TypeKind,
    constructible: ConstructibleTrait,
}

/// Named bi-directional map of registered types
#[derive(Default)]
pub struct Types {
    entries: Vec<Entry>,
    by_name: AHashMap<String, DataTypeId>,
    by_rust: AHashMap<TypeId, DataTypeId>,
}

impl Types {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor under the given kind
    ///
    /// Fails when the name is taken or when the descriptor lacks the
    /// construction trait. Relations read their flags off the descriptor and
    /// additionally require copy support (mirrored and synthesized rows are
    /// copies); a relation may not be both symmetric and a tree.
    pub fn register(&mut self, ty: Type, mut kind: TypeKind) -> Result<DataTypeId> {
        if self.by_name.contains_key(ty.name()) {
            return Err(EcsError::AlreadyRegistered(ty.name().to_string()));
        }

        let Some(constructible) = ty.try_get::<ConstructibleTrait>() else {
            return Err(EcsError::MissingTrait {
                name: ty.name().to_string(),
                trait_name: "Constructible",
            });
        };
        let constructible = constructible.clone();

        if let TypeKind::Relation(flags) = &mut kind {
            flags.symmetric |= ty.has::<SymmetricTrait>();
            flags.tree |= ty.has::<TreeTrait>();
            if flags.symmetric && flags.tree {
                return Err(EcsError::InvalidRelation(
                    ty.name().to_string(),
                    "a relation cannot be both symmetric and a tree",
                ));
            }
            if (flags.symmetric || flags.tree) && !constructible.has_copy() {
                return Err(EcsError::MissingTrait {
                    name: ty.name().to_string(),
                    trait_name: "Constructible::copy",
                });
            }
        }

        let id = DataTypeId(self.entries.len() as u32);
        self.by_name.insert(ty.name().to_string(), id);
        self.entries.push(Entry {
            ty: Arc::new(ty),
            kind,
            constructible,
        });
        tracing::debug!(id = id.0, kind = kind.describe(), "registered type");
        Ok(id)
    }

    /// Register the descriptor of `T`, remembering its Rust identity
    pub fn register_rust<T: Reflect>(&mut self, kind: TypeKind) -> Result<DataTypeId> {
        let rust = TypeId::of::<T>();
        if self.by_rust.contains_key(&rust) {
            return Err(EcsError::AlreadyRegistered(
                std::any::type_name::<T>().to_string(),
            ));
        }
        let id = self.register(T::reflect(), kind)?;
        self.by_rust.insert(rust, id);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: DataTypeId) -> bool {
        (id.0 as usize) < self.entries.len()
    }

    pub fn id_of_name(&self, name: &str) -> Option<DataTypeId> {
        self.by_name.get(name).copied()
    }

    pub fn id_of<T: 'static>(&self) -> Option<DataTypeId> {
        self.by_rust.get(&TypeId::of::<T>()).copied()
    }

    pub fn descriptor(&self, id: DataTypeId) -> &Arc<Type> {
        &self.entries[id.0 as usize].ty
    }

    pub fn name(&self, id: DataTypeId) -> &str {
        self.entries[id.0 as usize].ty.name()
    }

    pub fn kind(&self, id: DataTypeId) -> TypeKind {
        self.entries[id.0 as usize].kind
    }

    pub fn constructible(&self, id: DataTypeId) -> &ConstructibleTrait {
        &self.entries[id.0 as usize].constructible
    }

    /// Flags of a relation type; `None` for other kinds
    pub fn relation_flags(&self, id: DataTypeId) -> Option<RelationFlags> {
        match self.kind(id) {
            TypeKind::Relation(flags) => Some(flags),
            _ => None,
        }
    }

    /// Ids of every registered relation type
    pub fn relations(&self) -> impl Iterator<Item = DataTypeId> + '_ {
        self.entries.iter().enumerate().filter_map(|(i, e)| {
            matches!(e.kind, TypeKind::Relation(_)).then_some(DataTypeId(i as u32))
        })
    }

    /// Check that `id` is registered under the expected kind
    pub fn expect_kind(&self, id: DataTypeId, expected: TypeKind) -> Result<()> {
        let kind = self.kind(id);
        let matches = matches!(
            (kind, expected),
            (TypeKind::Component, TypeKind::Component)
                | (TypeKind::Relation(_), TypeKind::Relation(_))
                | (TypeKind::Resource, TypeKind::Resource)
        );
        if matches {
            Ok(())
        } else {
            Err(EcsError::WrongKind {
                name: self.name(id).to_string(),
                kind: kind.describe(),
                expected: expected.describe(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impl_reflect;
    use crate::reflect;

    #[derive(Clone, Default)]
    struct Pos {
        x: f32,
    }
    impl_reflect!(Pos, "Pos", fields: [x]);

    #[derive(Clone, Default)]
    struct ChildOf;

    impl Reflect for ChildOf {
        fn reflect() -> Type {
            Type::new("ChildOf")
                .with(
                    reflect::ConstructibleTrait::typed::<ChildOf>()
                        .with_default()
                        .with_copy()
                        .build(),
                )
                .with(TreeTrait)
        }
    }

    #[test]
    fn register_and_look_up() {
        let mut types = Types::new();
        let id = types.register_rust::<Pos>(TypeKind::Component).unwrap();
        assert_eq!(types.id_of::<Pos>(), Some(id));
        assert_eq!(types.id_of_name("Pos"), Some(id));
        assert_eq!(types.kind(id), TypeKind::Component);
    }

    #[test]
    fn double_registration_fails() {
        let mut types = Types::new();
        types.register_rust::<Pos>(TypeKind::Component).unwrap();
        assert!(matches!(
            types.register_rust::<Pos>(TypeKind::Component),
            Err(EcsError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn relation_flags_from_descriptor() {
        let mut types = Types::new();
        let id = types
            .register_rust::<ChildOf>(TypeKind::Relation(RelationFlags::default()))
            .unwrap();
        let flags = types.relation_flags(id).unwrap();
        assert!(flags.tree);
        assert!(!flags.symmetric);
    }

    #[test]
    fn non_constructible_rejected() {
        let mut types = Types::new();
        let bare = Type::new("Bare");
        assert!(matches!(
            types.register(bare, TypeKind::Component),
            Err(EcsError::MissingTrait { .. })
        ));
    }
}
