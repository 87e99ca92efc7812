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

//! Runtime type descriptors
//!
//! A [`Type`] is a named descriptor carrying an open set of *traits*: value
//! structs which expose one capability of the described type (construction,
//! field access, array views, ...). Storage never sees concrete Rust types;
//! it drives everything through the traits attached to a descriptor.

pub mod collections;
pub mod constructible;
pub mod convert;
pub mod enums;
pub mod fields;
pub mod union;

use std::any::{Any, TypeId};

use rustc_hash::FxHashMap;

pub use collections::{ArrayTrait, DictionaryTrait};
pub use constructible::{ConstructibleTrait, ConstructorArgument, CustomConstructor};
pub use convert::{NullableTrait, StringConversionTrait, WrapperTrait};
pub use enums::{EnumTrait, EnumVariant, MaskBit, MaskTrait};
pub use fields::{Field, FieldsTrait};
pub use union::{UnionTrait, UnionVariant};

/// Marks a relation type as symmetric: `relate(a, b)` implies `relate(b, a)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymmetricTrait;

/// Marks a relation type as a tree: each entity holds at most one outgoing
/// edge, and transitive edges are materialized in depth buckets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeTrait;

/// Named runtime type descriptor with an open trait set
///
/// Descriptors are immutable once built; traits are attached through
/// [`Type::with`] during construction only.
pub struct Type {
    name: String,
    traits: FxHashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Type {
    /// Create a descriptor with no traits
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            traits: FxHashMap::default(),
        }
    }

    /// Attach a trait value
    ///
    /// # Panics
    /// Panics if a trait of the same Rust type was already attached. Double
    /// attachment is always a programming error.
    pub fn with<T: Any + Send + Sync>(mut self, value: T) -> Self {
        let previous = self.traits.insert(TypeId::of::<T>(), Box::new(value));
        assert!(
            previous.is_none(),
            "trait {} attached twice to type `{}`",
            std::any::type_name::<T>(),
            self.name,
        );
        self
    }

    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check whether the descriptor carries the trait `T`
    pub fn has<T: Any>(&self) -> bool {
        self.traits.contains_key(&TypeId::of::<T>())
    }

    /// Get the trait `T`, if attached
    pub fn try_get<T: Any>(&self) -> Option<&T> {
        self.traits
            .get(&TypeId::of::<T>())
            .and_then(|t| t.downcast_ref())
    }

    /// Get the trait `T`
    ///
    /// # Panics
    /// Panics if the trait is not attached.
    pub fn get<T: Any>(&self) -> &T {
        match self.try_get::<T>() {
            Some(t) => t,
            None => panic!(
                "type `{}` does not carry trait {}",
                self.name,
                std::any::type_name::<T>()
            ),
        }
    }
}

impl std::fmt::Debug for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Type")
            .field("name", &self.name)
            .field("traits", &self.traits.len())
            .finish()
    }
}

/// Types which can describe themselves with a [`Type`] descriptor
pub trait Reflect: Send + Sync + 'static {
    /// Build the descriptor for this type
    fn reflect() -> Type;
}

/// Build the descriptor of `T`
pub fn reflect<T: Reflect>() -> Type {
    T::reflect()
}

/// Resolves the type name of a struct field through a reference-projecting
/// function pointer. Used by [`impl_reflect!`] expansions.
pub fn field_type_name<S, F>(_project: fn(&S) -> &F) -> &'static str {
    std::any::type_name::<F>()
}

/// Implement [`Reflect`] for a struct
///
/// Requires `Clone + Default`. The optional `fields:` arm also attaches a
/// [`FieldsTrait`] listing the named fields.
#[macro_export]
macro_rules! impl_reflect {
    ($t:ty, $name:expr) => {
        impl $crate::reflect::Reflect for $t {
            fn reflect() -> $crate::reflect::Type {
                $crate::reflect::Type::new($name).with(
                    $crate::reflect::ConstructibleTrait::typed::<$t>()
                        .with_default()
                        .with_copy()
                        .build(),
                )
            }
        }
    };

    ($t:ty, $name:expr, fields: [$($field:ident),* $(,)?]) => {
        impl $crate::reflect::Reflect for $t {
            fn reflect() -> $crate::reflect::Type {
                $crate::reflect::Type::new($name)
                    .with(
                        $crate::reflect::ConstructibleTrait::typed::<$t>()
                            .with_default()
                            .with_copy()
                            .build(),
                    )
                    .with($crate::reflect::FieldsTrait::new(vec![
                        $($crate::reflect::Field::new(
                            stringify!($field),
                            $crate::reflect::field_type_name::<$t, _>(|s| &s.$field),
                            |ptr| unsafe {
                                std::ptr::addr_of_mut!((*(ptr as *mut $t)).$field) as *mut u8
                            },
                        )),*
                    ]))
            }
        }
    };
}

macro_rules! reflect_primitive {
    ($($t:ty => $name:literal),* $(,)?) => {
        $(
            impl Reflect for $t {
                fn reflect() -> Type {
                    Type::new($name)
                        .with(
                            ConstructibleTrait::typed::<$t>()
                                .with_default()
                                .with_copy()
                                .build(),
                        )
                        .with(StringConversionTrait::parseable::<$t>())
                }
            }
        )*
    };
}

reflect_primitive! {
    bool => "bool",
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    usize => "usize",
    f32 => "f32",
    f64 => "f64",
    String => "String",
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trait_lookup() {
        let ty = Type::new("Dummy").with(ConstructibleTrait::typed::<u32>().build());
        assert!(ty.has::<ConstructibleTrait>());
        assert!(!ty.has::<FieldsTrait>());
        assert_eq!(ty.name(), "Dummy");
    }

    #[test]
    #[should_panic(expected = "attached twice")]
    fn duplicate_trait_panics() {
        let _ = Type::new("Dummy")
            .with(ConstructibleTrait::typed::<u32>().build())
            .with(ConstructibleTrait::typed::<u32>().build());
    }

    #[test]
    fn primitive_descriptors() {
        let ty = reflect::<i32>();
        assert_eq!(ty.name(), "i32");
        let con = ty.get::<ConstructibleTrait>();
        assert_eq!(con.size(), 4);
        assert!(con.has_default() && con.has_copy());
    }

    #[derive(Clone, Default)]
    struct Probe {
        value: u32,
        label: String,
    }

    impl_reflect!(Probe, "Probe", fields: [value, label]);

    #[test]
    fn struct_fields() {
        let ty = reflect::<Probe>();
        let fields = ty.get::<FieldsTrait>();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.field(0).unwrap().name(), "value");

        let mut probe = Probe {
            value: 7,
            label: "x".into(),
        };
        let ptr = &mut probe as *mut Probe as *mut u8;
        let value_ptr = unsafe { fields.field(0).unwrap().address(ptr) } as *mut u32;
        unsafe { *value_ptr = 9 };
        assert_eq!(probe.value, 9);
    }
}
