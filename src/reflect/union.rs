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

//! Tagged sum types exposed through per-variant accessors

/// One alternative of a tagged sum type
#[derive(Clone)]
pub struct UnionVariant {
    name: &'static str,
    type_name: &'static str,
    test: unsafe fn(*const u8) -> bool,
    get: unsafe fn(*mut u8) -> *mut u8,
    set_default: unsafe fn(*mut u8),
}

impl UnionVariant {
    pub fn new(
        name: &'static str,
        type_name: &'static str,
        test: unsafe fn(*const u8) -> bool,
        get: unsafe fn(*mut u8) -> *mut u8,
        set_default: unsafe fn(*mut u8),
    ) -> Self {
        Self {
            name,
            type_name,
            test,
            get,
            set_default,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// # Safety
    /// `instance` must point to a value of the sum type.
    pub unsafe fn test(&self, instance: *const u8) -> bool {
        (self.test)(instance)
    }

    /// Pointer to the payload; only valid while `test` holds
    ///
    /// # Safety
    /// `instance` must point to a value of the sum type currently holding
    /// this variant.
    pub unsafe fn get(&self, instance: *mut u8) -> *mut u8 {
        (self.get)(instance)
    }

    /// Switch `instance` to this variant with a default payload
    ///
    /// # Safety
    /// `instance` must point to a value of the sum type.
    pub unsafe fn set_default(&self, instance: *mut u8) {
        (self.set_default)(instance)
    }
}

/// Exposes a tagged sum type as a list of variants with tester, getter and
/// setter primitives
#[derive(Clone)]
pub struct UnionTrait {
    variants: Vec<UnionVariant>,
}

impl UnionTrait {
    pub fn new(variants: Vec<UnionVariant>) -> Self {
        Self { variants }
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn variant(&self, index: usize) -> Option<&UnionVariant> {
        self.variants.get(index)
    }

    pub fn by_name(&self, name: &str) -> Option<&UnionVariant> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnionVariant> {
        self.variants.iter()
    }

    /// Currently held variant
    ///
    /// # Safety
    /// `instance` must point to a value of the sum type.
    pub unsafe fn variant_of(&self, instance: *const u8) -> Option<&UnionVariant> {
        self.variants.iter().find(|v| v.test(instance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    enum Shape {
        Circle(f32),
        Square(f32),
    }

    fn shape_trait() -> UnionTrait {
        UnionTrait::new(vec![
            UnionVariant::new(
                "Circle",
                "f32",
                |p| matches!(unsafe { &*(p as *const Shape) }, Shape::Circle(_)),
                |p| match unsafe { &mut *(p as *mut Shape) } {
                    Shape::Circle(r) => r as *mut f32 as *mut u8,
                    _ => unreachable!(),
                },
                |p| unsafe { *(p as *mut Shape) = Shape::Circle(0.0) },
            ),
            UnionVariant::new(
                "Square",
                "f32",
                |p| matches!(unsafe { &*(p as *const Shape) }, Shape::Square(_)),
                |p| match unsafe { &mut *(p as *mut Shape) } {
                    Shape::Square(s) => s as *mut f32 as *mut u8,
                    _ => unreachable!(),
                },
                |p| unsafe { *(p as *mut Shape) = Shape::Square(0.0) },
            ),
        ])
    }

    #[test]
    fn variant_access() {
        let ut = shape_trait();
        let mut shape = Shape::Circle(2.0);
        let ptr = &mut shape as *mut Shape as *mut u8;

        unsafe {
            assert_eq!(ut.variant_of(ptr).unwrap().name(), "Circle");
            ut.by_name("Square").unwrap().set_default(ptr);
            let payload = ut.by_name("Square").unwrap().get(ptr) as *mut f32;
            *payload = 4.0;
        }
        assert!(matches!(shape, Shape::Square(s) if s == 4.0));
    }
}
