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

//! Variants and bit-sets as named alternatives

/// One named alternative of an enum
#[derive(Clone)]
pub struct EnumVariant {
    name: &'static str,
    test: unsafe fn(*const u8) -> bool,
    set: unsafe fn(*mut u8),
}

impl EnumVariant {
    pub fn new(name: &'static str, test: unsafe fn(*const u8) -> bool, set: unsafe fn(*mut u8)) -> Self {
        Self { name, test, set }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// # Safety
    /// `instance` must point to a value of the enum's type.
    pub unsafe fn test(&self, instance: *const u8) -> bool {
        (self.test)(instance)
    }

    /// # Safety
    /// `instance` must point to a value of the enum's type.
    pub unsafe fn set(&self, instance: *mut u8) {
        (self.set)(instance)
    }
}

/// Exposes a field-less enum as an ordered list of named variants
#[derive(Clone)]
pub struct EnumTrait {
    variants: Vec<EnumVariant>,
}

impl EnumTrait {
    pub fn new(variants: Vec<EnumVariant>) -> Self {
        Self { variants }
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn variant(&self, index: usize) -> Option<&EnumVariant> {
        self.variants.get(index)
    }

    pub fn by_name(&self, name: &str) -> Option<&EnumVariant> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnumVariant> {
        self.variants.iter()
    }

    /// Name of the variant held by `instance`
    ///
    /// # Safety
    /// `instance` must point to a value of the enum's type.
    pub unsafe fn variant_of(&self, instance: *const u8) -> Option<&'static str> {
        self.variants
            .iter()
            .find(|v| v.test(instance))
            .map(|v| v.name)
    }
}

/// One named bit of a mask
#[derive(Clone)]
pub struct MaskBit {
    name: &'static str,
    test: unsafe fn(*const u8) -> bool,
    set: unsafe fn(*mut u8),
    clear: unsafe fn(*mut u8),
}

impl MaskBit {
    pub fn new(
        name: &'static str,
        test: unsafe fn(*const u8) -> bool,
        set: unsafe fn(*mut u8),
        clear: unsafe fn(*mut u8),
    ) -> Self {
        Self {
            name,
            test,
            set,
            clear,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// # Safety
    /// `instance` must point to a value of the mask's type.
    pub unsafe fn test(&self, instance: *const u8) -> bool {
        (self.test)(instance)
    }

    /// # Safety
    /// `instance` must point to a value of the mask's type.
    pub unsafe fn set(&self, instance: *mut u8) {
        (self.set)(instance)
    }

    /// # Safety
    /// `instance` must point to a value of the mask's type.
    pub unsafe fn clear(&self, instance: *mut u8) {
        (self.clear)(instance)
    }
}

/// Exposes a bit-set type as an ordered list of named bits
#[derive(Clone)]
pub struct MaskTrait {
    bits: Vec<MaskBit>,
}

impl MaskTrait {
    pub fn new(bits: Vec<MaskBit>) -> Self {
        Self { bits }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn bit(&self, index: usize) -> Option<&MaskBit> {
        self.bits.get(index)
    }

    pub fn by_name(&self, name: &str) -> Option<&MaskBit> {
        self.bits.iter().find(|b| b.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MaskBit> {
        self.bits.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        Off,
        On,
    }

    fn mode_trait() -> EnumTrait {
        EnumTrait::new(vec![
            EnumVariant::new(
                "Off",
                |p| unsafe { *(p as *const Mode) == Mode::Off },
                |p| unsafe { *(p as *mut Mode) = Mode::Off },
            ),
            EnumVariant::new(
                "On",
                |p| unsafe { *(p as *const Mode) == Mode::On },
                |p| unsafe { *(p as *mut Mode) = Mode::On },
            ),
        ])
    }

    #[test]
    fn enum_variants() {
        let et = mode_trait();
        let mut mode = Mode::Off;
        let ptr = &mut mode as *mut Mode as *mut u8;

        unsafe {
            assert_eq!(et.variant_of(ptr), Some("Off"));
            et.by_name("On").unwrap().set(ptr);
            assert_eq!(et.variant_of(ptr), Some("On"));
        }
    }

    #[test]
    fn mask_bits() {
        let mt = MaskTrait::new(vec![MaskBit::new(
            "visible",
            |p| unsafe { *(p as *const u8) & 1 != 0 },
            |p| unsafe { *p |= 1 },
            |p| unsafe { *p &= !1 },
        )]);

        let mut flags = 0u8;
        let ptr = &mut flags as *mut u8;
        unsafe {
            assert!(!mt.by_name("visible").unwrap().test(ptr));
            mt.bit(0).unwrap().set(ptr);
            assert!(mt.bit(0).unwrap().test(ptr));
            mt.bit(0).unwrap().clear(ptr);
        }
        assert_eq!(flags, 0);
    }
}
