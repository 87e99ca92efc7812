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

//! Polymorphic views over sequences and key-value stores
//!
//! Operations a concrete container cannot offer are left unset; callers probe
//! with the `has_*` accessors before invoking them.

use std::collections::HashMap;
use std::hash::Hash;

use crate::reflect::Reflect;

/// View over an ordered, growable sequence
#[derive(Clone)]
pub struct ArrayTrait {
    element_type_name: &'static str,
    length: unsafe fn(*const u8) -> usize,
    element: unsafe fn(*mut u8, usize) -> *mut u8,
    insert_default: Option<unsafe fn(*mut u8, usize)>,
    erase: Option<unsafe fn(*mut u8, usize)>,
    clear: Option<unsafe fn(*mut u8)>,
}

impl ArrayTrait {
    /// Build the view for `Vec<T>`
    pub fn of_vec<T: Reflect>() -> Self
    where
        T: Default,
    {
        Self {
            element_type_name: std::any::type_name::<T>(),
            length: |ptr| unsafe { (*(ptr as *const Vec<T>)).len() },
            element: |ptr, index| unsafe {
                let vec = &mut *(ptr as *mut Vec<T>);
                &mut vec[index] as *mut T as *mut u8
            },
            insert_default: Some(|ptr, index| unsafe {
                (*(ptr as *mut Vec<T>)).insert(index, T::default());
            }),
            erase: Some(|ptr, index| unsafe {
                (*(ptr as *mut Vec<T>)).remove(index);
            }),
            clear: Some(|ptr| unsafe {
                (*(ptr as *mut Vec<T>)).clear();
            }),
        }
    }

    pub fn element_type_name(&self) -> &'static str {
        self.element_type_name
    }

    pub fn has_insert_default(&self) -> bool {
        self.insert_default.is_some()
    }

    pub fn has_erase(&self) -> bool {
        self.erase.is_some()
    }

    pub fn has_clear(&self) -> bool {
        self.clear.is_some()
    }

    /// # Safety
    /// `instance` must point to the container type this view was built for.
    pub unsafe fn length(&self, instance: *const u8) -> usize {
        (self.length)(instance)
    }

    /// # Safety
    /// As [`length`](Self::length); `index` must be in bounds.
    pub unsafe fn element(&self, instance: *mut u8, index: usize) -> *mut u8 {
        (self.element)(instance, index)
    }

    /// # Safety
    /// As [`length`](Self::length). Requires `has_insert_default()`.
    pub unsafe fn insert_default(&self, instance: *mut u8, index: usize) {
        (self.insert_default.expect("array view has no insert"))(instance, index);
    }

    /// # Safety
    /// As [`length`](Self::length); `index` must be in bounds. Requires
    /// `has_erase()`.
    pub unsafe fn erase(&self, instance: *mut u8, index: usize) {
        (self.erase.expect("array view has no erase"))(instance, index);
    }

    /// # Safety
    /// As [`length`](Self::length). Requires `has_clear()`.
    pub unsafe fn clear(&self, instance: *mut u8) {
        (self.clear.expect("array view has no clear"))(instance);
    }
}

/// View over an unordered key-value store
#[derive(Clone)]
pub struct DictionaryTrait {
    key_type_name: &'static str,
    value_type_name: &'static str,
    length: unsafe fn(*const u8) -> usize,
    value: unsafe fn(*mut u8, *const u8) -> Option<*mut u8>,
    insert_default: Option<unsafe fn(*mut u8, *const u8)>,
    erase: Option<unsafe fn(*mut u8, *const u8) -> bool>,
    clear: Option<unsafe fn(*mut u8)>,
}

impl DictionaryTrait {
    /// Build the view for `HashMap<K, V>`
    pub fn of_hash_map<K, V>() -> Self
    where
        K: Reflect + Eq + Hash + Clone,
        V: Reflect + Default,
    {
        Self {
            key_type_name: std::any::type_name::<K>(),
            value_type_name: std::any::type_name::<V>(),
            length: |ptr| unsafe { (*(ptr as *const HashMap<K, V>)).len() },
            value: |ptr, key| unsafe {
                let map = &mut *(ptr as *mut HashMap<K, V>);
                map.get_mut(&*(key as *const K))
                    .map(|v| v as *mut V as *mut u8)
            },
            insert_default: Some(|ptr, key| unsafe {
                let map = &mut *(ptr as *mut HashMap<K, V>);
                map.insert((*(key as *const K)).clone(), V::default());
            }),
            erase: Some(|ptr, key| unsafe {
                let map = &mut *(ptr as *mut HashMap<K, V>);
                map.remove(&*(key as *const K)).is_some()
            }),
            clear: Some(|ptr| unsafe {
                (*(ptr as *mut HashMap<K, V>)).clear();
            }),
        }
    }

    pub fn key_type_name(&self) -> &'static str {
        self.key_type_name
    }

    pub fn value_type_name(&self) -> &'static str {
        self.value_type_name
    }

    pub fn has_insert_default(&self) -> bool {
        self.insert_default.is_some()
    }

    pub fn has_erase(&self) -> bool {
        self.erase.is_some()
    }

    pub fn has_clear(&self) -> bool {
        self.clear.is_some()
    }

    /// # Safety
    /// `instance` must point to the container type this view was built for.
    pub unsafe fn length(&self, instance: *const u8) -> usize {
        (self.length)(instance)
    }

    /// Look up the value stored under `key`
    ///
    /// # Safety
    /// As [`length`](Self::length); `key` must point to a valid key value.
    pub unsafe fn value(&self, instance: *mut u8, key: *const u8) -> Option<*mut u8> {
        (self.value)(instance, key)
    }

    /// # Safety
    /// As [`value`](Self::value). Requires `has_insert_default()`.
    pub unsafe fn insert_default(&self, instance: *mut u8, key: *const u8) {
        (self.insert_default.expect("dictionary view has no insert"))(instance, key);
    }

    /// # Safety
    /// As [`value`](Self::value). Requires `has_erase()`.
    pub unsafe fn erase(&self, instance: *mut u8, key: *const u8) -> bool {
        (self.erase.expect("dictionary view has no erase"))(instance, key)
    }

    /// # Safety
    /// As [`length`](Self::length). Requires `has_clear()`.
    pub unsafe fn clear(&self, instance: *mut u8) {
        (self.clear.expect("dictionary view has no clear"))(instance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_view() {
        let view = ArrayTrait::of_vec::<u32>();
        let mut values = vec![1u32, 2, 3];
        let ptr = &mut values as *mut Vec<u32> as *mut u8;

        unsafe {
            assert_eq!(view.length(ptr), 3);
            *(view.element(ptr, 1) as *mut u32) = 20;
            view.insert_default(ptr, 0);
            view.erase(ptr, 3);
        }
        assert_eq!(values, vec![0, 1, 20]);
    }

    #[test]
    fn hash_map_view() {
        let view = DictionaryTrait::of_hash_map::<String, u32>();
        let mut map = HashMap::new();
        map.insert("a".to_string(), 1u32);
        let ptr = &mut map as *mut HashMap<String, u32> as *mut u8;

        let key = "a".to_string();
        unsafe {
            assert_eq!(view.length(ptr), 1);
            let value = view.value(ptr, &key as *const String as *const u8).unwrap();
            *(value as *mut u32) = 5;

            let missing = "b".to_string();
            view.insert_default(ptr, &missing as *const String as *const u8);
        }
        assert_eq!(map["a"], 5);
        assert_eq!(map["b"], 0);
    }
}
