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

//! Adapter traits: string conversion, thin wrappers and nullable states

use std::fmt::Display;
use std::str::FromStr;

/// Bidirectional conversion between a value and its string form
#[derive(Clone)]
pub struct StringConversionTrait {
    into: unsafe fn(*const u8) -> String,
    from: unsafe fn(*mut u8, &str) -> bool,
}

impl StringConversionTrait {
    pub fn new(into: unsafe fn(*const u8) -> String, from: unsafe fn(*mut u8, &str) -> bool) -> Self {
        Self { into, from }
    }

    /// Build from `Display` and `FromStr`
    pub fn parseable<T: Display + FromStr + 'static>() -> Self {
        Self {
            into: |ptr| unsafe { (*(ptr as *const T)).to_string() },
            from: |ptr, s| match s.parse::<T>() {
                Ok(value) => {
                    unsafe { *(ptr as *mut T) = value };
                    true
                }
                Err(_) => false,
            },
        }
    }

    /// # Safety
    /// `instance` must point to a value of the described type.
    pub unsafe fn into_string(&self, instance: *const u8) -> String {
        (self.into)(instance)
    }

    /// Overwrite `instance` with the parsed value; false on parse failure
    ///
    /// # Safety
    /// `instance` must point to an initialized value of the described type.
    pub unsafe fn from_string(&self, instance: *mut u8, value: &str) -> bool {
        (self.from)(instance, value)
    }
}

/// Marks a type as a thin wrapper around a single inner value
#[derive(Clone)]
pub struct WrapperTrait {
    inner_type_name: &'static str,
    unwrap: unsafe fn(*mut u8) -> *mut u8,
}

impl WrapperTrait {
    pub fn new(inner_type_name: &'static str, unwrap: unsafe fn(*mut u8) -> *mut u8) -> Self {
        Self {
            inner_type_name,
            unwrap,
        }
    }

    pub fn inner_type_name(&self) -> &'static str {
        self.inner_type_name
    }

    /// Pointer to the wrapped value
    ///
    /// # Safety
    /// `instance` must point to a value of the wrapper type.
    pub unsafe fn unwrap(&self, instance: *mut u8) -> *mut u8 {
        (self.unwrap)(instance)
    }
}

/// Distinguished "null" state of a type
#[derive(Clone)]
pub struct NullableTrait {
    is_null: unsafe fn(*const u8) -> bool,
    set_null: unsafe fn(*mut u8),
}

impl NullableTrait {
    pub fn new(is_null: unsafe fn(*const u8) -> bool, set_null: unsafe fn(*mut u8)) -> Self {
        Self { is_null, set_null }
    }

    /// # Safety
    /// `instance` must point to a value of the described type.
    pub unsafe fn is_null(&self, instance: *const u8) -> bool {
        (self.is_null)(instance)
    }

    /// # Safety
    /// `instance` must point to an initialized value of the described type.
    pub unsafe fn set_null(&self, instance: *mut u8) {
        (self.set_null)(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip() {
        let conv = StringConversionTrait::parseable::<i32>();
        let mut value = 0i32;
        let ptr = &mut value as *mut i32 as *mut u8;

        unsafe {
            assert!(conv.from_string(ptr, "42"));
            assert_eq!(conv.into_string(ptr), "42");
            assert!(!conv.from_string(ptr, "not a number"));
        }
        assert_eq!(value, 42);
    }

    #[test]
    fn nullable() {
        let nt = NullableTrait::new(
            |p| unsafe { (*(p as *const Option<u32>)).is_none() },
            |p| unsafe { *(p as *mut Option<u32>) = None },
        );

        let mut value = Some(3u32);
        let ptr = &mut value as *mut Option<u32> as *mut u8;
        unsafe {
            assert!(!nt.is_null(ptr));
            nt.set_null(ptr);
            assert!(nt.is_null(ptr));
        }
    }
}
