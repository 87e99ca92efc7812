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

//! Named field access for struct-like types

/// One named field of a struct-like type
#[derive(Clone)]
pub struct Field {
    name: &'static str,
    type_name: &'static str,
    address: unsafe fn(*mut u8) -> *mut u8,
}

impl Field {
    pub fn new(
        name: &'static str,
        type_name: &'static str,
        address: unsafe fn(*mut u8) -> *mut u8,
    ) -> Self {
        Self {
            name,
            type_name,
            address,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Project an instance pointer to this field
    ///
    /// # Safety
    /// `instance` must point to a value of the field's owning type.
    pub unsafe fn address(&self, instance: *mut u8) -> *mut u8 {
        (self.address)(instance)
    }
}

impl std::fmt::Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.type_name)
    }
}

/// Ordered list of named fields
#[derive(Debug, Clone)]
pub struct FieldsTrait {
    fields: Vec<Field>,
}

impl FieldsTrait {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    pub fn by_name(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }
}
