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

//! Sparse storage for binary relations between entities
//!
//! Tables are keyed by relation type, the archetypes of both endpoints and a
//! depth bucket. Depth 0 holds direct edges; tree relations materialize
//! transitive edges in higher buckets, where an edge skipping `d`
//! intermediate entities lives at depth `d`. Two secondary indices per
//! relation type map archetypes to the tables mentioning them as either
//! endpoint, so entity moves and endpoint filters stay cheap. Tables are
//! never removed; an emptied table lingers like an obsolete archetype node.

use ahash::AHashMap;

use crate::any_vec::{AnyValue, AnyVec};
use crate::archetype::ArchetypeId;
use crate::types::DataTypeId;

/// Identifies one sparse relation table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SparseRelationTableId {
    pub data_type: DataTypeId,
    pub from: ArchetypeId,
    pub to: ArchetypeId,
    pub depth: u32,
}

impl SparseRelationTableId {
    pub fn new(data_type: DataTypeId, from: ArchetypeId, to: ArchetypeId, depth: u32) -> Self {
        Self {
            data_type,
            from,
            to,
            depth,
        }
    }
}

/// Rows of `(from entity index, to entity index, relation value)`
pub struct SparseRelationTable {
    froms: Vec<u32>,
    tos: Vec<u32>,
    values: AnyVec,
    index: AHashMap<(u32, u32), usize>,
}

impl SparseRelationTable {
    pub fn new(values: AnyVec) -> Self {
        Self {
            froms: Vec::new(),
            tos: Vec::new(),
            values,
            index: AHashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.froms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.froms.is_empty()
    }

    pub fn from(&self, row: usize) -> u32 {
        self.froms[row]
    }

    pub fn to(&self, row: usize) -> u32 {
        self.tos[row]
    }

    pub fn value_at(&self, row: usize) -> *mut u8 {
        self.values.at(row)
    }

    pub fn contains(&self, from: u32, to: u32) -> bool {
        self.index.contains_key(&(from, to))
    }

    pub fn row_of(&self, from: u32, to: u32) -> Option<usize> {
        self.index.get(&(from, to)).copied()
    }

    pub fn iter_pairs(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.froms.iter().copied().zip(self.tos.iter().copied())
    }

    /// Insert a row, moving the value in; an existing pair is overwritten.
    /// Returns true when a row was replaced.
    ///
    /// # Safety
    /// `src` must point to an initialized value of the table's relation type;
    /// the caller must treat it as moved-out afterwards.
    pub unsafe fn insert_move(&mut self, from: u32, to: u32, src: *mut u8) -> bool {
        if let Some(&row) = self.index.get(&(from, to)) {
            let slot = self.values.at(row);
            let elem = self.values.element();
            elem.destruct(slot);
            elem.move_construct(slot, src);
            true
        } else {
            let row = self.froms.len();
            self.froms.push(from);
            self.tos.push(to);
            self.values.push_move(src);
            self.index.insert((from, to), row);
            false
        }
    }

    /// Insert a row with a copy of the value at `src`
    ///
    /// # Safety
    /// `src` must point to an initialized value of the table's relation type,
    /// which must advertise copy support.
    pub unsafe fn insert_copy(&mut self, from: u32, to: u32, src: *const u8) -> bool {
        if let Some(&row) = self.index.get(&(from, to)) {
            let slot = self.values.at(row);
            let elem = self.values.element();
            elem.destruct(slot);
            elem.copy_construct(slot, src);
            true
        } else {
            let row = self.froms.len();
            self.froms.push(from);
            self.tos.push(to);
            self.values.push_copy(src);
            self.index.insert((from, to), row);
            false
        }
    }

    /// Remove the row for `(from, to)`, dropping its value
    pub fn erase(&mut self, from: u32, to: u32) -> bool {
        let Some(row) = self.index.remove(&(from, to)) else {
            return false;
        };
        self.values.swap_remove_drop(row);
        self.remove_row_entry(row);
        true
    }

    /// Remove every row matching `pred`, moving the values into `out`
    pub fn extract_if(
        &mut self,
        mut pred: impl FnMut(u32, u32) -> bool,
        out: &mut Vec<(u32, u32, AnyValue)>,
    ) {
        let mut row = 0;
        while row < self.froms.len() {
            let (from, to) = (self.froms[row], self.tos[row]);
            if pred(from, to) {
                let value = unsafe {
                    AnyValue::move_in(self.values.element().clone(), self.values.at(row))
                };
                unsafe { self.values.swap_remove_forget(row) };
                self.index.remove(&(from, to));
                self.remove_row_entry(row);
                out.push((from, to, value));
            } else {
                row += 1;
            }
        }
    }

    /// Remove every row matching `pred`, dropping the values
    pub fn erase_if(&mut self, mut pred: impl FnMut(u32, u32) -> bool) -> usize {
        let mut erased = 0;
        let mut row = 0;
        while row < self.froms.len() {
            let (from, to) = (self.froms[row], self.tos[row]);
            if pred(from, to) {
                self.values.swap_remove_drop(row);
                self.index.remove(&(from, to));
                self.remove_row_entry(row);
                erased += 1;
            } else {
                row += 1;
            }
        }
        erased
    }

    /// Close the hole at `row` in the endpoint arrays and fix the pair index.
    fn remove_row_entry(&mut self, row: usize) {
        self.froms.swap_remove(row);
        self.tos.swap_remove(row);
        if row < self.froms.len() {
            self.index.insert((self.froms[row], self.tos[row]), row);
        }
    }
}

impl std::fmt::Debug for SparseRelationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseRelationTable")
            .field("rows", &self.froms.len())
            .finish()
    }
}

/// Per-relation-type index of tables by endpoint archetype
#[derive(Default)]
pub struct TypeIndex {
    by_from: AHashMap<ArchetypeId, Vec<usize>>,
    by_to: AHashMap<ArchetypeId, Vec<usize>>,
}

impl TypeIndex {
    fn insert(&mut self, id: SparseRelationTableId, slot: usize) {
        self.by_from.entry(id.from).or_default().push(slot);
        self.by_to.entry(id.to).or_default().push(slot);
    }

    /// Tables where `archetype` is the `from` endpoint
    pub fn from(&self, archetype: ArchetypeId) -> &[usize] {
        self.by_from.get(&archetype).map_or(&[], Vec::as_slice)
    }

    /// Tables where `archetype` is the `to` endpoint
    pub fn to(&self, archetype: ArchetypeId) -> &[usize] {
        self.by_to.get(&archetype).map_or(&[], Vec::as_slice)
    }
}

/// All sparse relation tables
#[derive(Default)]
pub struct SparseRelationTableRegistry {
    tables: Vec<SparseRelationTable>,
    ids: Vec<SparseRelationTableId>,
    by_id: AHashMap<SparseRelationTableId, usize>,
    type_indices: AHashMap<DataTypeId, TypeIndex>,
}

impl SparseRelationTableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: SparseRelationTableId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Slot of the table with the given id, created if missing
    pub fn create(&mut self, id: SparseRelationTableId, values: impl FnOnce() -> AnyVec) -> usize {
        if let Some(&slot) = self.by_id.get(&id) {
            return slot;
        }
        let slot = self.tables.len();
        self.tables.push(SparseRelationTable::new(values()));
        self.ids.push(id);
        self.by_id.insert(id, slot);
        self.type_indices
            .entry(id.data_type)
            .or_default()
            .insert(id, slot);
        slot
    }

    pub fn slot_of(&self, id: SparseRelationTableId) -> Option<usize> {
        self.by_id.get(&id).copied()
    }

    pub fn id_of_slot(&self, slot: usize) -> SparseRelationTableId {
        self.ids[slot]
    }

    pub fn table(&self, slot: usize) -> &SparseRelationTable {
        &self.tables[slot]
    }

    pub fn table_mut(&mut self, slot: usize) -> &mut SparseRelationTable {
        &mut self.tables[slot]
    }

    pub fn get(&self, id: SparseRelationTableId) -> Option<&SparseRelationTable> {
        self.by_id.get(&id).map(|&slot| &self.tables[slot])
    }

    /// Index for a relation type; `None` before its first table exists
    pub fn type_index(&self, data_type: DataTypeId) -> Option<&TypeIndex> {
        self.type_indices.get(&data_type)
    }

    /// Re-home every row mentioning `index` when its entity moves archetypes
    ///
    /// Rows keep their relation values; only the table they live in changes.
    pub fn move_entity(&mut self, source: ArchetypeId, target: ArchetypeId, index: u32) {
        if source == target {
            return;
        }

        // Phase 1: pull matching rows out of every table mentioning the
        // source archetype, remembering where each row belongs now.
        let mut moved: Vec<(SparseRelationTableId, u32, u32, AnyValue)> = Vec::new();
        for (&data_type, type_index) in &self.type_indices {
            let mut slots: Vec<usize> = type_index.from(source).to_vec();
            for &slot in type_index.to(source) {
                if !slots.contains(&slot) {
                    slots.push(slot);
                }
            }

            for slot in slots {
                let id = self.ids[slot];
                let mut extracted = Vec::new();
                self.tables[slot].extract_if(|f, t| f == index || t == index, &mut extracted);
                for (from, to, value) in extracted {
                    let new_id = SparseRelationTableId {
                        data_type,
                        from: if from == index { target } else { id.from },
                        to: if to == index { target } else { id.to },
                        depth: id.depth,
                    };
                    moved.push((new_id, from, to, value));
                }
            }
        }

        // Phase 2: reinsert into the destination tables.
        for (id, from, to, value) in moved {
            let elem = value.element().clone();
            let slot = self.create(id, || AnyVec::new(elem));
            let table = &mut self.tables[slot];
            value.consume(|ptr| unsafe {
                table.insert_move(from, to, ptr);
            });
        }
    }

    /// Drop every row mentioning `index`
    pub fn erase_entity(&mut self, archetype: ArchetypeId, index: u32) {
        let mut slots = Vec::new();
        for type_index in self.type_indices.values() {
            slots.extend_from_slice(type_index.from(archetype));
            for &slot in type_index.to(archetype) {
                if !slots.contains(&slot) {
                    slots.push(slot);
                }
            }
        }
        for slot in slots {
            self.tables[slot].erase_if(|f, t| f == index || t == index);
        }
    }

    /// Append slots of tables created after `counter` which pass `filter`.
    /// Returns the counter to resume from.
    pub fn collect(
        &self,
        out: &mut Vec<usize>,
        mut counter: usize,
        mut filter: impl FnMut(SparseRelationTableId) -> bool,
    ) -> usize {
        while counter < self.ids.len() {
            if filter(self.ids[counter]) {
                out.push(counter);
            }
            counter += 1;
        }
        counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::ConstructibleTrait;

    fn u32_vec() -> AnyVec {
        AnyVec::new(
            ConstructibleTrait::typed::<u32>()
                .with_default()
                .with_copy()
                .build(),
        )
    }

    fn id(ty: u32, from: usize, to: usize, depth: u32) -> SparseRelationTableId {
        SparseRelationTableId::new(DataTypeId(ty), ArchetypeId(from), ArchetypeId(to), depth)
    }

    fn insert(table: &mut SparseRelationTable, from: u32, to: u32, value: u32) -> bool {
        unsafe { table.insert_copy(from, to, &value as *const u32 as *const u8) }
    }

    #[test]
    fn insert_replace_erase() {
        let mut table = SparseRelationTable::new(u32_vec());
        assert!(!insert(&mut table, 1, 2, 10));
        assert!(insert(&mut table, 1, 2, 20));
        assert_eq!(table.len(), 1);

        let row = table.row_of(1, 2).unwrap();
        assert_eq!(unsafe { *(table.value_at(row) as *const u32) }, 20);

        assert!(table.erase(1, 2));
        assert!(!table.erase(1, 2));
        assert!(table.is_empty());
    }

    #[test]
    fn registry_move_rehomes_rows() {
        let mut registry = SparseRelationTableRegistry::new();
        let slot = registry.create(id(0, 1, 2, 0), u32_vec);
        insert(registry.table_mut(slot), 7, 9, 42);

        // Entity 7 moves from archetype 1 to archetype 3.
        registry.move_entity(ArchetypeId(1), ArchetypeId(3), 7);

        assert!(registry.table(slot).is_empty());
        let rehomed = registry.get(id(0, 3, 2, 0)).unwrap();
        let row = rehomed.row_of(7, 9).unwrap();
        assert_eq!(unsafe { *(rehomed.value_at(row) as *const u32) }, 42);
    }

    #[test]
    fn registry_erase_removes_both_endpoints() {
        let mut registry = SparseRelationTableRegistry::new();
        let ab = registry.create(id(0, 1, 2, 0), u32_vec);
        insert(registry.table_mut(ab), 7, 9, 1);
        let ba = registry.create(id(0, 2, 1, 0), u32_vec);
        insert(registry.table_mut(ba), 9, 7, 1);

        registry.erase_entity(ArchetypeId(1), 7);
        assert!(registry.table(ab).is_empty());
        assert!(registry.table(ba).is_empty());
    }

    #[test]
    fn collect_is_incremental() {
        let mut registry = SparseRelationTableRegistry::new();
        registry.create(id(0, 1, 2, 0), u32_vec);

        let mut out = Vec::new();
        let counter = registry.collect(&mut out, 0, |tid| tid.data_type == DataTypeId(0));
        assert_eq!(out.len(), 1);

        registry.create(id(0, 2, 3, 0), u32_vec);
        registry.create(id(1, 2, 3, 0), u32_vec);
        let mut more = Vec::new();
        registry.collect(&mut more, counter, |tid| tid.data_type == DataTypeId(0));
        assert_eq!(more.len(), 1);
    }
}
