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

//! Row-major component storage, one table per populated archetype
//!
//! Rows are entity indices, columns are the archetype's component columns.
//! Every column carries a monotonic version bumped on writes; queries
//! snapshot versions for change detection.

use ahash::AHashMap;

use crate::any_vec::AnyVec;
use crate::archetype::{ArchetypeId, ColumnId};
use crate::reflect::ConstructibleTrait;

struct Column {
    id: ColumnId,
    values: AnyVec,
    version: u64,
}

/// Storage for the entities of one archetype
pub struct DenseTable {
    entities: Vec<u32>,
    rows: AHashMap<u32, usize>,
    columns: Vec<Column>,
    version: u64,
}

impl DenseTable {
    /// Build a table with the given columns; ids need not be sorted.
    pub fn new(mut columns: Vec<(ColumnId, ConstructibleTrait)>) -> Self {
        columns.sort_by_key(|(id, _)| *id);
        Self {
            entities: Vec::new(),
            rows: AHashMap::new(),
            columns: columns
                .into_iter()
                .map(|(id, elem)| Column {
                    id,
                    values: AnyVec::new(elem),
                    version: 0,
                })
                .collect(),
            version: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entity index stored in `row`
    pub fn entity(&self, row: usize) -> u32 {
        self.entities[row]
    }

    /// Row of the entity with the given index
    pub fn row_of(&self, index: u32) -> Option<usize> {
        self.rows.get(&index).copied()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_ids(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.columns.iter().map(|c| c.id)
    }

    pub fn has_column(&self, id: ColumnId) -> bool {
        self.column_slot(id).is_some()
    }

    /// Read view of a column
    pub fn column(&self, id: ColumnId) -> Option<&AnyVec> {
        self.column_slot(id).map(|i| &self.columns[i].values)
    }

    /// Write view of a column; bumps the column's version
    pub fn column_mut(&mut self, id: ColumnId) -> Option<&mut AnyVec> {
        let slot = self.column_slot(id)?;
        let column = &mut self.columns[slot];
        column.version += 1;
        Some(&mut column.values)
    }

    /// Version of a column, for change detection
    pub fn column_version(&self, id: ColumnId) -> u64 {
        self.column_slot(id)
            .map_or(0, |i| self.columns[i].version)
    }

    /// Bump a column's version without touching its data
    pub fn touch_column(&mut self, id: ColumnId) {
        if let Some(slot) = self.column_slot(id) {
            self.columns[slot].version += 1;
        }
    }

    /// Structural version of the table
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Append a row for `index`, filling each column through `fill`
    ///
    /// `fill` must leave exactly one new value in every column it is handed.
    pub fn push_row(
        &mut self,
        index: u32,
        mut fill: impl FnMut(ColumnId, &mut AnyVec),
    ) -> usize {
        let row = self.entities.len();
        self.entities.push(index);
        self.rows.insert(index, row);
        for column in &mut self.columns {
            fill(column.id, &mut column.values);
            column.version += 1;
            debug_assert_eq!(column.values.len(), row + 1, "column fill out of step");
        }
        self.version += 1;
        row
    }

    /// Remove `row`, disposing each column slot through `dispose`
    ///
    /// `dispose` must remove exactly the value at the given row from every
    /// column it is handed (dropping it, forgetting it, or moving it out).
    /// Returns the entity index swapped into `row`, if any.
    pub fn swap_erase_with(
        &mut self,
        row: usize,
        mut dispose: impl FnMut(ColumnId, &mut AnyVec, usize),
    ) -> Option<u32> {
        for column in &mut self.columns {
            dispose(column.id, &mut column.values, row);
            column.version += 1;
        }

        let index = self.entities.swap_remove(row);
        self.rows.remove(&index);
        self.version += 1;

        if row < self.entities.len() {
            let swapped = self.entities[row];
            self.rows.insert(swapped, row);
            Some(swapped)
        } else {
            None
        }
    }

    /// Remove `row`, dropping its values
    pub fn swap_erase(&mut self, row: usize) -> Option<u32> {
        self.swap_erase_with(row, |_, values, r| values.swap_remove_drop(r))
    }

    fn column_slot(&self, id: ColumnId) -> Option<usize> {
        self.columns.binary_search_by_key(&id, |c| c.id).ok()
    }
}

impl std::fmt::Debug for DenseTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseTable")
            .field("rows", &self.entities.len())
            .field("columns", &self.columns.len())
            .finish()
    }
}

/// All dense tables, keyed by archetype
#[derive(Default)]
pub struct DenseTableRegistry {
    tables: Vec<DenseTable>,
    by_archetype: AHashMap<ArchetypeId, usize>,
}

impl DenseTableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, archetype: ArchetypeId) -> bool {
        self.by_archetype.contains_key(&archetype)
    }

    /// Table for `archetype`, created with the given columns if missing
    pub fn create(
        &mut self,
        archetype: ArchetypeId,
        columns: impl FnOnce() -> Vec<(ColumnId, ConstructibleTrait)>,
    ) -> &mut DenseTable {
        let slot = match self.by_archetype.get(&archetype) {
            Some(&slot) => slot,
            None => {
                let slot = self.tables.len();
                self.tables.push(DenseTable::new(columns()));
                self.by_archetype.insert(archetype, slot);
                slot
            }
        };
        &mut self.tables[slot]
    }

    pub fn get(&self, archetype: ArchetypeId) -> Option<&DenseTable> {
        self.by_archetype
            .get(&archetype)
            .map(|&slot| &self.tables[slot])
    }

    pub fn get_mut(&mut self, archetype: ArchetypeId) -> Option<&mut DenseTable> {
        let slot = *self.by_archetype.get(&archetype)?;
        Some(&mut self.tables[slot])
    }

    /// Table for `archetype`
    ///
    /// # Panics
    /// Panics if the archetype was never populated.
    pub fn at(&self, archetype: ArchetypeId) -> &DenseTable {
        self.get(archetype)
            .unwrap_or_else(|| panic!("no dense table for archetype {archetype:?}"))
    }

    /// Mutable access to two distinct tables at once, for row moves
    pub fn pair_mut(
        &mut self,
        a: ArchetypeId,
        b: ArchetypeId,
    ) -> (&mut DenseTable, &mut DenseTable) {
        let sa = self.by_archetype[&a];
        let sb = self.by_archetype[&b];
        assert_ne!(sa, sb, "pair_mut needs two distinct archetypes");
        if sa < sb {
            let (left, right) = self.tables.split_at_mut(sb);
            (&mut left[sa], &mut right[0])
        } else {
            let (left, right) = self.tables.split_at_mut(sa);
            (&mut right[0], &mut left[sb])
        }
    }

    /// Raw pointer to a table, for query iteration
    ///
    /// The pointer stays valid until the registry grows or drops the table;
    /// callers synchronize through the scheduler's access analysis.
    pub(crate) fn table_ptr(&self, archetype: ArchetypeId) -> Option<std::ptr::NonNull<DenseTable>> {
        self.get(archetype).map(std::ptr::NonNull::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataTypeId;

    fn u32_col(id: u32) -> (ColumnId, ConstructibleTrait) {
        (
            ColumnId::base(DataTypeId(id)),
            ConstructibleTrait::typed::<u32>()
                .with_default()
                .with_copy()
                .build(),
        )
    }

    fn push_value(table: &mut DenseTable, index: u32, value: u32) -> usize {
        table.push_row(index, |_, values| {
            let v = value;
            unsafe { values.push_copy(&v as *const u32 as *const u8) };
        })
    }

    #[test]
    fn rows_track_entities() {
        let mut table = DenseTable::new(vec![u32_col(0)]);
        push_value(&mut table, 10, 100);
        push_value(&mut table, 11, 110);
        push_value(&mut table, 12, 120);

        assert_eq!(table.len(), 3);
        assert_eq!(table.row_of(11), Some(1));
        assert_eq!(table.entity(2), 12);

        // Swap-removing the first row moves the last entity into it.
        let swapped = table.swap_erase(0);
        assert_eq!(swapped, Some(12));
        assert_eq!(table.row_of(12), Some(0));
        assert_eq!(table.row_of(10), None);

        let col = table.column(ColumnId::base(DataTypeId(0))).unwrap();
        assert_eq!(unsafe { *(col.at(0) as *const u32) }, 120);
    }

    #[test]
    fn versions_bump_on_write_views() {
        let mut table = DenseTable::new(vec![u32_col(0)]);
        let id = ColumnId::base(DataTypeId(0));
        let before = table.column_version(id);
        let _ = table.column_mut(id);
        assert!(table.column_version(id) > before);

        let structural = table.version();
        push_value(&mut table, 1, 1);
        assert!(table.version() > structural);
    }

    #[test]
    fn registry_pair_access() {
        let mut registry = DenseTableRegistry::new();
        registry.create(ArchetypeId(1), || vec![u32_col(0)]);
        registry.create(ArchetypeId(2), || vec![u32_col(0), u32_col(1)]);

        let (a, b) = registry.pair_mut(ArchetypeId(1), ArchetypeId(2));
        assert_eq!(a.column_count(), 1);
        assert_eq!(b.column_count(), 2);
    }
}
