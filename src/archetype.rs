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

//! Archetypes and the graph of transitions between them
//!
//! Each node is the set of column ids an entity holds; edges cache the
//! single-column add/remove transitions. Neighboring nodes are connected
//! lazily: the first crossing pays a linear lookup over existing nodes, every
//! later crossing follows the cached edge. The graph only grows.

use std::collections::BTreeSet;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::types::DataTypeId;

/// Index of a node in the archetype graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(pub usize);

impl ArchetypeId {
    /// Archetype of entities holding no columns
    pub const EMPTY: ArchetypeId = ArchetypeId(0);

    /// Sentinel for "no archetype"
    pub const INVALID: ArchetypeId = ArchetypeId(usize::MAX);
}

/// Identifies one column type: low 32 bits are the data type, the upper 32
/// bits carry a discriminator used by relation bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnId(pub u64);

impl ColumnId {
    /// Invalid sentinel
    pub const INVALID: ColumnId = ColumnId(u64::MAX);

    /// Column of a plain component type
    pub fn base(data_type: DataTypeId) -> Self {
        ColumnId(data_type.0 as u64)
    }

    pub fn with_discriminator(data_type: DataTypeId, discriminator: u32) -> Self {
        ColumnId(data_type.0 as u64 | ((discriminator as u64) << 32))
    }

    pub fn data_type(self) -> DataTypeId {
        DataTypeId((self.0 & 0xFFFF_FFFF) as u32)
    }

    pub fn discriminator(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

struct Node {
    /// Ordered so `first`/`next` iteration is stable for the node's lifetime.
    ids: BTreeSet<u64>,
    /// Cached transitions; the same key links both directions of an edge.
    edges: FxHashMap<u64, ArchetypeId>,
}

struct GraphInner {
    nodes: Vec<Node>,
}

/// Graph of archetypes with cached add/remove edges
///
/// Interior-locked so queries can grow it from shared references while they
/// refresh their cached matches.
pub struct ArchetypeGraph {
    inner: RwLock<GraphInner>,
}

impl Default for ArchetypeGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchetypeGraph {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(GraphInner {
                nodes: vec![Node {
                    ids: BTreeSet::new(),
                    edges: FxHashMap::default(),
                }],
            }),
        }
    }

    /// Number of nodes created so far
    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().nodes.is_empty()
    }

    /// Whether `archetype` holds the column `id`
    pub fn contains(&self, archetype: ArchetypeId, id: ColumnId) -> bool {
        let inner = self.inner.read();
        inner.nodes[archetype.0].ids.contains(&id.0)
    }

    /// Number of columns held by `archetype`
    pub fn column_count(&self, archetype: ArchetypeId) -> usize {
        self.inner.read().nodes[archetype.0].ids.len()
    }

    /// The archetype holding `source`'s columns plus `id`
    ///
    /// `id` must not already be present in `source`.
    pub fn with(&self, source: ArchetypeId, id: ColumnId) -> ArchetypeId {
        let mut inner = self.inner.write();
        assert!(
            !inner.nodes[source.0].ids.contains(&id.0),
            "archetype already holds column {id:?}"
        );

        if let Some(&target) = inner.nodes[source.0].edges.get(&id.0) {
            return target;
        }

        // Look for an existing node which is a superset of the source with
        // exactly the requested extra column.
        for i in 0..inner.nodes.len() {
            if inner.nodes[i].ids.len() == inner.nodes[source.0].ids.len() + 1
                && inner.nodes[i].ids.contains(&id.0)
                && is_superset(&inner.nodes[i].ids, &inner.nodes[source.0].ids)
            {
                let target = ArchetypeId(i);
                inner.nodes[source.0].edges.insert(id.0, target);
                inner.nodes[i].edges.insert(id.0, source);
                return target;
            }
        }

        let target = ArchetypeId(inner.nodes.len());
        let mut ids = inner.nodes[source.0].ids.clone();
        ids.insert(id.0);
        let mut edges = FxHashMap::default();
        edges.insert(id.0, source);
        inner.nodes.push(Node { ids, edges });
        inner.nodes[source.0].edges.insert(id.0, target);
        target
    }

    /// The archetype holding `source`'s columns minus `id`
    ///
    /// `id` must be present in `source`.
    pub fn without(&self, source: ArchetypeId, id: ColumnId) -> ArchetypeId {
        let mut inner = self.inner.write();
        assert!(
            inner.nodes[source.0].ids.contains(&id.0),
            "archetype does not hold column {id:?}"
        );

        if let Some(&target) = inner.nodes[source.0].edges.get(&id.0) {
            return target;
        }

        for i in 0..inner.nodes.len() {
            if inner.nodes[i].ids.len() + 1 == inner.nodes[source.0].ids.len()
                && !inner.nodes[i].ids.contains(&id.0)
                && is_superset(&inner.nodes[source.0].ids, &inner.nodes[i].ids)
            {
                let target = ArchetypeId(i);
                inner.nodes[source.0].edges.insert(id.0, target);
                inner.nodes[i].edges.insert(id.0, source);
                return target;
            }
        }

        let target = ArchetypeId(inner.nodes.len());
        let mut ids = inner.nodes[source.0].ids.clone();
        ids.remove(&id.0);
        let mut edges = FxHashMap::default();
        edges.insert(id.0, source);
        inner.nodes.push(Node { ids, edges });
        inner.nodes[source.0].edges.insert(id.0, target);
        target
    }

    /// First column id of `archetype`, or `ColumnId::INVALID` if empty
    pub fn first(&self, archetype: ArchetypeId) -> ColumnId {
        let inner = self.inner.read();
        inner.nodes[archetype.0]
            .ids
            .iter()
            .next()
            .map_or(ColumnId::INVALID, |&id| ColumnId(id))
    }

    /// Column id following `id` in `archetype`'s stable order
    pub fn next(&self, archetype: ArchetypeId, id: ColumnId) -> ColumnId {
        use std::ops::Bound;
        let inner = self.inner.read();
        inner.nodes[archetype.0]
            .ids
            .range((Bound::Excluded(id.0), Bound::Unbounded))
            .next()
            .map_or(ColumnId::INVALID, |&next| ColumnId(next))
    }

    /// Snapshot of the column ids of `archetype`
    pub fn ids(&self, archetype: ArchetypeId) -> Vec<ColumnId> {
        let inner = self.inner.read();
        inner.nodes[archetype.0]
            .ids
            .iter()
            .map(|&id| ColumnId(id))
            .collect()
    }

    /// Append every node created after `seen` whose id set is a superset of
    /// `archetype`'s. Returns the cursor to resume from.
    pub fn collect(
        &self,
        archetype: ArchetypeId,
        supersets: &mut Vec<ArchetypeId>,
        mut seen: usize,
    ) -> usize {
        let inner = self.inner.read();
        let base = &inner.nodes[archetype.0].ids;
        while seen < inner.nodes.len() {
            if inner.nodes[seen].ids.len() >= base.len() && is_superset(&inner.nodes[seen].ids, base)
            {
                supersets.push(ArchetypeId(seen));
            }
            seen += 1;
        }
        seen
    }
}

fn is_superset(superset: &BTreeSet<u64>, set: &BTreeSet<u64>) -> bool {
    set.iter().all(|id| superset.contains(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(n: u32) -> ColumnId {
        ColumnId::base(DataTypeId(n))
    }

    #[test]
    fn column_id_packing() {
        let id = ColumnId::with_discriminator(DataTypeId(7), 3);
        assert_eq!(id.data_type(), DataTypeId(7));
        assert_eq!(id.discriminator(), 3);
        assert_eq!(ColumnId::base(DataTypeId(7)).discriminator(), 0);
    }

    #[test]
    fn with_without_inverse() {
        let graph = ArchetypeGraph::new();
        for c in 0..4u32 {
            let a = graph.with(ArchetypeId::EMPTY, col(c));
            assert_eq!(graph.without(a, col(c)), ArchetypeId::EMPTY);
            assert_eq!(graph.with(ArchetypeId::EMPTY, col(c)), a);
        }
    }

    #[test]
    fn ids_are_set_algebra() {
        let graph = ArchetypeGraph::new();
        let a = graph.with(ArchetypeId::EMPTY, col(1));
        let ab = graph.with(a, col(2));
        assert_eq!(graph.ids(ab), vec![col(1), col(2)]);
        assert_eq!(graph.ids(graph.without(ab, col(1))), vec![col(2)]);
        assert!(graph.contains(ab, col(1)) && graph.contains(ab, col(2)));
    }

    #[test]
    fn different_paths_converge() {
        let graph = ArchetypeGraph::new();
        let a = graph.with(ArchetypeId::EMPTY, col(1));
        let b = graph.with(ArchetypeId::EMPTY, col(2));
        let ab1 = graph.with(a, col(2));
        let ab2 = graph.with(b, col(1));
        assert_eq!(ab1, ab2);
    }

    #[test]
    fn stable_iteration_order() {
        let graph = ArchetypeGraph::new();
        let a = graph.with(ArchetypeId::EMPTY, col(5));
        let ab = graph.with(a, col(2));

        let mut seen = Vec::new();
        let mut id = graph.first(ab);
        while id != ColumnId::INVALID {
            seen.push(id);
            id = graph.next(ab, id);
        }
        assert_eq!(seen, graph.ids(ab));
    }

    #[test]
    fn collect_skips_seen_nodes() {
        let graph = ArchetypeGraph::new();
        let a = graph.with(ArchetypeId::EMPTY, col(1));

        let mut supersets = Vec::new();
        let cursor = graph.collect(a, &mut supersets, 0);
        assert_eq!(supersets, vec![a]);

        let ab = graph.with(a, col(2));
        let mut more = Vec::new();
        let cursor = graph.collect(a, &mut more, cursor);
        assert_eq!(more, vec![ab]);
        assert_eq!(cursor, graph.len());
    }
}
