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

//! The compiled query plan: a tree of match nodes
//!
//! An archetype node per target walks the graph's collect cursor to keep its
//! matching archetype list current and iterates their dense tables; a
//! relation node bridges two targets by iterating sparse relation rows.
//! Iteration is an odometer over the ordered nodes: a node whose targets are
//! all pinned by earlier nodes (or externally) validates the current binding
//! instead of iterating. The plan reorders nodes by estimated cost after
//! every update, ties broken by declaration order.

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::archetype::{ArchetypeId, ColumnId};
use crate::query::term::{Access, QueryTerm, QueryTerms, MAX_TARGETS};
use crate::types::DataTypeId;
use crate::world::World;

/// Per-node iteration state inside a cursor
#[derive(Debug, Clone, Copy, Default)]
struct NodeState {
    entered: bool,
    pos: usize,
    row: usize,
}

/// Iteration state of one view over a plan
#[derive(Debug, Clone)]
pub struct QueryCursor {
    pub archetypes: [ArchetypeId; MAX_TARGETS],
    pub rows: [usize; MAX_TARGETS],
    /// Externally pinned targets, one bit per target.
    pub pinned: u8,
    states: SmallVec<[NodeState; 8]>,
    started: bool,
}

impl QueryCursor {
    fn new(nodes: usize) -> Self {
        Self {
            archetypes: [ArchetypeId::INVALID; MAX_TARGETS],
            rows: [0; MAX_TARGETS],
            pinned: 0,
            states: std::iter::repeat(NodeState::default()).take(nodes).collect(),
            started: false,
        }
    }
}

enum PlanNode {
    Archetype(ArchetypeNode),
    Relation(RelationNode),
}

impl PlanNode {
    fn targets(&self) -> u8 {
        match self {
            PlanNode::Archetype(node) => 1 << node.target,
            PlanNode::Relation(node) => (1 << node.from_target) | (1 << node.to_target),
        }
    }

    fn update(&mut self, world: &World) {
        match self {
            PlanNode::Archetype(node) => node.update(world),
            PlanNode::Relation(node) => node.update(world),
        }
    }

    fn estimate(&self, world: &World) -> usize {
        match self {
            PlanNode::Archetype(node) => node.estimate(world),
            PlanNode::Relation(node) => node.estimate(world),
        }
    }

    fn next(&self, world: &World, pins: u8, cursor: &mut QueryCursor, state: usize) -> bool {
        match self {
            PlanNode::Archetype(node) => node.next(world, pins, cursor, state),
            PlanNode::Relation(node) => node.next(world, pins, cursor, state),
        }
    }
}

/// Matches archetypes for one target against with/without/changed sets
struct ArchetypeNode {
    target: usize,
    with: SmallVec<[ColumnId; 8]>,
    without: SmallVec<[ColumnId; 4]>,
    changed: SmallVec<[ColumnId; 2]>,
    base: ArchetypeId,
    seen: usize,
    /// Every archetype passing with/without, in collect order.
    archetypes: Vec<ArchetypeId>,
    /// `archetypes` after the changed filter; rebuilt by `update`.
    active: Vec<ArchetypeId>,
    /// Column versions saved at the previous update, per changed column.
    baselines: AHashMap<(ColumnId, ArchetypeId), u64>,
}

impl ArchetypeNode {
    fn new(target: usize) -> Self {
        Self {
            target,
            with: SmallVec::new(),
            without: SmallVec::new(),
            changed: SmallVec::new(),
            base: ArchetypeId::INVALID,
            seen: 0,
            archetypes: Vec::new(),
            active: Vec::new(),
            baselines: AHashMap::new(),
        }
    }

    fn require(&mut self, column: ColumnId) {
        if !self.with.contains(&column) {
            self.with.push(column);
        }
    }

    fn exclude(&mut self, column: ColumnId) {
        if !self.without.contains(&column) {
            self.without.push(column);
        }
    }

    fn track_changes(&mut self, column: ColumnId) {
        if !self.changed.contains(&column) {
            self.changed.push(column);
        }
    }

    fn update(&mut self, world: &World) {
        let graph = world.archetype_graph();
        if self.base == ArchetypeId::INVALID {
            let mut base = ArchetypeId::EMPTY;
            for &column in &self.with {
                base = graph.with(base, column);
            }
            self.base = base;
        }

        // Collect only archetypes created since the last update.
        let mut fresh = Vec::new();
        self.seen = graph.collect(self.base, &mut fresh, self.seen);
        for archetype in fresh {
            if self
                .without
                .iter()
                .any(|&column| graph.contains(archetype, column))
            {
                continue;
            }
            self.archetypes.push(archetype);
        }

        if self.changed.is_empty() {
            self.active.clone_from(&self.archetypes);
            return;
        }

        // A row set passes only if every tracked column advanced since the
        // previous update; then move the baselines forward.
        self.active.clear();
        for &archetype in &self.archetypes {
            let passes = self.changed.iter().all(|&column| {
                let current = world.column_version(archetype, column);
                let saved = self
                    .baselines
                    .get(&(column, archetype))
                    .copied()
                    .unwrap_or(0);
                current > saved
            });
            if passes {
                self.active.push(archetype);
            }
        }
        for &archetype in &self.archetypes {
            for &column in &self.changed {
                self.baselines.insert(
                    (column, archetype),
                    world.column_version(archetype, column),
                );
            }
        }
    }

    fn estimate(&self, world: &World) -> usize {
        self.active
            .iter()
            .filter_map(|&archetype| world.dense_tables().get(archetype))
            .map(|table| table.len())
            .sum()
    }

    fn next(&self, world: &World, pins: u8, cursor: &mut QueryCursor, state: usize) -> bool {
        if pins & (1 << self.target) != 0 {
            // Pinned target: validate the current binding once.
            let node_state = &mut cursor.states[state];
            if node_state.entered {
                return false;
            }
            node_state.entered = true;
            return self.active.contains(&cursor.archetypes[self.target]);
        }

        let node_state = &mut cursor.states[state];
        if node_state.entered {
            node_state.row += 1;
        } else {
            *node_state = NodeState {
                entered: true,
                pos: 0,
                row: 0,
            };
        }
        let (mut pos, mut row) = (node_state.pos, node_state.row);

        loop {
            if pos >= self.active.len() {
                cursor.states[state].pos = pos;
                return false;
            }
            let archetype = self.active[pos];
            match world.dense_tables().get(archetype) {
                Some(table) if row < table.len() => {
                    cursor.states[state] = NodeState {
                        entered: true,
                        pos,
                        row,
                    };
                    cursor.archetypes[self.target] = archetype;
                    cursor.rows[self.target] = row;
                    return true;
                }
                _ => {
                    pos += 1;
                    row = 0;
                }
            }
        }
    }
}

/// Bridges two targets by iterating sparse relation rows
struct RelationNode {
    data_type: DataTypeId,
    from_target: usize,
    to_target: usize,
    min_depth: u32,
    max_depth: u32,
    seen: usize,
    tables: Vec<usize>,
}

impl RelationNode {
    fn new(
        data_type: DataTypeId,
        from_target: usize,
        to_target: usize,
        min_depth: u32,
        max_depth: u32,
    ) -> Self {
        Self {
            data_type,
            from_target,
            to_target,
            min_depth,
            max_depth,
            seen: 0,
            tables: Vec::new(),
        }
    }

    fn update(&mut self, world: &World) {
        let data_type = self.data_type;
        let (min, max) = (self.min_depth, self.max_depth);
        self.seen = world.sparse_tables().collect(&mut self.tables, self.seen, |id| {
            id.data_type == data_type && id.depth >= min && id.depth <= max
        });
    }

    fn estimate(&self, world: &World) -> usize {
        self.tables
            .iter()
            .map(|&slot| world.sparse_tables().table(slot).len())
            .sum()
    }

    fn next(&self, world: &World, pins: u8, cursor: &mut QueryCursor, state: usize) -> bool {
        let from_pinned = pins & (1 << self.from_target) != 0;
        let to_pinned = pins & (1 << self.to_target) != 0;

        if from_pinned && to_pinned {
            let node_state = &mut cursor.states[state];
            if node_state.entered {
                return false;
            }
            node_state.entered = true;

            let from_archetype = cursor.archetypes[self.from_target];
            let to_archetype = cursor.archetypes[self.to_target];
            let from_index = entity_index(world, cursor, self.from_target);
            let to_index = entity_index(world, cursor, self.to_target);
            let (Some(from_index), Some(to_index)) = (from_index, to_index) else {
                return false;
            };
            return self.tables.iter().any(|&slot| {
                let id = world.sparse_tables().id_of_slot(slot);
                id.from == from_archetype
                    && id.to == to_archetype
                    && world
                        .sparse_tables()
                        .table(slot)
                        .contains(from_index, to_index)
            });
        }

        let node_state = &mut cursor.states[state];
        if node_state.entered {
            node_state.row += 1;
        } else {
            *node_state = NodeState {
                entered: true,
                pos: 0,
                row: 0,
            };
        }
        let (mut pos, mut row) = (node_state.pos, node_state.row);

        let pinned_from = from_pinned.then(|| {
            (
                cursor.archetypes[self.from_target],
                entity_index(world, cursor, self.from_target),
            )
        });
        let pinned_to = to_pinned.then(|| {
            (
                cursor.archetypes[self.to_target],
                entity_index(world, cursor, self.to_target),
            )
        });

        loop {
            if pos >= self.tables.len() {
                cursor.states[state].pos = pos;
                cursor.states[state].row = row;
                return false;
            }
            let slot = self.tables[pos];
            let id = world.sparse_tables().id_of_slot(slot);
            let table = world.sparse_tables().table(slot);

            // Skip tables which cannot match the pinned endpoints.
            let table_matches = pinned_from
                .as_ref()
                .is_none_or(|&(archetype, _)| id.from == archetype)
                && pinned_to
                    .as_ref()
                    .is_none_or(|&(archetype, _)| id.to == archetype);
            if !table_matches || row >= table.len() {
                pos += 1;
                row = 0;
                continue;
            }

            let (from_index, to_index) = (table.from(row), table.to(row));
            let row_matches = pinned_from
                .as_ref()
                .is_none_or(|&(_, index)| index == Some(from_index))
                && pinned_to
                    .as_ref()
                    .is_none_or(|&(_, index)| index == Some(to_index));
            if !row_matches {
                row += 1;
                continue;
            }

            // Bind the unpinned endpoints to the row's entities.
            let mut bound = true;
            if !from_pinned {
                bound &= bind(world, cursor, self.from_target, id.from, from_index);
            }
            if !to_pinned {
                bound &= bind(world, cursor, self.to_target, id.to, to_index);
            }
            if !bound {
                row += 1;
                continue;
            }

            cursor.states[state] = NodeState {
                entered: true,
                pos,
                row,
            };
            return true;
        }
    }
}

/// Entity index currently bound to a target
fn entity_index(world: &World, cursor: &QueryCursor, target: usize) -> Option<u32> {
    let table = world.dense_tables().get(cursor.archetypes[target])?;
    if cursor.rows[target] >= table.len() {
        return None;
    }
    Some(table.entity(cursor.rows[target]))
}

/// Bind a target to the dense row of an entity index
fn bind(
    world: &World,
    cursor: &mut QueryCursor,
    target: usize,
    archetype: ArchetypeId,
    index: u32,
) -> bool {
    let Some(table) = world.dense_tables().get(archetype) else {
        return false;
    };
    let Some(row) = table.row_of(index) else {
        return false;
    };
    cursor.archetypes[target] = archetype;
    cursor.rows[target] = row;
    true
}

/// Compiled plan over a term list
pub struct QueryPlan {
    nodes: Vec<PlanNode>,
    /// Declaration index of each node, the stable tie-break for ordering.
    order: Vec<usize>,
    /// Pin mask each node sees: external pins plus earlier nodes' targets.
    pins_before: Vec<u8>,
    targets: usize,
}

impl QueryPlan {
    /// Build the node tree for `terms`
    pub fn compile(terms: &QueryTerms) -> Self {
        let targets = terms.target_count();
        let mut archetype_nodes: Vec<ArchetypeNode> =
            (0..targets).map(ArchetypeNode::new).collect();
        let mut relation_nodes = Vec::new();

        for term in &terms.terms {
            match *term {
                QueryTerm::Component {
                    data_type,
                    target,
                    optional,
                    changed,
                    ..
                } => {
                    let column = ColumnId::base(data_type);
                    if !optional {
                        archetype_nodes[target].require(column);
                    }
                    if changed {
                        archetype_nodes[target].track_changes(column);
                    }
                }
                QueryTerm::With { column, target } => archetype_nodes[target].require(column),
                QueryTerm::Without { column, target } => archetype_nodes[target].exclude(column),
                QueryTerm::Related {
                    data_type,
                    from_target,
                    to_target,
                    min_depth,
                    max_depth,
                } => relation_nodes.push(RelationNode::new(
                    data_type,
                    from_target,
                    to_target,
                    min_depth,
                    max_depth,
                )),
            }
        }

        let mut nodes: Vec<PlanNode> = archetype_nodes
            .into_iter()
            .map(PlanNode::Archetype)
            .collect();
        nodes.extend(relation_nodes.into_iter().map(PlanNode::Relation));
        let order = (0..nodes.len()).collect();
        let mut plan = Self {
            nodes,
            order,
            pins_before: Vec::new(),
            targets,
        };
        plan.rebuild_pins(0);
        plan
    }

    pub fn target_count(&self) -> usize {
        self.targets
    }

    /// Refresh every node's cached matches and reorder by estimated cost
    pub fn update(&mut self, world: &World) {
        for node in &mut self.nodes {
            node.update(world);
        }

        // Cheapest node drives the iteration; stable sort keeps declaration
        // order as the tie-break.
        let mut keyed: Vec<(usize, usize)> = self
            .order
            .iter()
            .map(|&node| (self.nodes[node].estimate(world), node))
            .collect();
        keyed.sort_by_key(|&(estimate, _)| estimate);
        self.order = keyed.into_iter().map(|(_, node)| node).collect();
    }

    fn rebuild_pins(&mut self, external: u8) {
        self.pins_before.clear();
        let mut pinned = external;
        for &node in &self.order {
            self.pins_before.push(pinned);
            pinned |= self.nodes[node].targets();
        }
    }

    /// Start a cursor, optionally with externally pinned targets
    pub fn cursor(&mut self, pins: u8) -> QueryCursor {
        self.rebuild_pins(pins);
        let mut cursor = QueryCursor::new(self.nodes.len());
        cursor.pinned = pins;
        cursor
    }

    /// Advance `cursor` to the next match
    pub fn next(&self, world: &World, cursor: &mut QueryCursor) -> bool {
        if self.nodes.is_empty() {
            return false;
        }
        let count = self.order.len();
        let mut level = if cursor.started {
            count - 1
        } else {
            cursor.started = true;
            for state in &mut cursor.states {
                state.entered = false;
            }
            0
        };

        loop {
            let node = self.order[level];
            let pins = self.pins_before[level];
            if self.nodes[node].next(world, pins, cursor, node) {
                if level + 1 == count {
                    return true;
                }
                level += 1;
                let next_node = self.order[level];
                cursor.states[next_node].entered = false;
            } else {
                if level == 0 {
                    return false;
                }
                level -= 1;
            }
        }
    }

    /// Matched archetypes of a target, after the latest update
    pub fn matched_archetypes(&self, target: usize) -> &[ArchetypeId] {
        for node in &self.nodes {
            if let PlanNode::Archetype(archetype_node) = node {
                if archetype_node.target == target {
                    return &archetype_node.active;
                }
            }
        }
        &[]
    }

    /// Sum of matched row counts per target, a coarse cardinality signal
    pub fn estimate(&self, world: &World, target: usize) -> usize {
        self.matched_archetypes(target)
            .iter()
            .filter_map(|&archetype| world.dense_tables().get(archetype))
            .map(|table| table.len())
            .sum()
    }

    /// Columns written by `terms`, bumped when a write view is acquired
    pub fn write_columns(terms: &QueryTerms) -> Vec<(usize, ColumnId)> {
        terms
            .terms
            .iter()
            .filter_map(|term| match *term {
                QueryTerm::Component {
                    data_type,
                    target,
                    access: Access::Write,
                    ..
                } => Some((target, ColumnId::base(data_type))),
                _ => None,
            })
            .collect()
    }
}
