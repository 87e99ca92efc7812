//! The frame plan: ordering constraints, stages and parallel coloring
//!
//! Systems and tags carry `before`/`after` constraints; tag constraints
//! propagate to every member. A topological sort (Kahn) yields stages of
//! tied systems; within each stage a greedy coloring over the access
//! conflict graph, highest conflict degree first, produces the parallel
//! groups. Cycles and dangling constraint targets are build errors.

use std::collections::VecDeque;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::{EcsError, Result};
use crate::system::{BoxedSystem, System};

/// Handle to a named system group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag(usize);

/// Target of an ordering constraint
#[derive(Debug, Clone)]
pub enum OrderRef {
    /// Every system with this name
    System(String),
    /// Every member of the tag
    Tag(Tag),
}

struct TagData {
    name: String,
    before: Vec<OrderRef>,
    after: Vec<OrderRef>,
}

pub(crate) struct SystemSlot {
    pub(crate) system: Mutex<BoxedSystem>,
    pub(crate) name: String,
    tags: SmallVec<[usize; 2]>,
    before: Vec<OrderRef>,
    after: Vec<OrderRef>,
}

/// One stage of the built plan: parallel groups bounded by a commit barrier
#[derive(Debug, Clone)]
pub(crate) struct Stage {
    pub(crate) groups: Vec<Vec<usize>>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Plan {
    pub(crate) stages: Vec<Stage>,
}

/// Ordered collection of systems, lazily compiled into a plan
#[derive(Default)]
pub struct Schedule {
    systems: Vec<SystemSlot>,
    tags: Vec<TagData>,
    plan: Option<Plan>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Create (or look up) a tag by name
    pub fn tag(&mut self, name: impl Into<String>) -> Tag {
        let name = name.into();
        if let Some(index) = self.tags.iter().position(|t| t.name == name) {
            return Tag(index);
        }
        self.tags.push(TagData {
            name,
            before: Vec::new(),
            after: Vec::new(),
        });
        Tag(self.tags.len() - 1)
    }

    /// Constrain every member of `tag` to run before `target`
    pub fn tag_before(&mut self, tag: Tag, target: OrderRef) {
        self.tags[tag.0].before.push(target);
        self.plan = None;
    }

    /// Constrain every member of `tag` to run after `target`
    pub fn tag_after(&mut self, tag: Tag, target: OrderRef) {
        self.tags[tag.0].after.push(target);
        self.plan = None;
    }

    /// Add a system; the returned config attaches tags and constraints
    pub fn add(&mut self, system: impl System + 'static) -> SystemConfig<'_> {
        let name = system.name().to_string();
        self.systems.push(SystemSlot {
            system: Mutex::new(Box::new(system)),
            name,
            tags: SmallVec::new(),
            before: Vec::new(),
            after: Vec::new(),
        });
        self.plan = None;
        let index = self.systems.len() - 1;
        SystemConfig {
            schedule: self,
            index,
        }
    }

    /// Compile the plan if constraints or membership changed
    pub fn ensure_built(&mut self) -> Result<()> {
        if self.plan.is_none() {
            self.plan = Some(self.build_plan()?);
        }
        Ok(())
    }

    pub(crate) fn plan(&self) -> &Plan {
        self.plan.as_ref().expect("schedule not built")
    }

    pub(crate) fn slots(&self) -> &[SystemSlot] {
        &self.systems
    }

    /// Resolve an ordering target to system indices
    fn resolve(&self, target: &OrderRef) -> Result<Vec<usize>> {
        match target {
            OrderRef::System(name) => {
                let matches: Vec<usize> = self
                    .systems
                    .iter()
                    .enumerate()
                    .filter(|(_, slot)| &slot.name == name)
                    .map(|(index, _)| index)
                    .collect();
                if matches.is_empty() {
                    return Err(EcsError::UnknownOrderingTarget(name.clone()));
                }
                Ok(matches)
            }
            OrderRef::Tag(tag) => Ok(self
                .systems
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.tags.contains(&tag.0))
                .map(|(index, _)| index)
                .collect()),
        }
    }

    fn build_plan(&self) -> Result<Plan> {
        let count = self.systems.len();
        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut in_degree = vec![0usize; count];

        let add_edge = |edges: &mut Vec<Vec<usize>>,
                            in_degree: &mut Vec<usize>,
                            from: usize,
                            to: usize| {
            if from != to && !edges[from].contains(&to) {
                edges[from].push(to);
                in_degree[to] += 1;
            }
        };

        // System-level constraints.
        for (index, slot) in self.systems.iter().enumerate() {
            for target in &slot.before {
                for other in self.resolve(target)? {
                    add_edge(&mut edges, &mut in_degree, index, other);
                }
            }
            for target in &slot.after {
                for other in self.resolve(target)? {
                    add_edge(&mut edges, &mut in_degree, other, index);
                }
            }
        }

        // Tag-level constraints propagate to every member.
        for (tag_index, tag) in self.tags.iter().enumerate() {
            let members: Vec<usize> = self
                .systems
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.tags.contains(&tag_index))
                .map(|(index, _)| index)
                .collect();
            for target in &tag.before {
                for other in self.resolve(target)? {
                    for &member in &members {
                        add_edge(&mut edges, &mut in_degree, member, other);
                    }
                }
            }
            for target in &tag.after {
                for other in self.resolve(target)? {
                    for &member in &members {
                        add_edge(&mut edges, &mut in_degree, other, member);
                    }
                }
            }
        }

        // Kahn's algorithm, tracking the depth tier of every system.
        let mut queue: VecDeque<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut tier = vec![0usize; count];
        let mut sorted = Vec::with_capacity(count);
        while let Some(index) = queue.pop_front() {
            sorted.push(index);
            for &next in &edges[index] {
                tier[next] = tier[next].max(tier[index] + 1);
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if sorted.len() != count {
            let stuck: Vec<&str> = (0..count)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.systems[i].name.as_str())
                .collect();
            return Err(EcsError::OrderingCycle(stuck.join(", ")));
        }

        // Stage per tier, in index order within the tier for determinism.
        let tiers = tier.iter().copied().max().map_or(0, |max| max + 1);
        let mut stages = Vec::with_capacity(tiers);
        for level in 0..tiers {
            let members: Vec<usize> = (0..count).filter(|&i| tier[i] == level).collect();
            stages.push(Stage {
                groups: self.color_stage(&members),
            });
        }

        tracing::debug!(
            systems = count,
            stages = stages.len(),
            "built schedule plan"
        );
        Ok(Plan { stages })
    }

    /// Greedy coloring over the access conflict graph, highest conflict
    /// degree first. Groups within a stage run in parallel.
    fn color_stage(&self, members: &[usize]) -> Vec<Vec<usize>> {
        let conflicts = |a: usize, b: usize| {
            let sa = self.systems[a].system.lock();
            let sb = self.systems[b].system.lock();
            sa.access().conflicts_with(sb.access())
        };

        let mut degree: FxHashMap<usize, usize> = FxHashMap::default();
        for &a in members {
            let d = members
                .iter()
                .filter(|&&b| a != b && conflicts(a, b))
                .count();
            degree.insert(a, d);
        }

        let mut ordered: Vec<usize> = members.to_vec();
        ordered.sort_by_key(|&index| (std::cmp::Reverse(degree[&index]), index));

        let mut groups: Vec<Vec<usize>> = Vec::new();
        for &index in &ordered {
            let slot = groups.iter_mut().find(|group| {
                group.iter().all(|&existing| !conflicts(existing, index))
            });
            match slot {
                Some(group) => group.push(index),
                None => groups.push(vec![index]),
            }
        }

        // Keep execution deterministic inside a group.
        for group in &mut groups {
            group.sort_unstable();
        }
        groups
    }
}

/// Configuration handle returned by [`Schedule::add`]
pub struct SystemConfig<'s> {
    schedule: &'s mut Schedule,
    index: usize,
}

impl SystemConfig<'_> {
    /// Add the system to a tag
    pub fn in_tag(self, tag: Tag) -> Self {
        self.schedule.systems[self.index].tags.push(tag.0);
        self.schedule.plan = None;
        self
    }

    /// Run before every system with the given name
    pub fn before(self, name: impl Into<String>) -> Self {
        self.schedule.systems[self.index]
            .before
            .push(OrderRef::System(name.into()));
        self.schedule.plan = None;
        self
    }

    /// Run after every system with the given name
    pub fn after(self, name: impl Into<String>) -> Self {
        self.schedule.systems[self.index]
            .after
            .push(OrderRef::System(name.into()));
        self.schedule.plan = None;
        self
    }

    /// Run before every member of the tag
    pub fn before_tag(self, tag: Tag) -> Self {
        self.schedule.systems[self.index]
            .before
            .push(OrderRef::Tag(tag));
        self.schedule.plan = None;
        self
    }

    /// Run after every member of the tag
    pub fn after_tag(self, tag: Tag) -> Self {
        self.schedule.systems[self.index]
            .after
            .push(OrderRef::Tag(tag));
        self.schedule.plan = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::system;
    use crate::types::DataTypeId;

    fn noop(name: &str) -> crate::system::FnSystem {
        system(name).build(|_| Ok(()))
    }

    #[test]
    fn before_after_order_systems() {
        let mut schedule = Schedule::new();
        schedule.add(noop("b")).after("a");
        schedule.add(noop("a"));
        schedule.ensure_built().unwrap();

        let plan = schedule.plan();
        assert_eq!(plan.stages.len(), 2);
        assert_eq!(plan.stages[0].groups, vec![vec![1]]);
        assert_eq!(plan.stages[1].groups, vec![vec![0]]);
    }

    #[test]
    fn cycles_are_reported() {
        let mut schedule = Schedule::new();
        schedule.add(noop("a")).before("b");
        schedule.add(noop("b")).before("a");
        assert!(matches!(
            schedule.ensure_built(),
            Err(EcsError::OrderingCycle(_))
        ));
    }

    #[test]
    fn unknown_target_is_an_error() {
        let mut schedule = Schedule::new();
        schedule.add(noop("a")).before("ghost");
        assert!(matches!(
            schedule.ensure_built(),
            Err(EcsError::UnknownOrderingTarget(_))
        ));
    }

    #[test]
    fn tag_constraints_propagate() {
        let mut schedule = Schedule::new();
        let sim = schedule.tag("simulation");
        schedule.add(noop("integrate")).in_tag(sim);
        schedule.add(noop("spawn")).before_tag(sim);
        schedule.ensure_built().unwrap();

        let plan = schedule.plan();
        assert_eq!(plan.stages[0].groups, vec![vec![1]]);
        assert_eq!(plan.stages[1].groups, vec![vec![0]]);
    }

    #[test]
    fn conflicting_systems_split_groups() {
        let mut schedule = Schedule::new();
        schedule.add(system("w1").writes(DataTypeId(0)).build(|_| Ok(())));
        schedule.add(system("w2").writes(DataTypeId(0)).build(|_| Ok(())));
        schedule.add(system("r").reads(DataTypeId(1)).build(|_| Ok(())));
        schedule.ensure_built().unwrap();

        let plan = schedule.plan();
        assert_eq!(plan.stages.len(), 1);
        let groups = &plan.stages[0].groups;
        assert_eq!(groups.len(), 2);
        // The two writers never share a group; the reader joins one of them.
        let of = |i: usize| groups.iter().position(|g| g.contains(&i)).unwrap();
        assert_ne!(of(0), of(1));
    }

    #[test]
    fn disjoint_systems_share_a_group() {
        let mut schedule = Schedule::new();
        schedule.add(system("a").writes(DataTypeId(0)).build(|_| Ok(())));
        schedule.add(system("b").reads(DataTypeId(1)).build(|_| Ok(())));
        schedule.ensure_built().unwrap();

        let plan = schedule.plan();
        assert_eq!(plan.stages[0].groups.len(), 1);
        assert_eq!(plan.stages[0].groups[0], vec![0, 1]);
    }
}
