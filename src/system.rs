//! Systems: callables with a declared access set
//!
//! The scheduler trusts the access set completely; it is how conflicting
//! systems end up in different parallel groups. Closure systems are built
//! through [`system`], declaring access from registration ids and query
//! terms.

use smallvec::SmallVec;

use crate::command::{CommandBuffer, Commands};
use crate::error::Result;
use crate::query::QueryTerms;
use crate::types::DataTypeId;
use crate::world::World;

/// The data a system touches, by registered type
#[derive(Debug, Clone, Default)]
pub struct SystemAccess {
    pub reads: SmallVec<[DataTypeId; 8]>,
    pub writes: SmallVec<[DataTypeId; 8]>,
    /// Exclusive systems conflict with everything.
    pub exclusive: bool,
    /// Whether the system queues commands, forcing a barrier after its stage.
    pub emits_commands: bool,
}

impl SystemAccess {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn add_read(&mut self, data_type: DataTypeId) {
        if !self.reads.contains(&data_type) {
            self.reads.push(data_type);
        }
    }

    pub fn add_write(&mut self, data_type: DataTypeId) {
        if !self.writes.contains(&data_type) {
            self.writes.push(data_type);
        }
    }

    /// Fold a query's term accesses in
    pub fn add_terms(&mut self, terms: &QueryTerms) {
        let mut reads = Vec::new();
        let mut writes = Vec::new();
        terms.collect_access(&mut reads, &mut writes);
        for read in reads {
            self.add_read(read);
        }
        for write in writes {
            self.add_write(write);
        }
    }

    /// Whether two systems may not share a parallel group
    pub fn conflicts_with(&self, other: &SystemAccess) -> bool {
        if self.exclusive || other.exclusive {
            return true;
        }
        for write in &self.writes {
            if other.writes.contains(write) || other.reads.contains(write) {
                return true;
            }
        }
        for read in &self.reads {
            if other.writes.contains(read) {
                return true;
            }
        }
        false
    }
}

/// What a running system sees: the world plus its own command buffer
pub struct SystemContext<'w> {
    world: &'w World,
    buffer: &'w CommandBuffer,
}

impl<'w> SystemContext<'w> {
    pub fn new(world: &'w World, buffer: &'w CommandBuffer) -> Self {
        Self { world, buffer }
    }

    pub fn world(&self) -> &'w World {
        self.world
    }

    pub fn commands(&self) -> Commands<'w> {
        Commands::new(self.world, self.buffer)
    }
}

/// A schedulable unit of work
pub trait System: Send {
    fn name(&self) -> &str;

    fn access(&self) -> &SystemAccess;

    /// Gate evaluated immediately before the system would run
    fn should_run(&mut self, world: &World) -> bool {
        let _ = world;
        true
    }

    fn run(&mut self, ctx: &SystemContext<'_>) -> Result<()>;
}

pub type BoxedSystem = Box<dyn System>;

/// Start building a closure system
pub fn system(name: impl Into<String>) -> SystemBuilder {
    SystemBuilder {
        name: name.into(),
        access: SystemAccess::empty(),
        condition: None,
    }
}

/// Builder returned by [`system`]
pub struct SystemBuilder {
    name: String,
    access: SystemAccess,
    condition: Option<Box<dyn FnMut(&World) -> bool + Send>>,
}

impl SystemBuilder {
    /// Declare shared access to a registered type
    pub fn reads(mut self, data_type: DataTypeId) -> Self {
        self.access.add_read(data_type);
        self
    }

    /// Declare exclusive access to a registered type
    pub fn writes(mut self, data_type: DataTypeId) -> Self {
        self.access.add_write(data_type);
        self
    }

    /// Fold in the accesses of a query the system will run
    pub fn with_query(mut self, terms: &QueryTerms) -> Self {
        self.access.add_terms(terms);
        self
    }

    /// Conflict with every other system
    pub fn exclusive(mut self) -> Self {
        self.access.exclusive = true;
        self
    }

    /// Mark the system as queueing commands
    pub fn with_commands(mut self) -> Self {
        self.access.emits_commands = true;
        self
    }

    /// Attach a gating predicate
    pub fn run_if(mut self, condition: impl FnMut(&World) -> bool + Send + 'static) -> Self {
        self.condition = Some(Box::new(condition));
        self
    }

    pub fn build(
        self,
        func: impl FnMut(&SystemContext<'_>) -> Result<()> + Send + 'static,
    ) -> FnSystem {
        FnSystem {
            name: self.name,
            access: self.access,
            condition: self.condition,
            func: Box::new(func),
        }
    }
}

/// Closure-backed system
pub struct FnSystem {
    name: String,
    access: SystemAccess,
    condition: Option<Box<dyn FnMut(&World) -> bool + Send>>,
    func: Box<dyn FnMut(&SystemContext<'_>) -> Result<()> + Send>,
}

impl System for FnSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn access(&self) -> &SystemAccess {
        &self.access
    }

    fn should_run(&mut self, world: &World) -> bool {
        match &mut self.condition {
            Some(condition) => condition(world),
            None => true,
        }
    }

    fn run(&mut self, ctx: &SystemContext<'_>) -> Result<()> {
        (self.func)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_conflicts() {
        let mut a = SystemAccess::empty();
        a.add_write(DataTypeId(0));
        let mut b = SystemAccess::empty();
        b.add_read(DataTypeId(0));
        let mut c = SystemAccess::empty();
        c.add_read(DataTypeId(1));

        assert!(a.conflicts_with(&b));
        assert!(b.conflicts_with(&a));
        assert!(!a.conflicts_with(&c));
        assert!(!b.conflicts_with(&c));
    }

    #[test]
    fn read_read_is_compatible() {
        let mut a = SystemAccess::empty();
        a.add_read(DataTypeId(0));
        let mut b = SystemAccess::empty();
        b.add_read(DataTypeId(0));
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn exclusive_conflicts_with_everything() {
        let mut a = SystemAccess::empty();
        a.exclusive = true;
        let b = SystemAccess::empty();
        assert!(a.conflicts_with(&b));
        assert!(b.conflicts_with(&a));
    }
}
