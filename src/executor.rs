//! Frame execution over a built schedule
//!
//! Groups within a stage run in parallel (with the `parallel` feature) or
//! sequentially in group order; either way every system writes into its own
//! command buffer. The barrier after each stage merges those buffers in
//! registration order, commits them, runs observers, then checks for a
//! requested shutdown.

use crate::app::ShouldQuit;
use crate::command::CommandBuffer;
use crate::error::{EcsError, Result};
use crate::schedule::Schedule;
use crate::system::SystemContext;
use crate::world::World;

/// Drives a schedule against a world
#[derive(Default)]
pub struct Executor {
    /// One buffer per system, indexed like the schedule's slots.
    buffers: Vec<CommandBuffer>,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute one pass over the whole schedule
    pub fn run(&mut self, schedule: &mut Schedule, world: &mut World) -> Result<()> {
        schedule.ensure_built()?;
        while self.buffers.len() < schedule.len() {
            self.buffers.push(CommandBuffer::new());
        }

        let stages = schedule.plan().stages.clone();
        for stage in &stages {
            for group in &stage.groups {
                self.run_group(schedule, world, group)?;
            }

            // Commit barrier: merge the stage's buffers in registration
            // order, apply, fire observers.
            let mut indices: Vec<usize> = stage.groups.iter().flatten().copied().collect();
            indices.sort_unstable();
            let pending = indices.iter().any(|&index| !self.buffers[index].is_empty());
            if pending {
                let merged = CommandBuffer::new();
                for &index in &indices {
                    merged.append(&self.buffers[index]);
                }
                world.commit(&merged)?;
            }

            // A requested shutdown takes effect at the barrier.
            if world
                .try_read_resource::<ShouldQuit>()
                .is_some_and(|quit| quit.0)
            {
                break;
            }
        }
        Ok(())
    }

    fn run_group(&self, schedule: &Schedule, world: &World, group: &[usize]) -> Result<()> {
        #[cfg(feature = "parallel")]
        if group.len() > 1 {
            use rayon::prelude::*;
            return group
                .par_iter()
                .map(|&index| self.run_one(schedule, world, index))
                .collect::<Result<Vec<()>>>()
                .map(|_| ());
        }

        for &index in group {
            self.run_one(schedule, world, index)?;
        }
        Ok(())
    }

    fn run_one(&self, schedule: &Schedule, world: &World, index: usize) -> Result<()> {
        let slot = &schedule.slots()[index];
        let mut system = slot.system.lock();
        if !system.should_run(world) {
            return Ok(());
        }

        let span = tracing::debug_span!("system", name = %slot.name);
        let _guard = span.enter();
        let ctx = SystemContext::new(world, &self.buffers[index]);
        system
            .run(&ctx)
            .map_err(|e| EcsError::System(slot.name.clone(), e.to_string()))
    }
}
