//! Application driver: plugins, startup and the main loop
//!
//! The driver owns the world plus two schedules. Startup runs exactly once;
//! every frame afterwards advances the clock, prunes event pipes, and
//! executes the main plan. Plugins install in dependency order; a missing
//! dependency or a double install is a programmer error.

use ahash::AHashSet;

use crate::error::Result;
use crate::executor::Executor;
use crate::impl_reflect;
use crate::schedule::Schedule;
use crate::world::World;

/// Logical clock resource advanced by the driver once per frame
#[derive(Clone, Default)]
pub struct FrameClock {
    frame: u64,
    delta_seconds: f32,
    elapsed_seconds: f32,
    last: Option<std::time::Instant>,
}
impl_reflect!(FrameClock, "FrameClock");

impl FrameClock {
    /// Frames completed so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Wall-clock seconds since the previous frame
    pub fn delta_seconds(&self) -> f32 {
        self.delta_seconds
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.elapsed_seconds
    }

    fn tick(&mut self) {
        let now = std::time::Instant::now();
        if let Some(last) = self.last {
            self.delta_seconds = now.duration_since(last).as_secs_f32();
            self.elapsed_seconds += self.delta_seconds;
        }
        self.last = Some(now);
        self.frame += 1;
    }
}

/// Resource systems set to stop the main loop at the next barrier
#[derive(Clone, Default)]
pub struct ShouldQuit(pub bool);
impl_reflect!(ShouldQuit, "ShouldQuit");

/// A modular piece of an application
pub trait Plugin {
    fn name(&self) -> &'static str;

    /// Names of plugins which must be installed first
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    fn build(&self, app: &mut App);
}

/// Owns the world and drives the frame loop
pub struct App {
    pub world: World,
    startup: Schedule,
    main: Schedule,
    startup_executor: Executor,
    main_executor: Executor,
    installed: AHashSet<&'static str>,
    started: bool,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        let mut world = World::new();
        world.insert_resource(FrameClock::default());
        world.insert_resource(ShouldQuit(false));
        Self {
            world,
            startup: Schedule::new(),
            main: Schedule::new(),
            startup_executor: Executor::new(),
            main_executor: Executor::new(),
            installed: AHashSet::new(),
            started: false,
        }
    }

    /// Install a plugin after its dependencies
    ///
    /// # Panics
    /// Panics when a dependency is missing or the plugin was already
    /// installed.
    pub fn add_plugin<P: Plugin>(&mut self, plugin: P) -> &mut Self {
        let name = plugin.name();
        assert!(
            !self.installed.contains(name),
            "plugin `{name}` installed twice"
        );
        for dependency in plugin.dependencies() {
            assert!(
                self.installed.contains(dependency),
                "plugin `{name}` depends on `{dependency}`, which is not installed"
            );
        }
        tracing::debug!(plugin = name, "installing plugin");
        self.installed.insert(name);
        plugin.build(self);
        self
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.installed.contains(name)
    }

    /// Schedule run once before the first frame
    pub fn startup(&mut self) -> &mut Schedule {
        &mut self.startup
    }

    /// Schedule run every frame
    pub fn schedule(&mut self) -> &mut Schedule {
        &mut self.main
    }

    /// Register an event pipe resource for `T`
    pub fn add_event<T: Send + Sync + 'static>(&mut self) -> &mut Self {
        self.world.register_event::<T>();
        self
    }

    /// Run the startup schedule; later calls are no-ops
    pub fn run_startup(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        self.startup_executor.run(&mut self.startup, &mut self.world)
    }

    /// Advance the clock, prune event pipes, execute the main plan
    pub fn run_frame(&mut self) -> Result<()> {
        self.world.write_resource::<FrameClock>().tick();
        self.world.prune_events();
        self.main_executor.run(&mut self.main, &mut self.world)
    }

    /// Run startup, then frames until a system requests a shutdown
    pub fn run_until_quit(&mut self) -> Result<()> {
        self.run_startup()?;
        loop {
            self.run_frame()?;
            if self.world.read_resource::<ShouldQuit>().0 {
                return Ok(());
            }
        }
    }

    /// Ask the main loop to stop at the next commit barrier
    pub fn quit(world: &World) {
        world.write_resource::<ShouldQuit>().0 = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::system;

    struct BasePlugin;
    impl Plugin for BasePlugin {
        fn name(&self) -> &'static str {
            "base"
        }
        fn build(&self, _app: &mut App) {}
    }

    struct DependentPlugin;
    impl Plugin for DependentPlugin {
        fn name(&self) -> &'static str {
            "dependent"
        }
        fn dependencies(&self) -> &'static [&'static str] {
            &["base"]
        }
        fn build(&self, app: &mut App) {
            app.add_event::<u32>();
        }
    }

    #[test]
    fn plugins_install_in_dependency_order() {
        let mut app = App::new();
        app.add_plugin(BasePlugin).add_plugin(DependentPlugin);
        assert!(app.has_plugin("base"));
        assert!(app.has_plugin("dependent"));
    }

    #[test]
    #[should_panic(expected = "depends on")]
    fn missing_dependency_panics() {
        let mut app = App::new();
        app.add_plugin(DependentPlugin);
    }

    #[test]
    #[should_panic(expected = "installed twice")]
    fn double_install_panics() {
        let mut app = App::new();
        app.add_plugin(BasePlugin).add_plugin(BasePlugin);
    }

    #[test]
    fn startup_runs_once() {
        let mut app = App::new();
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = counter.clone();
        app.startup().add(system("count").build(move |_| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }));

        app.run_startup().unwrap();
        app.run_startup().unwrap();
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn frames_advance_the_clock() {
        let mut app = App::new();
        app.run_frame().unwrap();
        app.run_frame().unwrap();
        assert_eq!(app.world.read_resource::<FrameClock>().frame(), 2);
    }

    #[test]
    fn quit_stops_the_loop() {
        let mut app = App::new();
        app.schedule().add(
            system("stop")
                .build(|ctx| {
                    App::quit(ctx.world());
                    Ok(())
                }),
        );
        app.run_until_quit().unwrap();
        assert!(app.world.read_resource::<ShouldQuit>().0);
    }
}
