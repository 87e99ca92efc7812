use reflex_ecs::prelude::*;

#[derive(Clone, Default, Debug, PartialEq)]
struct Pos {
    x: f32,
}
impl_reflect!(Pos, "Pos", fields: [x]);

#[derive(Clone, Default, Debug, PartialEq)]
struct Label(String);
impl_reflect!(Label, "Label");

#[derive(Clone, Default, Debug, PartialEq)]
struct Channel {
    value: u64,
}
impl_reflect!(Channel, "Channel");

#[derive(Clone, Debug, PartialEq)]
struct Damage {
    amount: u32,
}

#[test]
fn ordered_systems_communicate_through_a_resource() {
    let mut app = App::new();
    let channel = app.world.insert_resource(Channel { value: 0 });
    let clock = app.world.types().id_of::<FrameClock>().unwrap();

    // The writer stamps the frame number; the reader checks it every frame.
    app.schedule().add(
        system("writer")
            .reads(clock)
            .writes(channel)
            .build(|ctx| {
                let frame = ctx.world().read_resource::<FrameClock>().frame();
                ctx.world().write_resource::<Channel>().value = frame;
                Ok(())
            }),
    );
    app.schedule()
        .add(
            system("reader")
                .reads(clock)
                .reads(channel)
                .build(|ctx| {
                    let frame = ctx.world().read_resource::<FrameClock>().frame();
                    assert_eq!(ctx.world().read_resource::<Channel>().value, frame);
                    Ok(())
                }),
        )
        .after("writer");

    for _ in 0..100 {
        app.run_frame().unwrap();
    }
}

#[test]
fn disjoint_systems_share_a_parallel_group() {
    let mut world = World::new();
    let pos = world.register_component::<Pos>();
    let label = world.register_component::<Label>();

    for i in 0..64 {
        let e = world.create();
        world.add(e, Pos { x: i as f32 });
        world.add(e, Label(format!("e{i}")));
    }

    let mut schedule = Schedule::new();
    schedule.add(system("move").writes(pos).build(|ctx| {
        let mut query = ctx.world().query::<&mut Pos>();
        for p in query.view(ctx.world()) {
            p.x += 1.0;
        }
        Ok(())
    }));
    schedule.add(system("read-labels").reads(label).build(|ctx| {
        let mut query = ctx.world().query::<&Label>();
        assert_eq!(query.view(ctx.world()).count(), 64);
        Ok(())
    }));
    schedule.ensure_built().unwrap();

    let mut executor = Executor::new();
    for _ in 0..4 {
        executor.run(&mut schedule, &mut world).unwrap();
    }

    let mut query = world.query::<&Pos>();
    let total: f32 = query.view(&world).map(|p| p.x).sum();
    // Sum of 0..64 plus 4 increments each.
    assert_eq!(total, (0..64).sum::<i32>() as f32 + 64.0 * 4.0);
}

#[test]
fn commands_commit_between_stages() {
    let mut world = World::new();
    let pos = world.register_component::<Pos>();

    let mut schedule = Schedule::new();
    schedule.add(
        system("spawner")
            .with_commands()
            .build(|ctx| {
                let commands = ctx.commands();
                let e = commands.create();
                commands.add(e, Pos { x: 1.0 });
                Ok(())
            }),
    );
    schedule
        .add(system("counter").reads(pos).build(|ctx| {
            // Runs in the next stage, after the commit barrier.
            let mut query = ctx.world().query::<&Pos>();
            assert!(query.view(ctx.world()).count() > 0);
            Ok(())
        }))
        .after("spawner");
    schedule.ensure_built().unwrap();

    let mut executor = Executor::new();
    executor.run(&mut schedule, &mut world).unwrap();

    let mut query = world.query::<&Pos>();
    assert_eq!(query.view(&world).count(), 1);
}

#[test]
fn run_if_gates_systems() {
    let mut app = App::new();
    let channel = app.world.insert_resource(Channel { value: 0 });

    app.schedule().add(
        system("gated")
            .writes(channel)
            .run_if(|world| world.read_resource::<FrameClock>().frame() % 2 == 0)
            .build(|ctx| {
                ctx.world().write_resource::<Channel>().value += 1;
                Ok(())
            }),
    );

    for _ in 0..4 {
        app.run_frame().unwrap();
    }
    // Frames 1..=4: only the two even frames ran the system.
    assert_eq!(app.world.read_resource::<Channel>().value, 2);
}

#[test]
fn startup_then_frames() {
    let mut app = App::new();
    app.world.register_component::<Pos>();

    app.startup().add(system("seed").with_commands().build(|ctx| {
        let commands = ctx.commands();
        for i in 0..3 {
            let e = commands.create();
            commands.add(e, Pos { x: i as f32 });
        }
        Ok(())
    }));

    app.run_startup().unwrap();
    let mut query = app.world.query::<&Pos>();
    assert_eq!(query.view(&app.world).count(), 3);
}

#[test]
fn events_flow_between_systems_across_frames() {
    let mut app = App::new();
    app.add_event::<Damage>();
    let pipe = app.world.types().id_of::<EventPipe<Damage>>().unwrap();
    let total = app.world.insert_resource(Channel { value: 0 });

    app.schedule().add(
        system("emit")
            .writes(pipe)
            .build(|ctx| {
                let pipe = ctx.world().read_resource::<EventPipe<Damage>>();
                EventWriter::new(&pipe).push(Damage { amount: 5 });
                Ok(())
            }),
    );

    let mut reader: Option<EventReader<Damage>> = None;
    app.schedule()
        .add(
            system("consume")
                .reads(pipe)
                .writes(total)
                .build(move |ctx| {
                    let pipe = ctx.world().read_resource::<EventPipe<Damage>>();
                    let reader = reader.get_or_insert_with(|| EventReader::new(&pipe));
                    let mut sum = 0u64;
                    reader.for_each(&pipe, |damage| sum += damage.amount as u64);
                    ctx.world().write_resource::<Channel>().value += sum;
                    Ok(())
                }),
        )
        .after("emit");

    for _ in 0..3 {
        app.run_frame().unwrap();
    }
    assert_eq!(app.world.read_resource::<Channel>().value, 15);

    // Every event was read by the only reader, so pruning drains the pipe.
    app.world.prune_events();
    assert!(app.world.read_resource::<EventPipe<Damage>>().is_empty());
}
