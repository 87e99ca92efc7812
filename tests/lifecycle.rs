use reflex_ecs::prelude::*;
use reflex_ecs::{ArchetypeId, ColumnId};

#[derive(Clone, Default, Debug, PartialEq)]
struct Pos {
    x: f32,
    y: f32,
    z: f32,
}
impl_reflect!(Pos, "Pos", fields: [x, y, z]);

#[derive(Clone, Default, Debug, PartialEq)]
struct Vel {
    x: f32,
}
impl_reflect!(Vel, "Vel", fields: [x]);

#[test]
fn basic_lifecycle() {
    let mut world = World::new();
    let pos = world.register_component::<Pos>();

    let e = world.create();
    assert!(world.add(e, Pos { x: 1.0, y: 2.0, z: 3.0 }));

    assert_eq!(world.get::<Pos>(e), Some(&Pos { x: 1.0, y: 2.0, z: 3.0 }));
    let expected = world
        .archetype_graph()
        .with(ArchetypeId::EMPTY, ColumnId::base(pos));
    assert_eq!(world.archetype_of(e), Some(expected));

    assert!(world.remove::<Pos>(e));
    assert_eq!(world.archetype_of(e), Some(ArchetypeId::EMPTY));
    assert_eq!(world.get::<Pos>(e), None);

    assert!(world.destroy(e));
    assert!(!world.is_valid(e));
}

#[test]
fn destroyed_handles_never_revalidate() {
    let mut world = World::new();
    world.register_component::<Pos>();

    let stale = world.create();
    world.add(stale, Pos::default());
    world.destroy(stale);

    for _ in 0..16 {
        let fresh = world.create();
        assert!(!world.is_valid(stale));
        assert!(world.is_valid(fresh));
    }
    assert_eq!(world.get::<Pos>(stale), None);
    assert!(!world.remove::<Pos>(stale));
    assert!(!world.destroy(stale));
}

#[test]
fn add_remove_add_matches_a_fresh_add() {
    let mut world = World::new();
    world.register_component::<Pos>();
    world.register_component::<Vel>();

    let recycled = world.create();
    world.add(recycled, Vel { x: 9.0 });
    world.add(recycled, Pos { x: 1.0, y: 2.0, z: 3.0 });
    world.remove::<Pos>(recycled);
    world.add(recycled, Pos { x: 1.0, y: 2.0, z: 3.0 });

    let fresh = world.create();
    world.add(fresh, Vel { x: 9.0 });
    world.add(fresh, Pos { x: 1.0, y: 2.0, z: 3.0 });

    assert_eq!(world.get::<Pos>(recycled), world.get::<Pos>(fresh));
    assert_eq!(world.get::<Vel>(recycled), world.get::<Vel>(fresh));
    assert_eq!(world.archetype_of(recycled), world.archetype_of(fresh));
}

#[test]
fn stale_operations_are_tolerated() {
    let mut world = World::new();
    world.register_component::<Pos>();

    let e = world.create();
    world.destroy(e);

    assert!(!world.add(e, Pos::default()));
    assert!(!world.has::<Pos>(e));
    assert_eq!(world.get::<Pos>(e), None);
}

#[test]
fn superset_iteration_resumes() {
    let mut world = World::new();
    world.register_component::<Pos>();
    world.register_component::<Vel>();

    let a = world.create();
    world.add(a, Pos::default());
    let b = world.create();
    world.add(b, Pos::default());
    world.add(b, Vel::default());
    let plain = world.create();

    let with_pos = world.archetype_of(a).unwrap();
    let mut out = Vec::new();
    let cursor = world.iter_superset(with_pos, 0, &mut out);
    assert_eq!(out, vec![a, b]);
    assert!(!out.contains(&plain));

    let c = world.create();
    world.add(c, Pos::default());
    let mut more = Vec::new();
    world.iter_superset(with_pos, cursor, &mut more);
    assert_eq!(more, vec![c]);
}
