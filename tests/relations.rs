use reflex_ecs::prelude::*;
use reflex_ecs::CommandBuffer;
use reflex_ecs::reflect::{ConstructibleTrait, SymmetricTrait, TreeTrait, Type};

#[derive(Clone, Default, Debug, PartialEq)]
struct Name(String);
impl_reflect!(Name, "Name");

#[derive(Clone, Default)]
struct ChildOf;

impl Reflect for ChildOf {
    fn reflect() -> Type {
        Type::new("ChildOf")
            .with(
                ConstructibleTrait::typed::<ChildOf>()
                    .with_default()
                    .with_copy()
                    .build(),
            )
            .with(TreeTrait)
    }
}

#[derive(Clone, Default, Debug, PartialEq)]
struct ConnectedTo {
    weight: u32,
}

impl Reflect for ConnectedTo {
    fn reflect() -> Type {
        Type::new("ConnectedTo")
            .with(
                ConstructibleTrait::typed::<ConnectedTo>()
                    .with_default()
                    .with_copy()
                    .build(),
            )
            .with(SymmetricTrait)
    }
}

#[derive(Clone, Default, Debug, PartialEq)]
struct Licensed {
    id: u32,
}
impl_reflect!(Licensed, "Licensed");

#[test]
fn ancestor_traversal_reaches_the_whole_subtree() {
    let mut world = World::new();
    world.register_relation::<ChildOf>();

    let root = world.create();
    let mid = world.create();
    let leaf = world.create();
    assert!(world.relate(mid, root, ChildOf));
    assert!(world.relate(leaf, mid, ChildOf));

    // Entities whose ancestor is `root`, at any depth.
    let mut query = Query::<Entity>::builder(&world)
        .related_deep::<ChildOf>(0, 1)
        .build();
    let mut found: Vec<Entity> = query.view_pinned(&world, 1, root).collect();
    found.sort_unstable();

    let mut expected = vec![mid, leaf];
    expected.sort_unstable();
    assert_eq!(found, expected);
}

#[test]
fn direct_edges_are_depth_zero_only() {
    let mut world = World::new();
    world.register_relation::<ChildOf>();

    let root = world.create();
    let mid = world.create();
    let leaf = world.create();
    world.relate(mid, root, ChildOf);
    world.relate(leaf, mid, ChildOf);

    let mut direct = Query::<Entity>::builder(&world)
        .related::<ChildOf>(0, 1)
        .build();
    let children: Vec<Entity> = direct.view_pinned(&world, 1, root).collect();
    assert_eq!(children, vec![mid]);
}

#[test]
fn symmetric_relations_hold_in_both_directions() {
    let mut world = World::new();
    world.register_relation::<ConnectedTo>();

    let a = world.create();
    let b = world.create();
    world.relate(a, b, ConnectedTo { weight: 7 });

    assert!(world.related::<ConnectedTo>(a, b));
    assert!(world.related::<ConnectedTo>(b, a));
    assert_eq!(world.relation::<ConnectedTo>(a, b), Some(&ConnectedTo { weight: 7 }));
    assert_eq!(world.relation::<ConnectedTo>(b, a), Some(&ConnectedTo { weight: 7 }));

    world.unrelate::<ConnectedTo>(a, b);
    assert!(!world.related::<ConnectedTo>(b, a));
}

#[test]
fn symmetric_invariant_survives_commits() {
    let mut world = World::new();
    world.register_relation::<ConnectedTo>();
    let a = world.create();
    let b = world.create();

    let buffer = CommandBuffer::new();
    Commands::new(&world, &buffer).relate(a, b, ConnectedTo { weight: 1 });
    world.commit(&buffer).unwrap();
    assert!(world.related::<ConnectedTo>(a, b) && world.related::<ConnectedTo>(b, a));

    Commands::new(&world, &buffer).unrelate::<ConnectedTo>(b, a);
    world.commit(&buffer).unwrap();
    assert!(!world.related::<ConnectedTo>(a, b) && !world.related::<ConnectedTo>(b, a));
}

#[test]
fn tree_relations_keep_one_parent() {
    let mut world = World::new();
    world.register_relation::<ChildOf>();

    let child = world.create();
    let first = world.create();
    let second = world.create();

    world.relate(child, first, ChildOf);
    world.relate(child, second, ChildOf);
    assert!(!world.related::<ChildOf>(child, first));
    assert!(world.related::<ChildOf>(child, second));
}

#[test]
fn reparenting_moves_the_subtree() {
    let mut world = World::new();
    world.register_relation::<ChildOf>();

    let old_root = world.create();
    let new_root = world.create();
    let mid = world.create();
    let leaf = world.create();
    world.relate(mid, old_root, ChildOf);
    world.relate(leaf, mid, ChildOf);

    world.relate(mid, new_root, ChildOf);

    fn under(root: Entity, world: &World) -> usize {
        let mut query = Query::<Entity>::builder(world)
            .related_deep::<ChildOf>(0, 1)
            .build();
        query.view_pinned(world, 1, root).count()
    }
    assert_eq!(under(old_root, &world), 0);
    assert_eq!(under(new_root, &world), 2);
}

#[test]
fn relations_follow_archetype_moves() {
    let mut world = World::new();
    world.register_component::<Name>();
    world.register_relation::<ChildOf>();

    let root = world.create();
    let leaf = world.create();
    world.relate(leaf, root, ChildOf);

    // Moving an endpoint to a different archetype re-homes the rows.
    world.add(leaf, Name("leaf".into()));
    world.add(root, Name("root".into()));
    assert!(world.related::<ChildOf>(leaf, root));

    world.remove::<Name>(root);
    assert!(world.related::<ChildOf>(leaf, root));
}

#[test]
fn destroying_an_endpoint_severs_rows() {
    let mut world = World::new();
    world.register_relation::<ConnectedTo>();

    let a = world.create();
    let b = world.create();
    world.relate(a, b, ConnectedTo { weight: 1 });

    world.destroy(b);
    assert!(!world.is_valid(b));

    // The surviving endpoint no longer sees the edge.
    let c = world.create();
    world.relate(a, c, ConnectedTo { weight: 2 });
    assert!(world.related::<ConnectedTo>(a, c));
}

#[test]
fn relation_values_are_per_edge() {
    let mut world = World::new();
    world.register_relation::<Licensed>();

    let a = world.create();
    let b = world.create();
    let c = world.create();
    world.relate(a, b, Licensed { id: 1 });
    world.relate(a, c, Licensed { id: 2 });

    assert_eq!(world.relation::<Licensed>(a, b), Some(&Licensed { id: 1 }));
    assert_eq!(world.relation::<Licensed>(a, c), Some(&Licensed { id: 2 }));
    assert_eq!(world.relation::<Licensed>(b, a), None);
}
