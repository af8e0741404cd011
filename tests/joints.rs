//! Joint integration tests
//!
//! Joints participate in the constraint graph like contacts: they link
//! bodies into islands and may suppress collision between their bodies.

use flux2d::{
    BodyDef, BodyType, FixtureDef, JointDef, JointDefKind, SerialExecutor, Shape, World,
    NULL_INDEX,
};
use glam::Vec2;

const DT: f32 = 1.0 / 60.0;

#[test]
fn test_distance_joint_holds_length() {
    let mut world = World::new(Vec2::new(0.0, -10.0));
    let mut executor = SerialExecutor::new();

    let anchor = world
        .create_body(&BodyDef {
            position: Vec2::new(0.0, 10.0),
            ..Default::default()
        })
        .unwrap();
    let bob = world
        .create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::new(0.0, 7.0),
            ..Default::default()
        })
        .unwrap();
    let mut fd = FixtureDef::new(Shape::circle(0.2));
    fd.density = 1.0;
    world.create_fixture(bob, &fd).unwrap();

    world
        .create_joint(&JointDef {
            body_a: anchor,
            body_b: bob,
            collide_connected: false,
            kind: JointDefKind::Distance {
                local_anchor_a: Vec2::ZERO,
                local_anchor_b: Vec2::ZERO,
                length: 3.0,
            },
        })
        .unwrap();

    for _ in 0..240 {
        world.step(DT, 8, 3, &mut executor);
    }

    let d = (world.body(bob).position() - Vec2::new(0.0, 10.0)).length();
    assert!((d - 3.0).abs() < 0.05, "distance drifted to {d}");
}

#[test]
fn test_revolute_pendulum_swings() {
    let mut world = World::new(Vec2::new(0.0, -10.0));
    let mut executor = SerialExecutor::new();

    let pivot_pos = Vec2::new(0.0, 10.0);
    let pivot = world
        .create_body(&BodyDef {
            position: pivot_pos,
            ..Default::default()
        })
        .unwrap();
    // Horizontal rod, pinned at its left end.
    let rod = world
        .create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::new(2.0, 10.0),
            ..Default::default()
        })
        .unwrap();
    let mut fd = FixtureDef::new(Shape::box2(2.0, 0.1));
    fd.density = 1.0;
    world.create_fixture(rod, &fd).unwrap();

    world
        .create_joint(&JointDef {
            body_a: pivot,
            body_b: rod,
            collide_connected: false,
            kind: JointDefKind::Revolute {
                local_anchor_a: Vec2::ZERO,
                local_anchor_b: Vec2::new(-2.0, 0.0),
            },
        })
        .unwrap();

    let mut min_angle = 0.0f32;
    for _ in 0..300 {
        world.step(DT, 8, 3, &mut executor);
        min_angle = min_angle.min(world.body(rod).angle());

        // The pinned end stays at the pivot throughout the swing.
        let anchor = world.body(rod).xf.apply(Vec2::new(-2.0, 0.0));
        assert!(
            (anchor - pivot_pos).length() < 0.1,
            "anchor detached: {anchor:?}"
        );
    }
    assert!(min_angle < -0.5, "rod never swung down: {min_angle}");
}

#[test]
fn test_collide_connected_false_suppresses_contact() {
    let mut world = World::new(Vec2::ZERO);
    let mut executor = SerialExecutor::new();

    // Two overlapping dynamic circles pinned together.
    let a = world
        .create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::ZERO,
            ..Default::default()
        })
        .unwrap();
    let b = world
        .create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::new(0.3, 0.0),
            ..Default::default()
        })
        .unwrap();
    for body in [a, b] {
        let mut fd = FixtureDef::new(Shape::circle(0.5));
        fd.density = 1.0;
        world.create_fixture(body, &fd).unwrap();
    }

    for _ in 0..10 {
        world.step(DT, 8, 3, &mut executor);
    }
    assert_eq!(world.contact_count(), 1, "pair should touch before jointing");

    world
        .create_joint(&JointDef {
            body_a: a,
            body_b: b,
            collide_connected: false,
            kind: JointDefKind::Distance {
                local_anchor_a: Vec2::ZERO,
                local_anchor_b: Vec2::ZERO,
                length: 0.3,
            },
        })
        .unwrap();

    // The refilter destroys the contact on the next narrow-phase pass.
    for _ in 0..10 {
        world.step(DT, 8, 3, &mut executor);
    }
    assert_eq!(world.contact_count(), 0);
    assert_eq!(world.contact_manager.contact_list, NULL_INDEX);
}

#[test]
fn test_destroy_joint_restores_collision() {
    let mut world = World::new(Vec2::ZERO);
    let mut executor = SerialExecutor::new();

    let a = world
        .create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::ZERO,
            allow_sleep: false,
            ..Default::default()
        })
        .unwrap();
    let b = world
        .create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::new(0.3, 0.0),
            allow_sleep: false,
            ..Default::default()
        })
        .unwrap();
    for body in [a, b] {
        let mut fd = FixtureDef::new(Shape::circle(0.5));
        fd.density = 1.0;
        world.create_fixture(body, &fd).unwrap();
    }

    let joint = world
        .create_joint(&JointDef {
            body_a: a,
            body_b: b,
            collide_connected: false,
            kind: JointDefKind::Distance {
                local_anchor_a: Vec2::ZERO,
                local_anchor_b: Vec2::ZERO,
                length: 0.3,
            },
        })
        .unwrap();

    for _ in 0..10 {
        world.step(DT, 8, 3, &mut executor);
    }
    assert_eq!(world.contact_count(), 0);

    world.destroy_joint(joint).unwrap();
    for _ in 0..10 {
        world.step(DT, 8, 3, &mut executor);
    }
    assert_eq!(world.contact_count(), 1);
}
