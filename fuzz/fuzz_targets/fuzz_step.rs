//! Fuzz the step pipeline: arbitrary small scenes must step without
//! panicking and must preserve the contact-partition invariant.

#![no_main]

use arbitrary::Arbitrary;
use flux2d::{BodyDef, BodyType, FixtureDef, SerialExecutor, Shape, World};
use glam::Vec2;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct FuzzBody {
    x: i16,
    y: i16,
    vx: i8,
    vy: i8,
    dynamic: bool,
    bullet: bool,
    sensor: bool,
    circle: bool,
}

#[derive(Arbitrary, Debug)]
struct FuzzScene {
    bodies: Vec<FuzzBody>,
    steps: u8,
}

fuzz_target!(|scene: FuzzScene| {
    let mut world = World::new(Vec2::new(0.0, -10.0));
    let mut executor = SerialExecutor::new();

    for fb in scene.bodies.iter().take(24) {
        let body = world
            .create_body(&BodyDef {
                body_type: if fb.dynamic {
                    BodyType::Dynamic
                } else {
                    BodyType::Static
                },
                position: Vec2::new(fb.x as f32 * 0.1, fb.y as f32 * 0.1),
                linear_velocity: Vec2::new(fb.vx as f32, fb.vy as f32),
                bullet: fb.bullet,
                ..Default::default()
            })
            .unwrap();
        let shape = if fb.circle {
            Shape::circle(0.3)
        } else {
            Shape::box2(0.3, 0.3)
        };
        let mut fd = FixtureDef::new(shape);
        fd.density = 1.0;
        fd.sensor = fb.sensor;
        world.create_fixture(body, &fd).unwrap();
    }

    for _ in 0..scene.steps.min(30) {
        world.step(1.0 / 60.0, 4, 2, &mut executor);
        assert!(world.contact_manager.check_partition());
    }
});
