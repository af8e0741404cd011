//! Sleep/collide regression test
//!
//! Sleeping bodies can still be displaced by TOI solves and must wake when
//! they become the non-moving side of a new contact. The scene is a pyramid
//! of boxes that falls asleep on a static edge ground, then takes a fast
//! ball to the flank. No box may ever end up below the ground, and the
//! impact must wake and disperse the pyramid.

use flux2d::{
    BodyDef, BodyType, FixtureDef, SerialExecutor, Shape, TaskExecutor, ThreadPoolExecutor, World,
};
use glam::Vec2;

const DT: f32 = 1.0 / 60.0;
const ROWS: usize = 6;
const HALF: f32 = 0.25;

fn build_pyramid(world: &mut World) -> Vec<u32> {
    let ground = world.create_body(&BodyDef::default()).unwrap();
    world
        .create_fixture(
            ground,
            &FixtureDef::new(Shape::edge(Vec2::new(-40.0, 0.0), Vec2::new(40.0, 0.0))),
        )
        .unwrap();

    let mut boxes = Vec::new();
    for row in 0..ROWS {
        let count = ROWS - row;
        let y = HALF + 2.0 * HALF * row as f32;
        for i in 0..count {
            let x = (i as f32 - (count - 1) as f32 / 2.0) * 2.0 * (HALF + 0.005);
            let body = world
                .create_body(&BodyDef {
                    body_type: BodyType::Dynamic,
                    position: Vec2::new(x, y),
                    ..Default::default()
                })
                .unwrap();
            let mut fd = FixtureDef::new(Shape::box2(HALF, HALF));
            fd.density = 1.0;
            fd.friction = 0.6;
            world.create_fixture(body, &fd).unwrap();
            boxes.push(body);
        }
    }
    boxes
}

fn run_scene(executor: &mut dyn TaskExecutor) {
    let mut world = World::new(Vec2::new(0.0, -10.0));
    let boxes = build_pyramid(&mut world);

    // Settle until the pyramid sleeps.
    let mut asleep_at = None;
    for step in 0..900 {
        world.step(DT, 8, 3, executor);
        for &id in &boxes {
            let body = world.body(id);
            assert!(
                body.position().y > -0.05,
                "box {id} sank below ground at step {step}: y = {}",
                body.position().y
            );
        }
        if boxes.iter().all(|&id| !world.body(id).is_awake()) {
            asleep_at = Some(step);
            break;
        }
    }
    let asleep_at = asleep_at.expect("pyramid never fell asleep");

    // Launch a fast ball into the flank of the sleeping pyramid.
    let ball = world
        .create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::new(-15.0, 1.0),
            linear_velocity: Vec2::new(60.0, 0.0),
            bullet: true,
            ..Default::default()
        })
        .unwrap();
    let mut fd = FixtureDef::new(Shape::circle(0.4));
    fd.density = 2.0;
    world.create_fixture(ball, &fd).unwrap();

    let mut woke = false;
    for step in 0..480 {
        world.step(DT, 8, 3, executor);
        for &id in &boxes {
            let body = world.body(id);
            assert!(
                body.position().y > -0.05,
                "box {id} sank below ground after impact (step {step}): y = {}",
                body.position().y
            );
        }
        woke |= boxes.iter().any(|&id| world.body(id).is_awake());
    }
    assert!(woke, "impact never woke the pyramid (slept at step {asleep_at})");

    // The pyramid dispersed: some box strayed from its packed footprint.
    let max_x = boxes
        .iter()
        .map(|&id| world.body(id).position().x.abs())
        .fold(0.0f32, f32::max);
    assert!(
        max_x > ROWS as f32 * HALF + 1.0,
        "pyramid did not disperse: max |x| = {max_x}"
    );
}

#[test]
fn test_sleep_collide_serial() {
    let mut executor = SerialExecutor::new();
    run_scene(&mut executor);
}

#[test]
fn test_sleep_collide_threaded() {
    let mut executor = ThreadPoolExecutor::new(4);
    run_scene(&mut executor);
}

/// A sleeping body displaced into a fresh contact must wake through the
/// deferred-awake channel even when the displacer is not a bullet.
#[test]
fn test_sleeping_body_wakes_on_new_contact() {
    let mut world = World::new(Vec2::new(0.0, -10.0));
    let mut executor = SerialExecutor::new();

    let ground = world.create_body(&BodyDef::default()).unwrap();
    world
        .create_fixture(
            ground,
            &FixtureDef::new(Shape::edge(Vec2::new(-40.0, 0.0), Vec2::new(40.0, 0.0))),
        )
        .unwrap();

    let sleeper = world
        .create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::new(0.0, 0.5),
            ..Default::default()
        })
        .unwrap();
    let mut fd = FixtureDef::new(Shape::box2(0.5, 0.5));
    fd.density = 1.0;
    world.create_fixture(sleeper, &fd).unwrap();

    for _ in 0..300 {
        world.step(DT, 8, 3, &mut executor);
        if !world.body(sleeper).is_awake() {
            break;
        }
    }
    assert!(!world.body(sleeper).is_awake(), "box never slept");

    let ball = world
        .create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::new(-6.0, 0.5),
            linear_velocity: Vec2::new(20.0, 0.0),
            ..Default::default()
        })
        .unwrap();
    let mut fd = FixtureDef::new(Shape::circle(0.4));
    fd.density = 1.0;
    world.create_fixture(ball, &fd).unwrap();

    let mut woke = false;
    for _ in 0..120 {
        world.step(DT, 8, 3, &mut executor);
        if world.body(sleeper).is_awake() {
            woke = true;
            break;
        }
    }
    assert!(woke, "sleeping box never woke from the incoming contact");
}
