//! Determinism integration tests
//!
//! The engine's core guarantee: for a fixed world and a fixed sequence of
//! user operations, runs with different executors, thread counts, or
//! schedules produce bit-identical state. These tests build a seeded scene,
//! run it under several executors, and compare raw float bits.

use std::sync::{Arc, Mutex};

use flux2d::{
    BodyDef, BodyType, ContactListener, DeterministicRng, FixtureDef, ImmediateResult,
    ProxyIdPair, SerialExecutor, Shape, TaskExecutor, ThreadPoolExecutor, World,
};
use glam::Vec2;

const DT: f32 = 1.0 / 60.0;

/// A seeded box of bouncing bodies over a field of static obstacles.
fn build_world(seed: u64) -> World {
    let mut world = World::new(Vec2::new(0.0, -10.0));
    let mut rng = DeterministicRng::new(seed);

    // Container: floor and two walls.
    let container = world.create_body(&BodyDef::default()).unwrap();
    for (v1, v2) in [
        (Vec2::new(-30.0, 0.0), Vec2::new(30.0, 0.0)),
        (Vec2::new(-30.0, 0.0), Vec2::new(-30.0, 60.0)),
        (Vec2::new(30.0, 0.0), Vec2::new(30.0, 60.0)),
    ] {
        world
            .create_fixture(container, &FixtureDef::new(Shape::edge(v1, v2)))
            .unwrap();
    }

    // Static obstacles.
    for i in 0..6 {
        for j in 0..3 {
            let body = world
                .create_body(&BodyDef {
                    position: Vec2::new(-25.0 + 10.0 * i as f32, 4.0 + 8.0 * j as f32),
                    angle: 0.3 * (i + j) as f32,
                    ..Default::default()
                })
                .unwrap();
            world
                .create_fixture(body, &FixtureDef::new(Shape::box2(1.5, 0.3)))
                .unwrap();
        }
    }

    // Dynamic bodies: a mix of circles and boxes.
    for i in 0..200 {
        let body = world
            .create_body(&BodyDef {
                body_type: BodyType::Dynamic,
                position: Vec2::new(rng.range_f32(-25.0, 25.0), rng.range_f32(20.0, 55.0)),
                angle: rng.range_f32(-3.0, 3.0),
                linear_velocity: Vec2::new(rng.range_f32(-5.0, 5.0), rng.range_f32(-5.0, 0.0)),
                bullet: i % 23 == 0,
                ..Default::default()
            })
            .unwrap();
        let shape = if i % 3 == 0 {
            Shape::box2(0.3, 0.3)
        } else {
            Shape::circle(0.35)
        };
        let mut fd = FixtureDef::new(shape);
        fd.density = 1.0;
        fd.friction = 0.4;
        fd.restitution = 0.2;
        world.create_fixture(body, &fd).unwrap();
    }

    world
}

/// Raw bits of every non-static body's pose, velocity, and sleep state.
fn snapshot(world: &World) -> Vec<(u32, u32, u32, u32, u32, bool)> {
    world
        .non_static_bodies()
        .iter()
        .map(|&id| {
            let body = world.body(id);
            (
                body.position().x.to_bits(),
                body.position().y.to_bits(),
                body.angle().to_bits(),
                body.linear_velocity.x.to_bits(),
                body.linear_velocity.y.to_bits(),
                body.is_awake(),
            )
        })
        .collect()
}

fn run(executor: &mut dyn TaskExecutor, seed: u64, steps: u32) -> Vec<(u32, u32, u32, u32, u32, bool)> {
    let mut world = build_world(seed);
    for _ in 0..steps {
        world.step(DT, 8, 3, executor);
    }
    snapshot(&world)
}

#[test]
fn test_determinism_across_thread_counts() {
    let mut serial = SerialExecutor::new();
    let reference = run(&mut serial, 42, 180);

    let mut two = ThreadPoolExecutor::new(2);
    assert_eq!(
        run(&mut two, 42, 180),
        reference,
        "2-thread run diverged from serial"
    );

    let mut eight = ThreadPoolExecutor::new(8);
    assert_eq!(
        run(&mut eight, 42, 180),
        reference,
        "8-thread run diverged from serial"
    );
}

#[test]
fn test_determinism_repeated_runs_same_pool() {
    // Scheduling inside one pool varies run to run; results must not.
    let mut pool = ThreadPoolExecutor::new(4);
    let a = run(&mut pool, 7, 120);
    let b = run(&mut pool, 7, 120);
    assert_eq!(a, b);
}

#[test]
fn test_different_seeds_diverge() {
    let mut serial = SerialExecutor::new();
    let a = run(&mut serial, 1, 60);
    let mut serial = SerialExecutor::new();
    let b = run(&mut serial, 2, 60);
    assert_ne!(a, b);
}

// ----------------------------------------------------------------------
// Event merge order
// ----------------------------------------------------------------------

/// Marker separating steps in the recorded event stream.
const STEP_MARKER: ProxyIdPair = ProxyIdPair {
    low: u32::MAX,
    high: u32::MAX,
};

struct RecordingListener {
    begins: Arc<Mutex<Vec<ProxyIdPair>>>,
}

impl ContactListener for RecordingListener {
    fn begin_contact_immediate(
        &self,
        _contact: &mut flux2d::Contact,
        _thread_id: u32,
    ) -> ImmediateResult {
        ImmediateResult::CallDeferred
    }

    fn begin_contact(&mut self, world: &mut World, contact: u32) {
        let key = world.contact(contact).proxy_ids;
        self.begins.lock().unwrap().push(key);
    }
}

fn run_recorded(executor: &mut dyn TaskExecutor, steps: u32) -> Vec<ProxyIdPair> {
    let begins = Arc::new(Mutex::new(Vec::new()));
    let mut world = build_world(9);
    world.set_contact_listener(Box::new(RecordingListener {
        begins: Arc::clone(&begins),
    }));
    for _ in 0..steps {
        world.step(DT, 8, 3, executor);
        begins.lock().unwrap().push(STEP_MARKER);
    }
    let events = begins.lock().unwrap().clone();
    events
}

#[test]
fn test_begin_events_sorted_within_each_step() {
    let mut pool = ThreadPoolExecutor::new(4);
    let events = run_recorded(&mut pool, 90);

    let mut saw_multi_event_step = false;
    let mut step_events = 0;
    let mut prev: Option<ProxyIdPair> = None;
    for key in &events {
        if *key == STEP_MARKER {
            saw_multi_event_step |= step_events > 1;
            step_events = 0;
            prev = None;
            continue;
        }
        if let Some(p) = prev {
            assert!(p <= *key, "begin events out of key order: {p:?} then {key:?}");
        }
        prev = Some(*key);
        step_events += 1;
    }
    assert!(
        saw_multi_event_step,
        "scene produced no step with multiple begin events; the ordering \
         assertion never bit"
    );
}

#[test]
fn test_event_stream_identical_across_executors() {
    let mut serial = SerialExecutor::new();
    let reference = run_recorded(&mut serial, 90);

    let mut pool = ThreadPoolExecutor::new(4);
    let threaded = run_recorded(&mut pool, 90);

    assert_eq!(reference, threaded);
}
