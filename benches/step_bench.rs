//! Benchmarks for the parallel step pipeline
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use flux2d::{
    BodyDef, BodyType, DeterministicRng, FixtureDef, SerialExecutor, Shape, TaskExecutor,
    ThreadPoolExecutor, World,
};
use glam::Vec2;

const DT: f32 = 1.0 / 60.0;

fn build_pile(body_count: u32) -> World {
    let mut world = World::new(Vec2::new(0.0, -10.0));
    let mut rng = DeterministicRng::new(1234);

    let container = world.create_body(&BodyDef::default()).unwrap();
    for (v1, v2) in [
        (Vec2::new(-50.0, 0.0), Vec2::new(50.0, 0.0)),
        (Vec2::new(-50.0, 0.0), Vec2::new(-50.0, 100.0)),
        (Vec2::new(50.0, 0.0), Vec2::new(50.0, 100.0)),
    ] {
        world
            .create_fixture(container, &FixtureDef::new(Shape::edge(v1, v2)))
            .unwrap();
    }

    for i in 0..body_count {
        let body = world
            .create_body(&BodyDef {
                body_type: BodyType::Dynamic,
                position: Vec2::new(rng.range_f32(-45.0, 45.0), rng.range_f32(1.0, 90.0)),
                ..Default::default()
            })
            .unwrap();
        let shape = if i % 2 == 0 {
            Shape::circle(0.4)
        } else {
            Shape::box2(0.35, 0.35)
        };
        let mut fd = FixtureDef::new(shape);
        fd.density = 1.0;
        fd.friction = 0.4;
        world.create_fixture(body, &fd).unwrap();
    }
    world
}

fn run_steps(world: &mut World, executor: &mut dyn TaskExecutor, steps: u32) -> f32 {
    for _ in 0..steps {
        world.step(DT, 8, 3, executor);
    }
    // Return something data-dependent so the work cannot be elided.
    world.body(world.non_static_bodies()[0]).position().y
}

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("step");
    group.sample_size(20);

    for &body_count in &[200u32, 1000] {
        group.bench_with_input(
            BenchmarkId::new("serial", body_count),
            &body_count,
            |b, &n| {
                let mut executor = SerialExecutor::new();
                b.iter(|| {
                    let mut world = build_pile(n);
                    black_box(run_steps(&mut world, &mut executor, 30))
                });
            },
        );

        for &threads in &[2usize, 4] {
            group.bench_with_input(
                BenchmarkId::new(format!("pool-{threads}"), body_count),
                &body_count,
                |b, &n| {
                    let mut executor = ThreadPoolExecutor::new(threads);
                    executor.set_continuous_busy_wait(true);
                    b.iter(|| {
                        let mut world = build_pile(n);
                        black_box(run_steps(&mut world, &mut executor, 30))
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_broad_phase_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("queries");

    let world = build_pile(1000);
    group.bench_function("ray_cast_across_pile", |b| {
        b.iter(|| {
            let mut hits = 0u32;
            world.ray_cast(
                black_box(Vec2::new(-49.0, 5.0)),
                black_box(Vec2::new(49.0, 5.0)),
                |_fixture, _point, _normal, _fraction| {
                    hits += 1;
                    -1.0
                },
            );
            hits
        });
    });

    group.finish();
}

criterion_group!(benches, bench_step, bench_broad_phase_queries);
criterion_main!(benches);
