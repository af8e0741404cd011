//! Broad-phase query integration tests
//!
//! World-level AABB queries and ray casts over scenes whose fixtures
//! straddle wide areas of the tree, including the regression scenes for
//! split proxies and diamond-shaped edge layouts.

use flux2d::{Aabb, BodyDef, FixtureDef, PolygonShape, SerialExecutor, Shape, World};
use glam::Vec2;

/// Three concentric boxes of decreasing height: half extents (10,10),
/// (20,9), (30,8), all on one static body at the origin.
fn concentric_world() -> (World, Vec<u32>) {
    let mut world = World::new(Vec2::ZERO);
    let ground = world.create_body(&BodyDef::default()).unwrap();

    let mut fixtures = Vec::new();
    for i in 0..3u32 {
        let hx = i as f32 * 10.0 + 10.0;
        let hy = 10.0 - i as f32;
        let shape = Shape::Polygon(PolygonShape::as_box(hx, hy));
        let fixture = world
            .create_fixture(ground, &FixtureDef::new(shape))
            .unwrap();
        fixtures.push(fixture);
    }
    (world, fixtures)
}

#[test]
fn test_query_hit_counts_across_offsets() {
    let (world, fixtures) = concentric_world();
    let expected = [3, 3, 3, 3, 3, 2, 1, 0];

    for (i, want) in expected.iter().enumerate() {
        let aabb = Aabb::new(
            Vec2::new((i as f32 - 4.0) * 10.2, -10.0),
            Vec2::new(40.0, 10.0),
        );

        let mut hits = 0;
        let mut seen = [false; 3];
        world.query_aabb(&aabb, |fixture| {
            let slot = fixtures.iter().position(|&f| f == fixture).unwrap();
            assert!(!seen[slot], "fixture reported twice");
            seen[slot] = true;
            hits += 1;
            true
        });

        assert_eq!(hits, *want, "query at offset {i}");
    }
}

#[test]
fn test_ray_cast_hit_counts_across_offsets() {
    let (world, fixtures) = concentric_world();
    // Rays starting inside a polygon do not hit it, so the counts fall off
    // faster than the query counts.
    let expected = [3, 3, 2, 1, 0, 0, 0, 0];

    for (i, want) in expected.iter().enumerate() {
        let p1 = Vec2::new((i as f32 - 4.0) * 10.2, 0.0);
        let p2 = Vec2::new(40.0, 0.0);

        let mut hits = 0;
        let mut seen = [false; 3];
        world.ray_cast(p1, p2, |fixture, _point, _normal, _fraction| {
            let slot = fixtures.iter().position(|&f| f == fixture).unwrap();
            assert!(!seen[slot], "fixture reported twice");
            seen[slot] = true;
            hits += 1;
            -1.0 // ignore the hit and keep going
        });

        assert_eq!(hits, *want, "ray cast at offset {i}");
    }
}

#[test]
fn test_query_early_termination() {
    let (world, _fixtures) = concentric_world();
    let aabb = Aabb::new(Vec2::new(-5.0, -5.0), Vec2::new(5.0, 5.0));

    let mut hits = 0;
    world.query_aabb(&aabb, |_fixture| {
        hits += 1;
        false
    });
    assert_eq!(hits, 1);
}

/// Four edges forming a diamond whose corners land in four different
/// regions of the tree. Two axis-aligned rays into opposite corners must
/// each hit exactly one fixture.
#[test]
fn test_diamond_edge_rays() {
    let mut world = World::new(Vec2::ZERO);
    let ground = world.create_body(&BodyDef::default()).unwrap();

    for (v1, v2) in [
        (Vec2::new(-2.0, 4.0), Vec2::new(4.0, -2.0)),
        (Vec2::new(6.0, 12.0), Vec2::new(12.0, 6.0)),
        (Vec2::new(-2.0, 4.0), Vec2::new(6.0, 12.0)),
        (Vec2::new(12.0, 6.0), Vec2::new(4.0, -2.0)),
    ] {
        world
            .create_fixture(ground, &FixtureDef::new(Shape::edge(v1, v2)))
            .unwrap();
    }

    for (p1, p2) in [
        (Vec2::new(0.0, 10.0), Vec2::new(4.0, 6.0)),
        (Vec2::new(10.0, 0.0), Vec2::new(6.0, 4.0)),
    ] {
        let mut hits = 0;
        world.ray_cast(p1, p2, |_fixture, _point, _normal, fraction| {
            hits += 1;
            fraction
        });
        assert_eq!(hits, 1, "ray {p1:?} -> {p2:?}");
    }
}

#[test]
fn test_queries_consistent_after_stepping() {
    // Stepping must not perturb static proxies.
    let (mut world, _fixtures) = concentric_world();
    let mut executor = SerialExecutor::new();
    for _ in 0..30 {
        world.step(1.0 / 60.0, 8, 3, &mut executor);
    }

    let mut hits = 0;
    world.query_aabb(
        &Aabb::new(Vec2::new(-1.0, -1.0), Vec2::new(1.0, 1.0)),
        |_fixture| {
            hits += 1;
            true
        },
    );
    assert_eq!(hits, 3);
}
