//! GJK Distance
//!
//! Closest-point distance between two convex shape proxies under arbitrary
//! transforms. Used by sensor overlap tests and by the conservative
//! advancement loop in [`crate::toi`].

use glam::Vec2;

use crate::math::{cross, Transform};
use crate::shape::Shape;

/// A convex point cloud plus a shell radius, extracted from a shape child.
#[derive(Clone, Debug)]
pub struct DistanceProxy {
    /// Support vertices in shape-local space.
    pub vertices: Vec<Vec2>,
    /// Shell radius around the hull.
    pub radius: f32,
}

impl DistanceProxy {
    /// Extract the proxy for one child of a shape.
    #[must_use]
    pub fn new(shape: &Shape, _child_index: u32) -> Self {
        match shape {
            Shape::Circle { radius, center } => Self {
                vertices: vec![*center],
                radius: *radius,
            },
            Shape::Polygon(poly) => Self {
                vertices: poly.vertices.clone(),
                radius: shape.radius(),
            },
            Shape::Edge { v1, v2 } => Self {
                vertices: vec![*v1, *v2],
                radius: shape.radius(),
            },
        }
    }

    /// Index of the support vertex in direction `d`.
    #[inline]
    fn support(&self, d: Vec2) -> usize {
        let mut best = 0;
        let mut best_value = self.vertices[0].dot(d);
        for (i, v) in self.vertices.iter().enumerate().skip(1) {
            let value = v.dot(d);
            if value > best_value {
                best_value = value;
                best = i;
            }
        }
        best
    }
}

/// Input for [`shape_distance`].
#[derive(Clone, Debug)]
pub struct DistanceInput<'a> {
    /// Proxy for shape A.
    pub proxy_a: &'a DistanceProxy,
    /// Proxy for shape B.
    pub proxy_b: &'a DistanceProxy,
    /// Transform of shape A.
    pub xf_a: Transform,
    /// Transform of shape B.
    pub xf_b: Transform,
    /// Subtract the shell radii from the reported distance?
    pub use_radii: bool,
}

/// Output of [`shape_distance`].
#[derive(Clone, Copy, Debug)]
pub struct DistanceOutput {
    /// Closest point on A in world space.
    pub point_a: Vec2,
    /// Closest point on B in world space.
    pub point_b: Vec2,
    /// Distance between the closest points.
    pub distance: f32,
    /// GJK iterations used.
    pub iterations: u32,
}

#[derive(Clone, Copy, Default)]
struct SimplexVertex {
    w_a: Vec2,
    w_b: Vec2,
    w: Vec2,
    a: f32, // barycentric weight
    index_a: usize,
    index_b: usize,
}

const MAX_GJK_ITERATIONS: u32 = 20;

/// Compute the distance between two convex proxies using GJK.
#[must_use]
pub fn shape_distance(input: &DistanceInput<'_>) -> DistanceOutput {
    let proxy_a = input.proxy_a;
    let proxy_b = input.proxy_b;
    let xf_a = &input.xf_a;
    let xf_b = &input.xf_b;

    // Start with an arbitrary simplex vertex.
    let mut simplex = [SimplexVertex::default(); 3];
    let mut count = 1usize;
    simplex[0].index_a = 0;
    simplex[0].index_b = 0;
    simplex[0].w_a = xf_a.apply(proxy_a.vertices[0]);
    simplex[0].w_b = xf_b.apply(proxy_b.vertices[0]);
    simplex[0].w = simplex[0].w_b - simplex[0].w_a;
    simplex[0].a = 1.0;

    let mut iterations = 0;
    while iterations < MAX_GJK_ITERATIONS {
        let saved: Vec<(usize, usize)> = simplex[..count]
            .iter()
            .map(|v| (v.index_a, v.index_b))
            .collect();

        match count {
            1 => {}
            2 => count = solve2(&mut simplex),
            3 => count = solve3(&mut simplex),
            _ => unreachable!(),
        }

        // Origin inside the simplex: shapes overlap.
        if count == 3 {
            break;
        }

        let d = search_direction(&simplex, count);
        if d.length_squared() < f32::EPSILON * f32::EPSILON {
            // The origin is on a simplex feature; treat as overlap.
            break;
        }

        let v = &mut simplex[count];
        v.index_a = proxy_a.support(xf_a.q.apply_inv(-d));
        v.index_b = proxy_b.support(xf_b.q.apply_inv(d));
        v.w_a = xf_a.apply(proxy_a.vertices[v.index_a]);
        v.w_b = xf_b.apply(proxy_b.vertices[v.index_b]);
        v.w = v.w_b - v.w_a;

        iterations += 1;

        // No progress: the new vertex repeats one already in the simplex.
        let new_pair = (simplex[count].index_a, simplex[count].index_b);
        if saved.contains(&new_pair) {
            break;
        }

        count += 1;
    }

    let (mut point_a, mut point_b) = witness_points(&simplex, count);
    let mut distance = point_a.distance(point_b);

    if input.use_radii {
        let r_a = proxy_a.radius;
        let r_b = proxy_b.radius;
        if distance > r_a + r_b && distance > f32::EPSILON {
            // Shapes are separate: shrink the witness points onto the shells.
            distance -= r_a + r_b;
            let normal = (point_b - point_a).normalize();
            point_a += r_a * normal;
            point_b -= r_b * normal;
        } else {
            // Overlapping shells: collapse to a midpoint.
            let p = 0.5 * (point_a + point_b);
            point_a = p;
            point_b = p;
            distance = 0.0;
        }
    }

    DistanceOutput {
        point_a,
        point_b,
        distance,
        iterations,
    }
}

fn search_direction(simplex: &[SimplexVertex; 3], count: usize) -> Vec2 {
    match count {
        1 => -simplex[0].w,
        2 => {
            let e12 = simplex[1].w - simplex[0].w;
            let sgn = cross(e12, -simplex[0].w);
            if sgn > 0.0 {
                Vec2::new(-e12.y, e12.x)
            } else {
                Vec2::new(e12.y, -e12.x)
            }
        }
        _ => Vec2::ZERO,
    }
}

/// Closest point of a segment to the origin, in barycentric form.
fn solve2(simplex: &mut [SimplexVertex; 3]) -> usize {
    let w1 = simplex[0].w;
    let w2 = simplex[1].w;
    let e12 = w2 - w1;

    let d12_2 = -w1.dot(e12);
    if d12_2 <= 0.0 {
        simplex[0].a = 1.0;
        return 1;
    }

    let d12_1 = w2.dot(e12);
    if d12_1 <= 0.0 {
        simplex[0] = simplex[1];
        simplex[0].a = 1.0;
        return 1;
    }

    let inv_d12 = 1.0 / (d12_1 + d12_2);
    simplex[0].a = d12_1 * inv_d12;
    simplex[1].a = d12_2 * inv_d12;
    2
}

/// Closest point of a triangle to the origin, in barycentric form.
fn solve3(simplex: &mut [SimplexVertex; 3]) -> usize {
    let w1 = simplex[0].w;
    let w2 = simplex[1].w;
    let w3 = simplex[2].w;

    let e12 = w2 - w1;
    let d12_1 = w2.dot(e12);
    let d12_2 = -w1.dot(e12);

    let e13 = w3 - w1;
    let d13_1 = w3.dot(e13);
    let d13_2 = -w1.dot(e13);

    let e23 = w3 - w2;
    let d23_1 = w3.dot(e23);
    let d23_2 = -w2.dot(e23);

    let n123 = cross(e12, e13);
    let d123_1 = n123 * cross(w2, w3);
    let d123_2 = n123 * cross(w3, w1);
    let d123_3 = n123 * cross(w1, w2);

    // Vertex regions.
    if d12_2 <= 0.0 && d13_2 <= 0.0 {
        simplex[0].a = 1.0;
        return 1;
    }
    if d12_1 <= 0.0 && d23_2 <= 0.0 {
        simplex[0] = simplex[1];
        simplex[0].a = 1.0;
        return 1;
    }
    if d13_1 <= 0.0 && d23_1 <= 0.0 {
        simplex[0] = simplex[2];
        simplex[0].a = 1.0;
        return 1;
    }

    // Edge regions.
    if d12_1 > 0.0 && d12_2 > 0.0 && d123_3 <= 0.0 {
        let inv = 1.0 / (d12_1 + d12_2);
        simplex[0].a = d12_1 * inv;
        simplex[1].a = d12_2 * inv;
        return 2;
    }
    if d13_1 > 0.0 && d13_2 > 0.0 && d123_2 <= 0.0 {
        let inv = 1.0 / (d13_1 + d13_2);
        simplex[0].a = d13_1 * inv;
        simplex[1] = simplex[2];
        simplex[1].a = d13_2 * inv;
        return 2;
    }
    if d23_1 > 0.0 && d23_2 > 0.0 && d123_1 <= 0.0 {
        let inv = 1.0 / (d23_1 + d23_2);
        simplex[0] = simplex[1];
        simplex[1] = simplex[2];
        simplex[0].a = d23_1 * inv;
        simplex[1].a = d23_2 * inv;
        return 2;
    }

    // Interior: overlap.
    let inv = 1.0 / (d123_1 + d123_2 + d123_3);
    simplex[0].a = d123_1 * inv;
    simplex[1].a = d123_2 * inv;
    simplex[2].a = d123_3 * inv;
    3
}

fn witness_points(simplex: &[SimplexVertex; 3], count: usize) -> (Vec2, Vec2) {
    match count {
        1 => (simplex[0].w_a, simplex[0].w_b),
        2 => {
            let a = simplex[0].a * simplex[0].w_a + simplex[1].a * simplex[1].w_a;
            let b = simplex[0].a * simplex[0].w_b + simplex[1].a * simplex[1].w_b;
            (a, b)
        }
        _ => {
            let p = simplex[0].a * simplex[0].w_a
                + simplex[1].a * simplex[1].w_a
                + simplex[2].a * simplex[2].w_a;
            (p, p)
        }
    }
}

/// Overlap test including shell radii, with the usual speculative margin.
#[must_use]
pub fn test_overlap(
    shape_a: &Shape,
    child_a: u32,
    xf_a: &Transform,
    shape_b: &Shape,
    child_b: u32,
    xf_b: &Transform,
) -> bool {
    let proxy_a = DistanceProxy::new(shape_a, child_a);
    let proxy_b = DistanceProxy::new(shape_b, child_b);
    let output = shape_distance(&DistanceInput {
        proxy_a: &proxy_a,
        proxy_b: &proxy_b,
        xf_a: *xf_a,
        xf_b: *xf_b,
        use_radii: true,
    });
    output.distance < 10.0 * crate::settings::LINEAR_SLOP
}
