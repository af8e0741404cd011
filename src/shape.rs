//! Collision Shapes
//!
//! Circle, convex polygon, and edge shapes with the operations the pipeline
//! consumes: tight AABB computation per child, ray casts, and mass
//! properties. Shapes are defined in body-local space.

use glam::Vec2;

use crate::math::{cross, Aabb, Transform};
use crate::settings::{MAX_POLYGON_VERTICES, POLYGON_RADIUS};

/// Input for a ray cast. The ray goes from `p1` to
/// `p1 + max_fraction * (p2 - p1)`.
#[derive(Clone, Copy, Debug)]
pub struct RayCastInput {
    /// Ray start.
    pub p1: Vec2,
    /// Ray end.
    pub p2: Vec2,
    /// Fraction of the segment to consider.
    pub max_fraction: f32,
}

/// Output of a successful ray cast.
#[derive(Clone, Copy, Debug)]
pub struct RayCastOutput {
    /// Surface normal at the hit point.
    pub normal: Vec2,
    /// Hit fraction along the ray.
    pub fraction: f32,
}

/// Mass properties computed from a shape and a density.
#[derive(Clone, Copy, Debug, Default)]
pub struct MassData {
    /// Mass in kilograms.
    pub mass: f32,
    /// Center of mass in body-local coordinates.
    pub center: Vec2,
    /// Rotational inertia about the local origin.
    pub inertia: f32,
}

/// A convex polygon in counter-clockwise winding order.
#[derive(Clone, Debug)]
pub struct PolygonShape {
    /// Vertices in CCW order.
    pub vertices: Vec<Vec2>,
    /// Outward edge normals, one per vertex.
    pub normals: Vec<Vec2>,
    /// Centroid of the polygon.
    pub centroid: Vec2,
}

impl PolygonShape {
    /// Build a polygon from convex CCW vertices.
    #[must_use]
    pub fn new(vertices: &[Vec2]) -> Self {
        debug_assert!(vertices.len() >= 3 && vertices.len() <= MAX_POLYGON_VERTICES);
        let n = vertices.len();
        let mut normals = Vec::with_capacity(n);
        for i in 0..n {
            let edge = vertices[(i + 1) % n] - vertices[i];
            debug_assert!(edge.length_squared() > f32::EPSILON);
            normals.push(Vec2::new(edge.y, -edge.x).normalize());
        }
        let centroid = polygon_centroid(vertices);
        Self {
            vertices: vertices.to_vec(),
            normals,
            centroid,
        }
    }

    /// Axis-aligned box with half-extents `hx`, `hy` centered on the origin.
    #[must_use]
    pub fn as_box(hx: f32, hy: f32) -> Self {
        Self::new(&[
            Vec2::new(-hx, -hy),
            Vec2::new(hx, -hy),
            Vec2::new(hx, hy),
            Vec2::new(-hx, hy),
        ])
    }

    /// Box with half-extents `hx`, `hy` centered at `center`, rotated by
    /// `angle`.
    #[must_use]
    pub fn as_oriented_box(hx: f32, hy: f32, center: Vec2, angle: f32) -> Self {
        let xf = Transform::new(center, angle);
        let corners = [
            xf.apply(Vec2::new(-hx, -hy)),
            xf.apply(Vec2::new(hx, -hy)),
            xf.apply(Vec2::new(hx, hy)),
            xf.apply(Vec2::new(-hx, hy)),
        ];
        Self::new(&corners)
    }
}

fn polygon_centroid(vertices: &[Vec2]) -> Vec2 {
    let n = vertices.len();
    let mut c = Vec2::ZERO;
    let mut area = 0.0;
    let origin = vertices[0];
    for i in 1..n - 1 {
        let e1 = vertices[i] - origin;
        let e2 = vertices[i + 1] - origin;
        let a = 0.5 * cross(e1, e2);
        area += a;
        c += a * (e1 + e2) / 3.0;
    }
    origin + c / area
}

/// A collision shape.
#[derive(Clone, Debug)]
pub enum Shape {
    /// Circle with a local center offset.
    Circle {
        /// Radius.
        radius: f32,
        /// Center in body-local space.
        center: Vec2,
    },
    /// Convex polygon.
    Polygon(PolygonShape),
    /// Line segment from `v1` to `v2`.
    Edge {
        /// Start point in body-local space.
        v1: Vec2,
        /// End point in body-local space.
        v2: Vec2,
    },
}

impl Shape {
    /// Circle centered on the body origin.
    #[must_use]
    pub fn circle(radius: f32) -> Self {
        Self::Circle {
            radius,
            center: Vec2::ZERO,
        }
    }

    /// Axis-aligned box with the given half extents.
    #[must_use]
    pub fn box2(hx: f32, hy: f32) -> Self {
        Self::Polygon(PolygonShape::as_box(hx, hy))
    }

    /// Edge segment.
    #[must_use]
    pub fn edge(v1: Vec2, v2: Vec2) -> Self {
        Self::Edge { v1, v2 }
    }

    /// Number of broad-phase children. Every shape here is a single child;
    /// the proxy plumbing still carries the child index so compound shapes
    /// slot in without touching the pipeline.
    #[inline]
    #[must_use]
    pub fn child_count(&self) -> u32 {
        1
    }

    /// The shell radius used by the distance and TOI routines.
    #[inline]
    #[must_use]
    pub fn radius(&self) -> f32 {
        match self {
            Self::Circle { radius, .. } => *radius,
            Self::Polygon(_) | Self::Edge { .. } => POLYGON_RADIUS,
        }
    }

    /// Tight AABB of the given child under `xf`.
    #[must_use]
    pub fn compute_aabb(&self, xf: &Transform, _child_index: u32) -> Aabb {
        match self {
            Self::Circle { radius, center } => {
                let p = xf.apply(*center);
                let r = Vec2::splat(*radius);
                Aabb::new(p - r, p + r)
            }
            Self::Polygon(poly) => {
                let mut lower = xf.apply(poly.vertices[0]);
                let mut upper = lower;
                for v in &poly.vertices[1..] {
                    let p = xf.apply(*v);
                    lower = lower.min(p);
                    upper = upper.max(p);
                }
                let r = Vec2::splat(POLYGON_RADIUS);
                Aabb::new(lower - r, upper + r)
            }
            Self::Edge { v1, v2 } => {
                let p1 = xf.apply(*v1);
                let p2 = xf.apply(*v2);
                let r = Vec2::splat(POLYGON_RADIUS);
                Aabb::new(p1.min(p2) - r, p1.max(p2) + r)
            }
        }
    }

    /// Cast a ray against the given child under `xf`.
    #[must_use]
    pub fn ray_cast(
        &self,
        input: &RayCastInput,
        xf: &Transform,
        _child_index: u32,
    ) -> Option<RayCastOutput> {
        match self {
            Self::Circle { radius, center } => ray_cast_circle(input, xf.apply(*center), *radius),
            Self::Polygon(poly) => ray_cast_polygon(input, xf, poly),
            Self::Edge { v1, v2 } => ray_cast_edge(input, xf.apply(*v1), xf.apply(*v2)),
        }
    }

    /// Mass properties for the given density.
    #[must_use]
    pub fn compute_mass(&self, density: f32) -> MassData {
        match self {
            Self::Circle { radius, center } => {
                let mass = density * core::f32::consts::PI * radius * radius;
                MassData {
                    mass,
                    center: *center,
                    // I = m * (r^2 / 2 + |c|^2), about the body origin.
                    inertia: mass * (0.5 * radius * radius + center.length_squared()),
                }
            }
            Self::Polygon(poly) => polygon_mass(poly, density),
            Self::Edge { v1, v2 } => MassData {
                // Edges are boundary geometry and carry no mass.
                mass: 0.0,
                center: 0.5 * (*v1 + *v2),
                inertia: 0.0,
            },
        }
    }
}

fn polygon_mass(poly: &PolygonShape, density: f32) -> MassData {
    let n = poly.vertices.len();
    let origin = poly.vertices[0];

    let mut area = 0.0;
    let mut center = Vec2::ZERO;
    let mut inertia = 0.0;

    for i in 1..n - 1 {
        let e1 = poly.vertices[i] - origin;
        let e2 = poly.vertices[i + 1] - origin;
        let d = cross(e1, e2);
        let tri_area = 0.5 * d;

        area += tri_area;
        center += tri_area * (e1 + e2) / 3.0;

        let intx2 = e1.x * e1.x + e2.x * e1.x + e2.x * e2.x;
        let inty2 = e1.y * e1.y + e2.y * e1.y + e2.y * e2.y;
        inertia += (0.25 / 3.0) * d * (intx2 + inty2);
    }

    let mass = density * area;
    center /= area;
    let world_center = origin + center;

    // Shift inertia from the triangle-fan origin to the body origin.
    let inertia = density * inertia + mass * (world_center.length_squared() - center.length_squared());

    MassData {
        mass,
        center: world_center,
        inertia,
    }
}

fn ray_cast_circle(input: &RayCastInput, center: Vec2, radius: f32) -> Option<RayCastOutput> {
    let s = input.p1 - center;
    let b = s.length_squared() - radius * radius;

    let r = input.p2 - input.p1;
    let c = s.dot(r);
    let rr = r.length_squared();
    let sigma = c * c - rr * b;

    if sigma < 0.0 || rr < f32::EPSILON {
        return None;
    }

    let t = -(c + sigma.sqrt());
    if t >= 0.0 && t <= input.max_fraction * rr {
        let t = t / rr;
        return Some(RayCastOutput {
            normal: (s + t * r).normalize(),
            fraction: t,
        });
    }

    None
}

fn ray_cast_polygon(
    input: &RayCastInput,
    xf: &Transform,
    poly: &PolygonShape,
) -> Option<RayCastOutput> {
    // Work in local space.
    let p1 = xf.apply_inv(input.p1);
    let p2 = xf.apply_inv(input.p2);
    let d = p2 - p1;

    let mut lower = 0.0;
    let mut upper = input.max_fraction;
    let mut index: Option<usize> = None;

    for i in 0..poly.vertices.len() {
        // p = p1 + t * d; dot(normal, p - v) = 0
        let numerator = poly.normals[i].dot(poly.vertices[i] - p1);
        let denominator = poly.normals[i].dot(d);

        if denominator == 0.0 {
            if numerator < 0.0 {
                return None;
            }
        } else {
            let t = numerator / denominator;
            if denominator < 0.0 && t > lower {
                lower = t;
                index = Some(i);
            } else if denominator > 0.0 && t < upper {
                upper = t;
            }
        }

        if upper < lower {
            return None;
        }
    }

    index.map(|i| RayCastOutput {
        normal: xf.q.apply(poly.normals[i]),
        fraction: lower,
    })
}

fn ray_cast_edge(input: &RayCastInput, v1: Vec2, v2: Vec2) -> Option<RayCastOutput> {
    let e = v2 - v1;
    let normal = Vec2::new(e.y, -e.x).normalize();

    // p = p1 + t * d; dot(normal, p - v1) = 0
    let d = input.p2 - input.p1;
    let numerator = normal.dot(v1 - input.p1);
    let denominator = normal.dot(d);

    if denominator == 0.0 {
        return None;
    }

    let t = numerator / denominator;
    if t < 0.0 || t > input.max_fraction {
        return None;
    }

    let q = input.p1 + t * d;

    // Is the hit point on the segment?
    let rr = e.length_squared();
    if rr == 0.0 {
        return None;
    }
    let s = (q - v1).dot(e) / rr;
    if !(0.0..=1.0).contains(&s) {
        return None;
    }

    Some(RayCastOutput {
        normal: if numerator > 0.0 { -normal } else { normal },
        fraction: t,
    })
}
