//! Narrow-Phase Collision
//!
//! Contact manifolds between circle, polygon, and edge shapes. Polygon pairs
//! use SAT with reference/incident edge clipping; manifold points carry
//! stable feature ids so impulses persist across updates for warm starting.

use glam::Vec2;

use crate::math::{cross, Transform};
use crate::settings::{MAX_MANIFOLD_POINTS, POLYGON_RADIUS};
use crate::shape::{PolygonShape, Shape};

/// Total speculative contact distance between two shells.
const TOTAL_RADIUS: f32 = 2.0 * POLYGON_RADIUS;

/// Where a manifold's plane lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ManifoldType {
    /// Circle-circle: a single point, no plane.
    #[default]
    Circles,
    /// Plane attached to shape A.
    FaceA,
    /// Plane attached to shape B.
    FaceB,
}

/// A single manifold point.
#[derive(Clone, Copy, Debug, Default)]
pub struct ManifoldPoint {
    /// Location, in B's frame for `FaceA` manifolds and A's frame for
    /// `FaceB` manifolds (the clipped point on the incident shape).
    pub local_point: Vec2,
    /// Accumulated normal impulse, persisted for warm starting.
    pub normal_impulse: f32,
    /// Accumulated tangent impulse, persisted for warm starting.
    pub tangent_impulse: f32,
    /// Stable feature id used to match points across updates.
    pub id: u32,
}

/// A contact manifold: up to two points sharing one normal.
#[derive(Clone, Copy, Debug, Default)]
pub struct Manifold {
    /// The points.
    pub points: [ManifoldPoint; MAX_MANIFOLD_POINTS],
    /// Plane normal in the owning shape's frame (unused for circles).
    pub local_normal: Vec2,
    /// Plane reference point in the owning shape's frame.
    pub local_point: Vec2,
    /// Manifold kind.
    pub kind: ManifoldType,
    /// Number of valid points.
    pub point_count: usize,
}

impl Manifold {
    /// Swap the roles of shape A and shape B.
    #[must_use]
    pub fn flipped(&self) -> Manifold {
        let mut m = *self;
        m.kind = match self.kind {
            ManifoldType::Circles => ManifoldType::Circles,
            ManifoldType::FaceA => ManifoldType::FaceB,
            ManifoldType::FaceB => ManifoldType::FaceA,
        };
        for p in &mut m.points[..m.point_count] {
            p.id = swap_feature_id(p.id);
        }
        m
    }
}

/// Impulses reported to post-solve listeners, one pair per manifold point.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContactImpulse {
    /// Normal impulses.
    pub normal_impulses: [f32; MAX_MANIFOLD_POINTS],
    /// Tangent impulses.
    pub tangent_impulses: [f32; MAX_MANIFOLD_POINTS],
    /// Number of valid entries.
    pub count: usize,
}

/// World-space view of a manifold.
#[derive(Clone, Copy, Debug, Default)]
pub struct WorldManifold {
    /// World normal, pointing from A to B.
    pub normal: Vec2,
    /// World contact points.
    pub points: [Vec2; MAX_MANIFOLD_POINTS],
    /// Signed separations (negative means overlap).
    pub separations: [f32; MAX_MANIFOLD_POINTS],
}

impl WorldManifold {
    /// Evaluate a manifold under the two transforms.
    #[must_use]
    pub fn new(manifold: &Manifold, xf_a: &Transform, radius_a: f32, xf_b: &Transform, radius_b: f32) -> Self {
        let mut wm = WorldManifold::default();
        if manifold.point_count == 0 {
            return wm;
        }

        match manifold.kind {
            ManifoldType::Circles => {
                let point_a = xf_a.apply(manifold.local_point);
                let point_b = xf_b.apply(manifold.points[0].local_point);
                wm.normal = if point_a.distance_squared(point_b) > f32::EPSILON * f32::EPSILON {
                    (point_b - point_a).normalize()
                } else {
                    Vec2::X
                };
                let c_a = point_a + radius_a * wm.normal;
                let c_b = point_b - radius_b * wm.normal;
                wm.points[0] = 0.5 * (c_a + c_b);
                wm.separations[0] = (c_b - c_a).dot(wm.normal);
            }
            ManifoldType::FaceA => {
                wm.normal = xf_a.q.apply(manifold.local_normal);
                let plane_point = xf_a.apply(manifold.local_point);
                for i in 0..manifold.point_count {
                    let clip_point = xf_b.apply(manifold.points[i].local_point);
                    let c_a = clip_point + (radius_a - (clip_point - plane_point).dot(wm.normal)) * wm.normal;
                    let c_b = clip_point - radius_b * wm.normal;
                    wm.points[i] = 0.5 * (c_a + c_b);
                    wm.separations[i] = (c_b - c_a).dot(wm.normal);
                }
            }
            ManifoldType::FaceB => {
                wm.normal = xf_b.q.apply(manifold.local_normal);
                let plane_point = xf_b.apply(manifold.local_point);
                for i in 0..manifold.point_count {
                    let clip_point = xf_a.apply(manifold.points[i].local_point);
                    let c_b = clip_point + (radius_b - (clip_point - plane_point).dot(wm.normal)) * wm.normal;
                    let c_a = clip_point - radius_a * wm.normal;
                    wm.points[i] = 0.5 * (c_a + c_b);
                    wm.separations[i] = (c_a - c_b).dot(wm.normal);
                }
                // Keep the reported normal pointing from A to B.
                wm.normal = -wm.normal;
            }
        }

        wm
    }
}

// Feature ids pack (index_a, index_b, type_a, type_b) into one u32.
const FEATURE_VERTEX: u32 = 0;
const FEATURE_FACE: u32 = 1;

#[inline]
fn feature_id(index_a: u32, index_b: u32, type_a: u32, type_b: u32) -> u32 {
    (index_a & 0xff) | ((index_b & 0xff) << 8) | ((type_a & 0xff) << 16) | ((type_b & 0xff) << 24)
}

#[inline]
fn swap_feature_id(id: u32) -> u32 {
    let index_a = id & 0xff;
    let index_b = (id >> 8) & 0xff;
    let type_a = (id >> 16) & 0xff;
    let type_b = (id >> 24) & 0xff;
    feature_id(index_b, index_a, type_b, type_a)
}

/// Compute the manifold for an ordered shape pair.
#[must_use]
pub fn evaluate(shape_a: &Shape, xf_a: &Transform, shape_b: &Shape, xf_b: &Transform) -> Manifold {
    match (shape_a, shape_b) {
        (Shape::Circle { radius: ra, center: ca }, Shape::Circle { radius: rb, center: cb }) => {
            collide_circles(*ca, *ra, xf_a, *cb, *rb, xf_b)
        }
        (Shape::Polygon(poly), Shape::Circle { radius, center }) => {
            collide_polygon_circle(poly, xf_a, *center, *radius, xf_b)
        }
        (Shape::Circle { radius, center }, Shape::Polygon(poly)) => {
            collide_polygon_circle(poly, xf_b, *center, *radius, xf_a).flipped()
        }
        (Shape::Polygon(pa), Shape::Polygon(pb)) => collide_polygons(pa, xf_a, pb, xf_b),
        (Shape::Edge { v1, v2 }, Shape::Circle { radius, center }) => {
            collide_edge_circle(*v1, *v2, xf_a, *center, *radius, xf_b)
        }
        (Shape::Circle { radius, center }, Shape::Edge { v1, v2 }) => {
            collide_edge_circle(*v1, *v2, xf_b, *center, *radius, xf_a).flipped()
        }
        (Shape::Edge { v1, v2 }, Shape::Polygon(poly)) => {
            collide_edge_polygon(*v1, *v2, xf_a, poly, xf_b)
        }
        (Shape::Polygon(poly), Shape::Edge { v1, v2 }) => {
            collide_edge_polygon(*v1, *v2, xf_b, poly, xf_a).flipped()
        }
        // Edges are boundary geometry; edge-edge pairs produce no response.
        (Shape::Edge { .. }, Shape::Edge { .. }) => Manifold::default(),
    }
}

fn collide_circles(
    center_a: Vec2,
    radius_a: f32,
    xf_a: &Transform,
    center_b: Vec2,
    radius_b: f32,
    xf_b: &Transform,
) -> Manifold {
    let mut manifold = Manifold::default();

    let p_a = xf_a.apply(center_a);
    let p_b = xf_b.apply(center_b);
    let d = p_b - p_a;
    let r = radius_a + radius_b;
    if d.length_squared() > r * r {
        return manifold;
    }

    manifold.kind = ManifoldType::Circles;
    manifold.local_point = center_a;
    manifold.point_count = 1;
    manifold.points[0].local_point = center_b;
    manifold.points[0].id = feature_id(0, 0, FEATURE_VERTEX, FEATURE_VERTEX);
    manifold
}

fn collide_polygon_circle(
    poly: &PolygonShape,
    xf_a: &Transform,
    circle_center: Vec2,
    circle_radius: f32,
    xf_b: &Transform,
) -> Manifold {
    let mut manifold = Manifold::default();

    // Circle center in the polygon's frame.
    let c = xf_a.apply_inv(xf_b.apply(circle_center));

    let radius = POLYGON_RADIUS + circle_radius;
    let n = poly.vertices.len();

    // Deepest penetration face.
    let mut normal_index = 0;
    let mut separation = f32::MIN;
    for i in 0..n {
        let s = poly.normals[i].dot(c - poly.vertices[i]);
        if s > radius {
            return manifold;
        }
        if s > separation {
            separation = s;
            normal_index = i;
        }
    }

    let v1 = poly.vertices[normal_index];
    let v2 = poly.vertices[(normal_index + 1) % n];

    if separation < f32::EPSILON {
        // Center is inside the polygon.
        manifold.kind = ManifoldType::FaceA;
        manifold.local_normal = poly.normals[normal_index];
        manifold.local_point = 0.5 * (v1 + v2);
        manifold.point_count = 1;
        manifold.points[0].local_point = circle_center;
        manifold.points[0].id = feature_id(0, 0, FEATURE_VERTEX, FEATURE_VERTEX);
        return manifold;
    }

    // Voronoi region of the face.
    let u1 = (c - v1).dot(v2 - v1);
    let u2 = (c - v2).dot(v1 - v2);
    let (local_point, local_normal) = if u1 <= 0.0 {
        if c.distance_squared(v1) > radius * radius {
            return manifold;
        }
        (v1, (c - v1).normalize())
    } else if u2 <= 0.0 {
        if c.distance_squared(v2) > radius * radius {
            return manifold;
        }
        (v2, (c - v2).normalize())
    } else {
        let face_center = 0.5 * (v1 + v2);
        if (c - face_center).dot(poly.normals[normal_index]) > radius {
            return manifold;
        }
        (face_center, poly.normals[normal_index])
    };

    manifold.kind = ManifoldType::FaceA;
    manifold.local_normal = local_normal;
    manifold.local_point = local_point;
    manifold.point_count = 1;
    manifold.points[0].local_point = circle_center;
    manifold.points[0].id = feature_id(0, 0, FEATURE_VERTEX, FEATURE_VERTEX);
    manifold
}

#[derive(Clone, Copy, Default)]
struct ClipVertex {
    v: Vec2,
    id: u32,
}

/// Find the maximum separation of poly1's faces from poly2.
fn find_max_separation(
    poly1: &PolygonShape,
    xf1: &Transform,
    poly2: &PolygonShape,
    xf2: &Transform,
) -> (f32, usize) {
    let n1 = poly1.vertices.len();
    let mut best_index = 0;
    let mut max_separation = f32::MIN;

    for i in 0..n1 {
        // poly1's face normal and vertex in poly2's frame.
        let n = xf2.q.apply_inv(xf1.q.apply(poly1.normals[i]));
        let v1 = xf2.apply_inv(xf1.apply(poly1.vertices[i]));

        // Deepest poly2 vertex along -n.
        let mut si = f32::MAX;
        for v2 in &poly2.vertices {
            let s = n.dot(*v2 - v1);
            if s < si {
                si = s;
            }
        }

        if si > max_separation {
            max_separation = si;
            best_index = i;
        }
    }

    (max_separation, best_index)
}

fn find_incident_edge(
    poly1: &PolygonShape,
    xf1: &Transform,
    edge1: usize,
    poly2: &PolygonShape,
    xf2: &Transform,
) -> [ClipVertex; 2] {
    let n2 = poly2.vertices.len();

    // Reference normal in poly2's frame.
    let normal1 = xf2.q.apply_inv(xf1.q.apply(poly1.normals[edge1]));

    // Most anti-parallel face of poly2.
    let mut index = 0;
    let mut min_dot = f32::MAX;
    for (i, n) in poly2.normals.iter().enumerate() {
        let dot = normal1.dot(*n);
        if dot < min_dot {
            min_dot = dot;
            index = i;
        }
    }

    let i1 = index;
    let i2 = (index + 1) % n2;

    [
        ClipVertex {
            v: xf2.apply(poly2.vertices[i1]),
            id: feature_id(edge1 as u32, i1 as u32, FEATURE_FACE, FEATURE_VERTEX),
        },
        ClipVertex {
            v: xf2.apply(poly2.vertices[i2]),
            id: feature_id(edge1 as u32, i2 as u32, FEATURE_FACE, FEATURE_VERTEX),
        },
    ]
}

/// Sutherland-Hodgman clip of a two-point segment against a half-plane.
fn clip_segment_to_line(
    v_in: &[ClipVertex; 2],
    normal: Vec2,
    offset: f32,
    vertex_index_a: u32,
) -> Option<[ClipVertex; 2]> {
    let mut v_out = [ClipVertex::default(); 2];
    let mut count = 0;

    let distance0 = normal.dot(v_in[0].v) - offset;
    let distance1 = normal.dot(v_in[1].v) - offset;

    if distance0 <= 0.0 {
        v_out[count] = v_in[0];
        count += 1;
    }
    if distance1 <= 0.0 {
        v_out[count] = v_in[1];
        count += 1;
    }

    if distance0 * distance1 < 0.0 {
        let interp = distance0 / (distance0 - distance1);
        v_out[count].v = v_in[0].v + interp * (v_in[1].v - v_in[0].v);
        v_out[count].id = feature_id(vertex_index_a, v_in[0].id >> 8 & 0xff, FEATURE_VERTEX, FEATURE_FACE);
        count += 1;
    }

    if count == 2 {
        Some(v_out)
    } else {
        None
    }
}

fn collide_polygons(
    poly_a: &PolygonShape,
    xf_a: &Transform,
    poly_b: &PolygonShape,
    xf_b: &Transform,
) -> Manifold {
    let mut manifold = Manifold::default();

    let (separation_a, edge_a) = find_max_separation(poly_a, xf_a, poly_b, xf_b);
    if separation_a > TOTAL_RADIUS {
        return manifold;
    }

    let (separation_b, edge_b) = find_max_separation(poly_b, xf_b, poly_a, xf_a);
    if separation_b > TOTAL_RADIUS {
        return manifold;
    }

    // Pick the reference polygon with a small bias toward A for coherence.
    const RELATIVE_TOL: f32 = 0.98;
    const ABSOLUTE_TOL: f32 = 0.001;

    let (poly1, xf1, poly2, xf2, edge1, flip) =
        if separation_b > RELATIVE_TOL * separation_a + ABSOLUTE_TOL {
            (poly_b, xf_b, poly_a, xf_a, edge_b, true)
        } else {
            (poly_a, xf_a, poly_b, xf_b, edge_a, false)
        };

    let incident_edge = find_incident_edge(poly1, xf1, edge1, poly2, xf2);

    let n1 = poly1.vertices.len();
    let iv1 = edge1;
    let iv2 = (edge1 + 1) % n1;

    let mut v11 = poly1.vertices[iv1];
    let mut v12 = poly1.vertices[iv2];

    let local_tangent = (v12 - v11).normalize();
    let local_normal = Vec2::new(local_tangent.y, -local_tangent.x);
    let plane_point = 0.5 * (v11 + v12);

    let tangent = xf1.q.apply(local_tangent);
    let normal = Vec2::new(tangent.y, -tangent.x);

    v11 = xf1.apply(v11);
    v12 = xf1.apply(v12);

    let front_offset = normal.dot(v11);
    let side_offset1 = -tangent.dot(v11) + TOTAL_RADIUS;
    let side_offset2 = tangent.dot(v12) + TOTAL_RADIUS;

    let Some(clip1) = clip_segment_to_line(&incident_edge, -tangent, side_offset1, iv1 as u32)
    else {
        return manifold;
    };
    let Some(clip2) = clip_segment_to_line(&clip1, tangent, side_offset2, iv2 as u32) else {
        return manifold;
    };

    manifold.kind = if flip { ManifoldType::FaceB } else { ManifoldType::FaceA };
    manifold.local_normal = local_normal;
    manifold.local_point = plane_point;

    let mut point_count = 0;
    for cv in &clip2 {
        let separation = normal.dot(cv.v) - front_offset;
        if separation <= TOTAL_RADIUS {
            let mp = &mut manifold.points[point_count];
            mp.local_point = xf2.apply_inv(cv.v);
            mp.id = if flip { swap_feature_id(cv.id) } else { cv.id };
            point_count += 1;
        }
    }
    manifold.point_count = point_count;
    manifold
}

fn collide_edge_circle(
    v1: Vec2,
    v2: Vec2,
    xf_a: &Transform,
    circle_center: Vec2,
    circle_radius: f32,
    xf_b: &Transform,
) -> Manifold {
    let mut manifold = Manifold::default();

    // Circle center in the edge's frame.
    let q = xf_a.apply_inv(xf_b.apply(circle_center));

    let e = v2 - v1;
    let u = e.dot(v2 - q);
    let v = e.dot(q - v1);

    let radius = POLYGON_RADIUS + circle_radius;

    // Vertex regions.
    if v <= 0.0 {
        if q.distance_squared(v1) > radius * radius {
            return manifold;
        }
        manifold.kind = ManifoldType::Circles;
        manifold.local_point = v1;
        manifold.point_count = 1;
        manifold.points[0].local_point = circle_center;
        manifold.points[0].id = feature_id(0, 0, FEATURE_VERTEX, FEATURE_VERTEX);
        return manifold;
    }
    if u <= 0.0 {
        if q.distance_squared(v2) > radius * radius {
            return manifold;
        }
        manifold.kind = ManifoldType::Circles;
        manifold.local_point = v2;
        manifold.point_count = 1;
        manifold.points[0].local_point = circle_center;
        manifold.points[0].id = feature_id(1, 0, FEATURE_VERTEX, FEATURE_VERTEX);
        return manifold;
    }

    // Face region.
    let den = e.length_squared();
    debug_assert!(den > 0.0);
    let p = (u * v1 + v * v2) / den;
    if q.distance_squared(p) > radius * radius {
        return manifold;
    }

    let mut n = Vec2::new(-e.y, e.x);
    if n.dot(q - v1) < 0.0 {
        n = -n;
    }

    manifold.kind = ManifoldType::FaceA;
    manifold.local_normal = n.normalize();
    manifold.local_point = v1;
    manifold.point_count = 1;
    manifold.points[0].local_point = circle_center;
    manifold.points[0].id = feature_id(0, 0, FEATURE_FACE, FEATURE_VERTEX);
    manifold
}

fn collide_edge_polygon(
    v1: Vec2,
    v2: Vec2,
    xf_a: &Transform,
    poly: &PolygonShape,
    xf_b: &Transform,
) -> Manifold {
    let mut manifold = Manifold::default();

    // Work in the edge's frame.
    let xf = Transform {
        p: xf_a.q.apply_inv(xf_b.p - xf_a.p),
        q: crate::math::Rot {
            s: xf_a.q.c * xf_b.q.s - xf_a.q.s * xf_b.q.c,
            c: xf_a.q.c * xf_b.q.c + xf_a.q.s * xf_b.q.s,
        },
    };

    let centroid = xf.apply(poly.centroid);
    let e = v2 - v1;
    let edge_normal = {
        let n = Vec2::new(e.y, -e.x).normalize();
        // Face the polygon.
        if n.dot(centroid - v1) < 0.0 {
            -n
        } else {
            n
        }
    };

    // Separation of the polygon from the edge plane.
    let n_poly = poly.vertices.len();
    let mut separation = f32::MAX;
    for i in 0..n_poly {
        let p = xf.apply(poly.vertices[i]);
        let s = edge_normal.dot(p - v1);
        if s < separation {
            separation = s;
        }
    }
    if separation > TOTAL_RADIUS {
        return manifold;
    }

    // Polygon face most anti-parallel to the edge normal.
    let mut incident_index = 0;
    let mut min_dot = f32::MAX;
    for i in 0..n_poly {
        let dot = edge_normal.dot(xf.q.apply(poly.normals[i]));
        if dot < min_dot {
            min_dot = dot;
            incident_index = i;
        }
    }

    let i1 = incident_index;
    let i2 = (incident_index + 1) % n_poly;
    let incident = [
        ClipVertex {
            v: xf.apply(poly.vertices[i1]),
            id: feature_id(0, i1 as u32, FEATURE_FACE, FEATURE_VERTEX),
        },
        ClipVertex {
            v: xf.apply(poly.vertices[i2]),
            id: feature_id(0, i2 as u32, FEATURE_FACE, FEATURE_VERTEX),
        },
    ];

    // Clip against the edge segment's ends.
    let tangent = e.normalize();
    let side_offset1 = -tangent.dot(v1) + TOTAL_RADIUS;
    let side_offset2 = tangent.dot(v2) + TOTAL_RADIUS;

    let Some(clip1) = clip_segment_to_line(&incident, -tangent, side_offset1, 0) else {
        return manifold;
    };
    let Some(clip2) = clip_segment_to_line(&clip1, tangent, side_offset2, 1) else {
        return manifold;
    };

    manifold.kind = ManifoldType::FaceA;
    manifold.local_normal = edge_normal;
    manifold.local_point = v1;

    let front_offset = edge_normal.dot(v1);
    let mut point_count = 0;
    for cv in &clip2 {
        let s = edge_normal.dot(cv.v) - front_offset;
        if s <= TOTAL_RADIUS {
            let mp = &mut manifold.points[point_count];
            // Back to the polygon's frame.
            mp.local_point = xf.apply_inv(cv.v);
            mp.id = cv.id;
            point_count += 1;
        }
    }
    manifold.point_count = point_count;
    manifold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circles_touching() {
        let a = Shape::circle(1.0);
        let b = Shape::circle(1.0);
        let xf_a = Transform::IDENTITY;
        let xf_b = Transform::new(Vec2::new(1.5, 0.0), 0.0);
        let m = evaluate(&a, &xf_a, &b, &xf_b);
        assert_eq!(m.point_count, 1);
        assert_eq!(m.kind, ManifoldType::Circles);

        let wm = WorldManifold::new(&m, &xf_a, 1.0, &xf_b, 1.0);
        assert!(wm.normal.x > 0.99);
        assert!(wm.separations[0] < 0.0);
    }

    #[test]
    fn test_circles_apart() {
        let a = Shape::circle(1.0);
        let b = Shape::circle(1.0);
        let m = evaluate(
            &a,
            &Transform::IDENTITY,
            &b,
            &Transform::new(Vec2::new(5.0, 0.0), 0.0),
        );
        assert_eq!(m.point_count, 0);
    }

    #[test]
    fn test_box_box_overlap_two_points() {
        let a = Shape::box2(1.0, 1.0);
        let b = Shape::box2(1.0, 1.0);
        let xf_a = Transform::IDENTITY;
        let xf_b = Transform::new(Vec2::new(1.9, 0.0), 0.0);
        let m = evaluate(&a, &xf_a, &b, &xf_b);
        assert_eq!(m.point_count, 2);

        let wm = WorldManifold::new(&m, &xf_a, POLYGON_RADIUS, &xf_b, POLYGON_RADIUS);
        assert!(wm.normal.x.abs() > 0.99);
        assert!(wm.separations[0] < 0.0);
        assert!(wm.separations[1] < 0.0);
    }

    #[test]
    fn test_flipped_pair_has_opposite_world_normal() {
        let poly = Shape::box2(1.0, 1.0);
        let circle = Shape::circle(0.5);
        let xf_p = Transform::IDENTITY;
        let xf_c = Transform::new(Vec2::new(1.3, 0.0), 0.0);

        let m1 = evaluate(&poly, &xf_p, &circle, &xf_c);
        let m2 = evaluate(&circle, &xf_c, &poly, &xf_p);
        assert_eq!(m1.point_count, 1);
        assert_eq!(m2.point_count, 1);

        let w1 = WorldManifold::new(&m1, &xf_p, POLYGON_RADIUS, &xf_c, 0.5);
        let w2 = WorldManifold::new(&m2, &xf_c, 0.5, &xf_p, POLYGON_RADIUS);
        assert!((w1.normal + w2.normal).length() < 1e-4);
    }

    #[test]
    fn test_box_resting_on_edge() {
        let edge = Shape::edge(Vec2::new(-5.0, 0.0), Vec2::new(5.0, 0.0));
        let b = Shape::box2(0.5, 0.5);
        let xf_e = Transform::IDENTITY;
        let xf_b = Transform::new(Vec2::new(0.0, 0.49), 0.0);
        let m = evaluate(&edge, &xf_e, &b, &xf_b);
        assert_eq!(m.point_count, 2);

        let wm = WorldManifold::new(&m, &xf_e, POLYGON_RADIUS, &xf_b, POLYGON_RADIUS);
        assert!(wm.normal.y > 0.99, "normal should point up, got {:?}", wm.normal);
    }

    #[test]
    fn test_edge_edge_produces_nothing() {
        let a = Shape::edge(Vec2::new(-1.0, 0.0), Vec2::new(1.0, 0.0));
        let b = Shape::edge(Vec2::new(0.0, -1.0), Vec2::new(0.0, 1.0));
        let m = evaluate(&a, &Transform::IDENTITY, &b, &Transform::IDENTITY);
        assert_eq!(m.point_count, 0);
    }

    #[test]
    fn test_feature_id_swap_round_trip() {
        let id = feature_id(3, 7, FEATURE_FACE, FEATURE_VERTEX);
        assert_eq!(swap_feature_id(swap_feature_id(id)), id);
        assert_ne!(swap_feature_id(id), id);
    }

    #[test]
    fn test_warm_start_ids_stable_across_small_motion() {
        let a = Shape::box2(1.0, 1.0);
        let b = Shape::box2(1.0, 1.0);
        let xf_a = Transform::IDENTITY;
        let m1 = evaluate(&a, &xf_a, &b, &Transform::new(Vec2::new(1.9, 0.0), 0.0));
        let m2 = evaluate(&a, &xf_a, &b, &Transform::new(Vec2::new(1.901, 0.001), 0.0));
        assert_eq!(m1.point_count, m2.point_count);
        for i in 0..m1.point_count {
            assert_eq!(m1.points[i].id, m2.points[i].id);
        }
    }
}
