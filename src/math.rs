//! 2D Math Primitives
//!
//! Rotations, transforms, sweeps, and axis-aligned bounding boxes over
//! [`glam::Vec2`]. The sweep type carries the start- and end-of-step poses
//! used to interpolate transforms for continuous collision.
//!
//! # Determinism
//!
//! All step-visible arithmetic is plain `f32` with fixed iteration counts.
//! Nothing here consults wall-clock time or platform-variable state, so a
//! fixed input produces bit-identical output on a given target.

use glam::Vec2;

/// 2D rotation stored as sine/cosine of the angle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rot {
    /// Sine of the angle.
    pub s: f32,
    /// Cosine of the angle.
    pub c: f32,
}

impl Rot {
    /// The identity rotation.
    pub const IDENTITY: Self = Self { s: 0.0, c: 1.0 };

    /// Create a rotation from an angle in radians.
    #[inline]
    #[must_use]
    pub fn new(angle: f32) -> Self {
        Self {
            s: angle.sin(),
            c: angle.cos(),
        }
    }

    /// The angle in radians.
    #[inline]
    #[must_use]
    pub fn angle(&self) -> f32 {
        self.s.atan2(self.c)
    }

    /// Rotate a vector.
    #[inline]
    #[must_use]
    pub fn apply(&self, v: Vec2) -> Vec2 {
        Vec2::new(self.c * v.x - self.s * v.y, self.s * v.x + self.c * v.y)
    }

    /// Inverse-rotate a vector.
    #[inline]
    #[must_use]
    pub fn apply_inv(&self, v: Vec2) -> Vec2 {
        Vec2::new(self.c * v.x + self.s * v.y, -self.s * v.x + self.c * v.y)
    }

    /// The unit X axis of this rotation.
    #[inline]
    #[must_use]
    pub fn x_axis(&self) -> Vec2 {
        Vec2::new(self.c, self.s)
    }
}

/// A rigid transform: rotation plus translation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    /// Translation.
    pub p: Vec2,
    /// Rotation.
    pub q: Rot,
}

impl Transform {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        p: Vec2::ZERO,
        q: Rot::IDENTITY,
    };

    /// Create a transform from a position and an angle.
    #[inline]
    #[must_use]
    pub fn new(position: Vec2, angle: f32) -> Self {
        Self {
            p: position,
            q: Rot::new(angle),
        }
    }

    /// Transform a local point to world space.
    #[inline]
    #[must_use]
    pub fn apply(&self, v: Vec2) -> Vec2 {
        self.q.apply(v) + self.p
    }

    /// Transform a world point to local space.
    #[inline]
    #[must_use]
    pub fn apply_inv(&self, v: Vec2) -> Vec2 {
        self.q.apply_inv(v - self.p)
    }
}

/// Scalar 2D cross product: `a.x * b.y - a.y * b.x`.
#[inline]
#[must_use]
pub fn cross(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Cross product of a scalar (z-axis angular term) and a vector.
#[inline]
#[must_use]
pub fn cross_sv(s: f32, v: Vec2) -> Vec2 {
    Vec2::new(-s * v.y, s * v.x)
}

/// A sweep describes the motion of a body's center of mass over a step.
///
/// `c0`/`a0` are the center and angle at time `alpha0` within the step;
/// `c`/`a` are at the end of the step. The center of mass moves linearly and
/// the angle interpolates linearly between the two poses.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Sweep {
    /// Local center of mass relative to the body origin.
    pub local_center: Vec2,
    /// Center of mass at `alpha0`.
    pub c0: Vec2,
    /// Center of mass at the end of the step.
    pub c: Vec2,
    /// Angle at `alpha0`.
    pub a0: f32,
    /// Angle at the end of the step.
    pub a: f32,
    /// Fraction of the step already consumed by TOI sub-stepping.
    pub alpha0: f32,
}

impl Sweep {
    /// Interpolated transform at `beta` in `[0, 1]`, where 0 is `alpha0` and
    /// 1 is the end of the step.
    #[must_use]
    pub fn transform_at(&self, beta: f32) -> Transform {
        let c = (1.0 - beta) * self.c0 + beta * self.c;
        let angle = (1.0 - beta) * self.a0 + beta * self.a;
        let q = Rot::new(angle);
        // The sweep tracks the center of mass; shift back to the body origin.
        Transform {
            p: c - q.apply(self.local_center),
            q,
        }
    }

    /// Advance the sweep so that `alpha0` becomes `alpha`. Requires
    /// `alpha0 < 1`.
    pub fn advance(&mut self, alpha: f32) {
        debug_assert!(self.alpha0 < 1.0);
        let beta = (alpha - self.alpha0) / (1.0 - self.alpha0);
        self.c0 += beta * (self.c - self.c0);
        self.a0 += beta * (self.a - self.a0);
        self.alpha0 = alpha;
    }

    /// Normalize the angles to `[-2*pi, 2*pi]` to avoid drift over long runs.
    pub fn normalize(&mut self) {
        let two_pi = 2.0 * core::f32::consts::PI;
        let d = two_pi * (self.a0 / two_pi).floor();
        self.a0 -= d;
        self.a -= d;
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Aabb {
    /// Lower corner.
    pub lower: Vec2,
    /// Upper corner.
    pub upper: Vec2,
}

impl Aabb {
    /// Create an AABB from corners.
    #[inline]
    #[must_use]
    pub const fn new(lower: Vec2, upper: Vec2) -> Self {
        Self { lower, upper }
    }

    /// The center of the box.
    #[inline]
    #[must_use]
    pub fn center(&self) -> Vec2 {
        0.5 * (self.lower + self.upper)
    }

    /// Half the width and height.
    #[inline]
    #[must_use]
    pub fn extents(&self) -> Vec2 {
        0.5 * (self.upper - self.lower)
    }

    /// Perimeter length, the tree's surface-area metric in 2D.
    #[inline]
    #[must_use]
    pub fn perimeter(&self) -> f32 {
        let w = self.upper.x - self.lower.x;
        let h = self.upper.y - self.lower.y;
        2.0 * (w + h)
    }

    /// The union of two boxes.
    #[inline]
    #[must_use]
    pub fn combine(a: &Aabb, b: &Aabb) -> Aabb {
        Aabb {
            lower: a.lower.min(b.lower),
            upper: a.upper.max(b.upper),
        }
    }

    /// Does this box fully contain `other`?
    #[inline]
    #[must_use]
    pub fn contains(&self, other: &Aabb) -> bool {
        self.lower.x <= other.lower.x
            && self.lower.y <= other.lower.y
            && other.upper.x <= self.upper.x
            && other.upper.y <= self.upper.y
    }

    /// Do two boxes overlap?
    #[inline]
    #[must_use]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        other.lower.x <= self.upper.x
            && other.lower.y <= self.upper.y
            && self.lower.x <= other.upper.x
            && self.lower.y <= other.upper.y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rot_apply_inverse_round_trip() {
        let q = Rot::new(0.7);
        let v = Vec2::new(3.0, -2.0);
        let w = q.apply_inv(q.apply(v));
        assert!((w - v).length() < 1e-5);
    }

    #[test]
    fn test_transform_round_trip() {
        let xf = Transform::new(Vec2::new(1.0, 2.0), -1.2);
        let v = Vec2::new(-4.0, 0.5);
        let w = xf.apply_inv(xf.apply(v));
        assert!((w - v).length() < 1e-5);
    }

    #[test]
    fn test_sweep_transform_endpoints() {
        let sweep = Sweep {
            local_center: Vec2::ZERO,
            c0: Vec2::new(0.0, 0.0),
            c: Vec2::new(10.0, 0.0),
            a0: 0.0,
            a: 1.0,
            alpha0: 0.0,
        };
        let xf0 = sweep.transform_at(0.0);
        let xf1 = sweep.transform_at(1.0);
        assert!((xf0.p - Vec2::ZERO).length() < 1e-6);
        assert!((xf1.p - Vec2::new(10.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_sweep_advance() {
        let mut sweep = Sweep {
            local_center: Vec2::ZERO,
            c0: Vec2::ZERO,
            c: Vec2::new(8.0, 0.0),
            a0: 0.0,
            a: 0.0,
            alpha0: 0.0,
        };
        sweep.advance(0.5);
        assert!((sweep.c0 - Vec2::new(4.0, 0.0)).length() < 1e-6);
        assert_eq!(sweep.alpha0, 0.5);
    }

    #[test]
    fn test_aabb_contains_and_overlaps() {
        let a = Aabb::new(Vec2::new(0.0, 0.0), Vec2::new(10.0, 10.0));
        let b = Aabb::new(Vec2::new(2.0, 2.0), Vec2::new(3.0, 3.0));
        let c = Aabb::new(Vec2::new(20.0, 20.0), Vec2::new(30.0, 30.0));
        assert!(a.contains(&b));
        assert!(!b.contains(&a));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_cross_sign() {
        assert!(cross(Vec2::X, Vec2::Y) > 0.0);
        assert!(cross(Vec2::Y, Vec2::X) < 0.0);
    }
}
