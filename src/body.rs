//! Rigid Bodies
//!
//! Body state, flags, and the sweep used for continuous collision. Bodies
//! link to their fixtures, contacts, and joints through index-based lists;
//! `NULL_INDEX` is the end-of-list sentinel. Mass recomputation and fixture
//! bookkeeping live on [`World`](crate::world::World), which owns the
//! arenas.

use glam::Vec2;

use crate::math::{Rot, Sweep, Transform};
use crate::settings::NULL_INDEX;

/// Type of a rigid body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BodyType {
    /// Immovable body (infinite mass, zero velocity).
    #[default]
    Static,
    /// User-driven body: moves with its velocity, unaffected by forces.
    Kinematic,
    /// Fully simulated body.
    Dynamic,
}

/// Definition used to construct a body.
#[derive(Clone, Debug)]
pub struct BodyDef {
    /// Body type.
    pub body_type: BodyType,
    /// World position of the body origin.
    pub position: Vec2,
    /// World angle in radians.
    pub angle: f32,
    /// Initial linear velocity.
    pub linear_velocity: Vec2,
    /// Initial angular velocity.
    pub angular_velocity: f32,
    /// Linear velocity damping.
    pub linear_damping: f32,
    /// Angular velocity damping.
    pub angular_damping: f32,
    /// May this body fall asleep?
    pub allow_sleep: bool,
    /// Does this body start awake?
    pub awake: bool,
    /// Prevent rotation?
    pub fixed_rotation: bool,
    /// Is this a high-speed body that must never tunnel?
    pub bullet: bool,
    /// Opt this body's contacts out of CCD even where its type would
    /// normally make them candidates.
    pub prefer_no_ccd: bool,
    /// Does this body start active?
    pub active: bool,
    /// Scale applied to world gravity for this body.
    pub gravity_scale: f32,
}

impl Default for BodyDef {
    fn default() -> Self {
        Self {
            body_type: BodyType::Static,
            position: Vec2::ZERO,
            angle: 0.0,
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            allow_sleep: true,
            awake: true,
            fixed_rotation: false,
            bullet: false,
            prefer_no_ccd: false,
            active: true,
            gravity_scale: 1.0,
        }
    }
}

/// A rigid body.
#[derive(Clone, Debug)]
pub struct Body {
    /// Flag bits, see the `FLAG_*` constants.
    pub flags: u32,
    /// Body type.
    pub body_type: BodyType,
    /// Body origin transform.
    pub xf: Transform,
    /// Swept motion of the center of mass over the current step.
    pub sweep: Sweep,
    /// Linear velocity of the center of mass.
    pub linear_velocity: Vec2,
    /// Angular velocity.
    pub angular_velocity: f32,
    /// Accumulated force.
    pub force: Vec2,
    /// Accumulated torque.
    pub torque: f32,
    /// Mass in kilograms.
    pub mass: f32,
    /// Inverse mass.
    pub inv_mass: f32,
    /// Rotational inertia about the center of mass.
    pub inertia: f32,
    /// Inverse rotational inertia.
    pub inv_inertia: f32,
    /// Linear damping.
    pub linear_damping: f32,
    /// Angular damping.
    pub angular_damping: f32,
    /// Gravity scale.
    pub gravity_scale: f32,
    /// Time spent below the sleep tolerances.
    pub sleep_time: f32,
    /// Head of the fixture list (fixture index).
    pub fixture_list: u32,
    /// Number of fixtures.
    pub fixture_count: u32,
    /// Head of the contact edge list (encoded edge reference).
    pub contact_list: u32,
    /// Head of the joint edge list (encoded edge reference).
    pub joint_list: u32,
    /// Previous body in the world list.
    pub prev: u32,
    /// Next body in the world list.
    pub next: u32,
    /// Index in the world's static or non-static body array.
    pub world_index: u32,
    /// Solver slot while this body is inside an island.
    pub island_index: u32,
}

impl Body {
    /// Body is part of the current island.
    pub const FLAG_ISLAND: u32 = 0x0001;
    /// Body is awake.
    pub const FLAG_AWAKE: u32 = 0x0002;
    /// Body may fall asleep on its own.
    pub const FLAG_AUTO_SLEEP: u32 = 0x0004;
    /// Body is a bullet: its contacts are always CCD candidates.
    pub const FLAG_BULLET: u32 = 0x0008;
    /// Body may not rotate.
    pub const FLAG_FIXED_ROTATION: u32 = 0x0010;
    /// Body participates in simulation.
    pub const FLAG_ACTIVE: u32 = 0x0020;
    /// Body opts its contacts out of CCD where its type would otherwise
    /// make them candidates.
    pub const FLAG_PREFER_NO_CCD: u32 = 0x0040;
    /// An island TOI sub-step has already advanced this body.
    pub const FLAG_TOI: u32 = 0x0080;

    /// Construct a body from a definition.
    #[must_use]
    pub fn new(def: &BodyDef) -> Self {
        let mut flags = 0;
        if def.awake {
            flags |= Self::FLAG_AWAKE;
        }
        if def.allow_sleep {
            flags |= Self::FLAG_AUTO_SLEEP;
        }
        if def.bullet {
            flags |= Self::FLAG_BULLET;
        }
        if def.fixed_rotation {
            flags |= Self::FLAG_FIXED_ROTATION;
        }
        if def.active {
            flags |= Self::FLAG_ACTIVE;
        }
        if def.prefer_no_ccd {
            flags |= Self::FLAG_PREFER_NO_CCD;
        }

        let xf = Transform::new(def.position, def.angle);
        let sweep = Sweep {
            local_center: Vec2::ZERO,
            c0: xf.p,
            c: xf.p,
            a0: def.angle,
            a: def.angle,
            alpha0: 0.0,
        };

        let (mass, inv_mass) = match def.body_type {
            BodyType::Dynamic => (1.0, 1.0),
            _ => (0.0, 0.0),
        };

        Self {
            flags,
            body_type: def.body_type,
            xf,
            sweep,
            linear_velocity: def.linear_velocity,
            angular_velocity: def.angular_velocity,
            force: Vec2::ZERO,
            torque: 0.0,
            mass,
            inv_mass,
            inertia: 0.0,
            inv_inertia: 0.0,
            linear_damping: def.linear_damping,
            angular_damping: def.angular_damping,
            gravity_scale: def.gravity_scale,
            sleep_time: 0.0,
            fixture_list: NULL_INDEX,
            fixture_count: 0,
            contact_list: NULL_INDEX,
            joint_list: NULL_INDEX,
            prev: NULL_INDEX,
            next: NULL_INDEX,
            world_index: NULL_INDEX,
            island_index: NULL_INDEX,
        }
    }

    /// Is the body awake?
    #[inline]
    #[must_use]
    pub fn is_awake(&self) -> bool {
        self.flags & Self::FLAG_AWAKE != 0
    }

    /// Is the body active?
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.flags & Self::FLAG_ACTIVE != 0
    }

    /// Is this a bullet body?
    #[inline]
    #[must_use]
    pub fn is_bullet(&self) -> bool {
        self.flags & Self::FLAG_BULLET != 0
    }

    /// Has this body opted out of CCD?
    #[inline]
    #[must_use]
    pub fn prefer_no_ccd(&self) -> bool {
        self.flags & Self::FLAG_PREFER_NO_CCD != 0
    }

    /// Wake the body or put it to sleep. Sleeping zeroes velocities and
    /// accumulated forces.
    pub fn set_awake(&mut self, awake: bool) {
        if awake {
            if self.flags & Self::FLAG_AWAKE == 0 {
                self.flags |= Self::FLAG_AWAKE;
                self.sleep_time = 0.0;
            }
        } else {
            self.flags &= !Self::FLAG_AWAKE;
            self.sleep_time = 0.0;
            self.linear_velocity = Vec2::ZERO;
            self.angular_velocity = 0.0;
            self.force = Vec2::ZERO;
            self.torque = 0.0;
        }
    }

    /// World position of the body origin.
    #[inline]
    #[must_use]
    pub fn position(&self) -> Vec2 {
        self.xf.p
    }

    /// World angle in radians.
    #[inline]
    #[must_use]
    pub fn angle(&self) -> f32 {
        self.sweep.a
    }

    /// World center of mass.
    #[inline]
    #[must_use]
    pub fn world_center(&self) -> Vec2 {
        self.sweep.c
    }

    /// Apply a force at the center of mass. Wakes are the caller's concern.
    pub fn apply_force_to_center(&mut self, force: Vec2) {
        if self.body_type == BodyType::Dynamic && self.is_awake() {
            self.force += force;
        }
    }

    /// Apply a linear impulse at the center of mass.
    pub fn apply_linear_impulse(&mut self, impulse: Vec2) {
        if self.body_type == BodyType::Dynamic && self.is_awake() {
            self.linear_velocity += self.inv_mass * impulse;
        }
    }

    /// Rebuild the body-origin transform from the end-of-sweep pose.
    pub fn synchronize_transform(&mut self) {
        self.xf.q = Rot::new(self.sweep.a);
        self.xf.p = self.sweep.c - self.xf.q.apply(self.sweep.local_center);
    }

    /// Advance the sweep to `alpha` and snap the pose to it. Used by the
    /// TOI loop to move a body to its impact time.
    pub fn advance(&mut self, alpha: f32) {
        self.sweep.advance(alpha);
        self.sweep.c = self.sweep.c0;
        self.sweep.a = self.sweep.a0;
        self.synchronize_transform();
    }

    /// Can this body ever collide with `other`? Joint overrides are checked
    /// separately by the contact manager, which owns the joint arena.
    #[must_use]
    pub fn should_collide_types(&self, other: &Body) -> bool {
        // At least one body must be dynamic.
        self.body_type == BodyType::Dynamic || other.body_type == BodyType::Dynamic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_body_defaults() {
        let body = Body::new(&BodyDef::default());
        assert_eq!(body.body_type, BodyType::Static);
        assert!(body.is_awake());
        assert!(body.is_active());
        assert!(!body.is_bullet());
        assert_eq!(body.fixture_list, NULL_INDEX);
        assert_eq!(body.contact_list, NULL_INDEX);
    }

    #[test]
    fn test_dynamic_body_has_unit_mass_before_fixtures() {
        let body = Body::new(&BodyDef {
            body_type: BodyType::Dynamic,
            ..Default::default()
        });
        assert_eq!(body.mass, 1.0);
        assert_eq!(body.inv_mass, 1.0);
    }

    #[test]
    fn test_sleep_clears_velocity() {
        let mut body = Body::new(&BodyDef {
            body_type: BodyType::Dynamic,
            linear_velocity: Vec2::new(3.0, 0.0),
            angular_velocity: 1.0,
            ..Default::default()
        });
        body.set_awake(false);
        assert!(!body.is_awake());
        assert_eq!(body.linear_velocity, Vec2::ZERO);
        assert_eq!(body.angular_velocity, 0.0);
    }

    #[test]
    fn test_advance_moves_pose() {
        let mut body = Body::new(&BodyDef {
            body_type: BodyType::Dynamic,
            ..Default::default()
        });
        body.sweep.c = Vec2::new(10.0, 0.0);
        body.advance(0.5);
        assert!((body.sweep.c0 - Vec2::new(5.0, 0.0)).length() < 1e-5);
        assert!((body.xf.p - Vec2::new(5.0, 0.0)).length() < 1e-5);
        assert_eq!(body.sweep.alpha0, 0.5);
    }

    #[test]
    fn test_should_collide_types() {
        let s = Body::new(&BodyDef::default());
        let d = Body::new(&BodyDef {
            body_type: BodyType::Dynamic,
            ..Default::default()
        });
        assert!(!s.should_collide_types(&s));
        assert!(s.should_collide_types(&d));
        assert!(d.should_collide_types(&d));
    }
}
