//! Joints
//!
//! Revolute and distance joints. Joints participate in the constraint graph
//! exactly like contacts: each joint links into both bodies' joint-edge
//! lists, carries an island flag, and can suppress collision between its
//! bodies (`collide_connected = false` flags existing contacts for
//! refiltering).

use glam::Vec2;

use crate::contact_solver::{SolverPosition, SolverVelocity};
use crate::math::{cross, cross_sv, Rot};
use crate::settings::NULL_INDEX;

/// Index links for one side of a joint in a body's joint-edge list.
#[derive(Clone, Copy, Debug)]
pub struct JointEdge {
    /// Previous edge reference in the body's list.
    pub prev: u32,
    /// Next edge reference in the body's list.
    pub next: u32,
}

impl Default for JointEdge {
    fn default() -> Self {
        Self {
            prev: NULL_INDEX,
            next: NULL_INDEX,
        }
    }
}

/// Definition of a joint.
#[derive(Clone, Debug)]
pub struct JointDef {
    /// First body.
    pub body_a: u32,
    /// Second body.
    pub body_b: u32,
    /// May the two bodies still collide with each other?
    pub collide_connected: bool,
    /// Kind-specific parameters.
    pub kind: JointDefKind,
}

/// Kind-specific joint parameters. Anchors are body-local.
#[derive(Clone, Debug)]
pub enum JointDefKind {
    /// Pin two anchor points together, leaving rotation free.
    Revolute {
        /// Anchor on body A, in A's frame.
        local_anchor_a: Vec2,
        /// Anchor on body B, in B's frame.
        local_anchor_b: Vec2,
    },
    /// Keep two anchor points at a fixed distance.
    Distance {
        /// Anchor on body A, in A's frame.
        local_anchor_a: Vec2,
        /// Anchor on body B, in B's frame.
        local_anchor_b: Vec2,
        /// Rest length.
        length: f32,
    },
}

/// A joint instance.
#[derive(Clone, Debug)]
pub struct Joint {
    /// First body.
    pub body_a: u32,
    /// Second body.
    pub body_b: u32,
    /// May the bodies collide?
    pub collide_connected: bool,
    /// Joint is part of the current island.
    pub island_flag: bool,
    /// Edge links on body A's joint list.
    pub edge_a: JointEdge,
    /// Edge links on body B's joint list.
    pub edge_b: JointEdge,
    /// Previous joint in the world list.
    pub prev: u32,
    /// Next joint in the world list.
    pub next: u32,
    /// Kind and solver state.
    pub kind: JointKind,
}

/// Joint solver state by kind.
#[derive(Clone, Debug)]
pub enum JointKind {
    /// Point-to-point constraint.
    Revolute(RevoluteJoint),
    /// Fixed-distance constraint.
    Distance(DistanceJoint),
}

impl Joint {
    /// Create a joint from a definition.
    #[must_use]
    pub fn new(def: &JointDef) -> Self {
        let kind = match def.kind {
            JointDefKind::Revolute {
                local_anchor_a,
                local_anchor_b,
            } => JointKind::Revolute(RevoluteJoint {
                local_anchor_a,
                local_anchor_b,
                impulse: Vec2::ZERO,
                temps: JointTemps::default(),
            }),
            JointDefKind::Distance {
                local_anchor_a,
                local_anchor_b,
                length,
            } => JointKind::Distance(DistanceJoint {
                local_anchor_a,
                local_anchor_b,
                length: length.max(crate::settings::LINEAR_SLOP),
                impulse: 0.0,
                mass: 0.0,
                u: Vec2::ZERO,
                temps: JointTemps::default(),
            }),
        };
        Self {
            body_a: def.body_a,
            body_b: def.body_b,
            collide_connected: def.collide_connected,
            island_flag: false,
            edge_a: JointEdge::default(),
            edge_b: JointEdge::default(),
            prev: NULL_INDEX,
            next: NULL_INDEX,
            kind,
        }
    }

    /// The body on the other side from `body`.
    #[inline]
    #[must_use]
    pub fn other_body(&self, body: u32) -> u32 {
        if body == self.body_a {
            self.body_b
        } else {
            self.body_a
        }
    }
}

/// Per-solve cached body data, filled by `init_velocity`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JointTemps {
    /// Island slot of body A.
    pub index_a: usize,
    /// Island slot of body B.
    pub index_b: usize,
    /// Local center of mass of body A.
    pub local_center_a: Vec2,
    /// Local center of mass of body B.
    pub local_center_b: Vec2,
    /// Inverse mass of body A.
    pub inv_mass_a: f32,
    /// Inverse mass of body B.
    pub inv_mass_b: f32,
    /// Inverse inertia of body A.
    pub inv_i_a: f32,
    /// Inverse inertia of body B.
    pub inv_i_b: f32,
    /// Anchor arm on body A.
    pub r_a: Vec2,
    /// Anchor arm on body B.
    pub r_b: Vec2,
}

/// Point-to-point joint state.
#[derive(Clone, Debug)]
pub struct RevoluteJoint {
    /// Anchor in A's frame.
    pub local_anchor_a: Vec2,
    /// Anchor in B's frame.
    pub local_anchor_b: Vec2,
    /// Accumulated impulse, persisted across steps for warm starting.
    pub impulse: Vec2,
    /// Per-solve cache.
    pub temps: JointTemps,
}

/// Fixed-distance joint state.
#[derive(Clone, Debug)]
pub struct DistanceJoint {
    /// Anchor in A's frame.
    pub local_anchor_a: Vec2,
    /// Anchor in B's frame.
    pub local_anchor_b: Vec2,
    /// Rest length.
    pub length: f32,
    /// Accumulated impulse.
    pub impulse: f32,
    /// Effective constraint mass.
    pub mass: f32,
    /// Unit axis from A's anchor to B's anchor.
    pub u: Vec2,
    /// Per-solve cache.
    pub temps: JointTemps,
}

/// Solve a 2x2 system `K x = b`. Returns zero when K is singular.
fn solve22(k11: f32, k12: f32, k21: f32, k22: f32, b: Vec2) -> Vec2 {
    let det = k11 * k22 - k12 * k21;
    if det.abs() < f32::EPSILON {
        return Vec2::ZERO;
    }
    let inv_det = 1.0 / det;
    Vec2::new(
        inv_det * (k22 * b.x - k12 * b.y),
        inv_det * (k11 * b.y - k21 * b.x),
    )
}

impl Joint {
    /// Prepare solver state and warm-start from accumulated impulses.
    pub fn init_velocity(
        &mut self,
        temps: JointTemps,
        positions: &[SolverPosition],
        velocities: &mut [SolverVelocity],
        warm_starting: bool,
    ) {
        match &mut self.kind {
            JointKind::Revolute(j) => {
                j.temps = temps;
                let t = &mut j.temps;
                let q_a = Rot::new(positions[t.index_a].a);
                let q_b = Rot::new(positions[t.index_b].a);
                t.r_a = q_a.apply(j.local_anchor_a - t.local_center_a);
                t.r_b = q_b.apply(j.local_anchor_b - t.local_center_b);

                if warm_starting {
                    let p = j.impulse;
                    velocities[t.index_a].v -= t.inv_mass_a * p;
                    velocities[t.index_a].w -= t.inv_i_a * cross(t.r_a, p);
                    velocities[t.index_b].v += t.inv_mass_b * p;
                    velocities[t.index_b].w += t.inv_i_b * cross(t.r_b, p);
                } else {
                    j.impulse = Vec2::ZERO;
                }
            }
            JointKind::Distance(j) => {
                j.temps = temps;
                let t = &mut j.temps;
                let q_a = Rot::new(positions[t.index_a].a);
                let q_b = Rot::new(positions[t.index_b].a);
                t.r_a = q_a.apply(j.local_anchor_a - t.local_center_a);
                t.r_b = q_b.apply(j.local_anchor_b - t.local_center_b);

                j.u = positions[t.index_b].c + t.r_b - positions[t.index_a].c - t.r_a;
                let length = j.u.length();
                if length > crate::settings::LINEAR_SLOP {
                    j.u /= length;
                } else {
                    j.u = Vec2::ZERO;
                }

                let cr_a = cross(t.r_a, j.u);
                let cr_b = cross(t.r_b, j.u);
                let inv_mass =
                    t.inv_mass_a + t.inv_i_a * cr_a * cr_a + t.inv_mass_b + t.inv_i_b * cr_b * cr_b;
                j.mass = if inv_mass != 0.0 { 1.0 / inv_mass } else { 0.0 };

                if warm_starting {
                    let p = j.impulse * j.u;
                    velocities[t.index_a].v -= t.inv_mass_a * p;
                    velocities[t.index_a].w -= t.inv_i_a * cross(t.r_a, p);
                    velocities[t.index_b].v += t.inv_mass_b * p;
                    velocities[t.index_b].w += t.inv_i_b * cross(t.r_b, p);
                } else {
                    j.impulse = 0.0;
                }
            }
        }
    }

    /// One velocity iteration.
    pub fn solve_velocity(&mut self, velocities: &mut [SolverVelocity]) {
        match &mut self.kind {
            JointKind::Revolute(j) => {
                let t = &j.temps;
                let v_a = velocities[t.index_a].v;
                let w_a = velocities[t.index_a].w;
                let v_b = velocities[t.index_b].v;
                let w_b = velocities[t.index_b].w;

                let cdot = v_b + cross_sv(w_b, t.r_b) - v_a - cross_sv(w_a, t.r_a);

                let k11 = t.inv_mass_a
                    + t.inv_mass_b
                    + t.inv_i_a * t.r_a.y * t.r_a.y
                    + t.inv_i_b * t.r_b.y * t.r_b.y;
                let k12 = -t.inv_i_a * t.r_a.x * t.r_a.y - t.inv_i_b * t.r_b.x * t.r_b.y;
                let k22 = t.inv_mass_a
                    + t.inv_mass_b
                    + t.inv_i_a * t.r_a.x * t.r_a.x
                    + t.inv_i_b * t.r_b.x * t.r_b.x;

                let impulse = solve22(k11, k12, k12, k22, -cdot);
                j.impulse += impulse;

                velocities[t.index_a].v -= t.inv_mass_a * impulse;
                velocities[t.index_a].w -= t.inv_i_a * cross(t.r_a, impulse);
                velocities[t.index_b].v += t.inv_mass_b * impulse;
                velocities[t.index_b].w += t.inv_i_b * cross(t.r_b, impulse);
            }
            JointKind::Distance(j) => {
                let t = &j.temps;
                let v_a = velocities[t.index_a].v;
                let w_a = velocities[t.index_a].w;
                let v_b = velocities[t.index_b].v;
                let w_b = velocities[t.index_b].w;

                let vp_a = v_a + cross_sv(w_a, t.r_a);
                let vp_b = v_b + cross_sv(w_b, t.r_b);
                let cdot = j.u.dot(vp_b - vp_a);

                let impulse = -j.mass * cdot;
                j.impulse += impulse;

                let p = impulse * j.u;
                velocities[t.index_a].v -= t.inv_mass_a * p;
                velocities[t.index_a].w -= t.inv_i_a * cross(t.r_a, p);
                velocities[t.index_b].v += t.inv_mass_b * p;
                velocities[t.index_b].w += t.inv_i_b * cross(t.r_b, p);
            }
        }
    }

    /// One position iteration. Returns `true` when the positional error is
    /// within slop.
    pub fn solve_position(&mut self, positions: &mut [SolverPosition]) -> bool {
        match &mut self.kind {
            JointKind::Revolute(j) => {
                let t = &j.temps;
                let q_a = Rot::new(positions[t.index_a].a);
                let q_b = Rot::new(positions[t.index_b].a);
                let r_a = q_a.apply(j.local_anchor_a - t.local_center_a);
                let r_b = q_b.apply(j.local_anchor_b - t.local_center_b);

                let c = positions[t.index_b].c + r_b - positions[t.index_a].c - r_a;
                let error = c.length();

                let k11 = t.inv_mass_a
                    + t.inv_mass_b
                    + t.inv_i_a * r_a.y * r_a.y
                    + t.inv_i_b * r_b.y * r_b.y;
                let k12 = -t.inv_i_a * r_a.x * r_a.y - t.inv_i_b * r_b.x * r_b.y;
                let k22 = t.inv_mass_a
                    + t.inv_mass_b
                    + t.inv_i_a * r_a.x * r_a.x
                    + t.inv_i_b * r_b.x * r_b.x;

                let impulse = -solve22(k11, k12, k12, k22, c);

                positions[t.index_a].c -= t.inv_mass_a * impulse;
                positions[t.index_a].a -= t.inv_i_a * cross(r_a, impulse);
                positions[t.index_b].c += t.inv_mass_b * impulse;
                positions[t.index_b].a += t.inv_i_b * cross(r_b, impulse);

                error <= crate::settings::LINEAR_SLOP
            }
            JointKind::Distance(j) => {
                let t = &j.temps;
                let q_a = Rot::new(positions[t.index_a].a);
                let q_b = Rot::new(positions[t.index_b].a);
                let r_a = q_a.apply(j.local_anchor_a - t.local_center_a);
                let r_b = q_b.apply(j.local_anchor_b - t.local_center_b);

                let mut u = positions[t.index_b].c + r_b - positions[t.index_a].c - r_a;
                let length = u.length();
                if length > f32::EPSILON {
                    u /= length;
                }
                let c = (length - j.length).clamp(
                    -crate::settings::MAX_LINEAR_CORRECTION,
                    crate::settings::MAX_LINEAR_CORRECTION,
                );

                let impulse = -j.mass * c;
                let p = impulse * u;

                positions[t.index_a].c -= t.inv_mass_a * p;
                positions[t.index_a].a -= t.inv_i_a * cross(r_a, p);
                positions[t.index_b].c += t.inv_mass_b * p;
                positions[t.index_b].a += t.inv_i_b * cross(r_b, p);

                c.abs() < crate::settings::LINEAR_SLOP
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_body_setup() -> (Vec<SolverPosition>, Vec<SolverVelocity>, JointTemps) {
        let positions = vec![
            SolverPosition {
                c: Vec2::ZERO,
                a: 0.0,
            },
            SolverPosition {
                c: Vec2::new(2.0, 0.0),
                a: 0.0,
            },
        ];
        let velocities = vec![
            SolverVelocity {
                v: Vec2::ZERO,
                w: 0.0,
            },
            SolverVelocity {
                v: Vec2::new(1.0, 0.0),
                w: 0.0,
            },
        ];
        let temps = JointTemps {
            index_a: 0,
            index_b: 1,
            inv_mass_a: 0.0, // body A static
            inv_mass_b: 1.0,
            inv_i_a: 0.0,
            inv_i_b: 1.0,
            ..Default::default()
        };
        (positions, velocities, temps)
    }

    #[test]
    fn test_distance_joint_removes_separating_velocity() {
        let (positions, mut velocities, temps) = two_body_setup();
        let mut joint = Joint::new(&JointDef {
            body_a: 0,
            body_b: 1,
            collide_connected: false,
            kind: JointDefKind::Distance {
                local_anchor_a: Vec2::ZERO,
                local_anchor_b: Vec2::ZERO,
                length: 2.0,
            },
        });

        joint.init_velocity(temps, &positions, &mut velocities, false);
        joint.solve_velocity(&mut velocities);

        // Body B was separating along the axis; the joint must cancel it.
        assert!(velocities[1].v.x.abs() < 1e-4, "vx = {}", velocities[1].v.x);
    }

    #[test]
    fn test_distance_joint_position_correction() {
        let (mut positions, mut velocities, temps) = two_body_setup();
        positions[1].c = Vec2::new(2.1, 0.0); // stretched by 0.1

        let mut joint = Joint::new(&JointDef {
            body_a: 0,
            body_b: 1,
            collide_connected: false,
            kind: JointDefKind::Distance {
                local_anchor_a: Vec2::ZERO,
                local_anchor_b: Vec2::ZERO,
                length: 2.0,
            },
        });
        joint.init_velocity(temps, &positions, &mut velocities, false);

        for _ in 0..10 {
            if joint.solve_position(&mut positions) {
                break;
            }
        }
        assert!((positions[1].c.x - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_revolute_joint_pins_anchors() {
        let (mut positions, mut velocities, temps) = two_body_setup();
        let mut joint = Joint::new(&JointDef {
            body_a: 0,
            body_b: 1,
            collide_connected: false,
            kind: JointDefKind::Revolute {
                local_anchor_a: Vec2::ZERO,
                local_anchor_b: Vec2::new(-2.0, 0.0),
            },
        });

        joint.init_velocity(temps, &positions, &mut velocities, false);
        for _ in 0..8 {
            joint.solve_velocity(&mut velocities);
        }
        // Anchor velocity on B must be cancelled.
        let t = match &joint.kind {
            JointKind::Revolute(j) => j.temps,
            JointKind::Distance(_) => unreachable!(),
        };
        let anchor_vel = velocities[1].v + cross_sv(velocities[1].w, t.r_b);
        assert!(anchor_vel.length() < 1e-3);

        for _ in 0..10 {
            if joint.solve_position(&mut positions) {
                break;
            }
        }
        let q_b = Rot::new(positions[1].a);
        let anchor_b = positions[1].c + q_b.apply(Vec2::new(-2.0, 0.0));
        assert!(anchor_b.length() < 0.01);
    }

    #[test]
    fn test_other_body() {
        let joint = Joint::new(&JointDef {
            body_a: 4,
            body_b: 9,
            collide_connected: true,
            kind: JointDefKind::Distance {
                local_anchor_a: Vec2::ZERO,
                local_anchor_b: Vec2::ZERO,
                length: 1.0,
            },
        });
        assert_eq!(joint.other_body(4), 9);
        assert_eq!(joint.other_body(9), 4);
    }
}
