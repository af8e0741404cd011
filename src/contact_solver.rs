//! Contact Constraint Solver
//!
//! Sequential-impulse solver over the contacts of one island. Velocity
//! constraints are warm-started from the impulses stored in each contact's
//! manifold; position constraints apply nonlinear Baumgarte correction. A
//! separate entry point solves TOI position constraints, which correct only
//! the two sub-stepped bodies and use a stiffer Baumgarte factor.

use glam::Vec2;

use crate::collide::{ContactImpulse, Manifold, ManifoldType, WorldManifold};
use crate::math::{cross, cross_sv, Rot, Transform};
use crate::settings::{
    BAUMGARTE, LINEAR_SLOP, MAX_LINEAR_CORRECTION, MAX_MANIFOLD_POINTS, TOI_BAUMGARTE,
    VELOCITY_THRESHOLD,
};

/// Island-local position state: center of mass and angle.
#[derive(Clone, Copy, Debug, Default)]
pub struct SolverPosition {
    /// Center of mass.
    pub c: Vec2,
    /// Angle.
    pub a: f32,
}

/// Island-local velocity state.
#[derive(Clone, Copy, Debug, Default)]
pub struct SolverVelocity {
    /// Linear velocity.
    pub v: Vec2,
    /// Angular velocity.
    pub w: f32,
}

/// Per-contact data the island hands to the solver.
#[derive(Clone, Debug)]
pub struct ContactConstraintSetup {
    /// Manifold copied from the contact.
    pub manifold: Manifold,
    /// Island slot of body A.
    pub index_a: usize,
    /// Island slot of body B.
    pub index_b: usize,
    /// Inverse mass of body A.
    pub inv_mass_a: f32,
    /// Inverse mass of body B.
    pub inv_mass_b: f32,
    /// Inverse inertia of body A.
    pub inv_i_a: f32,
    /// Inverse inertia of body B.
    pub inv_i_b: f32,
    /// Local center of mass of body A.
    pub local_center_a: Vec2,
    /// Local center of mass of body B.
    pub local_center_b: Vec2,
    /// Shell radius of shape A.
    pub radius_a: f32,
    /// Shell radius of shape B.
    pub radius_b: f32,
    /// Mixed friction.
    pub friction: f32,
    /// Mixed restitution.
    pub restitution: f32,
}

#[derive(Clone, Copy, Debug, Default)]
struct VelocityPoint {
    r_a: Vec2,
    r_b: Vec2,
    normal_impulse: f32,
    tangent_impulse: f32,
    normal_mass: f32,
    tangent_mass: f32,
    velocity_bias: f32,
}

#[derive(Clone, Debug)]
struct VelocityConstraint {
    points: [VelocityPoint; MAX_MANIFOLD_POINTS],
    normal: Vec2,
    point_count: usize,
}

/// The solver. One instance per island, rebuilt every solve.
pub struct ContactSolver {
    setups: Vec<ContactConstraintSetup>,
    velocity_constraints: Vec<VelocityConstraint>,
}

impl ContactSolver {
    /// Build velocity constraints from the current island state.
    #[must_use]
    pub fn new(setups: Vec<ContactConstraintSetup>, positions: &[SolverPosition], velocities: &[SolverVelocity]) -> Self {
        let mut velocity_constraints = Vec::with_capacity(setups.len());

        for setup in &setups {
            let xf_a = body_transform(positions[setup.index_a], setup.local_center_a);
            let xf_b = body_transform(positions[setup.index_b], setup.local_center_b);
            let world_manifold = WorldManifold::new(
                &setup.manifold,
                &xf_a,
                setup.radius_a,
                &xf_b,
                setup.radius_b,
            );

            let normal = world_manifold.normal;
            let tangent = Vec2::new(normal.y, -normal.x);
            let c_a = positions[setup.index_a].c;
            let c_b = positions[setup.index_b].c;

            let mut vc = VelocityConstraint {
                points: [VelocityPoint::default(); MAX_MANIFOLD_POINTS],
                normal,
                point_count: setup.manifold.point_count,
            };

            for i in 0..setup.manifold.point_count {
                let p = &mut vc.points[i];
                p.r_a = world_manifold.points[i] - c_a;
                p.r_b = world_manifold.points[i] - c_b;

                let rn_a = cross(p.r_a, normal);
                let rn_b = cross(p.r_b, normal);
                let k_normal = setup.inv_mass_a
                    + setup.inv_mass_b
                    + setup.inv_i_a * rn_a * rn_a
                    + setup.inv_i_b * rn_b * rn_b;
                p.normal_mass = if k_normal > 0.0 { 1.0 / k_normal } else { 0.0 };

                let rt_a = cross(p.r_a, tangent);
                let rt_b = cross(p.r_b, tangent);
                let k_tangent = setup.inv_mass_a
                    + setup.inv_mass_b
                    + setup.inv_i_a * rt_a * rt_a
                    + setup.inv_i_b * rt_b * rt_b;
                p.tangent_mass = if k_tangent > 0.0 { 1.0 / k_tangent } else { 0.0 };

                p.normal_impulse = setup.manifold.points[i].normal_impulse;
                p.tangent_impulse = setup.manifold.points[i].tangent_impulse;

                // Restitution bias from the approach speed.
                let v_a = velocities[setup.index_a];
                let v_b = velocities[setup.index_b];
                let v_rel = normal.dot(
                    v_b.v + cross_sv(v_b.w, p.r_b) - v_a.v - cross_sv(v_a.w, p.r_a),
                );
                if v_rel < -VELOCITY_THRESHOLD {
                    p.velocity_bias = -setup.restitution * v_rel;
                }
            }

            velocity_constraints.push(vc);
        }

        Self {
            setups,
            velocity_constraints,
        }
    }

    /// Apply the warm-start impulses.
    pub fn warm_start(&self, velocities: &mut [SolverVelocity]) {
        for (setup, vc) in self.setups.iter().zip(&self.velocity_constraints) {
            let tangent = Vec2::new(vc.normal.y, -vc.normal.x);
            for p in &vc.points[..vc.point_count] {
                let impulse = p.normal_impulse * vc.normal + p.tangent_impulse * tangent;
                velocities[setup.index_a].v -= setup.inv_mass_a * impulse;
                velocities[setup.index_a].w -= setup.inv_i_a * cross(p.r_a, impulse);
                velocities[setup.index_b].v += setup.inv_mass_b * impulse;
                velocities[setup.index_b].w += setup.inv_i_b * cross(p.r_b, impulse);
            }
        }
    }

    /// One velocity iteration over every constraint.
    pub fn solve_velocity(&mut self, velocities: &mut [SolverVelocity]) {
        for (setup, vc) in self.setups.iter().zip(&mut self.velocity_constraints) {
            let normal = vc.normal;
            let tangent = Vec2::new(normal.y, -normal.x);
            let friction = setup.friction;

            let mut v_a = velocities[setup.index_a];
            let mut v_b = velocities[setup.index_b];

            // Tangent first so friction is bounded by the latest normal
            // impulse at the end of the iteration.
            for p in &mut vc.points[..vc.point_count] {
                let dv = v_b.v + cross_sv(v_b.w, p.r_b) - v_a.v - cross_sv(v_a.w, p.r_a);
                let vt = dv.dot(tangent);
                let mut lambda = p.tangent_mass * -vt;

                let max_friction = friction * p.normal_impulse;
                let new_impulse = (p.tangent_impulse + lambda).clamp(-max_friction, max_friction);
                lambda = new_impulse - p.tangent_impulse;
                p.tangent_impulse = new_impulse;

                let impulse = lambda * tangent;
                v_a.v -= setup.inv_mass_a * impulse;
                v_a.w -= setup.inv_i_a * cross(p.r_a, impulse);
                v_b.v += setup.inv_mass_b * impulse;
                v_b.w += setup.inv_i_b * cross(p.r_b, impulse);
            }

            for p in &mut vc.points[..vc.point_count] {
                let dv = v_b.v + cross_sv(v_b.w, p.r_b) - v_a.v - cross_sv(v_a.w, p.r_a);
                let vn = dv.dot(normal);
                let mut lambda = -p.normal_mass * (vn - p.velocity_bias);

                let new_impulse = (p.normal_impulse + lambda).max(0.0);
                lambda = new_impulse - p.normal_impulse;
                p.normal_impulse = new_impulse;

                let impulse = lambda * normal;
                v_a.v -= setup.inv_mass_a * impulse;
                v_a.w -= setup.inv_i_a * cross(p.r_a, impulse);
                v_b.v += setup.inv_mass_b * impulse;
                v_b.w += setup.inv_i_b * cross(p.r_b, impulse);
            }

            velocities[setup.index_a] = v_a;
            velocities[setup.index_b] = v_b;
        }
    }

    /// Copy accumulated impulses back into the setup manifolds and report
    /// them. The caller writes the manifolds back to the contacts.
    pub fn store_impulses(&mut self) {
        for (setup, vc) in self.setups.iter_mut().zip(&self.velocity_constraints) {
            for i in 0..vc.point_count {
                setup.manifold.points[i].normal_impulse = vc.points[i].normal_impulse;
                setup.manifold.points[i].tangent_impulse = vc.points[i].tangent_impulse;
            }
        }
    }

    /// The stored manifold for setup `i` (after `store_impulses`).
    #[must_use]
    pub fn manifold(&self, i: usize) -> &Manifold {
        &self.setups[i].manifold
    }

    /// The impulses of constraint `i`, for post-solve reporting.
    #[must_use]
    pub fn impulse(&self, i: usize) -> ContactImpulse {
        let vc = &self.velocity_constraints[i];
        let mut impulse = ContactImpulse {
            count: vc.point_count,
            ..Default::default()
        };
        for j in 0..vc.point_count {
            impulse.normal_impulses[j] = vc.points[j].normal_impulse;
            impulse.tangent_impulses[j] = vc.points[j].tangent_impulse;
        }
        impulse
    }

    /// Number of constraints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.setups.len()
    }

    /// Is the solver empty?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.setups.is_empty()
    }

    /// One position iteration. Returns `true` once the worst penetration is
    /// within tolerance.
    pub fn solve_position(&self, positions: &mut [SolverPosition]) -> bool {
        self.solve_position_inner(positions, BAUMGARTE, None)
    }

    /// One TOI position iteration: only the two sub-stepped bodies receive
    /// full mass; every other island body is treated as infinitely heavy.
    pub fn solve_toi_position(
        &self,
        positions: &mut [SolverPosition],
        toi_index_a: usize,
        toi_index_b: usize,
    ) -> bool {
        self.solve_position_inner(positions, TOI_BAUMGARTE, Some((toi_index_a, toi_index_b)))
    }

    fn solve_position_inner(
        &self,
        positions: &mut [SolverPosition],
        baumgarte: f32,
        toi_pair: Option<(usize, usize)>,
    ) -> bool {
        let mut min_separation: f32 = 0.0;

        for setup in &self.setups {
            let (inv_mass_a, inv_i_a, inv_mass_b, inv_i_b) = match toi_pair {
                None => (
                    setup.inv_mass_a,
                    setup.inv_i_a,
                    setup.inv_mass_b,
                    setup.inv_i_b,
                ),
                Some((ia, ib)) => {
                    let a_active = setup.index_a == ia || setup.index_a == ib;
                    let b_active = setup.index_b == ia || setup.index_b == ib;
                    (
                        if a_active { setup.inv_mass_a } else { 0.0 },
                        if a_active { setup.inv_i_a } else { 0.0 },
                        if b_active { setup.inv_mass_b } else { 0.0 },
                        if b_active { setup.inv_i_b } else { 0.0 },
                    )
                }
            };

            for i in 0..setup.manifold.point_count {
                let xf_a = body_transform(positions[setup.index_a], setup.local_center_a);
                let xf_b = body_transform(positions[setup.index_b], setup.local_center_b);

                let (normal, point, separation) = position_manifold(setup, &xf_a, &xf_b, i);
                min_separation = min_separation.min(separation);

                let c = (baumgarte * (separation + LINEAR_SLOP))
                    .clamp(-MAX_LINEAR_CORRECTION, 0.0);

                let r_a = point - positions[setup.index_a].c;
                let r_b = point - positions[setup.index_b].c;

                let rn_a = cross(r_a, normal);
                let rn_b = cross(r_b, normal);
                let k =
                    inv_mass_a + inv_mass_b + inv_i_a * rn_a * rn_a + inv_i_b * rn_b * rn_b;

                let impulse = if k > 0.0 { -c / k } else { 0.0 };
                let p = impulse * normal;

                positions[setup.index_a].c -= inv_mass_a * p;
                positions[setup.index_a].a -= inv_i_a * cross(r_a, p);
                positions[setup.index_b].c += inv_mass_b * p;
                positions[setup.index_b].a += inv_i_b * cross(r_b, p);
            }
        }

        min_separation >= -3.0 * LINEAR_SLOP
    }
}

fn body_transform(position: SolverPosition, local_center: Vec2) -> Transform {
    let q = Rot::new(position.a);
    Transform {
        p: position.c - q.apply(local_center),
        q,
    }
}

/// Current world normal, point, and separation of manifold point `i`.
fn position_manifold(
    setup: &ContactConstraintSetup,
    xf_a: &Transform,
    xf_b: &Transform,
    i: usize,
) -> (Vec2, Vec2, f32) {
    let manifold = &setup.manifold;
    debug_assert!(manifold.point_count > 0);

    match manifold.kind {
        ManifoldType::Circles => {
            let point_a = xf_a.apply(manifold.local_point);
            let point_b = xf_b.apply(manifold.points[0].local_point);
            let normal = (point_b - point_a).normalize_or_zero();
            let normal = if normal == Vec2::ZERO { Vec2::X } else { normal };
            let point = 0.5 * (point_a + point_b);
            let separation =
                (point_b - point_a).dot(normal) - setup.radius_a - setup.radius_b;
            (normal, point, separation)
        }
        ManifoldType::FaceA => {
            let normal = xf_a.q.apply(manifold.local_normal);
            let plane_point = xf_a.apply(manifold.local_point);
            let clip_point = xf_b.apply(manifold.points[i].local_point);
            let separation =
                (clip_point - plane_point).dot(normal) - setup.radius_a - setup.radius_b;
            (normal, clip_point, separation)
        }
        ManifoldType::FaceB => {
            let normal = xf_b.q.apply(manifold.local_normal);
            let plane_point = xf_b.apply(manifold.local_point);
            let clip_point = xf_a.apply(manifold.points[i].local_point);
            let separation =
                (clip_point - plane_point).dot(normal) - setup.radius_a - setup.radius_b;
            // Report the normal from A to B.
            (-normal, clip_point, separation)
        }
    }
}
