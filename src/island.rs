//! Island Solving
//!
//! An island is a transient cluster of bodies connected through active
//! contacts and joints, solved as one unit. Islands are built serially by
//! the step's constraint-graph traversal and batched into solve tasks;
//! each batch is solved on one worker. Dynamic bodies belong to exactly one
//! island per step, so a worker owns its islands' dynamic state outright;
//! static bodies may appear in many islands and are never written here.

use glam::Vec2;

use crate::body::{Body, BodyType};
use crate::contact_solver::{
    ContactConstraintSetup, ContactSolver, SolverPosition, SolverVelocity,
};
use crate::joint::JointTemps;
use crate::listener::ImmediateResult;
use crate::profile::Timer;
use crate::settings::{
    island_cost, ANGULAR_SLEEP_TOLERANCE, LINEAR_SLEEP_TOLERANCE, MAX_ROTATION,
    MAX_ROTATION_SQUARED, MAX_TRANSLATION, MAX_TRANSLATION_SQUARED, TIME_TO_SLEEP,
};
use crate::world::World;

/// Step timing and iteration counts, fixed for the duration of one step.
#[derive(Clone, Copy, Debug)]
pub struct TimeStep {
    /// Time delta.
    pub dt: f32,
    /// Inverse time delta, or zero when `dt` is zero.
    pub inv_dt: f32,
    /// `dt * previous inv_dt`, used to scale warm-start impulses.
    pub dt_ratio: f32,
    /// Velocity iterations.
    pub velocity_iterations: u32,
    /// Position iterations.
    pub position_iterations: u32,
    /// Warm-start the solvers from accumulated impulses?
    pub warm_starting: bool,
}

/// One island: arrays of arena indices.
#[derive(Clone, Debug, Default)]
pub struct IslandDesc {
    /// Bodies in the island. Dynamic bodies are exclusive to it.
    pub bodies: Vec<u32>,
    /// Touching, enabled, non-sensor contacts.
    pub contacts: Vec<u32>,
    /// Joints.
    pub joints: Vec<u32>,
}

/// Islands batched onto one worker, accumulated until the cost or body
/// count target trips.
#[derive(Clone, Debug, Default)]
pub struct SolveBatch {
    /// The islands.
    pub islands: Vec<IslandDesc>,
    /// Accumulated cost estimate.
    pub cost: u32,
    /// Accumulated body count.
    pub body_count: u32,
}

impl SolveBatch {
    /// Add an island and grow the cost estimate.
    pub fn add_island(&mut self, island: IslandDesc) {
        self.body_count += island.bodies.len() as u32;
        self.cost += island_cost(
            island.bodies.len() as u32,
            island.contacts.len() as u32,
            island.joints.len() as u32,
        );
        self.islands.push(island);
    }
}

/// Island-local body slot lookup. Dynamic and kinematic bodies carry their
/// slot in `island_index` (written by this island's setup); static bodies
/// are resolved from a side table because several islands may hold the same
/// static body at different slots concurrently.
struct SlotMap {
    static_slots: Vec<(u32, usize)>,
}

impl SlotMap {
    fn slot(&self, world: &World, body_id: u32) -> usize {
        let body = world.body(body_id);
        if body.body_type == BodyType::Static {
            self.static_slots
                .iter()
                .find(|(id, _)| *id == body_id)
                .map(|(_, slot)| *slot)
                .expect("static body not in island")
        } else {
            body.island_index as usize
        }
    }
}

/// Solve one island: integrate velocities, solve velocity and position
/// constraints, integrate positions, write back, report post-solve events,
/// and update sleep state.
///
/// # Safety
/// Must run under the solve phase's ownership rules: every non-static body,
/// contact, and joint listed in `island` is owned exclusively by the
/// calling worker, static bodies are read-only everywhere, and
/// `thread_id` is the executing thread.
pub(crate) unsafe fn solve_island(
    world: &World,
    island: &IslandDesc,
    step: &TimeStep,
    gravity: Vec2,
    allow_sleep: bool,
    thread_id: u32,
) {
    let h = step.dt;
    let init_timer = Timer::start();

    // Copy body state into island-local arrays, integrating velocities.
    let n = island.bodies.len();
    let mut positions = Vec::with_capacity(n);
    let mut velocities = Vec::with_capacity(n);
    let mut slot_map = SlotMap {
        static_slots: Vec::new(),
    };

    for (slot, &body_id) in island.bodies.iter().enumerate() {
        let body = world.body(body_id);
        if body.body_type == BodyType::Static {
            slot_map.static_slots.push((body_id, slot));
            positions.push(SolverPosition {
                c: body.sweep.c,
                a: body.sweep.a,
            });
            velocities.push(SolverVelocity {
                v: Vec2::ZERO,
                w: 0.0,
            });
            continue;
        }

        let body = world.body_mut_unchecked(body_id);
        body.island_index = slot as u32;

        let c = body.sweep.c;
        let a = body.sweep.a;
        let mut v = body.linear_velocity;
        let mut w = body.angular_velocity;

        // Store the end-of-step pose as the sweep start.
        body.sweep.c0 = c;
        body.sweep.a0 = a;

        if body.body_type == BodyType::Dynamic {
            v += h * (body.gravity_scale * gravity + body.inv_mass * body.force);
            w += h * body.inv_inertia * body.torque;
            v *= 1.0 / (1.0 + h * body.linear_damping);
            w *= 1.0 / (1.0 + h * body.angular_damping);
        }

        positions.push(SolverPosition { c, a });
        velocities.push(SolverVelocity { v, w });
    }

    // Build contact constraints.
    let mut setups = Vec::with_capacity(island.contacts.len());
    for &contact_id in &island.contacts {
        let contact = world.contact_manager.contact(contact_id);
        let fixture_a = world.fixture(contact.fixture_a);
        let fixture_b = world.fixture(contact.fixture_b);
        let body_a = world.body(contact.body_a);
        let body_b = world.body(contact.body_b);

        let mut manifold = contact.manifold;
        if step.warm_starting {
            for p in &mut manifold.points[..manifold.point_count] {
                p.normal_impulse *= step.dt_ratio;
                p.tangent_impulse *= step.dt_ratio;
            }
        }

        setups.push(ContactConstraintSetup {
            manifold,
            index_a: slot_map.slot(world, contact.body_a),
            index_b: slot_map.slot(world, contact.body_b),
            inv_mass_a: body_a.inv_mass,
            inv_mass_b: body_b.inv_mass,
            inv_i_a: body_a.inv_inertia,
            inv_i_b: body_b.inv_inertia,
            local_center_a: body_a.sweep.local_center,
            local_center_b: body_b.sweep.local_center,
            radius_a: fixture_a.shape.radius(),
            radius_b: fixture_b.shape.radius(),
            friction: contact.friction,
            restitution: contact.restitution,
        });
    }

    let mut solver = ContactSolver::new(setups, &positions, &velocities);
    if step.warm_starting {
        solver.warm_start(&mut velocities);
    }

    // Joints.
    for &joint_id in &island.joints {
        let joint = world.joint_mut_unchecked(joint_id);
        let body_a = world.body(joint.body_a);
        let body_b = world.body(joint.body_b);
        let temps = JointTemps {
            index_a: slot_map.slot(world, joint.body_a),
            index_b: slot_map.slot(world, joint.body_b),
            local_center_a: body_a.sweep.local_center,
            local_center_b: body_b.sweep.local_center,
            inv_mass_a: body_a.inv_mass,
            inv_mass_b: body_b.inv_mass,
            inv_i_a: body_a.inv_inertia,
            inv_i_b: body_b.inv_inertia,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
        };
        joint.init_velocity(temps, &positions, &mut velocities, step.warm_starting);
    }

    {
        let td = world.contact_manager.per_thread_mut_unchecked(thread_id);
        td.profile.solve_init += init_timer.elapsed_ms();
    }

    // Velocity iterations.
    let velocity_timer = Timer::start();
    for _ in 0..step.velocity_iterations {
        for &joint_id in &island.joints {
            world
                .joint_mut_unchecked(joint_id)
                .solve_velocity(&mut velocities);
        }
        solver.solve_velocity(&mut velocities);
    }
    solver.store_impulses();
    {
        let td = world.contact_manager.per_thread_mut_unchecked(thread_id);
        td.profile.solve_velocity += velocity_timer.elapsed_ms();
    }

    // Integrate positions with translation/rotation clamps.
    for i in 0..n {
        let v = &mut velocities[i];
        let translation = h * v.v;
        if translation.length_squared() > MAX_TRANSLATION_SQUARED {
            v.v *= MAX_TRANSLATION / translation.length();
        }
        let rotation = h * v.w;
        if rotation * rotation > MAX_ROTATION_SQUARED {
            v.w *= MAX_ROTATION / rotation.abs();
        }
        positions[i].c += h * v.v;
        positions[i].a += h * v.w;
    }

    // Position iterations.
    let position_timer = Timer::start();
    let mut position_solved = false;
    for _ in 0..step.position_iterations {
        let contacts_ok = solver.solve_position(&mut positions);
        let mut joints_ok = true;
        for &joint_id in &island.joints {
            joints_ok &= world
                .joint_mut_unchecked(joint_id)
                .solve_position(&mut positions);
        }
        if contacts_ok && joints_ok {
            position_solved = true;
            break;
        }
    }
    {
        let td = world.contact_manager.per_thread_mut_unchecked(thread_id);
        td.profile.solve_position += position_timer.elapsed_ms();
    }

    // Write back. Static bodies are read-only during the solve phase.
    for (slot, &body_id) in island.bodies.iter().enumerate() {
        if world.body(body_id).body_type == BodyType::Static {
            continue;
        }
        let body = world.body_mut_unchecked(body_id);
        body.sweep.c = positions[slot].c;
        body.sweep.a = positions[slot].a;
        body.linear_velocity = velocities[slot].v;
        body.angular_velocity = velocities[slot].w;
        body.synchronize_transform();
    }

    // Store solved impulses on the contacts and report post-solve events.
    for (i, &contact_id) in island.contacts.iter().enumerate() {
        let contact = world.contact_manager.contact_mut_unchecked(contact_id);
        let solved = solver.manifold(i);
        for (p, s) in contact.manifold.points[..contact.manifold.point_count]
            .iter_mut()
            .zip(&solved.points[..solved.point_count])
        {
            p.normal_impulse = s.normal_impulse;
            p.tangent_impulse = s.tangent_impulse;
        }

        if let Some(listener) = world.listener_shared() {
            if contact.is_touching()
                && contact.is_enabled()
                && contact.manifold.point_count > 0
            {
                let impulse = solver.impulse(i);
                if listener.post_solve_immediate(contact, &impulse, thread_id)
                    == ImmediateResult::CallDeferred
                {
                    let key = contact.proxy_ids;
                    let td = world.contact_manager.per_thread_mut_unchecked(thread_id);
                    td.post_solves.push(crate::contact_manager::DeferredPostSolve {
                        contact: contact_id,
                        key,
                        impulse,
                    });
                }
            }
        }
    }

    // Sleep accounting, island-wide.
    if allow_sleep {
        let lin_tol_sqr = LINEAR_SLEEP_TOLERANCE * LINEAR_SLEEP_TOLERANCE;
        let ang_tol_sqr = ANGULAR_SLEEP_TOLERANCE * ANGULAR_SLEEP_TOLERANCE;
        let mut min_sleep_time = f32::MAX;

        for &body_id in &island.bodies {
            let body = world.body(body_id);
            if body.body_type == BodyType::Static {
                continue;
            }
            let body = world.body_mut_unchecked(body_id);
            if body.flags & Body::FLAG_AUTO_SLEEP == 0
                || body.angular_velocity * body.angular_velocity > ang_tol_sqr
                || body.linear_velocity.length_squared() > lin_tol_sqr
            {
                body.sleep_time = 0.0;
                min_sleep_time = 0.0;
            } else {
                body.sleep_time += h;
                min_sleep_time = min_sleep_time.min(body.sleep_time);
            }
        }

        if min_sleep_time >= TIME_TO_SLEEP && position_solved {
            for &body_id in &island.bodies {
                if world.body(body_id).body_type == BodyType::Static {
                    continue;
                }
                world.body_mut_unchecked(body_id).set_awake(false);
            }
        }
    }
}

/// Solve a TOI sub-step island serially: stiff position correction for the
/// two advanced bodies, one velocity pass without warm starting, and a
/// position integration over the remaining sub-step time.
pub(crate) fn solve_toi_island(
    world: &mut World,
    island: &IslandDesc,
    sub_step: &TimeStep,
    toi_body_a: u32,
    toi_body_b: u32,
) {
    let h = sub_step.dt;

    let n = island.bodies.len();
    let mut positions = Vec::with_capacity(n);
    let mut velocities = Vec::with_capacity(n);
    let mut slot_map = SlotMap {
        static_slots: Vec::new(),
    };
    let mut toi_index_a = usize::MAX;
    let mut toi_index_b = usize::MAX;

    for (slot, &body_id) in island.bodies.iter().enumerate() {
        let body = world.body(body_id);
        if body.body_type == BodyType::Static {
            slot_map.static_slots.push((body_id, slot));
        } else {
            // Serial phase: exclusive access through `&mut World` semantics.
            unsafe { world.body_mut_unchecked(body_id) }.island_index = slot as u32;
        }
        if body_id == toi_body_a {
            toi_index_a = slot;
        }
        if body_id == toi_body_b {
            toi_index_b = slot;
        }
        let body = world.body(body_id);
        positions.push(SolverPosition {
            c: body.sweep.c,
            a: body.sweep.a,
        });
        velocities.push(SolverVelocity {
            v: body.linear_velocity,
            w: body.angular_velocity,
        });
    }
    debug_assert!(toi_index_a != usize::MAX && toi_index_b != usize::MAX);

    let mut setups = Vec::with_capacity(island.contacts.len());
    for &contact_id in &island.contacts {
        let contact = world.contact_manager.contact(contact_id);
        let fixture_a = world.fixture(contact.fixture_a);
        let fixture_b = world.fixture(contact.fixture_b);
        let body_a = world.body(contact.body_a);
        let body_b = world.body(contact.body_b);
        setups.push(ContactConstraintSetup {
            manifold: contact.manifold,
            index_a: slot_map.slot(world, contact.body_a),
            index_b: slot_map.slot(world, contact.body_b),
            inv_mass_a: body_a.inv_mass,
            inv_mass_b: body_b.inv_mass,
            inv_i_a: body_a.inv_inertia,
            inv_i_b: body_b.inv_inertia,
            local_center_a: body_a.sweep.local_center,
            local_center_b: body_b.sweep.local_center,
            radius_a: fixture_a.shape.radius(),
            radius_b: fixture_b.shape.radius(),
            friction: contact.friction,
            restitution: contact.restitution,
        });
    }

    // Push the advanced bodies out of overlap toward a safe state.
    let solver = ContactSolver::new(setups.clone(), &positions, &velocities);
    for _ in 0..sub_step.position_iterations {
        if solver.solve_toi_position(&mut positions, toi_index_a, toi_index_b) {
            break;
        }
    }

    // Anchor the sweep start at the corrected poses.
    for &(body_id, slot) in
        [(toi_body_a, toi_index_a), (toi_body_b, toi_index_b)].iter()
    {
        let body = unsafe { world.body_mut_unchecked(body_id) };
        body.sweep.c0 = positions[slot].c;
        body.sweep.a0 = positions[slot].a;
    }

    // Velocity pass from the corrected state; no warm starting in
    // sub-steps, so impulses start at zero.
    let mut velocity_setups = setups;
    for setup in &mut velocity_setups {
        for p in &mut setup.manifold.points[..setup.manifold.point_count] {
            p.normal_impulse = 0.0;
            p.tangent_impulse = 0.0;
        }
    }
    let mut solver = ContactSolver::new(velocity_setups, &positions, &velocities);
    for _ in 0..sub_step.velocity_iterations {
        solver.solve_velocity(&mut velocities);
    }

    // Integrate the remaining sub-step and write back.
    for (slot, &body_id) in island.bodies.iter().enumerate() {
        if world.body(body_id).body_type == BodyType::Static {
            continue;
        }
        let v = &mut velocities[slot];
        let translation = h * v.v;
        if translation.length_squared() > MAX_TRANSLATION_SQUARED {
            v.v *= MAX_TRANSLATION / translation.length();
        }
        let rotation = h * v.w;
        if rotation * rotation > MAX_ROTATION_SQUARED {
            v.w *= MAX_ROTATION / rotation.abs();
        }
        positions[slot].c += h * v.v;
        positions[slot].a += h * v.w;

        let body = unsafe { world.body_mut_unchecked(body_id) };
        body.sweep.c = positions[slot].c;
        body.sweep.a = positions[slot].a;
        body.linear_velocity = v.v;
        body.angular_velocity = v.w;
        body.synchronize_transform();
    }
}
