//! The World and the Parallel Step Pipeline
//!
//! Owns the body/fixture/joint arenas and the contact manager, and
//! orchestrates one step:
//!
//! ```text
//! FindNewContacts -> Collide -> Solve (serial island traversal,
//!                                      parallel island solve)
//!                            -> SolveTOI (serial)
//!                            -> SynchronizeFixtures (parallel)
//!                            -> FindNewContacts (parallel)
//! ```
//!
//! Every parallel phase writes only per-thread buffers and phase-owned
//! elements; between phases the buffers are merged in deterministic key
//! order, so the post-step state is independent of thread count and
//! scheduling. The world is locked for the duration of the pipeline:
//! create/destroy calls fail with [`WorldError::Locked`].

use glam::Vec2;

use crate::body::{Body, BodyDef, BodyType};
use crate::contact::{edge_contact, edge_ref, edge_side, Contact, ProxyIdPair};
use crate::contact_manager::{
    kway_merge, ContactManager, DeferredContactCreate, DeferredContactEvent, DeferredMoveProxy,
};
use crate::distance::{test_overlap, DistanceProxy};
use crate::error::WorldError;
use crate::executor::{
    PartitionedRange, Range, SolveHandle, SortSet, StepTask, TaskExecutor, TaskGroupId, TaskKind,
    ThreadContext,
};
use crate::filter::ContactFilter;
use crate::fixture::{Fixture, FixtureDef, FixtureProxy};
use crate::island::{solve_island, solve_toi_island, IslandDesc, SolveBatch, TimeStep};
use crate::joint::{Joint, JointDef};
use crate::listener::{ContactListener, ImmediateResult};
use crate::math::{Aabb, Transform};
use crate::profile::{StepProfile, Timer};
use crate::settings::{
    MAX_SUB_STEPS, MAX_TOI_CONTACTS, NULL_INDEX, SOLVE_BATCH_TARGET_BODY_COUNT,
    SOLVE_BATCH_TARGET_COST,
};
use crate::shape::RayCastInput;
use crate::sync_cell::SyncCell;
use crate::toi::{time_of_impact, ToiInput, ToiState};

/// Raw pointer to the stepping world, carried by tasks.
#[derive(Clone, Copy, Debug)]
pub(crate) struct WorldPtr(pub(crate) *mut World);

// Safety: tasks only run between submission and the phase's wait, during
// which the world outlives them and the phase rules keep accesses disjoint.
unsafe impl Send for WorldPtr {}
unsafe impl Sync for WorldPtr {}

const MAIN_THREAD_CTX: ThreadContext = ThreadContext { thread_id: 0 };

/// The physics world.
pub struct World {
    pub(crate) bodies: Vec<SyncCell<Body>>,
    body_free: Vec<u32>,
    pub(crate) fixtures: Vec<SyncCell<Fixture>>,
    fixture_free: Vec<u32>,
    pub(crate) joints: Vec<SyncCell<Joint>>,
    joint_free: Vec<u32>,

    /// The contact set, deferred buffers, and broad-phase.
    pub contact_manager: ContactManager,

    body_list: u32,
    joint_list: u32,
    body_count: u32,
    joint_count: u32,
    /// Dense arrays of body ids, iterated by the pipeline. A body's
    /// `world_index` mirrors its position in its array.
    non_static_bodies: Vec<u32>,
    static_bodies: Vec<u32>,

    listener: Option<Box<dyn ContactListener>>,

    gravity: Vec2,
    flags: u32,
    step_complete: bool,
    warm_starting: bool,
    continuous_physics: bool,
    sub_stepping: bool,
    allow_sleep: bool,
    inv_dt0: f32,
    profile: StepProfile,

    /// Live solve batches; stable addresses are guaranteed by boxing.
    solve_batches: Vec<Box<SolveBatch>>,
    /// The step parameters, readable by solve tasks during the phase.
    current_step: TimeStep,
}

impl World {
    const FLAG_NEW_FIXTURE: u32 = 0x0001;
    const FLAG_LOCKED: u32 = 0x0002;
    const FLAG_CLEAR_FORCES: u32 = 0x0004;

    /// Create an empty world with the given gravity.
    #[must_use]
    pub fn new(gravity: Vec2) -> Self {
        Self {
            bodies: Vec::new(),
            body_free: Vec::new(),
            fixtures: Vec::new(),
            fixture_free: Vec::new(),
            joints: Vec::new(),
            joint_free: Vec::new(),
            contact_manager: ContactManager::new(),
            body_list: NULL_INDEX,
            joint_list: NULL_INDEX,
            body_count: 0,
            joint_count: 0,
            non_static_bodies: Vec::new(),
            static_bodies: Vec::new(),
            listener: None,
            gravity,
            flags: Self::FLAG_CLEAR_FORCES,
            step_complete: true,
            warm_starting: true,
            continuous_physics: true,
            sub_stepping: false,
            allow_sleep: true,
            inv_dt0: 0.0,
            profile: StepProfile::default(),
            solve_batches: Vec::new(),
            current_step: TimeStep {
                dt: 0.0,
                inv_dt: 0.0,
                dt_ratio: 0.0,
                velocity_iterations: 8,
                position_iterations: 3,
                warm_starting: true,
            },
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Is a step in progress?
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.flags & Self::FLAG_LOCKED != 0
    }

    /// Did the last step run to completion (no pending sub-steps)?
    #[inline]
    #[must_use]
    pub fn is_step_complete(&self) -> bool {
        self.step_complete
    }

    /// Number of live bodies.
    #[inline]
    #[must_use]
    pub fn body_count(&self) -> u32 {
        self.body_count
    }

    /// Number of live joints.
    #[inline]
    #[must_use]
    pub fn joint_count(&self) -> u32 {
        self.joint_count
    }

    /// Number of live contacts.
    #[inline]
    #[must_use]
    pub fn contact_count(&self) -> u32 {
        self.contact_manager.contact_count
    }

    /// World gravity.
    #[inline]
    #[must_use]
    pub fn gravity(&self) -> Vec2 {
        self.gravity
    }

    /// Set world gravity.
    pub fn set_gravity(&mut self, gravity: Vec2) {
        self.gravity = gravity;
    }

    /// The profile of the last step.
    #[inline]
    #[must_use]
    pub fn profile(&self) -> &StepProfile {
        &self.profile
    }

    /// Enable or disable continuous physics.
    pub fn set_continuous_physics(&mut self, flag: bool) {
        self.continuous_physics = flag;
    }

    /// Enable or disable single-TOI-sub-step mode.
    pub fn set_sub_stepping(&mut self, flag: bool) {
        self.sub_stepping = flag;
    }

    /// Enable or disable sleeping. Disabling wakes every body.
    pub fn set_allow_sleeping(&mut self, flag: bool) {
        if flag == self.allow_sleep {
            return;
        }
        self.allow_sleep = flag;
        if !flag {
            let mut id = self.body_list;
            while id != NULL_INDEX {
                let body = self.bodies[id as usize].get_mut();
                body.set_awake(true);
                id = body.next;
            }
        }
    }

    /// Enable or disable automatic force clearing at the end of each step.
    pub fn set_auto_clear_forces(&mut self, flag: bool) {
        if flag {
            self.flags |= Self::FLAG_CLEAR_FORCES;
        } else {
            self.flags &= !Self::FLAG_CLEAR_FORCES;
        }
    }

    /// Install a contact listener.
    pub fn set_contact_listener(&mut self, listener: Box<dyn ContactListener>) {
        self.listener = Some(listener);
    }

    /// Remove and return the contact listener.
    pub fn take_contact_listener(&mut self) -> Option<Box<dyn ContactListener>> {
        self.listener.take()
    }

    /// Install a contact filter.
    pub fn set_contact_filter(&mut self, filter: Box<dyn ContactFilter>) {
        self.contact_manager.filter = filter;
    }

    /// Shared view of a body.
    #[inline]
    #[must_use]
    pub fn body(&self, id: u32) -> &Body {
        // Safety: outside parallel phases `&self` guarantees no writer;
        // inside them, readers and writers are disjoint per the phase rules.
        unsafe { self.bodies[id as usize].as_ref_unchecked() }
    }

    /// Exclusive access to a body.
    #[inline]
    pub fn body_mut(&mut self, id: u32) -> &mut Body {
        self.bodies[id as usize].get_mut()
    }

    /// Shared view of a fixture.
    #[inline]
    #[must_use]
    pub fn fixture(&self, id: u32) -> &Fixture {
        unsafe { self.fixtures[id as usize].as_ref_unchecked() }
    }

    /// Shared view of a joint.
    #[inline]
    #[must_use]
    pub fn joint(&self, id: u32) -> &Joint {
        unsafe { self.joints[id as usize].as_ref_unchecked() }
    }

    /// Shared view of a contact.
    #[inline]
    #[must_use]
    pub fn contact(&self, id: u32) -> &Contact {
        self.contact_manager.contact(id)
    }

    /// Body ids of every non-static body, in pipeline iteration order.
    #[must_use]
    pub fn non_static_bodies(&self) -> &[u32] {
        &self.non_static_bodies
    }

    pub(crate) fn ptr(&mut self) -> WorldPtr {
        WorldPtr(self)
    }

    /// Worker access to a body.
    ///
    /// # Safety
    /// The caller must own the body under the current phase's disjointness
    /// rule (its island, or its slice of the non-static body array).
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn body_mut_unchecked(&self, id: u32) -> &mut Body {
        self.bodies[id as usize].as_mut_unchecked()
    }

    /// Worker access to a fixture; same contract as [`body_mut_unchecked`].
    ///
    /// [`body_mut_unchecked`]: World::body_mut_unchecked
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn fixture_mut_unchecked(&self, id: u32) -> &mut Fixture {
        self.fixtures[id as usize].as_mut_unchecked()
    }

    /// Worker access to a joint; exclusive to the owning island.
    ///
    /// # Safety
    /// The joint must belong to an island owned by the calling worker.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn joint_mut_unchecked(&self, id: u32) -> &mut Joint {
        self.joints[id as usize].as_mut_unchecked()
    }

    /// The listener, shared for immediate hooks on workers.
    #[inline]
    pub(crate) fn listener_shared(&self) -> Option<&dyn ContactListener> {
        self.listener.as_deref()
    }

    // ------------------------------------------------------------------
    // Bodies
    // ------------------------------------------------------------------

    /// Create a body. Fails while the world is stepping.
    pub fn create_body(&mut self, def: &BodyDef) -> Result<u32, WorldError> {
        if self.is_locked() {
            return Err(WorldError::Locked);
        }

        let body = Body::new(def);
        let id = if let Some(id) = self.body_free.pop() {
            *self.bodies[id as usize].get_mut() = body;
            id
        } else {
            let id = self.bodies.len() as u32;
            self.bodies.push(SyncCell::new(body));
            id
        };

        // World list.
        let old_head = self.body_list;
        self.bodies[id as usize].get_mut().next = old_head;
        if old_head != NULL_INDEX {
            self.bodies[old_head as usize].get_mut().prev = id;
        }
        self.body_list = id;
        self.body_count += 1;

        // Dense iteration arrays.
        if def.body_type == BodyType::Static {
            self.bodies[id as usize].get_mut().world_index = self.static_bodies.len() as u32;
            self.static_bodies.push(id);
        } else {
            self.bodies[id as usize].get_mut().world_index = self.non_static_bodies.len() as u32;
            self.non_static_bodies.push(id);
        }

        Ok(id)
    }

    /// Destroy a body along with its joints, contacts, and fixtures.
    pub fn destroy_body(&mut self, id: u32) -> Result<(), WorldError> {
        if self.is_locked() {
            return Err(WorldError::Locked);
        }
        if id as usize >= self.bodies.len() {
            return Err(WorldError::InvalidBody { index: id });
        }

        // Attached joints.
        let mut edge = self.body(id).joint_list;
        while edge != NULL_INDEX {
            let joint_id = edge_contact(edge);
            edge = self.joint_edge(edge).next;
            self.destroy_joint(joint_id)?;
        }

        // Attached contacts.
        let mut edge = self.body(id).contact_list;
        while edge != NULL_INDEX {
            let contact_id = edge_contact(edge);
            edge = self.contact_edge(edge).next;
            self.destroy_contact(contact_id);
        }

        // Fixtures and their proxies.
        let mut fixture_id = self.body(id).fixture_list;
        while fixture_id != NULL_INDEX {
            let next = self.fixture(fixture_id).next;
            self.destroy_fixture_proxies(fixture_id);
            self.fixture_free.push(fixture_id);
            fixture_id = next;
        }

        // World list.
        let (prev, next) = {
            let body = self.body(id);
            (body.prev, body.next)
        };
        if prev != NULL_INDEX {
            self.bodies[prev as usize].get_mut().next = next;
        }
        if next != NULL_INDEX {
            self.bodies[next as usize].get_mut().prev = prev;
        }
        if self.body_list == id {
            self.body_list = next;
        }

        // Dense array, patching the moved body's index.
        let (body_type, world_index) = {
            let body = self.body(id);
            (body.body_type, body.world_index as usize)
        };
        let array = if body_type == BodyType::Static {
            &mut self.static_bodies
        } else {
            &mut self.non_static_bodies
        };
        array.swap_remove(world_index);
        if world_index < array.len() {
            let moved = array[world_index];
            self.bodies[moved as usize].get_mut().world_index = world_index as u32;
        }

        self.body_count -= 1;
        self.body_free.push(id);
        Ok(())
    }

    /// Teleport a body. Buffers proxy moves so new overlaps are discovered
    /// on the next step.
    pub fn set_transform(&mut self, id: u32, position: Vec2, angle: f32) -> Result<(), WorldError> {
        if self.is_locked() {
            return Err(WorldError::Locked);
        }

        let body = self.bodies[id as usize].get_mut();
        body.xf = Transform::new(position, angle);
        body.sweep.c = body.xf.apply(body.sweep.local_center);
        body.sweep.c0 = body.sweep.c;
        body.sweep.a = angle;
        body.sweep.a0 = angle;

        let xf = body.xf;
        let mut fixture_id = body.fixture_list;
        while fixture_id != NULL_INDEX {
            let fixture = self.fixtures[fixture_id as usize].get_mut();
            let next = fixture.next;
            let shape = fixture.shape.clone();
            for proxy in &mut fixture.proxies {
                let aabb = shape.compute_aabb(&xf, proxy.child_index);
                proxy.aabb = aabb;
                self.contact_manager
                    .broad_phase
                    .move_proxy(proxy.proxy_id, aabb, Vec2::ZERO);
            }
            fixture_id = next;
        }
        Ok(())
    }

    /// Wake a body or put it to sleep.
    pub fn set_awake(&mut self, id: u32, awake: bool) {
        self.body_mut(id).set_awake(awake);
    }

    /// Set or clear the bullet flag, repartitioning the body's contacts.
    pub fn set_bullet(&mut self, id: u32, flag: bool) {
        let body = self.body_mut(id);
        let was = body.is_bullet();
        if was == flag {
            return;
        }
        if flag {
            body.flags |= Body::FLAG_BULLET;
        } else {
            body.flags &= !Body::FLAG_BULLET;
        }
        self.recalculate_toi_candidacy_body(id);
    }

    /// Set or clear the prefer-no-CCD hint, repartitioning the body's
    /// contacts.
    pub fn set_prefer_no_ccd(&mut self, id: u32, flag: bool) {
        let body = self.body_mut(id);
        let was = body.prefer_no_ccd();
        if was == flag {
            return;
        }
        if flag {
            body.flags |= Body::FLAG_PREFER_NO_CCD;
        } else {
            body.flags &= !Body::FLAG_PREFER_NO_CCD;
        }
        self.recalculate_toi_candidacy_body(id);
    }

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    /// Create a fixture on a body. Fails while the world is stepping.
    pub fn create_fixture(&mut self, body_id: u32, def: &FixtureDef) -> Result<u32, WorldError> {
        if self.is_locked() {
            return Err(WorldError::Locked);
        }
        if body_id as usize >= self.bodies.len() {
            return Err(WorldError::InvalidBody { index: body_id });
        }

        let fixture = Fixture::from_def(def, body_id);
        let id = if let Some(id) = self.fixture_free.pop() {
            *self.fixtures[id as usize].get_mut() = fixture;
            id
        } else {
            let id = self.fixtures.len() as u32;
            self.fixtures.push(SyncCell::new(fixture));
            id
        };

        if self.body(body_id).is_active() {
            self.create_fixture_proxies(id);
        }

        // Link into the body's fixture list.
        let body = self.bodies[body_id as usize].get_mut();
        let old_head = body.fixture_list;
        body.fixture_list = id;
        body.fixture_count += 1;
        self.fixtures[id as usize].get_mut().next = old_head;

        if def.density > 0.0 {
            self.reset_mass_data(body_id);
        }

        // New proxies need a pair sweep at the start of the next step.
        self.flags |= Self::FLAG_NEW_FIXTURE;
        Ok(id)
    }

    /// Destroy a fixture, along with any contacts it participates in.
    pub fn destroy_fixture(&mut self, id: u32) -> Result<(), WorldError> {
        if self.is_locked() {
            return Err(WorldError::Locked);
        }
        if id as usize >= self.fixtures.len() {
            return Err(WorldError::InvalidFixture { index: id });
        }
        let body_id = self.fixture(id).body;

        // Destroy contacts referencing this fixture.
        let mut edge = self.body(body_id).contact_list;
        while edge != NULL_INDEX {
            let contact_id = edge_contact(edge);
            edge = self.contact_edge(edge).next;
            let c = self.contact(contact_id);
            if c.fixture_a == id || c.fixture_b == id {
                self.destroy_contact(contact_id);
            }
        }

        self.destroy_fixture_proxies(id);

        // Unlink from the body's fixture list.
        let removed_next = self.fixture(id).next;
        let head = self.body(body_id).fixture_list;
        if head == id {
            self.bodies[body_id as usize].get_mut().fixture_list = removed_next;
        } else {
            let mut cursor = head;
            while cursor != NULL_INDEX {
                let next = self.fixture(cursor).next;
                if next == id {
                    self.fixtures[cursor as usize].get_mut().next = removed_next;
                    break;
                }
                cursor = next;
            }
        }
        self.bodies[body_id as usize].get_mut().fixture_count -= 1;
        self.fixture_free.push(id);

        self.reset_mass_data(body_id);
        Ok(())
    }

    /// Flip the sensor flag, waking the body and repartitioning the
    /// fixture's contacts.
    pub fn set_sensor(&mut self, fixture_id: u32, sensor: bool) {
        if self.fixture(fixture_id).sensor == sensor {
            return;
        }
        let body_id = self.fixture(fixture_id).body;
        self.body_mut(body_id).set_awake(true);
        self.fixtures[fixture_id as usize].get_mut().sensor = sensor;
        self.recalculate_toi_candidacy_fixture(fixture_id);
    }

    /// Replace a fixture's filter data and flag its contacts for
    /// refiltering.
    pub fn set_filter_data(&mut self, fixture_id: u32, filter: crate::filter::FilterData) {
        self.fixtures[fixture_id as usize].get_mut().filter = filter;

        let body_id = self.fixture(fixture_id).body;
        let mut edge = self.body(body_id).contact_list;
        while edge != NULL_INDEX {
            let contact_id = edge_contact(edge);
            edge = self.contact_edge(edge).next;
            let c = self.contact_manager.contact_mut(contact_id);
            if c.fixture_a == fixture_id || c.fixture_b == fixture_id {
                c.flag_for_filtering();
            }
        }

        // Revisit the proxies on the next pair sweep.
        let proxies: Vec<u32> = self
            .fixture(fixture_id)
            .proxies
            .iter()
            .map(|p| p.proxy_id)
            .collect();
        for proxy_id in proxies {
            self.contact_manager.broad_phase.touch_proxy(proxy_id);
        }
        self.flags |= Self::FLAG_NEW_FIXTURE;
    }

    fn create_fixture_proxies(&mut self, fixture_id: u32) {
        let body_id = self.fixture(fixture_id).body;
        let xf = self.body(body_id).xf;
        let fixture = self.fixtures[fixture_id as usize].get_mut();
        let child_count = fixture.shape.child_count();
        let shape = fixture.shape.clone();
        for child_index in 0..child_count {
            let aabb = shape.compute_aabb(&xf, child_index);
            let proxy_id = self.contact_manager.broad_phase.create_proxy(
                aabb,
                crate::broad_phase::ProxyData {
                    fixture: fixture_id,
                    child_index,
                },
            );
            self.fixtures[fixture_id as usize]
                .get_mut()
                .proxies
                .push(FixtureProxy {
                    aabb,
                    proxy_id,
                    child_index,
                });
        }
    }

    fn destroy_fixture_proxies(&mut self, fixture_id: u32) {
        let proxies = core::mem::take(&mut self.fixtures[fixture_id as usize].get_mut().proxies);
        for proxy in proxies {
            self.contact_manager.broad_phase.destroy_proxy(proxy.proxy_id);
        }
    }

    /// Recompute a body's mass, center, and inertia from its fixtures.
    pub fn reset_mass_data(&mut self, body_id: u32) {
        let body_type = self.body(body_id).body_type;
        if body_type != BodyType::Dynamic {
            let body = self.bodies[body_id as usize].get_mut();
            body.mass = 0.0;
            body.inv_mass = 0.0;
            body.inertia = 0.0;
            body.inv_inertia = 0.0;
            body.sweep.local_center = Vec2::ZERO;
            body.sweep.c = body.xf.p;
            body.sweep.c0 = body.xf.p;
            body.sweep.a0 = body.sweep.a;
            return;
        }

        let mut mass = 0.0;
        let mut center = Vec2::ZERO;
        let mut inertia = 0.0;

        let mut fixture_id = self.body(body_id).fixture_list;
        while fixture_id != NULL_INDEX {
            let fixture = self.fixture(fixture_id);
            let next = fixture.next;
            if fixture.density > 0.0 {
                let md = fixture.shape.compute_mass(fixture.density);
                mass += md.mass;
                center += md.mass * md.center;
                inertia += md.inertia;
            }
            fixture_id = next;
        }

        let body = self.bodies[body_id as usize].get_mut();
        if mass > 0.0 {
            body.inv_mass = 1.0 / mass;
            center *= body.inv_mass;
        } else {
            // Dynamic bodies always have at least unit mass.
            mass = 1.0;
            body.inv_mass = 1.0;
        }
        body.mass = mass;

        if inertia > 0.0 && body.flags & Body::FLAG_FIXED_ROTATION == 0 {
            inertia -= mass * center.length_squared();
            debug_assert!(inertia > 0.0);
            body.inertia = inertia;
            body.inv_inertia = 1.0 / inertia;
        } else {
            body.inertia = 0.0;
            body.inv_inertia = 0.0;
        }

        let old_center = body.sweep.c;
        body.sweep.local_center = center;
        body.sweep.c = body.xf.apply(center);
        body.sweep.c0 = body.sweep.c;

        // The center moved; keep the velocity of the new center consistent.
        let delta = body.sweep.c - old_center;
        body.linear_velocity += crate::math::cross_sv(body.angular_velocity, delta);
    }

    // ------------------------------------------------------------------
    // Joints
    // ------------------------------------------------------------------

    /// Create a joint. Fails while the world is stepping.
    pub fn create_joint(&mut self, def: &JointDef) -> Result<u32, WorldError> {
        if self.is_locked() {
            return Err(WorldError::Locked);
        }
        if def.body_a == def.body_b {
            return Err(WorldError::InvalidJointDef {
                reason: "joint connects a body to itself",
            });
        }

        let joint = Joint::new(def);
        let id = if let Some(id) = self.joint_free.pop() {
            *self.joints[id as usize].get_mut() = joint;
            id
        } else {
            let id = self.joints.len() as u32;
            self.joints.push(SyncCell::new(joint));
            id
        };

        // World list.
        let old_head = self.joint_list;
        self.joints[id as usize].get_mut().next = old_head;
        if old_head != NULL_INDEX {
            self.joints[old_head as usize].get_mut().prev = id;
        }
        self.joint_list = id;
        self.joint_count += 1;

        // Edges into both bodies' joint lists.
        self.link_joint_edge(id, 0, def.body_a);
        self.link_joint_edge(id, 1, def.body_b);

        // A non-colliding joint suppresses existing contacts between the
        // bodies at their next narrow-phase update.
        if !def.collide_connected {
            self.flag_contacts_for_filtering(def.body_a, def.body_b);
        }

        Ok(id)
    }

    /// Destroy a joint, waking both bodies.
    pub fn destroy_joint(&mut self, id: u32) -> Result<(), WorldError> {
        if self.is_locked() {
            return Err(WorldError::Locked);
        }
        if id as usize >= self.joints.len() {
            return Err(WorldError::InvalidJoint { index: id });
        }

        let (body_a, body_b, collide_connected, prev, next) = {
            let joint = self.joint(id);
            (
                joint.body_a,
                joint.body_b,
                joint.collide_connected,
                joint.prev,
                joint.next,
            )
        };

        if prev != NULL_INDEX {
            self.joints[prev as usize].get_mut().next = next;
        }
        if next != NULL_INDEX {
            self.joints[next as usize].get_mut().prev = prev;
        }
        if self.joint_list == id {
            self.joint_list = next;
        }

        self.unlink_joint_edge(id, 0, body_a);
        self.unlink_joint_edge(id, 1, body_b);

        self.body_mut(body_a).set_awake(true);
        self.body_mut(body_b).set_awake(true);

        self.joint_count -= 1;
        self.joint_free.push(id);

        if !collide_connected {
            self.flag_contacts_for_filtering(body_a, body_b);
        }
        Ok(())
    }

    fn flag_contacts_for_filtering(&mut self, body_a: u32, body_b: u32) {
        let mut edge = self.body(body_b).contact_list;
        while edge != NULL_INDEX {
            let contact_id = edge_contact(edge);
            edge = self.contact_edge(edge).next;
            let c = self.contact_manager.contact_mut(contact_id);
            if c.other_body(body_b) == body_a {
                c.flag_for_filtering();
            }
        }
    }

    // ------------------------------------------------------------------
    // Edge lists
    // ------------------------------------------------------------------

    fn contact_edge(&self, r: u32) -> crate::contact::ContactEdge {
        let c = self.contact(edge_contact(r));
        if edge_side(r) == 0 {
            c.edge_a
        } else {
            c.edge_b
        }
    }

    fn set_contact_edge(&mut self, r: u32, edge: crate::contact::ContactEdge) {
        let c = self.contact_manager.contact_mut(edge_contact(r));
        if edge_side(r) == 0 {
            c.edge_a = edge;
        } else {
            c.edge_b = edge;
        }
    }

    fn link_contact_edge(&mut self, contact_id: u32, side: u32, body_id: u32) {
        let r = edge_ref(contact_id, side);
        let old_head = self.body(body_id).contact_list;
        self.set_contact_edge(
            r,
            crate::contact::ContactEdge {
                prev: NULL_INDEX,
                next: old_head,
            },
        );
        if old_head != NULL_INDEX {
            let mut head_edge = self.contact_edge(old_head);
            head_edge.prev = r;
            self.set_contact_edge(old_head, head_edge);
        }
        self.bodies[body_id as usize].get_mut().contact_list = r;
    }

    fn unlink_contact_edge(&mut self, contact_id: u32, side: u32, body_id: u32) {
        let r = edge_ref(contact_id, side);
        let edge = self.contact_edge(r);
        if edge.prev != NULL_INDEX {
            let mut prev_edge = self.contact_edge(edge.prev);
            prev_edge.next = edge.next;
            self.set_contact_edge(edge.prev, prev_edge);
        }
        if edge.next != NULL_INDEX {
            let mut next_edge = self.contact_edge(edge.next);
            next_edge.prev = edge.prev;
            self.set_contact_edge(edge.next, next_edge);
        }
        if self.body(body_id).contact_list == r {
            self.bodies[body_id as usize].get_mut().contact_list = edge.next;
        }
    }

    fn joint_edge(&self, r: u32) -> crate::joint::JointEdge {
        let j = self.joint(edge_contact(r));
        if edge_side(r) == 0 {
            j.edge_a
        } else {
            j.edge_b
        }
    }

    fn set_joint_edge(&mut self, r: u32, edge: crate::joint::JointEdge) {
        let j = self.joints[edge_contact(r) as usize].get_mut();
        if edge_side(r) == 0 {
            j.edge_a = edge;
        } else {
            j.edge_b = edge;
        }
    }

    fn link_joint_edge(&mut self, joint_id: u32, side: u32, body_id: u32) {
        let r = edge_ref(joint_id, side);
        let old_head = self.body(body_id).joint_list;
        self.set_joint_edge(
            r,
            crate::joint::JointEdge {
                prev: NULL_INDEX,
                next: old_head,
            },
        );
        if old_head != NULL_INDEX {
            let mut head_edge = self.joint_edge(old_head);
            head_edge.prev = r;
            self.set_joint_edge(old_head, head_edge);
        }
        self.bodies[body_id as usize].get_mut().joint_list = r;
    }

    fn unlink_joint_edge(&mut self, joint_id: u32, side: u32, body_id: u32) {
        let r = edge_ref(joint_id, side);
        let edge = self.joint_edge(r);
        if edge.prev != NULL_INDEX {
            let mut prev_edge = self.joint_edge(edge.prev);
            prev_edge.next = edge.next;
            self.set_joint_edge(edge.prev, prev_edge);
        }
        if edge.next != NULL_INDEX {
            let mut next_edge = self.joint_edge(edge.next);
            next_edge.prev = edge.prev;
            self.set_joint_edge(edge.next, next_edge);
        }
        if self.body(body_id).joint_list == r {
            self.bodies[body_id as usize].get_mut().joint_list = edge.next;
        }
    }

    // ------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------

    /// May these bodies collide at all? Checks body types and joint
    /// overrides.
    fn should_collide_bodies(&self, body_a: u32, body_b: u32) -> bool {
        if !self.body(body_a).should_collide_types(self.body(body_b)) {
            return false;
        }
        let mut edge = self.body(body_b).joint_list;
        while edge != NULL_INDEX {
            let joint = self.joint(edge_contact(edge));
            if joint.other_body(body_b) == body_a && !joint.collide_connected {
                return false;
            }
            edge = self.joint_edge(edge).next;
        }
        true
    }

    /// Validate a broad-phase pair and build its creation record. Returns
    /// `None` for rejected pairs (same body, duplicate, joint- or
    /// filter-suppressed). The record is normalized so fixture A carries
    /// the lower proxy id, making duplicate records from opposite sweep
    /// directions bit-identical.
    pub(crate) fn make_pair(&self, proxy_a: u32, proxy_b: u32) -> Option<DeferredContactCreate> {
        let bp = &self.contact_manager.broad_phase;
        let (proxy_a, proxy_b) = if proxy_a < proxy_b {
            (proxy_a, proxy_b)
        } else {
            (proxy_b, proxy_a)
        };
        let data_a = bp.proxy_data(proxy_a);
        let data_b = bp.proxy_data(proxy_b);

        let fixture_a = self.fixture(data_a.fixture);
        let fixture_b = self.fixture(data_b.fixture);
        let body_a = fixture_a.body;
        let body_b = fixture_b.body;
        if body_a == body_b {
            return None;
        }

        let key = ProxyIdPair::new(proxy_a, proxy_b);

        // Does a contact already exist for this pair?
        let mut edge = self.body(body_b).contact_list;
        while edge != NULL_INDEX {
            let c = self.contact(edge_contact(edge));
            if c.other_body(body_b) == body_a && c.proxy_ids == key {
                return None;
            }
            edge = self.contact_edge(edge).next;
        }

        if !self.should_collide_bodies(body_a, body_b) {
            return None;
        }
        if !self.contact_manager.filter.should_collide(fixture_a, fixture_b) {
            return None;
        }

        Some(DeferredContactCreate {
            fixture_a: data_a.fixture,
            child_a: data_a.child_index,
            fixture_b: data_b.fixture,
            child_b: data_b.child_index,
            key,
        })
    }

    /// Create a contact from a validated pair record and wire it up.
    pub(crate) fn create_contact(&mut self, rec: &DeferredContactCreate) -> u32 {
        let (friction, restitution, body_a, body_b) = {
            let fa = self.fixture(rec.fixture_a);
            let fb = self.fixture(rec.fixture_b);
            (
                (fa.friction, fb.friction),
                (fa.restitution, fb.restitution),
                fa.body,
                fb.body,
            )
        };
        let contact = Contact::new(
            rec.fixture_a,
            rec.child_a,
            body_a,
            rec.fixture_b,
            rec.child_b,
            body_b,
            rec.key,
            friction,
            restitution,
        );
        let id = self.contact_manager.alloc_contact(contact);
        self.on_contact_create(id);
        id
    }

    /// Wire a freshly created contact into the world: TOI candidacy, the
    /// world list, both bodies' edge lists, and the partitioned order
    /// array. Non-sensor contacts wake both bodies.
    fn on_contact_create(&mut self, id: u32) {
        let (body_a, body_b, sensor) = {
            let c = self.contact(id);
            let sensor =
                self.fixture(c.fixture_a).sensor || self.fixture(c.fixture_b).sensor;
            (c.body_a, c.body_b, sensor)
        };

        if self.contact_should_be_toi_candidate(id) {
            self.contact_manager.contact_mut(id).flags |= Contact::FLAG_TOI_CANDIDATE;
        }

        // World contact list.
        let old_head = self.contact_manager.contact_list;
        self.contact_manager.contact_mut(id).next = old_head;
        if old_head != NULL_INDEX {
            self.contact_manager.contact_mut(old_head).prev = id;
        }
        self.contact_manager.contact_list = id;

        self.link_contact_edge(id, 0, body_a);
        self.link_contact_edge(id, 1, body_b);

        if !sensor {
            self.body_mut(body_a).set_awake(true);
            self.body_mut(body_b).set_awake(true);
        }

        self.contact_manager.push_contact_order(id);
    }

    /// Destroy a contact, emitting a final end event when it was touching.
    pub(crate) fn destroy_contact(&mut self, id: u32) {
        if self.contact(id).is_touching() {
            if let Some(mut listener) = self.listener.take() {
                listener.end_contact(self, id);
                self.listener = Some(listener);
            }
        }

        let (body_a, body_b, prev, next) = {
            let c = self.contact(id);
            (c.body_a, c.body_b, c.prev, c.next)
        };

        if prev != NULL_INDEX {
            self.contact_manager.contact_mut(prev).next = next;
        }
        if next != NULL_INDEX {
            self.contact_manager.contact_mut(next).prev = prev;
        }
        if self.contact_manager.contact_list == id {
            self.contact_manager.contact_list = next;
        }

        self.unlink_contact_edge(id, 0, body_a);
        self.unlink_contact_edge(id, 1, body_b);

        self.contact_manager.remove_contact_order(id);
        self.contact_manager.free_contact(id);
    }

    // ------------------------------------------------------------------
    // TOI candidacy
    // ------------------------------------------------------------------

    /// The candidacy rule: no sensors, and either body is a bullet or is
    /// non-dynamic without the prefer-no-CCD opt-out.
    fn contact_should_be_toi_candidate(&self, id: u32) -> bool {
        let c = self.contact(id);
        if self.fixture(c.fixture_a).sensor || self.fixture(c.fixture_b).sensor {
            return false;
        }
        let body_a = self.body(c.body_a);
        let body_b = self.body(c.body_b);
        let a_needs = body_a.is_bullet()
            || (body_a.body_type != BodyType::Dynamic && !body_a.prefer_no_ccd());
        let b_needs = body_b.is_bullet()
            || (body_b.body_type != BodyType::Dynamic && !body_b.prefer_no_ccd());
        a_needs || b_needs
    }

    /// Recompute one contact's candidacy and repartition if it changed.
    /// Idempotent when the underlying flags have not changed.
    pub fn recalculate_toi_candidacy_contact(&mut self, id: u32) {
        let want = self.contact_should_be_toi_candidate(id);
        let is = self.contact(id).is_toi_candidate();
        if want == is {
            return;
        }
        let c = self.contact_manager.contact_mut(id);
        if want {
            c.flags |= Contact::FLAG_TOI_CANDIDATE;
        } else {
            c.flags &= !Contact::FLAG_TOI_CANDIDATE;
        }
        self.contact_manager.change_candidacy(id);
    }

    /// Recompute candidacy for every contact on a body.
    pub fn recalculate_toi_candidacy_body(&mut self, body_id: u32) {
        let mut edge = self.body(body_id).contact_list;
        while edge != NULL_INDEX {
            let contact_id = edge_contact(edge);
            edge = self.contact_edge(edge).next;
            self.recalculate_toi_candidacy_contact(contact_id);
        }
    }

    /// Recompute candidacy for every contact on a fixture.
    pub fn recalculate_toi_candidacy_fixture(&mut self, fixture_id: u32) {
        let body_id = self.fixture(fixture_id).body;
        let mut edge = self.body(body_id).contact_list;
        while edge != NULL_INDEX {
            let contact_id = edge_contact(edge);
            edge = self.contact_edge(edge).next;
            let c = self.contact(contact_id);
            if c.fixture_a == fixture_id || c.fixture_b == fixture_id {
                self.recalculate_toi_candidacy_contact(contact_id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Report every fixture whose fat AABB overlaps `aabb`. The callback
    /// returns `false` to terminate the query.
    pub fn query_aabb(&self, aabb: &Aabb, mut callback: impl FnMut(u32) -> bool) {
        self.contact_manager.broad_phase.query(aabb, |proxy_id| {
            let data = self.contact_manager.broad_phase.proxy_data(proxy_id);
            callback(data.fixture)
        });
    }

    /// Cast a ray from `point1` to `point2`. For each fixture hit the
    /// callback receives `(fixture, point, normal, fraction)` and returns
    /// the new maximum fraction: 0 terminates, -1 ignores the hit, the
    /// fraction clips the ray, 1 continues unclipped.
    pub fn ray_cast(
        &self,
        point1: Vec2,
        point2: Vec2,
        mut callback: impl FnMut(u32, Vec2, Vec2, f32) -> f32,
    ) {
        let input = RayCastInput {
            p1: point1,
            p2: point2,
            max_fraction: 1.0,
        };
        self.contact_manager
            .broad_phase
            .ray_cast(&input, |sub_input, proxy_id| {
                let data = self.contact_manager.broad_phase.proxy_data(proxy_id);
                let fixture = self.fixture(data.fixture);
                let body = self.body(fixture.body);
                match fixture.shape.ray_cast(sub_input, &body.xf, data.child_index) {
                    Some(out) => {
                        let point = (1.0 - out.fraction) * sub_input.p1
                            + out.fraction * sub_input.p2;
                        let value = callback(data.fixture, point, out.normal, out.fraction);
                        if value < 0.0 {
                            sub_input.max_fraction
                        } else {
                            value
                        }
                    }
                    None => sub_input.max_fraction,
                }
            });
    }

    /// Zero accumulated forces on every body.
    pub fn clear_forces(&mut self) {
        let mut id = self.body_list;
        while id != NULL_INDEX {
            let body = self.bodies[id as usize].get_mut();
            body.force = Vec2::ZERO;
            body.torque = 0.0;
            id = body.next;
        }
    }

    // ------------------------------------------------------------------
    // The step
    // ------------------------------------------------------------------

    /// Advance the simulation by `dt` seconds.
    pub fn step(
        &mut self,
        dt: f32,
        velocity_iterations: u32,
        position_iterations: u32,
        executor: &mut dyn TaskExecutor,
    ) {
        executor.step_begin();
        let thread_count = executor.thread_count();
        self.contact_manager.ensure_thread_count(thread_count);

        let step_timer = Timer::start();
        self.profile.reset();
        for t in 0..thread_count {
            self.contact_manager.per_thread_mut(t).profile.reset();
        }

        let group = executor.create_task_group();

        // If new fixtures were added, find their contacts before colliding.
        if self.flags & Self::FLAG_NEW_FIXTURE != 0 {
            let timer = Timer::start();
            self.find_new_contacts_phase(executor, group, thread_count);
            let elapsed = timer.elapsed_ms();
            self.profile.broad_phase += elapsed;
            self.profile.broad_phase_find_contacts += elapsed;
            self.flags &= !Self::FLAG_NEW_FIXTURE;
        }

        self.flags |= Self::FLAG_LOCKED;

        {
            let timer = Timer::start();
            self.collide_phase(executor, group, thread_count);
            self.profile.collide = timer.elapsed_ms();
        }

        let step = TimeStep {
            dt,
            inv_dt: if dt > 0.0 { 1.0 / dt } else { 0.0 },
            dt_ratio: self.inv_dt0 * dt,
            velocity_iterations,
            position_iterations,
            warm_starting: self.warm_starting,
        };

        if self.step_complete && step.dt > 0.0 {
            let timer = Timer::start();
            self.solve(executor, group, step, thread_count);
            self.profile.solve += timer.elapsed_ms();
        }

        if self.continuous_physics && step.dt > 0.0 {
            let timer = Timer::start();
            self.solve_toi(executor, group, &step);
            self.profile.solve_toi += timer.elapsed_ms();
        }

        if step.dt > 0.0 {
            self.inv_dt0 = step.inv_dt;
        }

        // Island flags are clear between steps. The TOI init already
        // scrubbed bodies and contacts when continuous physics ran; joints
        // are few and cleared here either way.
        if step.dt > 0.0 {
            if !self.continuous_physics {
                for i in 0..self.non_static_bodies.len() {
                    let id = self.non_static_bodies[i];
                    self.bodies[id as usize].get_mut().flags &= !Body::FLAG_ISLAND;
                }
                for i in 0..self.contact_manager.order.len() {
                    let id = self.contact_manager.order[i];
                    self.contact_manager.contact_mut(id).flags &= !Contact::FLAG_ISLAND;
                }
            }
            let mut id = self.joint_list;
            while id != NULL_INDEX {
                let joint = self.joints[id as usize].get_mut();
                joint.island_flag = false;
                id = joint.next;
            }
        }

        if self.flags & Self::FLAG_CLEAR_FORCES != 0 {
            self.clear_forces();
        }

        self.flags &= !Self::FLAG_LOCKED;

        executor.destroy_task_group(group);

        // Fold per-thread solver timers into the step profile.
        for t in 0..thread_count {
            let td_profile = self.contact_manager.per_thread_mut(t).profile;
            self.profile.accumulate(&td_profile);
        }

        self.profile.step = step_timer.elapsed_ms();
        let profile = self.profile;
        executor.step_end(&profile);
    }

    fn submit_range_tasks(
        &mut self,
        executor: &mut dyn TaskExecutor,
        group: TaskGroupId,
        begin: u32,
        end: u32,
        make: impl Fn(Range) -> TaskKind,
    ) {
        let mut ranges = PartitionedRange::default();
        executor.partition_range(begin, end, &mut ranges);
        let world = self.ptr();
        let mut tasks = [StepTask {
            world,
            kind: TaskKind::ResetBodyFlags(Range::default()),
            cost: 0,
        }; crate::settings::PARTITION_RANGE_MAX_OUTPUT];
        for i in 0..ranges.count as usize {
            tasks[i] = StepTask {
                world,
                kind: make(ranges[i]),
                cost: ranges[i].len(),
            };
        }
        executor.submit_tasks(group, &tasks[..ranges.count as usize]);
    }

    fn submit_sort_tasks(
        &mut self,
        executor: &mut dyn TaskExecutor,
        group: TaskGroupId,
        thread_count: u32,
        set: SortSet,
    ) {
        let world = self.ptr();
        let mut tasks = Vec::with_capacity(thread_count as usize);
        for thread in 0..thread_count {
            tasks.push(StepTask {
                world,
                kind: TaskKind::SortBuffers { thread, set },
                cost: 1,
            });
        }
        executor.submit_tasks(group, &tasks);
    }

    /// Parallel pair sweep over the move buffer, then a deterministic merge
    /// of the deferred creations.
    fn find_new_contacts_phase(
        &mut self,
        executor: &mut dyn TaskExecutor,
        group: TaskGroupId,
        thread_count: u32,
    ) {
        let move_count = self.contact_manager.broad_phase.move_count();
        if move_count == 0 {
            return;
        }

        self.contact_manager.defer_creates = true;
        self.submit_range_tasks(executor, group, 0, move_count, TaskKind::FindNewContacts);
        executor.wait(group, &MAIN_THREAD_CTX);
        self.contact_manager.defer_creates = false;

        self.submit_sort_tasks(executor, group, thread_count, SortSet::Creates);
        executor.wait(group, &MAIN_THREAD_CTX);

        self.contact_manager.broad_phase.reset_buffers();
        self.consume_deferred_creates(thread_count);
    }

    /// Parallel narrow phase over the contact order array, then the event
    /// merges in the order: awakes, begins, ends, pre-solves, destroys.
    fn collide_phase(
        &mut self,
        executor: &mut dyn TaskExecutor,
        group: TaskGroupId,
        thread_count: u32,
    ) {
        let contact_count = self.contact_manager.order.len() as u32;
        if contact_count == 0 {
            return;
        }

        self.submit_range_tasks(executor, group, 0, contact_count, TaskKind::Collide);
        executor.wait(group, &MAIN_THREAD_CTX);

        self.submit_sort_tasks(executor, group, thread_count, SortSet::Collides);
        executor.wait(group, &MAIN_THREAD_CTX);

        self.consume_deferred_awakes(thread_count);
        self.consume_deferred_begin_contacts(thread_count);
        self.consume_deferred_end_contacts(thread_count);
        self.consume_deferred_pre_solves(thread_count);
        self.consume_deferred_destroys(thread_count);
    }

    /// Parallel swept-AABB generation, then the proxy-move merge.
    fn synchronize_fixtures_phase(
        &mut self,
        executor: &mut dyn TaskExecutor,
        group: TaskGroupId,
        thread_count: u32,
    ) {
        let body_count = self.non_static_bodies.len() as u32;
        if body_count == 0 {
            return;
        }

        self.submit_range_tasks(executor, group, 0, body_count, TaskKind::GenerateMoveProxies);
        executor.wait(group, &MAIN_THREAD_CTX);

        self.submit_sort_tasks(executor, group, thread_count, SortSet::Moves);
        executor.wait(group, &MAIN_THREAD_CTX);

        self.consume_deferred_move_proxies(thread_count);
    }

    /// Clear island/TOI bookkeeping flags in parallel before a solve.
    fn submit_flag_resets(&mut self, executor: &mut dyn TaskExecutor, group: TaskGroupId) {
        let toi_count = self.contact_manager.toi_count;
        let total = self.contact_manager.order.len() as u32;
        if total > toi_count {
            self.submit_range_tasks(executor, group, toi_count, total, |range| {
                TaskKind::ResetContactFlags { range, toi: false }
            });
        }
        if toi_count > 0 {
            self.submit_range_tasks(executor, group, 0, toi_count, |range| {
                TaskKind::ResetContactFlags { range, toi: true }
            });
        }
        if !self.non_static_bodies.is_empty() {
            let count = self.non_static_bodies.len() as u32;
            self.submit_range_tasks(executor, group, 0, count, TaskKind::ResetBodyFlags);
        }
    }

    fn solve_init(&mut self, executor: &mut dyn TaskExecutor, group: TaskGroupId) {
        self.submit_flag_resets(executor, group);

        // Joint flags are few; clear them on the user thread.
        let mut id = self.joint_list;
        while id != NULL_INDEX {
            let joint = self.joints[id as usize].get_mut();
            joint.island_flag = false;
            id = joint.next;
        }

        executor.wait(group, &MAIN_THREAD_CTX);
    }

    fn solve_toi_init(&mut self, executor: &mut dyn TaskExecutor, group: TaskGroupId) {
        self.submit_flag_resets(executor, group);

        for i in 0..self.static_bodies.len() {
            let id = self.static_bodies[i];
            let body = self.bodies[id as usize].get_mut();
            body.flags &= !Body::FLAG_ISLAND;
            body.sweep.alpha0 = 0.0;
        }

        executor.wait(group, &MAIN_THREAD_CTX);
    }

    /// The discrete solve phase: serial island traversal batching islands
    /// into solve tasks, parallel solving, post-solve merge, fixture
    /// synchronization, and a pair sweep.
    fn solve(
        &mut self,
        executor: &mut dyn TaskExecutor,
        group: TaskGroupId,
        step: TimeStep,
        thread_count: u32,
    ) {
        self.current_step = step;
        self.solve_batches.clear();
        self.solve_init(executor, group);

        let traversal_timer = Timer::start();

        // Depth-first traversal of the constraint graph, seeded at every
        // unvisited awake non-static body. Islands do not propagate across
        // static bodies; a static body re-enters later islands because its
        // flag is cleared after each island completes.
        let mut stack: Vec<u32> = Vec::with_capacity(self.body_count as usize);
        let mut batch: Option<Box<SolveBatch>> = None;

        for i in 0..self.non_static_bodies.len() {
            let seed_id = self.non_static_bodies[i];
            {
                let seed = self.body(seed_id);
                if seed.flags & Body::FLAG_ISLAND != 0 {
                    continue;
                }
                if !seed.is_awake() || !seed.is_active() {
                    continue;
                }
            }

            let mut island = IslandDesc::default();
            stack.clear();
            stack.push(seed_id);
            self.body_mut(seed_id).flags |= Body::FLAG_ISLAND;

            while let Some(body_id) = stack.pop() {
                island.bodies.push(body_id);

                if self.body(body_id).body_type == BodyType::Static {
                    continue;
                }

                // Contact edges.
                let mut edge = self.body(body_id).contact_list;
                while edge != NULL_INDEX {
                    let contact_id = edge_contact(edge);
                    let next = self.contact_edge(edge).next;
                    edge = next;

                    let (skip, other) = {
                        let c = self.contact(contact_id);
                        let sensor = self.fixture(c.fixture_a).sensor
                            || self.fixture(c.fixture_b).sensor;
                        let skip = c.flags & Contact::FLAG_ISLAND != 0
                            || !c.is_enabled()
                            || !c.is_touching()
                            || sensor;
                        (skip, c.other_body(body_id))
                    };
                    if skip {
                        continue;
                    }

                    island.contacts.push(contact_id);
                    self.contact_manager.contact_mut(contact_id).flags |= Contact::FLAG_ISLAND;

                    if self.body(other).flags & Body::FLAG_ISLAND != 0 {
                        continue;
                    }
                    stack.push(other);
                    self.body_mut(other).flags |= Body::FLAG_ISLAND;
                }

                // Joint edges.
                let mut edge = self.body(body_id).joint_list;
                while edge != NULL_INDEX {
                    let joint_id = edge_contact(edge);
                    let next = self.joint_edge(edge).next;
                    edge = next;

                    let (skip, other) = {
                        let j = self.joint(joint_id);
                        let other = j.other_body(body_id);
                        (j.island_flag || !self.body(other).is_active(), other)
                    };
                    if skip {
                        continue;
                    }

                    island.joints.push(joint_id);
                    self.joints[joint_id as usize].get_mut().island_flag = true;

                    if self.body(other).flags & Body::FLAG_ISLAND != 0 {
                        continue;
                    }
                    stack.push(other);
                    self.body_mut(other).flags |= Body::FLAG_ISLAND;
                }
            }

            // Let static bodies participate in later islands.
            for j in 0..island.bodies.len() {
                let body_id = island.bodies[j];
                if self.body(body_id).body_type == BodyType::Static {
                    self.body_mut(body_id).flags &= !Body::FLAG_ISLAND;
                }
            }

            let current = batch.get_or_insert_with(Box::default);
            current.add_island(island);

            if current.cost >= SOLVE_BATCH_TARGET_COST
                || current.body_count >= SOLVE_BATCH_TARGET_BODY_COUNT
            {
                let full = batch.take().unwrap();
                self.submit_solve_batch(executor, group, full);
            }
        }

        if let Some(last) = batch.take() {
            self.submit_solve_batch(executor, group, last);
        }

        self.profile.solve_traversal += traversal_timer.elapsed_ms();

        executor.wait(group, &MAIN_THREAD_CTX);

        // Sort post-solves while the batches are torn down.
        self.submit_sort_tasks(executor, group, thread_count, SortSet::PostSolves);
        self.solve_batches.clear();
        executor.wait(group, &MAIN_THREAD_CTX);

        self.consume_deferred_post_solves(thread_count);

        {
            let timer = Timer::start();
            self.synchronize_fixtures_phase(executor, group, thread_count);
            self.profile.broad_phase_sync_fixtures += timer.elapsed_ms();

            {
                let timer2 = Timer::start();
                self.find_new_contacts_phase(executor, group, thread_count);
                self.profile.broad_phase_find_contacts += timer2.elapsed_ms();
            }

            let broad_phase_time = timer.elapsed_ms();
            self.profile.broad_phase += broad_phase_time;
            self.profile.solve -= broad_phase_time;
        }
    }

    fn submit_solve_batch(
        &mut self,
        executor: &mut dyn TaskExecutor,
        group: TaskGroupId,
        batch: Box<SolveBatch>,
    ) {
        let cost = batch.cost;
        let handle = SolveHandle(&*batch as *const SolveBatch);
        self.solve_batches.push(batch);
        let task = StepTask {
            world: self.ptr(),
            kind: TaskKind::Solve { batch: handle },
            cost,
        };
        executor.submit_task(group, task);
    }

    // ------------------------------------------------------------------
    // Continuous collision
    // ------------------------------------------------------------------

    /// The serial TOI loop over the candidate prefix. Single-threaded by
    /// design: impacts are globally ordered by alpha and the prefix is
    /// short.
    fn solve_toi(
        &mut self,
        executor: &mut dyn TaskExecutor,
        group: TaskGroupId,
        step: &TimeStep,
    ) {
        if self.step_complete {
            self.solve_toi_init(executor, group);
        }

        loop {
            // Find the earliest impact among the TOI candidates.
            let mut min_contact = NULL_INDEX;
            let mut min_alpha = 1.0f32;
            let mut min_key = ProxyIdPair {
                low: u32::MAX,
                high: u32::MAX,
            };

            for i in 0..self.contact_manager.toi_count {
                let contact_id = self.contact_manager.order[i as usize];
                let (enabled, sub_stepped, cached, key) = {
                    let c = self.contact(contact_id);
                    (
                        c.is_enabled(),
                        c.toi_count > MAX_SUB_STEPS,
                        c.flags & Contact::FLAG_TOI != 0,
                        c.proxy_ids,
                    )
                };
                if !enabled || sub_stepped {
                    continue;
                }

                let alpha = if cached {
                    self.contact(contact_id).toi
                } else {
                    let Some(alpha) = self.compute_contact_toi(contact_id) else {
                        continue;
                    };
                    alpha
                };

                // Globally ordered by (alpha, low, high) — never by clock.
                if alpha < min_alpha || (alpha == min_alpha && key < min_key) {
                    min_contact = contact_id;
                    min_alpha = alpha;
                    min_key = key;
                }
            }

            if min_contact == NULL_INDEX || min_alpha > 1.0 - 10.0 * f32::EPSILON {
                // No more impacts this step.
                self.step_complete = true;
                break;
            }

            // Advance the impacting bodies to the impact time.
            let (body_a, body_b) = {
                let c = self.contact(min_contact);
                (c.body_a, c.body_b)
            };
            let backup_a = self.body(body_a).sweep;
            let backup_b = self.body(body_b).sweep;
            self.body_mut(body_a).advance(min_alpha);
            self.body_mut(body_b).advance(min_alpha);

            // Refresh the contact at the impact pose.
            self.update_contact_serial(min_contact);
            {
                let c = self.contact_manager.contact_mut(min_contact);
                c.flags &= !Contact::FLAG_TOI;
                c.toi_count += 1;
            }

            if !self.contact(min_contact).is_enabled() || !self.contact(min_contact).is_touching()
            {
                // Grazing or listener-rejected impact: roll back to the
                // end-of-step poses.
                self.contact_manager
                    .contact_mut(min_contact)
                    .set_enabled(false);
                self.body_mut(body_a).sweep = backup_a;
                self.body_mut(body_b).sweep = backup_b;
                self.body_mut(body_a).synchronize_transform();
                self.body_mut(body_b).synchronize_transform();
                continue;
            }

            self.body_mut(body_a).set_awake(true);
            self.body_mut(body_b).set_awake(true);

            // Grow a small island around the impact by BFS over contact
            // edges, capped by the TOI island limits.
            let mut island = IslandDesc::default();
            island.bodies.push(body_a);
            island.bodies.push(body_b);
            island.contacts.push(min_contact);
            self.body_mut(body_a).flags |= Body::FLAG_ISLAND;
            self.body_mut(body_b).flags |= Body::FLAG_ISLAND;
            self.contact_manager.contact_mut(min_contact).flags |= Contact::FLAG_ISLAND;

            let body_capacity = 2 * MAX_TOI_CONTACTS;
            for &seed in &[body_a, body_b] {
                if self.body(seed).body_type != BodyType::Dynamic {
                    continue;
                }
                let mut edge = self.body(seed).contact_list;
                while edge != NULL_INDEX {
                    if island.bodies.len() == body_capacity
                        || island.contacts.len() == MAX_TOI_CONTACTS
                    {
                        break;
                    }

                    let contact_id = edge_contact(edge);
                    edge = self.contact_edge(edge).next;

                    let (skip, other) = {
                        let c = self.contact(contact_id);
                        let other = c.other_body(seed);
                        let sensor = self.fixture(c.fixture_a).sensor
                            || self.fixture(c.fixture_b).sensor;
                        let mut skip = c.flags & Contact::FLAG_ISLAND != 0 || sensor;
                        // Only bullets pick up dynamic neighbors.
                        if self.body(other).body_type == BodyType::Dynamic
                            && !self.body(seed).is_bullet()
                            && !self.body(other).is_bullet()
                        {
                            skip = true;
                        }
                        (skip, other)
                    };
                    if skip {
                        continue;
                    }

                    // Tentatively advance the neighbor to the impact time.
                    let backup = self.body(other).sweep;
                    if self.body(other).flags & Body::FLAG_ISLAND == 0 {
                        self.body_mut(other).advance(min_alpha);
                    }
                    self.update_contact_serial(contact_id);

                    let reject = !self.contact(contact_id).is_enabled()
                        || !self.contact(contact_id).is_touching();
                    if reject {
                        let body = self.body_mut(other);
                        body.sweep = backup;
                        body.synchronize_transform();
                        continue;
                    }

                    self.contact_manager.contact_mut(contact_id).flags |= Contact::FLAG_ISLAND;
                    island.contacts.push(contact_id);

                    if self.body(other).flags & Body::FLAG_ISLAND != 0 {
                        continue;
                    }
                    self.body_mut(other).flags |= Body::FLAG_ISLAND;
                    if self.body(other).body_type != BodyType::Static {
                        self.body_mut(other).set_awake(true);
                    }
                    island.bodies.push(other);
                }
            }

            // Sub-step over the remainder of the step, warm starting off.
            let dt = (1.0 - min_alpha) * step.dt;
            let sub_step = TimeStep {
                dt,
                inv_dt: if dt > 0.0 { 1.0 / dt } else { 0.0 },
                dt_ratio: 1.0,
                velocity_iterations: step.velocity_iterations,
                position_iterations: 20,
                warm_starting: false,
            };
            solve_toi_island(self, &island, &sub_step, body_a, body_b);

            // Reset island flags, push displaced proxies into the
            // broad-phase, and invalidate cached TOIs against the moved
            // bodies.
            for j in 0..island.bodies.len() {
                let id = island.bodies[j];
                self.body_mut(id).flags &= !Body::FLAG_ISLAND;
                if self.body(id).body_type != BodyType::Dynamic {
                    continue;
                }

                self.synchronize_fixtures_serial(id);

                let mut edge = self.body(id).contact_list;
                while edge != NULL_INDEX {
                    let contact_id = edge_contact(edge);
                    edge = self.contact_edge(edge).next;
                    self.contact_manager.contact_mut(contact_id).flags &=
                        !(Contact::FLAG_TOI | Contact::FLAG_ISLAND);
                }
            }

            // Commit the moves so new contacts are created and stale ones
            // destroyed before the next impact search.
            self.find_new_contacts_serial();
            self.contact_manager.broad_phase.reset_buffers();

            if self.sub_stepping {
                self.step_complete = false;
                break;
            }
        }
    }

    /// Compute and cache a contact's impact time. Returns `None` when the
    /// contact cannot impact this step (sensor, inactive pair).
    fn compute_contact_toi(&mut self, contact_id: u32) -> Option<f32> {
        let (fixture_a, fixture_b, child_a, child_b, body_a, body_b) = {
            let c = self.contact(contact_id);
            (
                c.fixture_a, c.fixture_b, c.child_a, c.child_b, c.body_a, c.body_b,
            )
        };

        if self.fixture(fixture_a).sensor || self.fixture(fixture_b).sensor {
            return None;
        }

        let active_a = {
            let b = self.body(body_a);
            b.is_awake() && b.body_type != BodyType::Static
        };
        let active_b = {
            let b = self.body(body_b);
            b.is_awake() && b.body_type != BodyType::Static
        };
        if !active_a && !active_b {
            return None;
        }

        // Put both sweeps on the same interval by advancing the earlier one.
        let alpha0 = {
            let a0_a = self.body(body_a).sweep.alpha0;
            let a0_b = self.body(body_b).sweep.alpha0;
            if a0_a < a0_b {
                self.body_mut(body_a).sweep.advance(a0_b);
                a0_b
            } else if a0_b < a0_a {
                self.body_mut(body_b).sweep.advance(a0_a);
                a0_a
            } else {
                a0_a
            }
        };
        debug_assert!(alpha0 < 1.0);

        let proxy_a = DistanceProxy::new(&self.fixture(fixture_a).shape, child_a);
        let proxy_b = DistanceProxy::new(&self.fixture(fixture_b).shape, child_b);
        let output = time_of_impact(&ToiInput {
            proxy_a: &proxy_a,
            proxy_b: &proxy_b,
            sweep_a: self.body(body_a).sweep,
            sweep_b: self.body(body_b).sweep,
            t_max: 1.0,
        });

        // Map the fraction of the remaining interval back into step time.
        let beta = output.t;
        let alpha = if output.state == ToiState::Touching {
            (alpha0 + (1.0 - alpha0) * beta).min(1.0)
        } else {
            1.0
        };

        let c = self.contact_manager.contact_mut(contact_id);
        c.toi = alpha;
        c.flags |= Contact::FLAG_TOI;
        Some(alpha)
    }

    /// Serial narrow-phase refresh of one contact, dispatching listener
    /// events synchronously. Used by the TOI loop.
    fn update_contact_serial(&mut self, contact_id: u32) {
        let outcome = {
            // Safety: serial phase; `&mut self` means no concurrent access.
            let contact = unsafe { self.contact_manager.contact_mut_unchecked(contact_id) };
            self.update_contact_manifold(contact)
        };

        if outcome.touching_changed {
            let (body_a, body_b) = {
                let c = self.contact(contact_id);
                (c.body_a, c.body_b)
            };
            self.body_mut(body_a).set_awake(true);
            self.body_mut(body_b).set_awake(true);
        }

        if self.listener.is_none() {
            return;
        }

        if outcome.began {
            let deferred = {
                let listener = self.listener.as_deref().unwrap();
                let contact = unsafe { self.contact_manager.contact_mut_unchecked(contact_id) };
                listener.begin_contact_immediate(contact, 0)
            };
            if deferred == ImmediateResult::CallDeferred {
                let mut listener = self.listener.take().unwrap();
                listener.begin_contact(self, contact_id);
                self.listener = Some(listener);
            }
        }
        if outcome.ended {
            let deferred = {
                let listener = self.listener.as_deref().unwrap();
                let contact = unsafe { self.contact_manager.contact_mut_unchecked(contact_id) };
                listener.end_contact_immediate(contact, 0)
            };
            if deferred == ImmediateResult::CallDeferred {
                let mut listener = self.listener.take().unwrap();
                listener.end_contact(self, contact_id);
                self.listener = Some(listener);
            }
        }
        if outcome.solid_touch {
            let deferred = {
                let listener = self.listener.as_deref().unwrap();
                let contact = unsafe { self.contact_manager.contact_mut_unchecked(contact_id) };
                listener.pre_solve_immediate(contact, &outcome.old_manifold, 0)
            };
            if deferred == ImmediateResult::CallDeferred {
                let mut listener = self.listener.take().unwrap();
                listener.pre_solve(self, contact_id, &outcome.old_manifold);
                self.listener = Some(listener);
            }
        }
    }

    /// Shared manifold-update core used by both the parallel collide phase
    /// and the serial TOI refresh.
    fn update_contact_manifold(&self, contact: &mut Contact) -> ContactUpdateOutcome {
        let old_manifold = contact.manifold;
        contact.flags |= Contact::FLAG_ENABLED;

        let fixture_a = self.fixture(contact.fixture_a);
        let fixture_b = self.fixture(contact.fixture_b);
        let sensor = fixture_a.sensor || fixture_b.sensor;

        let xf_a = self.body(contact.body_a).xf;
        let xf_b = self.body(contact.body_b).xf;

        let was_touching = contact.is_touching();
        let touching = if sensor {
            contact.manifold.point_count = 0;
            test_overlap(
                &fixture_a.shape,
                contact.child_a,
                &xf_a,
                &fixture_b.shape,
                contact.child_b,
                &xf_b,
            )
        } else {
            contact.evaluate_manifold(&fixture_a.shape, &xf_a, &fixture_b.shape, &xf_b);
            contact.manifold.point_count > 0
        };

        if touching {
            contact.flags |= Contact::FLAG_TOUCHING;
        } else {
            contact.flags &= !Contact::FLAG_TOUCHING;
        }

        ContactUpdateOutcome {
            old_manifold,
            touching_changed: touching != was_touching,
            began: touching && !was_touching,
            ended: !touching && was_touching,
            solid_touch: touching && !sensor,
        }
    }

    fn synchronize_fixtures_serial(&mut self, body_id: u32) {
        let (xf1, xf2) = {
            let body = self.body(body_id);
            let q = crate::math::Rot::new(body.sweep.a0);
            let xf1 = Transform {
                p: body.sweep.c0 - q.apply(body.sweep.local_center),
                q,
            };
            (xf1, body.xf)
        };

        let mut fixture_id = self.body(body_id).fixture_list;
        while fixture_id != NULL_INDEX {
            let (next, moves) = {
                let fixture = self.fixtures[fixture_id as usize].get_mut();
                let shape = fixture.shape.clone();
                let mut moves = Vec::with_capacity(fixture.proxies.len());
                for proxy in &mut fixture.proxies {
                    let aabb1 = shape.compute_aabb(&xf1, proxy.child_index);
                    let aabb2 = shape.compute_aabb(&xf2, proxy.child_index);
                    proxy.aabb = Aabb::combine(&aabb1, &aabb2);
                    moves.push((proxy.proxy_id, proxy.aabb, xf2.p - xf1.p));
                }
                (fixture.next, moves)
            };
            for (proxy_id, aabb, displacement) in moves {
                self.contact_manager
                    .broad_phase
                    .move_proxy(proxy_id, aabb, displacement);
            }
            fixture_id = next;
        }
    }

    /// Serial pair sweep used inside the TOI loop; contacts are created in
    /// place rather than deferred.
    fn find_new_contacts_serial(&mut self) {
        let move_count = self.contact_manager.broad_phase.move_count();
        if move_count == 0 {
            return;
        }
        let mut pairs = Vec::new();
        self.contact_manager
            .broad_phase
            .update_pairs(0, move_count, |a, b| pairs.push((a, b)));
        for (a, b) in pairs {
            if let Some(rec) = self.make_pair(a, b) {
                self.create_contact(&rec);
            }
        }
    }

    // ------------------------------------------------------------------
    // Deferred-event merges (serial, deterministic)
    // ------------------------------------------------------------------

    fn consume_deferred_awakes(&mut self, thread_count: u32) {
        // Waking is commutative and idempotent, so order is irrelevant.
        for t in 0..thread_count {
            let awakes = core::mem::take(&mut self.contact_manager.per_thread_mut(t).awakes);
            for contact_id in awakes {
                let (body_a, body_b) = {
                    let c = self.contact(contact_id);
                    (c.body_a, c.body_b)
                };
                self.body_mut(body_a).set_awake(true);
                self.body_mut(body_b).set_awake(true);
            }
        }
    }

    fn consume_deferred_begin_contacts(&mut self, thread_count: u32) {
        let lists = self
            .contact_manager
            .take_buffers(thread_count, |td| &mut td.begin_contacts);
        let Some(mut listener) = self.listener.take() else {
            return;
        };
        kway_merge(
            lists,
            |e: &DeferredContactEvent| e.key,
            |e| listener.begin_contact(self, e.contact),
        );
        self.listener = Some(listener);
    }

    fn consume_deferred_end_contacts(&mut self, thread_count: u32) {
        let lists = self
            .contact_manager
            .take_buffers(thread_count, |td| &mut td.end_contacts);
        let Some(mut listener) = self.listener.take() else {
            return;
        };
        kway_merge(
            lists,
            |e: &DeferredContactEvent| e.key,
            |e| listener.end_contact(self, e.contact),
        );
        self.listener = Some(listener);
    }

    fn consume_deferred_pre_solves(&mut self, thread_count: u32) {
        let lists = self
            .contact_manager
            .take_buffers(thread_count, |td| &mut td.pre_solves);
        let Some(mut listener) = self.listener.take() else {
            return;
        };
        kway_merge(
            lists,
            |e: &crate::contact_manager::DeferredPreSolve| e.key,
            |e| listener.pre_solve(self, e.contact, &e.old_manifold),
        );
        self.listener = Some(listener);
    }

    fn consume_deferred_post_solves(&mut self, thread_count: u32) {
        let lists = self
            .contact_manager
            .take_buffers(thread_count, |td| &mut td.post_solves);
        let Some(mut listener) = self.listener.take() else {
            return;
        };
        kway_merge(
            lists,
            |e: &crate::contact_manager::DeferredPostSolve| e.key,
            |e| listener.post_solve(self, e.contact, &e.impulse),
        );
        self.listener = Some(listener);
    }

    fn consume_deferred_destroys(&mut self, thread_count: u32) {
        let lists = self
            .contact_manager
            .take_buffers(thread_count, |td| &mut td.destroys);
        kway_merge(
            lists,
            |e: &DeferredContactEvent| e.key,
            |e| self.destroy_contact(e.contact),
        );
    }

    fn consume_deferred_creates(&mut self, thread_count: u32) {
        let lists = self
            .contact_manager
            .take_buffers(thread_count, |td| &mut td.creates);
        // A run of equal keys collapses to a single creation.
        let mut prev_key: Option<ProxyIdPair> = None;
        kway_merge(
            lists,
            |e: &DeferredContactCreate| e.key,
            |e| {
                if prev_key == Some(e.key) {
                    return;
                }
                prev_key = Some(e.key);
                self.create_contact(&e);
            },
        );
    }

    fn consume_deferred_move_proxies(&mut self, thread_count: u32) {
        let lists = self
            .contact_manager
            .take_buffers(thread_count, |td| &mut td.move_proxies);
        let mut moves: Vec<DeferredMoveProxy> = Vec::new();
        kway_merge(lists, |e: &DeferredMoveProxy| e.proxy_id, |e| moves.push(e));
        for m in moves {
            self.contact_manager
                .broad_phase
                .move_proxy(m.proxy_id, m.aabb, m.displacement);
        }
    }

    // ------------------------------------------------------------------
    // Worker-side phase bodies
    // ------------------------------------------------------------------

    /// Narrow phase over one slice of the contact order array.
    ///
    /// # Safety
    /// Collide-phase rules: the slice is disjoint from every other task's,
    /// `thread_id` is the executing thread, and shared state is read-only.
    pub(crate) unsafe fn collide_range(&self, range: Range, thread_id: u32) {
        let td = self.contact_manager.per_thread_mut_unchecked(thread_id);

        for i in range.begin..range.end {
            let contact_id = self.contact_manager.order[i as usize];
            let contact = self.contact_manager.contact_mut_unchecked(contact_id);

            // Refiltering requested by a joint or filter change.
            if contact.flags & Contact::FLAG_FILTER != 0 {
                if !self.should_collide_bodies(contact.body_a, contact.body_b)
                    || !self.contact_manager.filter.should_collide(
                        self.fixture(contact.fixture_a),
                        self.fixture(contact.fixture_b),
                    )
                {
                    td.destroys.push(DeferredContactEvent {
                        contact: contact_id,
                        key: contact.proxy_ids,
                    });
                    continue;
                }
                contact.flags &= !Contact::FLAG_FILTER;
            }

            let active_a = {
                let b = self.body(contact.body_a);
                b.is_awake() && b.body_type != BodyType::Static
            };
            let active_b = {
                let b = self.body(contact.body_b);
                b.is_awake() && b.body_type != BodyType::Static
            };
            if !active_a && !active_b {
                continue;
            }

            // Contacts whose fat AABBs separated are destroyed.
            let overlap = self
                .contact_manager
                .broad_phase
                .test_overlap(contact.proxy_ids.low, contact.proxy_ids.high);
            if !overlap {
                td.destroys.push(DeferredContactEvent {
                    contact: contact_id,
                    key: contact.proxy_ids,
                });
            }

            // The contact persists until the destroy merge runs.
            let outcome = self.update_contact_manifold(contact);
            let key = contact.proxy_ids;

            if outcome.touching_changed {
                td.awakes.push(contact_id);
            }

            let Some(listener) = self.listener_shared() else {
                continue;
            };
            if outcome.began
                && listener.begin_contact_immediate(contact, thread_id)
                    == ImmediateResult::CallDeferred
            {
                td.begin_contacts.push(DeferredContactEvent {
                    contact: contact_id,
                    key,
                });
            }
            if outcome.ended
                && listener.end_contact_immediate(contact, thread_id)
                    == ImmediateResult::CallDeferred
            {
                td.end_contacts.push(DeferredContactEvent {
                    contact: contact_id,
                    key,
                });
            }
            if outcome.solid_touch
                && listener.pre_solve_immediate(contact, &outcome.old_manifold, thread_id)
                    == ImmediateResult::CallDeferred
            {
                td.pre_solves.push(crate::contact_manager::DeferredPreSolve {
                    contact: contact_id,
                    key,
                    old_manifold: outcome.old_manifold,
                });
            }
        }
    }

    /// Pair sweep over one slice of the move buffer.
    ///
    /// # Safety
    /// Find-new-contacts-phase rules: disjoint slice, owning thread id,
    /// read-only shared state.
    pub(crate) unsafe fn find_new_contacts_range(&self, range: Range, thread_id: u32) {
        debug_assert!(self.contact_manager.defer_creates);
        let td = self.contact_manager.per_thread_mut_unchecked(thread_id);
        self.contact_manager
            .broad_phase
            .update_pairs(range.begin, range.end, |a, b| {
                if let Some(rec) = self.make_pair(a, b) {
                    td.creates.push(rec);
                }
            });
    }

    /// Swept-AABB generation over one slice of the non-static body array.
    ///
    /// # Safety
    /// Synchronize-fixtures-phase rules: disjoint body slice (covering the
    /// bodies' fixtures), owning thread id.
    pub(crate) unsafe fn generate_move_proxies_range(&self, range: Range, thread_id: u32) {
        let td = self.contact_manager.per_thread_mut_unchecked(thread_id);

        for i in range.begin..range.end {
            let body_id = self.non_static_bodies[i as usize];
            let body = self.body(body_id);
            debug_assert!(body.body_type != BodyType::Static);

            // A body outside every island did not move this step.
            if body.flags & Body::FLAG_ISLAND == 0 {
                continue;
            }

            let q = crate::math::Rot::new(body.sweep.a0);
            let xf1 = Transform {
                p: body.sweep.c0 - q.apply(body.sweep.local_center),
                q,
            };
            let xf2 = body.xf;

            let mut fixture_id = body.fixture_list;
            while fixture_id != NULL_INDEX {
                let fixture = self.fixture_mut_unchecked(fixture_id);
                for proxy in &mut fixture.proxies {
                    let aabb1 = fixture.shape.compute_aabb(&xf1, proxy.child_index);
                    let aabb2 = fixture.shape.compute_aabb(&xf2, proxy.child_index);
                    proxy.aabb = Aabb::combine(&aabb1, &aabb2);

                    let fat = self.contact_manager.broad_phase.fat_aabb(proxy.proxy_id);
                    if !fat.contains(&proxy.aabb) {
                        td.move_proxies.push(DeferredMoveProxy {
                            proxy_id: proxy.proxy_id,
                            aabb: proxy.aabb,
                            displacement: xf2.p - xf1.p,
                        });
                    }
                }
                fixture_id = fixture.next;
            }
        }
    }

    /// Flag reset over one slice of the contact order array.
    ///
    /// # Safety
    /// Flag-reset-phase rules: disjoint slice.
    pub(crate) unsafe fn reset_contact_flags_range(&self, range: Range, toi: bool) {
        for i in range.begin..range.end {
            let contact_id = self.contact_manager.order[i as usize];
            let contact = self.contact_manager.contact_mut_unchecked(contact_id);
            if toi {
                contact.flags &= !(Contact::FLAG_TOI | Contact::FLAG_ISLAND);
                contact.toi_count = 0;
                contact.toi = 1.0;
            } else {
                contact.flags &= !Contact::FLAG_ISLAND;
            }
        }
    }

    /// Flag reset over one slice of the non-static body array.
    ///
    /// # Safety
    /// Flag-reset-phase rules: disjoint slice.
    pub(crate) unsafe fn reset_body_flags_range(&self, range: Range) {
        for i in range.begin..range.end {
            let body_id = self.non_static_bodies[i as usize];
            let body = self.body_mut_unchecked(body_id);
            body.flags &= !Body::FLAG_ISLAND;
            body.sweep.alpha0 = 0.0;
        }
    }

    /// Solve every island of one batch.
    ///
    /// # Safety
    /// Solve-phase rules: the batch's islands own their non-static bodies,
    /// contacts, and joints exclusively.
    pub(crate) unsafe fn solve_batch(&self, batch: &SolveBatch, thread_id: u32) {
        for island in &batch.islands {
            solve_island(
                self,
                island,
                &self.current_step,
                self.gravity,
                self.allow_sleep,
                thread_id,
            );
        }
    }
}

/// What a narrow-phase update observed.
struct ContactUpdateOutcome {
    old_manifold: crate::collide::Manifold,
    touching_changed: bool,
    began: bool,
    ended: bool,
    solid_touch: bool,
}

impl StepTask {
    /// Execute the task. Called by executors; valid only between submission
    /// and the completion of the phase's wait.
    pub fn execute(&self, ctx: &ThreadContext) {
        // Safety: the submission contract (see `TaskExecutor`) guarantees
        // the world outlives this call and the phase rules hold.
        let world = unsafe { &*self.world.0 };
        match self.kind {
            TaskKind::Collide(range) => unsafe { world.collide_range(range, ctx.thread_id) },
            TaskKind::FindNewContacts(range) => unsafe {
                world.find_new_contacts_range(range, ctx.thread_id)
            },
            TaskKind::GenerateMoveProxies(range) => unsafe {
                world.generate_move_proxies_range(range, ctx.thread_id)
            },
            TaskKind::ResetContactFlags { range, toi } => unsafe {
                world.reset_contact_flags_range(range, toi)
            },
            TaskKind::ResetBodyFlags(range) => unsafe { world.reset_body_flags_range(range) },
            TaskKind::SortBuffers { thread, set } => {
                // Safety: exactly one sort task exists per buffer per
                // sub-phase, so access is exclusive.
                let td = unsafe { world.contact_manager.per_thread_mut_unchecked(thread) };
                match set {
                    SortSet::Collides => td.sort_collides(),
                    SortSet::Creates => td.sort_creates(),
                    SortSet::Moves => td.sort_moves(),
                    SortSet::PostSolves => td.sort_post_solves(),
                }
            }
            TaskKind::Solve { batch } => unsafe {
                world.solve_batch(&*batch.0, ctx.thread_id);
            },
        }
    }
}

/// A task that must never run; used by queue-ordering tests.
#[cfg(test)]
pub(crate) fn null_task(cost: u32) -> StepTask {
    StepTask {
        world: WorldPtr(core::ptr::null_mut()),
        kind: TaskKind::ResetBodyFlags(Range::default()),
        cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SerialExecutor;
    use crate::shape::Shape;

    fn ground_and_ball() -> (World, u32, u32) {
        let mut world = World::new(Vec2::new(0.0, -10.0));
        let ground = world.create_body(&BodyDef::default()).unwrap();
        world
            .create_fixture(
                ground,
                &FixtureDef::new(Shape::edge(Vec2::new(-20.0, 0.0), Vec2::new(20.0, 0.0))),
            )
            .unwrap();

        let ball = world
            .create_body(&BodyDef {
                body_type: BodyType::Dynamic,
                position: Vec2::new(0.0, 4.0),
                ..Default::default()
            })
            .unwrap();
        let mut fd = FixtureDef::new(Shape::circle(0.5));
        fd.density = 1.0;
        world.create_fixture(ball, &fd).unwrap();
        (world, ground, ball)
    }

    #[test]
    fn test_ball_falls_and_lands() {
        let (mut world, _ground, ball) = ground_and_ball();
        let mut executor = SerialExecutor::new();
        for _ in 0..240 {
            world.step(1.0 / 60.0, 8, 3, &mut executor);
        }
        let y = world.body(ball).position().y;
        assert!(y > 0.3 && y < 0.7, "ball should rest on the ground, y = {y}");
    }

    #[test]
    fn test_island_flags_clean_between_steps() {
        let (mut world, _, _) = ground_and_ball();
        let mut executor = SerialExecutor::new();
        for _ in 0..180 {
            world.step(1.0 / 60.0, 8, 3, &mut executor);
        }
        for &id in world.non_static_bodies() {
            assert_eq!(world.body(id).flags & Body::FLAG_ISLAND, 0);
        }
        for i in 0..world.contact_manager.order.len() {
            let id = world.contact_manager.order[i];
            assert_eq!(world.contact(id).flags & Contact::FLAG_ISLAND, 0);
        }
        assert!(world.contact_manager.check_partition());
    }

    #[test]
    fn test_contact_created_for_touching_pair() {
        let (mut world, _, _) = ground_and_ball();
        let mut executor = SerialExecutor::new();
        for _ in 0..240 {
            world.step(1.0 / 60.0, 8, 3, &mut executor);
        }
        assert_eq!(world.contact_count(), 1);
        let id = world.contact_manager.contact_list;
        assert!(world.contact(id).is_touching());
    }

    #[test]
    fn test_candidacy_recalculation_idempotent() {
        let (mut world, ground, ball) = ground_and_ball();
        let mut executor = SerialExecutor::new();
        for _ in 0..240 {
            world.step(1.0 / 60.0, 8, 3, &mut executor);
        }
        // Ground is static without prefer-no-CCD, so the contact is a
        // candidate.
        assert_eq!(world.contact_manager.toi_count, 1);

        world.recalculate_toi_candidacy_body(ground);
        world.recalculate_toi_candidacy_body(ball);
        assert_eq!(world.contact_manager.toi_count, 1);
        assert!(world.contact_manager.check_partition());

        world.set_prefer_no_ccd(ground, true);
        assert_eq!(world.contact_manager.toi_count, 0);
        world.set_prefer_no_ccd(ground, true);
        assert_eq!(world.contact_manager.toi_count, 0);
        world.set_prefer_no_ccd(ground, false);
        assert_eq!(world.contact_manager.toi_count, 1);
    }

    #[test]
    fn test_static_body_can_carry_bullet_flag() {
        let (mut world, ground, _) = ground_and_ball();
        world.set_bullet(ground, true);
        assert!(world.body(ground).is_bullet());
    }

    #[test]
    fn test_broad_phase_freshness_after_step() {
        let (mut world, _, ball) = ground_and_ball();
        let mut executor = SerialExecutor::new();
        for _ in 0..60 {
            world.step(1.0 / 60.0, 8, 3, &mut executor);
        }
        let fixture_id = world.body(ball).fixture_list;
        let fixture = world.fixture(fixture_id);
        let xf = world.body(ball).xf;
        for proxy in &fixture.proxies {
            let tight = fixture.shape.compute_aabb(&xf, proxy.child_index);
            let fat = world.contact_manager.broad_phase.fat_aabb(proxy.proxy_id);
            assert!(fat.contains(&tight), "fat AABB went stale");
        }
    }

    #[test]
    fn test_destroy_body_removes_contacts() {
        let (mut world, _, ball) = ground_and_ball();
        let mut executor = SerialExecutor::new();
        for _ in 0..240 {
            world.step(1.0 / 60.0, 8, 3, &mut executor);
        }
        assert_eq!(world.contact_count(), 1);
        world.destroy_body(ball).unwrap();
        assert_eq!(world.contact_count(), 0);
        assert_eq!(world.body_count(), 1);
        assert!(world.contact_manager.check_partition());
    }
}
