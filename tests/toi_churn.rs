//! TOI candidacy churn tests
//!
//! Continuous collision must engage exactly when the candidacy rule says
//! so: neither fixture is a sensor, and either body is a bullet or is
//! non-dynamic without the prefer-no-CCD opt-out. These tests cycle a
//! ball/wall cell through every sensor/prefer-no-CCD/bullet combination on
//! both sides — reconfigured from outside the step and from each deferred
//! listener callback — and check whether the ball tunnels.

use std::sync::{Arc, Mutex};

use flux2d::{
    BodyDef, BodyType, ContactListener, FixtureDef, ImmediateResult, SerialExecutor, Shape,
    TaskExecutor, World, NULL_INDEX,
};
use glam::Vec2;

const DT: f32 = 1.0 / 60.0;
const SENSOR_BIT: u32 = 0x1;
const PREFER_NO_CCD_BIT: u32 = 0x2;
const BULLET_BIT: u32 = 0x4;

struct Cell {
    wall_body: u32,
    wall_fixture: u32,
    ball_body: u32,
    ball_fixture: u32,
}

fn build_cell(world: &mut World) -> Cell {
    let wall_body = world.create_body(&BodyDef::default()).unwrap();
    let wall_fixture = world
        .create_fixture(
            wall_body,
            &FixtureDef::new(Shape::edge(Vec2::new(-1.0, 0.0), Vec2::new(1.0, 0.0))),
        )
        .unwrap();

    let ball_body = world
        .create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::new(0.0, 1.0),
            ..Default::default()
        })
        .unwrap();
    let mut fd = FixtureDef::new(Shape::circle(0.25));
    fd.density = 1.0;
    let ball_fixture = world.create_fixture(ball_body, &fd).unwrap();

    Cell {
        wall_body,
        wall_fixture,
        ball_body,
        ball_fixture,
    }
}

fn apply_combo(world: &mut World, cell: &Cell, wall_mask: u32, ball_mask: u32) {
    world.set_sensor(cell.wall_fixture, wall_mask & SENSOR_BIT != 0);
    world.set_prefer_no_ccd(cell.wall_body, wall_mask & PREFER_NO_CCD_BIT != 0);
    world.set_bullet(cell.wall_body, wall_mask & BULLET_BIT != 0);

    world.set_sensor(cell.ball_fixture, ball_mask & SENSOR_BIT != 0);
    world.set_prefer_no_ccd(cell.ball_body, ball_mask & PREFER_NO_CCD_BIT != 0);
    world.set_bullet(cell.ball_body, ball_mask & BULLET_BIT != 0);
}

/// Should the wall stop the ball under the current flags? The wall is
/// static, so its prefer-no-CCD opt-out matters; the ball is dynamic, so
/// only its bullet flag does.
fn expect_blocked(world: &World, cell: &Cell) -> bool {
    let sensor = world.fixture(cell.wall_fixture).sensor || world.fixture(cell.ball_fixture).sensor;
    if sensor {
        return false;
    }
    let wall = world.body(cell.wall_body);
    let ball = world.body(cell.ball_body);
    wall.is_bullet() || ball.is_bullet() || !wall.prefer_no_ccd()
}

/// Fire the ball through the wall and report whether it was stopped.
fn fire_ball(world: &mut World, executor: &mut dyn TaskExecutor, cell: &Cell) -> bool {
    world
        .set_transform(cell.ball_body, Vec2::new(0.0, 1.0), 0.0)
        .unwrap();
    {
        let ball = world.body_mut(cell.ball_body);
        ball.linear_velocity = Vec2::new(0.0, -150.0);
        ball.angular_velocity = 0.0;
        ball.set_awake(true);
    }
    for _ in 0..30 {
        world.step(DT, 8, 3, executor);
        assert!(world.contact_manager.check_partition());
    }
    // A stopped ball rests on the wall; a tunneling ball is far below.
    world.body(cell.ball_body).position().y > -0.4
}

/// The contact between the cell's fixtures, if it currently exists.
fn find_cell_contact(world: &World, cell: &Cell) -> Option<u32> {
    let mut id = world.contact_manager.contact_list;
    while id != NULL_INDEX {
        let c = world.contact(id);
        let fixtures = (c.fixture_a, c.fixture_b);
        if fixtures == (cell.wall_fixture, cell.ball_fixture)
            || fixtures == (cell.ball_fixture, cell.wall_fixture)
        {
            return Some(id);
        }
        id = c.next;
    }
    None
}

#[test]
fn test_candidacy_matrix_reconfigured_outside_step() {
    let mut world = World::new(Vec2::new(0.0, -10.0));
    let mut executor = SerialExecutor::new();
    let cell = build_cell(&mut world);

    for state in 0..64u32 {
        let wall_mask = state % 8;
        let ball_mask = state / 8;
        apply_combo(&mut world, &cell, wall_mask, ball_mask);

        let blocked = expect_blocked(&world, &cell);
        assert_eq!(
            fire_ball(&mut world, &mut executor, &cell),
            blocked,
            "wrong outcome for wall={wall_mask:03b} ball={ball_mask:03b}"
        );

        // When the contact survives, its partition placement must agree
        // with the candidacy rule.
        if let Some(contact_id) = find_cell_contact(&world, &cell) {
            let sensor = world.fixture(cell.wall_fixture).sensor
                || world.fixture(cell.ball_fixture).sensor;
            let wall = world.body(cell.wall_body);
            let ball = world.body(cell.ball_body);
            let candidate = !sensor
                && (wall.is_bullet() || ball.is_bullet() || !wall.prefer_no_ccd());
            assert_eq!(world.contact(contact_id).is_toi_candidate(), candidate);
        }
    }
}

// ----------------------------------------------------------------------
// Reconfiguration from deferred callbacks
// ----------------------------------------------------------------------

struct ChurnState {
    /// Combination to apply and the hook (0..4) that must apply it.
    pending: Option<(u32, u32, usize)>,
    applied: bool,
}

struct ChurnListener {
    cell_wall_body: u32,
    cell_wall_fixture: u32,
    cell_ball_body: u32,
    cell_ball_fixture: u32,
    state: Arc<Mutex<ChurnState>>,
}

impl ChurnListener {
    fn maybe_apply(&self, world: &mut World, hook: usize) {
        let mut state = self.state.lock().unwrap();
        let Some((wall_mask, ball_mask, want_hook)) = state.pending else {
            return;
        };
        if want_hook != hook {
            return;
        }
        state.pending = None;
        state.applied = true;
        drop(state);

        let cell = Cell {
            wall_body: self.cell_wall_body,
            wall_fixture: self.cell_wall_fixture,
            ball_body: self.cell_ball_body,
            ball_fixture: self.cell_ball_fixture,
        };
        apply_combo(world, &cell, wall_mask, ball_mask);
    }
}

impl ContactListener for ChurnListener {
    fn begin_contact_immediate(
        &self,
        _contact: &mut flux2d::Contact,
        _thread_id: u32,
    ) -> ImmediateResult {
        ImmediateResult::CallDeferred
    }
    fn end_contact_immediate(
        &self,
        _contact: &mut flux2d::Contact,
        _thread_id: u32,
    ) -> ImmediateResult {
        ImmediateResult::CallDeferred
    }
    fn pre_solve_immediate(
        &self,
        _contact: &mut flux2d::Contact,
        _old_manifold: &flux2d::Manifold,
        _thread_id: u32,
    ) -> ImmediateResult {
        ImmediateResult::CallDeferred
    }
    fn post_solve_immediate(
        &self,
        _contact: &mut flux2d::Contact,
        _impulse: &flux2d::ContactImpulse,
        _thread_id: u32,
    ) -> ImmediateResult {
        ImmediateResult::CallDeferred
    }

    fn begin_contact(&mut self, world: &mut World, _contact: u32) {
        self.maybe_apply(world, 0);
    }
    fn end_contact(&mut self, world: &mut World, _contact: u32) {
        self.maybe_apply(world, 1);
    }
    fn pre_solve(&mut self, world: &mut World, _contact: u32, _old: &flux2d::Manifold) {
        self.maybe_apply(world, 2);
    }
    fn post_solve(&mut self, world: &mut World, _contact: u32, _impulse: &flux2d::ContactImpulse) {
        self.maybe_apply(world, 3);
    }
}

/// A bouncer that keeps producing begin/end events and a never-sleeping
/// box that produces pre/post events every step.
fn build_event_generators(world: &mut World) {
    let ground = world
        .create_body(&BodyDef {
            position: Vec2::new(40.0, 0.0),
            ..Default::default()
        })
        .unwrap();
    world
        .create_fixture(
            ground,
            &FixtureDef::new(Shape::edge(Vec2::new(-3.0, 0.0), Vec2::new(3.0, 0.0))),
        )
        .unwrap();

    // Begin/end generator: a perfectly elastic bouncer.
    let bouncer = world
        .create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::new(39.0, 1.0),
            allow_sleep: false,
            ..Default::default()
        })
        .unwrap();
    let mut fd = FixtureDef::new(Shape::circle(0.2));
    fd.density = 1.0;
    fd.restitution = 1.0;
    world.create_fixture(bouncer, &fd).unwrap();

    // Pre/post generator: a resting box that never sleeps.
    let rester = world
        .create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::new(41.0, 0.3),
            allow_sleep: false,
            ..Default::default()
        })
        .unwrap();
    let mut fd = FixtureDef::new(Shape::box2(0.3, 0.3));
    fd.density = 1.0;
    world.create_fixture(rester, &fd).unwrap();
}

#[test]
fn test_candidacy_matrix_reconfigured_from_deferred_callbacks() {
    let mut world = World::new(Vec2::new(0.0, -10.0));
    let mut executor = SerialExecutor::new();
    let cell = build_cell(&mut world);
    build_event_generators(&mut world);

    let state = Arc::new(Mutex::new(ChurnState {
        pending: None,
        applied: false,
    }));
    world.set_contact_listener(Box::new(ChurnListener {
        cell_wall_body: cell.wall_body,
        cell_wall_fixture: cell.wall_fixture,
        cell_ball_body: cell.ball_body,
        cell_ball_fixture: cell.ball_fixture,
        state: Arc::clone(&state),
    }));

    let mut applied_by_hook = [0u32; 4];

    for combo in 0..64u32 {
        let wall_mask = combo % 8;
        let ball_mask = combo / 8;
        let hook = (combo % 4) as usize;

        {
            let mut s = state.lock().unwrap();
            s.pending = Some((wall_mask, ball_mask, hook));
            s.applied = false;
        }

        // Step until some event of the chosen kind applies the combo.
        let mut applied = false;
        for _ in 0..600 {
            world.step(DT, 8, 3, &mut executor);
            if state.lock().unwrap().applied {
                applied = true;
                break;
            }
        }
        assert!(
            applied,
            "hook {hook} never fired to apply combo wall={wall_mask:03b} ball={ball_mask:03b}"
        );
        applied_by_hook[hook] += 1;
        assert!(world.contact_manager.check_partition());

        let blocked = expect_blocked(&world, &cell);
        assert_eq!(
            fire_ball(&mut world, &mut executor, &cell),
            blocked,
            "wrong outcome for wall={wall_mask:03b} ball={ball_mask:03b} via hook {hook}"
        );
    }

    for (hook, count) in applied_by_hook.iter().enumerate() {
        assert!(*count > 0, "hook {hook} applied nothing");
    }
}
