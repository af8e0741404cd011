//! flux2d: Deterministic Multithreaded 2D Rigid-Body Physics
//!
//! A 2D physics engine whose per-step pipeline fans out across worker
//! threads while producing bit-identical results for any thread count. The
//! engine is built around four cooperating pieces:
//!
//! - A **task executor**: a thread pool with a cost-priority queue,
//!   task-group completion counters, a participating wait on the stepping
//!   thread, and an optional busy-wait regime for short phases.
//! - The **step pipeline**: broad-phase pair finding, parallel narrow
//!   phase, island-based constraint solving, a serial continuous-collision
//!   pass, and parallel fixture resynchronization.
//! - A **deferred-event protocol**: workers never mutate shared structures
//!   mid-phase; they push records into per-thread buffers that are sorted
//!   and k-way merged in a stable key order between phases.
//! - A **contact partition** that keeps CCD-eligible contacts clustered in
//!   a prefix of the contact array so the serial TOI loop scans a short
//!   range.
//!
//! # Example
//!
//! ```rust
//! use flux2d::{BodyDef, BodyType, FixtureDef, SerialExecutor, Shape, World};
//! use glam::Vec2;
//!
//! let mut world = World::new(Vec2::new(0.0, -10.0));
//!
//! let ground = world.create_body(&BodyDef::default()).unwrap();
//! world
//!     .create_fixture(
//!         ground,
//!         &FixtureDef::new(Shape::edge(Vec2::new(-40.0, 0.0), Vec2::new(40.0, 0.0))),
//!     )
//!     .unwrap();
//!
//! let ball = world
//!     .create_body(&BodyDef {
//!         body_type: BodyType::Dynamic,
//!         position: Vec2::new(0.0, 10.0),
//!         ..Default::default()
//!     })
//!     .unwrap();
//! let mut fixture = FixtureDef::new(Shape::circle(0.5));
//! fixture.density = 1.0;
//! world.create_fixture(ball, &fixture).unwrap();
//!
//! // A thread pool executor runs the same pipeline across workers and
//! // produces bit-identical results; the serial executor is the
//! // single-threaded degenerate case.
//! let mut executor = SerialExecutor::new();
//! for _ in 0..60 {
//!     world.step(1.0 / 60.0, 8, 3, &mut executor);
//! }
//! assert!(world.body(ball).position().y < 10.0);
//! ```
//!
//! # Determinism
//!
//! For a fixed world and a fixed sequence of user operations, two runs with
//! different executors, thread counts, or schedules produce identical
//! post-step state. Task ordering inside a phase is deliberately left free;
//! every observable side effect instead flows through a deterministic
//! merge keyed on stable identities (proxy-id pairs for contact events,
//! proxy ids for moves), with ties broken by producing thread id.
//!
//! # Modules
//!
//! - [`world`]: the world, the step orchestrator, queries
//! - [`executor`]: the task executor strategy trait, tasks, partitioner
//! - [`thread_pool`]: the cost-priority pool and its executor
//! - [`contact_manager`]: contact set, deferred buffers, TOI partition
//! - [`body`], [`fixture`], [`joint`], [`contact`]: the scene objects
//! - [`broad_phase`]: fat-AABB dynamic tree, move buffer, pair sweeps
//! - [`collide`], [`distance`], [`toi`]: narrow phase, GJK, impact times
//! - [`contact_solver`], [`island`]: the constraint solver
//! - [`listener`], [`filter`]: user hooks
//! - [`math`], [`shape`], [`settings`], [`profile`], [`rng`], [`error`]

#![warn(missing_docs)]

pub mod body;
pub mod broad_phase;
pub mod collide;
pub mod contact;
pub mod contact_manager;
pub mod contact_solver;
pub mod distance;
pub mod error;
pub mod executor;
pub mod filter;
pub mod fixture;
pub mod island;
pub mod joint;
pub mod listener;
pub mod math;
pub mod profile;
pub mod rng;
pub mod settings;
pub mod shape;
pub mod thread_pool;
pub mod toi;
pub mod world;

mod sync_cell;

pub use body::{Body, BodyDef, BodyType};
pub use collide::{ContactImpulse, Manifold, WorldManifold};
pub use contact::{Contact, ProxyIdPair};
pub use error::WorldError;
pub use executor::{
    partition_range, PartitionedRange, Range, SerialExecutor, StepTask, TaskExecutor, TaskGroupId,
    TaskKind, ThreadContext,
};
pub use filter::{ContactFilter, DefaultFilter, FilterData};
pub use fixture::{Fixture, FixtureDef};
pub use joint::{Joint, JointDef, JointDefKind};
pub use listener::{ContactListener, ImmediateResult, NoopContactListener};
pub use math::{Aabb, Rot, Sweep, Transform};
pub use profile::StepProfile;
pub use rng::DeterministicRng;
pub use settings::NULL_INDEX;
pub use shape::{PolygonShape, Shape};
pub use thread_pool::{ThreadPool, ThreadPoolExecutor};
pub use world::World;

// Re-export the math dependency: positions and vectors in the public API
// are glam types.
pub use glam;
