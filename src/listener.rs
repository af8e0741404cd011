//! Contact Listener
//!
//! Every contact event has two hooks. The *immediate* hook runs in place on
//! whichever worker produced the event; it takes `&self`, may run
//! concurrently with other immediate hooks, and sees only the contact it was
//! given. Its return value decides whether a deferred record is pushed. The
//! *deferred* hook runs between phases on the user thread, in the
//! deterministic merge order, with the whole world mutable.

use crate::collide::{ContactImpulse, Manifold};
use crate::contact::Contact;
use crate::world::World;

/// Decision returned by an immediate hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImmediateResult {
    /// Push a deferred record; the deferred hook will run between phases.
    CallDeferred,
    /// This event is fully handled; do not defer.
    DoNotCallDeferred,
}

/// User callbacks for contact events.
///
/// Immediate hooks are called from worker threads in a nondeterministic
/// order; they may read and modify the provided contact and nothing else.
/// Deferred hooks are called serially, sorted by the contact's proxy-id
/// pair, and may mutate the world freely — including flags that affect TOI
/// candidacy.
///
/// Sensors receive only begin/end events.
#[allow(unused_variables)]
pub trait ContactListener: Send + Sync {
    /// Two fixtures began touching (worker thread, restricted access).
    fn begin_contact_immediate(&self, contact: &mut Contact, thread_id: u32) -> ImmediateResult {
        ImmediateResult::DoNotCallDeferred
    }

    /// Two fixtures stopped touching (worker thread, restricted access).
    fn end_contact_immediate(&self, contact: &mut Contact, thread_id: u32) -> ImmediateResult {
        ImmediateResult::DoNotCallDeferred
    }

    /// A touching non-sensor contact is about to be solved (worker thread,
    /// restricted access). `old_manifold` is the manifold before this
    /// narrow-phase update; disabling the contact here rejects its manifold
    /// for this step.
    fn pre_solve_immediate(
        &self,
        contact: &mut Contact,
        old_manifold: &Manifold,
        thread_id: u32,
    ) -> ImmediateResult {
        ImmediateResult::DoNotCallDeferred
    }

    /// A contact was solved (worker thread, restricted access). The impulse
    /// carries one normal/tangent pair per manifold point.
    fn post_solve_immediate(
        &self,
        contact: &mut Contact,
        impulse: &ContactImpulse,
        thread_id: u32,
    ) -> ImmediateResult {
        ImmediateResult::DoNotCallDeferred
    }

    /// Deferred begin event (user thread, world mutable).
    fn begin_contact(&mut self, world: &mut World, contact: u32) {}

    /// Deferred end event (user thread, world mutable). Also called when a
    /// touching contact is destroyed.
    fn end_contact(&mut self, world: &mut World, contact: u32) {}

    /// Deferred pre-solve event (user thread, world mutable).
    fn pre_solve(&mut self, world: &mut World, contact: u32, old_manifold: &Manifold) {}

    /// Deferred post-solve event (user thread, world mutable).
    fn post_solve(&mut self, world: &mut World, contact: u32, impulse: &ContactImpulse) {}
}

/// A listener that defers nothing and reacts to nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopContactListener;

impl ContactListener for NoopContactListener {}
