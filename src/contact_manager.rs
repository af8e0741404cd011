//! Contact Manager
//!
//! Owns the world's contact set: a free-list arena of contacts plus the
//! partitioned order array whose prefix `[0, toi_count)` holds every
//! TOI-candidate contact. Also owns the per-thread deferred-event buffers
//! and the deterministic k-way merge that consumes them between phases.
//!
//! Phase discipline: during a parallel phase each worker writes only its own
//! `PerThreadData` and the contacts inside its slice of the order array;
//! everything else it touches is read-only. The merge and every structural
//! mutation (create, destroy, repartition) run serially on the user thread.

use crossbeam_utils::CachePadded;
use glam::Vec2;

use crate::broad_phase::BroadPhase;
use crate::collide::{ContactImpulse, Manifold};
use crate::contact::{Contact, ProxyIdPair};
use crate::filter::{ContactFilter, DefaultFilter};
use crate::math::Aabb;
use crate::profile::StepProfile;
use crate::settings::NULL_INDEX;
use crate::sync_cell::SyncCell;

/// A deferred begin/end/destroy record: the contact plus its merge key.
#[derive(Clone, Copy, Debug)]
pub struct DeferredContactEvent {
    /// Contact index.
    pub contact: u32,
    /// Deterministic merge key.
    pub key: ProxyIdPair,
}

/// A deferred pre-solve record carrying the pre-update manifold.
#[derive(Clone, Debug)]
pub struct DeferredPreSolve {
    /// Contact index.
    pub contact: u32,
    /// Deterministic merge key.
    pub key: ProxyIdPair,
    /// Manifold before the narrow-phase update.
    pub old_manifold: Manifold,
}

/// A deferred post-solve record carrying the solver impulses.
#[derive(Clone, Debug)]
pub struct DeferredPostSolve {
    /// Contact index.
    pub contact: u32,
    /// Deterministic merge key.
    pub key: ProxyIdPair,
    /// Impulses applied by the solver.
    pub impulse: ContactImpulse,
}

/// A deferred contact creation discovered by the broad-phase pair sweep.
#[derive(Clone, Copy, Debug)]
pub struct DeferredContactCreate {
    /// Fixture A index.
    pub fixture_a: u32,
    /// Child index on fixture A.
    pub child_a: u32,
    /// Fixture B index.
    pub fixture_b: u32,
    /// Child index on fixture B.
    pub child_b: u32,
    /// Proxy-id pair of the pending contact; merge key and duplicate filter.
    pub key: ProxyIdPair,
}

/// A deferred broad-phase proxy move produced by fixture synchronization.
#[derive(Clone, Copy, Debug)]
pub struct DeferredMoveProxy {
    /// Proxy to move.
    pub proxy_id: u32,
    /// New swept AABB.
    pub aabb: Aabb,
    /// Center displacement, used for predictive fattening.
    pub displacement: Vec2,
}

/// Per-thread deferred-event buffers. One instance per executor thread,
/// cache-line padded; written only by the owning thread during a phase.
#[derive(Default)]
pub struct PerThreadData {
    /// Contacts that began touching.
    pub begin_contacts: Vec<DeferredContactEvent>,
    /// Contacts that stopped touching.
    pub end_contacts: Vec<DeferredContactEvent>,
    /// Pre-solve events.
    pub pre_solves: Vec<DeferredPreSolve>,
    /// Post-solve events.
    pub post_solves: Vec<DeferredPostSolve>,
    /// Contacts whose bodies must wake (order-free: waking is idempotent).
    pub awakes: Vec<u32>,
    /// Contacts to destroy.
    pub destroys: Vec<DeferredContactEvent>,
    /// Contacts to create.
    pub creates: Vec<DeferredContactCreate>,
    /// Proxy moves to apply to the broad-phase.
    pub move_proxies: Vec<DeferredMoveProxy>,
    /// Per-thread solver stage timers, folded into the step profile.
    pub profile: StepProfile,
}

impl PerThreadData {
    /// Sort the collide-phase buffers by their merge keys.
    pub fn sort_collides(&mut self) {
        self.begin_contacts.sort_unstable_by_key(|e| e.key);
        self.end_contacts.sort_unstable_by_key(|e| e.key);
        self.destroys.sort_unstable_by_key(|e| e.key);
        self.pre_solves.sort_unstable_by_key(|e| e.key);
    }

    /// Sort the deferred creations by key.
    pub fn sort_creates(&mut self) {
        self.creates.sort_unstable_by_key(|e| e.key);
    }

    /// Sort the deferred proxy moves by proxy id.
    pub fn sort_moves(&mut self) {
        self.move_proxies.sort_unstable_by_key(|e| e.proxy_id);
    }

    /// Sort the post-solve events by key.
    pub fn sort_post_solves(&mut self) {
        self.post_solves.sort_unstable_by_key(|e| e.key);
    }
}

/// Merge sorted per-thread lists into one ascending sequence.
///
/// Pops the list whose head has the smallest key; ties go to the smallest
/// thread id. Consumption order therefore depends only on record contents,
/// never on which thread produced a record.
pub(crate) fn kway_merge<T, K, KF>(lists: Vec<Vec<T>>, key_of: KF, mut apply: impl FnMut(T))
where
    K: Ord,
    KF: Fn(&T) -> K,
{
    let mut queues: Vec<std::collections::VecDeque<T>> =
        lists.into_iter().map(Into::into).collect();

    loop {
        let mut selected: Option<usize> = None;
        for (t, queue) in queues.iter().enumerate() {
            let Some(head) = queue.front() else { continue };
            // Strict less-than keeps ties on the lowest thread id.
            selected = match selected {
                Some(s) if key_of(head) >= key_of(queues[s].front().unwrap()) => Some(s),
                _ => Some(t),
            };
        }
        let Some(t) = selected else { break };
        let record = queues[t].pop_front().unwrap();
        apply(record);
    }
}

/// The contact manager.
pub struct ContactManager {
    /// The broad-phase tree and move buffer.
    pub broad_phase: BroadPhase,
    /// Contact arena. Free slots are threaded through `free_contacts`.
    pub(crate) contacts: Vec<SyncCell<Contact>>,
    free_contacts: Vec<u32>,
    /// Partitioned contact order: `[0, toi_count)` are TOI candidates.
    pub order: Vec<u32>,
    /// Number of TOI-candidate contacts at the front of `order`.
    pub toi_count: u32,
    /// Head of the world contact list, for iteration outside the step.
    pub contact_list: u32,
    /// Number of live contacts.
    pub contact_count: u32,
    /// Per-thread deferred buffers, cache-line padded.
    pub(crate) per_thread: Vec<CachePadded<SyncCell<PerThreadData>>>,
    /// Pair filter consulted at pair creation and refiltering.
    pub filter: Box<dyn ContactFilter>,
    /// When set, `add_pair` defers creations into per-thread buffers
    /// instead of creating contacts in place.
    pub defer_creates: bool,
}

impl ContactManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            broad_phase: BroadPhase::new(),
            contacts: Vec::new(),
            free_contacts: Vec::new(),
            order: Vec::new(),
            toi_count: 0,
            contact_list: NULL_INDEX,
            contact_count: 0,
            per_thread: Vec::new(),
            filter: Box::new(DefaultFilter),
            defer_creates: false,
        }
    }

    /// Grow the per-thread buffer set to at least `thread_count` entries.
    pub fn ensure_thread_count(&mut self, thread_count: u32) {
        while self.per_thread.len() < thread_count as usize {
            self.per_thread
                .push(CachePadded::new(SyncCell::new(PerThreadData::default())));
        }
    }

    /// Shared read of a contact.
    #[inline]
    #[must_use]
    pub fn contact(&self, id: u32) -> &Contact {
        // Safety: serial callers hold no mutable alias; parallel callers
        // only read contacts outside their own slice, which no one mutates
        // under the phase rules relevant to them.
        unsafe { self.contacts[id as usize].as_ref_unchecked() }
    }

    /// Exclusive access to a contact through `&mut self`.
    #[inline]
    pub fn contact_mut(&mut self, id: u32) -> &mut Contact {
        self.contacts[id as usize].get_mut()
    }

    /// Mutable access to a contact from a worker thread.
    ///
    /// # Safety
    /// The contact must be owned by the caller under the current phase's
    /// disjointness rule (its order slice, or its island).
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn contact_mut_unchecked(&self, id: u32) -> &mut Contact {
        self.contacts[id as usize].as_mut_unchecked()
    }

    /// Mutable access to a per-thread buffer from a worker.
    ///
    /// # Safety
    /// The caller must have exclusive access to the buffer in the current
    /// sub-phase: either `thread_id` is the executing thread, or the caller
    /// runs the single sort task assigned to this buffer.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn per_thread_mut_unchecked(&self, thread_id: u32) -> &mut PerThreadData {
        self.per_thread[thread_id as usize].as_mut_unchecked()
    }

    /// Exclusive access to a per-thread buffer through `&mut self`.
    pub(crate) fn per_thread_mut(&mut self, thread_id: u32) -> &mut PerThreadData {
        self.per_thread[thread_id as usize].get_mut()
    }

    /// Allocate a contact slot.
    pub(crate) fn alloc_contact(&mut self, contact: Contact) -> u32 {
        self.contact_count += 1;
        if let Some(id) = self.free_contacts.pop() {
            *self.contacts[id as usize].get_mut() = contact;
            id
        } else {
            let id = self.contacts.len() as u32;
            self.contacts.push(SyncCell::new(contact));
            id
        }
    }

    /// Release a contact slot.
    pub(crate) fn free_contact(&mut self, id: u32) {
        debug_assert!(self.contact_count > 0);
        self.contact_count -= 1;
        self.free_contacts.push(id);
    }

    /// Number of non-TOI contacts (the order-array suffix).
    #[inline]
    #[must_use]
    pub fn non_toi_count(&self) -> u32 {
        self.order.len() as u32 - self.toi_count
    }

    // ------------------------------------------------------------------
    // TOI partition
    // ------------------------------------------------------------------

    /// Append a contact to the order array, placing TOI candidates at the
    /// end of the prefix. O(1).
    pub(crate) fn push_contact_order(&mut self, id: u32) {
        let candidate = self.contact(id).is_toi_candidate();
        if candidate {
            let boundary = self.toi_count as usize;
            if boundary < self.order.len() {
                // Evict the first non-TOI contact to the back.
                let evicted = self.order[boundary];
                let new_index = self.order.len() as u32;
                self.contact_mut(evicted).manager_index = new_index;
                self.order.push(evicted);
                self.order[boundary] = id;
                self.contact_mut(id).manager_index = boundary as u32;
            } else {
                self.contact_mut(id).manager_index = self.order.len() as u32;
                self.order.push(id);
            }
            self.toi_count += 1;
        } else {
            self.contact_mut(id).manager_index = self.order.len() as u32;
            self.order.push(id);
        }
        debug_assert!(self.check_partition());
    }

    /// Remove a contact from the order array. O(1).
    pub(crate) fn remove_contact_order(&mut self, id: u32) {
        let index = self.contact(id).manager_index as usize;
        debug_assert_eq!(self.order[index], id);

        if (index as u32) < self.toi_count {
            debug_assert!(self.contact(id).is_toi_candidate());
            // Fill the hole with the last TOI candidate.
            self.toi_count -= 1;
            let last_toi = self.toi_count as usize;
            let moved = self.order[last_toi];
            self.order[index] = moved;
            self.contact_mut(moved).manager_index = index as u32;

            // Fill the prefix hole with the last non-TOI contact.
            let back = self.order.pop().unwrap();
            if last_toi < self.order.len() {
                self.order[last_toi] = back;
                self.contact_mut(back).manager_index = last_toi as u32;
            }
        } else {
            debug_assert!(!self.contact(id).is_toi_candidate());
            let back = self.order.pop().unwrap();
            if index < self.order.len() {
                self.order[index] = back;
                self.contact_mut(back).manager_index = index as u32;
            }
        }
        debug_assert!(self.check_partition());
    }

    /// Move a contact across the partition boundary after its candidacy
    /// flag changed. O(1).
    pub(crate) fn change_candidacy(&mut self, id: u32) {
        let index = self.contact(id).manager_index;
        if self.contact(id).is_toi_candidate() {
            debug_assert!(index >= self.toi_count);
            // Swap with the first non-TOI contact and grow the prefix.
            let boundary = self.toi_count;
            let evicted = self.order[boundary as usize];
            self.order[index as usize] = evicted;
            self.contact_mut(evicted).manager_index = index;
            self.order[boundary as usize] = id;
            self.contact_mut(id).manager_index = boundary;
            self.toi_count += 1;
        } else {
            debug_assert!(index < self.toi_count);
            // Swap with the last TOI candidate and shrink the prefix.
            self.toi_count -= 1;
            let boundary = self.toi_count;
            let moved = self.order[boundary as usize];
            self.order[index as usize] = moved;
            self.contact_mut(moved).manager_index = index;
            self.order[boundary as usize] = id;
            self.contact_mut(id).manager_index = boundary;
        }
        debug_assert!(self.check_partition());
    }

    /// Partition invariant: `order[i]`'s manager index is `i`, and a contact
    /// is in the prefix iff it is a TOI candidate. Debug-only check.
    #[must_use]
    pub fn check_partition(&self) -> bool {
        for (i, &id) in self.order.iter().enumerate() {
            let c = self.contact(id);
            if c.manager_index != i as u32 {
                return false;
            }
            if ((i as u32) < self.toi_count) != c.is_toi_candidate() {
                return false;
            }
        }
        true
    }

    /// Take every thread's buffer of one kind, leaving empty buffers behind.
    pub(crate) fn take_buffers<T>(
        &mut self,
        thread_count: u32,
        pick: impl Fn(&mut PerThreadData) -> &mut Vec<T>,
    ) -> Vec<Vec<T>> {
        (0..thread_count as usize)
            .map(|t| core::mem::take(pick(self.per_thread[t].get_mut())))
            .collect()
    }
}

impl Default for ContactManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_contact(manager: &mut ContactManager, low: u32, high: u32, candidate: bool) -> u32 {
        let mut c = Contact::new(
            0,
            0,
            0,
            1,
            0,
            1,
            ProxyIdPair::new(low, high),
            (0.2, 0.2),
            (0.0, 0.0),
        );
        if candidate {
            c.flags |= Contact::FLAG_TOI_CANDIDATE;
        }
        let id = manager.alloc_contact(c);
        manager.push_contact_order(id);
        id
    }

    #[test]
    fn test_push_keeps_partition() {
        let mut m = ContactManager::new();
        let _a = make_contact(&mut m, 0, 1, false);
        let b = make_contact(&mut m, 2, 3, true);
        let _c = make_contact(&mut m, 4, 5, false);
        let d = make_contact(&mut m, 6, 7, true);

        assert_eq!(m.toi_count, 2);
        assert!(m.check_partition());
        assert!(m.order[..2].contains(&b));
        assert!(m.order[..2].contains(&d));
    }

    #[test]
    fn test_remove_from_both_partitions() {
        let mut m = ContactManager::new();
        let a = make_contact(&mut m, 0, 1, true);
        let _b = make_contact(&mut m, 2, 3, true);
        let c = make_contact(&mut m, 4, 5, false);
        let _d = make_contact(&mut m, 6, 7, false);

        m.remove_contact_order(a);
        m.free_contact(a);
        assert_eq!(m.toi_count, 1);
        assert!(m.check_partition());

        m.remove_contact_order(c);
        m.free_contact(c);
        assert_eq!(m.order.len(), 2);
        assert!(m.check_partition());
    }

    #[test]
    fn test_change_candidacy_round_trip() {
        let mut m = ContactManager::new();
        let a = make_contact(&mut m, 0, 1, false);
        let _b = make_contact(&mut m, 2, 3, true);

        m.contact_mut(a).flags |= Contact::FLAG_TOI_CANDIDATE;
        m.change_candidacy(a);
        assert_eq!(m.toi_count, 2);
        assert!(m.check_partition());

        m.contact_mut(a).flags &= !Contact::FLAG_TOI_CANDIDATE;
        m.change_candidacy(a);
        assert_eq!(m.toi_count, 1);
        assert!(m.check_partition());
    }

    #[test]
    fn test_kway_merge_orders_across_threads() {
        let lists = vec![vec![1u32, 4, 9], vec![2, 3, 10], vec![], vec![5, 6]];
        let mut out = Vec::new();
        kway_merge(lists, |v| *v, |v| out.push(v));
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 9, 10]);
    }

    #[test]
    fn test_kway_merge_tie_breaks_by_thread() {
        #[derive(Clone, Copy, Debug, PartialEq)]
        struct Rec(u32, &'static str);
        let lists = vec![vec![Rec(5, "t0")], vec![Rec(5, "t1")]];
        let mut out = Vec::new();
        kway_merge(lists, |r| r.0, |r| out.push(r.1));
        assert_eq!(out, vec!["t0", "t1"]);
    }

    #[test]
    fn test_sort_buffers() {
        let mut td = PerThreadData::default();
        td.begin_contacts.push(DeferredContactEvent {
            contact: 0,
            key: ProxyIdPair::new(9, 10),
        });
        td.begin_contacts.push(DeferredContactEvent {
            contact: 1,
            key: ProxyIdPair::new(1, 2),
        });
        td.sort_collides();
        assert_eq!(td.begin_contacts[0].key, ProxyIdPair::new(1, 2));
    }
}
