//! Contacts
//!
//! A contact exists for every fixture pair whose fat AABBs overlap. Its
//! canonical identity is the ordered broad-phase proxy-id pair `(low, high)`,
//! which is also the stable sort key for every deferred-event merge. Contacts
//! live in a free-list arena owned by the contact manager; `manager_index`
//! mirrors the contact's position in the manager's partitioned order array.

use crate::collide::{evaluate, Manifold};
use crate::fixture::{mix_friction, mix_restitution};
use crate::math::Transform;
use crate::settings::NULL_INDEX;
use crate::shape::Shape;

/// Ordered pair of broad-phase proxy ids, the canonical contact identity.
///
/// The derived lexicographic order on `(low, high)` is the merge key used to
/// make deferred-event consumption deterministic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ProxyIdPair {
    /// The smaller proxy id.
    pub low: u32,
    /// The larger proxy id.
    pub high: u32,
}

impl ProxyIdPair {
    /// Build the ordered pair from two distinct proxy ids.
    #[inline]
    #[must_use]
    pub fn new(a: u32, b: u32) -> Self {
        debug_assert_ne!(a, b);
        if a < b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }
}

/// Index links for one side of a contact in a body's contact-edge list.
/// Links are encoded edge references (`edge_ref`).
#[derive(Clone, Copy, Debug)]
pub struct ContactEdge {
    /// Previous edge reference in the body's list.
    pub prev: u32,
    /// Next edge reference in the body's list.
    pub next: u32,
}

impl Default for ContactEdge {
    fn default() -> Self {
        Self {
            prev: NULL_INDEX,
            next: NULL_INDEX,
        }
    }
}

/// Encode a (contact, side) pair as one edge reference.
#[inline]
#[must_use]
pub fn edge_ref(contact: u32, side: u32) -> u32 {
    debug_assert!(side < 2);
    (contact << 1) | side
}

/// The contact index of an edge reference.
#[inline]
#[must_use]
pub fn edge_contact(r: u32) -> u32 {
    r >> 1
}

/// The side (0 = body A, 1 = body B) of an edge reference.
#[inline]
#[must_use]
pub fn edge_side(r: u32) -> u32 {
    r & 1
}

/// A contact between two fixtures.
#[derive(Clone, Debug)]
pub struct Contact {
    /// Flag bits, see the `FLAG_*` constants.
    pub flags: u32,
    /// Fixture A index.
    pub fixture_a: u32,
    /// Fixture B index.
    pub fixture_b: u32,
    /// Shape child on fixture A.
    pub child_a: u32,
    /// Shape child on fixture B.
    pub child_b: u32,
    /// Body owning fixture A.
    pub body_a: u32,
    /// Body owning fixture B.
    pub body_b: u32,
    /// Canonical identity and deterministic sort key.
    pub proxy_ids: ProxyIdPair,
    /// Current manifold.
    pub manifold: Manifold,
    /// Cached time of impact, valid while `FLAG_TOI` is set.
    pub toi: f32,
    /// Number of TOI sub-steps applied this step.
    pub toi_count: u32,
    /// Position in the contact manager's partitioned order array.
    pub manager_index: u32,
    /// Mixed friction.
    pub friction: f32,
    /// Mixed restitution.
    pub restitution: f32,
    /// Edge links on body A's contact list.
    pub edge_a: ContactEdge,
    /// Edge links on body B's contact list.
    pub edge_b: ContactEdge,
    /// Previous contact in the world contact list.
    pub prev: u32,
    /// Next contact in the world contact list.
    pub next: u32,
}

impl Contact {
    /// Contact is part of the current island.
    pub const FLAG_ISLAND: u32 = 0x0001;
    /// The shapes are touching.
    pub const FLAG_TOUCHING: u32 = 0x0002;
    /// Contact participates in solving. Cleared by listeners to disable.
    pub const FLAG_ENABLED: u32 = 0x0004;
    /// Filters must be re-run on the next narrow-phase update.
    pub const FLAG_FILTER: u32 = 0x0008;
    /// Contact is eligible for continuous collision and lives in the TOI
    /// prefix of the contact order array.
    pub const FLAG_TOI_CANDIDATE: u32 = 0x0010;
    /// The cached `toi` value is valid.
    pub const FLAG_TOI: u32 = 0x0020;

    /// Create a contact between two fixture children.
    #[must_use]
    pub fn new(
        fixture_a: u32,
        child_a: u32,
        body_a: u32,
        fixture_b: u32,
        child_b: u32,
        body_b: u32,
        proxy_ids: ProxyIdPair,
        friction: (f32, f32),
        restitution: (f32, f32),
    ) -> Self {
        Self {
            flags: Self::FLAG_ENABLED,
            fixture_a,
            fixture_b,
            child_a,
            child_b,
            body_a,
            body_b,
            proxy_ids,
            manifold: Manifold::default(),
            toi: 1.0,
            toi_count: 0,
            manager_index: NULL_INDEX,
            friction: mix_friction(friction.0, friction.1),
            restitution: mix_restitution(restitution.0, restitution.1),
            edge_a: ContactEdge::default(),
            edge_b: ContactEdge::default(),
            prev: NULL_INDEX,
            next: NULL_INDEX,
        }
    }

    /// Are the shapes touching?
    #[inline]
    #[must_use]
    pub fn is_touching(&self) -> bool {
        self.flags & Self::FLAG_TOUCHING != 0
    }

    /// Is the contact enabled?
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.flags & Self::FLAG_ENABLED != 0
    }

    /// Enable or disable the contact. Disabling persists only until the next
    /// narrow-phase update; pre-solve listeners use it to reject a manifold.
    #[inline]
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.flags |= Self::FLAG_ENABLED;
        } else {
            self.flags &= !Self::FLAG_ENABLED;
        }
    }

    /// Is the contact in the TOI prefix?
    #[inline]
    #[must_use]
    pub fn is_toi_candidate(&self) -> bool {
        self.flags & Self::FLAG_TOI_CANDIDATE != 0
    }

    /// Request a filter re-run on the next narrow-phase update.
    #[inline]
    pub fn flag_for_filtering(&mut self) {
        self.flags |= Self::FLAG_FILTER;
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

    /// Recompute the manifold, carrying accumulated impulses across matching
    /// feature ids for warm starting. Returns the previous manifold.
    ///
    /// This is the pure narrow-phase part of a contact update; event dispatch
    /// (immediate hooks, deferred records, awakes) is the caller's concern.
    pub fn evaluate_manifold(
        &mut self,
        shape_a: &Shape,
        xf_a: &Transform,
        shape_b: &Shape,
        xf_b: &Transform,
    ) -> Manifold {
        let old_manifold = self.manifold;
        let mut new_manifold = evaluate(shape_a, xf_a, shape_b, xf_b);

        for point in &mut new_manifold.points[..new_manifold.point_count] {
            for old_point in &old_manifold.points[..old_manifold.point_count] {
                if old_point.id == point.id {
                    point.normal_impulse = old_point.normal_impulse;
                    point.tangent_impulse = old_point.tangent_impulse;
                    break;
                }
            }
        }

        self.manifold = new_manifold;
        old_manifold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    #[test]
    fn test_proxy_id_pair_ordering() {
        let p = ProxyIdPair::new(7, 3);
        assert_eq!(p.low, 3);
        assert_eq!(p.high, 7);
        assert_eq!(p, ProxyIdPair::new(3, 7));
        assert!(ProxyIdPair::new(1, 9) < ProxyIdPair::new(2, 3));
        assert!(ProxyIdPair::new(2, 3) < ProxyIdPair::new(2, 4));
    }

    #[test]
    fn test_edge_ref_round_trip() {
        let r = edge_ref(42, 1);
        assert_eq!(edge_contact(r), 42);
        assert_eq!(edge_side(r), 1);
        let r = edge_ref(42, 0);
        assert_eq!(edge_side(r), 0);
    }

    fn test_contact() -> Contact {
        Contact::new(
            0,
            0,
            0,
            1,
            0,
            1,
            ProxyIdPair::new(0, 1),
            (0.5, 0.5),
            (0.0, 0.0),
        )
    }

    #[test]
    fn test_new_contact_enabled_not_touching() {
        let c = test_contact();
        assert!(c.is_enabled());
        assert!(!c.is_touching());
        assert!(!c.is_toi_candidate());
        assert_eq!(c.toi, 1.0);
    }

    #[test]
    fn test_warm_start_impulse_carry() {
        let mut c = test_contact();
        let a = Shape::box2(1.0, 1.0);
        let b = Shape::box2(1.0, 1.0);
        let xf_a = Transform::IDENTITY;
        let xf_b = Transform::new(Vec2::new(1.9, 0.0), 0.0);

        c.evaluate_manifold(&a, &xf_a, &b, &xf_b);
        assert_eq!(c.manifold.point_count, 2);
        c.manifold.points[0].normal_impulse = 5.0;
        c.manifold.points[1].tangent_impulse = -2.0;

        // Tiny motion: same features, impulses must carry over.
        let xf_b2 = Transform::new(Vec2::new(1.899, 0.0), 0.0);
        c.evaluate_manifold(&a, &xf_a, &b, &xf_b2);
        assert_eq!(c.manifold.points[0].normal_impulse, 5.0);
        assert_eq!(c.manifold.points[1].tangent_impulse, -2.0);
    }

    #[test]
    fn test_other_body() {
        let c = test_contact();
        assert_eq!(c.other_body(0), 1);
        assert_eq!(c.other_body(1), 0);
    }
}
