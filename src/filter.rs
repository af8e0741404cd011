//! Collision Filtering
//!
//! Category/mask bitmask filtering plus the [`ContactFilter`] trait that lets
//! users override pair acceptance. Filtering runs when the broad-phase first
//! pairs two fixtures and again when a contact is flagged for refiltering,
//! never per narrow-phase update.

use crate::fixture::Fixture;

/// Filter data attached to every fixture.
///
/// Two fixtures pass the default filter iff
/// `(a.category & b.mask) != 0 && (b.category & a.mask) != 0`, unless they
/// share a non-zero group index: a positive shared group always collides, a
/// negative shared group never collides.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterData {
    /// Which category bits this fixture belongs to.
    pub category: u16,
    /// Which categories this fixture collides with.
    pub mask: u16,
    /// Group override. Fixtures with the same positive group always collide;
    /// the same negative group never collide; zero defers to category/mask.
    pub group: i16,
}

impl FilterData {
    /// Default filter: category 1, collides with everything, no group.
    pub const DEFAULT: Self = Self {
        category: 1,
        mask: u16::MAX,
        group: 0,
    };
}

impl Default for FilterData {
    #[inline]
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// User hook deciding whether two fixtures may collide.
///
/// Implementations must be `Send + Sync`: the broad-phase pair sweep calls
/// this from worker threads.
pub trait ContactFilter: Send + Sync {
    /// Return `true` if contact calculations should be performed between the
    /// two fixtures. Only called when their fat AABBs begin to overlap or a
    /// contact is flagged for refiltering.
    fn should_collide(&self, fixture_a: &Fixture, fixture_b: &Fixture) -> bool;
}

/// The default category/mask/group filter.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultFilter;

impl ContactFilter for DefaultFilter {
    fn should_collide(&self, fixture_a: &Fixture, fixture_b: &Fixture) -> bool {
        let a = &fixture_a.filter;
        let b = &fixture_b.filter;

        if a.group == b.group && a.group != 0 {
            return a.group > 0;
        }

        (a.category & b.mask) != 0 && (b.category & a.mask) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::Fixture;
    use crate::shape::Shape;

    fn fixture_with(filter: FilterData) -> Fixture {
        let mut f = Fixture::new(Shape::circle(1.0), 0, 1.0);
        f.filter = filter;
        f
    }

    #[test]
    fn test_default_filter_collides() {
        let a = fixture_with(FilterData::DEFAULT);
        let b = fixture_with(FilterData::DEFAULT);
        assert!(DefaultFilter.should_collide(&a, &b));
    }

    #[test]
    fn test_category_mask() {
        let a = fixture_with(FilterData {
            category: 0x0002,
            mask: 0x0004,
            group: 0,
        });
        let b = fixture_with(FilterData {
            category: 0x0004,
            mask: 0x0002,
            group: 0,
        });
        let c = fixture_with(FilterData {
            category: 0x0008,
            mask: u16::MAX,
            group: 0,
        });
        assert!(DefaultFilter.should_collide(&a, &b));
        assert!(!DefaultFilter.should_collide(&a, &c));
    }

    #[test]
    fn test_group_override() {
        let mut a = fixture_with(FilterData::DEFAULT);
        let mut b = fixture_with(FilterData::DEFAULT);

        a.filter.group = 3;
        b.filter.group = 3;
        // Positive shared group collides even with disjoint masks.
        a.filter.mask = 0;
        b.filter.mask = 0;
        assert!(DefaultFilter.should_collide(&a, &b));

        a.filter.group = -5;
        b.filter.group = -5;
        a.filter.mask = u16::MAX;
        b.filter.mask = u16::MAX;
        assert!(!DefaultFilter.should_collide(&a, &b));
    }
}
