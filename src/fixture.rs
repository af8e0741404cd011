//! Fixtures
//!
//! A fixture binds one collidable shape to a body, with surface material
//! properties, a sensor flag, and filter data. Each shape child owns one
//! broad-phase proxy whose fat AABB is registered in the tree.

use crate::filter::FilterData;
use crate::math::Aabb;
use crate::settings::NULL_INDEX;
use crate::shape::Shape;

/// Definition used to construct a fixture.
#[derive(Clone, Debug)]
pub struct FixtureDef {
    /// Collision shape, copied into the fixture.
    pub shape: Shape,
    /// Mass density in kg/m^2.
    pub density: f32,
    /// Coulomb friction coefficient.
    pub friction: f32,
    /// Restitution (bounciness).
    pub restitution: f32,
    /// Sensors detect overlap but produce no collision response.
    pub sensor: bool,
    /// Collision filter data.
    pub filter: FilterData,
}

impl FixtureDef {
    /// Definition with default material values for the given shape.
    #[must_use]
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            density: 0.0,
            friction: 0.2,
            restitution: 0.0,
            sensor: false,
            filter: FilterData::DEFAULT,
        }
    }
}

/// One broad-phase entry for one child of a fixture's shape.
#[derive(Clone, Copy, Debug)]
pub struct FixtureProxy {
    /// Tight swept AABB computed during fixture synchronization.
    pub aabb: Aabb,
    /// Broad-phase proxy id, unique for the proxy's lifetime.
    pub proxy_id: u32,
    /// Child index within the shape.
    pub child_index: u32,
}

/// A fixture: one collidable child of a body.
#[derive(Clone, Debug)]
pub struct Fixture {
    /// The shape, owned by the fixture.
    pub shape: Shape,
    /// Owning body index.
    pub body: u32,
    /// Next fixture on the body (fixture index).
    pub next: u32,
    /// Friction coefficient.
    pub friction: f32,
    /// Restitution.
    pub restitution: f32,
    /// Density.
    pub density: f32,
    /// Is this a sensor?
    pub sensor: bool,
    /// Filter data.
    pub filter: FilterData,
    /// Broad-phase proxies, one per shape child.
    pub proxies: Vec<FixtureProxy>,
}

impl Fixture {
    /// Create a fixture with default material values.
    #[must_use]
    pub fn new(shape: Shape, body: u32, density: f32) -> Self {
        Self {
            shape,
            body,
            next: NULL_INDEX,
            friction: 0.2,
            restitution: 0.0,
            density,
            sensor: false,
            filter: FilterData::DEFAULT,
            proxies: Vec::new(),
        }
    }

    /// Create a fixture from a definition.
    #[must_use]
    pub fn from_def(def: &FixtureDef, body: u32) -> Self {
        Self {
            shape: def.shape.clone(),
            body,
            next: NULL_INDEX,
            friction: def.friction,
            restitution: def.restitution,
            density: def.density,
            sensor: def.sensor,
            filter: def.filter,
            proxies: Vec::new(),
        }
    }

    /// Is this fixture a sensor?
    #[inline]
    #[must_use]
    pub fn is_sensor(&self) -> bool {
        self.sensor
    }
}

/// Mixed friction of two fixtures (geometric mean).
#[inline]
#[must_use]
pub fn mix_friction(friction_a: f32, friction_b: f32) -> f32 {
    (friction_a * friction_b).sqrt()
}

/// Mixed restitution of two fixtures (maximum, so a bouncy ball bounces off
/// anything).
#[inline]
#[must_use]
pub fn mix_restitution(restitution_a: f32, restitution_b: f32) -> f32 {
    restitution_a.max(restitution_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_def_copies_material() {
        let mut def = FixtureDef::new(Shape::circle(1.0));
        def.friction = 0.9;
        def.restitution = 0.4;
        def.sensor = true;
        let f = Fixture::from_def(&def, 3);
        assert_eq!(f.friction, 0.9);
        assert_eq!(f.restitution, 0.4);
        assert!(f.is_sensor());
        assert_eq!(f.body, 3);
        assert_eq!(f.next, NULL_INDEX);
    }

    #[test]
    fn test_mixing_rules() {
        assert!((mix_friction(0.4, 0.9) - (0.36f32).sqrt()).abs() < 1e-6);
        assert_eq!(mix_restitution(0.2, 0.7), 0.7);
    }
}
