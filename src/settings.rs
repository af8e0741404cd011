//! Engine-Wide Constants and Tuning Values
//!
//! Compile-time limits for the task executor and the step pipeline, plus the
//! usual collision/solver tolerances. All distances are in meters, angles in
//! radians, time in seconds.

/// Sentinel index meaning "no element" in all index-linked structures.
pub const NULL_INDEX: u32 = u32::MAX;

// ============================================================================
// Threading limits
// ============================================================================

/// Maximum number of threads that can participate in a step, including the
/// thread that calls [`World::step`](crate::world::World::step) (thread id 0).
pub const MAX_THREADS: usize = 32;

/// Maximum number of worker threads owned by the thread pool. One less than
/// [`MAX_THREADS`] because the stepping thread also executes tasks.
pub const MAX_THREAD_POOL_THREADS: usize = MAX_THREADS - 1;

/// Maximum number of task groups that can be live at the same time.
pub const MAX_CONCURRENT_TASK_GROUPS: usize = 8;

/// Maximum number of sub-ranges produced by a single range partition, and
/// therefore the maximum number of range tasks per submission.
pub const PARTITION_RANGE_MAX_OUTPUT: usize = 32;

/// Minimum number of items in a partitioned sub-range. Ranges smaller than
/// this are not worth the submission overhead.
pub const PARTITION_RANGE_MIN_SIZE: u32 = 16;

/// A solve task is submitted once its accumulated cost reaches this target.
pub const SOLVE_BATCH_TARGET_COST: u32 = 512;

/// A solve task is submitted once it holds this many bodies, regardless of
/// its accumulated cost.
pub const SOLVE_BATCH_TARGET_BODY_COUNT: u32 = 128;

/// Cache line size used to pad per-thread data.
pub const CACHE_LINE_SIZE: usize = 64;

// ============================================================================
// Continuous collision limits
// ============================================================================

/// Maximum number of contacts in a TOI island.
pub const MAX_TOI_CONTACTS: usize = 32;

/// Maximum number of TOI sub-steps applied to one contact per step.
pub const MAX_SUB_STEPS: u32 = 8;

// ============================================================================
// Collision tolerances
// ============================================================================

/// Maximum number of contact points in a manifold.
pub const MAX_MANIFOLD_POINTS: usize = 2;

/// Maximum number of vertices in a polygon shape.
pub const MAX_POLYGON_VERTICES: usize = 8;

/// Fat AABB margin added around shapes in the broad-phase so small motions
/// do not require tree updates.
pub const AABB_EXTENSION: f32 = 0.1;

/// Fat AABBs are predictively extended along the displacement by this factor.
pub const AABB_MULTIPLIER: f32 = 2.0;

/// Collision/constraint slop. Bodies are allowed to overlap by this amount.
pub const LINEAR_SLOP: f32 = 0.005;

/// Angular equivalent of [`LINEAR_SLOP`].
pub const ANGULAR_SLOP: f32 = 2.0 / 180.0 * core::f32::consts::PI;

/// Shell thickness around polygon shapes, used to keep polygons slightly
/// rounded for the distance/TOI routines.
pub const POLYGON_RADIUS: f32 = 2.0 * LINEAR_SLOP;

// ============================================================================
// Solver tuning
// ============================================================================

/// Relative velocity below which restitution is not applied.
pub const VELOCITY_THRESHOLD: f32 = 1.0;

/// Maximum position correction applied per position iteration.
pub const MAX_LINEAR_CORRECTION: f32 = 0.2;

/// Maximum translation of a body per step. Limits solver blow-ups.
pub const MAX_TRANSLATION: f32 = 2.0;

/// Squared [`MAX_TRANSLATION`].
pub const MAX_TRANSLATION_SQUARED: f32 = MAX_TRANSLATION * MAX_TRANSLATION;

/// Maximum rotation of a body per step.
pub const MAX_ROTATION: f32 = 0.5 * core::f32::consts::PI;

/// Squared [`MAX_ROTATION`].
pub const MAX_ROTATION_SQUARED: f32 = MAX_ROTATION * MAX_ROTATION;

/// Baumgarte factor for discrete position correction.
pub const BAUMGARTE: f32 = 0.2;

/// Baumgarte factor for TOI position correction.
pub const TOI_BAUMGARTE: f32 = 0.75;

// ============================================================================
// Sleeping
// ============================================================================

/// Time a body must be below the sleep tolerances before it may sleep.
pub const TIME_TO_SLEEP: f32 = 0.5;

/// Linear velocity sleep tolerance.
pub const LINEAR_SLEEP_TOLERANCE: f32 = 0.01;

/// Angular velocity sleep tolerance.
pub const ANGULAR_SLEEP_TOLERANCE: f32 = 2.0 / 180.0 * core::f32::consts::PI;

/// Estimated cost of solving one island, used to batch small islands into
/// one solve task. Weights approximate per-iteration solver cost.
#[inline]
#[must_use]
pub const fn island_cost(body_count: u32, contact_count: u32, joint_count: u32) -> u32 {
    body_count + 2 * contact_count + 2 * joint_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_island_cost_monotone() {
        let base = island_cost(10, 5, 2);
        assert!(island_cost(11, 5, 2) > base);
        assert!(island_cost(10, 6, 2) > base);
        assert!(island_cost(10, 5, 3) > base);
    }

    #[test]
    fn test_thread_limits_consistent() {
        assert_eq!(MAX_THREAD_POOL_THREADS + 1, MAX_THREADS);
        assert!(PARTITION_RANGE_MAX_OUTPUT >= MAX_THREADS);
    }
}
