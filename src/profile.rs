//! Step Profiling
//!
//! Wall-clock stage timers filled during [`World::step`](crate::world::World::step)
//! and handed to [`TaskExecutor::step_end`](crate::executor::TaskExecutor::step_end).
//! Profile times never feed back into simulation decisions, so they do not
//! affect determinism.

use std::time::Instant;

/// Accumulated stage times for one step, in milliseconds.
#[derive(Clone, Copy, Debug, Default)]
pub struct StepProfile {
    /// Whole step.
    pub step: f32,
    /// Narrow-phase collide phase, including event merges.
    pub collide: f32,
    /// Discrete solve phase.
    pub solve: f32,
    /// Serial island traversal inside the solve phase.
    pub solve_traversal: f32,
    /// Per-island solver setup.
    pub solve_init: f32,
    /// Velocity iterations.
    pub solve_velocity: f32,
    /// Position iterations.
    pub solve_position: f32,
    /// Continuous (TOI) phase.
    pub solve_toi: f32,
    /// Broad-phase work: proxy synchronization plus pair finding.
    pub broad_phase: f32,
    /// Pair finding alone.
    pub broad_phase_find_contacts: f32,
    /// Proxy synchronization alone.
    pub broad_phase_sync_fixtures: f32,
}

impl StepProfile {
    /// Reset every stage to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Add another profile's times into this one. Used to fold per-thread
    /// solver counters into the step totals.
    pub fn accumulate(&mut self, other: &StepProfile) {
        self.solve_init += other.solve_init;
        self.solve_velocity += other.solve_velocity;
        self.solve_position += other.solve_position;
    }
}

/// Simple wall-clock timer in the style of the stage timers the pipeline
/// wraps around each phase.
#[derive(Clone, Copy, Debug)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Milliseconds since start.
    #[must_use]
    pub fn elapsed_ms(&self) -> f32 {
        self.start.elapsed().as_secs_f32() * 1000.0
    }

    /// Restart the timer.
    pub fn reset(&mut self) {
        self.start = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate_folds_solver_stages() {
        let mut total = StepProfile::default();
        let per_thread = StepProfile {
            solve_init: 1.0,
            solve_velocity: 2.0,
            solve_position: 3.0,
            ..Default::default()
        };
        total.accumulate(&per_thread);
        total.accumulate(&per_thread);
        assert_eq!(total.solve_init, 2.0);
        assert_eq!(total.solve_velocity, 4.0);
        assert_eq!(total.solve_position, 6.0);
        // Stage times outside the solver are not folded.
        assert_eq!(total.collide, 0.0);
    }

    #[test]
    fn test_timer_monotonic() {
        let t = Timer::start();
        assert!(t.elapsed_ms() >= 0.0);
    }
}
