//! Time of Impact
//!
//! Conservative advancement between two moving shape proxies. The sweeps must
//! already be aligned on the same `alpha0`; the returned `t` is the fraction
//! of the *remaining* interval, which the TOI loop maps back into step time.

use crate::distance::{shape_distance, DistanceInput, DistanceProxy};
use crate::math::Sweep;
use crate::settings::LINEAR_SLOP;

/// Input for [`time_of_impact`].
#[derive(Clone, Debug)]
pub struct ToiInput<'a> {
    /// Proxy for shape A.
    pub proxy_a: &'a DistanceProxy,
    /// Proxy for shape B.
    pub proxy_b: &'a DistanceProxy,
    /// Sweep of body A over the remaining interval.
    pub sweep_a: Sweep,
    /// Sweep of body B over the remaining interval.
    pub sweep_b: Sweep,
    /// Upper bound on `t`, normally 1.
    pub t_max: f32,
}

/// Classification of a TOI query result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToiState {
    /// Shapes already overlap deeper than the target separation at `t = 0`.
    Overlapped,
    /// Shapes reach the target separation at the reported `t`.
    Touching,
    /// Shapes never come within the target separation before `t_max`.
    Separated,
    /// The advancement loop failed to converge.
    Failed,
}

/// Output of [`time_of_impact`].
#[derive(Clone, Copy, Debug)]
pub struct ToiOutput {
    /// Result classification.
    pub state: ToiState,
    /// Impact time in `[0, t_max]` (meaningful for `Touching`).
    pub t: f32,
}

const MAX_ADVANCE_ITERATIONS: u32 = 32;

/// Compute the first time in `[0, t_max]` at which the two shells come
/// within the target separation, by conservative advancement: at each step
/// the current separation is divided by an upper bound on the approach speed
/// to obtain a safe advance.
#[must_use]
pub fn time_of_impact(input: &ToiInput<'_>) -> ToiOutput {
    let mut sweep_a = input.sweep_a;
    let mut sweep_b = input.sweep_b;
    sweep_a.normalize();
    sweep_b.normalize();

    let t_max = input.t_max;

    let total_radius = input.proxy_a.radius + input.proxy_b.radius;
    let target = (total_radius - 3.0 * LINEAR_SLOP).max(LINEAR_SLOP);
    let tolerance = 0.25 * LINEAR_SLOP;
    debug_assert!(target > tolerance);

    // Upper bound on approach speed per unit of sweep time: relative linear
    // motion plus the angular sweep of the farthest support point on each
    // shape.
    let angular_bound_a = angular_radius(input.proxy_a, &sweep_a) * (sweep_a.a - sweep_a.a0).abs();
    let angular_bound_b = angular_radius(input.proxy_b, &sweep_b) * (sweep_b.a - sweep_b.a0).abs();
    let linear_bound = ((sweep_b.c - sweep_b.c0) - (sweep_a.c - sweep_a.c0)).length();
    let bound = linear_bound + angular_bound_a + angular_bound_b;

    let mut t = 0.0;
    for _ in 0..MAX_ADVANCE_ITERATIONS {
        let xf_a = sweep_a.transform_at(t);
        let xf_b = sweep_b.transform_at(t);

        let output = shape_distance(&DistanceInput {
            proxy_a: input.proxy_a,
            proxy_b: input.proxy_b,
            xf_a,
            xf_b,
            use_radii: false,
        });
        // Hull distance relative to the target separation. The target sits
        // slightly inside the summed shell radii so the narrow phase still
        // finds a manifold at the impact pose.
        let gap = output.distance - target;

        if gap < tolerance {
            if t == 0.0 && output.distance < target - tolerance {
                return ToiOutput {
                    state: ToiState::Overlapped,
                    t: 0.0,
                };
            }
            return ToiOutput {
                state: ToiState::Touching,
                t,
            };
        }

        if bound < f32::EPSILON {
            // No relative motion: never touches.
            return ToiOutput {
                state: ToiState::Separated,
                t: t_max,
            };
        }

        t += gap / bound;
        if t >= t_max {
            return ToiOutput {
                state: ToiState::Separated,
                t: t_max,
            };
        }
    }

    ToiOutput {
        state: ToiState::Failed,
        t,
    }
}

/// Farthest support-point distance from the sweep's center of mass.
fn angular_radius(proxy: &DistanceProxy, sweep: &Sweep) -> f32 {
    let mut r: f32 = 0.0;
    for v in &proxy.vertices {
        r = r.max((*v - sweep.local_center).length());
    }
    r + proxy.radius
}
