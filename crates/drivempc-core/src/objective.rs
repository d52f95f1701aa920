//! Host-side evaluation of the tracking cost.
//!
//! Mirrors the cost the generated evaluators hand to the solver, so callers
//! can score a returned trajectory without going through the solver.

use crate::types::{NUM_STAGES, StageParameters, StageState};

/// Weighted squared tracking error of one stage.
///
/// Commands are penalised against zero, pose and twist against the target.
pub fn stage_objective(params: &StageParameters, state: &StageState) -> f64 {
    let w = &params.weights;
    let t = &params.target;

    let motor: f64 = w
        .motor_weights
        .iter()
        .zip(&state.command)
        .map(|(w, u)| w * u * u)
        .sum();
    let position: f64 = (0..3)
        .map(|i| w.position_weights[i] * (t.position[i] - state.position[i]).powi(2))
        .sum();
    let velocity: f64 = (0..3)
        .map(|i| w.velocity_weights[i] * (t.velocity[i] - state.velocity[i]).powi(2))
        .sum();

    motor + position + velocity
}

/// Total tracking cost of a trajectory, summed over the horizon.
pub fn total_objective<'a>(
    params: impl IntoIterator<Item = &'a StageParameters>,
    trajectory: &[StageState; NUM_STAGES],
) -> f64 {
    params
        .into_iter()
        .zip(trajectory)
        .map(|(p, s)| stage_objective(p, s))
        .sum()
}
