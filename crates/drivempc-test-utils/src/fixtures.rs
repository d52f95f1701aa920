//! Deterministic scenarios.

use drivempc_core::types::{
    DriveModel, NUM_STAGES, ObjectiveWeights, ParameterSet, SolverInput, StageParameters,
    StageState, StartState, TargetState,
};

/// Drive one metre forward: unit position weights, no motor or velocity
/// penalty.
pub fn nominal_stage_parameters() -> StageParameters {
    StageParameters::new(
        DriveModel::default(),
        TargetState::at_pose(1.0, 0.0, 0.0),
        ObjectiveWeights {
            motor_weights: [0.0; 4],
            position_weights: [1.0; 3],
            velocity_weights: [0.0; 3],
        },
    )
}

/// The nominal stage repeated over the horizon (terminal motor weights zero).
pub fn nominal_parameter_set() -> ParameterSet {
    ParameterSet::uniform(nominal_stage_parameters())
}

/// Nominal parameters, starting at rest at the origin.
pub fn nominal_input() -> SolverInput {
    SolverInput::at_rest(StartState::default(), nominal_parameter_set())
}

/// A trajectory with distinct, non-trivial values in every field.
pub fn sample_trajectory() -> [StageState; NUM_STAGES] {
    std::array::from_fn(|k| {
        let t = k as f64 * 0.1;
        StageState::new(
            [0.5 - t, 0.4, -0.3 + t, 0.2],
            [t * t, 0.1 * t, 0.05 * k as f64],
            [2.0 * t, -0.1, 0.3 - t],
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nominal_terminal_stage_has_no_motor_weights() {
        let set = nominal_parameter_set();
        assert!(set.stages()[NUM_STAGES - 1].weights.has_zero_motor_weights());
        assert_eq!(set.stages()[0].weights.position_weights, [1.0; 3]);
    }

    #[test]
    fn nominal_input_starts_at_rest() {
        let input = nominal_input();
        assert!(input
            .initial_guess
            .iter()
            .all(|s| s.command == [0.0; 4] && s.velocity == [0.0; 3]));
    }
}
