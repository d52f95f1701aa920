//! Core data model for the drive MPC: per-stage parameters, trajectory states,
//! solver input and solve diagnostics.
//!
//! Every record here has a fixed flat layout (see [`crate::layout`]) that the
//! generated solver reads and writes. Field order in the structs is the layout
//! order.

use serde::{Deserialize, Serialize};

use crate::error::LayoutError;

/// Number of stages in the planning horizon.
pub const NUM_STAGES: usize = 10;

/// Index of the terminal stage (no outgoing dynamics).
pub const TERMINAL_STAGE: usize = NUM_STAGES - 1;

/// Battery voltage the motor weights are tuned against.
pub const NOMINAL_BATTERY_VOLTAGE: f64 = 13.5;

// ---------------------------------------------------------------------------
// DriveModel
// ---------------------------------------------------------------------------

/// Physical constants of the mecanum drivetrain.
///
/// Fourteen identified constants plus the battery voltage measured for the
/// current control cycle. Read-only for the duration of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveModel {
    /// Motor torque/back-EMF constant (N·m/A).
    pub motor_constant: f64,
    /// Armature resistance (Ω).
    pub armature_resistance: f64,
    /// Robot mass (kg).
    pub robot_mass: f64,
    /// Robot moment of inertia about the vertical axis (kg·m²).
    pub robot_moment: f64,
    /// Moment of inertia of one wheel (kg·m²).
    pub wheel_moment: f64,
    /// Moment of inertia of one roller (kg·m²).
    pub roller_moment: f64,
    pub fl_wheel_friction: f64,
    pub fr_wheel_friction: f64,
    pub bl_wheel_friction: f64,
    pub br_wheel_friction: f64,
    pub fl_roller_friction: f64,
    pub fr_roller_friction: f64,
    pub bl_roller_friction: f64,
    pub br_roller_friction: f64,
    /// Battery voltage (V).
    pub battery_voltage: f64,
}

impl DriveModel {
    /// Identified constants of the competition robot at the given voltage.
    pub const fn standard(battery_voltage: f64) -> Self {
        Self {
            motor_constant: 0.3,
            armature_resistance: 1.8,
            robot_mass: 13.35,
            robot_moment: 1.19,
            wheel_moment: 0.04,
            roller_moment: 0.002,
            fl_wheel_friction: 0.256,
            fr_wheel_friction: 0.256,
            bl_wheel_friction: 0.256,
            br_wheel_friction: 0.256,
            fl_roller_friction: 20.8,
            fr_roller_friction: 20.8,
            bl_roller_friction: 20.8,
            br_roller_friction: 20.8,
            battery_voltage,
        }
    }

    /// Copy of this model with a different battery voltage.
    #[must_use]
    pub const fn with_battery_voltage(mut self, battery_voltage: f64) -> Self {
        self.battery_voltage = battery_voltage;
        self
    }

    /// Wheel friction in [fl, fr, bl, br] order.
    pub const fn wheel_friction(&self) -> [f64; 4] {
        [
            self.fl_wheel_friction,
            self.fr_wheel_friction,
            self.bl_wheel_friction,
            self.br_wheel_friction,
        ]
    }

    /// Roller friction in [fl, fr, bl, br] order.
    pub const fn roller_friction(&self) -> [f64; 4] {
        [
            self.fl_roller_friction,
            self.fr_roller_friction,
            self.bl_roller_friction,
            self.br_roller_friction,
        ]
    }

    /// True if all four wheels share the same wheel and roller friction.
    #[allow(clippy::float_cmp)]
    pub fn is_uniform_friction(&self) -> bool {
        let w = self.wheel_friction();
        let r = self.roller_friction();
        w.iter().all(|&f| f == w[0]) && r.iter().all(|&f| f == r[0])
    }
}

impl Default for DriveModel {
    fn default() -> Self {
        Self::standard(12.0)
    }
}

// ---------------------------------------------------------------------------
// TargetState
// ---------------------------------------------------------------------------

/// Desired robot state for one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    /// Desired pose: x (m), y (m), heading (rad).
    pub position: [f64; 3],
    /// Desired twist: vx (m/s), vy (m/s), angular velocity (rad/s).
    pub velocity: [f64; 3],
}

impl TargetState {
    /// Target a pose with zero desired velocity.
    pub const fn at_pose(x: f64, y: f64, heading: f64) -> Self {
        Self {
            position: [x, y, heading],
            velocity: [0.0; 3],
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectiveWeights
// ---------------------------------------------------------------------------

/// Quadratic cost weights for one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveWeights {
    /// Command effort weights in [fl, fr, bl, br] order.
    pub motor_weights: [f64; 4],
    /// Pose error weights: x, y, heading.
    pub position_weights: [f64; 3],
    /// Twist error weights: vx, vy, angular velocity.
    pub velocity_weights: [f64; 3],
}

impl ObjectiveWeights {
    /// Weights shared across wheels and linear axes.
    pub const fn uniform(
        motor: f64,
        position: f64,
        heading: f64,
        velocity: f64,
        angular_velocity: f64,
    ) -> Self {
        Self {
            motor_weights: [motor; 4],
            position_weights: [position, position, heading],
            velocity_weights: [velocity, velocity, angular_velocity],
        }
    }

    /// True if no actuation penalty is applied.
    pub fn has_zero_motor_weights(&self) -> bool {
        self.motor_weights.iter().all(|&w| w == 0.0)
    }
}

// ---------------------------------------------------------------------------
// StageParameters
// ---------------------------------------------------------------------------

/// Parameters for a single horizon stage: `[model, target, weights]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageParameters {
    pub model: DriveModel,
    pub target: TargetState,
    pub weights: ObjectiveWeights,
}

impl StageParameters {
    pub const fn new(model: DriveModel, target: TargetState, weights: ObjectiveWeights) -> Self {
        Self {
            model,
            target,
            weights,
        }
    }

    /// Set the battery voltage and rescale the motor weights by
    /// `(voltage / nominal)^2`.
    ///
    /// Command effort is a fraction of battery voltage, so the same weight
    /// penalises a fixed torque less on a flat battery unless rescaled.
    #[must_use]
    pub fn with_battery_voltage(mut self, battery_voltage: f64) -> Self {
        let adjustment = (battery_voltage / NOMINAL_BATTERY_VOLTAGE).powi(2);
        self.model.battery_voltage = battery_voltage;
        for w in &mut self.weights.motor_weights {
            *w *= adjustment;
        }
        self
    }

    /// Copy of these parameters with zero motor weights.
    #[must_use]
    pub const fn without_motor_weights(mut self) -> Self {
        self.weights.motor_weights = [0.0; 4];
        self
    }
}

// ---------------------------------------------------------------------------
// ParameterSet
// ---------------------------------------------------------------------------

/// Parameters for every stage of the horizon, in stage order.
///
/// The terminal stage never carries an actuation penalty: it has no outgoing
/// dynamics, so the constructor zeroes its motor weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "[StageParameters; NUM_STAGES]",
    into = "[StageParameters; NUM_STAGES]"
)]
pub struct ParameterSet {
    stages: [StageParameters; NUM_STAGES],
}

impl ParameterSet {
    /// Build a parameter set, zeroing the terminal stage's motor weights.
    pub fn new(mut stages: [StageParameters; NUM_STAGES]) -> Self {
        stages[TERMINAL_STAGE] = stages[TERMINAL_STAGE].without_motor_weights();
        Self { stages }
    }

    /// Use the same parameters for every stage.
    pub fn uniform(params: StageParameters) -> Self {
        Self::new([params; NUM_STAGES])
    }

    pub const fn stages(&self) -> &[StageParameters; NUM_STAGES] {
        &self.stages
    }

    /// Checked stage lookup. Indexing with `[]` panics instead.
    pub fn stage(&self, index: usize) -> Result<&StageParameters, LayoutError> {
        self.stages.get(index).ok_or(LayoutError::StageOutOfRange {
            index,
            stages: NUM_STAGES,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageParameters> {
        self.stages.iter()
    }
}

impl From<[StageParameters; NUM_STAGES]> for ParameterSet {
    fn from(stages: [StageParameters; NUM_STAGES]) -> Self {
        Self::new(stages)
    }
}

impl From<ParameterSet> for [StageParameters; NUM_STAGES] {
    fn from(set: ParameterSet) -> Self {
        set.stages
    }
}

/// Stage lookup by index.
///
/// # Panics
///
/// Panics if `i >= NUM_STAGES`. Use [`ParameterSet::stage`] for indices that
/// come from outside the crate.
impl std::ops::Index<usize> for ParameterSet {
    type Output = StageParameters;
    fn index(&self, i: usize) -> &StageParameters {
        &self.stages[i]
    }
}

// ---------------------------------------------------------------------------
// StageState
// ---------------------------------------------------------------------------

/// One stage of the solver's trajectory: `[command, position, velocity]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    /// Motor powers in [-1, 1], [fl, fr, bl, br] order.
    pub command: [f64; 4],
    /// Pose: x (m), y (m), heading (rad).
    pub position: [f64; 3],
    /// Twist: vx (m/s), vy (m/s), angular velocity (rad/s).
    pub velocity: [f64; 3],
}

impl StageState {
    pub const fn new(command: [f64; 4], position: [f64; 3], velocity: [f64; 3]) -> Self {
        Self {
            command,
            position,
            velocity,
        }
    }

    /// A state at rest at the given start state with zero command.
    pub const fn at_rest(start: &StartState) -> Self {
        Self {
            command: [0.0; 4],
            position: start.pose,
            velocity: start.twist,
        }
    }

    /// The pose/twist part of this state as a start state.
    pub const fn start_state(&self) -> StartState {
        StartState {
            pose: self.position,
            twist: self.velocity,
        }
    }
}

// ---------------------------------------------------------------------------
// StartState
// ---------------------------------------------------------------------------

/// Measured robot pose and twist at the beginning of the horizon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StartState {
    /// x (m), y (m), heading (rad).
    pub pose: [f64; 3],
    /// vx (m/s), vy (m/s), angular velocity (rad/s).
    pub twist: [f64; 3],
}

// ---------------------------------------------------------------------------
// SolverInput
// ---------------------------------------------------------------------------

/// Everything the solver needs for one control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverInput {
    /// Warm-start trajectory, one state per stage.
    pub initial_guess: [StageState; NUM_STAGES],
    /// Measured state the trajectory must start from.
    pub start: StartState,
    /// Per-stage model, targets and weights.
    pub parameters: ParameterSet,
}

impl SolverInput {
    pub const fn new(
        initial_guess: [StageState; NUM_STAGES],
        start: StartState,
        parameters: ParameterSet,
    ) -> Self {
        Self {
            initial_guess,
            start,
            parameters,
        }
    }

    /// Warm-start every stage from `previous` and begin at its pose and twist.
    pub const fn from_starting_state(previous: StageState, parameters: ParameterSet) -> Self {
        Self {
            initial_guess: [previous; NUM_STAGES],
            start: previous.start_state(),
            parameters,
        }
    }

    /// Start at rest from `start` with a zero-command warm start.
    pub const fn at_rest(start: StartState, parameters: ParameterSet) -> Self {
        Self {
            initial_guess: [StageState::at_rest(&start); NUM_STAGES],
            start,
            parameters,
        }
    }
}

// ---------------------------------------------------------------------------
// SolveDiagnostics
// ---------------------------------------------------------------------------

/// Convergence report for one solve call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveDiagnostics {
    /// Iterations performed.
    pub it: i32,
    /// Iterations needed to reach optimality (0 if not reached).
    pub it2opt: i32,
    /// Infinity norm of the equality residual.
    pub res_eq: f64,
    /// Infinity norm of the inequality residual.
    pub res_ineq: f64,
    /// Norm of the stationarity residual.
    pub rsnorm: f64,
    /// Norm of the complementarity residual.
    pub rcompnorm: f64,
    /// Primal objective.
    pub pobj: f64,
    /// Dual objective.
    pub dobj: f64,
    /// Duality gap.
    pub dgap: f64,
    /// Relative duality gap.
    pub rdgap: f64,
    /// Barrier parameter.
    pub mu: f64,
    /// Affine barrier parameter.
    pub mu_aff: f64,
    /// Centering parameter.
    pub sigma: f64,
    /// Affine line-search iterations.
    pub lsit_aff: i32,
    /// Combined line-search iterations.
    pub lsit_cc: i32,
    /// Affine step size.
    pub step_aff: f64,
    /// Combined step size.
    pub step_cc: f64,
    /// Total solve time (s).
    pub solvetime: f64,
    /// Time spent in derivative evaluation (s).
    pub fevalstime: f64,
}

// ---------------------------------------------------------------------------
// SolverOutput
// ---------------------------------------------------------------------------

/// Exit code the generated solver uses for a converged solve.
pub const EXIT_OPTIMAL: i32 = 1;

/// Result of one solve call: exit code, trajectory and diagnostics.
///
/// The exit code is reported verbatim. Callers decide what to do with a
/// non-converged cycle (discard, re-solve or fall back to a safe command).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverOutput {
    pub exit_code: i32,
    pub trajectory: [StageState; NUM_STAGES],
    pub diagnostics: SolveDiagnostics,
}

impl SolverOutput {
    /// Whether the solver reported an optimal solution.
    pub const fn converged(&self) -> bool {
        self.exit_code == EXIT_OPTIMAL
    }

    /// The command to apply for the current control cycle.
    pub const fn first_command(&self) -> [f64; 4] {
        self.trajectory[0].command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_params() -> StageParameters {
        StageParameters::new(
            DriveModel::standard(12.0),
            TargetState::at_pose(1.0, 0.0, 0.0),
            ObjectiveWeights::uniform(0.5, 1.0, 1.0, 0.0, 0.0),
        )
    }

    #[test]
    fn parameter_set_zeroes_terminal_motor_weights() {
        let set = ParameterSet::uniform(sample_params());
        assert!(set[TERMINAL_STAGE].weights.has_zero_motor_weights());
        for k in 0..TERMINAL_STAGE {
            assert_eq!(set[k].weights.motor_weights, [0.5; 4]);
        }
    }

    #[test]
    fn battery_adjustment_scales_motor_weights_only() {
        let params = sample_params().with_battery_voltage(NOMINAL_BATTERY_VOLTAGE / 2.0);
        for w in params.weights.motor_weights {
            assert_relative_eq!(w, 0.125, epsilon = 1e-12);
        }
        assert_eq!(params.weights.position_weights, [1.0, 1.0, 1.0]);
        assert_relative_eq!(params.model.battery_voltage, 6.75);
    }

    #[test]
    fn stage_lookup_out_of_range() {
        let set = ParameterSet::uniform(sample_params());
        assert!(set.stage(9).is_ok());
        assert_eq!(
            set.stage(10),
            Err(LayoutError::StageOutOfRange {
                index: 10,
                stages: NUM_STAGES
            })
        );
    }

    #[test]
    #[should_panic(expected = "index out of bounds")]
    fn indexing_past_the_horizon_panics() {
        let set = ParameterSet::uniform(sample_params());
        assert!(set[NUM_STAGES].weights.has_zero_motor_weights());
    }

    #[test]
    fn from_starting_state_copies_pose_and_twist() {
        let prev = StageState::new([0.2; 4], [1.0, 2.0, 0.5], [0.1, 0.0, -0.2]);
        let input = SolverInput::from_starting_state(prev, ParameterSet::uniform(sample_params()));
        assert_eq!(input.start.pose, [1.0, 2.0, 0.5]);
        assert_eq!(input.start.twist, [0.1, 0.0, -0.2]);
        assert!(input.initial_guess.iter().all(|s| *s == prev));
    }

    #[test]
    fn standard_model_has_uniform_friction() {
        assert!(DriveModel::standard(12.0).is_uniform_friction());
        let mut model = DriveModel::standard(12.0);
        model.br_roller_friction = 1.0;
        assert!(!model.is_uniform_friction());
    }
}
