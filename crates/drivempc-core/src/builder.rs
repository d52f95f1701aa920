//! Builders for stage parameters, parameter sets and solver inputs.

use std::io::Read;

use crate::error::ScheduleError;
use crate::schedule::read_schedule;
use crate::types::{
    DriveModel, NUM_STAGES, ObjectiveWeights, ParameterSet, SolverInput, StageParameters,
    StageState, StartState, TargetState,
};

// ---------------------------------------------------------------------------
// StageParametersBuilder
// ---------------------------------------------------------------------------

/// Incrementally configure one stage's model, target and weights.
///
/// Starts from the standard drive model with zero targets and weights.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageParametersBuilder {
    params: StageParameters,
}

impl StageParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing parameters.
    pub const fn from_parameters(params: StageParameters) -> Self {
        Self { params }
    }

    #[must_use]
    pub const fn motor_weights(mut self, weight: f64) -> Self {
        self.params.weights.motor_weights = [weight; 4];
        self
    }

    /// Weight on x and y position error.
    #[must_use]
    pub const fn linear_weights(mut self, weight: f64) -> Self {
        self.params.weights.position_weights[0] = weight;
        self.params.weights.position_weights[1] = weight;
        self
    }

    /// Weight on heading error.
    #[must_use]
    pub const fn angular_weight(mut self, weight: f64) -> Self {
        self.params.weights.position_weights[2] = weight;
        self
    }

    /// Weight on vx and vy error.
    #[must_use]
    pub const fn linear_velocity_weights(mut self, weight: f64) -> Self {
        self.params.weights.velocity_weights[0] = weight;
        self.params.weights.velocity_weights[1] = weight;
        self
    }

    /// Weight on angular velocity error.
    #[must_use]
    pub const fn angular_velocity_weight(mut self, weight: f64) -> Self {
        self.params.weights.velocity_weights[2] = weight;
        self
    }

    #[must_use]
    pub const fn target_position(mut self, x: f64, y: f64, heading: f64) -> Self {
        self.params.target.position = [x, y, heading];
        self
    }

    #[must_use]
    pub const fn target_velocity(mut self, vx: f64, vy: f64, angular: f64) -> Self {
        self.params.target.velocity = [vx, vy, angular];
        self
    }

    #[must_use]
    pub const fn drive_model(mut self, model: DriveModel) -> Self {
        self.params.model = model;
        self
    }

    #[must_use]
    pub const fn target(mut self, target: TargetState) -> Self {
        self.params.target = target;
        self
    }

    #[must_use]
    pub const fn weights(mut self, weights: ObjectiveWeights) -> Self {
        self.params.weights = weights;
        self
    }

    /// Finish with the measured battery voltage. Motor weights are rescaled
    /// for the voltage, see [`StageParameters::with_battery_voltage`].
    pub fn build(self, battery_voltage: f64) -> StageParameters {
        self.params.with_battery_voltage(battery_voltage)
    }

    /// Finish without touching the voltage or weights.
    pub const fn build_raw(self) -> StageParameters {
        self.params
    }
}

// ---------------------------------------------------------------------------
// ParameterSetBuilder
// ---------------------------------------------------------------------------

/// Assemble a [`ParameterSet`] from per-stage parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterSetBuilder {
    stages: [StageParameters; NUM_STAGES],
}

impl ParameterSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `params` for every stage.
    #[must_use]
    pub const fn fill(mut self, params: StageParameters) -> Self {
        self.stages = [params; NUM_STAGES];
        self
    }

    /// Override one stage. Indices past the horizon are ignored.
    #[must_use]
    pub fn stage(mut self, index: usize, params: StageParameters) -> Self {
        if let Some(slot) = self.stages.get_mut(index) {
            *slot = params;
        }
        self
    }

    /// Take stages from a schedule (e.g. one entry per path waypoint).
    ///
    /// Short schedules repeat their last entry to the end of the horizon; an
    /// empty schedule leaves the builder unchanged.
    #[must_use]
    pub fn from_schedule(mut self, schedule: &[StageParameters]) -> Self {
        if let Some(last) = schedule.last() {
            for (k, slot) in self.stages.iter_mut().enumerate() {
                *slot = *schedule.get(k).unwrap_or(last);
            }
        }
        self
    }

    /// Apply the battery voltage to every stage and build.
    pub fn build(self, battery_voltage: f64) -> ParameterSet {
        ParameterSet::new(self.stages.map(|p| p.with_battery_voltage(battery_voltage)))
    }

    /// Build without a battery adjustment.
    pub fn build_raw(self) -> ParameterSet {
        ParameterSet::new(self.stages)
    }
}

// ---------------------------------------------------------------------------
// SolverInputBuilder
// ---------------------------------------------------------------------------

/// Warm start used until a previous solution is available.
const DEFAULT_GUESS: StageState = StageState::new([1.0; 4], [0.0; 3], [0.0; 3]);

/// Build solver inputs by sliding a horizon window along a path schedule.
///
/// The schedule may be longer than the horizon; [`window`](Self::window)
/// picks the stages starting at a waypoint index.
#[derive(Debug, Clone)]
pub struct SolverInputBuilder {
    initial_guess: [StageState; NUM_STAGES],
    start: StartState,
    schedule: Vec<StageParameters>,
}

impl Default for SolverInputBuilder {
    fn default() -> Self {
        Self {
            initial_guess: [DEFAULT_GUESS; NUM_STAGES],
            start: StartState::default(),
            schedule: Vec::new(),
        }
    }
}

impl SolverInputBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Warm-start every stage from `guess`.
    #[must_use]
    pub const fn initial_guess(mut self, guess: StageState) -> Self {
        self.initial_guess = [guess; NUM_STAGES];
        self
    }

    #[must_use]
    pub const fn start(mut self, start: StartState) -> Self {
        self.start = start;
        self
    }

    /// Start from a localisation fix. `body_twist` is in the robot frame and
    /// is rotated into the world frame by the pose heading.
    #[must_use]
    pub fn starting_at(mut self, pose: [f64; 3], body_twist: [f64; 3]) -> Self {
        let (sin, cos) = pose[2].sin_cos();
        let [vx, vy, omega] = body_twist;
        self.start = StartState {
            pose,
            twist: [vx * cos - vy * sin, vx * sin + vy * cos, omega],
        };
        self
    }

    /// Use `params` for every stage of a horizon-length schedule.
    #[must_use]
    pub fn fill_parameters(mut self, params: StageParameters) -> Self {
        self.schedule = vec![params; NUM_STAGES];
        self
    }

    /// Override one waypoint. Indices past the schedule are ignored.
    #[must_use]
    pub fn stage_parameters(mut self, index: usize, params: StageParameters) -> Self {
        if let Some(slot) = self.schedule.get_mut(index) {
            *slot = params;
        }
        self
    }

    /// Replace the whole schedule.
    #[must_use]
    pub fn parameters(mut self, schedule: Vec<StageParameters>) -> Self {
        self.schedule = schedule;
        self
    }

    /// Replace the schedule with one parsed from CSV, see [`crate::schedule`].
    pub fn load_parameters<R: Read>(self, reader: R) -> Result<Self, ScheduleError> {
        Ok(self.parameters(read_schedule(reader)?))
    }

    pub fn schedule(&self) -> &[StageParameters] {
        &self.schedule
    }

    /// The horizon starting at waypoint `start`, at `battery_voltage`.
    ///
    /// Stages that run past the end of the schedule repeat its last
    /// waypoint, as does a `start` past the end.
    pub fn window(
        &self,
        start: usize,
        battery_voltage: f64,
    ) -> Result<ParameterSet, ScheduleError> {
        let last = self.schedule.len().checked_sub(1).ok_or(ScheduleError::Empty)?;
        Ok(ParameterSetBuilder::new()
            .from_schedule(&self.schedule[start.min(last)..])
            .build(battery_voltage))
    }

    /// Solver input for the window starting at waypoint `start`.
    pub fn build(&self, start: usize, battery_voltage: f64) -> Result<SolverInput, ScheduleError> {
        Ok(SolverInput::new(
            self.initial_guess,
            self.start,
            self.window(start, battery_voltage)?,
        ))
    }
}
