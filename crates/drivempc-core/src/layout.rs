//! Flat `f64` layouts shared with the generated solver.
//!
//! The solver's parameter and output structures are plain arrays of doubles.
//! Each record type implements [`FlatLayout`] with a fixed field order:
//!
//! | record           | len | order                                                    |
//! |------------------|-----|----------------------------------------------------------|
//! | `DriveModel`     | 15  | motor_constant .. br_roller_friction, battery_voltage    |
//! | `TargetState`    | 6   | position[3], velocity[3]                                 |
//! | `ObjectiveWeights` | 10 | motor_weights[4], position_weights[3], velocity_weights[3] |
//! | `StageParameters`| 31  | model, target, weights                                   |
//! | `StageState`     | 10  | command[4], position[3], velocity[3]                     |
//! | `StartState`     | 6   | pose[3], twist[3]                                        |
//! | `ParameterSet`   | 310 | stage 0 .. stage 9                                       |
//! | trajectory       | 100 | stage 0 .. stage 9                                       |
//! | `SolverInput`    | 416 | initial_guess (100), start (6), parameters (310)         |
//!
//! Conversions copy values one by one, so a round trip is bit-exact.

use crate::error::LayoutError;
use crate::types::{
    DriveModel, NUM_STAGES, ObjectiveWeights, ParameterSet, SolverInput, StageParameters,
    StageState, StartState, TargetState,
};

pub const DRIVE_MODEL_LEN: usize = 15;
pub const TARGET_STATE_LEN: usize = 6;
pub const OBJECTIVE_WEIGHTS_LEN: usize = 10;
pub const STAGE_PARAMETERS_LEN: usize = DRIVE_MODEL_LEN + TARGET_STATE_LEN + OBJECTIVE_WEIGHTS_LEN;
pub const STAGE_STATE_LEN: usize = 10;
pub const START_STATE_LEN: usize = 6;
pub const PARAMETER_SET_LEN: usize = STAGE_PARAMETERS_LEN * NUM_STAGES;
pub const TRAJECTORY_LEN: usize = STAGE_STATE_LEN * NUM_STAGES;
pub const SOLVER_INPUT_LEN: usize = TRAJECTORY_LEN + START_STATE_LEN + PARAMETER_SET_LEN;

/// Offset of the start state inside the flat solver input.
pub const START_STATE_OFFSET: usize = TRAJECTORY_LEN;
/// Offset of the parameter set inside the flat solver input.
pub const PARAMETER_SET_OFFSET: usize = TRAJECTORY_LEN + START_STATE_LEN;

// Offsets inside a stage parameter block, used by evaluators reading `p`.
pub const MODEL_OFFSET: usize = 0;
pub const TARGET_OFFSET: usize = DRIVE_MODEL_LEN;
pub const WEIGHTS_OFFSET: usize = DRIVE_MODEL_LEN + TARGET_STATE_LEN;

// Offsets inside a stage state block.
pub const COMMAND_OFFSET: usize = 0;
pub const POSITION_OFFSET: usize = 4;
pub const VELOCITY_OFFSET: usize = 7;

// ---------------------------------------------------------------------------
// FlatLayout
// ---------------------------------------------------------------------------

/// A record with a fixed flat `f64` layout.
pub trait FlatLayout: Sized {
    /// Number of doubles in the flat form.
    const LEN: usize;
    /// Name used in length-mismatch errors.
    const NAME: &'static str;

    /// Write into a buffer of exactly `LEN` doubles.
    fn write_fields(&self, out: &mut Writer<'_>);

    /// Read from a buffer of exactly `LEN` doubles.
    fn read_fields(src: &mut Reader<'_>) -> Self;

    /// Serialize into `out`, which must hold exactly `LEN` doubles.
    fn write_flat(&self, out: &mut [f64]) -> Result<(), LayoutError> {
        check_len(Self::NAME, Self::LEN, out.len())?;
        self.write_fields(&mut Writer::new(out));
        Ok(())
    }

    /// Deserialize from `src`, which must hold exactly `LEN` doubles.
    fn read_flat(src: &[f64]) -> Result<Self, LayoutError> {
        check_len(Self::NAME, Self::LEN, src.len())?;
        Ok(Self::read_fields(&mut Reader::new(src)))
    }

    /// Serialize into a freshly allocated vector.
    fn to_flat(&self) -> Vec<f64> {
        let mut out = vec![0.0; Self::LEN];
        self.write_fields(&mut Writer::new(&mut out));
        out
    }
}

const fn check_len(what: &'static str, expected: usize, got: usize) -> Result<(), LayoutError> {
    if expected == got {
        Ok(())
    } else {
        Err(LayoutError::LengthMismatch {
            what,
            expected,
            got,
        })
    }
}

/// Sequential writer over a flat buffer.
pub struct Writer<'a> {
    buf: &'a mut [f64],
    pos: usize,
}

impl<'a> Writer<'a> {
    const fn new(buf: &'a mut [f64]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn put(&mut self, values: &[f64]) {
        self.buf[self.pos..self.pos + values.len()].copy_from_slice(values);
        self.pos += values.len();
    }

    pub fn put_record<T: FlatLayout>(&mut self, record: &T) {
        record.write_fields(self);
    }
}

/// Sequential reader over a flat buffer.
pub struct Reader<'a> {
    buf: &'a [f64],
    pos: usize,
}

impl<'a> Reader<'a> {
    const fn new(buf: &'a [f64]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn take<const N: usize>(&mut self) -> [f64; N] {
        let mut out = [0.0; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    pub fn take_record<T: FlatLayout>(&mut self) -> T {
        T::read_fields(self)
    }
}

// ---------------------------------------------------------------------------
// Record layouts
// ---------------------------------------------------------------------------

impl FlatLayout for DriveModel {
    const LEN: usize = DRIVE_MODEL_LEN;
    const NAME: &'static str = "drive model";

    fn write_fields(&self, out: &mut Writer<'_>) {
        out.put(&[
            self.motor_constant,
            self.armature_resistance,
            self.robot_mass,
            self.robot_moment,
            self.wheel_moment,
            self.roller_moment,
            self.fl_wheel_friction,
            self.fr_wheel_friction,
            self.bl_wheel_friction,
            self.br_wheel_friction,
            self.fl_roller_friction,
            self.fr_roller_friction,
            self.bl_roller_friction,
            self.br_roller_friction,
            self.battery_voltage,
        ]);
    }

    fn read_fields(src: &mut Reader<'_>) -> Self {
        let [
            motor_constant,
            armature_resistance,
            robot_mass,
            robot_moment,
            wheel_moment,
            roller_moment,
            fl_wheel_friction,
            fr_wheel_friction,
            bl_wheel_friction,
            br_wheel_friction,
            fl_roller_friction,
            fr_roller_friction,
            bl_roller_friction,
            br_roller_friction,
            battery_voltage,
        ] = src.take::<DRIVE_MODEL_LEN>();
        Self {
            motor_constant,
            armature_resistance,
            robot_mass,
            robot_moment,
            wheel_moment,
            roller_moment,
            fl_wheel_friction,
            fr_wheel_friction,
            bl_wheel_friction,
            br_wheel_friction,
            fl_roller_friction,
            fr_roller_friction,
            bl_roller_friction,
            br_roller_friction,
            battery_voltage,
        }
    }
}

impl FlatLayout for TargetState {
    const LEN: usize = TARGET_STATE_LEN;
    const NAME: &'static str = "target state";

    fn write_fields(&self, out: &mut Writer<'_>) {
        out.put(&self.position);
        out.put(&self.velocity);
    }

    fn read_fields(src: &mut Reader<'_>) -> Self {
        Self {
            position: src.take(),
            velocity: src.take(),
        }
    }
}

impl FlatLayout for ObjectiveWeights {
    const LEN: usize = OBJECTIVE_WEIGHTS_LEN;
    const NAME: &'static str = "objective weights";

    fn write_fields(&self, out: &mut Writer<'_>) {
        out.put(&self.motor_weights);
        out.put(&self.position_weights);
        out.put(&self.velocity_weights);
    }

    fn read_fields(src: &mut Reader<'_>) -> Self {
        Self {
            motor_weights: src.take(),
            position_weights: src.take(),
            velocity_weights: src.take(),
        }
    }
}

impl FlatLayout for StageParameters {
    const LEN: usize = STAGE_PARAMETERS_LEN;
    const NAME: &'static str = "stage parameter";

    fn write_fields(&self, out: &mut Writer<'_>) {
        out.put_record(&self.model);
        out.put_record(&self.target);
        out.put_record(&self.weights);
    }

    fn read_fields(src: &mut Reader<'_>) -> Self {
        Self {
            model: src.take_record(),
            target: src.take_record(),
            weights: src.take_record(),
        }
    }
}

impl FlatLayout for StageState {
    const LEN: usize = STAGE_STATE_LEN;
    const NAME: &'static str = "stage state";

    fn write_fields(&self, out: &mut Writer<'_>) {
        out.put(&self.command);
        out.put(&self.position);
        out.put(&self.velocity);
    }

    fn read_fields(src: &mut Reader<'_>) -> Self {
        Self {
            command: src.take(),
            position: src.take(),
            velocity: src.take(),
        }
    }
}

impl FlatLayout for StartState {
    const LEN: usize = START_STATE_LEN;
    const NAME: &'static str = "start state";

    fn write_fields(&self, out: &mut Writer<'_>) {
        out.put(&self.pose);
        out.put(&self.twist);
    }

    fn read_fields(src: &mut Reader<'_>) -> Self {
        Self {
            pose: src.take(),
            twist: src.take(),
        }
    }
}

impl FlatLayout for ParameterSet {
    const LEN: usize = PARAMETER_SET_LEN;
    const NAME: &'static str = "parameter set";

    fn write_fields(&self, out: &mut Writer<'_>) {
        for stage in self.iter() {
            out.put_record(stage);
        }
    }

    fn read_fields(src: &mut Reader<'_>) -> Self {
        Self::new(std::array::from_fn(|_| src.take_record()))
    }
}

impl FlatLayout for [StageState; NUM_STAGES] {
    const LEN: usize = TRAJECTORY_LEN;
    const NAME: &'static str = "trajectory";

    fn write_fields(&self, out: &mut Writer<'_>) {
        for state in self {
            out.put_record(state);
        }
    }

    fn read_fields(src: &mut Reader<'_>) -> Self {
        std::array::from_fn(|_| src.take_record())
    }
}

impl FlatLayout for SolverInput {
    const LEN: usize = SOLVER_INPUT_LEN;
    const NAME: &'static str = "solver input";

    fn write_fields(&self, out: &mut Writer<'_>) {
        out.put_record(&self.initial_guess);
        out.put_record(&self.start);
        out.put_record(&self.parameters);
    }

    fn read_fields(src: &mut Reader<'_>) -> Self {
        Self {
            initial_guess: src.take_record(),
            start: src.take_record(),
            parameters: src.take_record(),
        }
    }
}
