//! Path schedules: per-waypoint targets and weights stored as CSV.
//!
//! A schedule file has a header row followed by one row per waypoint:
//!
//! ```text
//! x_desired,y_desired,theta_desired,x_vel_desired,y_vel_desired,theta_vel_desired,
//! fl_weight,fr_weight,bl_weight,br_weight,x_weight,y_weight,theta_weight,
//! x_vel_weight,y_vel_weight,theta_vel_weight
//! ```
//!
//! Columns are matched by name, so their order is free. Every row gets the
//! standard drive model; the battery voltage is applied when a window is cut
//! from the schedule (see [`crate::builder::SolverInputBuilder::window`]).

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::error::ScheduleError;
use crate::types::{DriveModel, ObjectiveWeights, StageParameters, TargetState};

/// One waypoint as it appears in a schedule file.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ScheduleRow {
    pub x_desired: f64,
    pub y_desired: f64,
    pub theta_desired: f64,
    pub x_vel_desired: f64,
    pub y_vel_desired: f64,
    pub theta_vel_desired: f64,
    pub fl_weight: f64,
    pub fr_weight: f64,
    pub bl_weight: f64,
    pub br_weight: f64,
    pub x_weight: f64,
    pub y_weight: f64,
    pub theta_weight: f64,
    pub x_vel_weight: f64,
    pub y_vel_weight: f64,
    pub theta_vel_weight: f64,
}

impl From<ScheduleRow> for StageParameters {
    fn from(row: ScheduleRow) -> Self {
        Self::new(
            DriveModel::default(),
            TargetState {
                position: [row.x_desired, row.y_desired, row.theta_desired],
                velocity: [row.x_vel_desired, row.y_vel_desired, row.theta_vel_desired],
            },
            ObjectiveWeights {
                motor_weights: [row.fl_weight, row.fr_weight, row.bl_weight, row.br_weight],
                position_weights: [row.x_weight, row.y_weight, row.theta_weight],
                velocity_weights: [row.x_vel_weight, row.y_vel_weight, row.theta_vel_weight],
            },
        )
    }
}

/// Parse a schedule from any reader.
pub fn read_schedule<R: Read>(reader: R) -> Result<Vec<StageParameters>, ScheduleError> {
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let schedule = csv
        .deserialize::<ScheduleRow>()
        .map(|row| row.map(StageParameters::from))
        .collect::<Result<Vec<_>, _>>()?;

    if schedule.is_empty() {
        return Err(ScheduleError::Empty);
    }
    Ok(schedule)
}

/// Load a schedule file.
pub fn load_schedule(path: impl AsRef<Path>) -> Result<Vec<StageParameters>, ScheduleError> {
    read_schedule(File::open(path)?)
}
