//! Integration test: a straight-line path schedule loaded from disk and
//! windowed into solver inputs.

use std::fs::File;
use std::path::PathBuf;

use approx::assert_relative_eq;
use drivempc_core::prelude::*;
use drivempc_core::{NOMINAL_BATTERY_VOLTAGE, TERMINAL_STAGE, load_schedule};

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/straight_line.csv")
}

#[test]
fn fixture_loads_every_waypoint() {
    let schedule = load_schedule(fixture()).unwrap();
    assert_eq!(schedule.len(), 14);

    let third = schedule[3];
    assert_relative_eq!(third.target.position[0], 0.3);
    assert_relative_eq!(third.target.position[2], 0.15);
    assert_eq!(third.target.velocity, [0.5, 0.0, 0.0]);
    assert_eq!(third.weights.motor_weights, [0.01; 4]);
    assert_eq!(third.weights.position_weights, [2.7, 2.7, 0.5]);
    assert_eq!(third.weights.velocity_weights, [0.1; 3]);
    assert_eq!(third.model, DriveModel::default());

    assert_eq!(schedule[13].target.velocity, [0.0; 3]);
}

#[test]
fn windows_follow_the_path() {
    let builder = SolverInputBuilder::new()
        .load_parameters(File::open(fixture()).unwrap())
        .unwrap()
        .starting_at([0.2, 0.0, 0.1], [0.5, 0.0, 0.0]);

    let input = builder.build(2, NOMINAL_BATTERY_VOLTAGE).unwrap();
    for k in 0..NUM_STAGES {
        assert_relative_eq!(
            input.parameters[k].target.position[0],
            0.1 * (k + 2) as f64,
            epsilon = 1e-12
        );
    }
    assert!(input.parameters[TERMINAL_STAGE].weights.has_zero_motor_weights());
    assert_eq!(input.start.pose, [0.2, 0.0, 0.1]);

    // Four waypoints from the end: the last one fills the rest of the horizon.
    let tail = builder.build(10, NOMINAL_BATTERY_VOLTAGE).unwrap();
    assert_relative_eq!(tail.parameters[3].target.position[0], 1.3);
    for k in 4..NUM_STAGES {
        assert_eq!(tail.parameters[k].target, tail.parameters[3].target);
    }
}

#[test]
fn windowed_input_fits_the_flat_layout() {
    let input = SolverInputBuilder::new()
        .load_parameters(File::open(fixture()).unwrap())
        .unwrap()
        .build(5, 12.5)
        .unwrap();

    let mut flat = vec![0.0; SolverInput::LEN];
    input.write_flat(&mut flat).unwrap();
    assert_eq!(SolverInput::read_flat(&flat).unwrap(), input);
}
