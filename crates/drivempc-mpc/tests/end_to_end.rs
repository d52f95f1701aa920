//! Integration test: the nominal drive scenario through the reference engine.
//!
//! Starting at rest at the origin with target pose (1, 0, 0), unit position
//! weights and no motor or velocity penalty, the solve must converge and
//! return ten stage states that move toward the target.

use drivempc_core::config::MpcConfig;
use drivempc_core::types::{NUM_STAGES, StageState};
use drivempc_core::total_objective;
use drivempc_mpc::{SharedSession, SolverSession};
use drivempc_test_utils::{nominal_input, nominal_parameter_set};

#[test]
fn nominal_scenario_converges() {
    let mut session = SolverSession::from_config(&MpcConfig::default()).unwrap();
    let out = session.solve(&nominal_input()).unwrap();

    assert_eq!(out.exit_code, 1, "diagnostics: {:?}", out.diagnostics);
    assert!(out.converged());
    assert_eq!(out.trajectory.len(), NUM_STAGES);
    assert!(out.diagnostics.it >= 1);
    assert_eq!(out.diagnostics.it2opt, out.diagnostics.it);
    assert!(out.diagnostics.res_eq < 1e-6);
    assert!(out.diagnostics.solvetime > 0.0);
}

#[test]
fn nominal_trajectory_heads_for_the_target() {
    let mut session = SolverSession::from_config(&MpcConfig::default()).unwrap();
    let input = nominal_input();
    let out = session.solve(&input).unwrap();

    let start = out.trajectory[0];
    assert!(start.position.iter().all(|v| v.abs() < 1e-6));
    assert!(start.velocity.iter().all(|v| v.abs() < 1e-6));

    let last = out.trajectory[NUM_STAGES - 1];
    assert!(last.position[0] > 0.1, "final x = {}", last.position[0]);
    assert!(last.position[1].abs() < 1e-3);
    assert!(last.position[2].abs() < 1e-3);

    for state in &out.trajectory {
        assert!(state.command.iter().all(|u| u.abs() <= 1.0 + 1e-6));
    }

    let resting = total_objective(nominal_parameter_set().iter(), &[StageState::default(); NUM_STAGES]);
    let solved = total_objective(nominal_parameter_set().iter(), &out.trajectory);
    assert!(solved < resting);
}

#[test]
fn repeated_solves_reuse_the_session() {
    let shared = SharedSession::new(SolverSession::from_config(&MpcConfig::default()).unwrap());
    let first = shared.solve(&nominal_input()).unwrap();
    let second = shared.solve(&nominal_input()).unwrap();
    assert_eq!(first.exit_code, second.exit_code);
    assert_eq!(first.trajectory, second.trajectory);
}
