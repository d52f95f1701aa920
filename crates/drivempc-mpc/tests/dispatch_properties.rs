//! Integration test: dispatcher behaviour as seen from an engine.
//!
//! A scripted engine sweeps the callback over every stage (and one stage
//! past the horizon) with all buffers requested and pre-filled, and checks:
//! 1. Running stages fill `c` and `nabla_c`; the terminal stage never does
//! 2. Positions outside a sparsity pattern keep the caller's values
//! 3. The running objective grows by exactly the stage cost
//! 4. Buffer-size violations surface as errors from `solve`

use approx::assert_relative_eq;
use drivempc_core::config::IntegrationConfig;
use drivempc_core::layout::FlatLayout;
use drivempc_core::types::{SolverInput, StartState};
use drivempc_core::{ParameterSet, total_objective};
use drivempc_mpc::evaluators::DYNAMICS_JACOBIAN_SPARSITY;
use drivempc_mpc::{
    MecanumGeometry, MpcError, SolverDims, SolverSession, SparseError, SparsityDescriptor,
    StageDispatcher,
};
use drivempc_test_utils::{
    ConstantObjective, PatternDynamics, SweepSolver, nominal_parameter_set, sample_trajectory,
};

const SENTINEL: f64 = -99.0;

fn mock_session(
    solver: SweepSolver,
    running: ConstantObjective,
    terminal: ConstantObjective,
    dynamics: PatternDynamics,
) -> SolverSession<SweepSolver> {
    let dispatcher = StageDispatcher::new(
        SolverDims::DRIVE,
        Box::new(running),
        Box::new(terminal),
        Box::new(dynamics),
    )
    .unwrap();
    SolverSession::new(solver, dispatcher).unwrap()
}

fn input() -> SolverInput {
    SolverInput::new(sample_trajectory(), StartState::default(), nominal_parameter_set())
}

#[test]
fn evaluators_are_routed_by_stage() {
    let running = ConstantObjective::new(1.0);
    let terminal = ConstantObjective::new(10.0);
    let dynamics = PatternDynamics::new();
    let (running_calls, terminal_calls, dynamics_calls) =
        (running.counter(), terminal.counter(), dynamics.counter());

    let mut session = mock_session(SweepSolver::new(2, 1), running, terminal, dynamics);
    let out = session.solve(&input()).unwrap();

    assert_eq!(out.exit_code, 1);
    assert_eq!(running_calls.get(), 2 * 9);
    assert_eq!(terminal_calls.get(), 2);
    assert_eq!(dynamics_calls.get(), 2 * 9);
    // 9 running stages at 1.0 plus the terminal stage at 10.0.
    assert_relative_eq!(out.diagnostics.pobj, 19.0);
}

#[test]
fn terminal_and_out_of_horizon_stages_leave_dynamics_buffers_alone() {
    let mut session = mock_session(
        SweepSolver::new(1, 1).with_sentinel(SENTINEL),
        ConstantObjective::new(1.0),
        ConstantObjective::new(2.0),
        PatternDynamics::new(),
    );
    session.solve(&input()).unwrap();
    let records: Vec<_> = session.backend().sweep(0).cloned().collect();
    assert_eq!(records.len(), 11);

    for record in &records[..9] {
        assert_eq!(record.status, 0);
        assert_eq!(record.c, vec![-1.0, -2.0, -3.0, -4.0, -5.0, -6.0]);
        assert!(record.nabla_c.iter().any(|&v| v != SENTINEL));
    }

    let terminal = &records[9];
    assert_eq!(terminal.stage, 9);
    assert_relative_eq!(terminal.cost, 2.0);
    assert!(terminal.c.iter().all(|&v| v == SENTINEL));
    assert!(terminal.nabla_c.iter().all(|&v| v == SENTINEL));
    assert_eq!(terminal.nabla_f, (1..=10).map(f64::from).collect::<Vec<_>>());

    let past = &records[10];
    assert_eq!(past.stage, 10);
    assert_eq!(past.status, 0);
    assert_eq!(past.cost, 0.0);
    assert!(past.nabla_f.iter().all(|&v| v == SENTINEL));
    assert!(past.c.iter().all(|&v| v == SENTINEL));
}

#[test]
fn structural_zeros_keep_caller_values() {
    let mut session = mock_session(
        SweepSolver::new(1, 1).with_sentinel(SENTINEL),
        ConstantObjective::sparse(1.0, &[0, 4, 9]),
        ConstantObjective::new(0.0),
        PatternDynamics::new(),
    );
    session.solve(&input()).unwrap();
    let first = session.backend().sweep(0).next().cloned().unwrap();

    let mut expected_grad = vec![SENTINEL; 10];
    expected_grad[0] = 1.0;
    expected_grad[4] = 2.0;
    expected_grad[9] = 3.0;
    assert_eq!(first.nabla_f, expected_grad);

    let pattern = SparsityDescriptor::from_compact(&DYNAMICS_JACOBIAN_SPARSITY).unwrap();
    let mut in_pattern = vec![false; 60];
    for (k, (row, col)) in pattern.entries().enumerate() {
        in_pattern[col * 6 + row] = true;
        assert_eq!(first.nabla_c[col * 6 + row], (k + 1) as f64);
    }
    for (idx, &inside) in in_pattern.iter().enumerate() {
        if !inside {
            assert_eq!(first.nabla_c[idx], SENTINEL, "dense entry {idx} overwritten");
        }
    }
}

#[test]
fn stage_costs_sum_to_trajectory_cost() {
    let dispatcher =
        StageDispatcher::mecanum(MecanumGeometry::default(), IntegrationConfig::default())
            .unwrap();
    let mut session = SolverSession::new(SweepSolver::new(1, 1), dispatcher).unwrap();
    let input = input();
    let out = session.solve(&input).unwrap();

    let expected = total_objective(input.parameters.iter(), &input.initial_guess);
    assert_relative_eq!(out.diagnostics.pobj, expected, max_relative = 1e-12);

    let per_stage: Vec<f64> = session.backend().sweep(0).map(|r| r.cost).collect();
    for (k, (cost, params)) in per_stage.iter().zip(input.parameters.iter()).enumerate() {
        assert_relative_eq!(
            *cost,
            drivempc_core::stage_objective(params, &input.initial_guess[k]),
            max_relative = 1e-12
        );
    }
}

#[test]
fn solve_returns_the_engine_trajectory() {
    let dispatcher =
        StageDispatcher::mecanum(MecanumGeometry::default(), IntegrationConfig::default())
            .unwrap();
    let mut session = SolverSession::new(SweepSolver::new(1, 0), dispatcher).unwrap();
    let input = input();
    let out = session.solve(&input).unwrap();
    assert_eq!(out.exit_code, 0);
    assert!(!out.converged());
    assert_eq!(out.trajectory, input.initial_guess);
    assert_eq!(out.trajectory.to_flat(), input.initial_guess.to_flat());
}

#[test]
fn short_jacobian_buffer_is_a_contract_violation() {
    let dispatcher =
        StageDispatcher::mecanum(MecanumGeometry::default(), IntegrationConfig::default())
            .unwrap();
    let mut session =
        SolverSession::new(
            SweepSolver::new(1, 1).with_sentinel(SENTINEL).with_short_jacobian(),
            dispatcher,
        )
        .unwrap();
    let err = session.solve(&input()).unwrap_err();
    assert!(matches!(
        err,
        MpcError::ContractViolation(SparseError::DenseLength {
            nrows: 6,
            ncols: 10,
            got: 59
        })
    ));
    // The engine stopped at the first failing stage.
    assert_eq!(session.backend().records.len(), 1);
    let record = &session.backend().records[0];
    assert_eq!(record.status, -1);
    // Nothing was written before the violation was found.
    assert_eq!(record.cost, 0.0);
    assert!(record.nabla_f.iter().all(|&v| v == SENTINEL));
    assert!(record.c.iter().all(|&v| v == SENTINEL));
    assert!(record.nabla_c.iter().all(|&v| v == SENTINEL));
}

#[test]
fn workspace_survives_across_solves() {
    let dispatcher =
        StageDispatcher::mecanum(MecanumGeometry::default(), IntegrationConfig::default())
            .unwrap();
    let mut session = SolverSession::new(SweepSolver::new(1, 1), dispatcher).unwrap();
    let ptr = session.workspace().unwrap().as_ptr();
    session.solve(&input()).unwrap();
    session.solve(&input()).unwrap();
    let ws = session.workspace().unwrap();
    assert_eq!(ws.as_ptr(), ptr);
    // Never re-initialised: the engine's counter kept counting.
    assert_eq!(ws.as_slice()[0], 2.0);
    assert_eq!(session.backend().solves, 2);
}

#[test]
fn parameter_set_round_trips_through_flat_layout() {
    let params = nominal_parameter_set();
    let flat = params.to_flat();
    assert_eq!(flat.len(), 310);
    assert_eq!(ParameterSet::read_flat(&flat).unwrap(), params);
}
