//! Mock evaluators and engines.
//!
//! Evaluators write recognisable values (`entry index + 1`) so tests can
//! check where the dispatcher put them. [`SweepSolver`] stands in for the
//! generated engine and records what every callback produced.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use drivempc_core::types::StageParameters;
use drivempc_mpc::backend::{ExternalSolver, SolveInfo, SolverDims};
use drivempc_mpc::dispatch::{CALLBACK_OK, DerivativeCallback, DerivativeOutputs, StageInputs};
use drivempc_mpc::evaluators::{
    DYNAMICS_JACOBIAN_SPARSITY, DynamicsEvaluator, ObjectiveEvaluator, STAGE_VARS,
};
use drivempc_mpc::model::ModelError;
use drivempc_mpc::sparse::SparsityDescriptor;

// ---------------------------------------------------------------------------
// CallCounter
// ---------------------------------------------------------------------------

/// Shared call count, readable after the evaluator has been boxed away.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn dense_pattern(nrows: usize, ncols: usize) -> SparsityDescriptor {
    SparsityDescriptor::dense(nrows, ncols).expect("small dense pattern")
}

// ---------------------------------------------------------------------------
// ConstantObjective
// ---------------------------------------------------------------------------

/// An objective that always costs `value`, with gradient entry `k` equal to
/// `k + 1`.
pub struct ConstantObjective {
    value: f64,
    sparsity: SparsityDescriptor,
    calls: CallCounter,
}

impl ConstantObjective {
    /// Dense 1x10 gradient.
    pub fn new(value: f64) -> Self {
        Self {
            value,
            sparsity: dense_pattern(1, STAGE_VARS),
            calls: CallCounter::default(),
        }
    }

    /// Gradient nonzero only in `columns` (ascending, below 10).
    pub fn sparse(value: f64, columns: &[usize]) -> Self {
        let mut colptr = vec![0; STAGE_VARS + 1];
        for j in 0..STAGE_VARS {
            colptr[j + 1] = colptr[j] + usize::from(columns.contains(&j));
        }
        let sparsity = SparsityDescriptor::new(1, STAGE_VARS, colptr, vec![0; columns.len()])
            .unwrap_or_else(|_| dense_pattern(1, STAGE_VARS));
        Self {
            value,
            sparsity,
            calls: CallCounter::default(),
        }
    }

    pub fn counter(&self) -> CallCounter {
        self.calls.clone()
    }
}

impl ObjectiveEvaluator for ConstantObjective {
    fn gradient_sparsity(&self) -> &SparsityDescriptor {
        &self.sparsity
    }

    fn evaluate(&self, _x: &[f64; STAGE_VARS], _p: &StageParameters, gradient: &mut [f64]) -> f64 {
        self.calls.bump();
        for (k, g) in gradient.iter_mut().enumerate() {
            *g = (k + 1) as f64;
        }
        self.value
    }
}

// ---------------------------------------------------------------------------
// PatternDynamics
// ---------------------------------------------------------------------------

/// Dynamics on the mecanum Jacobian pattern with entry `k` equal to `k + 1`
/// and residual row `i` equal to `-(i + 1)`.
pub struct PatternDynamics {
    residual_sparsity: SparsityDescriptor,
    jacobian_sparsity: SparsityDescriptor,
    calls: CallCounter,
}

impl PatternDynamics {
    pub fn new() -> Self {
        Self {
            residual_sparsity: dense_pattern(6, 1),
            jacobian_sparsity: SparsityDescriptor::from_compact(&DYNAMICS_JACOBIAN_SPARSITY)
                .unwrap_or_else(|_| dense_pattern(6, STAGE_VARS)),
            calls: CallCounter::default(),
        }
    }

    pub fn counter(&self) -> CallCounter {
        self.calls.clone()
    }
}

impl Default for PatternDynamics {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicsEvaluator for PatternDynamics {
    fn residual_sparsity(&self) -> &SparsityDescriptor {
        &self.residual_sparsity
    }

    fn jacobian_sparsity(&self) -> &SparsityDescriptor {
        &self.jacobian_sparsity
    }

    fn evaluate(
        &self,
        _x: &[f64; STAGE_VARS],
        _p: &StageParameters,
        residual: &mut [f64],
        jacobian: &mut [f64],
    ) -> Result<(), ModelError> {
        self.calls.bump();
        for (i, r) in residual.iter_mut().enumerate() {
            *r = -((i + 1) as f64);
        }
        for (k, j) in jacobian.iter_mut().enumerate() {
            *j = (k + 1) as f64;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SweepSolver
// ---------------------------------------------------------------------------

/// What one callback returned.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRecord {
    pub stage: i32,
    pub iteration: i32,
    pub status: i32,
    /// Amount added to the running objective.
    pub cost: f64,
    pub nabla_f: Vec<f64>,
    pub c: Vec<f64>,
    pub nabla_c: Vec<f64>,
}

/// Engine that calls back for every stage of the initial guess, plus one
/// stage past the horizon, with every buffer requested and pre-filled with
/// a sentinel. The initial guess is returned as the solution.
pub struct SweepSolver {
    sweeps: usize,
    exit_code: i32,
    sentinel: f64,
    jacobian_len: usize,
    pub records: Vec<StageRecord>,
    pub solves: usize,
}

impl SweepSolver {
    pub fn new(sweeps: usize, exit_code: i32) -> Self {
        let dims = SolverDims::DRIVE;
        Self {
            sweeps,
            exit_code,
            sentinel: f64::NAN,
            jacobian_len: dims.dynamics_dim * dims.stage_vars,
            records: Vec::new(),
            solves: 0,
        }
    }

    /// Pre-fill buffers with `sentinel` instead of NaN.
    #[must_use]
    pub fn with_sentinel(mut self, sentinel: f64) -> Self {
        self.sentinel = sentinel;
        self
    }

    /// Hand out a Jacobian buffer one entry short.
    #[must_use]
    pub fn with_short_jacobian(mut self) -> Self {
        self.jacobian_len -= 1;
        self
    }

    /// Records of the given sweep, stage order.
    pub fn sweep(&self, iteration: i32) -> impl Iterator<Item = &StageRecord> {
        self.records.iter().filter(move |r| r.iteration == iteration)
    }
}

impl ExternalSolver for SweepSolver {
    fn dims(&self) -> SolverDims {
        SolverDims::DRIVE
    }

    fn workspace_len(&self) -> usize {
        8
    }

    fn init_workspace(&self, workspace: &mut [f64]) {
        workspace.fill(0.0);
    }

    fn solve(
        &mut self,
        params: &[f64],
        output: &mut [f64],
        info: &mut SolveInfo,
        workspace: &mut [f64],
        sink: &mut dyn Write,
        callback: &mut dyn DerivativeCallback,
    ) -> i32 {
        let dims = SolverDims::DRIVE;
        let nv = dims.stage_vars;
        let np = dims.stage_params;
        self.solves += 1;
        workspace[0] += 1.0;

        for sweep in 0..self.sweeps {
            let iteration = i32::try_from(sweep).unwrap_or(i32::MAX);
            let mut total = 0.0;
            for stage in 0..=dims.stages {
                let k = stage.min(dims.stages - 1);
                let offset = dims.stage_params_offset() + k * np;
                let inputs = StageInputs {
                    x: &params[k * nv..(k + 1) * nv],
                    y: &[],
                    l: &[],
                    p: &params[offset..offset + np],
                };

                let mut f = 0.0;
                let mut nabla_f = vec![self.sentinel; nv];
                let mut c = vec![self.sentinel; dims.dynamics_dim];
                let mut nabla_c = vec![self.sentinel; self.jacobian_len];
                let stage = i32::try_from(stage).unwrap_or(i32::MAX);
                let status = callback.derivatives(
                    &inputs,
                    &mut DerivativeOutputs {
                        f: Some(&mut f),
                        nabla_f: Some(nabla_f.as_mut_slice()),
                        c: Some(c.as_mut_slice()),
                        nabla_c: Some(nabla_c.as_mut_slice()),
                        ..Default::default()
                    },
                    stage,
                    iteration,
                    0,
                );
                total += f;
                self.records.push(StageRecord {
                    stage,
                    iteration,
                    status,
                    cost: f,
                    nabla_f,
                    c,
                    nabla_c,
                });
                if status != CALLBACK_OK {
                    return -102;
                }
            }
            writeln!(sink, "sweep {sweep}: objective {total}").ok();
            info.pobj = total;
        }

        output.copy_from_slice(&params[..output.len()]);
        info.it = i32::try_from(self.sweeps).unwrap_or(i32::MAX);
        self.exit_code
    }
}
