//! Reference engine: Gauss-Newton SQP with Clarabel subproblems.
//!
//! Used to run the callback machinery end to end. Every iteration asks the
//! callback for all stage costs, gradients and dynamics linearisations,
//! then solves for a step `d` over the stacked stage variables
//! `z = [x_0, ..., x_9]` and backtracks on an l1 merit.
//!
//! The subproblem minimises `0.5 dᵀ (B + rI) d + gᵀ d` where `B` is the
//! objective curvature sampled from gradient differences. Its rows are, in
//! order: the start-state equalities, one block of linearised transitions
//! per running stage, then an upper and a lower command bound per command.
//! Every column of the constraint matrix touches at most three of those
//! blocks, so it is assembled straight into CSC form.

use std::io::Write;
use std::time::{Duration, Instant};

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{NonnegativeConeT, ZeroConeT},
};
use drivempc_core::config::SolverConfig;
use drivempc_core::types::EXIT_OPTIMAL;
use tracing::debug;

use crate::backend::{ExternalSolver, SolveInfo, SolverDims};
use crate::dispatch::{CALLBACK_OK, DerivativeCallback, DerivativeOutputs, StageInputs};

/// Iteration limit reached.
pub const EXIT_MAX_ITERATIONS: i32 = 0;
/// NaN or infinity in a cost, residual or derivative.
pub const EXIT_NAN: i32 = -6;
/// Subproblem failed or the line search stalled.
pub const EXIT_QP_FAILURE: i32 = -7;
/// Workspace, parameter or output buffer shorter than required.
pub const EXIT_BUFFER_TOO_SMALL: i32 = -101;
/// The derivative callback returned a nonzero status.
pub const EXIT_CALLBACK_ERROR: i32 = -102;

const ARMIJO: f64 = 1e-4;

/// Gauss-Newton SQP engine for the drive horizon.
#[derive(Debug, Clone)]
pub struct SqpSolver {
    config: SolverConfig,
    dims: SolverDims,
}

impl SqpSolver {
    pub const fn new(config: SolverConfig) -> Self {
        Self {
            config,
            dims: SolverDims::DRIVE,
        }
    }

    pub const fn config(&self) -> &SolverConfig {
        &self.config
    }

    fn run(
        &self,
        problem: &mut Problem<'_>,
        ws: &mut Scratch<'_>,
        info: &mut SolveInfo,
        sink: &mut dyn Write,
    ) -> i32 {
        let mut penalty = 1.0;
        if self.config.verbose {
            writeln!(sink, "iter      objective     res_eq       step  alpha").ok();
        }

        for it in 1..=self.config.max_iterations {
            let it = i32::try_from(it).unwrap_or(i32::MAX);
            info.it = it;
            problem.iteration = it - 1;

            let eval = match problem.evaluate(ws.iterate, true) {
                Ok(eval) => eval,
                Err(code) => return code,
            };
            if !eval.is_finite() {
                return EXIT_NAN;
            }
            info.pobj = eval.objective;
            info.res_eq = eval.violation_inf();
            info.res_ineq = self.bound_violation(ws.iterate);

            let h = self.config.curvature_step;
            if let Err(code) = problem.curvature(ws.iterate, ws.curvature, h) {
                return code;
            }
            if ws.curvature.iter().any(|v| !v.is_finite()) {
                return EXIT_NAN;
            }

            let Some(qp) = self.solve_qp(ws.iterate, &eval, ws.curvature) else {
                return EXIT_QP_FAILURE;
            };
            ws.step.copy_from_slice(&qp.step);
            let step_norm = inf_norm(ws.step);

            info.rsnorm = step_norm;
            info.rcompnorm = qp.complementarity_max;
            info.mu = qp.complementarity_mean;
            info.dobj = eval.objective + qp.dual_objective;
            info.dgap = (qp.primal_objective - qp.dual_objective).abs();
            info.rdgap = info.dgap / eval.objective.abs().max(1.0);
            info.lsit_aff = i32::try_from(qp.iterations).unwrap_or(i32::MAX);
            problem.set_multipliers(&qp);

            if step_norm < self.config.step_tolerance
                && info.res_eq < self.config.equality_tolerance
            {
                info.it2opt = it;
                info.step_cc = 0.0;
                info.lsit_cc = 0;
                if self.config.verbose {
                    writeln!(
                        sink,
                        "{it:>4} {:>14.6e} {:>10.2e} {step_norm:>10.2e}  converged",
                        eval.objective, info.res_eq
                    )
                    .ok();
                }
                return EXIT_OPTIMAL;
            }

            penalty = f64::max(penalty, 2.0 * inf_norm(&qp.eq_duals));
            let (alpha, backtracks) = match self.line_search(problem, ws, &eval, penalty) {
                Ok(accepted) => accepted,
                Err(code) => return code,
            };
            info.step_cc = alpha;
            info.lsit_cc = i32::try_from(backtracks).unwrap_or(i32::MAX);

            if self.config.verbose {
                writeln!(
                    sink,
                    "{it:>4} {:>14.6e} {:>10.2e} {step_norm:>10.2e} {alpha:>6.3}",
                    eval.objective, info.res_eq
                )
                .ok();
            }
        }

        EXIT_MAX_ITERATIONS
    }

    /// Backtrack on the l1 merit `f + penalty * |c|_1` until the Armijo
    /// condition holds. On success the trial point becomes the iterate.
    fn line_search(
        &self,
        problem: &mut Problem<'_>,
        ws: &mut Scratch<'_>,
        eval: &Evaluation,
        penalty: f64,
    ) -> Result<(f64, u32), i32> {
        let violation = eval.violation_l1();
        let merit = eval.objective + penalty * violation;
        let slope = (dot(&eval.gradient, ws.step) - penalty * violation).min(0.0);
        let slack = 1e-12 * merit.abs().max(1.0);

        let mut alpha = 1.0;
        for backtrack in 0..=self.config.line_search_steps {
            for ((t, &z), &d) in ws.trial.iter_mut().zip(ws.iterate.iter()).zip(ws.step.iter()) {
                *t = z + alpha * d;
            }
            let trial = problem.evaluate(ws.trial, false)?;
            if trial.objective.is_finite() && trial.residual.iter().all(|v| v.is_finite()) {
                let trial_merit = trial.objective + penalty * trial.violation_l1();
                if trial_merit <= merit + ARMIJO * alpha * slope + slack {
                    ws.iterate.copy_from_slice(ws.trial);
                    return Ok((alpha, backtrack));
                }
            }
            alpha *= 0.5;
        }
        Err(EXIT_QP_FAILURE)
    }

    fn bound_violation(&self, z: &[f64]) -> f64 {
        let nv = self.dims.stage_vars;
        let ncmd = self.dims.commands_per_stage();
        z.chunks_exact(nv)
            .flat_map(|stage| &stage[..ncmd])
            .map(|u| (u.abs() - self.config.command_limit).max(0.0))
            .fold(0.0, f64::max)
    }

    fn solve_qp(&self, z: &[f64], eval: &Evaluation, curvature: &[f64]) -> Option<QpStep> {
        let dims = self.dims;
        let n_eq = dims.dynamics_dim * dims.stages;
        let ncmd = dims.commands_per_stage();
        let limit = self.config.command_limit;

        let p = diagonal_hessian(curvature, self.config.regularization);
        let a = constraint_matrix(dims, &eval.jacobians);

        let mut b: Vec<f64> = eval.residual.iter().map(|r| -r).collect();
        for stage in z.chunks_exact(dims.stage_vars) {
            for &u in &stage[..ncmd] {
                b.extend([limit - u, limit + u]);
            }
        }
        let cones = [ZeroConeT(n_eq), NonnegativeConeT(b.len() - n_eq)];

        let settings = DefaultSettingsBuilder::default()
            .max_iter(200)
            .verbose(false)
            .build()
            .ok()?;
        let mut solver = DefaultSolver::new(&p, &eval.gradient, &a, &b, &cones, settings).ok()?;
        solver.solve();
        let sol = &solver.solution;
        if !matches!(sol.status, SolverStatus::Solved | SolverStatus::AlmostSolved) {
            debug!(status = ?sol.status, "QP subproblem failed");
            return None;
        }

        let products: Vec<f64> = sol.z[n_eq..]
            .iter()
            .zip(&sol.s[n_eq..])
            .map(|(z, s)| (z * s).abs())
            .collect();
        let complementarity_max = products.iter().copied().fold(0.0, f64::max);
        let complementarity_mean = if products.is_empty() {
            0.0
        } else {
            products.iter().sum::<f64>() / products.len() as f64
        };

        Some(QpStep {
            step: sol.x.clone(),
            eq_duals: sol.z[..n_eq].to_vec(),
            bound_duals: sol.z[n_eq..].to_vec(),
            primal_objective: sol.obj_val,
            dual_objective: sol.obj_val_dual,
            complementarity_max,
            complementarity_mean,
            iterations: sol.iterations,
        })
    }
}

impl ExternalSolver for SqpSolver {
    fn dims(&self) -> SolverDims {
        self.dims
    }

    /// Iterate, trial point, step and curvature.
    fn workspace_len(&self) -> usize {
        4 * self.dims.trajectory_len()
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
        let started = Instant::now();
        let n = self.dims.trajectory_len();
        if params.len() < self.dims.parameter_len()
            || output.len() < n
            || workspace.len() < self.workspace_len()
        {
            return EXIT_BUFFER_TOO_SMALL;
        }

        let (iterate, rest) = workspace.split_at_mut(n);
        let (trial, rest) = rest.split_at_mut(n);
        let (step, rest) = rest.split_at_mut(n);
        let mut scratch = Scratch {
            iterate,
            trial,
            step,
            curvature: &mut rest[..n],
        };
        scratch.iterate.copy_from_slice(&params[..n]);

        let mut problem = Problem::new(self.dims, params, callback);
        let exit_code = self.run(&mut problem, &mut scratch, info, sink);

        output[..n].copy_from_slice(scratch.iterate);
        info.solvetime = started.elapsed().as_secs_f64();
        info.fevalstime = problem.feval_time.as_secs_f64();
        debug!(exit_code, iterations = info.it, res_eq = info.res_eq, "sqp solve finished");
        exit_code
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

struct Scratch<'a> {
    iterate: &'a mut [f64],
    trial: &'a mut [f64],
    step: &'a mut [f64],
    curvature: &'a mut [f64],
}

struct QpStep {
    step: Vec<f64>,
    eq_duals: Vec<f64>,
    bound_duals: Vec<f64>,
    primal_objective: f64,
    dual_objective: f64,
    complementarity_max: f64,
    complementarity_mean: f64,
    iterations: u32,
}

/// Costs and constraint linearisation at one point.
struct Evaluation {
    objective: f64,
    /// Stacked stage gradients.
    gradient: Vec<f64>,
    /// Initial-state residual followed by one dynamics residual per running stage.
    residual: Vec<f64>,
    /// Dense column-major dynamics Jacobian per running stage.
    jacobians: Vec<f64>,
}

impl Evaluation {
    fn new(dims: SolverDims) -> Self {
        Self {
            objective: 0.0,
            gradient: vec![0.0; dims.trajectory_len()],
            residual: vec![0.0; dims.dynamics_dim * dims.stages],
            jacobians: vec![0.0; (dims.stages - 1) * dims.dynamics_dim * dims.stage_vars],
        }
    }

    fn violation_l1(&self) -> f64 {
        self.residual.iter().map(|v| v.abs()).sum()
    }

    fn violation_inf(&self) -> f64 {
        inf_norm(&self.residual)
    }

    fn is_finite(&self) -> bool {
        self.objective.is_finite()
            && self.gradient.iter().all(|v| v.is_finite())
            && self.residual.iter().all(|v| v.is_finite())
            && self.jacobians.iter().all(|v| v.is_finite())
    }
}

/// The callback plus everything needed to address one stage.
struct Problem<'a> {
    dims: SolverDims,
    params: &'a [f64],
    callback: &'a mut dyn DerivativeCallback,
    eq_duals: Vec<f64>,
    bound_duals: Vec<f64>,
    iteration: i32,
    feval_time: Duration,
}

impl<'a> Problem<'a> {
    fn new(dims: SolverDims, params: &'a [f64], callback: &'a mut dyn DerivativeCallback) -> Self {
        Self {
            dims,
            params,
            callback,
            eq_duals: vec![0.0; dims.dynamics_dim * dims.stages],
            bound_duals: vec![0.0; 2 * dims.commands_per_stage() * dims.stages],
            iteration: 0,
            feval_time: Duration::ZERO,
        }
    }

    fn set_multipliers(&mut self, qp: &QpStep) {
        self.eq_duals.copy_from_slice(&qp.eq_duals);
        self.bound_duals.copy_from_slice(&qp.bound_duals);
    }

    fn call(
        &mut self,
        k: usize,
        x: &[f64],
        outputs: &mut DerivativeOutputs<'_>,
    ) -> Result<(), i32> {
        let nd = self.dims.dynamics_dim;
        let nl = 2 * self.dims.commands_per_stage();
        let np = self.dims.stage_params;
        let offset = self.dims.stage_params_offset() + k * np;

        // Multipliers of the dynamics leaving stage k and of its command box.
        let y: &[f64] = if k + 1 < self.dims.stages {
            &self.eq_duals[nd * (k + 1)..nd * (k + 2)]
        } else {
            &[]
        };
        let inputs = StageInputs {
            x,
            y,
            l: &self.bound_duals[k * nl..(k + 1) * nl],
            p: &self.params[offset..offset + np],
        };

        let started = Instant::now();
        let stage = i32::try_from(k).unwrap_or(i32::MAX);
        let status = self
            .callback
            .derivatives(&inputs, outputs, stage, self.iteration, 0);
        self.feval_time += started.elapsed();

        if status == CALLBACK_OK {
            Ok(())
        } else {
            Err(EXIT_CALLBACK_ERROR)
        }
    }

    /// Evaluate every stage at `z`. Without `derivatives` only costs and
    /// residuals are requested.
    fn evaluate(&mut self, z: &[f64], derivatives: bool) -> Result<Evaluation, i32> {
        let dims = self.dims;
        let nv = dims.stage_vars;
        let nd = dims.dynamics_dim;
        let ncmd = dims.commands_per_stage();
        let start = &self.params[dims.start_offset()..dims.start_offset() + nd];

        let mut eval = Evaluation::new(dims);
        for r in 0..nd {
            eval.residual[r] = z[ncmd + r] - start[r];
        }

        for k in 0..dims.stages {
            let running = k + 1 < dims.stages;
            {
                let nabla_f = if derivatives {
                    Some(&mut eval.gradient[k * nv..(k + 1) * nv])
                } else {
                    None
                };
                let c = if running {
                    Some(&mut eval.residual[nd * (k + 1)..nd * (k + 2)])
                } else {
                    None
                };
                let nabla_c = if running && derivatives {
                    Some(&mut eval.jacobians[k * nd * nv..(k + 1) * nd * nv])
                } else {
                    None
                };
                let mut outputs = DerivativeOutputs {
                    f: Some(&mut eval.objective),
                    nabla_f,
                    c,
                    nabla_c,
                    ..Default::default()
                };
                self.call(k, &z[k * nv..(k + 1) * nv], &mut outputs)?;
            }

            if running {
                let next = &z[(k + 1) * nv + ncmd..(k + 2) * nv];
                for (r, &s) in eval.residual[nd * (k + 1)..nd * (k + 2)].iter_mut().zip(next) {
                    *r -= s;
                }
            }
        }
        Ok(eval)
    }

    /// Diagonal objective curvature from central gradient differences,
    /// clamped at zero.
    fn curvature(&mut self, z: &[f64], out: &mut [f64], h: f64) -> Result<(), i32> {
        let nv = self.dims.stage_vars;
        let mut shifted = vec![0.0; nv];
        let mut plus = vec![0.0; nv];
        let mut minus = vec![0.0; nv];

        for k in 0..self.dims.stages {
            let x = &z[k * nv..(k + 1) * nv];
            for i in 0..nv {
                shifted.copy_from_slice(x);
                shifted[i] = x[i] + h;
                self.call(k, &shifted, &mut DerivativeOutputs {
                    nabla_f: Some(plus.as_mut_slice()),
                    ..Default::default()
                })?;
                shifted[i] = x[i] - h;
                self.call(k, &shifted, &mut DerivativeOutputs {
                    nabla_f: Some(minus.as_mut_slice()),
                    ..Default::default()
                })?;
                out[k * nv + i] = ((plus[i] - minus[i]) / (2.0 * h)).max(0.0);
            }
        }
        Ok(())
    }
}

fn inf_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x.abs()).fold(0.0, f64::max)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `diag(curvature + regularization)`, upper triangle only.
fn diagonal_hessian(curvature: &[f64], regularization: f64) -> CscMatrix<f64> {
    let n = curvature.len();
    CscMatrix::new(
        n,
        n,
        (0..=n).collect(),
        (0..n).collect(),
        curvature.iter().map(|b| b + regularization).collect(),
    )
}

/// Constraint matrix of the subproblem, column `k * stage_vars + j` for
/// variable `j` of stage `k`. Row indices come out ascending per column.
///
/// - a state variable enters its start-state row (stage 0) or, negated, the
///   transition row that produces it (later stages);
/// - every variable of a running stage enters that stage's transition block
///   through the dense column-major `jacobians`;
/// - a command enters its upper (`+1`) and lower (`-1`) bound rows.
fn constraint_matrix(dims: SolverDims, jacobians: &[f64]) -> CscMatrix<f64> {
    let nv = dims.stage_vars;
    let nd = dims.dynamics_dim;
    let ncmd = dims.commands_per_stage();
    let n_eq = nd * dims.stages;
    let n_bound = 2 * ncmd * dims.stages;

    let mut colptr = Vec::with_capacity(dims.trajectory_len() + 1);
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    colptr.push(0);

    for k in 0..dims.stages {
        let transition = (k + 1 < dims.stages).then(|| &jacobians[k * nd * nv..(k + 1) * nd * nv]);
        for j in 0..nv {
            if let Some(i) = j.checked_sub(ncmd) {
                if k == 0 {
                    rowval.push(i);
                    nzval.push(1.0);
                } else {
                    rowval.push(nd * k + i);
                    nzval.push(-1.0);
                }
            }
            if let Some(jac) = transition {
                rowval.extend((0..nd).map(|i| nd * (k + 1) + i));
                nzval.extend_from_slice(&jac[j * nd..(j + 1) * nd]);
            }
            if j < ncmd {
                let row = n_eq + 2 * (k * ncmd + j);
                rowval.extend([row, row + 1]);
                nzval.extend([1.0, -1.0]);
            }
            colptr.push(rowval.len());
        }
    }

    CscMatrix::new(n_eq + n_bound, dims.trajectory_len(), colptr, rowval, nzval)
}
