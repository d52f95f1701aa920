//! Contract between a session and the solver engine it drives.
//!
//! The engine sees flat buffers only: the parameter vector, the output
//! trajectory, a raw [`SolveInfo`] and a scratch workspace. Derivatives come
//! from the [`DerivativeCallback`] it is handed for the duration of the call.

use std::io::Write;

use drivempc_core::layout::{STAGE_PARAMETERS_LEN, STAGE_STATE_LEN, START_STATE_LEN};
use drivempc_core::types::{NUM_STAGES, SolveDiagnostics};

use crate::dispatch::DerivativeCallback;

/// Problem dimensions a backend was generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverDims {
    pub stages: usize,
    pub stage_vars: usize,
    pub dynamics_dim: usize,
    pub stage_params: usize,
}

impl SolverDims {
    /// The mecanum drive horizon: 10 stages of 10 variables, 6 dynamics
    /// outputs and 31 parameters per stage.
    pub const DRIVE: Self = Self {
        stages: NUM_STAGES,
        stage_vars: STAGE_STATE_LEN,
        dynamics_dim: START_STATE_LEN,
        stage_params: STAGE_PARAMETERS_LEN,
    };

    /// Length of the stacked decision vector (and of the output buffer).
    pub const fn trajectory_len(&self) -> usize {
        self.stages * self.stage_vars
    }

    /// Offset of the start state inside the parameter vector.
    pub const fn start_offset(&self) -> usize {
        self.trajectory_len()
    }

    /// Offset of the first stage parameter block inside the parameter vector.
    pub const fn stage_params_offset(&self) -> usize {
        self.trajectory_len() + self.dynamics_dim
    }

    /// `initial guess ++ start state ++ stage parameters`.
    pub const fn parameter_len(&self) -> usize {
        self.stage_params_offset() + self.stages * self.stage_params
    }

    /// Commands lead every stage; the rest mirrors the dynamics outputs.
    pub const fn commands_per_stage(&self) -> usize {
        self.stage_vars - self.dynamics_dim
    }
}

/// Raw per-solve report as the engine fills it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SolveInfo {
    pub it: i32,
    pub it2opt: i32,
    pub res_eq: f64,
    pub res_ineq: f64,
    pub rsnorm: f64,
    pub rcompnorm: f64,
    pub pobj: f64,
    pub dobj: f64,
    pub dgap: f64,
    pub rdgap: f64,
    pub mu: f64,
    pub mu_aff: f64,
    pub sigma: f64,
    pub lsit_aff: i32,
    pub lsit_cc: i32,
    pub step_aff: f64,
    pub step_cc: f64,
    pub solvetime: f64,
    pub fevalstime: f64,
}

impl From<&SolveInfo> for SolveDiagnostics {
    fn from(info: &SolveInfo) -> Self {
        Self {
            it: info.it,
            it2opt: info.it2opt,
            res_eq: info.res_eq,
            res_ineq: info.res_ineq,
            rsnorm: info.rsnorm,
            rcompnorm: info.rcompnorm,
            pobj: info.pobj,
            dobj: info.dobj,
            dgap: info.dgap,
            rdgap: info.rdgap,
            mu: info.mu,
            mu_aff: info.mu_aff,
            sigma: info.sigma,
            lsit_aff: info.lsit_aff,
            lsit_cc: info.lsit_cc,
            step_aff: info.step_aff,
            step_cc: info.step_cc,
            solvetime: info.solvetime,
            fevalstime: info.fevalstime,
        }
    }
}

/// A solver engine with a fixed call contract.
pub trait ExternalSolver: Send {
    /// Dimensions the engine was built for.
    fn dims(&self) -> SolverDims;

    /// Number of doubles of scratch memory `solve` needs.
    fn workspace_len(&self) -> usize;

    /// Prepare a freshly allocated workspace. Called once per workspace.
    fn init_workspace(&self, workspace: &mut [f64]);

    /// Run one solve.
    ///
    /// `params` has `dims().parameter_len()` entries, `output` has
    /// `dims().trajectory_len()` zeroed entries and `info` is zeroed. The
    /// engine may write progress text to `sink`. Returns the exit code.
    fn solve(
        &mut self,
        params: &[f64],
        output: &mut [f64],
        info: &mut SolveInfo,
        workspace: &mut [f64],
        sink: &mut dyn Write,
        callback: &mut dyn DerivativeCallback,
    ) -> i32;
}
