//! Per-stage derivative dispatch.
//!
//! The engine calls [`DerivativeCallback::derivatives`] once per stage per
//! iteration. [`StageDispatcher`] routes the call to the evaluators bound to
//! that stage, densifies their sparse outputs into whichever buffers the
//! engine asked for and adds the stage cost to the running objective.

use drivempc_core::config::IntegrationConfig;
use drivempc_core::error::LayoutError;
use drivempc_core::layout::FlatLayout;
use drivempc_core::types::{StageParameters, TERMINAL_STAGE};
use thiserror::Error;
use tracing::{trace, warn};

use crate::backend::SolverDims;
use crate::evaluators::{
    DynamicsEvaluator, MecanumDynamics, ObjectiveEvaluator, STAGE_VARS, TrackingObjective,
};
use crate::model::{MecanumGeometry, ModelError};
use crate::sparse::{SparseError, sparse_to_dense};

/// Status returned for a successful callback.
pub const CALLBACK_OK: i32 = 0;

/// Status returned when a stage could not be served: buffers of the wrong
/// size, or constants the drivetrain model cannot integrate.
pub const CALLBACK_CONTRACT_VIOLATION: i32 = -1;

/// Failure detected while serving a callback. No output buffer has been
/// written when one of these is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CallbackError {
    #[error(transparent)]
    Sparse(#[from] SparseError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

// ---------------------------------------------------------------------------
// Callback contract
// ---------------------------------------------------------------------------

/// Per-stage inputs. `y` and `l` are the engine's current multiplier
/// estimates for the stage; they are passed through for information only.
#[derive(Debug, Clone, Copy)]
pub struct StageInputs<'a> {
    pub x: &'a [f64],
    pub y: &'a [f64],
    pub l: &'a [f64],
    pub p: &'a [f64],
}

/// Output buffers the engine wants filled. `None` means not requested.
///
/// Dense buffers are column-major. `h`, `nabla_h` and `hess` belong to the
/// contract but this problem has no inequality functions and no exact
/// Hessian, so they are never written.
#[derive(Debug, Default)]
pub struct DerivativeOutputs<'a> {
    /// Running objective; the stage cost is added, not assigned.
    pub f: Option<&'a mut f64>,
    pub nabla_f: Option<&'a mut [f64]>,
    pub c: Option<&'a mut [f64]>,
    pub nabla_c: Option<&'a mut [f64]>,
    pub h: Option<&'a mut [f64]>,
    pub nabla_h: Option<&'a mut [f64]>,
    pub hess: Option<&'a mut [f64]>,
}

/// The function the engine calls back for stage derivatives.
pub trait DerivativeCallback {
    /// Returns [`CALLBACK_OK`] or a nonzero status.
    fn derivatives(
        &mut self,
        inputs: &StageInputs<'_>,
        outputs: &mut DerivativeOutputs<'_>,
        stage: i32,
        iteration: i32,
        thread_id: i32,
    ) -> i32;
}

// ---------------------------------------------------------------------------
// HorizonStage
// ---------------------------------------------------------------------------

/// Role of a stage index within the horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HorizonStage {
    /// Stages with an objective and a transition to the next stage.
    Running(usize),
    /// The last stage: objective only.
    Terminal,
}

impl HorizonStage {
    /// Classify an engine stage index; `None` if outside the horizon.
    pub fn from_index(stage: i32) -> Option<Self> {
        match usize::try_from(stage).ok()? {
            k if k < TERMINAL_STAGE => Some(Self::Running(k)),
            TERMINAL_STAGE => Some(Self::Terminal),
            _ => None,
        }
    }

    pub const fn index(self) -> usize {
        match self {
            Self::Running(k) => k,
            Self::Terminal => TERMINAL_STAGE,
        }
    }
}

// ---------------------------------------------------------------------------
// StageDispatcher
// ---------------------------------------------------------------------------

/// Routes callbacks to the running and terminal evaluators.
pub struct StageDispatcher {
    dims: SolverDims,
    running_objective: Box<dyn ObjectiveEvaluator>,
    terminal_objective: Box<dyn ObjectiveEvaluator>,
    dynamics: Box<dyn DynamicsEvaluator>,
    gradient: Vec<f64>,
    residual: Vec<f64>,
    jacobian: Vec<f64>,
    last_error: Option<CallbackError>,
}

impl std::fmt::Debug for StageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageDispatcher")
            .field("dims", &self.dims)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl StageDispatcher {
    /// Bind evaluators, checking every pattern against `dims`.
    ///
    /// Objective gradients must be `1 x stage_vars`, the dynamics residual
    /// `dynamics_dim x 1` and its Jacobian `dynamics_dim x stage_vars`.
    pub fn new(
        dims: SolverDims,
        running_objective: Box<dyn ObjectiveEvaluator>,
        terminal_objective: Box<dyn ObjectiveEvaluator>,
        dynamics: Box<dyn DynamicsEvaluator>,
    ) -> Result<Self, SparseError> {
        running_objective
            .gradient_sparsity()
            .expect_shape(1, dims.stage_vars)?;
        terminal_objective
            .gradient_sparsity()
            .expect_shape(1, dims.stage_vars)?;
        dynamics
            .residual_sparsity()
            .expect_shape(dims.dynamics_dim, 1)?;
        dynamics
            .jacobian_sparsity()
            .expect_shape(dims.dynamics_dim, dims.stage_vars)?;

        let gradient_nnz = running_objective
            .gradient_sparsity()
            .nnz()
            .max(terminal_objective.gradient_sparsity().nnz());
        let residual = vec![0.0; dynamics.residual_sparsity().nnz()];
        let jacobian = vec![0.0; dynamics.jacobian_sparsity().nnz()];

        Ok(Self {
            dims,
            running_objective,
            terminal_objective,
            dynamics,
            gradient: vec![0.0; gradient_nnz],
            residual,
            jacobian,
            last_error: None,
        })
    }

    /// The tracking objective and mecanum dynamics for the drive horizon.
    pub fn mecanum(
        geometry: MecanumGeometry,
        integration: IntegrationConfig,
    ) -> Result<Self, SparseError> {
        Self::new(
            SolverDims::DRIVE,
            Box::new(TrackingObjective::new()?),
            Box::new(TrackingObjective::new()?),
            Box::new(MecanumDynamics::new(geometry, integration)?),
        )
    }

    pub const fn dims(&self) -> SolverDims {
        self.dims
    }

    /// The violation recorded by the last failing callback, if any.
    pub const fn last_error(&self) -> Option<CallbackError> {
        self.last_error
    }

    /// Take and clear the recorded violation.
    pub fn take_error(&mut self) -> Option<CallbackError> {
        self.last_error.take()
    }

    /// Serve one stage and return its cost.
    ///
    /// Every requested buffer is checked and every evaluator has run before
    /// the first output is written, so a failed call leaves all outputs
    /// untouched. Nothing is accumulated into `f` here.
    pub fn evaluate_stage(
        &mut self,
        stage: HorizonStage,
        inputs: &StageInputs<'_>,
        outputs: &mut DerivativeOutputs<'_>,
    ) -> Result<f64, CallbackError> {
        let x: &[f64; STAGE_VARS] =
            inputs
                .x
                .try_into()
                .map_err(|_| LayoutError::LengthMismatch {
                    what: "stage variable",
                    expected: STAGE_VARS,
                    got: inputs.x.len(),
                })?;
        let params = StageParameters::read_flat(inputs.p)?;

        let running = matches!(stage, HorizonStage::Running(_));
        let objective = if running {
            &self.running_objective
        } else {
            &self.terminal_objective
        };
        let pattern = objective.gradient_sparsity();
        let with_dynamics = running && (outputs.c.is_some() || outputs.nabla_c.is_some());

        if let Some(out) = outputs.nabla_f.as_deref() {
            pattern.check_dense(out.len())?;
        }
        if with_dynamics {
            if let Some(out) = outputs.c.as_deref() {
                self.dynamics.residual_sparsity().check_dense(out.len())?;
            }
            if let Some(out) = outputs.nabla_c.as_deref() {
                self.dynamics.jacobian_sparsity().check_dense(out.len())?;
            }
        }

        let gradient = &mut self.gradient[..pattern.nnz()];
        let cost = objective.evaluate(x, &params, gradient);
        if with_dynamics {
            self.dynamics
                .evaluate(x, &params, &mut self.residual, &mut self.jacobian)?;
        }

        if let Some(out) = outputs.nabla_f.as_deref_mut() {
            sparse_to_dense(pattern, gradient, out)?;
        }
        if with_dynamics {
            if let Some(out) = outputs.c.as_deref_mut() {
                sparse_to_dense(self.dynamics.residual_sparsity(), &self.residual, out)?;
            }
            if let Some(out) = outputs.nabla_c.as_deref_mut() {
                sparse_to_dense(self.dynamics.jacobian_sparsity(), &self.jacobian, out)?;
            }
        }

        Ok(cost)
    }
}

impl DerivativeCallback for StageDispatcher {
    fn derivatives(
        &mut self,
        inputs: &StageInputs<'_>,
        outputs: &mut DerivativeOutputs<'_>,
        stage: i32,
        iteration: i32,
        thread_id: i32,
    ) -> i32 {
        trace!(stage, iteration, thread_id, "derivative request");

        let Some(horizon_stage) = HorizonStage::from_index(stage) else {
            warn!(stage, "derivative request outside the horizon ignored");
            return CALLBACK_OK;
        };

        match self.evaluate_stage(horizon_stage, inputs, outputs) {
            Ok(cost) => {
                if let Some(f) = outputs.f.as_deref_mut() {
                    *f += cost;
                }
                CALLBACK_OK
            }
            Err(err) => {
                warn!(stage, iteration, %err, "derivative request rejected");
                self.last_error = Some(err);
                CALLBACK_CONTRACT_VIOLATION
            }
        }
    }
}
