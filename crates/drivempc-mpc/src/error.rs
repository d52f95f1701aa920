use drivempc_core::error::{ConfigError, LayoutError, ScheduleError};
use thiserror::Error;

use crate::dispatch::CallbackError;
use crate::model::ModelError;
use crate::sparse::SparseError;

/// Errors surfaced by a solver session.
///
/// Non-convergence is not an error: it is reported through
/// [`SolverOutput::exit_code`](drivempc_core::types::SolverOutput::exit_code).
#[derive(Debug, Error)]
pub enum MpcError {
    #[error("Sparsity contract violation: {0}")]
    ContractViolation(#[from] SparseError),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Drivetrain model error: {0}")]
    Model(#[from] ModelError),

    #[error("Failed to allocate solver workspace of {len} doubles")]
    WorkspaceAllocation { len: usize },

    #[error("Solver session is busy with another solve")]
    Busy,

    #[error("Backend dimension mismatch: {what} is {got}, expected {expected}")]
    BackendDimensions {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),
}

impl From<CallbackError> for MpcError {
    fn from(err: CallbackError) -> Self {
        match err {
            CallbackError::Sparse(e) => Self::ContractViolation(e),
            CallbackError::Layout(e) => Self::Layout(e),
            CallbackError::Model(e) => Self::Model(e),
        }
    }
}
