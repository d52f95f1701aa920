//! Stage derivative dispatch and solver sessions for the mecanum drive MPC.
//!
//! A generated solver engine owns the optimisation algorithm and calls back
//! into this crate once per stage per iteration for costs and derivatives:
//!
//! 1. **Sparse copier**: densifies CSC evaluator outputs ([`sparse`])
//! 2. **Evaluators**: tracking objective and mecanum dynamics ([`evaluators`], [`model`])
//! 3. **Dispatcher**: routes each callback by horizon stage ([`dispatch`])
//! 4. **Session**: owns the workspace and marshals parameters and results ([`session`])
//!
//! # Architecture
//!
//! The engine is anything implementing [`ExternalSolver`]. It sees flat
//! buffers only: `initial guess ++ start state ++ stage parameters` in, a
//! 100-double trajectory and a raw [`SolveInfo`] out. [`SqpSolver`] is a
//! reference engine built on Clarabel for running the whole pipeline.

pub mod backend;
pub mod dispatch;
pub mod error;
pub mod evaluators;
pub mod model;
pub mod session;
pub mod sparse;
pub mod sqp;
pub mod workspace;

pub use backend::{ExternalSolver, SolveInfo, SolverDims};
pub use dispatch::{
    CALLBACK_CONTRACT_VIOLATION, CALLBACK_OK, CallbackError, DerivativeCallback,
    DerivativeOutputs, HorizonStage, StageDispatcher, StageInputs,
};
pub use error::MpcError;
pub use evaluators::{DynamicsEvaluator, MecanumDynamics, ObjectiveEvaluator, TrackingObjective};
pub use model::MecanumGeometry;
pub use session::{SharedSession, SolverSession};
pub use sparse::{SparseError, SparsityDescriptor, sparse_to_dense};
pub use sqp::SqpSolver;
pub use workspace::SolverWorkspace;
