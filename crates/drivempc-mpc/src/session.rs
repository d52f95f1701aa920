//! Solver sessions: workspace ownership and parameter/result marshalling.

use std::io::Write;
use std::sync::{Mutex, TryLockError};

use drivempc_core::config::MpcConfig;
use drivempc_core::layout::FlatLayout;
use drivempc_core::types::{NUM_STAGES, SolveDiagnostics, SolverInput, SolverOutput, StageState};
use tracing::{debug, info, warn};

use crate::backend::{ExternalSolver, SolveInfo, SolverDims};
use crate::dispatch::StageDispatcher;
use crate::error::MpcError;
use crate::model::MecanumGeometry;
use crate::sqp::SqpSolver;
use crate::workspace::SolverWorkspace;

/// One engine, its workspace and the dispatcher it calls back into.
///
/// `solve` takes `&mut self`, so a session never runs two solves at once.
/// Use [`SharedSession`] to share one across threads.
pub struct SolverSession<B: ExternalSolver = SqpSolver> {
    backend: B,
    dispatcher: StageDispatcher,
    workspace: Option<SolverWorkspace>,
    params: Vec<f64>,
    output: Vec<f64>,
    sink: Box<dyn Write + Send>,
}

impl SolverSession<SqpSolver> {
    /// Reference engine with the mecanum evaluators, configured from `config`.
    pub fn from_config(config: &MpcConfig) -> Result<Self, MpcError> {
        config.validate()?;
        let dispatcher = StageDispatcher::mecanum(MecanumGeometry::default(), config.integration)?;
        Self::new(SqpSolver::new(config.solver), dispatcher)
    }
}

impl<B: ExternalSolver> SolverSession<B> {
    /// Bind `dispatcher` to `backend`.
    ///
    /// The backend must be built for the drive horizon and the dispatcher's
    /// patterns must have been validated against the same dimensions.
    pub fn new(backend: B, dispatcher: StageDispatcher) -> Result<Self, MpcError> {
        let dims = backend.dims();
        check_dims(SolverDims::DRIVE, dims)?;
        check_dims(dims, dispatcher.dims())?;

        info!(
            stages = dims.stages,
            stage_vars = dims.stage_vars,
            workspace_len = backend.workspace_len(),
            "solver session created"
        );
        Ok(Self {
            params: vec![0.0; dims.parameter_len()],
            output: vec![0.0; dims.trajectory_len()],
            backend,
            dispatcher,
            workspace: None,
            sink: Box::new(std::io::sink()),
        })
    }

    /// Send the engine's progress text to `sink` instead of discarding it.
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.sink = sink;
        self
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    pub const fn dispatcher(&self) -> &StageDispatcher {
        &self.dispatcher
    }

    /// The session's workspace, allocated and initialised on first use.
    ///
    /// Later calls return the same block without re-initialising it.
    pub fn workspace(&mut self) -> Result<&mut SolverWorkspace, MpcError> {
        ensure_workspace(&mut self.workspace, &self.backend)
    }

    /// Run one solve.
    ///
    /// The exit code is returned verbatim; only contract violations and
    /// allocation failures are errors.
    pub fn solve(&mut self, input: &SolverInput) -> Result<SolverOutput, MpcError> {
        input.write_flat(&mut self.params)?;
        self.output.fill(0.0);
        let mut raw = SolveInfo::default();

        let workspace = ensure_workspace(&mut self.workspace, &self.backend)?;

        self.dispatcher.take_error();
        let exit_code = self.backend.solve(
            &self.params,
            &mut self.output,
            &mut raw,
            workspace.as_mut_slice(),
            &mut *self.sink,
            &mut self.dispatcher,
        );
        if let Some(err) = self.dispatcher.take_error() {
            return Err(err.into());
        }

        let trajectory = <[StageState; NUM_STAGES]>::read_flat(&self.output)?;
        let diagnostics = SolveDiagnostics::from(&raw);

        if exit_code == drivempc_core::EXIT_OPTIMAL {
            debug!(
                iterations = diagnostics.it,
                objective = diagnostics.pobj,
                solve_time = diagnostics.solvetime,
                "solve converged"
            );
        } else {
            warn!(
                exit_code,
                iterations = diagnostics.it,
                res_eq = diagnostics.res_eq,
                "solver did not report an optimal solution"
            );
        }

        Ok(SolverOutput {
            exit_code,
            trajectory,
            diagnostics,
        })
    }
}

/// The block in `slot`, allocating and initialising it on first use.
fn ensure_workspace<'a, B: ExternalSolver>(
    slot: &'a mut Option<SolverWorkspace>,
    backend: &B,
) -> Result<&'a mut SolverWorkspace, MpcError> {
    let workspace = match slot.take() {
        Some(ws) => ws,
        None => {
            let mut ws = SolverWorkspace::allocate(backend.workspace_len())?;
            backend.init_workspace(ws.as_mut_slice());
            ws
        }
    };
    Ok(slot.insert(workspace))
}

fn check_dims(expected: SolverDims, got: SolverDims) -> Result<(), MpcError> {
    let pairs = [
        ("stage count", expected.stages, got.stages),
        ("stage variable count", expected.stage_vars, got.stage_vars),
        ("dynamics output count", expected.dynamics_dim, got.dynamics_dim),
        ("stage parameter count", expected.stage_params, got.stage_params),
    ];
    for (what, expected, got) in pairs {
        if expected != got {
            return Err(MpcError::BackendDimensions {
                what,
                expected,
                got,
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// SharedSession
// ---------------------------------------------------------------------------

/// A session shared between threads.
///
/// An overlapping call fails with [`MpcError::Busy`] instead of waiting.
pub struct SharedSession<B: ExternalSolver = SqpSolver> {
    inner: Mutex<SolverSession<B>>,
}

impl<B: ExternalSolver> SharedSession<B> {
    pub const fn new(session: SolverSession<B>) -> Self {
        Self {
            inner: Mutex::new(session),
        }
    }

    pub fn solve(&self, input: &SolverInput) -> Result<SolverOutput, MpcError> {
        let mut session = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(MpcError::Busy),
            // Every buffer is rewritten at the start of a solve.
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        session.solve(input)
    }

    pub fn into_inner(self) -> SolverSession<B> {
        self.inner
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DerivativeCallback;

    /// Engine that writes a ramp into the output and reports exit code 3.
    struct RampSolver {
        dims: SolverDims,
        seen: Vec<f64>,
    }

    impl ExternalSolver for RampSolver {
        fn dims(&self) -> SolverDims {
            self.dims
        }

        fn workspace_len(&self) -> usize {
            32
        }

        fn init_workspace(&self, workspace: &mut [f64]) {
            workspace.fill(1.0);
        }

        fn solve(
            &mut self,
            params: &[f64],
            output: &mut [f64],
            info: &mut SolveInfo,
            workspace: &mut [f64],
            _sink: &mut dyn Write,
            _callback: &mut dyn DerivativeCallback,
        ) -> i32 {
            assert_eq!(params.len(), 416);
            self.seen.push(workspace[0]);
            workspace[0] += 1.0;
            for (i, v) in output.iter_mut().enumerate() {
                *v = i as f64;
            }
            info.it = 4;
            info.pobj = 0.5;
            3
        }
    }

    fn session() -> SolverSession<RampSolver> {
        let dispatcher =
            StageDispatcher::mecanum(MecanumGeometry::default(), Default::default()).unwrap();
        SolverSession::new(
            RampSolver {
                dims: SolverDims::DRIVE,
                seen: Vec::new(),
            },
            dispatcher,
        )
        .unwrap()
    }

    fn input() -> SolverInput {
        SolverInput::at_rest(
            drivempc_core::StartState::default(),
            drivempc_core::ParameterSet::uniform(drivempc_core::StageParameters::default()),
        )
    }

    #[test]
    fn exit_code_and_output_are_passed_through() {
        let mut s = session();
        let out = s.solve(&input()).unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(!out.converged());
        assert_eq!(out.trajectory[0].command, [0.0, 1.0, 2.0, 3.0]);
        assert_eq!(out.trajectory[9].velocity, [97.0, 98.0, 99.0]);
        assert_eq!(out.diagnostics.it, 4);
        assert_eq!(out.diagnostics.pobj, 0.5);
    }

    #[test]
    fn workspace_is_created_once() {
        let mut s = session();
        let first = s.workspace().unwrap().as_ptr();
        let second = s.workspace().unwrap().as_ptr();
        assert_eq!(first, second);
        s.solve(&input()).unwrap();
        s.solve(&input()).unwrap();
        assert_eq!(s.workspace().unwrap().as_ptr(), first);
        // Initialised once, then left alone between solves.
        assert_eq!(s.backend().seen, vec![1.0, 2.0]);
    }

    #[test]
    fn backend_with_other_dims_is_rejected() {
        let dispatcher =
            StageDispatcher::mecanum(MecanumGeometry::default(), Default::default()).unwrap();
        let backend = RampSolver {
            dims: SolverDims {
                stages: 12,
                ..SolverDims::DRIVE
            },
            seen: Vec::new(),
        };
        let err = SolverSession::new(backend, dispatcher).err().unwrap();
        assert!(matches!(
            err,
            MpcError::BackendDimensions {
                what: "stage count",
                expected: 10,
                got: 12
            }
        ));
    }

    #[test]
    fn shared_session_reports_busy() {
        let shared = SharedSession::new(session());
        let guard = shared.inner.lock().unwrap();
        assert!(matches!(shared.solve(&input()), Err(MpcError::Busy)));
        drop(guard);
        assert_eq!(shared.solve(&input()).unwrap().exit_code, 3);
    }
}
