//! Per-stage objective and dynamics evaluators.
//!
//! Evaluators produce their derivative outputs as the nonzero values of a
//! fixed CSC pattern, in pattern storage order. The patterns are published in
//! the compact `[nrows, ncols, colptr.., rowidx..]` encoding the solver's code
//! generator uses, and decoded once when an evaluator is constructed.

use drivempc_core::config::IntegrationConfig;
use drivempc_core::types::StageParameters;
use num_dual::Dual64;

use crate::model::{MecanumGeometry, ModelError, integrate_stage};
use crate::sparse::{SparseError, SparsityDescriptor};

/// Decision variables per stage: `[command(4), position(3), velocity(3)]`.
pub const STAGE_VARS: usize = 10;

/// Outputs of the stage transition: `[position(3), velocity(3)]`.
pub const DYNAMICS_DIM: usize = 6;

/// Objective gradient, 1x10, every variable present.
#[rustfmt::skip]
pub const OBJECTIVE_GRADIENT_SPARSITY: [usize; 23] = [
    1, 10,
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// Dynamics residual, 6x1 dense.
#[rustfmt::skip]
pub const DYNAMICS_RESIDUAL_SPARSITY: [usize; 10] = [
    6, 1,
    0, 6,
    0, 1, 2, 3, 4, 5,
];

/// Dynamics Jacobian, 6x10 with 50 nonzeros. The x position only feeds the
/// next x position and the y position only feeds the next y position; the
/// accelerations do not depend on where the robot is.
#[rustfmt::skip]
pub const DYNAMICS_JACOBIAN_SPARSITY: [usize; 63] = [
    6, 10,
    0, 6, 12, 18, 24, 25, 26, 32, 38, 44, 50,
    0, 1, 2, 3, 4, 5,   // u_fl
    0, 1, 2, 3, 4, 5,   // u_fr
    0, 1, 2, 3, 4, 5,   // u_bl
    0, 1, 2, 3, 4, 5,   // u_br
    0,                  // x
    1,                  // y
    0, 1, 2, 3, 4, 5,   // heading
    0, 1, 2, 3, 4, 5,   // vx
    0, 1, 2, 3, 4, 5,   // vy
    0, 1, 2, 3, 4, 5,   // angular velocity
];

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Scalar stage cost with a sparse gradient.
pub trait ObjectiveEvaluator: Send {
    /// Pattern of the gradient with respect to the stage variables.
    fn gradient_sparsity(&self) -> &SparsityDescriptor;

    /// Evaluate the cost and write the gradient nonzeros into `gradient`
    /// (`gradient_sparsity().nnz()` entries).
    fn evaluate(&self, x: &[f64; STAGE_VARS], p: &StageParameters, gradient: &mut [f64]) -> f64;
}

/// Stage transition with a sparse residual and Jacobian.
pub trait DynamicsEvaluator: Send {
    /// Pattern of the next-state residual.
    fn residual_sparsity(&self) -> &SparsityDescriptor;

    /// Pattern of the Jacobian with respect to the stage variables.
    fn jacobian_sparsity(&self) -> &SparsityDescriptor;

    /// Write the residual and Jacobian nonzeros.
    fn evaluate(
        &self,
        x: &[f64; STAGE_VARS],
        p: &StageParameters,
        residual: &mut [f64],
        jacobian: &mut [f64],
    ) -> Result<(), ModelError>;
}

// ---------------------------------------------------------------------------
// TrackingObjective
// ---------------------------------------------------------------------------

/// Weighted squared tracking error of commands, pose and twist.
///
/// Running and terminal stages share the cost form. The terminal stage's
/// motor weights are zero by construction of the parameter set.
#[derive(Debug, Clone)]
pub struct TrackingObjective {
    sparsity: SparsityDescriptor,
}

impl TrackingObjective {
    pub fn new() -> Result<Self, SparseError> {
        Ok(Self {
            sparsity: SparsityDescriptor::from_compact(&OBJECTIVE_GRADIENT_SPARSITY)?,
        })
    }
}

impl ObjectiveEvaluator for TrackingObjective {
    fn gradient_sparsity(&self) -> &SparsityDescriptor {
        &self.sparsity
    }

    fn evaluate(&self, x: &[f64; STAGE_VARS], p: &StageParameters, gradient: &mut [f64]) -> f64 {
        let w = &p.weights;
        let t = &p.target;
        let mut cost = 0.0;

        for i in 0..4 {
            let u = x[i];
            cost += w.motor_weights[i] * u * u;
            gradient[i] = 2.0 * w.motor_weights[i] * u;
        }
        for i in 0..3 {
            let e = x[4 + i] - t.position[i];
            cost += w.position_weights[i] * e * e;
            gradient[4 + i] = 2.0 * w.position_weights[i] * e;

            let e = x[7 + i] - t.velocity[i];
            cost += w.velocity_weights[i] * e * e;
            gradient[7 + i] = 2.0 * w.velocity_weights[i] * e;
        }
        cost
    }
}

// ---------------------------------------------------------------------------
// MecanumDynamics
// ---------------------------------------------------------------------------

/// Discretized mecanum dynamics with forward-mode derivatives.
#[derive(Debug, Clone)]
pub struct MecanumDynamics {
    geometry: MecanumGeometry,
    integration: IntegrationConfig,
    residual_sparsity: SparsityDescriptor,
    jacobian_sparsity: SparsityDescriptor,
}

impl MecanumDynamics {
    pub fn new(geometry: MecanumGeometry, integration: IntegrationConfig) -> Result<Self, SparseError> {
        Ok(Self {
            geometry,
            integration,
            residual_sparsity: SparsityDescriptor::from_compact(&DYNAMICS_RESIDUAL_SPARSITY)?,
            jacobian_sparsity: SparsityDescriptor::from_compact(&DYNAMICS_JACOBIAN_SPARSITY)?,
        })
    }

    pub const fn integration(&self) -> &IntegrationConfig {
        &self.integration
    }

    /// Next `[position, velocity]` without derivatives.
    pub fn next_state(
        &self,
        x: &[f64; STAGE_VARS],
        p: &StageParameters,
    ) -> Result<[f64; DYNAMICS_DIM], ModelError> {
        integrate_stage(&self.geometry, &p.model, &self.integration, x)
    }
}

impl DynamicsEvaluator for MecanumDynamics {
    fn residual_sparsity(&self) -> &SparsityDescriptor {
        &self.residual_sparsity
    }

    fn jacobian_sparsity(&self) -> &SparsityDescriptor {
        &self.jacobian_sparsity
    }

    fn evaluate(
        &self,
        x: &[f64; STAGE_VARS],
        p: &StageParameters,
        residual: &mut [f64],
        jacobian: &mut [f64],
    ) -> Result<(), ModelError> {
        let next = self.next_state(x, p)?;
        for (slot, &row) in residual.iter_mut().zip(self.residual_sparsity.rowidx()) {
            *slot = next[row];
        }

        // One forward pass per column, seeding that variable's tangent.
        let colptr = self.jacobian_sparsity.colptr();
        let rowidx = self.jacobian_sparsity.rowidx();
        for j in 0..self.jacobian_sparsity.ncols() {
            let (start, end) = (colptr[j], colptr[j + 1]);
            if start == end {
                continue;
            }
            let seeded: [Dual64; STAGE_VARS] =
                std::array::from_fn(|i| Dual64::new(x[i], if i == j { 1.0 } else { 0.0 }));
            let out = integrate_stage(&self.geometry, &p.model, &self.integration, &seeded)?;
            for k in start..end {
                jacobian[k] = out[rowidx[k]].eps;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use drivempc_core::types::{DriveModel, ObjectiveWeights, TargetState};

    fn params() -> StageParameters {
        StageParameters::new(
            DriveModel::standard(12.0),
            TargetState {
                position: [1.0, 0.5, 0.2],
                velocity: [0.3, 0.0, 0.0],
            },
            ObjectiveWeights {
                motor_weights: [0.1, 0.2, 0.3, 0.4],
                position_weights: [1.0, 2.0, 3.0],
                velocity_weights: [0.5, 0.5, 0.5],
            },
        )
    }

    fn sample_stage() -> [f64; STAGE_VARS] {
        [0.4, 0.6, 0.5, 0.3, 0.1, -0.05, 0.2, 0.3, 0.1, -0.2]
    }

    #[test]
    fn published_patterns_decode() {
        let objective = TrackingObjective::new().unwrap();
        assert_eq!(objective.gradient_sparsity().nnz(), 10);
        let dynamics = MecanumDynamics::new(MecanumGeometry::default(), IntegrationConfig::default())
            .unwrap();
        assert_eq!(dynamics.residual_sparsity().nnz(), 6);
        assert_eq!(dynamics.jacobian_sparsity().nnz(), 50);
        assert!(dynamics.jacobian_sparsity().expect_shape(6, 10).is_ok());
    }

    #[test]
    fn objective_gradient_matches_finite_differences() {
        let objective = TrackingObjective::new().unwrap();
        let p = params();
        let x = sample_stage();
        let mut grad = [0.0; 10];
        let f0 = objective.evaluate(&x, &p, &mut grad);
        assert_relative_eq!(
            f0,
            drivempc_core::stage_objective(
                &p,
                &drivempc_core::StageState::new(
                    [x[0], x[1], x[2], x[3]],
                    [x[4], x[5], x[6]],
                    [x[7], x[8], x[9]],
                ),
            ),
            epsilon = 1e-12
        );

        let h = 1e-6;
        let mut scratch = [0.0; 10];
        for j in 0..STAGE_VARS {
            let mut xp = x;
            xp[j] += h;
            let mut xm = x;
            xm[j] -= h;
            let fd = (objective.evaluate(&xp, &p, &mut scratch)
                - objective.evaluate(&xm, &p, &mut scratch))
                / (2.0 * h);
            assert_relative_eq!(grad[j], fd, epsilon = 1e-6);
        }
    }

    #[test]
    fn dynamics_jacobian_matches_finite_differences() {
        let dynamics = MecanumDynamics::new(MecanumGeometry::default(), IntegrationConfig::default())
            .unwrap();
        let p = params();
        let x = sample_stage();
        let mut residual = [0.0; 6];
        let mut jac = [0.0; 50];
        dynamics.evaluate(&x, &p, &mut residual, &mut jac).unwrap();

        let mut dense = [0.0; 60];
        crate::sparse::sparse_to_dense(dynamics.jacobian_sparsity(), &jac, &mut dense).unwrap();

        let h = 1e-7;
        for j in 0..STAGE_VARS {
            let mut xp = x;
            xp[j] += h;
            let mut xm = x;
            xm[j] -= h;
            let fp = dynamics.next_state(&xp, &p).unwrap();
            let fm = dynamics.next_state(&xm, &p).unwrap();
            for i in 0..DYNAMICS_DIM {
                let fd = (fp[i] - fm[i]) / (2.0 * h);
                assert_relative_eq!(dense[j * 6 + i], fd, epsilon = 1e-4, max_relative = 1e-4);
            }
        }
    }

    #[test]
    fn structural_zeros_are_numerically_zero() {
        let dynamics = MecanumDynamics::new(MecanumGeometry::default(), IntegrationConfig::default())
            .unwrap();
        let p = params();
        let x = sample_stage();
        let h = 1e-6;
        // y does not influence next x, x does not influence next y.
        for (col, row) in [(4, 1), (5, 0), (4, 3), (5, 5)] {
            let mut xp = x;
            xp[col] += h;
            let base = dynamics.next_state(&x, &p).unwrap();
            let moved = dynamics.next_state(&xp, &p).unwrap();
            assert_relative_eq!(base[row], moved[row], epsilon = 1e-14);
        }
    }

    #[test]
    fn residual_is_next_state() {
        let dynamics = MecanumDynamics::new(MecanumGeometry::default(), IntegrationConfig::default())
            .unwrap();
        let p = params();
        let x = sample_stage();
        let mut residual = [0.0; 6];
        let mut jac = [0.0; 50];
        dynamics.evaluate(&x, &p, &mut residual, &mut jac).unwrap();
        assert_eq!(residual, dynamics.next_state(&x, &p).unwrap());
    }
}
