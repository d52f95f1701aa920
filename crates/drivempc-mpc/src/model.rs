//! Mecanum drivetrain dynamics.
//!
//! The robot is a planar rigid body driven by four mecanum wheels. Each wheel
//! contributes a wheel DOF (motor-driven) and a roller DOF (passive). Both are
//! mapped to the body twist through the constant matrix `R` (8x3):
//!
//! ```text
//! ω_wheels_rollers = R · Rot(θ)ᵀ · v
//! H(θ) · a = Rot Rᵀ τ − K(θ, ω) · v
//! H = M_r + Rot Rᵀ M_w R Rotᵀ,   K = Rot Rᵀ M_w R Rot_dotᵀ
//! ```
//!
//! Motor torque is `(V·u − k·ω)/R_a` on the wheels. Friction on every DOF is
//! a smooth sign `2/(1 + e^{−10ω}) − 1` times its friction coefficient.
//!
//! All functions are generic over [`DualNum`] so the same code produces
//! plain values (`f64`) and forward-mode derivatives (`Dual64`).

use drivempc_core::config::IntegrationConfig;
use drivempc_core::types::DriveModel;
use nalgebra::{Matrix3, SMatrix, SVector, Vector3, Vector4};
use num_dual::DualNum;
use thiserror::Error;

/// Distance from the robot centre to the front/back axles (m).
pub const FORWARDS_AXIS: f64 = 0.115;
/// Distance from the robot centre to the left/right wheel planes (m).
pub const SIDEWAYS_AXIS: f64 = 0.1325;
/// Wheel radius (m).
pub const WHEEL_RADIUS: f64 = 0.048;
/// Slope of the smooth friction sign at zero velocity.
const FRICTION_SHARPNESS: f64 = 10.0;

/// Number of generalized wheel/roller coordinates.
pub const NUM_DOFS: usize = 8;

/// Twist-to-DOF map `R`.
pub type DofMap = SMatrix<f64, NUM_DOFS, 3>;

/// Failures of the drivetrain model for a given set of constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Chassis inertia is singular or not finite; check robot mass, moments and geometry")]
    SingularInertia,
}

// ---------------------------------------------------------------------------
// MecanumGeometry
// ---------------------------------------------------------------------------

/// Constant kinematic map from body twist to wheel and roller speeds.
#[derive(Debug, Clone, PartialEq)]
pub struct MecanumGeometry {
    /// Rows 0..4: wheel angular velocity per body twist (fl, fr, bl, br).
    /// Rows 4..8: roller contact-point velocity per body twist.
    map: DofMap,
}

impl Default for MecanumGeometry {
    fn default() -> Self {
        Self::new(FORWARDS_AXIS, SIDEWAYS_AXIS, WHEEL_RADIUS)
    }
}

impl MecanumGeometry {
    /// Geometry for a symmetric X-configuration chassis.
    pub fn new(forwards_axis: f64, sideways_axis: f64, wheel_radius: f64) -> Self {
        let d = [1.0, -1.0, 1.0, -1.0].map(|sign| sign * sideways_axis);
        let s = [1.0, 1.0, -1.0, -1.0].map(|sign| sign * forwards_axis);
        let roller_angles = [
            std::f64::consts::FRAC_PI_4,
            -std::f64::consts::FRAC_PI_4,
            -std::f64::consts::FRAC_PI_4,
            std::f64::consts::FRAC_PI_4,
        ];

        let mut map = DofMap::zeros();
        for i in 0..4 {
            let (sin, cos) = roller_angles[i].sin_cos();
            let scale = wheel_radius * sin;
            map.set_row(
                i,
                &nalgebra::RowVector3::new(
                    sin / scale,
                    -cos / scale,
                    (-d[i] * sin - s[i] * cos) / scale,
                ),
            );
            map.set_row(4 + i, &nalgebra::RowVector3::new(0.0, 1.0 / sin, s[i] / sin));
        }
        Self { map }
    }

    pub const fn map(&self) -> &DofMap {
        &self.map
    }

    /// `Rᵀ M_w R` for the given wheel and roller moments.
    pub fn reflected_inertia(&self, model: &DriveModel) -> Matrix3<f64> {
        let moments = SVector::<f64, NUM_DOFS>::from_fn(|i, _| {
            if i < 4 {
                model.wheel_moment
            } else {
                model.roller_moment
            }
        });
        self.map.transpose() * SMatrix::<f64, NUM_DOFS, NUM_DOFS>::from_diagonal(&moments) * self.map
    }

    /// Inverse of the body-frame inertia `M_r + Rᵀ M_w R`.
    ///
    /// `H(θ) = Rot (M_r + Rᵀ M_w R) Rotᵀ` because `M_r` commutes with a
    /// planar rotation, so this one inverse serves every heading.
    pub fn inverse_inertia(&self, model: &DriveModel) -> Result<Matrix3<f64>, ModelError> {
        let chassis = Matrix3::from_diagonal(&Vector3::new(
            model.robot_mass,
            model.robot_mass,
            model.robot_moment,
        ));
        (chassis + self.reflected_inertia(model))
            .try_inverse()
            .filter(|inverse| inverse.iter().all(|v| v.is_finite()))
            .ok_or(ModelError::SingularInertia)
    }

    /// Wheel and roller speeds for a body-frame twist.
    pub fn dof_velocities<D: DualNum<f64> + Copy>(
        &self,
        body_twist: &Vector3<D>,
    ) -> SVector<D, NUM_DOFS> {
        self.map.map(D::from) * body_twist
    }
}

// ---------------------------------------------------------------------------
// Continuous dynamics
// ---------------------------------------------------------------------------

fn rotation<D: DualNum<f64> + Copy>(heading: D) -> Matrix3<D> {
    let (s, c) = (heading.sin(), heading.cos());
    let (zero, one) = (D::from(0.0), D::from(1.0));
    Matrix3::new(c, -s, zero, s, c, zero, zero, zero, one)
}

fn rotation_derivative<D: DualNum<f64> + Copy>(heading: D, heading_rate: D) -> Matrix3<D> {
    let (s, c) = (heading.sin(), heading.cos());
    let zero = D::from(0.0);
    Matrix3::new(
        -s * heading_rate,
        -c * heading_rate,
        zero,
        c * heading_rate,
        -s * heading_rate,
        zero,
        zero,
        zero,
        zero,
    )
}

/// Smooth replacement for `sign(ω)`.
fn smooth_sign<D: DualNum<f64> + Copy>(velocity: D) -> D {
    D::from(2.0) / (D::from(1.0) + (-D::from(FRICTION_SHARPNESS) * velocity).exp()) - D::from(1.0)
}

/// Net torque on every wheel and roller DOF.
fn net_torque<D: DualNum<f64> + Copy>(
    model: &DriveModel,
    dof_velocity: &SVector<D, NUM_DOFS>,
    command: &Vector4<D>,
) -> SVector<D, NUM_DOFS> {
    let wheel_friction = model.wheel_friction();
    let roller_friction = model.roller_friction();
    SVector::from_fn(|i, _| {
        let (applied, friction) = if i < 4 {
            let back_emf = dof_velocity[i] * D::from(model.motor_constant);
            let applied = (command[i] * D::from(model.battery_voltage) - back_emf)
                / D::from(model.armature_resistance);
            (applied, wheel_friction[i])
        } else {
            (D::from(0.0), roller_friction[i - 4])
        };
        applied - smooth_sign(dof_velocity[i]) * D::from(friction)
    })
}

/// World-frame acceleration `[ax, ay, α]` of the chassis.
pub fn acceleration<D: DualNum<f64> + Copy>(
    geometry: &MecanumGeometry,
    model: &DriveModel,
    position: &Vector3<D>,
    velocity: &Vector3<D>,
    command: &Vector4<D>,
) -> Result<Vector3<D>, ModelError> {
    let inverse = geometry.inverse_inertia(model)?.map(D::from);
    let reflected = geometry.reflected_inertia(model).map(D::from);

    let rot = rotation(position[2]);
    let rot_t = rot.transpose();
    let rot_dot = rotation_derivative(position[2], velocity[2]);

    let dof_velocity = geometry.dof_velocities(&(rot_t * velocity));
    let torque = net_torque(model, &dof_velocity, command);
    let applied = rot * (geometry.map.map(D::from).transpose() * torque);
    let coriolis = rot * reflected * rot_dot.transpose() * velocity;

    Ok(rot * inverse * rot_t * (applied - coriolis))
}

// ---------------------------------------------------------------------------
// Discrete dynamics
// ---------------------------------------------------------------------------

/// Advance `[position, velocity]` by one stage under a constant command,
/// using explicit Euler substeps.
///
/// `stage` is laid out as `[command(4), position(3), velocity(3)]`; the
/// result is `[position(3), velocity(3)]` at the next stage.
pub fn integrate_stage<D: DualNum<f64> + Copy>(
    geometry: &MecanumGeometry,
    model: &DriveModel,
    integration: &IntegrationConfig,
    stage: &[D; 10],
) -> Result<[D; 6], ModelError> {
    let command = Vector4::new(stage[0], stage[1], stage[2], stage[3]);
    let mut position = Vector3::new(stage[4], stage[5], stage[6]);
    let mut velocity = Vector3::new(stage[7], stage[8], stage[9]);
    let h = D::from(integration.substep_dt());

    for _ in 0..integration.substeps {
        let accel = acceleration(geometry, model, &position, &velocity, &command)?;
        position += velocity * h;
        velocity += accel * h;
    }

    Ok([
        position[0],
        position[1],
        position[2],
        velocity[0],
        velocity[1],
        velocity[2],
    ])
}
