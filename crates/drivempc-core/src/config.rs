use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::DriveModel;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_stage_dt() -> f64 {
    0.1
}
const fn default_substeps() -> u32 {
    10
}
const fn default_max_iterations() -> u32 {
    100
}
const fn default_step_tolerance() -> f64 {
    1e-6
}
const fn default_equality_tolerance() -> f64 {
    1e-6
}
const fn default_command_limit() -> f64 {
    1.0
}
const fn default_curvature_step() -> f64 {
    1e-4
}
const fn default_regularization() -> f64 {
    1e-6
}
const fn default_line_search_steps() -> u32 {
    12
}
const fn default_verbose() -> bool {
    false
}

// ---------------------------------------------------------------------------
// IntegrationConfig
// ---------------------------------------------------------------------------

/// Discretization of the continuous drivetrain dynamics between stages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Duration of one stage in seconds (default: 0.1).
    #[serde(default = "default_stage_dt")]
    pub stage_dt: f64,

    /// Explicit Euler substeps per stage (default: 10).
    /// Roller friction is stiff, so a single Euler step per stage diverges.
    #[serde(default = "default_substeps")]
    pub substeps: u32,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            stage_dt: default_stage_dt(),
            substeps: default_substeps(),
        }
    }
}

impl IntegrationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stage_dt.is_nan() || self.stage_dt <= 0.0 {
            return Err(ConfigError::InvalidStageDt(self.stage_dt));
        }
        if self.substeps == 0 {
            return Err(ConfigError::ZeroSubsteps);
        }
        Ok(())
    }

    /// Duration of one Euler substep.
    pub fn substep_dt(&self) -> f64 {
        self.stage_dt / f64::from(self.substeps)
    }
}

// ---------------------------------------------------------------------------
// SolverConfig
// ---------------------------------------------------------------------------

/// Settings for the reference SQP backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Maximum SQP iterations (default: 100).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Converged when the step infinity norm drops below this (default: 1e-6).
    #[serde(default = "default_step_tolerance")]
    pub step_tolerance: f64,

    /// Converged only if the equality residual is below this (default: 1e-6).
    #[serde(default = "default_equality_tolerance")]
    pub equality_tolerance: f64,

    /// Box bound on every motor command (default: 1.0).
    #[serde(default = "default_command_limit")]
    pub command_limit: f64,

    /// Perturbation used to sample objective curvature (default: 1e-4).
    #[serde(default = "default_curvature_step")]
    pub curvature_step: f64,

    /// Diagonal added to the QP Hessian (default: 1e-6).
    #[serde(default = "default_regularization")]
    pub regularization: f64,

    /// Maximum backtracking halvings per iteration (default: 12).
    #[serde(default = "default_line_search_steps")]
    pub line_search_steps: u32,

    /// Write one progress line per iteration to the diagnostic sink.
    #[serde(default = "default_verbose")]
    pub verbose: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            step_tolerance: default_step_tolerance(),
            equality_tolerance: default_equality_tolerance(),
            command_limit: default_command_limit(),
            curvature_step: default_curvature_step(),
            regularization: default_regularization(),
            line_search_steps: default_line_search_steps(),
            verbose: default_verbose(),
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(invalid("solver.max_iterations", "must be at least 1"));
        }
        positive("solver.step_tolerance", self.step_tolerance)?;
        positive("solver.equality_tolerance", self.equality_tolerance)?;
        positive("solver.command_limit", self.command_limit)?;
        positive("solver.curvature_step", self.curvature_step)?;
        if self.regularization.is_nan() || self.regularization < 0.0 {
            return Err(invalid("solver.regularization", "must be >= 0"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MpcConfig
// ---------------------------------------------------------------------------

/// Top-level configuration, loadable from TOML.
///
/// ```toml
/// [model]
/// motor_constant = 0.3
/// # ...
///
/// [integration]
/// stage_dt = 0.1
/// substeps = 10
///
/// [solver]
/// max_iterations = 100
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MpcConfig {
    #[serde(default)]
    pub model: DriveModel,

    #[serde(default)]
    pub integration: IntegrationConfig,

    #[serde(default)]
    pub solver: SolverConfig,
}

impl MpcConfig {
    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("model.robot_mass", self.model.robot_mass)?;
        positive("model.robot_moment", self.model.robot_moment)?;
        positive("model.armature_resistance", self.model.armature_resistance)?;
        if self.model.wheel_moment < 0.0 || self.model.roller_moment < 0.0 {
            return Err(invalid("model", "wheel and roller moments must be >= 0"));
        }
        self.integration.validate()?;
        self.solver.validate()
    }

    /// Parse from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}

fn positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_nan() || value <= 0.0 {
        return Err(invalid(field, &format!("{value} must be > 0")));
    }
    Ok(())
}
