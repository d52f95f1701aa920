//! Shared test fixtures and mocks for drivempc crates.
//!
//! Provides the nominal drive scenario, deterministic trajectories, counting
//! evaluators and a scripted engine that sweeps the callback over the horizon.

pub mod fixtures;
pub mod mocks;

// ---------------------------------------------------------------------------
// Re-exports for convenience
// ---------------------------------------------------------------------------

pub use fixtures::{
    nominal_input, nominal_parameter_set, nominal_stage_parameters, sample_trajectory,
};
pub use mocks::{CallCounter, ConstantObjective, PatternDynamics, StageRecord, SweepSolver};
