// drivempc-core: Data model, flat solver layout, config and errors for the mecanum drive MPC.

pub mod builder;
pub mod config;
pub mod error;
pub mod layout;
pub mod objective;
pub mod schedule;
pub mod types;

pub use builder::{ParameterSetBuilder, SolverInputBuilder, StageParametersBuilder};
pub use config::{IntegrationConfig, MpcConfig, SolverConfig};
pub use error::{ConfigError, CoreError, LayoutError, ScheduleError};
pub use layout::FlatLayout;
pub use objective::{stage_objective, total_objective};
pub use schedule::{ScheduleRow, load_schedule, read_schedule};
pub use types::{
    DriveModel, EXIT_OPTIMAL, NOMINAL_BATTERY_VOLTAGE, NUM_STAGES, ObjectiveWeights,
    ParameterSet, SolveDiagnostics, SolverInput, SolverOutput, StageParameters, StageState,
    StartState, TERMINAL_STAGE, TargetState,
};

pub mod prelude {
    pub use crate::builder::{ParameterSetBuilder, SolverInputBuilder, StageParametersBuilder};
    pub use crate::config::MpcConfig;
    pub use crate::layout::FlatLayout;
    pub use crate::types::{
        DriveModel, NUM_STAGES, ObjectiveWeights, ParameterSet, SolverInput, SolverOutput,
        StageParameters, StageState, StartState, TargetState,
    };
}
