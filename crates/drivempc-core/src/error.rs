use thiserror::Error;

/// Top-level error type for drivempc-core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid stage duration: {0} (must be > 0)")]
    InvalidStageDt(f64),

    #[error("Substep count must be at least 1")]
    ZeroSubsteps,

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Path schedule errors.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Schedule has no waypoints")]
    Empty,
}

/// Flat-buffer layout errors.
///
/// Copy + static messages so they can be raised inside the solve path
/// without allocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("{what} buffer length mismatch: expected {expected}, got {got}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Stage index {index} out of range (horizon has {stages} stages)")]
    StageOutOfRange { index: usize, stages: usize },
}
