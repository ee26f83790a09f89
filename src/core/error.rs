use thiserror::Error;

/// Error taxonomy for the projection core.
///
/// Business edge cases (insufficient funds, non-convergence) are *not*
/// errors; they surface as flags on the returned plan. Errors here mean the
/// input was invalid or a run had to be aborted with no partial output.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("projection aborted for scenario {scenario_id} at month {month_index}: {message}")]
    ProjectionAborted {
        scenario_id: String,
        month_index: u32,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
