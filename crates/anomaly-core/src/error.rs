use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnomalyError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Every ticker was skipped by the isolation model, so no model scores exist.
    #[error("Isolation forest produced no scores for any ticker (insufficient history)")]
    NoModelScores,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AnomalyResult<T> = Result<T, AnomalyError>;
