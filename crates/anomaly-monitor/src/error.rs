use anomaly_core::AnomalyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Anomaly(#[from] AnomalyError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type MonitorResult<T> = Result<T, MonitorError>;
