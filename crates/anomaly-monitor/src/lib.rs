//! Anomaly Monitor
//!
//! Batch pipeline that scores every (date, ticker) of an OHLCV panel with a
//! rule-based z-score model and a per-ticker isolation forest, combines them,
//! and writes per-ticker alerts plus a daily top-K view.

pub mod alerting;
pub mod config;
pub mod detect;
pub mod error;
pub mod evaluation;
pub mod io;
pub mod pipeline;
pub mod source;

pub use alerting::{alert_rows, top_k_daily, AlertPaths, AlertWriter};
pub use config::{DataConfig, EvaluationConfig, OutputConfig, RunConfig};
pub use detect::EnsembleCombiner;
pub use error::{MonitorError, MonitorResult};
pub use evaluation::{event_study, forward_returns, hit_rate_extreme_moves, EventStudyRow, ForwardReturns};
pub use pipeline::{
    run_detection, run_evaluation, score_features, write_reports, DetectionOutput, EvaluationReport,
    ReportPaths, RunSummary,
};
pub use source::{CachedSource, CsvPanelSource};
