//! Anomaly Scoring Models
//!
//! Two independent row-level scorers over the feature table:
//! a rule-based z-score exceedance score and a per-ticker isolation forest.

pub mod isolation;
pub mod isolation_forest;
pub mod zscore;

pub use isolation::{IsolationOutcome, IsolationScorer, TickerModel, MIN_MODEL_ROWS, SCORE_IFOREST};
pub use isolation_forest::{FeatureMatrix, IsolationForest, IsolationForestParams};
pub use zscore::{ZScoreScorer, SCORE_Z};
