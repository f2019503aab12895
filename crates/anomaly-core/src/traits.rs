use async_trait::async_trait;
use crate::{AnomalyError, FeatureTable, OhlcvPanel, PanelRequest, ScoreSeries};

/// Trait for row-level anomaly scorers.
///
/// Implementations return a series expressed on the input table's index.
pub trait AnomalyScorer: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, features: &FeatureTable) -> Result<ScoreSeries, AnomalyError>;
}

/// Trait for providers of daily OHLCV history
#[async_trait]
pub trait OhlcvSource: Send + Sync {
    /// Stable description of where the data comes from, e.g. a file path
    fn identity(&self) -> String;

    async fn fetch(&self, request: &PanelRequest) -> Result<OhlcvPanel, AnomalyError>;
}
