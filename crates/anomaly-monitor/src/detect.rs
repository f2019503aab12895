//! Ensemble Combination
//!
//! Merges the rule-based and isolation-forest scores into one ensemble score
//! and flags each ticker's top tail as anomalous.

use anomaly_core::stats::quantile;
use anomaly_core::{
    AnomalyResult, DetectionConfig, EnsembleWeights, FeatureTable, ScoreRow, ScoreSeries, ScoreTable,
};
use std::collections::BTreeMap;

/// Weighted linear combination of two score series with a per-ticker quantile alert
pub struct EnsembleCombiner {
    weights: EnsembleWeights,
    /// Fraction of each ticker's rows expected above the alert threshold
    alert_rate: f64,
}

impl EnsembleCombiner {
    pub fn new(weights: EnsembleWeights, alert_rate: f64) -> Self {
        Self { weights, alert_rate }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(config.monitoring.score_ensemble.clone(), config.alert_rate())
    }

    /// Combine scores expressed on `features`' index into the score table.
    ///
    /// Absent scores count as zero signal. The alert threshold of each ticker is
    /// the `1 - alert_rate` quantile of that ticker's own ensemble scores.
    pub fn combine(
        &self,
        features: &FeatureTable,
        score_z: &ScoreSeries,
        score_iforest: &ScoreSeries,
    ) -> AnomalyResult<ScoreTable> {
        let z = score_z.aligned_to(features)?.filled(0.0);
        let iforest = score_iforest.aligned_to(features)?.filled(0.0);

        let ensemble: Vec<f64> = z
            .iter()
            .zip(&iforest)
            .map(|(z, f)| self.weights.w_zscore * z + self.weights.w_iforest * f)
            .collect();

        let thresholds = self.ticker_thresholds(features, &ensemble);

        let rows: Vec<ScoreRow> = features
            .rows()
            .iter()
            .enumerate()
            .map(|(i, feature)| {
                let mut row = ScoreRow::from_feature(feature, z[i], iforest[i], ensemble[i]);
                row.is_anomaly = thresholds
                    .get(feature.ticker.as_str())
                    .is_some_and(|&thr| ensemble[i] >= thr);
                row
            })
            .collect();

        let table = ScoreTable::from_rows(rows);
        tracing::info!(
            "Ensemble: {} rows, {} flagged anomalous (alert rate {:.3})",
            table.len(),
            table.anomaly_count(),
            self.alert_rate
        );
        Ok(table)
    }

    /// Ticker -> ensemble-score threshold over that ticker's full row set
    fn ticker_thresholds<'a>(&self, features: &'a FeatureTable, ensemble: &[f64]) -> BTreeMap<&'a str, f64> {
        features
            .ticker_index()
            .into_iter()
            .filter_map(|(ticker, positions)| {
                let values: Vec<f64> = positions.iter().map(|&p| ensemble[p]).collect();
                quantile(&values, 1.0 - self.alert_rate).map(|thr| (ticker, thr))
            })
            .collect()
    }
}
