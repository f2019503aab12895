//! Rule-based anomaly score built directly from feature z-scores.

use anomaly_core::stats::standardize;
use anomaly_core::{AnomalyError, AnomalyScorer, FeatureRow, FeatureTable, ScoreSeries, ZScoreConfig};

pub const SCORE_Z: &str = "score_z";

const W_RET: f64 = 1.0;
const W_VOL: f64 = 0.7;
const W_VOLUME: f64 = 0.5;
const W_RANGE: f64 = 0.3;

/// Weighted threshold exceedance of the feature z-scores, re-standardized per ticker.
///
/// No fitting: the output is a pure function of the table and thresholds.
pub struct ZScoreScorer {
    config: ZScoreConfig,
}

impl ZScoreScorer {
    pub fn new(config: ZScoreConfig) -> Self {
        Self { config }
    }

    /// Score before per-ticker standardization
    pub fn raw_score(&self, row: &FeatureRow) -> f64 {
        let cfg = &self.config;
        W_RET * excess(row.ret_z, cfg.ret_z_thresh)
            + W_VOL * excess(or_zero(row.vol_z), cfg.vol_z_thresh)
            + W_VOLUME * excess(row.volu_z, cfg.volu_z_thresh)
            + W_RANGE * or_zero(row.range_z).abs()
    }
}

impl AnomalyScorer for ZScoreScorer {
    fn name(&self) -> &'static str {
        SCORE_Z
    }

    fn score(&self, features: &FeatureTable) -> Result<ScoreSeries, AnomalyError> {
        let raw: Vec<f64> = features.rows().iter().map(|r| self.raw_score(r)).collect();

        // transform per ticker and scatter back: same rows, same order as the input
        let mut scores = ScoreSeries::missing(SCORE_Z, features.len());
        for (ticker, positions) in features.ticker_index() {
            let group: Vec<f64> = positions.iter().map(|&p| raw[p]).collect();
            let standardized = standardize(&group);
            if standardized.iter().all(|v| v.is_none()) {
                tracing::debug!("{}: z-score group has no spread ({} rows)", ticker, group.len());
            }
            scores.scatter(&positions, &standardized);
        }

        tracing::info!(
            "Z-score scorer: {} of {} rows scored",
            scores.present_count(),
            features.len()
        );
        Ok(scores)
    }
}

/// Magnitude beyond the threshold, zero inside it
fn excess(z: f64, threshold: f64) -> f64 {
    (z.abs() - threshold).max(0.0)
}

fn or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}
