//! Per-ticker isolation forest scoring.
//!
//! One model per ticker, fitted only on that ticker's rows. Tickers with too
//! little usable history are skipped and keep no score; losing every ticker is
//! an error because the ensemble would have no model signal at all.

use anomaly_core::stats::standardize;
use anomaly_core::{
    AnomalyError, AnomalyResult, AnomalyScorer, FeatureTable, IsolationForestConfig, ScoreSeries,
};
use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::isolation_forest::{FeatureMatrix, IsolationForest, IsolationForestParams};

pub const SCORE_IFOREST: &str = "score_iforest";

/// Usable rows a ticker needs before a model is fitted for it
pub const MIN_MODEL_ROWS: usize = 200;

/// Scores plus the tickers that were skipped for short history
#[derive(Debug, Clone)]
pub struct IsolationOutcome {
    pub scores: ScoreSeries,
    pub skipped: Vec<String>,
}

/// A fitted model together with the table rows it was fitted on
#[derive(Debug, Clone)]
pub struct TickerModel {
    pub forest: IsolationForest,
    positions: Vec<usize>,
    matrix: FeatureMatrix,
}

impl TickerModel {
    /// Anomaly score per fitted row: negated decision function, re-standardized
    fn anomaly_scores(&self) -> AnomalyResult<Vec<Option<f64>>> {
        let raw: Vec<f64> = self
            .forest
            .decision_function(&self.matrix)?
            .into_iter()
            .map(|normality| -normality)
            .collect();
        Ok(standardize(&raw))
    }
}

pub struct IsolationScorer {
    config: IsolationForestConfig,
}

impl IsolationScorer {
    pub fn new(config: IsolationForestConfig) -> Self {
        Self { config }
    }

    fn params(&self) -> IsolationForestParams {
        IsolationForestParams {
            n_estimators: self.config.n_estimators,
            contamination: self.config.contamination,
            random_state: self.config.random_state,
        }
    }

    /// Fit one independent model for a ticker's rows (`positions` index into `table`).
    ///
    /// Rows with any non-finite model input are left out. Returns `Ok(None)`
    /// when fewer than [`MIN_MODEL_ROWS`] usable rows remain.
    pub fn fit_ticker(&self, table: &FeatureTable, positions: &[usize]) -> AnomalyResult<Option<TickerModel>> {
        let (usable, vectors): (Vec<usize>, Vec<[f64; 7]>) = positions
            .iter()
            .map(|&p| (p, table.rows()[p].model_vector()))
            .filter(|(_, v)| v.iter().all(|x| x.is_finite()))
            .unzip();

        if usable.len() < MIN_MODEL_ROWS {
            return Ok(None);
        }

        let matrix = FeatureMatrix::from_rows(&vectors);
        let forest = IsolationForest::fit(&matrix, &self.params())?;
        Ok(Some(TickerModel {
            forest,
            positions: usable,
            matrix,
        }))
    }

    /// Fit every ticker in parallel. Skipped tickers are absent from the map.
    pub fn fit_models(&self, table: &FeatureTable) -> AnomalyResult<BTreeMap<String, TickerModel>> {
        let index = table.ticker_index();
        let fitted: Vec<(String, Option<TickerModel>)> = index
            .into_iter()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(ticker, positions)| {
                self.fit_ticker(table, &positions)
                    .map(|model| (ticker.to_string(), model))
            })
            .collect::<AnomalyResult<_>>()?;

        Ok(fitted
            .into_iter()
            .filter_map(|(ticker, model)| {
                if model.is_none() {
                    tracing::warn!(
                        "Isolation forest: skipping {} (fewer than {} usable rows)",
                        ticker,
                        MIN_MODEL_ROWS
                    );
                }
                model.map(|m| (ticker, m))
            })
            .collect())
    }

    /// Scores reindexed onto the full table plus the list of skipped tickers
    pub fn score_detailed(&self, table: &FeatureTable) -> AnomalyResult<IsolationOutcome> {
        let models = self.fit_models(table)?;
        if models.is_empty() {
            return Err(AnomalyError::NoModelScores);
        }

        let mut scores = ScoreSeries::missing(SCORE_IFOREST, table.len());
        for model in models.values() {
            scores.scatter(&model.positions, &model.anomaly_scores()?);
        }

        let skipped: Vec<String> = table
            .tickers()
            .into_iter()
            .filter(|t| !models.contains_key(*t))
            .map(str::to_string)
            .collect();

        tracing::info!(
            "Isolation forest: {} tickers scored, {} skipped, {} of {} rows scored",
            models.len(),
            skipped.len(),
            scores.present_count(),
            table.len()
        );
        Ok(IsolationOutcome { scores, skipped })
    }
}

impl AnomalyScorer for IsolationScorer {
    fn name(&self) -> &'static str {
        SCORE_IFOREST
    }

    fn score(&self, features: &FeatureTable) -> Result<ScoreSeries, AnomalyError> {
        self.score_detailed(features).map(|outcome| outcome.scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anomaly_core::stats::mean_std;
    use anomaly_core::testing::{synthetic_panel, SyntheticTicker};
    use anomaly_core::FeatureConfig;
    use feature_builder::build_features;

    fn feature_config() -> FeatureConfig {
        FeatureConfig {
            vol_window: 10,
            vol_long_window: 20,
            volume_window: 10,
            range_window: 10,
            min_history: 50,
        }
    }

    fn scorer() -> IsolationScorer {
        IsolationScorer::new(IsolationForestConfig {
            contamination: 0.02,
            n_estimators: 50,
            random_state: 42,
        })
    }

    #[test]
    fn test_short_ticker_skipped_others_scored() {
        // warm-up is 39 rows: LONG keeps 261 rows, SHORT keeps 141
        let panel = synthetic_panel(&[
            SyntheticTicker::new("LONG", 300, 1),
            SyntheticTicker::new("SHORT", 180, 2),
        ]);
        let table = build_features(&panel, &feature_config());
        let outcome = scorer().score_detailed(&table).unwrap();

        assert_eq!(outcome.skipped, vec!["SHORT".to_string()]);
        assert_eq!(outcome.scores.len(), table.len());

        let index = table.ticker_index();
        assert!(index["SHORT"].iter().all(|&p| outcome.scores.get(p).is_none()));

        let long: Vec<f64> = index["LONG"]
            .iter()
            .map(|&p| outcome.scores.get(p).unwrap())
            .collect();
        let (m, s) = mean_std(&long).unwrap();
        assert!(m.abs() < 1e-9);
        assert!((s - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_all_tickers_skipped_is_fatal() {
        let panel = synthetic_panel(&[
            SyntheticTicker::new("A", 150, 1),
            SyntheticTicker::new("B", 150, 2),
        ]);
        let table = build_features(&panel, &feature_config());
        assert!(!table.is_empty());
        let err = scorer().score_detailed(&table).unwrap_err();
        assert!(matches!(err, AnomalyError::NoModelScores));
    }

    #[test]
    fn test_non_finite_rows_become_missing() {
        let panel = synthetic_panel(&[SyntheticTicker::new("A", 300, 3)]);
        let table = build_features(&panel, &feature_config());
        let mut rows = table.rows().to_vec();
        rows[5].vol_z = f64::INFINITY;
        let table = FeatureTable::from_rows(rows);

        let scores = scorer().score(&table).unwrap();
        assert_eq!(scores.get(5), None);
        assert_eq!(scores.present_count(), table.len() - 1);
    }

    #[test]
    fn test_scores_are_reproducible() {
        let panel = synthetic_panel(&[
            SyntheticTicker::new("A", 300, 3),
            SyntheticTicker::new("B", 300, 4),
        ]);
        let table = build_features(&panel, &feature_config());
        let first = scorer().score(&table).unwrap();
        let second = scorer().score(&table).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_return_spike_scores_high() {
        let panel = synthetic_panel(&[SyntheticTicker::new("A", 300, 6).with_return_spike(250, 10.0)]);
        let table = build_features(&panel, &feature_config());
        let scores = scorer().score(&table).unwrap();
        let spike_pos = table
            .rows()
            .iter()
            .position(|r| r.date == anomaly_core::testing::synthetic_date(250))
            .unwrap();
        // well inside the top few percent of the ticker's history
        assert!(scores.get(spike_pos).unwrap() > 2.0);
    }
}
