//! Batch pipeline: features -> scores -> ensemble -> reports.

use anomaly_core::{AnomalyResult, AnomalyScorer, DetectionConfig, FeatureTable, OhlcvPanel, ScoreTable};
use anomaly_models::{IsolationScorer, ZScoreScorer};
use chrono::NaiveDate;
use feature_builder::FeatureBuilder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::alerting::{AlertPaths, AlertWriter};
use crate::config::EvaluationConfig;
use crate::detect::EnsembleCombiner;
use crate::error::MonitorResult;
use crate::evaluation::{
    event_study, hit_rate_extreme_moves, write_event_study, write_hit_rate, EventStudyRow,
    EVENT_STUDY_FILE, HIT_RATE_FILE,
};
use crate::io::{write_atomic, write_feature_table, write_score_rows};

pub const FEATURES_FILE: &str = "features.csv";
pub const SCORES_FILE: &str = "scores.csv";
pub const SUMMARY_FILE: &str = "run_summary.json";

#[derive(Debug, Clone)]
pub struct DetectionOutput {
    pub features: FeatureTable,
    pub scores: ScoreTable,
    /// Tickers left without an isolation-forest score
    pub skipped_tickers: Vec<String>,
}

/// Run both scorers concurrently over `features` and combine them.
pub fn score_features(
    features: &FeatureTable,
    config: &DetectionConfig,
) -> AnomalyResult<(ScoreTable, Vec<String>)> {
    let zscore = ZScoreScorer::new(config.models.zscore.clone());
    let isolation = IsolationScorer::new(config.models.isolation_forest.clone());

    let (score_z, outcome) = rayon::join(
        || zscore.score(features),
        || isolation.score_detailed(features),
    );
    let score_z = score_z?;
    let outcome = outcome?;

    let scores = EnsembleCombiner::from_config(config).combine(features, &score_z, &outcome.scores)?;
    Ok((scores, outcome.skipped))
}

/// Panel in, scored table out. Pure: nothing is written.
pub fn run_detection(panel: &OhlcvPanel, config: &DetectionConfig) -> AnomalyResult<DetectionOutput> {
    tracing::info!(
        "Detection run: {} tickers, {} bars",
        panel.len(),
        panel.bar_count()
    );
    let features = FeatureBuilder::new(config.features.clone()).build(panel);
    let (scores, skipped_tickers) = score_features(&features, config)?;
    Ok(DetectionOutput {
        features,
        scores,
        skipped_tickers,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub tickers: usize,
    pub feature_rows: usize,
    pub score_rows: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub alert_rate: f64,
    pub anomalies: usize,
    pub anomalies_by_ticker: BTreeMap<String, usize>,
    pub iforest_skipped_tickers: Vec<String>,
}

impl RunSummary {
    pub fn new(output: &DetectionOutput, config: &DetectionConfig) -> Self {
        let mut anomalies_by_ticker: BTreeMap<String, usize> = output
            .features
            .tickers()
            .into_iter()
            .map(|t| (t.to_string(), 0))
            .collect();
        for row in output.scores.anomalies() {
            *anomalies_by_ticker.entry(row.ticker.clone()).or_default() += 1;
        }

        let rows = output.scores.rows();
        Self {
            tickers: anomalies_by_ticker.len(),
            feature_rows: output.features.len(),
            score_rows: output.scores.len(),
            first_date: rows.first().map(|r| r.date),
            last_date: rows.last().map(|r| r.date),
            alert_rate: config.alert_rate(),
            anomalies: output.scores.anomaly_count(),
            anomalies_by_ticker,
            iforest_skipped_tickers: output.skipped_tickers.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportPaths {
    pub features: PathBuf,
    pub scores: PathBuf,
    pub alerts: AlertPaths,
    pub summary: PathBuf,
}

/// Persist every table of a detection run plus its summary under `reports_dir`.
pub fn write_reports(
    output: &DetectionOutput,
    config: &DetectionConfig,
    reports_dir: &Path,
) -> MonitorResult<(ReportPaths, RunSummary)> {
    let features = reports_dir.join(FEATURES_FILE);
    let scores = reports_dir.join(SCORES_FILE);
    let summary_path = reports_dir.join(SUMMARY_FILE);

    write_feature_table(&features, &output.features)?;
    write_score_rows(&scores, output.scores.rows())?;
    let alerts = AlertWriter::new(reports_dir, config.monitoring.top_k_daily).write(&output.scores)?;

    let summary = RunSummary::new(output, config);
    let json = serde_json::to_vec_pretty(&summary)?;
    write_atomic(&summary_path, &json)?;

    tracing::info!("Reports written to {}", reports_dir.display());
    Ok((
        ReportPaths {
            features,
            scores,
            alerts,
            summary: summary_path,
        },
        summary,
    ))
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    pub event_study: Vec<EventStudyRow>,
    pub hit_rate: f64,
}

/// Event study and extreme-move hit rate of a detection run, written under `reports_dir`.
pub fn run_evaluation(
    panel: &OhlcvPanel,
    output: &DetectionOutput,
    config: &EvaluationConfig,
    reports_dir: &Path,
) -> MonitorResult<EvaluationReport> {
    let rows = event_study(&output.scores, panel, &config.horizons_days);
    let hit_rate = hit_rate_extreme_moves(&output.scores, config.extreme_move_quantile);

    write_event_study(&reports_dir.join(EVENT_STUDY_FILE), &rows)?;
    write_hit_rate(&reports_dir.join(HIT_RATE_FILE), config.extreme_move_quantile, hit_rate)?;

    for row in &rows {
        tracing::info!(
            "Event study h={} {}: n={} mean={:.5} median={:.5}",
            row.horizon_days,
            row.group,
            row.count,
            row.mean,
            row.median
        );
    }
    tracing::info!("Extreme-move hit rate: {:.4}", hit_rate);

    Ok(EvaluationReport {
        event_study: rows,
        hit_rate,
    })
}
