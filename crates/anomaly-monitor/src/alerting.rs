//! Alert Outputs
//!
//! Projections of the score table written for downstream review: every
//! flagged row, and the highest-scoring rows of each trading day.

use anomaly_core::{ScoreRow, ScoreTable};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::MonitorResult;
use crate::io::write_score_rows;

pub const ALERTS_FILE: &str = "alerts.csv";
pub const TOP_DAILY_FILE: &str = "top_anomalies_daily.csv";

/// Rows with `is_anomaly` set, in score-table order
pub fn alert_rows(scores: &ScoreTable) -> Vec<&ScoreRow> {
    scores.anomalies().collect()
}

/// Up to `k` rows per date with the largest ensemble score, descending.
///
/// Dates come out in ascending order. Rows with equal scores keep their
/// score-table order.
pub fn top_k_daily(scores: &ScoreTable, k: usize) -> Vec<&ScoreRow> {
    let mut by_date: BTreeMap<NaiveDate, Vec<&ScoreRow>> = BTreeMap::new();
    for row in scores.rows() {
        by_date.entry(row.date).or_default().push(row);
    }

    by_date
        .into_values()
        .flat_map(|mut day| {
            day.sort_by(|a, b| b.score_ensemble.total_cmp(&a.score_ensemble));
            day.truncate(k);
            day
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertPaths {
    pub alerts: PathBuf,
    pub top_daily: PathBuf,
    pub alert_count: usize,
    pub top_daily_count: usize,
}

/// Writes the alert and top-K tables into one output directory
pub struct AlertWriter {
    out_dir: PathBuf,
    top_k_daily: usize,
}

impl AlertWriter {
    pub fn new(out_dir: impl Into<PathBuf>, top_k_daily: usize) -> Self {
        Self {
            out_dir: out_dir.into(),
            top_k_daily,
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn write(&self, scores: &ScoreTable) -> MonitorResult<AlertPaths> {
        let alerts = self.out_dir.join(ALERTS_FILE);
        let top_daily = self.out_dir.join(TOP_DAILY_FILE);

        let alert_count = write_score_rows(&alerts, alert_rows(scores))?;
        let top_daily_count = write_score_rows(&top_daily, top_k_daily(scores, self.top_k_daily))?;

        tracing::info!(
            "Alerts written: {} anomalous rows, {} top-{} daily rows in {}",
            alert_count,
            top_daily_count,
            self.top_k_daily,
            self.out_dir.display()
        );

        Ok(AlertPaths {
            alerts,
            top_daily,
            alert_count,
            top_daily_count,
        })
    }
}
