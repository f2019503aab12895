//! Event Study Evaluation
//!
//! Checks whether flagged days precede unusual forward returns, and how often
//! alerts land on a ticker's most extreme absolute moves.

use anomaly_core::stats::{median, quantile};
use anomaly_core::{OhlcvPanel, ScoreTable};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::MonitorResult;
use crate::io::{csv_bytes, write_atomic};

pub const EVENT_STUDY_FILE: &str = "event_study.csv";
pub const HIT_RATE_FILE: &str = "hit_rate_extreme_moves.txt";

const EVENT_STUDY_COLUMNS: [&str; 5] = ["horizon_days", "group", "count", "mean", "median"];

/// `adj_close[t + h] / adj_close[t] - 1` per (ticker, date) for each horizon
#[derive(Debug, Clone, Default)]
pub struct ForwardReturns {
    horizons: Vec<usize>,
    values: HashMap<(String, NaiveDate), Vec<Option<f64>>>,
}

impl ForwardReturns {
    pub fn horizons(&self) -> &[usize] {
        &self.horizons
    }

    /// Forward return of `ticker` on `date` over the `k`-th horizon
    pub fn get(&self, ticker: &str, date: NaiveDate, k: usize) -> Option<f64> {
        self.values
            .get(&(ticker.to_string(), date))
            .and_then(|row| row.get(k).copied().flatten())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub fn forward_returns(panel: &OhlcvPanel, horizons: &[usize]) -> ForwardReturns {
    let mut values = HashMap::new();
    for (ticker, bars) in panel.iter() {
        for (t, bar) in bars.iter().enumerate() {
            let row = horizons
                .iter()
                .map(|&h| {
                    bars.get(t + h)
                        .map(|ahead| ahead.adj_close / bar.adj_close - 1.0)
                        .filter(|r| r.is_finite())
                })
                .collect();
            values.insert((ticker.to_string(), bar.date), row);
        }
    }
    ForwardReturns {
        horizons: horizons.to_vec(),
        values,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventStudyRow {
    pub horizon_days: usize,
    pub group: &'static str,
    pub count: usize,
    pub mean: f64,
    pub median: f64,
}

/// Forward-return statistics of flagged vs. unflagged rows, per horizon.
///
/// Only rows with a forward return at every horizon take part, so all
/// horizons are computed over the same rows.
pub fn event_study(scores: &ScoreTable, panel: &OhlcvPanel, horizons: &[usize]) -> Vec<EventStudyRow> {
    let fwd = forward_returns(panel, horizons);
    let complete: Vec<(bool, Vec<f64>)> = scores
        .rows()
        .iter()
        .filter_map(|r| {
            let returns = (0..horizons.len())
                .map(|k| fwd.get(&r.ticker, r.date, k))
                .collect::<Option<Vec<f64>>>()?;
            Some((r.is_anomaly, returns))
        })
        .collect();

    let mut out = Vec::with_capacity(horizons.len() * 2);
    for (k, &h) in horizons.iter().enumerate() {
        for (group, flagged) in [("anomaly", true), ("non_anomaly", false)] {
            let returns: Vec<f64> = complete
                .iter()
                .filter(|(is_anomaly, _)| *is_anomaly == flagged)
                .map(|(_, row)| row[k])
                .collect();

            let mean = if returns.is_empty() {
                f64::NAN
            } else {
                returns.iter().sum::<f64>() / returns.len() as f64
            };
            out.push(EventStudyRow {
                horizon_days: h,
                group,
                count: returns.len(),
                mean,
                median: median(&returns).unwrap_or(f64::NAN),
            });
        }
    }
    out
}

/// Mean over tickers of the share of alerts whose |ret| reaches the ticker's
/// `q`-quantile of |ret|. Tickers with no alerts are left out; NaN if none remain.
pub fn hit_rate_extreme_moves(scores: &ScoreTable, q: f64) -> f64 {
    let mut by_ticker: BTreeMap<&str, Vec<(f64, bool)>> = BTreeMap::new();
    for row in scores.rows() {
        by_ticker
            .entry(row.ticker.as_str())
            .or_default()
            .push((row.ret.abs(), row.is_anomaly));
    }

    let rates: Vec<f64> = by_ticker
        .values()
        .filter_map(|rows| {
            let alerts = rows.iter().filter(|(_, flagged)| *flagged).count();
            if alerts == 0 {
                return None;
            }
            let abs: Vec<f64> = rows.iter().map(|(a, _)| *a).collect();
            let threshold = quantile(&abs, q)?;
            let hits = rows
                .iter()
                .filter(|(a, flagged)| *flagged && *a >= threshold)
                .count();
            Some(hits as f64 / alerts as f64)
        })
        .collect();

    if rates.is_empty() {
        f64::NAN
    } else {
        rates.iter().sum::<f64>() / rates.len() as f64
    }
}

pub fn write_event_study(path: &Path, rows: &[EventStudyRow]) -> MonitorResult<()> {
    let bytes = csv_bytes(rows, &EVENT_STUDY_COLUMNS)?;
    write_atomic(path, &bytes)
}

pub fn write_hit_rate(path: &Path, q: f64, hit_rate: f64) -> MonitorResult<()> {
    let top_pct = (1.0 - q) * 100.0;
    let line = format!("HitRate_Top{}pctAbsReturn: {:.6}\n", format_pct(top_pct), hit_rate);
    write_atomic(path, line.as_bytes())
}

fn format_pct(pct: f64) -> String {
    let rounded = (pct * 1e6).round() / 1e6;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anomaly_core::{DailyBar, FeatureRow, ScoreRow};
    use chrono::Duration;

    fn day(i: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(i)
    }

    fn panel(prices: &[f64]) -> OhlcvPanel {
        let bars = prices
            .iter()
            .enumerate()
            .map(|(i, &p)| DailyBar {
                date: day(i as i64),
                open: p,
                high: p,
                low: p,
                close: p,
                adj_close: p,
                volume: 1.0,
            })
            .collect();
        let mut panel = OhlcvPanel::new();
        panel.insert_series("A", bars).unwrap();
        panel
    }

    fn score(i: i64, ticker: &str, ret: f64, flagged: bool) -> ScoreRow {
        let feature = FeatureRow {
            date: day(i),
            ticker: ticker.into(),
            ret,
            ret_z: 0.0,
            vol: 0.0,
            vol_z: 0.0,
            volu_z: 0.0,
            range: 0.0,
            range_z: 0.0,
        };
        let mut row = ScoreRow::from_feature(&feature, 0.0, 0.0, 0.0);
        row.is_anomaly = flagged;
        row
    }

    #[test]
    fn test_forward_returns() {
        let fwd = forward_returns(&panel(&[100.0, 110.0, 99.0, 120.0]), &[1, 2]);
        assert_eq!(fwd.horizons(), &[1, 2]);
        assert!((fwd.get("A", day(0), 0).unwrap() - 0.10).abs() < 1e-12);
        assert!((fwd.get("A", day(0), 1).unwrap() + 0.01).abs() < 1e-12);
        assert!(fwd.get("A", day(2), 1).is_none());
        assert!(fwd.get("A", day(3), 0).is_none());
        assert!(fwd.get("B", day(0), 0).is_none());
    }

    #[test]
    fn test_event_study_groups() {
        let panel = panel(&[100.0, 110.0, 121.0, 121.0]);
        let scores = ScoreTable::from_rows(vec![
            score(0, "A", 0.0, true),
            score(1, "A", 0.0, false),
            score(2, "A", 0.0, false),
            score(3, "A", 0.0, false),
        ]);
        let rows = event_study(&scores, &panel, &[1, 3]);
        assert_eq!(rows.len(), 4);

        assert_eq!((rows[0].horizon_days, rows[0].group, rows[0].count), (1, "anomaly", 1));
        assert!((rows[0].mean - 0.10).abs() < 1e-12);
        assert!((rows[0].median - 0.10).abs() < 1e-12);
        // days 1 and 2 have a 1-day return but no 3-day return
        assert_eq!((rows[1].horizon_days, rows[1].group, rows[1].count), (1, "non_anomaly", 0));
        assert!(rows[1].mean.is_nan() && rows[1].median.is_nan());

        assert_eq!((rows[2].horizon_days, rows[2].group, rows[2].count), (3, "anomaly", 1));
        assert!((rows[2].mean - 0.21).abs() < 1e-12);
        assert_eq!(rows[3].count, 0);
        assert!(rows[3].mean.is_nan() && rows[3].median.is_nan());
    }

    #[test]
    fn test_event_study_same_rows_at_every_horizon() {
        let panel = panel(&[100.0, 110.0, 121.0, 121.0, 133.1, 133.1]);
        let scores = ScoreTable::from_rows((0..6).map(|i| score(i, "A", 0.0, i == 1)).collect());
        let rows = event_study(&scores, &panel, &[1, 2]);

        // days 0..=3 have both forward returns; day 1 is the only flagged one
        let counts: Vec<(usize, &str, usize)> = rows.iter().map(|r| (r.horizon_days, r.group, r.count)).collect();
        assert_eq!(
            counts,
            vec![(1, "anomaly", 1), (1, "non_anomaly", 3), (2, "anomaly", 1), (2, "non_anomaly", 3)]
        );
        assert!((rows[0].mean - 0.10).abs() < 1e-12);
        assert!((rows[2].mean - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_hit_rate() {
        let mut rows: Vec<ScoreRow> = (0..100).map(|i| score(i, "A", 0.001 * i as f64, false)).collect();
        // one alert on the largest move, one on a small move
        rows[99].is_anomaly = true;
        rows[10].is_anomaly = true;
        rows.extend((0..50).map(|i| score(i, "B", 0.01, false)));
        let scores = ScoreTable::from_rows(rows);

        assert!((hit_rate_extreme_moves(&scores, 0.99) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_hit_rate_without_alerts_is_nan() {
        let scores = ScoreTable::from_rows(vec![score(0, "A", 0.01, false)]);
        assert!(hit_rate_extreme_moves(&scores, 0.99).is_nan());
    }

    #[test]
    fn test_writers() {
        let dir = tempfile::tempdir().unwrap();
        let es = dir.path().join(EVENT_STUDY_FILE);
        write_event_study(
            &es,
            &[EventStudyRow {
                horizon_days: 5,
                group: "anomaly",
                count: 0,
                mean: f64::NAN,
                median: f64::NAN,
            }],
        )
        .unwrap();
        let text = std::fs::read_to_string(&es).unwrap();
        assert_eq!(text, "horizon_days,group,count,mean,median\n5,anomaly,0,NaN,NaN\n");

        let hr = dir.path().join(HIT_RATE_FILE);
        write_hit_rate(&hr, 0.99, 0.25).unwrap();
        assert_eq!(
            std::fs::read_to_string(&hr).unwrap(),
            "HitRate_Top1pctAbsReturn: 0.250000\n"
        );
    }
}
