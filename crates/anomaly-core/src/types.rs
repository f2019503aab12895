use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{AnomalyError, AnomalyResult};

/// One trading day of OHLCV data for a single ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: f64,
    pub volume: f64,
}

/// Long-form OHLCV record, the on-disk shape of a panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvRecord {
    pub date: NaiveDate,
    pub ticker: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: f64,
    pub volume: f64,
}

impl OhlcvRecord {
    pub fn from_bar(ticker: &str, bar: &DailyBar) -> Self {
        Self {
            date: bar.date,
            ticker: ticker.to_string(),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            adj_close: bar.adj_close,
            volume: bar.volume,
        }
    }

    fn into_bar(self) -> (String, DailyBar) {
        (
            self.ticker,
            DailyBar {
                date: self.date,
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
                adj_close: self.adj_close,
                volume: self.volume,
            },
        )
    }
}

/// Parameters identifying one panel request to a data source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PanelRequest {
    pub tickers: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PanelRequest {
    pub fn new(tickers: Vec<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self { tickers, start, end }
    }

    /// Stable textual form of the request, used for cache keys
    pub fn canonical_key(&self) -> String {
        let mut tickers = self.tickers.clone();
        tickers.sort();
        tickers.dedup();
        format!("{}|{}|{}", tickers.join(","), self.start, self.end)
    }
}

/// Per-ticker daily OHLCV history. Read-only input to the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OhlcvPanel {
    series: BTreeMap<String, Vec<DailyBar>>,
}

impl OhlcvPanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a panel from long-form records. Duplicate (date, ticker) keys are rejected.
    pub fn from_records<I>(records: I) -> AnomalyResult<Self>
    where
        I: IntoIterator<Item = OhlcvRecord>,
    {
        let mut grouped: BTreeMap<String, Vec<DailyBar>> = BTreeMap::new();
        for record in records {
            let (ticker, bar) = record.into_bar();
            grouped.entry(ticker).or_default().push(bar);
        }

        let mut panel = Self::new();
        for (ticker, bars) in grouped {
            panel.insert_series(ticker, bars)?;
        }
        Ok(panel)
    }

    /// Add (or replace) one ticker's history. Bars are sorted by date.
    pub fn insert_series(&mut self, ticker: impl Into<String>, mut bars: Vec<DailyBar>) -> AnomalyResult<()> {
        let ticker = ticker.into();
        bars.sort_by_key(|b| b.date);
        if let Some(w) = bars.windows(2).find(|w| w[0].date == w[1].date) {
            return Err(AnomalyError::InvalidData(format!(
                "duplicate bar for {} on {}",
                ticker, w[0].date
            )));
        }
        self.series.insert(ticker, bars);
        Ok(())
    }

    pub fn series(&self, ticker: &str) -> Option<&[DailyBar]> {
        self.series.get(ticker).map(|v| v.as_slice())
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[DailyBar])> {
        self.series.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of tickers
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn bar_count(&self) -> usize {
        self.series.values().map(|v| v.len()).sum()
    }

    /// Keep only the requested tickers and dates within `[start, end]`.
    pub fn restrict(&self, request: &PanelRequest) -> Self {
        let series = self
            .series
            .iter()
            .filter(|(ticker, _)| request.tickers.iter().any(|t| t == *ticker))
            .map(|(ticker, bars)| {
                let kept = bars
                    .iter()
                    .filter(|b| b.date >= request.start && b.date <= request.end)
                    .cloned()
                    .collect::<Vec<_>>();
                (ticker.clone(), kept)
            })
            .filter(|(_, bars)| !bars.is_empty())
            .collect();
        Self { series }
    }

    /// Long-form records ordered by (date, ticker)
    pub fn to_records(&self) -> Vec<OhlcvRecord> {
        let mut records: Vec<OhlcvRecord> = self
            .iter()
            .flat_map(|(ticker, bars)| bars.iter().map(move |b| OhlcvRecord::from_bar(ticker, b)))
            .collect();
        records.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.ticker.cmp(&b.ticker)));
        records
    }
}

/// Engineered features for one (date, ticker)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub ticker: String,
    pub ret: f64,
    pub ret_z: f64,
    pub vol: f64,
    pub vol_z: f64,
    pub volu_z: f64,
    pub range: f64,
    pub range_z: f64,
}

impl FeatureRow {
    /// Column order of [`FeatureRow::model_vector`]
    pub const MODEL_COLUMNS: [&'static str; 7] =
        ["ret", "vol", "vol_z", "volu_z", "range", "range_z", "ret_z"];

    pub fn model_vector(&self) -> [f64; 7] {
        [
            self.ret,
            self.vol,
            self.vol_z,
            self.volu_z,
            self.range,
            self.range_z,
            self.ret_z,
        ]
    }
}

/// Feature rows in canonical order: date ascending, then ticker.
///
/// Row positions in this table are the index every score column is aligned to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn from_rows(mut rows: Vec<FeatureRow>) -> Self {
        rows.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.ticker.cmp(&b.ticker)));
        Self { rows }
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Ticker -> row positions (ascending) in this table
    pub fn ticker_index(&self) -> BTreeMap<&str, Vec<usize>> {
        let mut index: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (pos, row) in self.rows.iter().enumerate() {
            index.entry(row.ticker.as_str()).or_default().push(pos);
        }
        index
    }

    pub fn tickers(&self) -> Vec<&str> {
        self.ticker_index().into_keys().collect()
    }
}

/// One model's scores, aligned position-for-position with a [`FeatureTable`].
///
/// `None` means the model offered no opinion for that row.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSeries {
    name: &'static str,
    values: Vec<Option<f64>>,
}

impl ScoreSeries {
    pub fn new(name: &'static str, values: Vec<Option<f64>>) -> Self {
        Self { name, values }
    }

    /// A series with no opinion for any of `len` rows
    pub fn missing(name: &'static str, len: usize) -> Self {
        Self::new(name, vec![None; len])
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, pos: usize) -> Option<f64> {
        self.values.get(pos).copied().flatten()
    }

    pub fn present_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Write `values[i]` back at `positions[i]`.
    pub fn scatter(&mut self, positions: &[usize], values: &[Option<f64>]) {
        debug_assert_eq!(positions.len(), values.len());
        for (&pos, &value) in positions.iter().zip(values) {
            self.values[pos] = value;
        }
    }

    /// Check that this series is expressed on `table`'s index.
    pub fn aligned_to(&self, table: &FeatureTable) -> AnomalyResult<&Self> {
        if self.values.len() != table.len() {
            return Err(AnomalyError::InvalidData(format!(
                "{} has {} rows but the feature table has {}",
                self.name,
                self.values.len(),
                table.len()
            )));
        }
        Ok(self)
    }

    /// Values with every absent entry replaced by `fill`
    pub fn filled(&self, fill: f64) -> Vec<f64> {
        self.values.iter().map(|v| v.unwrap_or(fill)).collect()
    }
}

/// Feature row plus model scores and the alert flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    pub date: NaiveDate,
    pub ticker: String,
    pub ret: f64,
    pub ret_z: f64,
    pub vol: f64,
    pub vol_z: f64,
    pub volu_z: f64,
    pub range: f64,
    pub range_z: f64,
    pub score_z: f64,
    pub score_iforest: f64,
    pub score_ensemble: f64,
    pub is_anomaly: bool,
}

impl ScoreRow {
    pub fn from_feature(row: &FeatureRow, score_z: f64, score_iforest: f64, score_ensemble: f64) -> Self {
        Self {
            date: row.date,
            ticker: row.ticker.clone(),
            ret: row.ret,
            ret_z: row.ret_z,
            vol: row.vol,
            vol_z: row.vol_z,
            volu_z: row.volu_z,
            range: row.range,
            range_z: row.range_z,
            score_z,
            score_iforest,
            score_ensemble,
            is_anomaly: false,
        }
    }
}

/// Scored rows ordered by date ascending
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreTable {
    rows: Vec<ScoreRow>,
}

impl ScoreTable {
    pub fn from_rows(mut rows: Vec<ScoreRow>) -> Self {
        rows.sort_by_key(|r| r.date);
        Self { rows }
    }

    pub fn rows(&self) -> &[ScoreRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn anomalies(&self) -> impl Iterator<Item = &ScoreRow> {
        self.rows.iter().filter(|r| r.is_anomaly)
    }

    pub fn anomaly_count(&self) -> usize {
        self.anomalies().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn bar(d: u32, px: f64) -> DailyBar {
        DailyBar {
            date: date(d),
            open: px,
            high: px + 1.0,
            low: px - 1.0,
            close: px,
            adj_close: px,
            volume: 1_000.0,
        }
    }

    fn feature(d: u32, ticker: &str) -> FeatureRow {
        FeatureRow {
            date: date(d),
            ticker: ticker.to_string(),
            ret: 0.0,
            ret_z: 0.0,
            vol: 0.0,
            vol_z: 0.0,
            volu_z: 0.0,
            range: 0.0,
            range_z: 0.0,
        }
    }

    #[test]
    fn test_panel_sorts_bars_and_rejects_duplicates() {
        let mut panel = OhlcvPanel::new();
        panel.insert_series("AAPL", vec![bar(3, 10.0), bar(1, 9.0)]).unwrap();
        let dates: Vec<_> = panel.series("AAPL").unwrap().iter().map(|b| b.date).collect();
        assert_eq!(dates, vec![date(1), date(3)]);

        let err = panel.insert_series("MSFT", vec![bar(2, 1.0), bar(2, 2.0)]);
        assert!(matches!(err, Err(AnomalyError::InvalidData(_))));
    }

    #[test]
    fn test_panel_restrict_filters_tickers_and_dates() {
        let mut panel = OhlcvPanel::new();
        panel.insert_series("AAPL", (1..=5).map(|d| bar(d, 10.0)).collect()).unwrap();
        panel.insert_series("MSFT", (1..=5).map(|d| bar(d, 20.0)).collect()).unwrap();

        let request = PanelRequest::new(vec!["MSFT".into()], date(2), date(4));
        let restricted = panel.restrict(&request);
        assert_eq!(restricted.tickers().collect::<Vec<_>>(), vec!["MSFT"]);
        assert_eq!(restricted.bar_count(), 3);
    }

    #[test]
    fn test_canonical_key_ignores_ticker_order() {
        let a = PanelRequest::new(vec!["B".into(), "A".into()], date(1), date(2));
        let b = PanelRequest::new(vec!["A".into(), "B".into(), "A".into()], date(1), date(2));
        assert_eq!(a.canonical_key(), b.canonical_key());
    }

    #[test]
    fn test_feature_table_orders_by_date_then_ticker() {
        let table = FeatureTable::from_rows(vec![
            feature(2, "MSFT"),
            feature(1, "MSFT"),
            feature(2, "AAPL"),
        ]);
        let keys: Vec<_> = table.rows().iter().map(|r| (r.date, r.ticker.as_str())).collect();
        assert_eq!(keys, vec![(date(1), "MSFT"), (date(2), "AAPL"), (date(2), "MSFT")]);

        let index = table.ticker_index();
        assert_eq!(index["MSFT"], vec![0, 2]);
        assert_eq!(index["AAPL"], vec![1]);
    }

    #[test]
    fn test_score_series_alignment_and_fill() {
        let table = FeatureTable::from_rows(vec![feature(1, "A"), feature(2, "A")]);
        let mut series = ScoreSeries::missing("score_iforest", 2);
        series.scatter(&[1], &[Some(1.5)]);
        assert!(series.aligned_to(&table).is_ok());
        assert_eq!(series.filled(0.0), vec![0.0, 1.5]);

        let short = ScoreSeries::missing("score_z", 1);
        assert!(short.aligned_to(&table).is_err());
    }
}
