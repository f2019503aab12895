//! Tabular persistence.
//!
//! Every table is CSV with a header row and `date` as the leading column.
//! Files are written to a sibling temporary path and renamed into place once
//! complete, so readers never observe a partially written table.

use anomaly_core::{FeatureRow, FeatureTable, OhlcvPanel, OhlcvRecord, ScoreRow};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MonitorError, MonitorResult};

pub const FEATURE_COLUMNS: [&str; 9] = [
    "date", "ticker", "ret", "ret_z", "vol", "vol_z", "volu_z", "range", "range_z",
];

pub const SCORE_COLUMNS: [&str; 13] = [
    "date",
    "ticker",
    "ret",
    "ret_z",
    "vol",
    "vol_z",
    "volu_z",
    "range",
    "range_z",
    "score_z",
    "score_iforest",
    "score_ensemble",
    "is_anomaly",
];

pub const OHLCV_COLUMNS: [&str; 8] = [
    "date", "ticker", "open", "high", "low", "close", "adj_close", "volume",
];

/// Serialize `rows` as CSV. `header` is written explicitly when there are no rows.
pub fn csv_bytes<'a, T, I>(rows: I, header: &[&str]) -> MonitorResult<Vec<u8>>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut wtr = csv::Writer::from_writer(Vec::new());
    let mut wrote_any = false;
    for row in rows {
        wtr.serialize(row)?;
        wrote_any = true;
    }
    if !wrote_any {
        wtr.write_record(header)?;
    }
    wtr.into_inner()
        .map_err(|e| MonitorError::Io(e.into_error()))
}

/// Write `bytes` to `path` through a temporary sibling file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> MonitorResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = temp_path(path);
    if let Err(e) = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

pub fn write_feature_table(path: &Path, table: &FeatureTable) -> MonitorResult<()> {
    let bytes = csv_bytes::<FeatureRow, _>(table.rows(), &FEATURE_COLUMNS)?;
    write_atomic(path, &bytes)?;
    tracing::debug!("Wrote {} feature rows to {}", table.len(), path.display());
    Ok(())
}

pub fn write_score_rows<'a, I>(path: &Path, rows: I) -> MonitorResult<usize>
where
    I: IntoIterator<Item = &'a ScoreRow>,
{
    let rows: Vec<&ScoreRow> = rows.into_iter().collect();
    let bytes = csv_bytes::<ScoreRow, _>(rows.iter().copied(), &SCORE_COLUMNS)?;
    write_atomic(path, &bytes)?;
    tracing::debug!("Wrote {} score rows to {}", rows.len(), path.display());
    Ok(rows.len())
}

/// Long-form OHLCV CSV for a panel, ordered by (date, ticker)
pub fn ohlcv_csv_bytes(panel: &OhlcvPanel) -> MonitorResult<Vec<u8>> {
    let records = panel.to_records();
    csv_bytes::<OhlcvRecord, _>(&records, &OHLCV_COLUMNS)
}

/// Parse long-form OHLCV CSV (`date,ticker,open,high,low,close,adj_close,volume`)
pub fn parse_ohlcv_csv(data: &[u8]) -> MonitorResult<OhlcvPanel> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    let records = reader
        .deserialize::<OhlcvRecord>()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(OhlcvPanel::from_records(records)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anomaly_core::testing::{synthetic_panel, SyntheticTicker};

    #[test]
    fn test_empty_table_still_has_header() {
        let bytes = csv_bytes::<ScoreRow, _>(std::iter::empty(), &SCORE_COLUMNS).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.trim_end(), SCORE_COLUMNS.join(","));
    }

    #[test]
    fn test_feature_header_leads_with_date() {
        let table = FeatureTable::from_rows(vec![FeatureRow {
            date: chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            ticker: "AAPL".into(),
            ret: 0.01,
            ret_z: 1.5,
            vol: 0.02,
            vol_z: -0.3,
            volu_z: 0.7,
            range: 0.03,
            range_z: 2.0,
        }]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("features.csv");
        write_feature_table(&path, &table).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), FEATURE_COLUMNS.join(","));
        assert!(lines.next().unwrap().starts_with("2024-05-01,AAPL,0.01,1.5"));
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_ohlcv_csv_parses_back() {
        let panel = synthetic_panel(&[SyntheticTicker::new("AAA", 30, 1), SyntheticTicker::new("BBB", 20, 2)]);
        let bytes = ohlcv_csv_bytes(&panel).unwrap();
        let parsed = parse_ohlcv_csv(&bytes).unwrap();
        assert_eq!(parsed, panel);
    }

    #[test]
    fn test_ohlcv_duplicate_rows_rejected() {
        let data = b"date,ticker,open,high,low,close,adj_close,volume\n\
            2024-01-02,AAPL,1,2,0.5,1.5,1.5,100\n\
            2024-01-02,AAPL,1,2,0.5,1.5,1.5,100\n";
        assert!(matches!(
            parse_ohlcv_csv(data),
            Err(MonitorError::Anomaly(anomaly_core::AnomalyError::InvalidData(_)))
        ));
    }
}
