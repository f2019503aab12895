use anomaly_core::stats::{rolling_mean, rolling_std, rolling_zscore};
use anomaly_core::{DailyBar, FeatureConfig, FeatureRow, FeatureTable, OhlcvPanel};
use rayon::prelude::*;

/// Turns a per-ticker OHLCV panel into the long-form feature table.
///
/// Every ticker is processed independently; rows still inside any rolling
/// window's warm-up are dropped, and tickers left with fewer than
/// `min_history` rows are dropped entirely.
pub struct FeatureBuilder {
    config: FeatureConfig,
}

impl FeatureBuilder {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, panel: &OhlcvPanel) -> FeatureTable {
        let per_ticker: Vec<(String, Vec<FeatureRow>)> = panel
            .iter()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(ticker, bars)| (ticker.to_string(), self.build_ticker(ticker, bars)))
            .collect();

        let mut rows = Vec::new();
        let mut dropped = 0usize;
        for (ticker, ticker_rows) in per_ticker {
            if ticker_rows.len() < self.config.min_history {
                tracing::warn!(
                    "Dropping {}: {} feature rows after warm-up (need {})",
                    ticker,
                    ticker_rows.len(),
                    self.config.min_history
                );
                dropped += 1;
                continue;
            }
            tracing::debug!("{}: {} feature rows", ticker, ticker_rows.len());
            rows.extend(ticker_rows);
        }

        let table = FeatureTable::from_rows(rows);
        tracing::info!(
            "Built {} feature rows for {} tickers ({} dropped for short history)",
            table.len(),
            panel.len() - dropped,
            dropped
        );
        table
    }

    /// Feature rows for one ticker, warm-up removed, before the min-history filter
    pub fn build_ticker(&self, ticker: &str, bars: &[DailyBar]) -> Vec<FeatureRow> {
        let cfg = &self.config;

        let ret = self.calculate_returns(bars);
        let vol = rolling_std(&ret, cfg.vol_window);
        let vol_long = rolling_std(&ret, cfg.vol_long_window);
        let vol_z = self.calculate_vol_z(&vol, &vol_long);

        let log_volume: Vec<Option<f64>> = bars.iter().map(|b| finite(b.volume.ln_1p())).collect();
        let volu_z = rolling_zscore(&log_volume, cfg.volume_window);

        let range: Vec<Option<f64>> = bars
            .iter()
            .map(|b| finite((b.high - b.low) / b.adj_close))
            .collect();
        let range_z = rolling_zscore(&range, cfg.range_window);

        let ret_z = rolling_zscore(&ret, cfg.vol_window);

        bars.iter()
            .enumerate()
            .filter_map(|(i, bar)| {
                Some(FeatureRow {
                    date: bar.date,
                    ticker: ticker.to_string(),
                    ret: ret[i]?,
                    ret_z: ret_z[i]?,
                    vol: vol[i]?,
                    vol_z: vol_z[i]?,
                    volu_z: volu_z[i]?,
                    range: range[i]?,
                    range_z: range_z[i]?,
                })
            })
            .collect()
    }

    /// Simple daily percent change of adjusted close
    fn calculate_returns(&self, bars: &[DailyBar]) -> Vec<Option<f64>> {
        let mut ret = Vec::with_capacity(bars.len());
        if !bars.is_empty() {
            ret.push(None);
        }
        ret.extend(
            bars.windows(2)
                .map(|w| finite(w[1].adj_close / w[0].adj_close - 1.0)),
        );
        ret
    }

    /// Short-term realized vol measured against the rolling baseline of long-term vol
    fn calculate_vol_z(&self, vol: &[Option<f64>], vol_long: &[Option<f64>]) -> Vec<Option<f64>> {
        let window = self.config.vol_long_window;
        let baseline_mean = rolling_mean(vol_long, window);
        let baseline_std = rolling_std(vol_long, window);

        vol.iter()
            .zip(baseline_mean.iter().zip(&baseline_std))
            .map(|(v, (m, s))| finite((v.as_ref()? - m.as_ref()?) / s.as_ref()?))
            .collect()
    }
}

/// Convenience wrapper for one-shot builds
pub fn build_features(panel: &OhlcvPanel, config: &FeatureConfig) -> FeatureTable {
    FeatureBuilder::new(config.clone()).build(panel)
}

fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}
