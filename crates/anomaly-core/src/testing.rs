//! Deterministic synthetic OHLCV panels for tests across the workspace.

use chrono::{Duration, NaiveDate};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::{DailyBar, OhlcvPanel};

/// Recipe for one synthetic ticker
#[derive(Debug, Clone)]
pub struct SyntheticTicker {
    pub ticker: String,
    pub days: usize,
    pub daily_vol: f64,
    pub seed: u64,
    /// `(day, sigmas)`: force the return on `day` to `sigmas * daily_vol`
    pub return_spike: Option<(usize, f64)>,
}

impl SyntheticTicker {
    pub fn new(ticker: &str, days: usize, seed: u64) -> Self {
        Self {
            ticker: ticker.to_string(),
            days,
            daily_vol: 0.01,
            seed,
            return_spike: None,
        }
    }

    pub fn with_return_spike(mut self, day: usize, sigmas: f64) -> Self {
        self.return_spike = Some((day, sigmas));
        self
    }

    pub fn bars(&self, start: NaiveDate) -> Vec<DailyBar> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut px = 100.0;
        let mut bars = Vec::with_capacity(self.days);

        for day in 0..self.days {
            let shock: f64 = StandardNormal.sample(&mut rng);
            let ret = match self.return_spike {
                Some((spike_day, sigmas)) if spike_day == day => sigmas * self.daily_vol,
                _ if day == 0 => 0.0,
                _ => shock * self.daily_vol,
            };
            px *= 1.0 + ret;

            let range_draw: f64 = StandardNormal.sample(&mut rng);
            let volume_draw: f64 = StandardNormal.sample(&mut rng);
            let half_range = px * self.daily_vol * (0.5 + 0.25 * range_draw.abs());
            let volume = 1_000_000.0 * (0.2 * volume_draw).exp();

            bars.push(DailyBar {
                date: start + Duration::days(day as i64),
                open: px,
                high: px + half_range,
                low: px - half_range,
                close: px,
                adj_close: px,
                volume,
            });
        }
        bars
    }
}

/// Panel of synthetic tickers starting on 2020-01-01
pub fn synthetic_panel(tickers: &[SyntheticTicker]) -> OhlcvPanel {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid start date");
    let mut panel = OhlcvPanel::new();
    for recipe in tickers {
        panel
            .insert_series(recipe.ticker.clone(), recipe.bars(start))
            .expect("synthetic dates are unique");
    }
    panel
}

/// Date of the `day`-th synthetic bar
pub fn synthetic_date(day: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid start date") + Duration::days(day as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::mean_std;

    #[test]
    fn test_bars_are_seeded() {
        let start = synthetic_date(0);
        let a = SyntheticTicker::new("A", 50, 7).bars(start);
        assert_eq!(a, SyntheticTicker::new("A", 50, 7).bars(start));
        assert_ne!(a, SyntheticTicker::new("A", 50, 8).bars(start));
    }

    #[test]
    fn test_daily_returns_match_target_vol() {
        let bars = SyntheticTicker::new("A", 2000, 3).bars(synthetic_date(0));
        let returns: Vec<f64> = bars.windows(2).map(|w| w[1].adj_close / w[0].adj_close - 1.0).collect();
        let (mean, std) = mean_std(&returns).unwrap();

        assert!(mean.abs() < 0.002);
        assert!((std - 0.01).abs() < 0.001, "std {std}");
        assert!(bars.iter().all(|b| b.high > b.low && b.volume > 0.0));
    }

    #[test]
    fn test_return_spike_lands_on_its_day() {
        let bars = SyntheticTicker::new("A", 30, 5)
            .with_return_spike(20, 10.0)
            .bars(synthetic_date(0));
        let ret = bars[20].adj_close / bars[19].adj_close - 1.0;
        assert!((ret - 0.10).abs() < 1e-12);
    }
}
