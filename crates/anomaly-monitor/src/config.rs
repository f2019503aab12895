use anomaly_core::{DetectionConfig, PanelRequest};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MonitorError, MonitorResult};

/// Full run configuration: detection parameters plus data and output locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(flatten)]
    pub detection: DetectionConfig,
    pub data: DataConfig,
    pub outputs: OutputConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Long-form OHLCV CSV
    pub panel_path: PathBuf,
    /// Directory for cached panel slices; caching is off when unset
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    pub tickers: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DataConfig {
    pub fn request(&self) -> PanelRequest {
        PanelRequest::new(self.tickers.clone(), self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_horizons")]
    pub horizons_days: Vec<usize>,
    #[serde(default = "default_extreme_move_quantile")]
    pub extreme_move_quantile: f64,
}

fn default_horizons() -> Vec<usize> {
    vec![1, 5, 20]
}

fn default_extreme_move_quantile() -> f64 {
    0.99
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            horizons_days: default_horizons(),
            extreme_move_quantile: default_extreme_move_quantile(),
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> MonitorResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            MonitorError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(yaml: &str) -> MonitorResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| MonitorError::Config(format!("invalid run config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MonitorResult<()> {
        self.detection.validate()?;

        if self.data.tickers.is_empty() {
            return Err(MonitorError::Config("data.tickers must not be empty".into()));
        }
        if self.data.start > self.data.end {
            return Err(MonitorError::Config(format!(
                "data.start ({}) is after data.end ({})",
                self.data.start, self.data.end
            )));
        }
        if self.evaluation.horizons_days.is_empty() || self.evaluation.horizons_days.contains(&0) {
            return Err(MonitorError::Config(
                "evaluation.horizons_days must be a non-empty list of positive day counts".into(),
            ));
        }
        let q = self.evaluation.extreme_move_quantile;
        if !(q > 0.0 && q < 1.0) {
            return Err(MonitorError::Config(format!(
                "evaluation.extreme_move_quantile must be in (0, 1) (got {q})"
            )));
        }
        Ok(())
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.outputs.base_dir.join("reports")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anomaly_core::AnomalyError;

    const RUN: &str = r#"
data:
  panel_path: data/ohlcv.csv
  tickers: [AAPL, MSFT]
  start: 2015-01-01
  end: 2024-12-31
outputs:
  base_dir: out
features:
  vol_window: 20
  vol_long_window: 60
  volume_window: 20
  range_window: 20
  min_history: 120
models:
  zscore:
    ret_z_thresh: 3.0
    vol_z_thresh: 2.5
    volu_z_thresh: 3.0
  isolation_forest:
    contamination: 0.01
    n_estimators: 300
    random_state: 42
monitoring:
  score_ensemble:
    w_zscore: 0.5
    w_iforest: 0.5
  top_k_daily: 10
"#;

    #[test]
    fn test_parses_with_evaluation_defaults() {
        let cfg = RunConfig::from_yaml_str(RUN).unwrap();
        assert_eq!(cfg.data.tickers, vec!["AAPL", "MSFT"]);
        assert_eq!(cfg.data.cache_dir, None);
        assert_eq!(cfg.detection.features.vol_long_window, 60);
        assert_eq!(cfg.detection.alert_rate(), 0.01);
        assert_eq!(cfg.evaluation, EvaluationConfig::default());
        assert_eq!(cfg.reports_dir(), PathBuf::from("out/reports"));
        assert_eq!(
            cfg.data.request().canonical_key(),
            "AAPL,MSFT|2015-01-01|2024-12-31"
        );
    }

    #[test]
    fn test_missing_detection_key_rejected() {
        let yaml = RUN.replace("    random_state: 42\n", "");
        assert!(matches!(
            RunConfig::from_yaml_str(&yaml),
            Err(MonitorError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_detection_values_surface() {
        let yaml = RUN.replace("contamination: 0.01", "contamination: 0.7");
        assert!(matches!(
            RunConfig::from_yaml_str(&yaml),
            Err(MonitorError::Anomaly(AnomalyError::Config(_)))
        ));
    }

    #[test]
    fn test_reversed_date_range_rejected() {
        let yaml = RUN.replace("end: 2024-12-31", "end: 2014-12-31");
        assert!(RunConfig::from_yaml_str(&yaml).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = RunConfig::load(Path::new("/nonexistent/run.yaml")).unwrap_err();
        assert!(err.to_string().contains("cannot read config"));
    }
}
