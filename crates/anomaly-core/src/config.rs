use serde::{Deserialize, Serialize};

use crate::{AnomalyError, AnomalyResult};

/// Rolling-window settings for feature construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub vol_window: usize,
    pub vol_long_window: usize,
    pub volume_window: usize,
    pub range_window: usize,
    pub min_history: usize,
}

/// Thresholds beyond which a feature z-score contributes to the rule-based score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZScoreConfig {
    pub ret_z_thresh: f64,
    pub vol_z_thresh: f64,
    pub volu_z_thresh: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForestConfig {
    /// Expected outlier fraction
    pub contamination: f64,
    pub n_estimators: usize,
    pub random_state: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub zscore: ZScoreConfig,
    pub isolation_forest: IsolationForestConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleWeights {
    pub w_zscore: f64,
    pub w_iforest: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub score_ensemble: EnsembleWeights,
    pub top_k_daily: usize,
    /// Target alert rate of the per-ticker threshold. Falls back to the
    /// isolation model's contamination when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_rate: Option<f64>,
}

/// Everything the detection pipeline reads from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub features: FeatureConfig,
    pub models: ModelsConfig,
    pub monitoring: MonitoringConfig,
}

impl DetectionConfig {
    /// Parse and validate a YAML document. Missing keys are errors.
    pub fn from_yaml_str(yaml: &str) -> AnomalyResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| AnomalyError::Config(format!("invalid detection config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Alert rate used by the per-ticker quantile threshold
    pub fn alert_rate(&self) -> f64 {
        self.monitoring
            .alert_rate
            .unwrap_or(self.models.isolation_forest.contamination)
    }

    pub fn validate(&self) -> AnomalyResult<()> {
        let f = &self.features;
        for (name, window) in [
            ("features.vol_window", f.vol_window),
            ("features.vol_long_window", f.vol_long_window),
            ("features.volume_window", f.volume_window),
            ("features.range_window", f.range_window),
        ] {
            if window < 2 {
                return Err(AnomalyError::Config(format!(
                    "{name} must be at least 2 (got {window})"
                )));
            }
        }
        if f.min_history == 0 {
            return Err(AnomalyError::Config("features.min_history must be positive".into()));
        }

        let z = &self.models.zscore;
        for (name, value) in [
            ("models.zscore.ret_z_thresh", z.ret_z_thresh),
            ("models.zscore.vol_z_thresh", z.vol_z_thresh),
            ("models.zscore.volu_z_thresh", z.volu_z_thresh),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AnomalyError::Config(format!(
                    "{name} must be a non-negative number (got {value})"
                )));
            }
        }

        let iso = &self.models.isolation_forest;
        check_rate("models.isolation_forest.contamination", iso.contamination)?;
        if iso.n_estimators == 0 {
            return Err(AnomalyError::Config(
                "models.isolation_forest.n_estimators must be positive".into(),
            ));
        }

        let m = &self.monitoring;
        for (name, value) in [
            ("monitoring.score_ensemble.w_zscore", m.score_ensemble.w_zscore),
            ("monitoring.score_ensemble.w_iforest", m.score_ensemble.w_iforest),
        ] {
            if !value.is_finite() {
                return Err(AnomalyError::Config(format!("{name} must be finite")));
            }
        }
        if m.top_k_daily == 0 {
            return Err(AnomalyError::Config("monitoring.top_k_daily must be positive".into()));
        }
        if let Some(rate) = m.alert_rate {
            check_rate("monitoring.alert_rate", rate)?;
        }

        Ok(())
    }
}

fn check_rate(name: &str, value: f64) -> AnomalyResult<()> {
    if !(value > 0.0 && value < 0.5) {
        return Err(AnomalyError::Config(format!(
            "{name} must be in (0, 0.5) (got {value})"
        )));
    }
    Ok(())
}
