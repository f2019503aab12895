//! OHLCV panel sources.

use anomaly_core::{AnomalyError, OhlcvPanel, OhlcvSource, PanelRequest};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::MonitorError;
use crate::io::{ohlcv_csv_bytes, parse_ohlcv_csv};

fn into_anomaly(err: MonitorError) -> AnomalyError {
    match err {
        MonitorError::Anomaly(e) => e,
        MonitorError::Io(e) => AnomalyError::Io(e),
        other => AnomalyError::InvalidData(other.to_string()),
    }
}

/// Reads a long-form OHLCV CSV and restricts it to the request
#[derive(Debug, Clone)]
pub struct CsvPanelSource {
    path: PathBuf,
}

impl CsvPanelSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl OhlcvSource for CsvPanelSource {
    fn identity(&self) -> String {
        format!("csv:{}", self.path.display())
    }

    async fn fetch(&self, request: &PanelRequest) -> Result<OhlcvPanel, AnomalyError> {
        let data = tokio::fs::read(&self.path).await.map_err(|e| {
            std::io::Error::new(e.kind(), format!("cannot read panel {}: {e}", self.path.display()))
        })?;
        let panel = parse_ohlcv_csv(&data).map_err(into_anomaly)?;
        let restricted = panel.restrict(request);

        tracing::info!(
            "Loaded {} bars for {} of {} requested tickers from {}",
            restricted.bar_count(),
            restricted.len(),
            request.tickers.len(),
            self.path.display()
        );
        Ok(restricted)
    }
}

/// Caches each distinct request's panel as a CSV file keyed by a hash of the
/// inner source's identity and the request
pub struct CachedSource<S> {
    inner: S,
    cache_dir: PathBuf,
}

impl<S: OhlcvSource> CachedSource<S> {
    pub fn new(inner: S, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_path(&self, request: &PanelRequest) -> PathBuf {
        let key = format!("{}|{}", self.inner.identity(), request.canonical_key());
        let digest = Sha256::digest(key.as_bytes());
        self.cache_dir.join(format!("ohlcv_{}.csv", hex::encode(digest)))
    }

    async fn store(&self, path: &Path, panel: &OhlcvPanel) -> Result<(), AnomalyError> {
        let bytes = ohlcv_csv_bytes(panel).map_err(into_anomaly)?;
        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let mut tmp = path.as_os_str().to_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl<S: OhlcvSource> OhlcvSource for CachedSource<S> {
    fn identity(&self) -> String {
        self.inner.identity()
    }

    async fn fetch(&self, request: &PanelRequest) -> Result<OhlcvPanel, AnomalyError> {
        let path = self.cache_path(request);

        if tokio::fs::try_exists(&path).await? {
            tracing::debug!("Panel cache hit: {}", path.display());
            let data = tokio::fs::read(&path).await?;
            return parse_ohlcv_csv(&data).map_err(into_anomaly);
        }

        tracing::debug!("Panel cache miss: {}", path.display());
        let panel = self.inner.fetch(request).await?;
        if let Err(e) = self.store(&path, &panel).await {
            tracing::warn!("Failed to cache panel at {}: {}", path.display(), e);
        }
        Ok(panel)
    }
}
