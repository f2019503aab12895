//! anomaly-monitor: batch anomaly detection over a daily OHLCV panel.
//!
//! Usage:
//!   anomaly-monitor monitor --config configs/run.yaml
//!   anomaly-monitor evaluate --config configs/run.yaml

use anomaly_core::{OhlcvPanel, OhlcvSource};
use anomaly_monitor::{
    run_detection, run_evaluation, write_reports, CachedSource, CsvPanelSource, DetectionOutput, RunConfig,
};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "anomaly-monitor", about = "Daily market anomaly monitoring")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score the panel and write features, scores, alerts and the run summary
    Monitor(RunArgs),
    /// Score the panel and run the forward-return event study
    Evaluate(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Path to the YAML run configuration
    #[arg(long, default_value = "configs/run.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    let cli = Cli::parse();
    match cli.command {
        Command::Monitor(args) => monitor(args).await,
        Command::Evaluate(args) => evaluate(args).await,
    }
}

fn load_config(args: &RunArgs) -> Result<RunConfig> {
    let config = RunConfig::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    tracing::info!("Configuration loaded from {}", args.config.display());
    tracing::info!("  Tickers: {}", config.data.tickers.join(", "));
    tracing::info!("  Window: {} .. {}", config.data.start, config.data.end);
    tracing::info!("  Alert rate: {}", config.detection.alert_rate());
    Ok(config)
}

async fn load_panel(config: &RunConfig) -> Result<OhlcvPanel> {
    let request = config.data.request();
    let source = CsvPanelSource::new(&config.data.panel_path);

    let panel = match &config.data.cache_dir {
        Some(dir) => CachedSource::new(source, dir).fetch(&request).await,
        None => source.fetch(&request).await,
    }
    .context("fetching OHLCV panel")?;

    if panel.is_empty() {
        bail!(
            "no data for {} between {} and {}",
            config.data.tickers.join(", "),
            config.data.start,
            config.data.end
        );
    }
    Ok(panel)
}

/// Detection is CPU-bound; keep it off the async workers.
async fn detect(config: &RunConfig, panel: OhlcvPanel) -> Result<(OhlcvPanel, DetectionOutput)> {
    let detection = config.detection.clone();
    tokio::task::spawn_blocking(move || {
        let output = run_detection(&panel, &detection)?;
        Ok::<_, anomaly_core::AnomalyError>((panel, output))
    })
    .await
    .context("detection task panicked")?
    .context("running detection")
}

async fn monitor(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    let panel = load_panel(&config).await?;
    let (_, output) = detect(&config, panel).await?;

    let reports_dir = config.reports_dir();
    let (paths, summary) =
        write_reports(&output, &config.detection, &reports_dir).context("writing reports")?;

    tracing::info!("=== Monitoring run complete ===");
    tracing::info!("  Feature rows: {}", summary.feature_rows);
    tracing::info!("  Anomalies: {} across {} tickers", summary.anomalies, summary.tickers);
    if !summary.iforest_skipped_tickers.is_empty() {
        tracing::warn!(
            "  No isolation-forest score for: {}",
            summary.iforest_skipped_tickers.join(", ")
        );
    }
    tracing::info!("  Alerts: {}", paths.alerts.alerts.display());
    tracing::info!("  Top daily: {}", paths.alerts.top_daily.display());
    tracing::info!("  Summary: {}", paths.summary.display());
    Ok(())
}

async fn evaluate(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    let panel = load_panel(&config).await?;
    let (panel, output) = detect(&config, panel).await?;

    let report = run_evaluation(&panel, &output, &config.evaluation, &config.reports_dir())
        .context("running event study")?;

    tracing::info!("=== Evaluation complete ===");
    tracing::info!(
        "  Hit rate on top {:.1}% absolute moves: {:.4}",
        (1.0 - config.evaluation.extreme_move_quantile) * 100.0,
        report.hit_rate
    );
    Ok(())
}
