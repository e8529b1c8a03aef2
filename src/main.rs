use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::{error, info};

use airsense::alerter::AlertManager;
use airsense::config::Config;
use airsense::engine::{AnalyticsReport, Engine};
use airsense::normalize::Normalizer;
use airsense::settings::Settings;
use airsense::source::{self, jsonl::JsonLinesSource, ReadingSource};
use airsense::storage::Horizon;
use airsense::types::Event;

#[derive(Parser, Debug)]
#[command(name = "airsense", about = "Sensor analytics and alerting engine")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/airsense/config.toml")]
    config: String,

    /// Validate config and exit
    #[arg(long)]
    check: bool,

    /// Print version and exit
    #[arg(short, long)]
    version: bool,

    /// Ingest a JSON-lines file, print one report and exit
    #[arg(long, value_name = "FILE")]
    replay: Option<String>,

    /// Report horizon for --replay ("24h", "7d", "last:300")
    #[arg(long, value_name = "SEL")]
    horizon: Option<String>,
}

#[tokio::main(worker_threads = 2)]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("airsense {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // A replay needs no config file; fall back to defaults when it is absent
    let config = if cli.replay.is_some() && !Path::new(&cli.config).exists() {
        Config::default()
    } else {
        Config::load(&cli.config)?
    };

    if cli.check {
        println!("Configuration is valid.");
        return Ok(());
    }

    init_logging(&config)?;

    if let Some(ref path) = cli.replay {
        let horizon = match cli.horizon {
            Some(ref sel) => sel.parse::<Horizon>().with_context(|| format!("Invalid --horizon: {}", sel))?,
            None => config.analyzer.horizon()?,
        };
        let report = replay(&config, path, horizon).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        station = %config.agent.station,
        "Starting airsense"
    );

    if let Err(e) = run(config).await {
        error!(error = %e, "Engine terminated with error");
        return Err(e);
    }

    Ok(())
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.agent.log_level));

    // Logs go to stderr so replay output on stdout stays clean JSON
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// Feed a recorded file through the engine and report as of its newest reading.
async fn replay(config: &Config, path: &str, horizon: Horizon) -> Result<AnalyticsReport> {
    let engine = Engine::new(config)?;
    let settings = Settings::from_config(config);
    let normalizer = Normalizer::new(config.agent.location.clone());
    let thresholds = settings.current();

    let mut source = JsonLinesSource::open(path).await?;
    let mut alerts = 0usize;
    let mut readings = 0usize;
    while let Some(raw) = source.next().await? {
        let outcome = engine.ingest(normalizer.normalize(&raw, Utc::now()), &thresholds);
        alerts += outcome.alerts.len();
        readings += 1;
    }

    let now = engine.storage().newest_timestamp().unwrap_or_else(Utc::now);
    info!(readings, alerts, horizon = %horizon, "Replay complete");
    Ok(engine.report(&horizon, now, &thresholds))
}

async fn run(config: Config) -> Result<()> {
    let engine = Arc::new(Engine::new(&config)?);
    let settings = Settings::from_config(&config);
    let normalizer = Normalizer::new(config.agent.location.clone());
    let horizon = config.analyzer.horizon()?;

    let alerter = AlertManager::new(&config.alerting)?;
    let mut reading_source = source::create_source(&config.source, config.agent.location.clone()).await?;

    // Create channels
    let (raw_tx, mut raw_rx) = tokio::sync::mpsc::channel(10_000);
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<Event>(1_000);

    // Spawn source task
    tokio::spawn(async move {
        loop {
            match reading_source.next().await {
                Ok(Some(raw)) => {
                    if raw_tx.send(raw).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {
                    info!(source = reading_source.name(), "Source exhausted");
                    return;
                }
                Err(e) => {
                    tracing::warn!(source = reading_source.name(), error = %e, "Source read failed");
                    return;
                }
            }
        }
    });

    // Spawn ingestion task
    let ingest_engine = engine.clone();
    let ingest_settings = settings.clone();
    let ingest_tx = event_tx.clone();
    let ingestion = tokio::spawn(async move {
        while let Some(raw) = raw_rx.recv().await {
            let thresholds = ingest_settings.current();
            let outcome = ingest_engine.ingest(normalizer.normalize(&raw, Utc::now()), &thresholds);
            for alert in outcome.alerts {
                if ingest_tx.send(Event::Alert(alert)).await.is_err() {
                    return;
                }
            }
            if ingest_tx.send(Event::Reading(outcome.reading)).await.is_err() {
                return;
            }
        }
    });

    // Spawn report task
    let report_engine = engine.clone();
    let report_settings = settings.clone();
    let report_tx = event_tx.clone();
    let location = config.agent.location.clone();
    let report_interval = std::time::Duration::from_secs(config.analyzer.report_interval_secs.max(1));
    let reporter = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(report_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let now = Utc::now();
            report_engine.storage().evict(now);
            let report = report_engine.report(&horizon, now, &report_settings.current());
            info!(
                horizon = %report.horizon,
                metrics = report.summaries.len(),
                anomalies = report.anomalies.len(),
                health = report.health.score,
                label = %report.health.label,
                "Analytics report"
            );
            for anomaly in report_engine.fresh_anomalies(&horizon, now) {
                let alert = anomaly.to_alert(report_engine.station(), location.clone());
                if report_tx.send(Event::Alert(alert)).await.is_err() {
                    return;
                }
            }
        }
    });
    drop(event_tx);

    // Spawn threshold reload task
    let poll = std::time::Duration::from_secs(config.settings.poll_interval_secs.max(1));
    let watcher = tokio::spawn(settings.clone().watch(poll));

    // Spawn alerter task
    let dispatcher = tokio::spawn(alerter.run(event_rx));

    // Wait for shutdown signal or end of input
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Received shutdown signal, exiting");
        }
        _ = ingestion => {
            // The reporter holds the last sender; once it is gone the
            // dispatcher drains what is queued and stops.
            reporter.abort();
            let _ = reporter.await;
            watcher.abort();
            if let Err(e) = dispatcher.await {
                error!(error = %e, "Alert dispatcher failed");
            }

            let now = engine.storage().newest_timestamp().unwrap_or_else(Utc::now);
            let report = engine.report(&horizon, now, &settings.current());
            info!(
                metrics = report.summaries.len(),
                health = report.health.score,
                label = %report.health.label,
                "Input finished, final report"
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
