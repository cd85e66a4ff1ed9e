//! Wiresense Daemon
//!
//! Samples host sensors on a fixed interval, streams the readings to
//! connected frontends and logs them to CSV.

mod config;
mod sensors;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wiresense::{Sensor, Wiresense};

use config::Config;

#[derive(Parser)]
#[command(name = "wiresensed")]
#[command(about = "Streams host sensor readings to wiresense frontends")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults apply when omitted)
    config: Option<PathBuf>,

    /// Override the server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the sample interval in milliseconds
    #[arg(short, long)]
    interval: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load(path).context("Failed to load configuration")?;
            info!("Loaded configuration from: {}", path.display());
            config
        }
        None => Config::default(),
    };
    if let Some(port) = cli.port {
        config.wiresense.server.port = port;
    }
    if let Some(interval) = cli.interval {
        config.daemon.interval = interval;
    }

    let wiresense = Wiresense::configure(config.wiresense.clone())
        .await
        .context("Failed to start wiresense")?;

    // Start one sampling loop per sensor
    let interval = Duration::from_millis(config.daemon.interval);
    for name in &config.daemon.sensors {
        let producer = sensors::by_name(name)?;
        let sensor = wiresense
            .sensor_boxed(name.as_str(), producer, config.csv_path(name))
            .with_context(|| format!("Failed to create sensor '{}'", name))?;
        tokio::spawn(sample_loop(Arc::new(sensor), interval));
    }
    info!(
        "Sampling {} every {:?}",
        wiresense.sensor_names().join(", "),
        interval
    );

    // Setup Unix signal handlers
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down");
        }
    }

    wiresense.shutdown().await;
    Ok(())
}

async fn sample_loop(sensor: Arc<Sensor>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let mut errors = ErrorThrottle::new(Duration::from_secs(60));

    loop {
        ticker.tick().await;
        match sensor.execute().await {
            Ok(_) => errors.clear(),
            Err(e) => match errors.record() {
                Some((1, _)) => warn!("Sensor '{}' error: {}", sensor.name(), e),
                Some((repeated, elapsed)) => warn!(
                    "Sensor '{}' error (repeated {} times in {:?}): {}",
                    sensor.name(),
                    repeated,
                    elapsed,
                    e
                ),
                None => {}
            },
        }
    }
}

/// Limits error logging to the first error and then once per period.
struct ErrorThrottle {
    period: Duration,
    failing: bool,
    consecutive_errors: u32,
    last_error_log: Instant,
}

impl ErrorThrottle {
    fn new(period: Duration) -> Self {
        Self {
            period,
            failing: false,
            consecutive_errors: 0,
            last_error_log: Instant::now(),
        }
    }

    /// Counts an error. When it should be logged, returns the errors seen
    /// since the last log and the time that window spans.
    fn record(&mut self) -> Option<(u32, Duration)> {
        self.consecutive_errors += 1;
        // Only log errors once per period or on first error
        let elapsed = self.last_error_log.elapsed();
        if !self.failing || elapsed >= self.period {
            let repeated = self.consecutive_errors;
            self.failing = true;
            self.last_error_log = Instant::now();
            self.consecutive_errors = 0;
            Some((repeated, elapsed))
        } else {
            None
        }
    }

    fn clear(&mut self) {
        self.failing = false;
        self.consecutive_errors = 0;
    }
}
