//! Seismic Station Availability Report Binary

use clap::{Parser, ValueEnum};
use seis_avail::coverage::OverlapPolicy;
use seis_avail::days::parse_fdsn_time;
use seis_avail::{AvailError, AvailabilityReporter, Config, Result};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

/// Per-day channel availability report for seismic stations
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// Report file to write
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// First day of the report window
    #[arg(long)]
    start: Option<String>,

    /// Last day of the report window (inclusive)
    #[arg(long)]
    stop: Option<String>,

    /// How overlapping intervals combine: sum, clamp or merge
    #[arg(long)]
    overlap: Option<OverlapPolicy>,

    /// Only report channels with this nominal sampling rate
    #[arg(long)]
    sampling_rate: Option<f64>,

    #[arg(long, value_enum, default_value = "json", env = "LOG_FORMAT")]
    log_format: LogFormat,
}

impl Cli {
    /// Apply command line values on top of the environment configuration
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(output) = &self.output {
            config.output_path = output.clone();
        }

        if let Some(start) = &self.start {
            config.start_time = parse_fdsn_time(start)?;
        }

        if let Some(stop) = &self.stop {
            config.stop_time = parse_fdsn_time(stop)?;
        }

        if let Some(overlap) = self.overlap {
            config.overlap_policy = overlap;
        }

        if let Some(rate) = self.sampling_rate {
            config.target_sampling_rate = Some(rate);
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_tracing(cli.log_format);

    info!("Starting seismic availability report v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env();
    if let Err(e) = cli.apply(&mut config) {
        error!("Invalid command line: {}", e);
        std::process::exit(2);
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    info!(
        "Report configuration - Networks: {}, Channels: {}, Window: {} to {}, Output: {}",
        config.networks.join(","),
        config.channels.join(","),
        config.start_time.format("%Y-%m-%d"),
        config.stop_time.format("%Y-%m-%d"),
        config.output_path.display()
    );

    let reporter = AvailabilityReporter::new(config)?;
    info!("Report run id: {}", reporter.run_id());

    let summary = match reporter.run().await {
        Ok(summary) => summary,
        Err(e) => {
            error!("Report failed: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Run summary: {}",
        serde_json::to_string(&summary).map_err(AvailError::Json)?
    );

    if !summary.is_complete() {
        for failure in &summary.failed_stations {
            warn!("Station {} not reported: {}", failure.station, failure.error);
        }
        std::process::exit(3);
    }

    Ok(())
}

/// Initialize structured logging
fn initialize_tracing(format: LogFormat) {
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter_layer);

    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .json(),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
    }
}
