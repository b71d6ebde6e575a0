//! # OSC Sniffer
//!
//! Listens for IMU telemetry sent as OSC over UDP, logs every sample to CSV,
//! captures the raw datagrams to a pcap file and keeps a live window of the
//! plotted channels.
//!
//! # Usage
//!
//! ```text
//! osc-sniffer [--config PATH] [--port N] ...   run until Ctrl+C
//! osc-sniffer replay PATH                      summarize a recorded sample log
//! ```
//!
//! `--bind`, `--port`, `--log-file`, `--capture-file`, `--flush-period-ms` and
//! `--feed-capacity` override the configuration file. Each can also be set
//! through its `OSC_SNIFFER_*` environment variable (see `--help`).
//!
//! Expected output:
//! ```text
//! INFO osc_sniffer: OSC Sniffer v0.1.0 starting...
//! INFO osc_sniffer::persistence: Sample log initialized at osc_capture.csv
//! INFO osc_sniffer::pipeline: Listening for OSC on udp://0.0.0.0:4000
//! INFO osc_sniffer::pipeline: Persisted 1000 samples (0 rejected, 998 frames flushed, ...)
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use osc_sniffer::config::{Config, LoggingConfig, Overrides};
use osc_sniffer::feed::Channel;
use osc_sniffer::monitor::Monitor;
use osc_sniffer::pipeline::Pipeline;
use osc_sniffer::replay;

/// Diagnostic log file name prefix (daily rotation appends the date)
const LOG_FILE_PREFIX: &str = "osc-sniffer.log";

#[derive(Parser, Debug)]
#[command(name = "osc-sniffer", version, long_about = None)]
#[command(about = "Capture, persist and live-plot IMU telemetry sent as OSC over UDP")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Summarize a recorded sample log
    Replay {
        /// Sample log written by a previous run
        path: PathBuf,
    },
}

#[derive(Args, Debug, Default, PartialEq)]
struct RunArgs {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Address the UDP listener binds to
    #[arg(long, value_name = "IP", env = "OSC_SNIFFER_BIND")]
    bind: Option<String>,

    /// UDP port to listen on (0 picks a free port)
    #[arg(long, env = "OSC_SNIFFER_PORT")]
    port: Option<u16>,

    /// CSV sample log path
    #[arg(long, value_name = "PATH", env = "OSC_SNIFFER_LOG_FILE")]
    log_file: Option<String>,

    /// pcap capture path
    #[arg(long, value_name = "PATH", env = "OSC_SNIFFER_CAPTURE_FILE")]
    capture_file: Option<String>,

    /// Milliseconds between capture flushes
    #[arg(long, value_name = "MS", env = "OSC_SNIFFER_FLUSH_PERIOD_MS")]
    flush_period_ms: Option<u64>,

    /// Samples kept per plotted channel
    #[arg(long, value_name = "SAMPLES", env = "OSC_SNIFFER_FEED_CAPACITY")]
    feed_capacity: Option<usize>,
}

impl RunArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            bind_address: self.bind.clone(),
            port: self.port,
            log_file: self.log_file.clone(),
            capture_file: self.capture_file.clone(),
            flush_period_ms: self.flush_period_ms,
            feed_capacity: self.feed_capacity,
        }
    }
}

/// Console logging filtered by `RUST_LOG` (or the configured level), plus an
/// optional daily-rolling file
fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.log_dir.is_empty() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&logging.log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .init();
    Some(guard)
}

/// Main entry point
///
/// # Errors
///
/// Returns error (non-zero exit) if:
/// - Arguments or configuration are invalid
/// - The UDP port cannot be bound or a log/capture file cannot be opened
/// - A transport or persistence fault stops ingestion
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::Replay { path }) => {
            let _guard = init_logging(&LoggingConfig::default());
            summarize_replay(&path)
        }
        None => {
            let config = Config::resolve(cli.run.config.as_deref(), &cli.run.overrides())
                .context("Failed to load configuration")?;
            let _guard = init_logging(&config.logging);
            info!("OSC Sniffer v{} starting...", env!("CARGO_PKG_VERSION"));
            run(config).await
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let render_interval = config.render_interval();
    let flush_period = config.flush_period();
    let capture_enabled = config.capture.enabled;

    let mut pipeline = Pipeline::from_config(config)?;
    if capture_enabled {
        pipeline.start_capture()?;
        pipeline.start_flush_timer(flush_period)?;
    }
    pipeline.start_listening().await?;

    let cancel = pipeline.cancellation_token();
    let monitor = Monitor::new(pipeline.feed());
    let monitor = tokio::spawn(monitor.run(render_interval, cancel.clone()));

    info!("Press Ctrl+C to exit");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
        _ = cancel.cancelled() => error!("Pipeline stopped on a fatal fault"),
    }

    let result = pipeline.shutdown().await;
    if let Ok(monitor) = monitor.await {
        info!(
            "Monitor drew {} frames ({} with new samples)",
            monitor.frames(),
            monitor.fresh_frames()
        );
    }

    let report = result.context("Pipeline shut down with an error")?;
    info!("Sample log holds {} rows", report.log_rows);
    Ok(())
}

fn summarize_replay(path: &Path) -> Result<()> {
    let series =
        replay::load(path).with_context(|| format!("Failed to replay {}", path.display()))?;
    if series.is_empty() {
        bail!("No valid data found in {}", path.display());
    }

    println!(
        "{} samples over {:.2}s ({} rows skipped)",
        series.len(),
        series.duration(),
        series.skipped
    );
    for channel in Channel::ALL {
        if let Some((lo, hi)) = series.range(channel) {
            println!("{:>5}: {:>10.3} .. {:>10.3}", channel.name(), lo, hi);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_no_args() {
        let cli = Cli::try_parse_from(["osc-sniffer"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.run.config, None);
    }

    #[test]
    fn test_parse_config_flag() {
        let cli = Cli::try_parse_from(["osc-sniffer", "--config", "sniffer.toml"]).unwrap();
        assert_eq!(cli.run.config, Some(PathBuf::from("sniffer.toml")));

        let cli = Cli::try_parse_from(["osc-sniffer", "-c", "sniffer.toml"]).unwrap();
        assert_eq!(cli.run.config, Some(PathBuf::from("sniffer.toml")));

        assert!(Cli::try_parse_from(["osc-sniffer", "-c"]).is_err());
    }

    #[test]
    fn test_parse_override_flags() {
        let cli = Cli::try_parse_from([
            "osc-sniffer",
            "--bind",
            "127.0.0.1",
            "--port",
            "5000",
            "--log-file",
            "run.csv",
            "--capture-file",
            "run.pcap",
            "--flush-period-ms",
            "500",
            "--feed-capacity",
            "600",
        ])
        .unwrap();

        assert_eq!(
            cli.run.overrides(),
            Overrides {
                bind_address: Some("127.0.0.1".to_string()),
                port: Some(5000),
                log_file: Some("run.csv".to_string()),
                capture_file: Some("run.pcap".to_string()),
                flush_period_ms: Some(500),
                feed_capacity: Some(600),
            }
        );
    }

    #[test]
    fn test_parse_flags_layer_onto_config() {
        let cli = Cli::try_parse_from(["osc-sniffer", "--port", "5000"]).unwrap();
        let config = Config::resolve(None, &cli.run.overrides()).unwrap();
        assert_eq!(config.listener.port, 5000);
        assert_eq!(config.persistence.log_file, "osc_capture.csv");
    }

    #[test]
    fn test_parse_invalid_numbers() {
        assert!(Cli::try_parse_from(["osc-sniffer", "--port", "70000"]).is_err());
        assert!(Cli::try_parse_from(["osc-sniffer", "--port", "four"]).is_err());
        assert!(Cli::try_parse_from(["osc-sniffer", "--feed-capacity", "-1"]).is_err());
    }

    #[test]
    fn test_parse_replay() {
        let cli = Cli::try_parse_from(["osc-sniffer", "replay", "run.csv"]).unwrap();
        assert_eq!(cli.command, Some(Command::Replay { path: PathBuf::from("run.csv") }));

        assert!(Cli::try_parse_from(["osc-sniffer", "replay"]).is_err());
        assert!(Cli::try_parse_from(["osc-sniffer", "replay", "a.csv", "b.csv"]).is_err());
    }

    #[test]
    fn test_parse_unknown_argument() {
        assert!(Cli::try_parse_from(["osc-sniffer", "--verbose-mode"]).is_err());
    }
}
