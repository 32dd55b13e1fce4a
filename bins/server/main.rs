//! # Number Server
//!
//! TCP server that logs every distinct 9-digit number it receives.
//!
//! ## Features
//! - Accepts up to `--workers` concurrent clients, queuing the rest.
//! - Deduplicates records and writes unique ones to `--log-file` in batches.
//! - Prints a metrics report every `--report-interval-ms`.
//! - Any client sending `terminate` shuts the server down cleanly.
//!
//! ## Command-line Options
//! - `--config` / `-c`: JSON configuration file (optional).
//! - `--port` / `-p`: TCP listen port (default `4000`).
//! - `--workers` / `-w`: Worker pool size (default `5`).
//! - `--report-interval-ms`, `--batch-size`, `--max-value`, `--log-file`, `--screener`.
//! - `--log-level` / `-l`: Log level (`error`, `warn`, `info`, `debug`, `trace`).

use number_logger::config::{ScreenerKind, ServerConfig};
use number_logger::errors::CliError;
use number_logger::number_server::NumberServer;
use std::path::PathBuf;
use structopt::StructOpt;

/// Command-line options for the Number Server
#[derive(Debug, StructOpt)]
#[structopt(
    name = "number_server",
    about = "TCP server logging unique 9-digit numbers"
)]
struct Opt {
    /// JSON configuration file; command-line values override it
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// TCP listen port
    #[structopt(short, long)]
    port: Option<u16>,

    /// Number of worker threads serving clients
    #[structopt(short, long)]
    workers: Option<usize>,

    /// Period between metric reports, in milliseconds
    #[structopt(long)]
    report_interval_ms: Option<u64>,

    /// Unique records written per batch
    #[structopt(long)]
    batch_size: Option<usize>,

    /// Inclusive upper bound of accepted records
    #[structopt(long, allow_hyphen_values = true)]
    max_value: Option<i64>,

    /// Path of the unique record log
    #[structopt(long, parse(from_os_str))]
    log_file: Option<PathBuf>,

    /// Deduplication strategy: marker or hash
    #[structopt(long)]
    screener: Option<ScreenerKind>,

    /// Log level: error, warn, info, debug, trace
    #[structopt(short, long, default_value = "info")]
    log_level: String,
}

impl Opt {
    /// Loads the config file (if any) and applies command-line overrides.
    fn into_config(self) -> Result<ServerConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(port) = self.port {
            config.server_port = port;
        }
        if let Some(workers) = self.workers {
            config.max_worker_threads = workers;
        }
        if let Some(interval) = self.report_interval_ms {
            config.report_interval_ms = interval;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(max_value) = self.max_value {
            config.max_domain_value = max_value;
        }
        if let Some(log_file) = self.log_file {
            config.log_sink_path = log_file;
        }
        if let Some(screener) = self.screener {
            config.screener = screener;
        }

        Ok(config)
    }
}

/// Initializes the logger using env_logger with the given level
fn init_logger(level: &str) -> Result<(), CliError> {
    let mut builder = env_logger::Builder::new();

    let log_level = match level.to_lowercase().as_str() {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "info" => log::LevelFilter::Info,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };

    builder.filter_level(log_level);
    builder.format_timestamp_micros();
    builder.format_module_path(false);
    builder.format_target(false);
    builder
        .try_init()
        .map_err(|e| CliError::GeneralError(e.to_string()))?;

    Ok(())
}

fn main() -> Result<(), CliError> {
    // Parse CLI arguments
    let opt = Opt::from_args();

    // Initialize logger
    init_logger(&opt.log_level)?;

    log::info!("Starting Number Server");
    log::debug!("Command line options: {:?}", opt);

    let config = opt.into_config()?;
    log::info!("Effective configuration: {:?}", config);

    // Bind the listener, open the log and start the coordinator
    let server = NumberServer::new(config)?;
    log::info!(
        "Server initialized. Waiting for client connections on {}",
        server.local_addr()?
    );

    // Run server (blocking call)
    let summary = server.run()?;

    log::info!(
        "Served {} connections, {} handlers abandoned at shutdown",
        summary.connections,
        summary.stragglers
    );
    log::info!("Final report: {}", summary.final_report.to_json());
    Ok(())
}
