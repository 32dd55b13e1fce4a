//! # Number Client
//!
//! Traffic generator for the number server.
//!
//! ## Scenarios
//! - `basic`: scripted uniques, duplicates, invalid input and a final `terminate`.
//! - `endurance-single`: one producer streaming sequential (or random) values.
//! - `endurance-multi`: five producers over disjoint ranges.
//! - `terminate`: just send the `terminate` command.

use number_logger::errors::CliError;
use number_logger::scenario::{self, EnduranceOptions};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use structopt::StructOpt;

/// Command-line options for the client
#[derive(Debug, StructOpt)]
#[structopt(name = "number_client", about = "Traffic generator for the number server")]
struct Opt {
    /// Server address, e.g., localhost:4000
    #[structopt(short, long, default_value = "localhost:4000")]
    server_addr: String,

    /// Log level: error, warn, info, debug, trace
    #[structopt(short, long, default_value = "info")]
    log_level: String,

    #[structopt(subcommand)]
    scenario: Scenario,
}

#[derive(Debug, StructOpt)]
enum Scenario {
    /// Scripted mix of valid, duplicate and invalid input ending with terminate
    Basic {
        /// Pause between phases, in milliseconds
        #[structopt(long, default_value = "1000")]
        pause_ms: u64,
    },
    /// A single producer streaming values
    EnduranceSingle {
        /// First value sent
        #[structopt(long, default_value = "0")]
        start: u32,
        /// Number of values sent
        #[structopt(long, default_value = "4000000")]
        count: u32,
        /// Send random values instead of sequential ones
        #[structopt(long)]
        random: bool,
        /// Do not send terminate at the end
        #[structopt(long)]
        no_terminate: bool,
    },
    /// Five concurrent producers over disjoint ranges
    EnduranceMulti {
        /// Number of values sent by each producer
        #[structopt(long, default_value = "4000000")]
        count: u32,
        /// Send random values instead of sequential ones
        #[structopt(long)]
        random: bool,
    },
    /// Send the terminate command
    Terminate,
}

fn resolve(addr: &str) -> Result<SocketAddr, CliError> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| CliError::GeneralError(format!("Cannot resolve {}", addr)))
}

fn main() -> Result<(), CliError> {
    let opt = Opt::from_args();

    env_logger::Builder::new()
        .parse_filters(&opt.log_level)
        .format_timestamp_millis()
        .format_target(false)
        .init();

    let addr = resolve(&opt.server_addr)?;

    match opt.scenario {
        Scenario::Basic { pause_ms } => {
            log::info!("Running basic scenario against {}", addr);
            let expected = scenario::run_basic(addr, Duration::from_millis(pause_ms))?;
            log::info!(
                "Scenario finished. Expected {} total uniques, {} total duplicates",
                expected.uniques,
                expected.duplicates
            );
        }
        Scenario::EnduranceSingle {
            start,
            count,
            random,
            no_terminate,
        } => {
            log::info!("Running endurance test with a single producer");
            let options = EnduranceOptions {
                producers: 1,
                per_producer: count,
                start,
                random,
                terminate_after: (!no_terminate).then(|| Duration::from_secs(20)),
                ..EnduranceOptions::default()
            };
            scenario::run_endurance(addr, &options)?;
        }
        Scenario::EnduranceMulti { count, random } => {
            log::info!("Running endurance test with multiple producers");
            let options = EnduranceOptions {
                per_producer: count,
                random,
                ..EnduranceOptions::default()
            };
            scenario::run_endurance(addr, &options)?;
        }
        Scenario::Terminate => {
            log::info!("Sending terminate command to {}", addr);
            scenario::send_terminate(addr)?;
        }
    }

    Ok(())
}
