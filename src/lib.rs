//! # Number Logger Server
//!
//! This crate implements a concurrent ingestion server that receives 9-digit
//! numbers from many TCP clients, discards the ones it has already seen and
//! writes the unique ones to a log file in batches.
//! It reports throughput periodically and supports a graceful, server-wide
//! shutdown triggered by any client.
//!
//! ## Features
//!
//! - Fixed-size worker pool serving client connections, with an unbounded backlog.
//! - Lock-free shared queue between connection handlers and a single consumer.
//! - Exact deduplication over `[0, 999_999_999]` in a fixed ~119 MB bitset.
//! - Batched log writes with a configurable flush threshold.
//! - Periodic metric reports (uniques, duplicates, lifetime total).
//! - Shutdown broadcast that reaches the listener, every connection and the consumer.
//!
//! ## Architecture Overview
//!
//! The crate is organized into several modules:
//!
//! - [`protocol`](crate::protocol): Line classification and record formatting.
//! - [`screener`](crate::screener): "Seen before?" strategies (bitset, hash set).
//! - [`batch_logger`](crate::batch_logger): Screens, buffers and flushes unique records.
//! - [`report`](crate::report): Metric snapshot returned by the logger.
//! - [`shutdown`](crate::shutdown): Participant registry and stop broadcast.
//! - [`connection`](crate::connection): Reads one client connection.
//! - [`tcp_server`](crate::tcp_server): Accept loop and worker pool.
//! - [`consumer`](crate::consumer): Drains the shared queue into the logger.
//! - [`reporter`](crate::reporter): Periodic metric output.
//! - [`number_server`](crate::number_server): Wires everything together.
//! - [`config`](crate::config): Runtime configuration.
//! - [`scenario`](crate::scenario): Client traffic scenarios.
//! - [`defs`](crate::defs): Shared constants and defaults.
//! - [`errors`](crate::errors): Error types used across modules.
//!
//! ## TCP Protocol
//!
//! Clients send newline-terminated lines:
//!
//! - `NNNNNNNNN` (exactly nine digits)
//!   A record. Queued for deduplication and logging.
//!
//! - `terminate` (any case)
//!   Disconnects every client, flushes the log and stops the server.
//!
//! - Anything else closes the connection. The server never replies.
//!
//! ## Shutdown
//!
//! A `terminate` line wakes the [`ShutdownCoordinator`](crate::shutdown::ShutdownCoordinator),
//! which in turn:
//!
//! 1. stops the record consumer (records still queued are dropped, the
//!    current batch is flushed and the log closed);
//! 2. closes the listener, leaving in-flight handlers a grace period;
//! 3. closes every open client connection.
//!
//! ## Example: Running the Server
//!
//! ```no_run
//! use number_logger::config::ServerConfig;
//! use number_logger::number_server::NumberServer;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = NumberServer::new(ServerConfig::default())?;
//!
//!     // Blocks until a client sends `terminate`
//!     let summary = server.run()?;
//!     println!("{}", summary.final_report);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unreachable_pub)]

pub mod batch_logger;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod defs;
pub mod errors;
pub mod number_server;
pub mod protocol;
pub mod report;
pub mod reporter;
pub mod scenario;
pub mod screener;
pub mod shutdown;
pub mod tcp_server;
