/// TCP port the server listens on when no override is given.
pub const SERVER_PORT: u16 = 4000;

/// Address the listening socket binds to by default (all interfaces).
pub const BIND_ADDRESS: &str = "0.0.0.0";

/// Number of worker threads serving client connections.
///
/// Connections accepted while every worker is busy wait in the pool backlog
/// until a worker frees up; the accept loop itself never blocks on submission.
pub const MAX_WORKER_THREADS: usize = 5;

/// Period (in milliseconds) between two metric reports.
pub const REPORT_INTERVAL_MSEC: u64 = 10_000;

/// Number of unique records held in memory before they are written to the log sink.
pub const BATCH_SIZE: usize = 100_000;

/// Inclusive upper bound of the record domain.
///
/// Records are 9-digit decimals, so every value lies in `[0, 999_999_999]`.
pub const MAX_DOMAIN_VALUE: i64 = 999_999_999;

/// Default path of the unique record log.
pub const LOG_SINK_PATH: &str = "numbers.log";

/// Grace period (in milliseconds) granted to in-flight connection handlers
/// once the shutdown broadcast has closed the listener.
///
/// Handlers still running after this period are abandoned.
pub const SHUTDOWN_GRACE_MSEC: u64 = 1_000;

/// Exact number of characters in a record line (and in a formatted record).
pub const RECORD_WIDTH: usize = 9;

/// Reserved command word that stops the whole server (case-insensitive).
pub const TERMINATE_COMMAND: &str = "terminate";

/// Line terminator appended to every record written to the log sink.
#[cfg(windows)]
pub const LINE_TERMINATOR: &str = "\r\n";

/// Line terminator appended to every record written to the log sink.
#[cfg(not(windows))]
pub const LINE_TERMINATOR: &str = "\n";

/// Timeout (in milliseconds) of the loopback connection used to wake up a
/// listener blocked in `accept()` during shutdown.
pub const WAKEUP_CONNECT_TIMEOUT_MSEC: u64 = 200;

/// Upper bound (in bytes) of a single line read from a client.
///
/// Valid lines are at most 11 bytes (`terminate` or nine digits plus `\r\n`),
/// so anything longer is rejected without buffering the whole line.
pub const MAX_LINE_BYTES: u64 = 64;
