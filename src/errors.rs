use thiserror::Error;

/// Errors raised while constructing a [`UniqueScreener`](crate::screener::UniqueScreener).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScreenerError {
    /// The configured inclusive upper bound of the record domain is negative
    /// (or larger than the screener can address).
    #[error("Invalid record domain: maximum value {0} is out of range")]
    InvalidDomain(i64),
}

/// Errors returned by the explicit, fallible side of the
/// [`BatchLogger`](crate::batch_logger::BatchLogger) API.
///
/// The regular logging path never surfaces these: `flush()` reports them
/// through the `log` facade and carries on.
#[derive(Error, Debug)]
pub enum LoggerError {
    /// The sink has already been released with `close()`.
    #[error("Log sink already closed")]
    Closed,

    /// Writing or flushing the sink failed.
    #[error("Log sink IO error: {0}")]
    Io(String),
}

/// Errors produced while loading or validating a
/// [`ServerConfig`](crate::config::ServerConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config file: {0}")]
    Io(String),

    /// The configuration file is not valid JSON or has unknown fields.
    #[error("Failed to parse config file: {0}")]
    Parse(String),

    /// A configuration value is outside its accepted range.
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Errors produced by the server subsystems (acceptor, consumer, wiring).
#[derive(Error, Debug)]
pub enum ServerError {
    /// The TCP listener failed to bind to the specified address/port.
    #[error("Failed to bind TCP listener: {0}")]
    BindError(String),

    /// The worker pool serving client connections could not be built.
    #[error("Failed to build worker pool: {0}")]
    PoolError(String),

    /// I/O error during communication with a specific client.
    #[error("Client IO error: {0}")]
    ClientIoError(String),

    /// A background thread could not be spawned or joined.
    #[error("Thread error: {0}")]
    ThreadError(String),

    /// The log sink could not be opened.
    #[error("Failed to open log sink: {0}")]
    SinkError(String),

    /// The deduplication screener rejected its configuration.
    #[error("Screener error: {0}")]
    Screener(#[from] ScreenerError),

    /// The server configuration is invalid.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// High-level errors returned by the server and client binaries.
///
/// These errors are used at the application entry point for formatting
/// user-facing error messages and wrapping lower-level failures.
#[derive(Error, Debug)]
pub enum CliError {
    /// General wrapper around any textual failure.
    #[error("Cli failed with error: {0}")]
    GeneralError(String),
}

impl From<ServerError> for CliError {
    fn from(err: ServerError) -> Self {
        CliError::GeneralError(err.to_string())
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::GeneralError(err.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::GeneralError(err.to_string())
    }
}
