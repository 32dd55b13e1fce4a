use crate::defs::{
    BATCH_SIZE, BIND_ADDRESS, LOG_SINK_PATH, MAX_DOMAIN_VALUE, MAX_WORKER_THREADS,
    REPORT_INTERVAL_MSEC, SERVER_PORT, SHUTDOWN_GRACE_MSEC,
};
use crate::errors::{ConfigError, ScreenerError};
use crate::protocol::Record;
use crate::screener::{HashScreener, MarkerScreener, UniqueScreener};

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Deduplication strategy used by the logger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenerKind {
    /// Fixed bitset over `[0, max_domain_value]`.
    #[default]
    Marker,
    /// Growing hash set, no upper bound.
    Hash,
}

impl FromStr for ScreenerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "marker" => Ok(ScreenerKind::Marker),
            "hash" => Ok(ScreenerKind::Hash),
            other => Err(ConfigError::Invalid(format!(
                "unknown screener '{}', expected 'marker' or 'hash'",
                other
            ))),
        }
    }
}

impl fmt::Display for ScreenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScreenerKind::Marker => write!(f, "marker"),
            ScreenerKind::Hash => write!(f, "hash"),
        }
    }
}

/// Runtime configuration of the number server.
///
/// Every field falls back to its [`defs`](crate::defs) default when absent
/// from the JSON file:
///
/// ```json
/// {
///   "server_port": 4000,
///   "max_worker_threads": 5,
///   "report_interval_ms": 10000,
///   "batch_size": 100000,
///   "max_domain_value": 999999999,
///   "log_sink_path": "numbers.log"
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Port the listener binds to.
    pub server_port: u16,

    /// Interface the listener binds to.
    pub bind_address: String,

    /// Size of the connection worker pool.
    pub max_worker_threads: usize,

    /// Period between two metric reports.
    pub report_interval_ms: u64,

    /// Unique records per batch written to the sink.
    pub batch_size: usize,

    /// Inclusive upper bound of the record domain.
    pub max_domain_value: i64,

    /// Path of the unique record log.
    pub log_sink_path: PathBuf,

    /// Time granted to in-flight handlers once shutdown starts.
    pub shutdown_grace_ms: u64,

    /// Deduplication strategy.
    pub screener: ScreenerKind,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_port: SERVER_PORT,
            bind_address: BIND_ADDRESS.to_string(),
            max_worker_threads: MAX_WORKER_THREADS,
            report_interval_ms: REPORT_INTERVAL_MSEC,
            batch_size: BATCH_SIZE,
            max_domain_value: MAX_DOMAIN_VALUE,
            log_sink_path: PathBuf::from(LOG_SINK_PATH),
            shutdown_grace_ms: SHUTDOWN_GRACE_MSEC,
            screener: ScreenerKind::default(),
        }
    }
}

impl ServerConfig {
    /// Loads a configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        log::info!("Loading server configuration from: {:?}", path.as_ref());
        let raw =
            std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: ServerConfig =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        log::debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Checks value ranges. A negative domain bound is reported by
    /// [`build_screener`](Self::build_screener) as
    /// [`ScreenerError::InvalidDomain`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_domain_value > i64::from(Record::MAX) {
            return Err(ConfigError::Invalid(format!(
                "max_domain_value {} exceeds {}",
                self.max_domain_value,
                Record::MAX
            )));
        }
        if self.max_worker_threads == 0 {
            return Err(ConfigError::Invalid(
                "max_worker_threads must be at least 1".into(),
            ));
        }
        if self.report_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "report_interval_ms must be at least 1".into(),
            ));
        }
        if self.bind_address.trim().is_empty() {
            return Err(ConfigError::Invalid("bind_address must not be empty".into()));
        }
        Ok(())
    }

    /// `bind_address:server_port`, ready for `TcpListener::bind`.
    pub fn listen_addr(&self) -> String {
        if self.bind_address.contains(':') {
            format!("[{}]:{}", self.bind_address, self.server_port)
        } else {
            format!("{}:{}", self.bind_address, self.server_port)
        }
    }

    /// Report period as a [`Duration`].
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    /// Shutdown grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Builds the configured screener.
    ///
    /// # Errors
    /// [`ScreenerError::InvalidDomain`] if `max_domain_value` is negative,
    /// whatever the strategy. Both strategies reject values above it.
    pub fn build_screener(&self) -> Result<Box<dyn UniqueScreener>, ScreenerError> {
        match self.screener {
            ScreenerKind::Marker => Ok(Box::new(MarkerScreener::new(self.max_domain_value)?)),
            ScreenerKind::Hash => Ok(Box::new(HashScreener::bounded(self.max_domain_value)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.server_port, 4000);
        assert_eq!(config.max_worker_threads, 5);
        assert_eq!(config.report_interval(), Duration::from_secs(10));
        assert_eq!(config.batch_size, 100_000);
        assert_eq!(config.max_domain_value, 999_999_999);
        assert_eq!(config.log_sink_path, PathBuf::from("numbers.log"));
        assert_eq!(config.listen_addr(), "0.0.0.0:4000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"server_port": 4100, "batch_size": 10, "screener": "hash"}}"#
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server_port, 4100);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.screener, ScreenerKind::Hash);
        assert_eq!(config.max_worker_threads, 5);
    }

    #[test]
    fn test_from_file_errors() {
        assert!(matches!(
            ServerConfig::from_file("nonexistent_config.json"),
            Err(ConfigError::Io(_))
        ));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"serverPort": 1}}"#).unwrap();
        assert!(matches!(
            ServerConfig::from_file(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = ServerConfig {
            max_worker_threads: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_domain_above_record_range() {
        let config = ServerConfig {
            max_domain_value: i64::from(u32::MAX) + 1,
            screener: ScreenerKind::Hash,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = ServerConfig {
            max_domain_value: i64::from(u32::MAX),
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hash_screener_honours_domain_bound() {
        let config = ServerConfig {
            max_domain_value: 1_000,
            screener: ScreenerKind::Hash,
            ..ServerConfig::default()
        };
        let mut screener = config.build_screener().unwrap();
        assert!(!screener.is_unique_and_mark(1_001));
        assert!(screener.is_unique_and_mark(1_000));
    }

    #[test]
    fn test_negative_domain_fails_for_every_screener() {
        for screener in [ScreenerKind::Marker, ScreenerKind::Hash] {
            let config = ServerConfig {
                max_domain_value: -5,
                screener,
                ..ServerConfig::default()
            };
            assert!(matches!(
                config.build_screener(),
                Err(ScreenerError::InvalidDomain(-5))
            ));
        }
    }

    #[test]
    fn test_screener_kind_parsing() {
        assert_eq!("Marker".parse::<ScreenerKind>().unwrap(), ScreenerKind::Marker);
        assert_eq!("hash".parse::<ScreenerKind>().unwrap(), ScreenerKind::Hash);
        assert!("bloom".parse::<ScreenerKind>().is_err());
        assert_eq!(ScreenerKind::Hash.to_string(), "hash");
    }

    #[test]
    fn test_ipv6_listen_addr() {
        let config = ServerConfig {
            bind_address: "::1".into(),
            server_port: 0,
            ..ServerConfig::default()
        };
        assert_eq!(config.listen_addr(), "[::1]:0");
    }
}
