use crate::batch_logger::BatchLogger;
use crate::config::ServerConfig;
use crate::consumer::{RecordConsumer, RecordQueue};
use crate::errors::{ScreenerError, ServerError};
use crate::protocol::Record;
use crate::report::Report;
use crate::reporter::MetricsReporter;
use crate::shutdown::ShutdownCoordinator;
use crate::tcp_server::ConnectionAcceptor;

use std::fs::{File, OpenOptions};
use std::net::SocketAddr;
use std::sync::Arc;

/// Outcome of a complete server run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    /// Report emitted during teardown, covering the last partial period.
    pub final_report: Report,
    /// Connections accepted over the run.
    pub connections: u64,
    /// Handlers abandoned after the shutdown grace period.
    pub stragglers: usize,
}

/// Wires every component of the number logger together.
///
/// Construction binds the listener and opens the log sink; [`run`](Self::run)
/// blocks until a client sends `terminate` (or the listener fails) and the
/// shutdown has been fully propagated.
pub struct NumberServer {
    config: ServerConfig,
    coordinator: Arc<ShutdownCoordinator>,
    logger: Arc<BatchLogger<File>>,
    consumer: Arc<RecordConsumer<File>>,
    reporter: MetricsReporter<File>,
    acceptor: ConnectionAcceptor,
}

impl NumberServer {
    /// Builds the server from `config`.
    ///
    /// # Errors
    /// * [`ServerError::Config`] for out-of-range settings.
    /// * [`ServerError::Screener`] if the record domain is invalid.
    /// * [`ServerError::SinkError`] if the log file cannot be created.
    /// * [`ServerError::BindError`] / [`ServerError::PoolError`] from the acceptor.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let screener = config.build_screener()?;
        let max_record = Record::try_from(config.max_domain_value)
            .map_err(|_| ScreenerError::InvalidDomain(config.max_domain_value))?;

        log::info!("Opening log sink: {:?}", config.log_sink_path);
        // Dedup state starts empty, so the log does too.
        let sink = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.log_sink_path)
            .map_err(|e| ServerError::SinkError(e.to_string()))?;
        let logger = Arc::new(BatchLogger::new(sink, screener, config.batch_size));

        let queue = Arc::new(RecordQueue::new());
        let coordinator = Arc::new(ShutdownCoordinator::start()?);

        let consumer = Arc::new(RecordConsumer::new(queue.clone(), logger.clone()));
        coordinator.register(consumer.clone());

        let acceptor = ConnectionAcceptor::bind(
            &config.listen_addr(),
            config.max_worker_threads,
            config.shutdown_grace(),
            queue,
            max_record,
            coordinator.clone(),
        )?;

        let reporter = MetricsReporter::new(logger.clone(), config.report_interval());

        log::info!(
            "NumberServer initialized: {} workers, batch size {}, {} screener over [0, {}]",
            config.max_worker_threads,
            config.batch_size,
            config.screener,
            config.max_domain_value
        );

        Ok(Self {
            config,
            coordinator,
            logger,
            consumer,
            reporter,
            acceptor,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.acceptor
            .local_addr()
            .map_err(|e| ServerError::BindError(e.to_string()))
    }

    /// Coordinator of this server; `signal_stop` on it stops the server
    /// exactly like a client `terminate`.
    pub fn coordinator(&self) -> Arc<ShutdownCoordinator> {
        self.coordinator.clone()
    }

    /// Configuration the server was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Starts the consumer and reporter, then serves clients until shutdown.
    ///
    /// On return the log is flushed and closed, every background thread has
    /// exited, and one last report has been emitted.
    pub fn run(self) -> Result<RunSummary, ServerError> {
        self.consumer.start()?;
        if let Err(e) = self.reporter.start() {
            log::error!("Failed to start metrics reporter: {}", e);
            self.consumer.stop();
            self.consumer.wait_for_finish();
            return Err(e);
        }

        log::info!("Entering main server loop");
        let summary = self.acceptor.listen_for_clients();

        log::info!("Acceptor stopped, tearing down");
        self.reporter.stop();
        self.consumer.wait_for_finish();
        self.coordinator.shutdown_self();

        if !self.logger.is_closed() {
            log::warn!("Log sink still open after consumer exit, closing it");
            self.logger.flush();
            self.logger.close();
        }

        let final_report = self.reporter.report_now();
        log::info!("Server shutdown complete");

        Ok(RunSummary {
            final_report,
            connections: summary.accepted,
            stragglers: summary.stragglers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::thread;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn config(sink: &NamedTempFile) -> ServerConfig {
        ServerConfig {
            server_port: 0,
            bind_address: "127.0.0.1".into(),
            report_interval_ms: 60_000,
            batch_size: 50,
            max_domain_value: 999_999_999,
            log_sink_path: sink.path().to_path_buf(),
            shutdown_grace_ms: 500,
            ..ServerConfig::default()
        }
    }

    fn start(config: ServerConfig) -> (SocketAddr, thread::JoinHandle<RunSummary>) {
        let server = NumberServer::new(config).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = thread::spawn(move || server.run().unwrap());
        (addr, handle)
    }

    fn logged_lines(sink: &NamedTempFile) -> Vec<String> {
        std::fs::read_to_string(sink.path())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_duplicate_end_to_end() {
        let sink = NamedTempFile::new().unwrap();
        let (addr, handle) = start(config(&sink));

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .write_all(b"123456789\n123456789\n000000000\n")
            .unwrap();
        thread::sleep(Duration::from_millis(300));

        scenario::send_terminate(addr).unwrap();
        let summary = handle.join().unwrap();

        assert_eq!(summary.final_report.total_uniques, 2);
        assert_eq!(summary.final_report.uniques, 2);
        assert_eq!(summary.final_report.duplicates, 1);
        assert_eq!(summary.stragglers, 0);

        let mut lines = logged_lines(&sink);
        lines.sort();
        assert_eq!(lines, vec!["000000000", "123456789"]);
    }

    #[test]
    fn test_concurrent_clients_with_disjoint_values() {
        let sink = NamedTempFile::new().unwrap();
        let (addr, handle) = start(config(&sink));

        let options = scenario::EnduranceOptions {
            producers: 4,
            per_producer: 250,
            start: 1_000,
            batch_len: 100,
            pace: Duration::ZERO,
            terminate_after: Some(Duration::from_millis(500)),
            ..scenario::EnduranceOptions::default()
        };
        let stats = scenario::run_endurance(addr, &options).unwrap();
        assert_eq!(stats.len(), 4);

        let summary = handle.join().unwrap();
        assert_eq!(summary.final_report.total_uniques, 1_000);
        assert_eq!(summary.final_report.duplicates, 0);

        let lines = logged_lines(&sink);
        assert_eq!(lines.len(), 1_000);
        for producer in 0..4u32 {
            let first = format!("{:09}", 1_000 + producer * 250);
            assert!(lines.contains(&first));
        }
    }

    #[test]
    fn test_terminate_closes_clients_and_listener() {
        let sink = NamedTempFile::new().unwrap();
        let (addr, handle) = start(config(&sink));

        let mut idle = TcpStream::connect(addr).unwrap();
        idle.write_all(b"555555555\n").unwrap();
        thread::sleep(Duration::from_millis(200));

        scenario::send_terminate(addr).unwrap();
        let summary = handle.join().unwrap();
        assert_eq!(summary.connections, 2);
        assert_eq!(summary.final_report.total_uniques, 1);

        idle.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut buf = [0u8; 16];
        assert!(matches!(idle.read(&mut buf), Ok(0) | Err(_)));
        assert!(TcpStream::connect(addr).is_err());
    }

    #[test]
    fn test_external_stop_signal() {
        let sink = NamedTempFile::new().unwrap();
        let server = NumberServer::new(config(&sink)).unwrap();
        let coordinator = server.coordinator();
        let handle = thread::spawn(move || server.run().unwrap());

        thread::sleep(Duration::from_millis(100));
        coordinator.signal_stop();
        let summary = handle.join().unwrap();
        assert_eq!(summary.connections, 0);
        assert_eq!(summary.final_report, Report::default());
        assert!(logged_lines(&sink).is_empty());
    }

    #[test]
    fn test_basic_scenario_totals() {
        let sink = NamedTempFile::new().unwrap();
        let (addr, handle) = start(ServerConfig {
            max_worker_threads: 5,
            ..config(&sink)
        });

        let expected = scenario::run_basic(addr, Duration::from_millis(300)).unwrap();
        let summary = handle.join().unwrap();

        assert_eq!(summary.final_report.total_uniques, expected.uniques);
        assert_eq!(summary.final_report.duplicates, expected.duplicates);
        assert_eq!(logged_lines(&sink).len() as u64, expected.uniques);
        assert!(!logged_lines(&sink).contains(&"888888888".to_string()));
        assert!(!logged_lines(&sink).contains(&"005550055".to_string()));
    }

    #[test]
    fn test_record_above_domain_closes_connection() {
        let sink = NamedTempFile::new().unwrap();
        let (addr, handle) = start(ServerConfig {
            max_domain_value: 1_000,
            ..config(&sink)
        });

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"000005000\n000000001\n").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut buf = [0u8; 16];
        match client.read(&mut buf) {
            Ok(n) => assert_eq!(n, 0),
            Err(e) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
        }

        thread::sleep(Duration::from_millis(100));
        scenario::send_terminate(addr).unwrap();
        let summary = handle.join().unwrap();

        assert_eq!(summary.final_report, Report::default());
        assert!(logged_lines(&sink).is_empty());
    }

    #[test]
    fn test_domain_above_record_range_is_rejected() {
        let sink = NamedTempFile::new().unwrap();
        let result = NumberServer::new(ServerConfig {
            max_domain_value: i64::from(u32::MAX) + 1,
            ..config(&sink)
        });
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[test]
    fn test_invalid_domain_fails_fast() {
        let sink = NamedTempFile::new().unwrap();
        let result = NumberServer::new(ServerConfig {
            max_domain_value: -1,
            ..config(&sink)
        });
        assert!(matches!(
            result,
            Err(ServerError::Screener(ScreenerError::InvalidDomain(-1)))
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let sink = NamedTempFile::new().unwrap();
        let result = NumberServer::new(ServerConfig {
            max_worker_threads: 0,
            ..config(&sink)
        });
        assert!(matches!(result, Err(ServerError::Config(_))));
    }
}
