use crate::batch_logger::BatchLogger;
use crate::errors::ServerError;
use crate::report::Report;

use std::io::Write;
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Periodically reads the logger metrics and writes them to the log.
pub struct MetricsReporter<W: Write + Send + 'static> {
    logger: Arc<BatchLogger<W>>,
    interval: Duration,

    /// Dropping the sender wakes the timer thread and stops it
    stop_tx: Mutex<Option<Sender<()>>>,

    /// Background timer thread
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<W: Write + Send + 'static> MetricsReporter<W> {
    /// Creates a stopped reporter emitting every `interval`.
    pub fn new(logger: Arc<BatchLogger<W>>, interval: Duration) -> Self {
        Self {
            logger,
            interval,
            stop_tx: Mutex::new(None),
            thread: Mutex::new(None),
        }
    }

    /// Starts the timer thread. Calling it again while running has no effect.
    pub fn start(&self) -> Result<(), ServerError> {
        let mut guard = self.thread.lock().unwrap_or_else(PoisonError::into_inner);

        if guard.is_some() {
            log::warn!("Metrics reporter already running");
            return Ok(());
        }

        let (tx, rx) = channel::<()>();
        let logger = self.logger.clone();
        let interval = self.interval;

        let handle = thread::Builder::new()
            .name("metrics-reporter".into())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        emit(&logger);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| ServerError::ThreadError(e.to_string()))?;

        log::info!(
            "Metrics reporter started with interval: {}ms",
            interval.as_millis()
        );
        *self.stop_tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        *guard = Some(handle);
        Ok(())
    }

    /// Stops the timer thread and waits for it. No report is emitted.
    pub fn stop(&self) {
        if let Some(tx) = self
            .stop_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(());
        }

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Metrics reporter thread panicked");
            } else {
                log::debug!("Metrics reporter thread joined");
            }
        }
    }

    /// Emits one report right away, on the calling thread.
    pub fn report_now(&self) -> Report {
        emit(&self.logger)
    }
}

impl<W: Write + Send + 'static> Drop for MetricsReporter<W> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn emit<W: Write + Send>(logger: &BatchLogger<W>) -> Report {
    let report = logger.get_report();
    log::info!("{}", report);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screener::HashScreener;
    use std::time::Instant;

    fn logger() -> Arc<BatchLogger<Vec<u8>>> {
        Arc::new(BatchLogger::new(Vec::new(), Box::new(HashScreener::new()), 10))
    }

    #[test]
    fn test_periodic_report_resets_period_counters() {
        let logger = logger();
        logger.log_number(1);
        logger.log_number(1);

        let reporter = MetricsReporter::new(logger.clone(), Duration::from_millis(20));
        reporter.start().unwrap();
        reporter.start().unwrap();
        thread::sleep(Duration::from_millis(120));
        reporter.stop();

        // The timer already consumed the period counters.
        let report = logger.get_report();
        assert_eq!(report.uniques, 0);
        assert_eq!(report.duplicates, 0);
        assert_eq!(report.total_uniques, 1);
    }

    #[test]
    fn test_stop_is_prompt() {
        let reporter = MetricsReporter::new(logger(), Duration::from_secs(3600));
        reporter.start().unwrap();

        let start = Instant::now();
        reporter.stop();
        reporter.stop();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_report_now() {
        let logger = logger();
        let reporter = MetricsReporter::new(logger.clone(), Duration::from_secs(3600));
        logger.log_number(5);
        logger.log_number(6);
        logger.log_number(5);

        let report = reporter.report_now();
        assert_eq!(
            report,
            Report {
                duplicates: 1,
                uniques: 2,
                total_uniques: 2
            }
        );
        assert_eq!(reporter.report_now().uniques, 0);
    }
}
