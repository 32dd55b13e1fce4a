//! Single drain loop between the connection handlers and the batch logger.
//!
//! Handlers push records onto a lock-free [`RecordQueue`] shared by every
//! connection. One consumer thread pops them and feeds the
//! [`BatchLogger`](crate::batch_logger::BatchLogger).
//!
//! The loop polls instead of parking on the queue: under a steady
//! high-throughput stream this keeps latency minimal at the cost of one busy
//! core while idle. [`Backoff`] turns the idle spin into `yield_now` calls
//! after a few rounds. Records still queued when the stop signal arrives are
//! dropped; the partial batch already screened is flushed before the logger
//! is closed.

use crate::batch_logger::BatchLogger;
use crate::errors::ServerError;
use crate::protocol::Record;
use crate::shutdown::ShutdownParticipant;

use crossbeam::queue::SegQueue;
use crossbeam::utils::Backoff;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Unbounded multi-producer queue of records shared by all connections.
pub type RecordQueue = SegQueue<Record>;

/// Drains the [`RecordQueue`] into a [`BatchLogger`] on a dedicated thread.
pub struct RecordConsumer<W: Write + Send + 'static> {
    queue: Arc<RecordQueue>,
    logger: Arc<BatchLogger<W>>,
    active: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<W: Write + Send + 'static> RecordConsumer<W> {
    /// Creates a stopped consumer.
    pub fn new(queue: Arc<RecordQueue>, logger: Arc<BatchLogger<W>>) -> Self {
        Self {
            queue,
            logger,
            active: Arc::new(AtomicBool::new(true)),
            thread: Mutex::new(None),
        }
    }

    /// Starts the drain thread. Calling it again while running has no effect.
    pub fn start(&self) -> Result<(), ServerError> {
        let mut guard = self.thread.lock().unwrap_or_else(PoisonError::into_inner);

        if guard.is_some() {
            log::warn!("Record consumer thread already running");
            return Ok(());
        }

        let queue = self.queue.clone();
        let logger = self.logger.clone();
        let active = self.active.clone();

        let handle = thread::Builder::new()
            .name("record-consumer".into())
            .spawn(move || drain(&queue, &logger, &active))
            .map_err(|e| ServerError::ThreadError(e.to_string()))?;

        log::info!("Record consumer thread started");
        *guard = Some(handle);
        Ok(())
    }

    /// Tells the drain loop to stop. The thread flushes and closes the logger
    /// on its way out.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Blocks until the drain thread has exited. Returns immediately if it
    /// was never started or has already been joined.
    pub fn wait_for_finish(&self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            log::debug!("Waiting for record consumer thread to finish");
            if handle.join().is_err() {
                log::error!("Record consumer thread panicked");
            } else {
                log::info!("Record consumer thread joined");
            }
        }
    }
}

impl<W: Write + Send + 'static> ShutdownParticipant for RecordConsumer<W> {
    fn on_terminate(&self) {
        self.stop();
    }

    fn name(&self) -> String {
        "record consumer".to_string()
    }
}

fn drain<W: Write + Send>(queue: &RecordQueue, logger: &BatchLogger<W>, active: &AtomicBool) {
    let backoff = Backoff::new();
    let mut consumed = 0u64;

    while active.load(Ordering::SeqCst) {
        match queue.pop() {
            Some(value) => {
                logger.log_number(value);
                consumed += 1;
                backoff.reset();
            }
            None => backoff.snooze(),
        }
    }

    if !queue.is_empty() {
        log::info!(
            "Record consumer stopping with {} records left in the queue",
            queue.len()
        );
    }
    log::debug!("Record consumer drained {} records", consumed);

    logger.flush();
    logger.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Report;
    use crate::screener::MarkerScreener;
    use std::time::{Duration, Instant};

    fn logger() -> Arc<BatchLogger<Vec<u8>>> {
        Arc::new(BatchLogger::new(
            Vec::new(),
            Box::new(MarkerScreener::new(999_999_999).unwrap()),
            1_000,
        ))
    }

    fn producer(queue: &Arc<RecordQueue>, values: &'static [u32]) -> thread::JoinHandle<()> {
        let queue = queue.clone();
        thread::spawn(move || {
            for v in values {
                queue.push(*v);
            }
        })
    }

    fn wait_for_empty(queue: &RecordQueue) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !queue.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        // Let the consumer finish the record it just popped.
        thread::sleep(Duration::from_millis(50));
    }

    #[test]
    fn test_simple_input() {
        let queue = Arc::new(RecordQueue::new());
        let logger = logger();
        let consumer = RecordConsumer::new(queue.clone(), logger.clone());
        consumer.start().unwrap();

        producer(
            &queue,
            &[
                123_456_789,
                123_456_789,
                323_456_789,
                423_456_789,
                523_456_789,
                223_456_789,
            ],
        )
        .join()
        .unwrap();

        wait_for_empty(&queue);
        consumer.on_terminate();
        consumer.wait_for_finish();

        assert_eq!(
            logger.get_report(),
            Report {
                duplicates: 1,
                uniques: 5,
                total_uniques: 5
            }
        );
        assert!(logger.is_closed());
    }

    #[test]
    fn test_multiple_producers() {
        let queue = Arc::new(RecordQueue::new());
        let logger = logger();
        let consumer = RecordConsumer::new(queue.clone(), logger.clone());
        consumer.start().unwrap();
        consumer.start().unwrap();

        let producers = vec![
            producer(
                &queue,
                &[123_456_789, 223_456_789, 323_456_789, 423_456_789, 523_456_789],
            ),
            producer(&queue, &[0, 111_111_111, 0]),
            producer(&queue, &[222_222_222, 123_456_789, 333_333_333, 444_444_444]),
            producer(
                &queue,
                &[
                    987_654_321,
                    987_654_322,
                    987_654_323,
                    987_654_324,
                    987_654_325,
                    987_654_326,
                    987_654_326,
                ],
            ),
            producer(&queue, &[999_999_999]),
        ];
        for p in producers {
            p.join().unwrap();
        }

        wait_for_empty(&queue);
        consumer.stop();
        consumer.wait_for_finish();

        let report = logger.get_report();
        assert_eq!(report.uniques + report.duplicates, 20);
        assert_eq!(report.total_uniques, 17);
        assert_eq!(report.duplicates, 3);
    }

    #[test]
    fn test_flushes_partial_batch_on_stop() {
        let queue = Arc::new(RecordQueue::new());
        let logger = logger();
        let consumer = RecordConsumer::new(queue.clone(), logger.clone());
        consumer.start().unwrap();

        queue.push(42);
        wait_for_empty(&queue);
        assert!(logger.pending_bytes() > 0);

        consumer.stop();
        consumer.wait_for_finish();
        consumer.wait_for_finish();

        assert_eq!(logger.pending_bytes(), 0);
        assert!(logger.is_closed());
    }

    #[test]
    fn test_queue_left_behind_after_stop_is_not_processed() {
        let queue = Arc::new(RecordQueue::new());
        let logger = logger();
        let consumer = RecordConsumer::new(queue.clone(), logger.clone());
        consumer.start().unwrap();
        consumer.stop();
        consumer.wait_for_finish();

        queue.push(7);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.len(), 1);
        assert_eq!(logger.get_report().total_uniques, 0);
    }
}
