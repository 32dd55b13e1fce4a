//! Batching writer for unique records.
//!
//! Unique records are formatted into an in-memory buffer and only written to
//! the sink once the buffer reaches `batch_size` formatted records, keeping
//! disk I/O off the hot path. A partial batch stays in memory until the next
//! explicit [`BatchLogger::flush`].
//!
//! # Known limitation
//!
//! A record is marked as seen by the screener before it is written. If the
//! write of its batch fails, the failure is logged and the batch is dropped:
//! that record counts as unique but never reaches the sink, and a later copy
//! of it is treated as a duplicate.

use crate::errors::LoggerError;
use crate::protocol::{append_formatted, formatted_record_len, Record};
use crate::report::Report;
use crate::screener::UniqueScreener;

use std::io::Write;
use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};

const MAX_PREALLOCATED_BYTES: usize = 16 * 1024 * 1024;

/// Buffers unique records and writes them to a sink in batches.
///
/// Every public operation runs under a single internal lock, so the logger
/// can be shared between threads and a [`Report`] is always a consistent
/// snapshot.
pub struct BatchLogger<W: Write + Send> {
    state: Mutex<LoggerState<W>>,
    threshold: usize,
}

struct LoggerState<W> {
    sink: Option<W>,
    screener: Box<dyn UniqueScreener>,
    buffer: String,
    total_uniques: u64,
    uniques_since_report: u64,
    duplicates_since_report: u64,
}

impl<W: Write + Send> BatchLogger<W> {
    /// Creates a logger writing to `sink`, screening with `screener` and
    /// flushing every `batch_size` unique records.
    ///
    /// A `batch_size` of zero writes every unique record immediately.
    pub fn new(sink: W, screener: Box<dyn UniqueScreener>, batch_size: usize) -> Self {
        let threshold = batch_size.saturating_mul(formatted_record_len());
        log::debug!(
            "BatchLogger created: batch size {} records ({} bytes)",
            batch_size,
            threshold
        );

        Self {
            state: Mutex::new(LoggerState {
                sink: Some(sink),
                screener,
                buffer: String::with_capacity(threshold.min(MAX_PREALLOCATED_BYTES)),
                total_uniques: 0,
                uniques_since_report: 0,
                duplicates_since_report: 0,
            }),
            threshold,
        }
    }

    /// Screens `value` and, if it was never seen before, appends it to the
    /// current batch. Flushes synchronously once the batch is full.
    pub fn log_number(&self, value: Record) {
        let mut state = self.lock();

        if state.screener.is_unique_and_mark(i64::from(value)) {
            append_formatted(&mut state.buffer, value);
            state.total_uniques += 1;
            state.uniques_since_report += 1;

            if state.buffer.len() >= self.threshold {
                if let Err(e) = state.write_batch() {
                    log::error!("Failed to write batch to log sink: {}", e);
                }
            }
        } else {
            state.duplicates_since_report += 1;
        }
    }

    /// Writes the pending batch to the sink and clears it.
    ///
    /// Calling this on an empty batch writes nothing. Sink errors are logged
    /// and swallowed.
    pub fn flush(&self) {
        if let Err(e) = self.try_flush() {
            log::error!("Failed to flush log sink: {}", e);
        }
    }

    /// Same as [`flush`](Self::flush) but returns the sink error to the caller.
    ///
    /// The pending batch is discarded even when the write fails.
    pub fn try_flush(&self) -> Result<(), LoggerError> {
        self.lock().write_batch()
    }

    /// Releases the sink. Later flushes fail with [`LoggerError::Closed`];
    /// calling `close` again does nothing.
    pub fn close(&self) {
        let mut state = self.lock();
        if let Some(mut sink) = state.sink.take() {
            if let Err(e) = sink.flush() {
                log::error!("Failed to flush log sink on close: {}", e);
            }
            log::info!("Log sink closed");
        } else {
            log::debug!("Log sink already closed");
        }
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().sink.is_none()
    }

    /// Returns the current metrics and resets the per-period counters.
    pub fn get_report(&self) -> Report {
        let mut state = self.lock();
        let report = Report {
            duplicates: state.duplicates_since_report,
            uniques: state.uniques_since_report,
            total_uniques: state.total_uniques,
        };
        state.duplicates_since_report = 0;
        state.uniques_since_report = 0;
        report
    }

    /// Number of bytes waiting in the current batch.
    pub fn pending_bytes(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Consumes the logger and hands back the sink, unless it was closed.
    pub fn into_sink(self) -> Option<W> {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .sink
    }

    fn lock(&self) -> MutexGuard<'_, LoggerState<W>> {
        // A panic while holding the lock leaves counters valid; keep going.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write> LoggerState<W> {
    fn write_batch(&mut self) -> Result<(), LoggerError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let batch = mem::take(&mut self.buffer);
        let Some(sink) = self.sink.as_mut() else {
            log::warn!(
                "Dropping {} bytes of records: log sink already closed",
                batch.len()
            );
            return Err(LoggerError::Closed);
        };

        log::trace!("Writing {} bytes to log sink", batch.len());
        sink.write_all(batch.as_bytes())
            .and_then(|_| sink.flush())
            .map_err(|e| LoggerError::Io(e.to_string()))
    }
}
