//! Exact "seen before?" screening of records.
//!
//! Two strategies are provided:
//!
//! - [`MarkerScreener`] keeps one bit per value of a fixed inclusive domain
//!   `[0, max]`. Memory is allocated once up front and never grows: the
//!   default domain of 10^9 values costs 125 000 000 bytes (~119 MB) no matter
//!   how many distinct values arrive. A hash set overtakes that footprint
//!   after a few million entries, which a streaming workload reaches quickly.
//!   The price is generality: nothing outside `[0, max]` can be represented.
//! - [`HashScreener`] stores each distinct value in a `HashSet`. Its memory
//!   grows with the number of distinct values, so it suits sparse domains.
//!   It can be left unbounded for domains unknown in advance.
//!
//! # Single writer
//!
//! [`UniqueScreener::is_unique_and_mark`] takes `&mut self`: the check and the
//! mark are not internally synchronized. Sharing a screener between writers
//! requires an outer lock (the [`BatchLogger`](crate::batch_logger::BatchLogger)
//! owns its screener behind its own mutex).

use crate::errors::ScreenerError;

use std::collections::HashSet;

/// Answers whether a value has been seen before, marking it as seen.
pub trait UniqueScreener: Send {
    /// Returns `true` the first time `value` is presented and `false` on every
    /// later call with the same value.
    ///
    /// Values the screener cannot represent return `false` and leave the
    /// state untouched.
    fn is_unique_and_mark(&mut self, value: i64) -> bool;
}

/// Fixed-size bitset screener over the inclusive domain `[0, max_value]`.
#[derive(Debug)]
pub struct MarkerScreener {
    max_value: u32,
    markers: Vec<u64>,
}

impl MarkerScreener {
    /// Allocates markers for every value in `[0, max_value]`.
    ///
    /// # Errors
    /// Returns [`ScreenerError::InvalidDomain`] if `max_value` is negative or
    /// does not fit in a `u32`.
    pub fn new(max_value: i64) -> Result<Self, ScreenerError> {
        let max_value =
            u32::try_from(max_value).map_err(|_| ScreenerError::InvalidDomain(max_value))?;

        let words = max_value as usize / 64 + 1;
        log::debug!(
            "Allocating marker screener for [0, {}] ({} bytes)",
            max_value,
            words * std::mem::size_of::<u64>()
        );

        Ok(Self {
            max_value,
            markers: vec![0; words],
        })
    }

    /// Inclusive upper bound of the domain.
    pub fn max_value(&self) -> u32 {
        self.max_value
    }

    /// Returns `true` if `value` has already been marked, without marking it.
    pub fn contains(&self, value: i64) -> bool {
        match self.position(value) {
            Some((word, mask)) => self.markers[word] & mask != 0,
            None => false,
        }
    }

    fn position(&self, value: i64) -> Option<(usize, u64)> {
        if value < 0 || value > i64::from(self.max_value) {
            return None;
        }
        let value = value as usize;
        Some((value >> 6, 1u64 << (value & 63)))
    }
}

impl UniqueScreener for MarkerScreener {
    fn is_unique_and_mark(&mut self, value: i64) -> bool {
        let Some((word, mask)) = self.position(value) else {
            log::error!(
                "Value {} outside screener domain [0, {}], discarding",
                value,
                self.max_value
            );
            return false;
        };

        if self.markers[word] & mask == 0 {
            self.markers[word] |= mask;
            true
        } else {
            false
        }
    }
}

/// Hash-set screener for sparse or unbounded non-negative domains.
#[derive(Debug)]
pub struct HashScreener {
    max_value: i64,
    seen: HashSet<i64>,
}

impl Default for HashScreener {
    fn default() -> Self {
        Self {
            max_value: i64::MAX,
            seen: HashSet::new(),
        }
    }
}

impl HashScreener {
    /// Creates an empty screener accepting any non-negative value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty screener over the inclusive domain `[0, max_value]`.
    ///
    /// # Errors
    /// Returns [`ScreenerError::InvalidDomain`] if `max_value` is negative.
    pub fn bounded(max_value: i64) -> Result<Self, ScreenerError> {
        if max_value < 0 {
            return Err(ScreenerError::InvalidDomain(max_value));
        }
        Ok(Self {
            max_value,
            seen: HashSet::new(),
        })
    }

    /// Number of distinct values seen so far.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns `true` if no value has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl UniqueScreener for HashScreener {
    fn is_unique_and_mark(&mut self, value: i64) -> bool {
        if value < 0 || value > self.max_value {
            log::error!(
                "Value {} outside screener domain [0, {}], discarding",
                value,
                self.max_value
            );
            return false;
        }
        self.seen.insert(value)
    }
}
