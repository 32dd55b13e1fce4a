use serde::Serialize;
use std::fmt;

/// Snapshot of the logger metrics taken by
/// [`BatchLogger::get_report`](crate::batch_logger::BatchLogger::get_report).
///
/// The "this period" counters cover everything logged since the previous
/// report; `total_uniques` covers the lifetime of the process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    /// Duplicate records received during this period.
    pub duplicates: u64,

    /// Unique records received during this period.
    pub uniques: u64,

    /// Unique records received since start-up.
    pub total_uniques: u64,
}

impl Report {
    /// Serializes the report into a compact JSON object.
    ///
    /// # Example
    ///
    /// ```
    /// use number_logger::report::Report;
    /// let r = Report { duplicates: 1, uniques: 2, total_uniques: 3 };
    /// assert_eq!(r.to_json(), r#"{"duplicates":1,"uniques":2,"total_uniques":3}"#);
    /// ```
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Received {} unique numbers, {} duplicates. Total uniques: {}",
            self.uniques, self.duplicates, self.total_uniques
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_format() {
        let report = Report {
            duplicates: 4,
            uniques: 11,
            total_uniques: 11,
        };
        assert_eq!(
            report.to_string(),
            "Received 11 unique numbers, 4 duplicates. Total uniques: 11"
        );
    }
}
