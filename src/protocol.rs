//! Line protocol spoken by clients, and the on-disk record format.
//!
//! A client sends newline-terminated ASCII lines. Exactly two shapes are
//! accepted:
//!
//! ```text
//! 000111222      <- a record: exactly nine decimal digits
//! terminate      <- stop the whole server (any letter case)
//! ```
//!
//! Anything else is invalid and the connection is dropped without a reply.

use crate::defs::{LINE_TERMINATOR, RECORD_WIDTH, TERMINATE_COMMAND};

use std::fmt::Write;

/// A record value: a non-negative integer of at most nine digits.
pub type Record = u32;

/// Classification of a single line received from a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Line {
    /// A well-formed nine-digit record.
    Record(Record),
    /// The reserved `terminate` command.
    Terminate,
    /// Anything else: wrong length, non-digit characters, empty line.
    Invalid,
}

impl Line {
    /// Classifies a raw line as read from the socket.
    ///
    /// A single trailing `\n` (optionally preceded by `\r`) is stripped.
    /// No other whitespace is trimmed: `" 12345678"` is invalid.
    ///
    /// # Example
    ///
    /// ```
    /// use number_logger::protocol::Line;
    /// assert_eq!(Line::parse("000111222\n"), Line::Record(111_222));
    /// assert_eq!(Line::parse("TERMINATE\r\n"), Line::Terminate);
    /// assert_eq!(Line::parse("12345678\n"), Line::Invalid);
    /// ```
    pub fn parse(raw: &str) -> Self {
        let line = strip_line_ending(raw);

        if line.len() == RECORD_WIDTH && line.bytes().all(|b| b.is_ascii_digit()) {
            // Nine ASCII digits always fit in a u32.
            return match line.parse::<Record>() {
                Ok(value) => Line::Record(value),
                Err(_) => Line::Invalid,
            };
        }

        if line.eq_ignore_ascii_case(TERMINATE_COMMAND) {
            return Line::Terminate;
        }

        Line::Invalid
    }

    /// Same as [`parse`](Self::parse), but a record above `max` is
    /// [`Line::Invalid`].
    ///
    /// # Example
    ///
    /// ```
    /// use number_logger::protocol::Line;
    /// assert_eq!(Line::parse_bounded("000000999\n", 1_000), Line::Record(999));
    /// assert_eq!(Line::parse_bounded("000005000\n", 1_000), Line::Invalid);
    /// ```
    pub fn parse_bounded(raw: &str, max: Record) -> Self {
        match Line::parse(raw) {
            Line::Record(value) if value > max => Line::Invalid,
            line => line,
        }
    }
}

fn strip_line_ending(raw: &str) -> &str {
    let line = raw.strip_suffix('\n').unwrap_or(raw);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Appends `value` to `buf` as a zero-padded nine-digit decimal followed by
/// the platform line terminator.
///
/// # Example
///
/// ```
/// use number_logger::protocol::append_formatted;
/// let mut buf = String::new();
/// append_formatted(&mut buf, 111_222);
/// assert!(buf.starts_with("000111222"));
/// ```
pub fn append_formatted(buf: &mut String, value: Record) {
    // Writing into a String cannot fail.
    let _ = write!(buf, "{:0width$}{}", value, LINE_TERMINATOR, width = RECORD_WIDTH);
}

/// Size in bytes of one formatted record, terminator included.
pub const fn formatted_record_len() -> usize {
    RECORD_WIDTH + LINE_TERMINATOR.len()
}
