//! Timestamp helpers and the clock used to stamp rows.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

/// A UTC instant.
pub type Timestamp = DateTime<Utc>;

/// Errors that can occur during timestamp parsing.
#[derive(Debug, Error)]
pub enum TimestampError {
    /// The timestamp string is empty.
    #[error("Empty timestamp string")]
    EmptyString,

    /// The timestamp value is invalid.
    #[error("Invalid timestamp: {0}")]
    InvalidFormat(String),
}

/// Source of the current instant.
///
/// Row mappers and the in-memory warehouse read time through this trait so
/// tests can pin or step it.
pub trait Clock: Send + Sync + Debug {
    /// Returns the current UTC instant.
    fn now(&self) -> Timestamp;
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// A clock that only moves when told to, optionally advancing on every read.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<Timestamp>>,
    step: Duration,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
            step: Duration::zero(),
        }
    }

    /// Creates a clock that advances by `step` after every read.
    #[must_use]
    pub fn stepping(start: Timestamp, step: Duration) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
            step,
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.current.lock() += by;
    }

    /// Sets the clock to an instant.
    pub fn set(&self, to: Timestamp) {
        *self.current.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let mut current = self.current.lock();
        let now = *current;
        *current += self.step;
        now
    }
}

/// Formats a timestamp the way rows carry it: `YYYY-MM-DDTHH:MM:SS.ffffff+00:00`.
#[must_use]
pub fn format_iso8601(dt: &Timestamp) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Returns the current UTC time in row format.
///
/// # Examples
///
/// ```
/// use transitflow::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    format_iso8601(&Utc::now())
}

/// Parses an ISO 8601 timestamp as written by rows or returned by a warehouse.
///
/// Accepts RFC 3339 with either `Z` or an offset, naive date-times (taken as
/// UTC), and BigQuery's `YYYY-MM-DD HH:MM:SS[.f] UTC` rendering.
pub fn parse_timestamp(input: &str) -> Result<Timestamp, TimestampError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(TimestampError::EmptyString);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = trimmed.trim_end_matches(" UTC").trim_end_matches('Z');
    let formats = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];
    for fmt in formats {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Ok(Utc.from_utc_datetime(&parsed));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(naive, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&midnight));
        }
    }

    Err(TimestampError::InvalidFormat(trimmed.to_string()))
}

/// BigQuery partition decorator suffix for a day, e.g. `20241016`.
#[must_use]
pub fn partition_suffix(day: NaiveDate) -> String {
    day.format("%Y%m%d").to_string()
}
