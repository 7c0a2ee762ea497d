//! Timestamp and identifier helpers.

pub mod timestamps;

pub use timestamps::{
    format_iso8601, iso_timestamp, parse_timestamp, partition_suffix, Clock, ManualClock,
    SystemClock, Timestamp, TimestampError,
};

/// Generates a random identifier for a cycle.
#[must_use]
pub fn generate_cycle_id() -> uuid::Uuid {
    uuid::Uuid::new_v4()
}
