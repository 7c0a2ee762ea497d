//! Flat rows, one struct per warehouse table.
//!
//! Field names are the table's column names. Absent values serialize as
//! `null`.

use serde::{Deserialize, Serialize};

/// One vehicle observation in the positions table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRow {
    /// When this row was mapped.
    pub fetch_time: String,
    /// Provider server time of the snapshot.
    pub hr: Option<String>,
    /// Public line code.
    pub line_c: Option<String>,
    /// Internal line code.
    pub line_cl: Option<i64>,
    /// Direction.
    pub line_sl: Option<i64>,
    /// Destination sign, direction 1.
    pub line_lt0: Option<String>,
    /// Destination sign, direction 2.
    pub line_lt1: Option<String>,
    /// Vehicle prefix.
    pub vehicle_p: Option<String>,
    /// Accessible vehicle.
    pub vehicle_a: Option<bool>,
    /// Observation instant reported by the provider.
    pub vehicle_ta: Option<String>,
    /// Latitude.
    pub vehicle_py: Option<f64>,
    /// Longitude.
    pub vehicle_px: Option<f64>,
}

/// One line variant in the lines table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRow {
    /// When this row was mapped.
    pub fetch_time: String,
    /// The line code that was searched for.
    pub line_c: String,
    /// Internal line code.
    pub cl: Option<i64>,
    /// Circular line.
    pub lc: Option<bool>,
    /// Sign prefix.
    pub lt: Option<String>,
    /// Sign suffix.
    pub tl: Option<i64>,
    /// Direction.
    pub sl: Option<i64>,
    /// Main terminal.
    pub tp: Option<String>,
    /// Secondary terminal.
    pub ts: Option<String>,
}

/// One stop in the stops table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRow {
    /// When this row was mapped.
    pub fetch_time: String,
    /// Public line code the stop was looked up for.
    pub line_c: String,
    /// Internal line code the stop was looked up for.
    pub cl: i64,
    /// Stop code.
    pub cp: Option<i64>,
    /// Stop name.
    pub np: Option<String>,
    /// Latitude.
    pub py: Option<f64>,
    /// Longitude.
    pub px: Option<f64>,
}
