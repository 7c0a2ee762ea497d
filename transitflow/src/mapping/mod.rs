//! Row mapping from API responses to table rows.
//!
//! The mappers are total: any decoded response maps, missing values become
//! `null`. Each row is stamped from the clock as it is produced, so rows
//! mapped later in a long cycle carry a later `fetch_time`.

mod rows;

pub use rows::{LineRow, PositionRow, StopRow};

use crate::api::{LineVariant, PositionSnapshot, Stop};
use crate::utils::{format_iso8601, Clock};

fn stamp(clock: &dyn Clock) -> String {
    format_iso8601(&clock.now())
}

/// Flattens a position snapshot into one row per vehicle.
///
/// Line attributes are copied onto every vehicle of that line, so N lines
/// with M vehicles each produce N×M rows.
#[must_use]
pub fn map_positions(snapshot: &PositionSnapshot, clock: &dyn Clock) -> Vec<PositionRow> {
    let mut rows = Vec::with_capacity(snapshot.vehicle_count());

    for line in &snapshot.lines {
        for vehicle in &line.vehicles {
            rows.push(PositionRow {
                fetch_time: stamp(clock),
                hr: snapshot.server_time.clone(),
                line_c: line.code.clone(),
                line_cl: line.internal_code,
                line_sl: line.direction,
                line_lt0: line.destination.clone(),
                line_lt1: line.origin.clone(),
                vehicle_p: vehicle.prefix.clone(),
                vehicle_a: vehicle.accessible,
                vehicle_ta: vehicle.observed_at.clone(),
                vehicle_py: vehicle.latitude,
                vehicle_px: vehicle.longitude,
            });
        }
    }

    rows
}

/// Maps the variants found for one searched line code.
#[must_use]
pub fn map_line_variants(
    line_code: &str,
    variants: &[LineVariant],
    clock: &dyn Clock,
) -> Vec<LineRow> {
    variants
        .iter()
        .map(|variant| LineRow {
            fetch_time: stamp(clock),
            line_c: line_code.to_string(),
            cl: variant.internal_code,
            lc: variant.circular,
            lt: variant.sign_prefix.clone(),
            tl: variant.sign_suffix,
            sl: variant.direction,
            tp: variant.main_terminal.clone(),
            ts: variant.secondary_terminal.clone(),
        })
        .collect()
}

/// Maps the stops found for one line variant.
#[must_use]
pub fn map_stops(
    line_code: &str,
    internal_code: i64,
    stops: &[Stop],
    clock: &dyn Clock,
) -> Vec<StopRow> {
    stops
        .iter()
        .map(|stop| StopRow {
            fetch_time: stamp(clock),
            line_c: line_code.to_string(),
            cl: internal_code,
            cp: stop.code,
            np: stop.name.clone(),
            py: stop.latitude,
            px: stop.longitude,
        })
        .collect()
}
