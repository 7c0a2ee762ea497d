//! Sample payloads shaped like the live API.

use crate::api::{HttpResponse, LinePositions, LineVariant, PositionSnapshot, Stop, VehiclePosition};
use crate::utils::{parse_timestamp, ManualClock, Timestamp};

/// Midday on a fixed day, the default instant for test clocks.
#[must_use]
pub fn noon() -> Timestamp {
    parse_timestamp("2024-10-16T12:00:00Z").unwrap_or_default()
}

/// A clock frozen at [`noon`].
#[must_use]
pub fn frozen_clock() -> ManualClock {
    ManualClock::new(noon())
}

/// A snapshot with one entry per `(line code, vehicle count)`.
///
/// Line `i` gets internal code `1000 + i`.
#[must_use]
pub fn position_snapshot(lines: &[(&str, usize)]) -> PositionSnapshot {
    PositionSnapshot {
        server_time: Some("12:00".to_string()),
        lines: lines
            .iter()
            .enumerate()
            .map(|(i, (code, vehicles))| LinePositions {
                code: Some((*code).to_string()),
                internal_code: Some(1000 + i as i64),
                direction: Some(1),
                destination: Some(format!("TERMINAL {i}")),
                origin: Some("CENTRO".to_string()),
                vehicles: (0..*vehicles)
                    .map(|j| VehiclePosition {
                        prefix: Some(format!("{}{j:03}", i + 1)),
                        accessible: Some(j % 2 == 0),
                        observed_at: Some("2024-10-16T11:59:30Z".to_string()),
                        latitude: Some(-23.55 - j as f64 * 0.001),
                        longitude: Some(-46.63),
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// One variant per internal code, all for sign `8000`.
#[must_use]
pub fn line_variants(internal_codes: &[i64]) -> Vec<LineVariant> {
    internal_codes
        .iter()
        .enumerate()
        .map(|(i, code)| LineVariant {
            internal_code: Some(*code),
            circular: Some(false),
            sign_prefix: Some("8000".to_string()),
            sign_suffix: Some(10),
            direction: Some(i as i64 % 2 + 1),
            main_terminal: Some("PÇA. RAMOS DE AZEVEDO".to_string()),
            secondary_terminal: Some("TERMINAL LAPA".to_string()),
        })
        .collect()
}

/// `count` stops with codes `1..=count`.
#[must_use]
pub fn stops(count: usize) -> Vec<Stop> {
    (1..=count)
        .map(|i| Stop {
            code: Some(i as i64),
            name: Some(format!("PARADA {i}")),
            latitude: Some(-23.5),
            longitude: Some(-46.6),
        })
        .collect()
}

/// Wraps any serializable payload as a `200` response.
#[must_use]
pub fn ok_json<T: serde::Serialize>(payload: &T) -> HttpResponse {
    HttpResponse::new(200, serde_json::to_string(payload).unwrap_or_default())
}
