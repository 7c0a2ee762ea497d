//! Response shapes of the upstream API.
//!
//! Every field is optional and every list tolerates `null`, so any
//! well-formed payload decodes. Field names follow the provider's
//! single-letter keys through `rename`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// `GET /Posicao`: every vehicle currently reporting, grouped by line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Provider server time of the snapshot (`HH:MM`).
    #[serde(default, rename = "hr", deserialize_with = "lenient_string")]
    pub server_time: Option<String>,
    /// Lines with at least one vehicle.
    #[serde(default, rename = "l", deserialize_with = "null_as_default")]
    pub lines: Vec<LinePositions>,
}

impl PositionSnapshot {
    /// Total number of vehicles across all lines.
    #[must_use]
    pub fn vehicle_count(&self) -> usize {
        self.lines.iter().map(|l| l.vehicles.len()).sum()
    }
}

/// One line inside a position snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinePositions {
    /// Public line code, e.g. `8000-10`.
    #[serde(default, rename = "c", deserialize_with = "lenient_string")]
    pub code: Option<String>,
    /// Internal line code.
    #[serde(default, rename = "cl")]
    pub internal_code: Option<i64>,
    /// Direction (1 or 2).
    #[serde(default, rename = "sl")]
    pub direction: Option<i64>,
    /// Destination sign when running in direction 1.
    #[serde(default, rename = "lt0", deserialize_with = "lenient_string")]
    pub destination: Option<String>,
    /// Destination sign when running in direction 2.
    #[serde(default, rename = "lt1", deserialize_with = "lenient_string")]
    pub origin: Option<String>,
    /// Vehicles on this line.
    #[serde(default, rename = "vs", deserialize_with = "null_as_default")]
    pub vehicles: Vec<VehiclePosition>,
}

/// One vehicle observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehiclePosition {
    /// Vehicle prefix. Sent as a number by the live API, stored as text.
    #[serde(default, rename = "p", deserialize_with = "lenient_string")]
    pub prefix: Option<String>,
    /// Whether the vehicle is accessible.
    #[serde(default, rename = "a")]
    pub accessible: Option<bool>,
    /// UTC instant of the observation as reported by the provider.
    #[serde(default, rename = "ta", deserialize_with = "lenient_string")]
    pub observed_at: Option<String>,
    /// Latitude.
    #[serde(default, rename = "py")]
    pub latitude: Option<f64>,
    /// Longitude.
    #[serde(default, rename = "px")]
    pub longitude: Option<f64>,
}

/// `GET /Linha/Buscar`: one variant of a line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineVariant {
    /// Internal line code.
    #[serde(default, rename = "cl")]
    pub internal_code: Option<i64>,
    /// Whether the line is circular.
    #[serde(default, rename = "lc")]
    pub circular: Option<bool>,
    /// First part of the public sign.
    #[serde(default, rename = "lt", deserialize_with = "lenient_string")]
    pub sign_prefix: Option<String>,
    /// Second part of the public sign.
    #[serde(default, rename = "tl")]
    pub sign_suffix: Option<i64>,
    /// Direction (1 or 2).
    #[serde(default, rename = "sl")]
    pub direction: Option<i64>,
    /// Main terminal name.
    #[serde(default, rename = "tp", deserialize_with = "lenient_string")]
    pub main_terminal: Option<String>,
    /// Secondary terminal name.
    #[serde(default, rename = "ts", deserialize_with = "lenient_string")]
    pub secondary_terminal: Option<String>,
}

/// `GET /Parada/BuscarParadasPorLinha`: one stop served by a line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    /// Stop code.
    #[serde(default, rename = "cp")]
    pub code: Option<i64>,
    /// Stop name.
    #[serde(default, rename = "np", deserialize_with = "lenient_string")]
    pub name: Option<String>,
    /// Latitude.
    #[serde(default, rename = "py")]
    pub latitude: Option<f64>,
    /// Longitude.
    #[serde(default, rename = "px")]
    pub longitude: Option<f64>,
}

/// Accepts a string, number or bool and keeps it as text.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
