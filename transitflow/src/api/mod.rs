//! Upstream transit API access.
//!
//! This module provides:
//! - The [`Transport`] seam and its reqwest implementation
//! - The [`SessionClient`] that keeps a pipeline logged in
//! - Typed response shapes for the endpoints the pipelines use

mod client;
mod models;
mod transport;

pub use client::{
    SessionClient, LINE_SEARCH_PATH, LOGIN_PATH, POSITIONS_PATH, STOPS_BY_LINE_PATH,
};
pub use models::{LinePositions, LineVariant, PositionSnapshot, Stop, VehiclePosition};
pub use transport::{HttpResponse, HttpTransport, Transport};
