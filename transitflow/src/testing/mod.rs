//! Testing utilities for transitflow pipelines.
//!
//! This module provides:
//! - A scripted upstream transport
//! - Sample API payloads and fixed clocks
//! - A scripted local HTTP server (tests only)
//!
//! The in-memory warehouse lives in [`crate::warehouse`] since the binary
//! also uses it for dry runs.

pub mod fixtures;
mod mocks;
#[cfg(test)]
pub(crate) mod stub_server;

pub use mocks::{MockTransport, RecordedCall};
