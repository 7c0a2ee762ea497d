//! Polling pipelines and the loop that drives them.
//!
//! This module provides:
//! - The [`Pipeline`] protocol, cycle states and outcomes
//! - The [`Scheduler`] with fixed-rate and fixed-delay pacing
//! - The positions, lines and stops pipelines

mod lines;
mod positions;
mod scheduler;
mod stops;

#[cfg(test)]
mod integration_tests;

pub use lines::LinesPipeline;
pub use positions::PositionsPipeline;
pub use scheduler::{
    CycleContext, CycleOutcome, CycleReport, CycleState, CycleStatus, Pacing, Pipeline, Scheduler,
};
pub use stops::StopsPipeline;
