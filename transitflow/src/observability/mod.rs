//! Observability utilities.

mod cycle_events;
mod logging;

pub use cycle_events::CycleEventEmitter;
pub use logging::{init_logging, parse_filter};
