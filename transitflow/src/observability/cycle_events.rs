//! Wide event emitted once per cycle.

use serde_json::{json, Value};
use tracing::{error, info};

use crate::pipeline::{CycleOutcome, CycleStatus};

/// Emits one summarizing event per finished cycle.
///
/// The payload carries everything needed to reconstruct the cycle from a
/// single log line, so persistent failures show up as identical events.
#[derive(Debug, Clone)]
pub struct CycleEventEmitter {
    /// Event type recorded in the payload.
    pub event_type: String,
}

impl Default for CycleEventEmitter {
    fn default() -> Self {
        Self {
            event_type: "cycle.wide".to_string(),
        }
    }
}

impl CycleEventEmitter {
    /// Creates a new emitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the payload for a cycle outcome.
    #[must_use]
    pub fn build_cycle_payload(&self, outcome: &CycleOutcome) -> Value {
        let mut payload = json!({
            "event": self.event_type,
            "pipeline": outcome.pipeline,
            "cycle_id": outcome.cycle_id.to_string(),
            "status": outcome.status,
            "rows": outcome.rows,
            "loaded": outcome.loaded,
            "elapsed_ms": outcome.elapsed.as_secs_f64() * 1000.0,
            "states": outcome.transitions,
        });

        if let Some(detail) = &outcome.detail {
            payload["detail"] = json!(detail);
        }
        if let Some(kind) = outcome.error_kind {
            payload["error_kind"] = json!(kind);
        }

        payload
    }

    /// Logs the outcome: `error` for failed cycles, `info` otherwise.
    pub fn emit(&self, outcome: &CycleOutcome) {
        let payload = self.build_cycle_payload(outcome);
        let elapsed_ms = outcome.elapsed.as_millis() as u64;

        match outcome.status {
            CycleStatus::Failed => error!(
                pipeline = %outcome.pipeline,
                cycle_id = %outcome.cycle_id,
                error_kind = outcome.error_kind.unwrap_or("unknown"),
                elapsed_ms,
                event = %payload,
                "Cycle failed: {}",
                outcome.detail.as_deref().unwrap_or("")
            ),
            CycleStatus::Skipped => info!(
                pipeline = %outcome.pipeline,
                cycle_id = %outcome.cycle_id,
                elapsed_ms,
                event = %payload,
                "Cycle skipped: {}",
                outcome.detail.as_deref().unwrap_or("")
            ),
            CycleStatus::Loaded => info!(
                pipeline = %outcome.pipeline,
                cycle_id = %outcome.cycle_id,
                rows = outcome.rows,
                loaded = outcome.loaded,
                elapsed_ms,
                event = %payload,
                "Cycle completed"
            ),
        }
    }
}
