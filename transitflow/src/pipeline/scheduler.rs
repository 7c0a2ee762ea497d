//! Per-pipeline control loop.
//!
//! One cycle runs, its outcome is logged at a single boundary, then the loop
//! sleeps according to the pipeline's pacing. The sleep races the shutdown
//! token; a running cycle is never interrupted.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::cancellation::CancellationToken;
use crate::errors::CycleError;
use crate::observability::CycleEventEmitter;
use crate::utils::generate_cycle_id;

/// How long to sleep after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Cycle starts are at least this far apart; overruns start the next
    /// cycle immediately.
    FixedRate(Duration),
    /// Sleep this long after every cycle, whatever it took.
    FixedDelay(Duration),
}

impl Pacing {
    /// Sleep owed after a cycle that took `elapsed`.
    #[must_use]
    pub fn sleep_after(&self, elapsed: Duration) -> Duration {
        match self {
            Self::FixedRate(interval) => interval.saturating_sub(elapsed),
            Self::FixedDelay(delay) => *delay,
        }
    }
}

/// Where a cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    /// Waiting to start.
    Idle,
    /// Logging in to the upstream API.
    Authenticating,
    /// Reading keys or calling the upstream API.
    Fetching,
    /// Turning responses into rows.
    Mapping,
    /// Submitting the load job.
    Loading,
    /// Pacing sleep.
    Sleeping,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Authenticating => "authenticating",
            Self::Fetching => "fetching",
            Self::Mapping => "mapping",
            Self::Loading => "loading",
            Self::Sleeping => "sleeping",
        };
        f.write_str(s)
    }
}

/// Per-cycle bookkeeping handed to [`Pipeline::run_cycle`].
#[derive(Debug, Clone)]
pub struct CycleContext {
    cycle_id: Uuid,
    state: CycleState,
    transitions: Vec<CycleState>,
}

impl Default for CycleContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleContext {
    /// Starts a new cycle in [`CycleState::Idle`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            cycle_id: generate_cycle_id(),
            state: CycleState::Idle,
            transitions: Vec::new(),
        }
    }

    /// Unique id of this cycle.
    #[must_use]
    pub fn cycle_id(&self) -> Uuid {
        self.cycle_id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CycleState {
        self.state
    }

    /// States entered so far, in order.
    #[must_use]
    pub fn transitions(&self) -> &[CycleState] {
        &self.transitions
    }

    /// Moves to `state`.
    pub fn enter(&mut self, state: CycleState) {
        debug!(from = %self.state, to = %state, "Cycle state");
        self.state = state;
        self.transitions.push(state);
    }
}

/// What a finished cycle reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Rows produced by mapping.
    pub rows: usize,
    /// Rows accepted by the warehouse.
    pub loaded: u64,
    /// Set when the cycle had nothing to do.
    pub skipped: Option<String>,
}

impl CycleReport {
    /// A cycle that mapped and loaded rows.
    #[must_use]
    pub fn loaded(rows: usize, loaded: u64) -> Self {
        Self {
            rows,
            loaded,
            skipped: None,
        }
    }

    /// A cycle that ended early with nothing to load.
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            rows: 0,
            loaded: 0,
            skipped: Some(reason.into()),
        }
    }
}

/// Final status of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Rows were loaded (possibly zero).
    Loaded,
    /// Nothing to do this time.
    Skipped,
    /// An error ended the cycle.
    Failed,
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Loaded => "loaded",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Summary of one cycle, used for logging and pacing.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    /// Pipeline name.
    pub pipeline: String,
    /// Cycle id.
    pub cycle_id: Uuid,
    /// Final status.
    pub status: CycleStatus,
    /// Rows mapped.
    pub rows: usize,
    /// Rows loaded.
    pub loaded: u64,
    /// Wall-clock duration of the cycle.
    pub elapsed: Duration,
    /// States the cycle went through.
    pub transitions: Vec<CycleState>,
    /// Skip reason or error message.
    pub detail: Option<String>,
    /// Error label, see [`CycleError::kind`].
    pub error_kind: Option<&'static str>,
}

/// One independently scheduled polling job.
#[async_trait]
pub trait Pipeline: Send {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Sleep policy between cycles.
    fn pacing(&self) -> Pacing;

    /// Runs one cycle.
    async fn run_cycle(&mut self, ctx: &mut CycleContext) -> Result<CycleReport, CycleError>;

    /// Called after a failed cycle, before the pacing sleep.
    async fn recover(&mut self, _error: &CycleError) {}
}

/// Drives a [`Pipeline`] until shutdown.
pub struct Scheduler<P> {
    pipeline: P,
    shutdown: Arc<CancellationToken>,
    events: CycleEventEmitter,
}

impl<P: Pipeline> Scheduler<P> {
    /// Creates a scheduler for `pipeline`.
    #[must_use]
    pub fn new(pipeline: P, shutdown: Arc<CancellationToken>) -> Self {
        Self {
            pipeline,
            shutdown,
            events: CycleEventEmitter::new(),
        }
    }

    /// Returns the pipeline.
    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    /// Runs a single cycle and returns its outcome. Never fails.
    ///
    /// Every cycle, failed or not, ends by handing over to the pacing sleep,
    /// so the recorded transitions always finish with
    /// [`CycleState::Sleeping`].
    pub async fn run_once(&mut self) -> CycleOutcome {
        let mut ctx = CycleContext::new();
        let name = self.pipeline.name().to_string();
        let span = info_span!("cycle", pipeline = %name, cycle_id = %ctx.cycle_id());
        let started = Instant::now();

        let result = self.pipeline.run_cycle(&mut ctx).instrument(span.clone()).await;
        if let Err(error) = &result {
            self.pipeline.recover(error).instrument(span.clone()).await;
        }
        let elapsed = started.elapsed();
        span.in_scope(|| ctx.enter(CycleState::Sleeping));

        let outcome = match result {
            Ok(report) => CycleOutcome {
                pipeline: name,
                cycle_id: ctx.cycle_id(),
                status: if report.skipped.is_some() {
                    CycleStatus::Skipped
                } else {
                    CycleStatus::Loaded
                },
                rows: report.rows,
                loaded: report.loaded,
                elapsed,
                transitions: ctx.transitions().to_vec(),
                detail: report.skipped,
                error_kind: None,
            },
            Err(error) => CycleOutcome {
                pipeline: name,
                cycle_id: ctx.cycle_id(),
                status: CycleStatus::Failed,
                rows: 0,
                loaded: 0,
                elapsed,
                transitions: ctx.transitions().to_vec(),
                detail: Some(error.to_string()),
                error_kind: Some(error.kind()),
            },
        };

        span.in_scope(|| self.events.emit(&outcome));
        outcome
    }

    /// Runs cycles until the shutdown token fires. Returns the cycle count.
    pub async fn run(mut self) -> u64 {
        let pacing = self.pipeline.pacing();
        info!(pipeline = %self.pipeline.name(), ?pacing, "Pipeline started");
        let mut cycles = 0u64;

        while !self.shutdown.is_cancelled() {
            let outcome = self.run_once().await;
            cycles += 1;

            if self.shutdown.is_cancelled() {
                break;
            }

            let pause = pacing.sleep_after(outcome.elapsed);
            debug!(
                pipeline = %outcome.pipeline,
                sleep_ms = pause.as_millis() as u64,
                "Waiting for next cycle"
            );
            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                () = self.shutdown.cancelled() => break,
            }
        }

        info!(
            pipeline = %self.pipeline.name(),
            cycles,
            reason = self.shutdown.reason().as_deref().unwrap_or("unknown"),
            "Pipeline stopped"
        );
        cycles
    }
}
