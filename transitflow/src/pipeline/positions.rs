//! Vehicle positions: fetch the live snapshot and append it.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::scheduler::{CycleContext, CycleReport, CycleState, Pacing, Pipeline};
use crate::api::{HttpTransport, SessionClient, Transport};
use crate::errors::CycleError;
use crate::loader::BulkLoader;
use crate::mapping::map_positions;
use crate::utils::{Clock, SystemClock};
use crate::warehouse::{TableRef, WriteMode};

/// Appends one row per vehicle every cycle.
///
/// The session is reused across cycles and only re-established when it was
/// never opened or after a failed cycle.
pub struct PositionsPipeline<T = HttpTransport> {
    client: SessionClient<T>,
    loader: BulkLoader,
    table: TableRef,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl<T: Transport> PositionsPipeline<T> {
    /// Creates the pipeline with a 60 second fixed-rate interval.
    #[must_use]
    pub fn new(client: SessionClient<T>, loader: BulkLoader, table: TableRef) -> Self {
        Self {
            client,
            loader,
            table,
            clock: Arc::new(SystemClock),
            interval: Duration::from_secs(60),
        }
    }

    /// Sets the target interval between cycle starts.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the clock used to stamp rows.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the session client.
    pub fn client(&self) -> &SessionClient<T> {
        &self.client
    }
}

#[async_trait]
impl<T: Transport> Pipeline for PositionsPipeline<T> {
    fn name(&self) -> &str {
        "positions"
    }

    fn pacing(&self) -> Pacing {
        Pacing::FixedRate(self.interval)
    }

    async fn run_cycle(&mut self, ctx: &mut CycleContext) -> Result<CycleReport, CycleError> {
        if !self.client.is_authenticated() {
            ctx.enter(CycleState::Authenticating);
            self.client.authenticate().await?;
        }

        ctx.enter(CycleState::Fetching);
        let Some(snapshot) = self.client.positions().await? else {
            info!("Positions endpoint returned no data");
            return Ok(CycleReport::skipped("empty positions payload"));
        };

        ctx.enter(CycleState::Mapping);
        let rows = map_positions(&snapshot, self.clock.as_ref());
        info!(
            lines = snapshot.lines.len(),
            rows = rows.len(),
            hr = snapshot.server_time.as_deref().unwrap_or(""),
            "Mapped positions"
        );

        ctx.enter(CycleState::Loading);
        let loaded = self.loader.load(&self.table, &rows, WriteMode::Append).await?;
        Ok(CycleReport::loaded(rows.len(), loaded))
    }

    async fn recover(&mut self, error: &CycleError) {
        warn!(error = %error, "Positions cycle failed, re-authenticating");
        self.client.invalidate();
        match self.client.authenticate().await {
            Ok(()) => info!("Session re-established"),
            Err(e) => warn!(error = %e, "Re-authentication failed, will retry next cycle"),
        }
    }
}
