//! Stop enrichment: list the stops of every line variant seen today and
//! replace the stops table with them.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::scheduler::{CycleContext, CycleReport, CycleState, Pacing, Pipeline};
use crate::api::{HttpTransport, SessionClient, Stop, Transport};
use crate::errors::CycleError;
use crate::loader::BulkLoader;
use crate::mapping::{map_stops, StopRow};
use crate::query::distinct_line_variants;
use crate::utils::{Clock, SystemClock};
use crate::warehouse::{TableRef, WriteMode};

/// Rebuilds the stops table from today's line variants, once a day.
pub struct StopsPipeline<T = HttpTransport> {
    client: SessionClient<T>,
    loader: BulkLoader,
    lines_table: TableRef,
    stops_table: TableRef,
    clock: Arc<dyn Clock>,
    delay: Duration,
    courtesy_delay: Duration,
}

impl<T: Transport> StopsPipeline<T> {
    /// Creates the pipeline with a 24 hour delay after each cycle.
    #[must_use]
    pub fn new(
        client: SessionClient<T>,
        loader: BulkLoader,
        lines_table: TableRef,
        stops_table: TableRef,
    ) -> Self {
        Self {
            client,
            loader,
            lines_table,
            stops_table,
            clock: Arc::new(SystemClock),
            delay: Duration::from_secs(86_400),
            courtesy_delay: Duration::from_millis(300),
        }
    }

    /// Sets the sleep after every cycle.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the pause between successive lookups.
    #[must_use]
    pub fn with_courtesy_delay(mut self, delay: Duration) -> Self {
        self.courtesy_delay = delay;
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
impl<T: Transport> Pipeline for StopsPipeline<T> {
    fn name(&self) -> &str {
        "stops"
    }

    fn pacing(&self) -> Pacing {
        Pacing::FixedDelay(self.delay)
    }

    async fn run_cycle(&mut self, ctx: &mut CycleContext) -> Result<CycleReport, CycleError> {
        ctx.enter(CycleState::Authenticating);
        self.client.authenticate().await?;

        ctx.enter(CycleState::Fetching);
        let variants = distinct_line_variants(self.loader.warehouse(), &self.lines_table).await;
        if variants.is_empty() {
            info!(table = %self.lines_table, "No line variants seen today");
            return Ok(CycleReport::skipped("no line variants seen today"));
        }
        info!(keys = variants.len(), "Listing stops per line variant");

        let mut found: Vec<(&str, i64, Vec<Stop>)> = Vec::with_capacity(variants.len());
        for (i, (code, internal)) in variants.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.courtesy_delay).await;
            }
            match self.client.stops_by_line(*internal).await {
                Ok(stops) => found.push((code.as_str(), *internal, stops)),
                Err(e) if e.is_auth_failure() => return Err(e.into()),
                Err(e) => {
                    warn!(line_c = %code, cl = *internal, error = %e, "Stop lookup failed, skipping");
                }
            }
        }

        ctx.enter(CycleState::Mapping);
        let rows: Vec<StopRow> = found
            .iter()
            .flat_map(|(code, internal, stops)| {
                map_stops(code, *internal, stops, self.clock.as_ref())
            })
            .collect();

        ctx.enter(CycleState::Loading);
        let loaded = self
            .loader
            .load(&self.stops_table, &rows, WriteMode::Truncate)
            .await?;
        Ok(CycleReport::loaded(rows.len(), loaded))
    }
}
