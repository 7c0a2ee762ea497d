//! Line enrichment: look up every line code seen today and replace the
//! lines table with the variants found.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::scheduler::{CycleContext, CycleReport, CycleState, Pacing, Pipeline};
use crate::api::{HttpTransport, LineVariant, SessionClient, Transport};
use crate::errors::CycleError;
use crate::loader::BulkLoader;
use crate::mapping::{map_line_variants, LineRow};
use crate::query::distinct_line_codes;
use crate::utils::{Clock, SystemClock};
use crate::warehouse::{TableRef, WriteMode};

/// Rebuilds the lines table from today's positions.
pub struct LinesPipeline<T = HttpTransport> {
    client: SessionClient<T>,
    loader: BulkLoader,
    positions_table: TableRef,
    lines_table: TableRef,
    clock: Arc<dyn Clock>,
    interval: Duration,
    courtesy_delay: Duration,
}

impl<T: Transport> LinesPipeline<T> {
    /// Creates the pipeline with a 60 second interval and 300 ms between
    /// lookups.
    #[must_use]
    pub fn new(
        client: SessionClient<T>,
        loader: BulkLoader,
        positions_table: TableRef,
        lines_table: TableRef,
    ) -> Self {
        Self {
            client,
            loader,
            positions_table,
            lines_table,
            clock: Arc::new(SystemClock),
            interval: Duration::from_secs(60),
            courtesy_delay: Duration::from_millis(300),
        }
    }

    /// Sets the target interval between cycle starts.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
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
impl<T: Transport> Pipeline for LinesPipeline<T> {
    fn name(&self) -> &str {
        "lines"
    }

    fn pacing(&self) -> Pacing {
        Pacing::FixedRate(self.interval)
    }

    async fn run_cycle(&mut self, ctx: &mut CycleContext) -> Result<CycleReport, CycleError> {
        ctx.enter(CycleState::Authenticating);
        self.client.authenticate().await?;

        ctx.enter(CycleState::Fetching);
        let codes = distinct_line_codes(self.loader.warehouse(), &self.positions_table).await;
        if codes.is_empty() {
            info!(table = %self.positions_table, "No line codes seen today");
            return Ok(CycleReport::skipped("no line codes seen today"));
        }
        info!(keys = codes.len(), "Searching line variants");

        let mut found: Vec<(&str, Vec<LineVariant>)> = Vec::with_capacity(codes.len());
        for (i, code) in codes.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.courtesy_delay).await;
            }
            match self.client.search_lines(code).await {
                Ok(variants) => found.push((code.as_str(), variants)),
                Err(e) if e.is_auth_failure() => return Err(e.into()),
                Err(e) => warn!(line_c = %code, error = %e, "Line search failed, skipping"),
            }
        }

        ctx.enter(CycleState::Mapping);
        let rows: Vec<LineRow> = found
            .iter()
            .flat_map(|(code, variants)| map_line_variants(code, variants, self.clock.as_ref()))
            .collect();

        ctx.enter(CycleState::Loading);
        let loaded = self
            .loader
            .load(&self.lines_table, &rows, WriteMode::Truncate)
            .await?;
        Ok(CycleReport::loaded(rows.len(), loaded))
    }
}
