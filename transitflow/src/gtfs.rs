//! Once-a-day load of the static GTFS feed.
//!
//! Each feed file replaces its `gtfs_*` table in truncate mode, every row
//! stamped with the `load_date` of the ingest. A marker file holding the
//! date of the last completed ingest keeps restarts on the same day from
//! loading the feed again.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::errors::{GtfsError, Result};
use crate::loader::BulkLoader;
use crate::utils::{Clock, SystemClock};
use crate::warehouse::{QueryRow, TableRef, WriteMode};

/// Feed files and the tables they replace.
pub const FEED_FILES: [(&str, &str); 10] = [
    ("agency.txt", "gtfs_agency"),
    ("calendar.txt", "gtfs_calendar"),
    ("fare_attributes.txt", "gtfs_fare_attributes"),
    ("fare_rules.txt", "gtfs_fare_rules"),
    ("frequencies.txt", "gtfs_frequencies"),
    ("routes.txt", "gtfs_routes"),
    ("shapes.txt", "gtfs_shapes"),
    ("trips.txt", "gtfs_trips"),
    ("stops.txt", "gtfs_stops"),
    ("stop_times.txt", "gtfs_stop_times"),
];

/// A file holding the date of the last completed ingest.
#[derive(Debug, Clone)]
pub struct DailyMarker {
    path: PathBuf,
}

impl DailyMarker {
    /// Uses the marker at `path`; the file need not exist yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Whether the ingest already completed on `day`.
    ///
    /// A missing or unreadable marker counts as not done.
    #[must_use]
    pub fn done_on(&self, day: NaiveDate) -> bool {
        std::fs::read_to_string(&self.path)
            .is_ok_and(|contents| contents.trim() == day.to_string())
    }

    /// Records `day` as done.
    pub fn mark(&self, day: NaiveDate) -> std::result::Result<(), GtfsError> {
        std::fs::write(&self.path, day.to_string()).map_err(|source| GtfsError::Marker {
            path: self.path.clone(),
            source,
        })
    }
}

/// What one ingest did, per feed file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GtfsReport {
    /// Files loaded and the rows accepted for each.
    pub loaded: Vec<(String, u64)>,
    /// Files not present in the feed directory.
    pub missing: Vec<String>,
    /// Files that could not be read or loaded.
    pub failed: Vec<String>,
}

/// Loads the feed directory into the warehouse.
pub struct GtfsIngest {
    loader: BulkLoader,
    directory: PathBuf,
    project: String,
    dataset: String,
    clock: Arc<dyn Clock>,
}

impl GtfsIngest {
    /// Creates an ingest of `directory` into `project.dataset`.
    #[must_use]
    pub fn new(
        loader: BulkLoader,
        directory: impl Into<PathBuf>,
        project: impl Into<String>,
        dataset: impl Into<String>,
    ) -> Self {
        Self {
            loader,
            directory: directory.into(),
            project: project.into(),
            dataset: dataset.into(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the clock that decides `load_date` and "today".
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Ingests the feed unless `marker` says it already ran today.
    ///
    /// Returns `None` when skipped. The marker is only written when no file
    /// failed, so a partial ingest is retried on the next start.
    pub async fn run_if_due(&self, marker: &DailyMarker) -> Result<Option<GtfsReport>> {
        let today = self.clock.now().date_naive();
        if marker.done_on(today) {
            info!(%today, "GTFS feed already ingested today, skipping");
            return Ok(None);
        }

        let report = self.run(today).await;
        if report.failed.is_empty() {
            marker.mark(today)?;
            info!(%today, "GTFS ingest marked as done");
        } else {
            warn!(failed = ?report.failed, "GTFS ingest incomplete, will retry on next start");
        }
        Ok(Some(report))
    }

    /// Loads every feed file present, stamping rows with `load_date`.
    pub async fn run(&self, load_date: NaiveDate) -> GtfsReport {
        info!(directory = %self.directory.display(), "Loading GTFS feed");
        let mut report = GtfsReport::default();

        for (file, table) in FEED_FILES {
            let path = self.directory.join(file);
            if !path.is_file() {
                warn!(path = %path.display(), "GTFS file not found, skipping");
                report.missing.push(file.to_string());
                continue;
            }

            match self.load_file(&path, table, load_date).await {
                Ok(rows) => report.loaded.push((file.to_string(), rows)),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "GTFS file not loaded");
                    report.failed.push(file.to_string());
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            missing = report.missing.len(),
            failed = report.failed.len(),
            "GTFS ingest finished"
        );
        report
    }

    async fn load_file(&self, path: &Path, table: &str, load_date: NaiveDate) -> Result<u64> {
        let rows = read_feed_file(path, load_date)?;
        let table = TableRef::new(&self.project, &self.dataset, table);
        Ok(self.loader.load(&table, &rows, WriteMode::Truncate).await?)
    }
}

/// Reads a feed file into rows keyed by its header.
///
/// Every value stays a string, as the feed defines them; empty fields
/// become null.
pub fn read_feed_file(path: &Path, load_date: NaiveDate) -> std::result::Result<Vec<QueryRow>, GtfsError> {
    let csv_error = |source| GtfsError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_path(path)
        .map_err(csv_error)?;
    let headers = reader.headers().map_err(csv_error)?.clone();
    let load_date = Value::String(load_date.to_string());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        let mut row = Map::with_capacity(headers.len() + 1);
        for (column, field) in headers.iter().zip(record.iter()) {
            let value = if field.is_empty() {
                Value::Null
            } else {
                Value::String(field.to_string())
            };
            row.insert(column.to_string(), value);
        }
        row.insert("load_date".to_string(), load_date.clone());
        rows.push(row);
    }
    Ok(rows)
}
