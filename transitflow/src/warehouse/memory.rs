//! Process-local warehouse.
//!
//! Tables are immutable snapshots behind a lock. A load builds the next
//! snapshot off to the side and swaps it in, so a truncate is atomic for
//! any concurrent reader.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::{LoadJob, QueryRow, ReadQuery, TableRef, Warehouse, WriteMode};
use crate::errors::{LoadError, QueryError};
use crate::utils::{parse_timestamp, Clock, SystemClock};

/// A completed load, kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRecord {
    /// Target table.
    pub table: TableRef,
    /// Write mode.
    pub mode: WriteMode,
    /// Job identifier.
    pub job_id: String,
    /// Rows accepted.
    pub rows: u64,
}

/// In-memory [`Warehouse`] with the same load and query semantics as the
/// real one.
#[derive(Debug)]
pub struct InMemoryWarehouse {
    tables: RwLock<HashMap<TableRef, Arc<Vec<QueryRow>>>>,
    history: RwLock<Vec<LoadRecord>>,
    clock: Arc<dyn Clock>,
    queries: AtomicUsize,
    fail_loads: AtomicBool,
    fail_queries: AtomicBool,
}

impl Default for InMemoryWarehouse {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWarehouse {
    /// Creates an empty warehouse using the system clock for "today".
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty warehouse with an explicit clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
            clock,
            queries: AtomicUsize::new(0),
            fail_loads: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
        }
    }

    /// Appends rows directly, bypassing load jobs.
    pub fn insert(&self, table: &TableRef, rows: impl IntoIterator<Item = QueryRow>) {
        let mut tables = self.tables.write();
        let mut next: Vec<QueryRow> = tables
            .get(table)
            .map(|current| current.as_ref().clone())
            .unwrap_or_default();
        next.extend(rows);
        tables.insert(table.clone(), Arc::new(next));
    }

    /// Current snapshot of a table. Empty if it does not exist.
    #[must_use]
    pub fn rows(&self, table: &TableRef) -> Arc<Vec<QueryRow>> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// Completed loads, oldest first.
    #[must_use]
    pub fn loads(&self) -> Vec<LoadRecord> {
        self.history.read().clone()
    }

    /// Number of completed loads.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.history.read().len()
    }

    /// Number of queries received.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Makes every subsequent load fail.
    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent query fail.
    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    fn read_source(job: &LoadJob) -> Result<Vec<QueryRow>, LoadError> {
        let table = job.table.to_string();
        let file = std::fs::File::open(&job.source)
            .map_err(|e| LoadError::job(&table, &job.job_id, e))?;

        let mut rows = Vec::with_capacity(job.rows);
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| LoadError::job(&table, &job.job_id, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&line) {
                Ok(Value::Object(row)) => rows.push(row),
                Ok(other) => {
                    return Err(LoadError::job(
                        &table,
                        &job.job_id,
                        format!("expected a JSON object per line, got {other}"),
                    ))
                }
                Err(e) => return Err(LoadError::job(&table, &job.job_id, e)),
            }
        }
        Ok(rows)
    }

    fn fetched_today(&self, row: &QueryRow) -> bool {
        let today = self.clock.now().date_naive();
        row.get("fetch_time")
            .and_then(Value::as_str)
            .and_then(|s| parse_timestamp(s).ok())
            .is_some_and(|ts| ts.date_naive() == today)
    }
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    async fn query(&self, query: &ReadQuery) -> Result<Vec<QueryRow>, QueryError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(QueryError::Failed(format!("{} is unavailable", query.table)));
        }

        let snapshot = self.rows(&query.table);
        let mut seen = HashSet::new();
        let mut result = Vec::new();

        for row in snapshot.iter() {
            if row.get(&query.non_null).map_or(true, Value::is_null) {
                continue;
            }
            if query.today_only && !self.fetched_today(row) {
                continue;
            }
            let projected: QueryRow = query
                .columns
                .iter()
                .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                .collect();
            if seen.insert(Value::Object(projected.clone()).to_string()) {
                result.push(projected);
            }
        }

        debug!(sql = %query.to_sql(), rows = result.len(), "In-memory query");
        Ok(result)
    }

    async fn load(&self, job: &LoadJob) -> Result<u64, LoadError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(LoadError::submit(job.table.to_string(), "warehouse unavailable"));
        }

        if let Some(previous) = self.history.read().iter().find(|r| r.job_id == job.job_id) {
            debug!(job_id = %job.job_id, "Load job already completed");
            return Ok(previous.rows);
        }

        let incoming = Self::read_source(job)?;
        let accepted = incoming.len() as u64;

        {
            let mut tables = self.tables.write();
            let next = match job.mode {
                WriteMode::Truncate => incoming,
                WriteMode::Append => {
                    let mut rows: Vec<QueryRow> = tables
                        .get(&job.table)
                        .map(|current| current.as_ref().clone())
                        .unwrap_or_default();
                    rows.extend(incoming);
                    rows
                }
            };
            tables.insert(job.table.clone(), Arc::new(next));
        }

        self.history.write().push(LoadRecord {
            table: job.table.clone(),
            mode: job.mode,
            job_id: job.job_id.clone(),
            rows: accepted,
        });
        Ok(accepted)
    }
}
