//! Warehouse access: read queries and batch load jobs.
//!
//! This module provides:
//! - The [`Warehouse`] protocol the core depends on
//! - Table identifiers, write modes and the read query shape
//! - An in-memory implementation for tests and dry runs
//! - A BigQuery REST implementation (feature `bigquery`)

#[cfg(feature = "bigquery")]
mod bigquery;
#[cfg(feature = "bigquery")]
mod credentials;
mod memory;
mod table;

#[cfg(feature = "bigquery")]
pub use bigquery::BigQueryWarehouse;
#[cfg(feature = "bigquery")]
pub use credentials::{AccessToken, ServiceAccount, StaticToken, TokenCache, TokenSource};
pub use memory::{InMemoryWarehouse, LoadRecord};
pub use table::{ReadQuery, TableRef, WriteMode};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::errors::{LoadError, QueryError};

/// One result row, keyed by column name.
pub type QueryRow = Map<String, Value>;

/// A staged batch ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJob {
    /// Target table.
    pub table: TableRef,
    /// Append or truncate.
    pub mode: WriteMode,
    /// Newline-delimited JSON file holding the rows.
    pub source: PathBuf,
    /// Content-derived job identifier.
    pub job_id: String,
    /// Number of rows in the file.
    pub rows: usize,
}

/// Protocol for the data warehouse.
///
/// Both calls block until the warehouse has a final answer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Runs a read query and returns its rows.
    async fn query(&self, query: &ReadQuery) -> Result<Vec<QueryRow>, QueryError>;

    /// Submits a load job and waits for it. Returns the accepted row count.
    ///
    /// A truncate job replaces the target in a single commit: readers see
    /// either the previous contents or the new rows.
    async fn load(&self, job: &LoadJob) -> Result<u64, LoadError>;
}
