//! # Transitflow
//!
//! Polls the São Paulo transit authority's real-time API and bulk-loads the
//! results into a data warehouse.
//!
//! Three independently scheduled pipelines share nothing but the warehouse:
//!
//! - **positions**: every vehicle's live position, appended once a minute
//! - **lines**: variants of every line seen today, replaced once a minute
//! - **stops**: stops of every line variant seen today, replaced daily
//!
//! Each cycle authenticates if needed, fetches, maps the nested responses
//! into flat rows and submits them as one batch load job. A failed cycle is
//! logged and the loop carries on.
//!
//! Before the pipelines start, the static GTFS feed is loaded at most once
//! per day (see [`gtfs`]).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use transitflow::prelude::*;
//!
//! let warehouse = Arc::new(InMemoryWarehouse::new());
//! let client = SessionClient::connect(&config.sptrans, config.proxy.as_ref())?;
//! let pipeline = PositionsPipeline::new(client, BulkLoader::new(warehouse), table);
//!
//! Scheduler::new(pipeline, shutdown).run().await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod api;
pub mod cancellation;
pub mod config;
pub mod errors;
pub mod gtfs;
pub mod loader;
pub mod mapping;
pub mod observability;
pub mod pipeline;
pub mod query;
pub mod testing;
pub mod utils;
pub mod warehouse;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::api::{HttpTransport, SessionClient, Transport};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::AppConfig;
    pub use crate::errors::{
        ApiError, AuthError, ConfigError, CycleError, GtfsError, LoadError, QueryError,
        TransitflowError,
    };
    pub use crate::gtfs::{DailyMarker, GtfsIngest};
    pub use crate::loader::BulkLoader;
    pub use crate::mapping::{map_line_variants, map_positions, map_stops};
    pub use crate::pipeline::{
        CycleOutcome, CycleStatus, LinesPipeline, Pacing, Pipeline, PositionsPipeline, Scheduler,
        StopsPipeline,
    };
    pub use crate::utils::{Clock, SystemClock, Timestamp};
    pub use crate::warehouse::{InMemoryWarehouse, TableRef, Warehouse, WriteMode};
}
