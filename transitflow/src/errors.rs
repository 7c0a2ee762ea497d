//! Error types for transitflow.
//!
//! Every failure that can happen inside a cycle has its own type so the
//! cycle boundary can log it precisely. Only [`ConfigError`] is fatal; all
//! other errors end the current cycle and the loop keeps running.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for transitflow operations.
#[derive(Debug, Error)]
pub enum TransitflowError {
    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Authentication against the upstream API failed.
    #[error("{0}")]
    Auth(#[from] AuthError),

    /// An upstream API call failed.
    #[error("{0}")]
    Api(#[from] ApiError),

    /// A warehouse load job failed.
    #[error("{0}")]
    Load(#[from] LoadError),

    /// A warehouse read query failed.
    #[error("{0}")]
    Query(#[from] QueryError),

    /// A cycle failed.
    #[error("{0}")]
    Cycle(#[from] CycleError),

    /// The GTFS feed could not be ingested.
    #[error("{0}")]
    Gtfs(#[from] GtfsError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A network-level failure talking to a remote service.
#[derive(Debug, Clone, Error)]
#[error("Transport error for {url}: {message}")]
pub struct TransportError {
    /// The URL that was being requested.
    pub url: String,
    /// Description of the failure.
    pub message: String,
    /// Whether the failure was a timeout.
    pub timed_out: bool,
}

impl TransportError {
    /// Creates a new transport error.
    #[must_use]
    pub fn new(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            message: message.into(),
            timed_out: false,
        }
    }

    /// Creates a transport error from a reqwest failure.
    #[must_use]
    pub fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        Self {
            url: url.to_string(),
            message: err.to_string(),
            timed_out: err.is_timeout(),
        }
    }
}

/// Authentication against the upstream API failed.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The login endpoint answered with something other than `true`.
    #[error("Authentication rejected: {body}")]
    Rejected {
        /// Raw response body.
        body: String,
    },

    /// The login call never got an answer.
    #[error("Authentication failed: {0}")]
    Transport(#[from] TransportError),
}

impl AuthError {
    /// Creates a rejected authentication error.
    #[must_use]
    pub fn rejected(body: impl Into<String>) -> Self {
        Self::Rejected { body: body.into() }
    }
}

/// An authenticated upstream API call failed.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Re-authentication during the call failed.
    #[error("{0}")]
    Auth(#[from] AuthError),

    /// The call was still refused after one re-authentication and retry.
    #[error("Unauthorized on {path} after re-authentication (status {status})")]
    Unauthorized {
        /// Request path.
        path: String,
        /// Last status code (401 or 403).
        status: u16,
    },

    /// Any other non-200 answer.
    #[error("Server error on {path}: {status} - {body}")]
    Server {
        /// Request path.
        path: String,
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Network failure.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// The 200 body did not have the expected shape.
    #[error("Could not decode response from {path}: {message}")]
    Decode {
        /// Request path.
        path: String,
        /// Decoder message.
        message: String,
    },
}

impl ApiError {
    /// Creates a server error.
    #[must_use]
    pub fn server(path: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Server {
            path: path.into(),
            status,
            body: body.into(),
        }
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error means the session could not be recovered.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Unauthorized { .. })
    }
}

/// A warehouse load job failed. The target table keeps its prior state.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The batch could not be written to the staging file.
    #[error("Could not stage {rows} rows for {table}: {message}")]
    Staging {
        /// Target table.
        table: String,
        /// Number of rows in the batch.
        rows: usize,
        /// Description of the failure.
        message: String,
    },

    /// The load job could not be submitted.
    #[error("Load job submission for {table} failed: {message}")]
    Submit {
        /// Target table.
        table: String,
        /// Description of the failure.
        message: String,
    },

    /// The warehouse accepted the job but reported a failure.
    #[error("Load job {job_id} for {table} failed: {message}")]
    Job {
        /// Target table.
        table: String,
        /// Job identifier.
        job_id: String,
        /// Warehouse-reported failure.
        message: String,
    },
}

impl LoadError {
    /// Creates a submission error.
    #[must_use]
    pub fn submit(table: impl Into<String>, message: impl ToString) -> Self {
        Self::Submit {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Creates a job failure error.
    #[must_use]
    pub fn job(table: impl Into<String>, job_id: impl Into<String>, message: impl ToString) -> Self {
        Self::Job {
            table: table.into(),
            job_id: job_id.into(),
            message: message.to_string(),
        }
    }
}

/// A warehouse read query failed.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// The query could not be sent.
    #[error("Query request failed: {0}")]
    Request(String),

    /// The warehouse rejected or failed the query.
    #[error("Query failed: {0}")]
    Failed(String),

    /// The result set could not be decoded.
    #[error("Could not decode query result: {0}")]
    Decode(String),
}

/// Configuration could not be loaded. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Could not read config {}: {source}", path.display())]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The file is not valid configuration JSON.
    #[error("Could not parse config {}: {source}", path.display())]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// A field has an unusable value.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Reading the GTFS feed or its daily marker failed.
#[derive(Debug, Error)]
pub enum GtfsError {
    /// A feed file could not be parsed as CSV.
    #[error("Could not read GTFS file {}: {source}", path.display())]
    Csv {
        /// Feed file.
        path: PathBuf,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// The marker file could not be written.
    #[error("Could not write GTFS marker {}: {source}", path.display())]
    Marker {
        /// Marker path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
}

/// A failure that ended a cycle early.
#[derive(Debug, Clone, Error)]
pub enum CycleError {
    /// The cycle could not authenticate.
    #[error("{0}")]
    Auth(#[from] AuthError),

    /// Fetching from the upstream API failed.
    #[error("{0}")]
    Api(#[from] ApiError),

    /// The load job failed.
    #[error("{0}")]
    Load(#[from] LoadError),
}

impl CycleError {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) | Self::Api(ApiError::Auth(_)) => "auth",
            Self::Api(ApiError::Unauthorized { .. }) => "unauthorized",
            Self::Api(ApiError::Server { .. } | ApiError::Decode { .. }) => "server",
            Self::Api(ApiError::Transport(_)) => "transport",
            Self::Load(_) => "load",
        }
    }
}

/// Result alias for transitflow operations.
pub type Result<T> = std::result::Result<T, TransitflowError>;
