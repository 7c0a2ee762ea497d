//! Configuration loaded once at process start.
//!
//! The file is JSON. A missing or malformed file is fatal: the process
//! aborts before entering any cycle loop.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;

/// Environment variable consulted when `bigquery.access_token` is absent.
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Environment variable consulted when `bigquery.credentials_file` is absent.
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Top-level configuration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Upstream transit API settings.
    pub sptrans: ApiConfig,
    /// Optional outbound proxy.
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    /// Warehouse settings.
    pub bigquery: WarehouseConfig,
    /// Pacing settings.
    #[serde(default)]
    pub pipelines: PipelinesConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Once-a-day GTFS feed ingest.
    #[serde(default)]
    pub gtfs: GtfsConfig,
}

impl AppConfig {
    /// Loads and validates the configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that required fields are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sptrans.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("sptrans.base_url is empty".to_string()));
        }
        if self.sptrans.token.trim().is_empty() {
            return Err(ConfigError::Invalid("sptrans.token is empty".to_string()));
        }
        if self.bigquery.backend == WarehouseBackend::BigQuery {
            if self.bigquery.project_id.trim().is_empty() {
                return Err(ConfigError::Invalid("bigquery.project_id is empty".to_string()));
            }
            if self.bigquery.dataset_id.trim().is_empty() {
                return Err(ConfigError::Invalid("bigquery.dataset_id is empty".to_string()));
            }
        }
        if self.pipelines.positions_interval_seconds == 0
            || self.pipelines.lines_interval_seconds == 0
            || self.pipelines.stops_interval_seconds == 0
        {
            return Err(ConfigError::Invalid(
                "pipeline intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Upstream transit API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL, e.g. `http://api.olhovivo.sptrans.com.br/v2.1`.
    pub base_url: String,
    /// Secret login token.
    pub token: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
}

fn default_timeout() -> f64 {
    15.0
}

impl ApiConfig {
    /// Creates API settings with the default timeout.
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            timeout_seconds: default_timeout(),
        }
    }

    /// Gets timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }
}

/// Outbound proxy settings, keyed by scheme like `requests` proxies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy for plain HTTP requests.
    #[serde(default)]
    pub http: Option<String>,
    /// Proxy for HTTPS requests.
    #[serde(default)]
    pub https: Option<String>,
}

/// Which warehouse implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseBackend {
    /// Google BigQuery over REST.
    #[default]
    #[serde(rename = "bigquery")]
    BigQuery,
    /// Process-local tables, for dry runs.
    Memory,
}

/// Warehouse connection and target tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Backend selector.
    #[serde(default)]
    pub backend: WarehouseBackend,
    /// Cloud project.
    #[serde(default)]
    pub project_id: String,
    /// Dataset holding all tables.
    #[serde(default)]
    pub dataset_id: String,
    /// Positions table.
    #[serde(default = "default_positions_table")]
    pub table_id: String,
    /// Line enrichment table.
    #[serde(default = "default_lines_table")]
    pub lines_table_id: String,
    /// Stop enrichment table.
    #[serde(default = "default_stops_table")]
    pub stops_table_id: String,
    /// Service-account key file; falls back to [`CREDENTIALS_ENV`].
    /// Takes precedence over `access_token`.
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    /// Fixed OAuth access token; falls back to [`ACCESS_TOKEN_ENV`].
    #[serde(default)]
    pub access_token: Option<String>,
    /// Job location.
    #[serde(default = "default_location")]
    pub location: String,
    /// Whether truncate loads target today's partition instead of the table.
    #[serde(default)]
    pub partition_decorator: bool,
    /// How often to poll a running job, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub job_poll_interval_ms: u64,
    /// Give up waiting for a job after this many seconds.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_seconds: u64,
}

fn default_positions_table() -> String {
    "sptrans_posicoes".to_string()
}

fn default_lines_table() -> String {
    "sptrans_linhas".to_string()
}

fn default_stops_table() -> String {
    "sptrans_paradas".to_string()
}

fn default_location() -> String {
    "US".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_job_timeout() -> u64 {
    300
}

impl WarehouseConfig {
    /// Resolves the service-account key file from config or environment.
    #[must_use]
    pub fn resolve_credentials_file(&self) -> Option<PathBuf> {
        self.credentials_file
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .or_else(|| std::env::var_os(CREDENTIALS_ENV).map(PathBuf::from))
    }

    /// Resolves the access token from config or environment.
    #[must_use]
    pub fn resolve_access_token(&self) -> Option<String> {
        self.access_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var(ACCESS_TOKEN_ENV).ok())
    }

    /// Fully-qualified positions table.
    #[must_use]
    pub fn positions_table(&self) -> String {
        self.qualify(&self.table_id)
    }

    /// Fully-qualified lines table.
    #[must_use]
    pub fn lines_table(&self) -> String {
        self.qualify(&self.lines_table_id)
    }

    /// Fully-qualified stops table.
    #[must_use]
    pub fn stops_table(&self) -> String {
        self.qualify(&self.stops_table_id)
    }

    fn qualify(&self, table: &str) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset_id, table)
    }

    /// Gets the job poll interval as Duration.
    #[must_use]
    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_interval_ms)
    }

    /// Gets the job timeout as Duration.
    #[must_use]
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_seconds)
    }
}

/// Pacing for each pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelinesConfig {
    /// Target interval between positions cycle starts.
    #[serde(default = "default_minute")]
    pub positions_interval_seconds: u64,
    /// Target interval between line enrichment cycle starts.
    #[serde(default = "default_minute")]
    pub lines_interval_seconds: u64,
    /// Sleep after each stop enrichment cycle.
    #[serde(default = "default_day")]
    pub stops_interval_seconds: u64,
    /// Delay between successive per-key API calls.
    #[serde(default = "default_courtesy_delay")]
    pub courtesy_delay_ms: u64,
}

fn default_minute() -> u64 {
    60
}

fn default_day() -> u64 {
    86_400
}

fn default_courtesy_delay() -> u64 {
    300
}

impl Default for PipelinesConfig {
    fn default() -> Self {
        Self {
            positions_interval_seconds: default_minute(),
            lines_interval_seconds: default_minute(),
            stops_interval_seconds: default_day(),
            courtesy_delay_ms: default_courtesy_delay(),
        }
    }
}

impl PipelinesConfig {
    /// Gets the courtesy delay as Duration.
    #[must_use]
    pub fn courtesy_delay(&self) -> Duration {
        Duration::from_millis(self.courtesy_delay_ms)
    }
}

/// GTFS static feed ingest, run at most once per calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtfsConfig {
    /// Whether `run` ingests the feed before starting the pipelines.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directory holding the feed's `.txt` files.
    #[serde(default = "default_gtfs_directory")]
    pub directory: PathBuf,
    /// File recording the date of the last successful ingest.
    #[serde(default = "default_gtfs_marker")]
    pub marker_file: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_gtfs_directory() -> PathBuf {
    PathBuf::from("data/gtfs")
}

fn default_gtfs_marker() -> PathBuf {
    PathBuf::from(".gtfs_ingested_today")
}

impl Default for GtfsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            directory: default_gtfs_directory(),
            marker_file: default_gtfs_marker(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Directory for per-pipeline log files; stdout only when absent.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            directory: None,
        }
    }
}
