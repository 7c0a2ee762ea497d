//! `transitflow` binary: runs the polling pipelines until Ctrl-C or SIGTERM.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use transitflow::api::SessionClient;
use transitflow::cancellation::CancellationToken;
use transitflow::config::{AppConfig, WarehouseBackend, WarehouseConfig};
use transitflow::gtfs::{DailyMarker, GtfsIngest};
use transitflow::loader::BulkLoader;
use transitflow::observability::init_logging;
use transitflow::pipeline::{LinesPipeline, PositionsPipeline, Scheduler, StopsPipeline};
use transitflow::warehouse::{InMemoryWarehouse, TableRef, Warehouse};

#[derive(Parser)]
#[command(name = "transitflow")]
#[command(about = "Polls the SPTrans real-time API and bulk-loads it into BigQuery")]
#[command(version)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, global = true, env = "TRANSITFLOW_CONFIG", default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run pipelines until interrupted
    Run {
        /// Which pipeline to run
        #[arg(long, value_enum, default_value_t = PipelineChoice::All)]
        pipeline: PipelineChoice,
    },
    /// Load and validate the configuration, then exit
    CheckConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PipelineChoice {
    Positions,
    Lines,
    Stops,
    All,
}

impl PipelineChoice {
    fn includes(self, other: Self) -> bool {
        self == Self::All || self == other
    }

    fn log_stem(self) -> &'static str {
        match self {
            Self::Positions => "positions",
            Self::Lines => "lines",
            Self::Stops => "stops",
            Self::All => "transitflow",
        }
    }
}

struct Tables {
    positions: TableRef,
    lines: TableRef,
    stops: TableRef,
}

impl Tables {
    fn from_config(config: &WarehouseConfig) -> Result<Self> {
        Ok(Self {
            positions: config.positions_table().parse()?,
            lines: config.lines_table().parse()?,
            stops: config.stops_table().parse()?,
        })
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let mut config = AppConfig::from_file(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;

    if config.bigquery.backend == WarehouseBackend::Memory {
        if config.bigquery.project_id.trim().is_empty() {
            config.bigquery.project_id = "local".to_string();
        }
        if config.bigquery.dataset_id.trim().is_empty() {
            config.bigquery.dataset_id = "transitflow".to_string();
        }
    }
    Ok(config)
}

fn build_warehouse(config: &WarehouseConfig) -> Result<Arc<dyn Warehouse>> {
    match config.backend {
        WarehouseBackend::Memory => {
            info!("Using in-memory warehouse, nothing will be persisted");
            Ok(Arc::new(InMemoryWarehouse::new()))
        }
        #[cfg(feature = "bigquery")]
        WarehouseBackend::BigQuery => Ok(Arc::new(
            transitflow::warehouse::BigQueryWarehouse::new(config)?,
        )),
        #[cfg(not(feature = "bigquery"))]
        WarehouseBackend::BigQuery => bail!("built without the `bigquery` feature"),
    }
}

fn spawn_pipelines(
    config: &AppConfig,
    choice: PipelineChoice,
    warehouse: &Arc<dyn Warehouse>,
    shutdown: &Arc<CancellationToken>,
) -> Result<Vec<JoinHandle<u64>>> {
    let tables = Tables::from_config(&config.bigquery)?;
    let pacing = &config.pipelines;
    let connect = || SessionClient::connect(&config.sptrans, config.proxy.as_ref());
    let mut handles = Vec::new();

    if choice.includes(PipelineChoice::Positions) {
        let pipeline = PositionsPipeline::new(
            connect()?,
            BulkLoader::new(warehouse.clone()),
            tables.positions.clone(),
        )
        .with_interval(std::time::Duration::from_secs(pacing.positions_interval_seconds));
        handles.push(tokio::spawn(Scheduler::new(pipeline, shutdown.clone()).run()));
    }

    if choice.includes(PipelineChoice::Lines) {
        let pipeline = LinesPipeline::new(
            connect()?,
            BulkLoader::new(warehouse.clone()),
            tables.positions.clone(),
            tables.lines.clone(),
        )
        .with_interval(std::time::Duration::from_secs(pacing.lines_interval_seconds))
        .with_courtesy_delay(pacing.courtesy_delay());
        handles.push(tokio::spawn(Scheduler::new(pipeline, shutdown.clone()).run()));
    }

    if choice.includes(PipelineChoice::Stops) {
        let pipeline = StopsPipeline::new(
            connect()?,
            BulkLoader::new(warehouse.clone()),
            tables.lines.clone(),
            tables.stops.clone(),
        )
        .with_delay(std::time::Duration::from_secs(pacing.stops_interval_seconds))
        .with_courtesy_delay(pacing.courtesy_delay());
        handles.push(tokio::spawn(Scheduler::new(pipeline, shutdown.clone()).run()));
    }

    Ok(handles)
}

async fn ingest_gtfs(config: &AppConfig, warehouse: &Arc<dyn Warehouse>) {
    let ingest = GtfsIngest::new(
        BulkLoader::new(warehouse.clone()),
        &config.gtfs.directory,
        &config.bigquery.project_id,
        &config.bigquery.dataset_id,
    );
    let marker = DailyMarker::new(&config.gtfs.marker_file);
    if let Err(e) = ingest.run_if_due(&marker).await {
        error!(error = %e, "GTFS ingest failed");
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM. Returns the signal name.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C, shutting down");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    first_signal(ctrl_c, terminate).await
}

async fn first_signal(
    ctrl_c: impl std::future::Future<Output = ()>,
    terminate: impl std::future::Future<Output = ()>,
) -> &'static str {
    tokio::select! {
        () = ctrl_c => "ctrl-c",
        () = terminate => "sigterm",
    }
}

async fn run(config_path: &Path, choice: PipelineChoice) -> Result<()> {
    let config = load_config(config_path)?;
    let _guard = init_logging(&config.logging, choice.log_stem())?;

    info!(
        config = %config_path.display(),
        pipeline = ?choice,
        backend = ?config.bigquery.backend,
        "Transitflow starting"
    );

    let warehouse = build_warehouse(&config.bigquery)?;
    if config.gtfs.enabled && choice == PipelineChoice::All {
        ingest_gtfs(&config, &warehouse).await;
    }

    let shutdown = Arc::new(CancellationToken::new());
    let handles = spawn_pipelines(&config, choice, &warehouse, &shutdown)?;

    let signal = shutdown_signal().await;
    info!(signal, "Shutdown requested, finishing running cycles");
    shutdown.cancel(signal);

    for handle in handles {
        match handle.await {
            Ok(cycles) => info!(cycles, "Pipeline task finished"),
            Err(e) => error!(error = %e, "Pipeline task panicked"),
        }
    }

    info!("Transitflow stopped");
    Ok(())
}

fn check_config(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let tables = Tables::from_config(&config.bigquery)?;

    if config.bigquery.backend == WarehouseBackend::BigQuery {
        match config.bigquery.resolve_credentials_file() {
            Some(path) if !path.is_file() => {
                bail!("credentials file {} does not exist", path.display());
            }
            Some(_) => {}
            None if config.bigquery.resolve_access_token().is_some() => {
                println!("warning: fixed access tokens expire; prefer bigquery.credentials_file");
            }
            None => bail!(
                "no BigQuery credentials: set bigquery.credentials_file, {}, bigquery.access_token or {}",
                transitflow::config::CREDENTIALS_ENV,
                transitflow::config::ACCESS_TOKEN_ENV
            ),
        }
    }

    println!("Configuration OK: {}", config_path.display());
    println!("  api:       {}", config.sptrans.base_url);
    println!("  positions: {}", tables.positions);
    println!("  lines:     {}", tables.lines);
    println!("  stops:     {}", tables.stops);
    if config.gtfs.enabled {
        println!("  gtfs:      {}", config.gtfs.directory.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { pipeline } => run(&cli.config, pipeline).await,
        Command::CheckConfig => check_config(&cli.config),
    }
}
