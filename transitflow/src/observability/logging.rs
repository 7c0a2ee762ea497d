//! Subscriber setup for the binary.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};
use crate::errors::ConfigError;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Parses a filter directive such as `info` or `transitflow=debug,warn`.
pub fn parse_filter(directives: &str) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_new(directives)
        .map_err(|e| ConfigError::Invalid(format!("invalid log level '{directives}': {e}")))
}

fn stdout_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Pretty => fmt::layer().with_target(false).boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
    }
}

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over the configured level. When a log directory is
/// configured, events are also written to `<directory>/<file_stem>.log`,
/// rotated daily; the returned guard must be held until exit so buffered
/// lines are flushed.
pub fn init_logging(
    config: &LoggingConfig,
    file_stem: &str,
) -> Result<Option<WorkerGuard>, ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_filter(&config.level)?,
    };

    let mut layers: Vec<BoxedLayer> = vec![stdout_layer(config.format)];
    let mut guard = None;

    if let Some(directory) = config.directory.as_deref() {
        std::fs::create_dir_all(Path::new(directory)).map_err(|e| {
            ConfigError::Invalid(format!("cannot create log directory {directory}: {e}"))
        })?;
        let appender = tracing_appender::rolling::daily(directory, format!("{file_stem}.log"));
        let (writer, worker) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed(),
        );
        guard = Some(worker);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| ConfigError::Invalid(format!("logging already initialized: {e}")))?;

    Ok(guard)
}
