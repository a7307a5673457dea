// src/logging.rs

//! Global `tracing` subscriber setup
//!
//! Installs an `EnvFilter` (the `RUST_LOG` environment variable wins over the
//! configured level), an optional console layer and an optional rolling file
//! layer written through a non-blocking appender.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder as RollingBuilder, Rotation};
use tracing_subscriber::layer::{Identity, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LogRotation, LoggingConfig};
use crate::error::{Error, Result, ResultExt};

/// Keeps the background log writers alive; drop it to flush and stop them.
#[derive(Debug)]
pub struct LoggingGuard {
    _guards: Vec<WorkerGuard>,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Minutely => Rotation::MINUTELY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            Error::config_key(
                "logging.level",
                vec![e.to_string()],
                format!("Invalid log level '{}'", config.level),
            )
        }),
    }
}

fn format_layer<S, W>(format: LogFormat, ansi: bool, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + 'static,
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_ansi(ansi)
        .with_target(true)
        .with_writer(writer);

    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

/// Installs the global subscriber described by `config`.
///
/// Fails instead of panicking when a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard> {
    let mut guards = Vec::new();
    let filter = env_filter(config)?;

    let console_layer = if config.console.enabled {
        format_layer(config.format, config.console.colored, std::io::stdout)
    } else {
        Identity::new().boxed()
    };

    let file_layer = match &config.file {
        Some(file_config) => {
            let directory = file_config
                .path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let prefix = file_config
                .path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("docbatch.log");

            std::fs::create_dir_all(directory).with_context(|| {
                format!("Failed to create log directory: {}", directory.display())
            })?;

            let mut builder = RollingBuilder::new()
                .rotation(file_config.rotation.into())
                .filename_prefix(prefix);
            if let Some(max_files) = file_config.max_files {
                builder = builder.max_log_files(max_files);
            }
            let appender = builder
                .build(directory)
                .with_context(|| "Failed to create rolling log file".to_string())?;

            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            format_layer(config.format, false, non_blocking)
        }
        None => Identity::new().boxed(),
    };

    Registry::default()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .with_context(|| "Failed to install global tracing subscriber".to_string())?;

    tracing::debug!("Logging initialized at level '{}'", config.level);
    Ok(LoggingGuard { _guards: guards })
}
