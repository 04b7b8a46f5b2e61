use crate::error::ConfigError;
use crate::settings::Logging;
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Keeps the non-blocking file writer alive. Dropping it flushes and stops file logging.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Installs the global subscriber: compact stdout plus an optional daily rolling file.
///
/// `RUST_LOG` takes precedence over `logging.level` when it is set.
pub fn init_tracing(settings: &Logging) -> Result<LogGuard, ConfigError> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level))
    };

    let stdout_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(filter());

    let (file_layer, file_guard) = match &settings.directory {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(|e| ConfigError::LoggingError(format!("{dir}: {e}")))?;
            let appender = tracing_appender::rolling::daily(dir, &settings.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ConfigError::LoggingError(e.to_string()))?;

    Ok(LogGuard {
        _file_guard: file_guard,
    })
}
