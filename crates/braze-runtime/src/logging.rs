//! Logging setup.
//!
//! Unified `tracing` initialisation driven by [`LoggingConfig`]: an
//! `EnvFilter` built from the configured level (or directive string), a
//! pretty or compact format layer, and optionally a daily-rotated log file
//! via `tracing-appender`.
//!
//! ```rust,ignore
//! let config = ConfigLoader::new().load()?;
//! let _guard = logging::init_from_config(&config.logging);
//! ```

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::{LogFormat, LoggingConfig};

/// Initialises the global tracing subscriber from configuration.
///
/// Returns the appender guard when logging to a file — hold it for the
/// process lifetime or buffered lines are lost on exit. Initialisation is
/// best-effort: if a subscriber is already installed (tests, embedding
/// hosts) the call is a no-op.
pub fn init_from_config(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_new(&config.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.file {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let prefix = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "braze.log".to_string());
            let appender = tracing_appender::rolling::daily(directory, prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            let layer = match config.format {
                LogFormat::Compact => layer.compact().boxed(),
                LogFormat::Pretty => layer.boxed(),
            };
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init();
            Some(guard)
        }
        None => {
            let layer = fmt::layer();
            let layer = match config.format {
                LogFormat::Compact => layer.compact().boxed(),
                LogFormat::Pretty => layer.boxed(),
            };
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init();
            None
        }
    }
}
