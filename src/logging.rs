//! Tracing subscriber wiring for the coordination core.
//!
//! Mirrors the teacher's `infrastructure::logging::logger` in shape (an
//! `EnvFilter` built from a configured default, an optional rotated file
//! layer, and a stdout layer) but drops the CLI-facing knobs (log format
//! selection, secret scrubbing layer) that belong to the excluded
//! application shell.

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

/// Holds the non-blocking writer guard; drop this to flush and stop logging.
pub struct LoggerGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the global tracing subscriber.
///
/// `level` is an `EnvFilter` default directive (e.g. `"info"`); it is
/// overridden by the `RUST_LOG` environment variable when present, matching
/// `EnvFilter::from_env_lossy`'s precedence.
///
/// # Errors
/// Returns an error if the default directive fails to parse or a subscriber
/// is already installed.
pub fn init(level: &str, log_dir: Option<&std::path::Path>) -> Result<LoggerGuard> {
    let build_filter = || -> Result<EnvFilter> {
        Ok(EnvFilter::builder()
            .with_default_directive(level.parse()?)
            .from_env_lossy())
    };

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_filter(build_filter()?);

    if let Some(dir) = log_dir {
        let appender = rolling::daily(dir, "swarmcore.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_filter(build_filter()?);

        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(file_layer)
            .try_init()?;

        Ok(LoggerGuard { _file_guard: Some(guard) })
    } else {
        tracing_subscriber::registry().with(stdout_layer).try_init()?;

        Ok(LoggerGuard { _file_guard: None })
    }
}
