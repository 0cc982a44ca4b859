//! Tracing subscriber setup.
//!
//! Console output goes to stderr and stays quiet by default so it does not
//! fight with progress output. The optional log file gets the full picture.

use std::path::PathBuf;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Default filter for the log file.
pub const DEFAULT_LOG_FILTER: &str = "keyferry=info,storefronts=info";

/// Log file name inside the log directory.
pub const LOG_FILE_NAME: &str = "keyferry.log";

/// Custom timer that uses the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub verbosity: Verbosity,
    /// Directory for the daily log file. `None` disables file logging.
    pub log_dir: Option<PathBuf>,
    /// Write the log file as JSON lines.
    pub json: bool,
}

fn console_filter(verbosity: Verbosity) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(match verbosity {
        Verbosity::Quiet => "error",
        Verbosity::Normal => "keyferry=warn,storefronts=warn",
        Verbosity::Verbose => "keyferry=debug,storefronts=debug",
    })
}

fn file_filter(verbosity: Verbosity) -> EnvFilter {
    match verbosity {
        Verbosity::Verbose => EnvFilter::new("keyferry=debug,storefronts=debug"),
        _ => EnvFilter::new(DEFAULT_LOG_FILTER),
    }
}

/// Install the global subscriber.
///
/// Keep the returned guard alive until exit, or buffered file output is lost.
pub fn init_logging(options: &LogOptions) -> crate::Result<Option<WorkerGuard>> {
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(LocalTimer)
        .with_target(options.verbosity == Verbosity::Verbose)
        .with_filter(console_filter(options.verbosity));

    let (file, guard) = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = if options.json {
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_timer(LocalTimer)
                    .with_filter(file_filter(options.verbosity))
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_timer(LocalTimer)
                    .with_filter(file_filter(options.verbosity))
                    .boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Failed to set global default subscriber: {}", e)))?;

    Ok(guard)
}
