use std::fmt;
use std::path::Path;
use std::sync::{Once, OnceLock};

use chrono::{DateTime, Local};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Structured logging for the engine and its front ends.
///
/// `init_logging` installs the global subscriber once; later calls are no-ops.
/// The filter comes from `RUST_LOG`, then `VIGIL_LOG_LEVEL`, then the configured
/// level.

static INIT_LOGGING: Once = Once::new();
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_FILE_PREFIX: &str = "vigil.log";

fn build_file_appender(log_dir: &Path) -> Option<RollingFileAppender> {
    if let Err(err) = std::fs::create_dir_all(log_dir) {
        eprintln!(
            "[vigil][WARN] Failed to create log directory {}: {}",
            log_dir.display(),
            err
        );
        return None;
    }
    Some(RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX))
}

fn build_filter(configured_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(
                std::env::var("VIGIL_LOG_LEVEL").unwrap_or_else(|_| configured_level.to_string()),
            )
        })
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_logging(config: &LoggingConfig) {
    INIT_LOGGING.call_once(|| {
        let file_layer = config
            .log_dir
            .as_deref()
            .and_then(build_file_appender)
            .map(|appender| {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                LOG_GUARD.set(guard).ok();
                tracing_fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(non_blocking)
            });
        let has_file = file_layer.is_some();

        let stdout_layer = tracing_fmt::layer()
            .with_target(true)
            .with_ansi(true)
            .with_timer(UtcTime::rfc_3339());

        tracing_subscriber::registry()
            .with(build_filter(&config.level))
            .with(stdout_layer)
            .with(file_layer)
            .init();

        match config.log_dir.as_deref() {
            Some(dir) if has_file => tracing::info!(
                "Structured logging initialized. Logs are rotated daily under {}",
                dir.display()
            ),
            _ => tracing::warn!("Structured logging initialized without file sink (stdout only)"),
        }
    });
}

/// An operator-facing log line, as shown in an event log panel.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl LogEvent {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%Y-%m-%d %H:%M:%S"), self.message)
    }
}
