//! # Observability
//!
//! Logging layer shared by the relay binaries.
//!
//! Services call [`init_with_config`] once at startup and use standard
//! `tracing` macros everywhere else. Every event is written as one JSON line
//! to the configured log file, and optionally echoed in compact form to
//! stderr for foreground runs.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "amie-relay".into(),
//!     default_level: "info".into(),
//!     log_path: Some("/var/log/amie/amie-relay.jsonl".into()),
//!     also_stderr: true,
//! })?;
//! tracing::info!("relay started");
//! ```
//!
//! Rotation is left to the host (logrotate with `copytruncate`, or similar).

mod json_layer;
mod sink;

pub use json_layer::{JsonLayer, LogEntry};
pub use sink::{default_log_path, FileLogWriter, WriterFactory};

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every log line.
    pub service_name: String,

    /// Default level filter. `RUST_LOG` overrides it.
    pub default_level: String,

    /// Log file path. Defaults to [`default_log_path`].
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging with custom configuration.
///
/// Fails if the log file cannot be opened or a global subscriber is
/// already installed.
pub fn init_with_config(config: LogConfig) -> io::Result<()> {
    let log_path = match config.log_path.clone() {
        Some(path) => path,
        None => default_log_path().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "home directory not found for log file")
        })?,
    };

    let writer = FileLogWriter::new(&log_path)?;
    let json_layer = JsonLayer::new(config.service_name.clone(), WriterFactory::new(writer));

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    tracing_subscriber::registry()
        .with(json_layer.with_filter(env_filter(&config.default_level)))
        .with(stderr_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        log_path = %log_path.display(),
        "observability initialized"
    );

    Ok(())
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}
