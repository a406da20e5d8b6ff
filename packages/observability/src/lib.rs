//! # Observability
//!
//! Self-diagnostic channel for the durable shipper.
//!
//! The shipper only emits `tracing` events. A host process calls
//! [`init_with_config`] once at startup to decide where they go: a JSONL file
//! (one object per line, flushed per line so it can be tailed) and,
//! optionally, compact stderr output.
//!
//! ```rust,ignore
//! fn main() -> Result<(), observability::ObservabilityError> {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "shipper".into(),
//!         default_level: "debug".into(),
//!         also_stderr: true,
//!         ..Default::default()
//!     })?;
//!
//!     tracing::info!("shipper ready");
//!     Ok(())
//! }
//! ```

mod file;
mod json_layer;

pub use file::{default_log_path, SelfLogWriter};
pub use json_layer::{JsonLayer, LogEntry};

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Observability error type.
#[derive(Error, Debug)]
pub enum ObservabilityError {
    /// The log file could not be created or opened
    #[error("Log file error: {0}")]
    LogFile(#[from] io::Error),

    /// A global subscriber is already installed
    #[error("Subscriber error: {0}")]
    Init(String),
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name written into every line.
    pub service_name: String,

    /// Filter used when `RUST_LOG` is unset (e.g. "info", "durable_shipper=debug").
    pub default_level: String,

    /// Log file path. Defaults to [`default_log_path`].
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "durable-shipper".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

impl LogConfig {
    /// Resolved log file path.
    pub fn resolved_log_path(&self) -> PathBuf {
        self.log_path.clone().unwrap_or_else(default_log_path)
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_level))
    }
}

/// Initialize logging with default settings for `service_name`.
pub fn init(service_name: &str) -> Result<(), ObservabilityError> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Install the global subscriber described by `config`.
///
/// Returns an error instead of panicking when the log file cannot be opened
/// or a global subscriber is already set.
pub fn init_with_config(config: LogConfig) -> Result<(), ObservabilityError> {
    let log_path = config.resolved_log_path();
    subscriber(&config)?
        .try_init()
        .map_err(|e| ObservabilityError::Init(e.to_string()))?;

    tracing::info!(log_path = %log_path.display(), "observability initialized");
    Ok(())
}

/// Build the subscriber without installing it, e.g. for
/// `tracing::subscriber::with_default` in tests.
pub fn subscriber(
    config: &LogConfig,
) -> Result<impl Subscriber + Send + Sync + 'static, ObservabilityError> {
    let writer = SelfLogWriter::open(&config.resolved_log_path())?;
    let json_layer = JsonLayer::new(config.service_name.clone(), writer);

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(io::stderr)
            .with_ansi(true)
            .with_filter(config.env_filter())
    });

    Ok(tracing_subscriber::registry()
        .with(json_layer.with_filter(config.env_filter()))
        .with(stderr_layer))
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, trace, warn, Level};
